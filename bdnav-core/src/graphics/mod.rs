//! Graphics controller: interactive menus (IG) and subtitles (PG)
//!
//! Receives reassembled graphics PES from the demuxer, builds display sets,
//! and keeps the menu state (page, selected / activated button, enabled
//! buttons per overlap group). Output goes two ways:
//! - plane updates to the application through `OverlaySink`
//! - `GcEvent`s for the player: button programs for the VM, menu and popup
//!   visibility, sounds, page user-operation mask
//!
//! Subtitle timing is event driven. `pg_wakeup` gives the presentation time
//! of the next pending display set; the player maps it to a stream position
//! and calls `update_time` when the read path passes it.

pub mod overlay;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use crate::bdparse::ig::{
    Button, IcsFragment, InteractiveComposition, Page, StateObjects, NO_BUTTON, NO_OBJECT, NO_SOUND,
};
use crate::bdparse::mobj::NavCommand;
use crate::bdparse::pg::{PresentationComposition, VideoDescriptor, WindowDefinition};
use crate::bdparse::segment::{
    split_segments, ObjectAssembler, ObjectDefinition, ObjectFragment, Palette, Rect, SegmentType,
};
use crate::bdparse::ParseResult;
use crate::demux::PesPacket;
use crate::register::{RegisterBank, PSR_SELECTED_BUTTON_ID, PSR_MENU_PAGE_ID};
use crate::uo_mask::UoMask;

pub use overlay::{Overlay, OverlayCmd, OverlayPlane, OverlayProc, OverlaySink};

/// Remote-control keys handled by menus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UserKey {
    Digit(u8),
    Up,
    Down,
    Left,
    Right,
    Enter,
    /// Toggle a popup menu
    Popup,
    /// Activate the button under the pointer
    MouseActivate,
}

/// Notifications for the player
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcEvent {
    /// Menu shown / hidden
    Menu(bool),
    /// A popup menu exists for the current stream
    PopupAvailable(bool),
    /// Play a menu sound effect
    Sound(u8),
    /// Run a button's commands in the VM
    RunButton(Arc<[NavCommand]>),
    /// Page user-operation mask changed
    UoMaskChanged(UoMask),
}

// ============================================================================
// Display Set Assembly
// ============================================================================

/// Segments collected until END
#[derive(Debug, Default)]
struct DisplaySet {
    /// 90 kHz, -1 without a timestamp
    pts: i64,
    palettes: Vec<Palette>,
    objects: Vec<ObjectDefinition>,
    ics: Vec<IcsFragment>,
    pcs: Option<PresentationComposition>,
    wds: Option<WindowDefinition>,
}

#[derive(Debug, Default)]
struct SegmentCollector {
    current: Option<DisplaySet>,
    objects: ObjectAssembler,
}

impl SegmentCollector {
    /// Feed one PES payload; returns the display sets it completed
    fn push(&mut self, pes: &PesPacket) -> ParseResult<Vec<DisplaySet>> {
        let result = self.push_segments(pes);
        if result.is_err() {
            self.reset();
        }
        result
    }

    fn push_segments(&mut self, pes: &PesPacket) -> ParseResult<Vec<DisplaySet>> {
        let mut done = Vec::new();
        for seg in split_segments(&pes.data)? {
            if seg.kind == SegmentType::End {
                if let Some(set) = self.current.take() {
                    done.push(set);
                }
                continue;
            }

            let set = self.current.get_or_insert_with(|| DisplaySet {
                pts: pes.pts.unwrap_or(-1),
                ..Default::default()
            });
            match seg.kind {
                SegmentType::Palette => set.palettes.push(Palette::parse(seg.body)?),
                SegmentType::Object => {
                    if let Some(obj) = self.objects.push(ObjectFragment::parse(seg.body)?)? {
                        set.objects.push(obj);
                    }
                }
                SegmentType::InteractiveComposition => set.ics.push(IcsFragment::parse(seg.body)?),
                SegmentType::PresentationComposition => {
                    set.pcs = Some(PresentationComposition::parse(seg.body)?)
                }
                SegmentType::Window => set.wds = Some(WindowDefinition::parse(seg.body)?),
                SegmentType::End => {}
                SegmentType::Other(code) => tracing::debug!("graphics segment 0x{:02x} ignored", code),
            }
        }
        Ok(done)
    }

    fn reset(&mut self) {
        self.current = None;
        self.objects.reset();
    }
}

/// Object of a button state at an animation frame
fn state_object(state: &StateObjects, frame: u16) -> Option<u16> {
    if state.start == NO_OBJECT {
        return None;
    }
    let len = state.end.saturating_sub(state.start) + 1;
    let idx = if state.repeat {
        frame % len
    } else {
        frame.min(len - 1)
    };
    Some(state.start + idx)
}

/// `id` is the shown button of its overlap group
fn shown(page: &Page, enabled: &[Option<u16>], id: u16) -> bool {
    page.bog_of(id)
        .and_then(|bog| enabled.get(bog).copied().flatten())
        == Some(id)
}

fn animated(state: &StateObjects) -> bool {
    state.start != NO_OBJECT && state.end > state.start
}

/// Subtitle composition waiting for its presentation time
#[derive(Debug)]
struct PgDisplay {
    pts: i64,
    video: VideoDescriptor,
    palette: Option<Arc<Palette>>,
    objects: Vec<(Arc<ObjectDefinition>, u16, u16)>,
}

// ============================================================================
// Graphics Controller
// ============================================================================

pub struct GraphicsController {
    sink: Arc<OverlaySink>,
    events: VecDeque<GcEvent>,

    // interactive graphics
    ig_segments: SegmentCollector,
    ics: Option<Arc<InteractiveComposition>>,
    ig_palettes: HashMap<u8, Arc<Palette>>,
    ig_objects: HashMap<u16, Arc<ObjectDefinition>>,
    page: u8,
    selected: Option<u16>,
    activated: Option<u16>,
    /// Shown button of each overlap group on the current page
    enabled: Vec<Option<u16>>,
    menu_open: bool,
    ig_plane_open: bool,
    frame: u16,
    uo_mask: UoMask,

    // presentation graphics
    pg_segments: SegmentCollector,
    pg_enabled: bool,
    pg_palettes: HashMap<u8, Arc<Palette>>,
    pg_objects: HashMap<u16, Arc<ObjectDefinition>>,
    pg_pending: VecDeque<PgDisplay>,
    pg_plane_open: bool,
}

impl std::fmt::Debug for GraphicsController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsController")
            .field("has_menu", &self.ics.is_some())
            .field("menu_open", &self.menu_open)
            .field("page", &self.page)
            .field("selected", &self.selected)
            .field("activated", &self.activated)
            .field("pg_pending", &self.pg_pending.len())
            .finish()
    }
}

impl GraphicsController {
    pub fn new(sink: Arc<OverlaySink>) -> Self {
        Self {
            sink,
            events: VecDeque::new(),
            ig_segments: SegmentCollector::default(),
            ics: None,
            ig_palettes: HashMap::new(),
            ig_objects: HashMap::new(),
            page: 0,
            selected: None,
            activated: None,
            enabled: Vec::new(),
            menu_open: false,
            ig_plane_open: false,
            frame: 0,
            uo_mask: UoMask::EMPTY,
            pg_segments: SegmentCollector::default(),
            pg_enabled: false,
            pg_palettes: HashMap::new(),
            pg_objects: HashMap::new(),
            pg_pending: VecDeque::new(),
            pg_plane_open: false,
        }
    }

    pub fn next_event(&mut self) -> Option<GcEvent> {
        self.events.pop_front()
    }

    pub fn has_menu(&self) -> bool {
        self.ics.is_some()
    }

    pub fn is_menu_open(&self) -> bool {
        self.menu_open
    }

    pub fn is_popup(&self) -> bool {
        self.ics.as_ref().map(|i| i.is_popup()).unwrap_or(false)
    }

    pub fn page(&self) -> u8 {
        self.page
    }

    pub fn selected_button(&self) -> Option<u16> {
        self.selected
    }

    pub fn activated_button(&self) -> Option<u16> {
        self.activated
    }

    /// Mask contributed by the visible menu page
    pub fn page_uo_mask(&self) -> UoMask {
        self.uo_mask
    }

    /// Drop all graphics state (playlist change, stop)
    pub fn reset(&mut self) {
        if self.menu_open {
            self.hide_menu();
        }
        if self.is_popup() {
            self.events.push_back(GcEvent::PopupAvailable(false));
        }
        self.ics = None;
        self.ig_palettes.clear();
        self.ig_objects.clear();
        self.ig_segments.reset();
        self.selected = None;
        self.activated = None;
        self.enabled.clear();
        self.set_uo_mask(UoMask::EMPTY);

        self.pg_segments.reset();
        self.pg_pending.clear();
        self.pg_palettes.clear();
        self.pg_objects.clear();
        if self.pg_plane_open {
            self.send(Overlay::new(OverlayPlane::Presentation, OverlayCmd::Clear));
            self.send(Overlay::new(OverlayPlane::Presentation, OverlayCmd::Flush));
        }
    }

    /// Reset and release both planes
    pub fn close(&mut self) {
        self.reset();
        for (open, plane) in [
            (self.ig_plane_open, OverlayPlane::Interactive),
            (self.pg_plane_open, OverlayPlane::Presentation),
        ] {
            if open {
                self.send(Overlay::new(plane, OverlayCmd::Close));
            }
        }
        self.ig_plane_open = false;
        self.pg_plane_open = false;
    }

    /// Re-send the menu after the overlay callback was replaced
    pub fn redraw(&mut self) {
        self.ig_plane_open = false;
        self.pg_plane_open = false;
        self.render();
    }

    fn send(&self, overlay: Overlay) {
        self.sink.send(&overlay);
    }

    fn set_uo_mask(&mut self, mask: UoMask) {
        if self.uo_mask != mask {
            self.uo_mask = mask;
            self.events.push_back(GcEvent::UoMaskChanged(mask));
        }
    }

    // ------------------------------------------------------------------------
    // Interactive graphics input
    // ------------------------------------------------------------------------

    /// Feed an IG PES from the main path or a preloaded menu sub-path.
    /// A malformed segment drops the display set being collected.
    pub fn feed_ig(&mut self, pes: &PesPacket, regs: &mut RegisterBank) -> ParseResult<()> {
        let sets = self.ig_segments.push(pes).map_err(|e| {
            tracing::warn!("IG display set dropped: {}", e);
            e
        })?;
        for set in sets {
            self.commit_ig(set, regs);
        }
        Ok(())
    }

    fn commit_ig(&mut self, set: DisplaySet, regs: &mut RegisterBank) {
        for palette in set.palettes {
            self.ig_palettes.insert(palette.id, Arc::new(palette));
        }
        for object in set.objects {
            self.ig_objects.insert(object.id, Arc::new(object));
        }
        if set.ics.is_empty() {
            return;
        }
        let ics = match InteractiveComposition::from_fragments(&set.ics) {
            Ok(ics) => ics,
            Err(e) => {
                tracing::warn!("invalid interactive composition: {}", e);
                return;
            }
        };

        let same = self.ics.as_ref().map(|cur| {
            cur.composition.number == ics.composition.number && !ics.composition.state.starts_epoch()
        });
        if same == Some(true) {
            // repeated acquisition point
            if self.menu_open {
                self.render();
            }
            return;
        }

        tracing::debug!(
            "menu: {} pages, {}",
            ics.pages.len(),
            if ics.is_popup() { "popup" } else { "always on" }
        );
        let popup = ics.is_popup();
        self.ics = Some(Arc::new(ics));
        self.activated = None;
        if popup {
            self.events.push_back(GcEvent::PopupAvailable(true));
            if self.menu_open {
                self.select_page(0, None, regs);
            }
        } else {
            self.menu_open = true;
            self.events.push_back(GcEvent::Menu(true));
            self.select_page(0, None, regs);
        }
    }

    fn current_page(&self) -> Option<(Arc<InteractiveComposition>, usize)> {
        let ics = self.ics.clone()?;
        let idx = ics.pages.iter().position(|p| p.id == self.page)?;
        Some((ics, idx))
    }

    fn is_enabled(&self, page: &Page, id: u16) -> bool {
        shown(page, &self.enabled, id)
    }

    fn enabled_buttons<'a>(&'a self, page: &'a Page) -> impl Iterator<Item = &'a Button> + 'a {
        self.enabled
            .iter()
            .flatten()
            .filter_map(move |id| page.button(*id))
    }

    /// Make a page current. `button` overrides the page default selection.
    fn select_page(&mut self, page_id: u8, button: Option<u16>, regs: &mut RegisterBank) {
        let Some(ics) = self.ics.clone() else {
            return;
        };
        let Some(page) = ics.page(page_id).or_else(|| ics.pages.first()) else {
            return;
        };

        self.page = page.id;
        self.frame = 0;
        self.activated = None;
        let _ = regs.write(PSR_MENU_PAGE_ID, page.id as u32);
        self.enabled = page
            .bogs
            .iter()
            .map(|bog| {
                let id = bog.default_valid_button_id_ref;
                bog.buttons.iter().any(|b| b.id == id).then_some(id)
            })
            .collect();

        let enabled = self.enabled.clone();
        let valid = |id: u16| id != NO_BUTTON && shown(page, &enabled, id);
        let psr_button = regs.read(PSR_SELECTED_BUTTON_ID) as u16;
        let target = button
            .filter(|id| valid(*id))
            .or(Some(page.default_selected_button_id_ref).filter(|id| valid(*id)))
            .or(Some(psr_button).filter(|id| valid(*id)))
            .or_else(|| enabled.iter().flatten().next().copied());
        self.select_button(target, regs);

        if self.menu_open {
            self.set_uo_mask(page.uo_mask);
            self.render();

            let default_activated = page.default_activated_button_id_ref;
            if valid(default_activated) {
                self.activate(default_activated);
            } else if let Some(b) = target.and_then(|id| page.button(id)) {
                if b.auto_action {
                    self.activate(b.id);
                }
            }
        }
    }

    fn select_button(&mut self, id: Option<u16>, regs: &mut RegisterBank) {
        self.selected = id;
        if let Some(id) = id {
            let _ = regs.write(PSR_SELECTED_BUTTON_ID, id as u32);
        }
    }

    /// Select a button as the user would: sound, redraw, auto-action
    fn user_select(&mut self, page: &Page, id: u16, regs: &mut RegisterBank) {
        if self.selected == Some(id) {
            return;
        }
        let Some(button) = page.button(id) else {
            return;
        };
        self.select_button(Some(id), regs);
        self.frame = 0;
        if button.selected_sound_id_ref != NO_SOUND {
            self.events
                .push_back(GcEvent::Sound(button.selected_sound_id_ref));
        }
        self.render();
        if button.auto_action {
            self.activate(id);
        }
    }

    fn activate(&mut self, id: u16) {
        let Some((ics, idx)) = self.current_page() else {
            return;
        };
        let Some(button) = ics.pages[idx].button(id) else {
            return;
        };
        tracing::debug!("button {} activated", id);
        self.activated = Some(id);
        self.frame = 0;
        if button.activated_sound_id_ref != NO_SOUND {
            self.events
                .push_back(GcEvent::Sound(button.activated_sound_id_ref));
        }
        self.render();

        if button.nav_cmds.is_empty() {
            self.activated = None;
            self.render();
        } else {
            self.events
                .push_back(GcEvent::RunButton(Arc::from(button.nav_cmds.as_slice())));
        }
    }

    fn hide_menu(&mut self) {
        self.menu_open = false;
        self.activated = None;
        if self.ig_plane_open {
            self.send(Overlay::new(OverlayPlane::Interactive, OverlayCmd::Clear));
            self.send(Overlay::new(OverlayPlane::Interactive, OverlayCmd::Flush));
        }
        self.events.push_back(GcEvent::Menu(false));
        self.set_uo_mask(UoMask::EMPTY);
    }

    fn render(&mut self) {
        if !self.menu_open {
            return;
        }
        let Some((ics, idx)) = self.current_page() else {
            return;
        };
        let page = &ics.pages[idx];

        if !self.ig_plane_open {
            self.send(
                Overlay::new(OverlayPlane::Interactive, OverlayCmd::Init)
                    .area(0, 0, ics.video.width, ics.video.height),
            );
            self.ig_plane_open = true;
        }
        self.send(Overlay::new(OverlayPlane::Interactive, OverlayCmd::Clear));

        let palette = self.ig_palettes.get(&page.palette_id_ref).cloned();
        for button in self.enabled_buttons(page) {
            let state = if self.activated == Some(button.id) {
                &button.activated
            } else if self.selected == Some(button.id) {
                &button.selected
            } else {
                &button.normal
            };
            let Some(image) = state_object(state, self.frame).and_then(|id| self.ig_objects.get(&id))
            else {
                continue;
            };
            self.send(Overlay::draw(
                OverlayPlane::Interactive,
                button.x,
                button.y,
                image.clone(),
                palette.clone(),
            ));
        }
        self.send(Overlay::new(OverlayPlane::Interactive, OverlayCmd::Flush));
    }

    // ------------------------------------------------------------------------
    // VM requests
    // ------------------------------------------------------------------------

    /// BUTTON_PAGE from a button program
    pub fn set_button_page(
        &mut self,
        page: Option<u8>,
        button: Option<u16>,
        skip_out_effect: bool,
        regs: &mut RegisterBank,
    ) {
        tracing::debug!(
            "set page {:?} button {:?}{}",
            page,
            button,
            if skip_out_effect { " (no out effect)" } else { "" }
        );
        match page {
            Some(p) if p != self.page || self.activated.is_some() => self.select_page(p, button, regs),
            _ => {
                let Some((ics, idx)) = self.current_page() else {
                    if let Some(b) = button {
                        let _ = regs.write(PSR_SELECTED_BUTTON_ID, b as u32);
                    }
                    return;
                };
                if let Some(b) = button.filter(|b| self.is_enabled(&ics.pages[idx], *b)) {
                    self.select_button(Some(b), regs);
                    self.render();
                }
            }
        }
    }

    pub fn enable_button(&mut self, id: u16, regs: &mut RegisterBank) {
        let Some((ics, idx)) = self.current_page() else {
            return;
        };
        let page = &ics.pages[idx];
        let Some(bog) = page.bog_of(id) else {
            tracing::debug!("enable: button {} not on page {}", id, self.page);
            return;
        };
        let Some(slot) = self.enabled.get_mut(bog) else {
            return;
        };
        let previous = slot.replace(id);
        if previous.is_some() && previous == self.selected {
            self.select_button(Some(id), regs);
        }
        self.render();
    }

    pub fn disable_button(&mut self, id: u16, regs: &mut RegisterBank) {
        let Some((ics, idx)) = self.current_page() else {
            return;
        };
        let Some(bog) = ics.pages[idx].bog_of(id) else {
            return;
        };
        match self.enabled.get_mut(bog) {
            Some(slot) if *slot == Some(id) => *slot = None,
            _ => return,
        }
        if self.selected == Some(id) {
            let next = self.enabled.iter().flatten().next().copied();
            self.select_button(next, regs);
        }
        self.render();
    }

    pub fn popup_off(&mut self) {
        if self.is_popup() && self.menu_open {
            self.hide_menu();
        }
    }

    /// Button program finished
    pub fn ig_end(&mut self) {
        if self.activated.take().is_some() {
            self.render();
        }
    }

    // ------------------------------------------------------------------------
    // User input
    // ------------------------------------------------------------------------

    /// Returns true when the key was consumed by the menu
    pub fn user_input(&mut self, key: UserKey, regs: &mut RegisterBank) -> bool {
        if key == UserKey::Popup {
            if !self.is_popup() {
                return false;
            }
            if self.menu_open {
                self.hide_menu();
            } else {
                self.menu_open = true;
                self.events.push_back(GcEvent::Menu(true));
                self.select_page(0, None, regs);
            }
            return true;
        }

        if !self.menu_open || self.activated.is_some() {
            return false;
        }
        let Some((ics, idx)) = self.current_page() else {
            return false;
        };
        let page = &ics.pages[idx];

        match key {
            UserKey::Up | UserKey::Down | UserKey::Left | UserKey::Right => {
                let Some(current) = self.selected.and_then(|id| page.button(id)) else {
                    return false;
                };
                let n = &current.neighbors;
                let target = match key {
                    UserKey::Up => n.upper,
                    UserKey::Down => n.lower,
                    UserKey::Left => n.left,
                    _ => n.right,
                };
                if target != current.id && self.is_enabled(page, target) {
                    self.user_select(page, target, regs);
                }
                true
            }
            UserKey::Enter | UserKey::MouseActivate => {
                if let Some(id) = self.selected {
                    self.activate(id);
                }
                true
            }
            UserKey::Digit(d) => {
                let hit = self
                    .enabled_buttons(page)
                    .find(|b| b.numeric_select_value == d as u16)
                    .map(|b| b.id);
                match hit {
                    Some(id) => {
                        self.user_select(page, id, regs);
                        true
                    }
                    None => false,
                }
            }
            UserKey::Popup => false,
        }
    }

    /// Pointer moved to `x`/`y`; selects the button under it
    pub fn mouse_select(&mut self, x: u16, y: u16, regs: &mut RegisterBank) -> bool {
        if !self.menu_open {
            return false;
        }
        let Some((ics, idx)) = self.current_page() else {
            return false;
        };
        let page = &ics.pages[idx];
        let hit = self.enabled_buttons(page).find_map(|b| {
            let obj = state_object(&b.normal, 0).and_then(|id| self.ig_objects.get(&id))?;
            let area = Rect {
                x: b.x,
                y: b.y,
                width: obj.width,
                height: obj.height,
            };
            area.contains(x, y).then_some(b.id)
        });
        match hit {
            Some(id) => {
                self.user_select(page, id, regs);
                true
            }
            None => false,
        }
    }

    /// Step button animations. Returns true while something animates.
    pub fn animate(&mut self) -> bool {
        if !self.menu_open {
            return false;
        }
        let Some((ics, idx)) = self.current_page() else {
            return false;
        };
        let page = &ics.pages[idx];
        let moving = self
            .enabled_buttons(page)
            .any(|b| animated(&b.normal) || animated(&b.selected) || animated(&b.activated));
        if moving {
            self.frame = self.frame.wrapping_add(1);
            self.render();
        }
        moving
    }

    // ------------------------------------------------------------------------
    // Presentation graphics
    // ------------------------------------------------------------------------

    pub fn set_pg_enabled(&mut self, enabled: bool) {
        if self.pg_enabled == enabled {
            return;
        }
        self.pg_enabled = enabled;
        if !enabled && self.pg_plane_open {
            self.send(Overlay::new(OverlayPlane::Presentation, OverlayCmd::Clear));
            self.send(Overlay::new(OverlayPlane::Presentation, OverlayCmd::Flush));
        }
    }

    pub fn pg_enabled(&self) -> bool {
        self.pg_enabled
    }

    pub fn feed_pg(&mut self, pes: &PesPacket) -> ParseResult<()> {
        let sets = self.pg_segments.push(pes).map_err(|e| {
            tracing::warn!("PG display set dropped: {}", e);
            e
        })?;
        for set in sets {
            self.commit_pg(set);
        }
        Ok(())
    }

    fn commit_pg(&mut self, set: DisplaySet) {
        let Some(pcs) = set.pcs else {
            return;
        };
        if pcs.composition.state.starts_epoch() {
            self.pg_palettes.clear();
            self.pg_objects.clear();
        }
        for palette in set.palettes {
            self.pg_palettes.insert(palette.id, Arc::new(palette));
        }
        for object in set.objects {
            self.pg_objects.insert(object.id, Arc::new(object));
        }

        let objects = pcs
            .objects
            .iter()
            .filter_map(|o| {
                self.pg_objects
                    .get(&o.object_id_ref)
                    .map(|obj| (obj.clone(), o.x, o.y))
            })
            .collect();
        let display = PgDisplay {
            pts: set.pts,
            video: pcs.video,
            palette: self.pg_palettes.get(&pcs.palette_id_ref).cloned(),
            objects,
        };
        let at = self.pg_pending.partition_point(|d| d.pts <= display.pts);
        self.pg_pending.insert(at, display);
    }

    /// Presentation time of the next subtitle change
    pub fn pg_wakeup(&self) -> Option<i64> {
        self.pg_pending.front().map(|d| d.pts)
    }

    /// Present every subtitle display set due at `pts` (90 kHz)
    pub fn update_time(&mut self, pts: i64) {
        while self.pg_pending.front().is_some_and(|d| d.pts <= pts) {
            let Some(display) = self.pg_pending.pop_front() else {
                break;
            };
            if self.pg_enabled {
                self.present_pg(display);
            }
        }
    }

    /// Forget queued subtitles and blank the plane (seek)
    pub fn clear_pg(&mut self) {
        self.pg_segments.reset();
        self.pg_pending.clear();
        if self.pg_plane_open {
            self.send(Overlay::new(OverlayPlane::Presentation, OverlayCmd::Clear));
            self.send(Overlay::new(OverlayPlane::Presentation, OverlayCmd::Flush));
        }
    }

    fn present_pg(&mut self, display: PgDisplay) {
        let plane = OverlayPlane::Presentation;
        if !self.pg_plane_open {
            self.send(
                Overlay::new(plane, OverlayCmd::Init).area(0, 0, display.video.width, display.video.height),
            );
            self.pg_plane_open = true;
        }
        self.send(Overlay::new(plane, OverlayCmd::Clear).at(display.pts));
        for (image, x, y) in display.objects {
            self.send(Overlay::draw(plane, x, y, image, display.palette.clone()).at(display.pts));
        }
        self.send(Overlay::new(plane, OverlayCmd::Flush).at(display.pts));
    }
}
