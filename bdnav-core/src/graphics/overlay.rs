//! Overlay delivery to the application
//!
//! The graphics controller describes plane updates as `Overlay` commands.
//! They are handed to an application callback that sits behind its own lock,
//! so registering or replacing the callback never waits on the player.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::bdparse::segment::{ObjectDefinition, Palette};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OverlayPlane {
    /// Subtitles
    Presentation,
    /// Menus
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum OverlayCmd {
    /// Plane is about to be used; `w`/`h` give its size
    Init,
    /// Plane is no longer used
    Close,
    /// Erase the whole plane
    Clear,
    /// Draw `image` at `x`/`y` with `palette`
    Draw,
    /// Plane content is complete and can be shown
    Flush,
    /// Hide the plane without dropping its content
    Hide,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overlay {
    /// 90 kHz, -1 when not tied to a presentation time
    pub pts: i64,
    pub plane: OverlayPlane,
    pub cmd: OverlayCmd,
    pub x: u16,
    pub y: u16,
    pub w: u16,
    pub h: u16,
    #[serde(skip)]
    pub palette: Option<Arc<Palette>>,
    #[serde(skip)]
    pub image: Option<Arc<ObjectDefinition>>,
}

impl Overlay {
    pub fn new(plane: OverlayPlane, cmd: OverlayCmd) -> Self {
        Self {
            pts: -1,
            plane,
            cmd,
            x: 0,
            y: 0,
            w: 0,
            h: 0,
            palette: None,
            image: None,
        }
    }

    pub fn at(mut self, pts: i64) -> Self {
        self.pts = pts;
        self
    }

    pub fn area(mut self, x: u16, y: u16, w: u16, h: u16) -> Self {
        self.x = x;
        self.y = y;
        self.w = w;
        self.h = h;
        self
    }

    pub fn draw(
        plane: OverlayPlane,
        x: u16,
        y: u16,
        image: Arc<ObjectDefinition>,
        palette: Option<Arc<Palette>>,
    ) -> Self {
        let (w, h) = (image.width, image.height);
        Self {
            pts: -1,
            plane,
            cmd: OverlayCmd::Draw,
            x,
            y,
            w,
            h,
            palette,
            image: Some(image),
        }
    }
}

/// Application overlay callback. Must not call back into the player.
pub type OverlayProc = Box<dyn FnMut(&Overlay) + Send>;

/// Holder of the overlay callback
#[derive(Default)]
pub struct OverlaySink {
    proc_: Mutex<Option<OverlayProc>>,
}

impl std::fmt::Debug for OverlaySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlaySink")
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl OverlaySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or remove, with `None`) the callback. A replaced callback
    /// receives `Close` for both planes first.
    pub fn register(&self, proc_: Option<OverlayProc>) {
        let mut guard = self.proc_.lock();
        if let Some(old) = guard.as_mut() {
            for plane in [OverlayPlane::Presentation, OverlayPlane::Interactive] {
                old(&Overlay::new(plane, OverlayCmd::Close));
            }
        }
        *guard = proc_;
    }

    pub fn is_registered(&self) -> bool {
        self.proc_.lock().is_some()
    }

    /// Deliver one command; dropped when nothing is registered
    pub fn send(&self, overlay: &Overlay) {
        if let Some(proc_) = self.proc_.lock().as_mut() {
            proc_(overlay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaced_callback_sees_close() {
        let sink = OverlaySink::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        sink.register(Some(Box::new(move |o: &Overlay| log.lock().push((o.plane, o.cmd)))));

        sink.send(&Overlay::new(OverlayPlane::Interactive, OverlayCmd::Flush));
        sink.register(None);
        sink.send(&Overlay::new(OverlayPlane::Interactive, OverlayCmd::Clear));

        assert_eq!(
            *seen.lock(),
            vec![
                (OverlayPlane::Interactive, OverlayCmd::Flush),
                (OverlayPlane::Presentation, OverlayCmd::Close),
                (OverlayPlane::Interactive, OverlayCmd::Close),
            ]
        );
        assert!(!sink.is_registered());
    }
}
