//! HDMV navigation command interpreter
//!
//! Runs movie objects (and button programs handed over by the graphics
//! controller) until the program produces an event for the player, then
//! yields. The player drains events with `next_event` and calls `run` again.
//!
//! States:
//! - `Idle`: nothing to execute
//! - `Running`: a program is loaded and will continue on the next `run`
//! - `Suspended`: the object started playback and waits for it to finish
//! - `Terminated`: an interpreter fault occurred; only `stop` leaves it

pub mod instruction;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;

use crate::bdparse::mobj::{MovieObjects, NavCommand};
use crate::register::{
    RegisterBank, PSR_ANGLE_NUMBER, PSR_3D_STATUS, PSR_IG_STREAM_ID, PSR_MENU_PAGE_ID,
    PSR_NAV_TIMER, PSR_PG_STREAM, PSR_PRIMARY_AUDIO_ID, PSR_PROFILE_VERSION,
    PSR_SECONDARY_AUDIO_VIDEO, PSR_SELECTED_BUTTON_ID,
};
use crate::uo_mask::UoMask;

pub use instruction::{disassemble, encode, CmpOp, Instruction, Opcode, Operand, SetOp};

/// Nested CALL_OBJECT / CALL_TITLE / menu-call frames
const MAX_CALL_DEPTH: usize = 16;

/// Operand flag marking a PSR reference
const PSR_FLAG: u32 = 0x8000_0000;

/// Profile bits of a player that can output stereoscopic video
const PROFILE_3D_MASK: u32 = 0x0010_0000;

// ============================================================================
// Errors & Events
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("unknown opcode 0x{insn:08x}")]
    UnknownOpcode { insn: u32 },

    #[error("jump to {target} outside a program of {len} commands")]
    OutOfRangeJump { target: u32, len: usize },

    #[error("call stack corrupted: {0}")]
    StackCorruption(&'static str),

    #[error("invalid register operand 0x{0:08x}")]
    InvalidRegister(u32),

    #[error("invalid movie object {0}")]
    InvalidObject(u32),

    #[error("instruction limit of {0} reached without an event")]
    InstructionLimit(u32),
}

pub type VmResult<T> = Result<T, VmError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum VmState {
    Idle,
    Running,
    Suspended,
    Terminated,
}

/// Requests from a program to the player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HdmvEvent {
    /// JUMP_TITLE
    Title(u32),
    /// CALL_TITLE; the caller is on the call stack
    CallTitle(u32),
    PlayPl { playlist: u32 },
    PlayPlPi { playlist: u32, play_item: u32 },
    PlayPlPm { playlist: u32, mark: u32 },
    /// LINK_PI within the current playlist
    PlayPi(u32),
    /// LINK_MK within the current playlist
    PlayPm(u32),
    PlayStop,
    /// Page and button change requested by a button program
    SetButtonPage {
        page: Option<u8>,
        button: Option<u16>,
        skip_out_effect: bool,
    },
    EnableButton(u16),
    DisableButton(u16),
    PopupOff,
    StillOn,
    StillOff,
    /// Button program finished
    IgEnd,
    /// Movie object finished
    End,
}

// ============================================================================
// Execution State
// ============================================================================

#[derive(Debug, Clone)]
enum Program {
    Object(u32),
    Button(Arc<[NavCommand]>),
}

#[derive(Debug, Clone)]
struct Exec {
    program: Program,
    pc: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Frame {
    object: u32,
    pc: u32,
    /// Restore backed-up PSRs on RESUME (menu call)
    restore_psr: bool,
    /// The object was waiting for playback when suspended
    resume_playback: bool,
}

/// Object waiting for playback to end; continues at `pc`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Playing {
    object: u32,
    pc: u32,
}

#[derive(Debug, Clone, Copy)]
struct NvTimer {
    object: u32,
    deadline: Instant,
}

enum Flow {
    Next,
    /// Failed comparison: skip one command
    Skip,
    Goto(u32),
    /// Program replaced or finished
    Switched,
}

pub struct HdmvVm {
    objects: Arc<MovieObjects>,
    state: VmState,
    current: Option<Exec>,
    playing: Option<Playing>,
    call_stack: Vec<Frame>,
    events: VecDeque<HdmvEvent>,
    nv_timer: Option<NvTimer>,
    instruction_limit: u32,
    rng: StdRng,
}

impl std::fmt::Debug for HdmvVm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HdmvVm")
            .field("state", &self.state)
            .field("current", &self.current)
            .field("playing", &self.playing)
            .field("call_depth", &self.call_stack.len())
            .field("pending_events", &self.events.len())
            .finish()
    }
}

impl HdmvVm {
    pub fn new(objects: Arc<MovieObjects>, instruction_limit: u32) -> Self {
        Self {
            objects,
            state: VmState::Idle,
            current: None,
            playing: None,
            call_stack: Vec::new(),
            events: VecDeque::new(),
            nv_timer: None,
            instruction_limit: instruction_limit.max(1),
            rng: StdRng::from_entropy(),
        }
    }

    pub fn objects(&self) -> &MovieObjects {
        &self.objects
    }

    pub fn state(&self) -> VmState {
        self.state
    }

    /// A program is loaded and not waiting on playback
    pub fn is_running(&self) -> bool {
        self.state == VmState::Running && self.current.is_some()
    }

    /// An object is suspended until the current playlist finishes
    pub fn is_waiting_for_playback(&self) -> bool {
        self.playing.is_some()
    }

    pub fn next_event(&mut self) -> Option<HdmvEvent> {
        self.events.pop_front()
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Movie object whose flags apply: the running one, else the one waiting on playback
    fn active_object(&self) -> Option<u32> {
        match &self.current {
            Some(Exec {
                program: Program::Object(id),
                ..
            }) => Some(*id),
            _ => self.playing.map(|p| p.object),
        }
    }

    /// Active movie object and its next command. Button programs do not move it.
    pub fn object_position(&self) -> Option<(u32, u32)> {
        match &self.current {
            Some(Exec {
                program: Program::Object(id),
                pc,
            }) => Some((*id, *pc)),
            _ => self.playing.map(|p| (p.object, p.pc)),
        }
    }

    /// Title-level user-operation mask of the active movie object
    pub fn uo_mask(&self) -> UoMask {
        self.active_object()
            .and_then(|id| self.objects.objects.get(id as usize))
            .map(|obj| UoMask::from_flags(obj.menu_call_mask, obj.title_search_mask))
            .unwrap_or(UoMask::EMPTY)
    }

    // ------------------------------------------------------------------------
    // Control from the player
    // ------------------------------------------------------------------------

    /// Start a movie object from the beginning (title start, first play, top menu)
    pub fn start_object(&mut self, object: u32) -> VmResult<()> {
        if self.state == VmState::Terminated {
            self.state = VmState::Idle;
        }
        self.events.clear();
        self.jump_object(object)
    }

    /// Run a button's commands as a temporary program. The object waiting on
    /// playback stays suspended.
    pub fn run_button_program(&mut self, cmds: &[NavCommand]) {
        if cmds.is_empty() || self.state == VmState::Terminated {
            return;
        }
        tracing::debug!("button program: {} commands", cmds.len());
        self.current = Some(Exec {
            program: Program::Button(Arc::from(cmds)),
            pc: 0,
        });
        self.state = VmState::Running;
    }

    /// Playlist playback ended: continue the object that started it
    pub fn playback_finished(&mut self) {
        if let Some(p) = self.playing.take() {
            tracing::debug!("playback finished, object {} continues at {}", p.object, p.pc);
            self.current = Some(Exec {
                program: Program::Object(p.object),
                pc: p.pc,
            });
            self.state = VmState::Running;
        }
    }

    /// Menu call: keep the playing object for a later RESUME if it asks to be
    /// resumed. Returns true when playback state was saved.
    pub fn suspend_playback(&mut self, regs: &mut RegisterBank) -> bool {
        let Some(p) = self.playing.take() else {
            return false;
        };
        let resumable = self
            .objects
            .objects
            .get(p.object as usize)
            .map(|o| o.resume_intention_flag)
            .unwrap_or(false);
        if !resumable || self.call_stack.len() >= MAX_CALL_DEPTH {
            tracing::debug!("object {} not resumable", p.object);
            return false;
        }
        self.call_stack.push(Frame {
            object: p.object,
            pc: p.pc,
            restore_psr: true,
            resume_playback: true,
        });
        regs.save_state();
        true
    }

    /// Back to idle; clears the call stack and the navigation timer
    pub fn stop(&mut self) {
        self.current = None;
        self.playing = None;
        self.call_stack.clear();
        self.events.clear();
        self.nv_timer = None;
        self.state = VmState::Idle;
    }

    /// Execute until the program yields an event, finishes or suspends.
    ///
    /// A fault is returned once; the VM is then `Terminated`.
    pub fn run(&mut self, regs: &mut RegisterBank) -> VmResult<()> {
        if self.state == VmState::Terminated {
            return Ok(());
        }
        if let Err(e) = self.poll_nv_timer(Instant::now()) {
            return Err(self.fault(e));
        }

        let mut executed = 0u32;
        while self.events.is_empty() {
            let Some((cmd, pc, len)) = self.fetch() else {
                break;
            };
            if pc as usize >= len {
                self.end_program();
                break;
            }

            executed += 1;
            if executed > self.instruction_limit {
                return Err(self.fault(VmError::InstructionLimit(self.instruction_limit)));
            }

            let result = Instruction::decode(cmd).and_then(|insn| {
                tracing::trace!("{:4}: {}", pc, insn);
                self.step(&insn, pc, regs)
            });
            let flow = match result {
                Ok(flow) => flow,
                Err(e) => return Err(self.fault(e)),
            };
            if let Err(e) = self.advance(flow, len) {
                return Err(self.fault(e));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    fn fault(&mut self, e: VmError) -> VmError {
        tracing::error!("HDMV fault: {}", e);
        self.current = None;
        self.playing = None;
        self.call_stack.clear();
        self.events.clear();
        self.nv_timer = None;
        self.state = VmState::Terminated;
        e
    }

    /// Current command, pc and program length
    fn fetch(&self) -> Option<(NavCommand, u32, usize)> {
        let exec = self.current.as_ref()?;
        let cmds: &[NavCommand] = match &exec.program {
            Program::Object(id) => &self.objects.objects.get(*id as usize)?.cmds,
            Program::Button(cmds) => cmds,
        };
        let cmd = cmds.get(exec.pc as usize).copied().unwrap_or_default();
        Some((cmd, exec.pc, cmds.len()))
    }

    fn advance(&mut self, flow: Flow, len: usize) -> VmResult<()> {
        let Some(exec) = self.current.as_mut() else {
            return Ok(());
        };
        match flow {
            Flow::Next => exec.pc += 1,
            Flow::Skip => exec.pc += 2,
            Flow::Goto(target) => {
                if target as usize >= len {
                    return Err(VmError::OutOfRangeJump { target, len });
                }
                exec.pc = target;
            }
            Flow::Switched => {}
        }
        Ok(())
    }

    fn idle_state(&self) -> VmState {
        if self.playing.is_some() {
            VmState::Suspended
        } else {
            VmState::Idle
        }
    }

    fn end_program(&mut self) {
        match self.current.take() {
            Some(Exec {
                program: Program::Button(_),
                ..
            }) => {
                tracing::debug!("button program finished");
                self.events.push_back(HdmvEvent::IgEnd);
            }
            Some(Exec {
                program: Program::Object(id),
                ..
            }) => {
                tracing::debug!("movie object {} finished", id);
                self.events.push_back(HdmvEvent::End);
            }
            None => {}
        }
        self.state = self.idle_state();
    }

    fn jump_object(&mut self, object: u32) -> VmResult<()> {
        if object as usize >= self.objects.objects.len() {
            return Err(VmError::InvalidObject(object));
        }
        tracing::debug!("movie object {}", object);
        self.playing = None;
        self.current = Some(Exec {
            program: Program::Object(object),
            pc: 0,
        });
        self.state = VmState::Running;
        Ok(())
    }

    fn poll_nv_timer(&mut self, now: Instant) -> VmResult<()> {
        match self.nv_timer {
            Some(timer) if timer.deadline <= now => {
                self.nv_timer = None;
                tracing::debug!("navigation timer expired, object {}", timer.object);
                self.jump_object(timer.object)
            }
            _ => Ok(()),
        }
    }

    /// Frame to return to from a call made at `pc`
    fn return_frame(&self, pc: u32) -> VmResult<Frame> {
        match &self.current {
            Some(Exec {
                program: Program::Object(id),
                ..
            }) => Ok(Frame {
                object: *id,
                pc: pc + 1,
                restore_psr: false,
                resume_playback: false,
            }),
            _ => match self.playing {
                Some(p) => Ok(Frame {
                    object: p.object,
                    pc: p.pc,
                    restore_psr: false,
                    resume_playback: true,
                }),
                None => Err(VmError::StackCorruption("call without a movie object")),
            },
        }
    }

    fn push_frame(&mut self, frame: Frame) -> VmResult<()> {
        if self.call_stack.len() >= MAX_CALL_DEPTH {
            return Err(VmError::StackCorruption("call stack overflow"));
        }
        self.call_stack.push(frame);
        Ok(())
    }

    fn resume(&mut self, regs: &mut RegisterBank) -> VmResult<Flow> {
        let frame = self
            .call_stack
            .pop()
            .ok_or(VmError::StackCorruption("resume without a suspended object"))?;
        if frame.object as usize >= self.objects.objects.len() {
            return Err(VmError::StackCorruption("suspended object vanished"));
        }
        tracing::debug!("resume object {} at {}", frame.object, frame.pc);

        if frame.restore_psr {
            regs.restore_state();
        }
        if frame.resume_playback {
            self.current = None;
            self.playing = Some(Playing {
                object: frame.object,
                pc: frame.pc,
            });
            self.state = VmState::Suspended;
        } else {
            self.playing = None;
            self.current = Some(Exec {
                program: Program::Object(frame.object),
                pc: frame.pc,
            });
            self.state = VmState::Running;
        }
        Ok(Flow::Switched)
    }

    /// Start playback: a movie object waits for it to end, a button program ends
    fn play(&mut self, event: HdmvEvent, pc: u32) -> Flow {
        self.events.push_back(event);
        match self.current.take() {
            Some(Exec {
                program: Program::Object(id),
                ..
            }) => {
                self.playing = Some(Playing {
                    object: id,
                    pc: pc + 1,
                });
            }
            Some(Exec {
                program: Program::Button(_),
                ..
            }) => self.events.push_back(HdmvEvent::IgEnd),
            None => {}
        }
        self.state = self.idle_state();
        Flow::Switched
    }

    fn in_button_program(&self) -> bool {
        matches!(
            self.current,
            Some(Exec {
                program: Program::Button(_),
                ..
            })
        )
    }

    fn read(&self, op: Operand, regs: &RegisterBank) -> VmResult<u32> {
        match op {
            Operand::Imm(v) => Ok(v),
            Operand::Psr(n) => regs
                .try_read(n)
                .map_err(|_| VmError::InvalidRegister(n | PSR_FLAG)),
            Operand::Gpr(n) => regs.gpr(n).map_err(|_| VmError::InvalidRegister(n)),
        }
    }

    fn store(&self, op: Operand, value: u32, regs: &mut RegisterBank) -> VmResult<()> {
        match op {
            Operand::Gpr(n) => regs
                .write_gpr(n, value)
                .map_err(|_| VmError::InvalidRegister(n)),
            Operand::Psr(n) => {
                regs.try_read(n)
                    .map_err(|_| VmError::InvalidRegister(n | PSR_FLAG))?;
                tracing::warn!("program store to PSR{} rejected", n);
                Ok(())
            }
            Operand::Imm(_) => {
                tracing::warn!("store to an immediate operand ignored");
                Ok(())
            }
        }
    }

    /// Bit-field operand of a set-system command: when not immediate, the
    /// value part comes from the GPR named in the low 12 bits.
    fn flagged(&self, raw: u32, immediate: bool, value_mask: u32, regs: &RegisterBank) -> VmResult<u32> {
        if immediate {
            return Ok(raw);
        }
        let value = regs
            .gpr(raw & 0xfff)
            .map_err(|_| VmError::InvalidRegister(raw & 0xfff))?;
        Ok((raw & !value_mask) | (value & value_mask))
    }

    fn step(&mut self, insn: &Instruction, pc: u32, regs: &mut RegisterBank) -> VmResult<Flow> {
        let dst = insn.dst_operand();
        let src = insn.src_operand();

        let flow = match insn.opcode {
            Opcode::Nop => Flow::Next,
            Opcode::Goto => Flow::Goto(self.read(dst, regs)?),
            Opcode::Break => {
                self.end_program();
                Flow::Switched
            }

            Opcode::JumpObject => {
                let object = self.read(dst, regs)?;
                self.jump_object(object)?;
                Flow::Switched
            }
            Opcode::JumpTitle => {
                let title = self.read(dst, regs)?;
                self.events.push_back(HdmvEvent::Title(title));
                self.current = None;
                self.playing = None;
                self.state = VmState::Idle;
                Flow::Switched
            }
            Opcode::CallObject => {
                let object = self.read(dst, regs)?;
                if object as usize >= self.objects.objects.len() {
                    return Err(VmError::InvalidObject(object));
                }
                let frame = self.return_frame(pc)?;
                self.push_frame(frame)?;
                self.jump_object(object)?;
                Flow::Switched
            }
            Opcode::CallTitle => {
                let title = self.read(dst, regs)?;
                let frame = self.return_frame(pc)?;
                self.push_frame(frame)?;
                self.events.push_back(HdmvEvent::CallTitle(title));
                self.current = None;
                self.playing = None;
                self.state = VmState::Idle;
                Flow::Switched
            }
            Opcode::Resume => self.resume(regs)?,

            Opcode::PlayPl => {
                let playlist = self.read(dst, regs)?;
                self.play(HdmvEvent::PlayPl { playlist }, pc)
            }
            Opcode::PlayPlPi => {
                let playlist = self.read(dst, regs)?;
                let play_item = self.read(src, regs)?;
                self.play(HdmvEvent::PlayPlPi { playlist, play_item }, pc)
            }
            Opcode::PlayPlPm => {
                let playlist = self.read(dst, regs)?;
                let mark = self.read(src, regs)?;
                self.play(HdmvEvent::PlayPlPm { playlist, mark }, pc)
            }
            Opcode::LinkPi => {
                let play_item = self.read(dst, regs)?;
                self.play(HdmvEvent::PlayPi(play_item), pc)
            }
            Opcode::LinkMk => {
                let mark = self.read(dst, regs)?;
                self.play(HdmvEvent::PlayPm(mark), pc)
            }
            Opcode::TerminatePl => {
                self.events.push_back(HdmvEvent::PlayStop);
                self.playing = None;
                Flow::Next
            }

            Opcode::Cmp(op) => {
                let a = self.read(dst, regs)?;
                let b = self.read(src, regs)?;
                if op.eval(a, b) {
                    Flow::Next
                } else {
                    Flow::Skip
                }
            }

            Opcode::Set(op) => {
                self.set(op, dst, src, regs)?;
                Flow::Next
            }

            Opcode::SetStream => {
                self.set_stream(insn, regs)?;
                Flow::Next
            }
            Opcode::SetSecStream => {
                self.set_sec_stream(insn, regs)?;
                Flow::Next
            }
            Opcode::SetNvTimer => {
                let object = self.read(dst, regs)?;
                let seconds = self.read(src, regs)?;
                if seconds == 0 {
                    self.nv_timer = None;
                } else {
                    self.nv_timer = Some(NvTimer {
                        object,
                        deadline: Instant::now() + Duration::from_secs(seconds as u64),
                    });
                }
                let _ = regs.write(PSR_NAV_TIMER, seconds);
                Flow::Next
            }
            Opcode::ButtonPage => self.button_page(insn, regs)?,
            Opcode::EnableButton => {
                let button = self.read(dst, regs)?;
                self.events.push_back(HdmvEvent::EnableButton(button as u16));
                Flow::Next
            }
            Opcode::DisableButton => {
                let button = self.read(dst, regs)?;
                self.events.push_back(HdmvEvent::DisableButton(button as u16));
                Flow::Next
            }
            Opcode::PopupOff => {
                self.events.push_back(HdmvEvent::PopupOff);
                Flow::Next
            }
            Opcode::StillOn => {
                self.events.push_back(HdmvEvent::StillOn);
                Flow::Next
            }
            Opcode::StillOff => {
                self.events.push_back(HdmvEvent::StillOff);
                Flow::Next
            }
            Opcode::SetOutputMode => {
                let mode = self.read(dst, regs)? & 1;
                if regs.read(PSR_PROFILE_VERSION) & PROFILE_3D_MASK != 0 {
                    let _ = regs.write_masked(PSR_3D_STATUS, mode, 1);
                } else {
                    tracing::debug!("SET_OUTPUT_MODE ignored: player is not 3D capable");
                }
                Flow::Next
            }
        };
        Ok(flow)
    }

    fn set(&mut self, op: SetOp, dst: Operand, src: Operand, regs: &mut RegisterBank) -> VmResult<()> {
        let a = self.read(dst, regs)?;
        let b = self.read(src, regs)?;
        let value = match op {
            SetOp::Move => b,
            SetOp::Swap => {
                self.store(src, a, regs)?;
                b
            }
            SetOp::Add => a.saturating_add(b),
            SetOp::Sub => a.saturating_sub(b),
            SetOp::Mul => a.saturating_mul(b),
            SetOp::Div | SetOp::Mod if b == 0 => {
                tracing::warn!("division by zero ignored");
                a
            }
            SetOp::Div => a / b,
            SetOp::Mod => a % b,
            SetOp::Rnd if b == 0 => {
                tracing::warn!("RND with zero range ignored");
                a
            }
            SetOp::Rnd => self.rng.gen_range(1..=b),
            SetOp::And => a & b,
            SetOp::Or => a | b,
            SetOp::Xor => a ^ b,
            SetOp::BitSet => a | 1u32.checked_shl(b).unwrap_or(0),
            SetOp::BitClr => a & !1u32.checked_shl(b).unwrap_or(0),
            SetOp::Shl => a.checked_shl(b).unwrap_or(0),
            SetOp::Shr => a.checked_shr(b).unwrap_or(0),
        };
        self.store(dst, value, regs)
    }

    /// Primary audio, PG/text subtitle, IG and angle selection
    fn set_stream(&mut self, insn: &Instruction, regs: &mut RegisterBank) -> VmResult<()> {
        let dst = self.flagged(insn.dst, insn.imm_op1, 0x0fff_0fff, regs)?;
        let src = self.flagged(insn.src, insn.imm_op2, 0x00ff_00ff, regs)?;

        if dst & 0x8000_0000 != 0 {
            let audio = (dst >> 16) & 0xfff;
            let _ = regs.write(PSR_PRIMARY_AUDIO_ID, audio);
        }
        if src & 0x8000_0000 != 0 {
            let ig = (src >> 16) & 0xff;
            let _ = regs.write(PSR_IG_STREAM_ID, ig);
        }
        if src & 0x8000 != 0 {
            let angle = src & 0xff;
            let _ = regs.write(PSR_ANGLE_NUMBER, angle);
        }

        let mut pg = regs.read(PSR_PG_STREAM);
        if dst & 0x8000 != 0 {
            pg = (pg & 0xffff_f000) | (dst & 0xfff);
        }
        let display = (dst & 0x4000) << 17;
        pg = display | (pg & 0x7fff_ffff);
        let _ = regs.write(PSR_PG_STREAM, pg);
        Ok(())
    }

    /// Secondary video and secondary audio selection
    fn set_sec_stream(&mut self, insn: &Instruction, regs: &mut RegisterBank) -> VmResult<()> {
        let dst = self.flagged(insn.dst, insn.imm_op1, 0x0000_00ff, regs)?;
        let src = self.flagged(insn.src, insn.imm_op2, 0x0000_00ff, regs)?;

        let mut psr14 = regs.read(PSR_SECONDARY_AUDIO_VIDEO);
        if dst & 0x8000_0000 != 0 {
            psr14 = (psr14 & !0x0000_ff00) | ((dst & 0xff) << 8);
        }
        if src & 0x8000_0000 != 0 {
            psr14 = (psr14 & !0x0000_00ff) | (src & 0xff);
        }
        let video_display = (dst >> 30) & 1;
        let audio_display = (src >> 30) & 1;
        psr14 = (psr14 & 0x3fff_ffff) | (video_display << 31) | (audio_display << 30);
        let _ = regs.write(PSR_SECONDARY_AUDIO_VIDEO, psr14);
        Ok(())
    }

    /// From a button program the request goes to the graphics controller and
    /// the program ends; from a movie object the PSRs are set directly.
    fn button_page(&mut self, insn: &Instruction, regs: &mut RegisterBank) -> VmResult<Flow> {
        let dst = self.flagged(insn.dst, insn.imm_op1, 0x0000_ffff, regs)?;
        let src = self.flagged(insn.src, insn.imm_op2, 0x0000_00ff, regs)?;
        let page = (src & 0x8000_0000 != 0).then_some((src & 0xff) as u8);
        let button = (dst & 0x8000_0000 != 0).then_some((dst & 0xffff) as u16);

        if self.in_button_program() {
            self.events.push_back(HdmvEvent::SetButtonPage {
                page,
                button,
                skip_out_effect: src & 0x4000_0000 != 0,
            });
            self.end_program();
            return Ok(Flow::Switched);
        }

        if let Some(page) = page {
            let _ = regs.write(PSR_MENU_PAGE_ID, page as u32);
        }
        if let Some(button) = button {
            let _ = regs.write(PSR_SELECTED_BUTTON_ID, button as u32);
        }
        Ok(Flow::Next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bdparse::mobj::MovieObject;
    use crate::register::{PSR_PLAYLIST, PSR_TITLE_NUMBER};

    fn object(resume: bool, cmds: Vec<NavCommand>) -> MovieObject {
        MovieObject {
            resume_intention_flag: resume,
            menu_call_mask: false,
            title_search_mask: false,
            cmds,
        }
    }

    fn vm(objects: Vec<MovieObject>) -> HdmvVm {
        HdmvVm::new(
            Arc::new(MovieObjects {
                version: "0200".into(),
                objects,
            }),
            1000,
        )
    }

    fn mov(reg: u32, value: u32) -> NavCommand {
        encode(Opcode::Set(SetOp::Move), false, true, reg, value)
    }

    fn set(op: SetOp, reg: u32, value: u32) -> NavCommand {
        encode(Opcode::Set(op), false, true, reg, value)
    }

    fn drain(vm: &mut HdmvVm) -> Vec<HdmvEvent> {
        std::iter::from_fn(|| vm.next_event()).collect()
    }

    #[test]
    fn arithmetic_saturates_and_floors() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(
            false,
            vec![
                mov(0, u32::MAX - 1),
                set(SetOp::Add, 0, 10),
                mov(1, 3),
                set(SetOp::Sub, 1, 5),
                mov(2, 7),
                set(SetOp::Div, 2, 0),
                mov(3, 1),
                set(SetOp::Shl, 3, 40),
                mov(4, 0),
                set(SetOp::BitSet, 4, 3),
                mov(5, 0x10),
                encode(Opcode::Set(SetOp::Swap), false, false, 5, 4),
            ],
        )]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();

        assert_eq!(regs.gpr(0).unwrap(), u32::MAX);
        assert_eq!(regs.gpr(1).unwrap(), 0);
        assert_eq!(regs.gpr(2).unwrap(), 7);
        assert_eq!(regs.gpr(3).unwrap(), 0);
        assert_eq!(regs.gpr(5).unwrap(), 8);
        assert_eq!(regs.gpr(4).unwrap(), 0x10);
        assert_eq!(drain(&mut vm), vec![HdmvEvent::End]);
        assert_eq!(vm.state(), VmState::Idle);
    }

    #[test]
    fn random_stays_in_range() {
        let mut regs = RegisterBank::new();
        let cmds: Vec<NavCommand> = (0..50).map(|i| set(SetOp::Rnd, i, 6)).collect();
        let mut vm = vm(vec![object(false, cmds)]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        for i in 0..50 {
            let v = regs.gpr(i).unwrap();
            assert!((1..=6).contains(&v), "r{} = {}", i, v);
        }
    }

    #[test]
    fn failed_comparison_skips_one_command() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(
            false,
            vec![
                mov(0, 5),
                encode(Opcode::Cmp(CmpOp::Eq), false, true, 0, 4),
                mov(1, 1),
                encode(Opcode::Cmp(CmpOp::Lt), false, true, 0, 6),
                mov(2, 1),
            ],
        )]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.gpr(1).unwrap(), 0);
        assert_eq!(regs.gpr(2).unwrap(), 1);
    }

    #[test]
    fn play_suspends_until_playback_finishes() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(
            false,
            vec![
                encode(Opcode::PlayPl, true, false, 1, 0),
                mov(0, 42),
            ],
        )]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        assert_eq!(drain(&mut vm), vec![HdmvEvent::PlayPl { playlist: 1 }]);
        assert_eq!(vm.state(), VmState::Suspended);
        assert!(vm.is_waiting_for_playback());

        // nothing runs while suspended
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.gpr(0).unwrap(), 0);

        vm.playback_finished();
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.gpr(0).unwrap(), 42);
        assert_eq!(drain(&mut vm), vec![HdmvEvent::End]);
    }

    #[test]
    fn unknown_opcode_faults_once() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(false, vec![NavCommand::new(0x1800_0000, 0, 0)])]);
        vm.start_object(0).unwrap();
        assert!(matches!(
            vm.run(&mut regs),
            Err(VmError::UnknownOpcode { insn: 0x1800_0000 })
        ));
        assert_eq!(vm.state(), VmState::Terminated);
        assert!(vm.run(&mut regs).is_ok());

        vm.stop();
        assert_eq!(vm.state(), VmState::Idle);
    }

    #[test]
    fn jump_outside_program_faults() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(false, vec![encode(Opcode::Goto, true, false, 5, 0)])]);
        vm.start_object(0).unwrap();
        assert_eq!(
            vm.run(&mut regs),
            Err(VmError::OutOfRangeJump { target: 5, len: 1 })
        );
    }

    #[test]
    fn tight_loop_hits_instruction_limit() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(false, vec![encode(Opcode::Goto, true, false, 0, 0)])]);
        vm.start_object(0).unwrap();
        assert_eq!(vm.run(&mut regs), Err(VmError::InstructionLimit(1000)));
    }

    #[test]
    fn resume_without_frame_is_stack_corruption() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(false, vec![encode(Opcode::Resume, false, false, 0, 0)])]);
        vm.start_object(0).unwrap();
        assert!(matches!(
            vm.run(&mut regs),
            Err(VmError::StackCorruption(_))
        ));
    }

    #[test]
    fn invalid_register_faults() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(false, vec![mov(5000, 1)])]);
        vm.start_object(0).unwrap();
        assert_eq!(vm.run(&mut regs), Err(VmError::InvalidRegister(5000)));
    }

    #[test]
    fn store_to_psr_is_rejected() {
        let mut regs = RegisterBank::new();
        let before = regs.read(PSR_TITLE_NUMBER);
        let mut vm = vm(vec![object(false, vec![mov(0x8000_0000 | PSR_TITLE_NUMBER, 3)])]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.read(PSR_TITLE_NUMBER), before);
        assert_eq!(vm.state(), VmState::Idle);
    }

    #[test]
    fn call_object_and_resume() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![
            object(
                false,
                vec![
                    encode(Opcode::CallObject, true, false, 1, 0),
                    mov(0, 2),
                ],
            ),
            object(false, vec![mov(1, 1), encode(Opcode::Resume, false, false, 0, 0)]),
        ]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.gpr(1).unwrap(), 1);
        assert_eq!(regs.gpr(0).unwrap(), 2);
        assert_eq!(drain(&mut vm), vec![HdmvEvent::End]);
    }

    #[test]
    fn jump_title_yields() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(
            false,
            vec![encode(Opcode::JumpTitle, true, false, 2, 0), mov(0, 1)],
        )]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        assert_eq!(drain(&mut vm), vec![HdmvEvent::Title(2)]);
        assert_eq!(vm.state(), VmState::Idle);
        assert_eq!(regs.gpr(0).unwrap(), 0);
    }

    #[test]
    fn button_page_from_button_program_ends_it() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(false, vec![encode(Opcode::PlayPl, true, false, 1, 0)])]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        drain(&mut vm);

        vm.run_button_program(&[
            encode(Opcode::ButtonPage, true, true, 0x8000_0002, 0x8000_0001),
            mov(0, 9),
        ]);
        vm.run(&mut regs).unwrap();
        assert_eq!(
            drain(&mut vm),
            vec![
                HdmvEvent::SetButtonPage {
                    page: Some(1),
                    button: Some(2),
                    skip_out_effect: false
                },
                HdmvEvent::IgEnd
            ]
        );
        assert_eq!(regs.gpr(0).unwrap(), 0);
        // the movie object is still waiting on playback
        assert_eq!(vm.state(), VmState::Suspended);
    }

    #[test]
    fn button_page_from_movie_object_sets_psrs() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(
            false,
            vec![encode(Opcode::ButtonPage, true, true, 0x8000_0003, 0x8000_0002)],
        )]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.read(PSR_MENU_PAGE_ID), 2);
        assert_eq!(regs.read(PSR_SELECTED_BUTTON_ID), 3);
    }

    #[test]
    fn menu_call_suspend_and_resume_restores_playback() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![
            object(true, vec![encode(Opcode::PlayPl, true, false, 5, 0), mov(0, 1)]),
            object(false, vec![encode(Opcode::Resume, false, false, 0, 0)]),
        ]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        drain(&mut vm);
        regs.write(PSR_PLAYLIST, 5).unwrap();

        assert!(vm.suspend_playback(&mut regs));
        regs.write(PSR_PLAYLIST, 99).unwrap();

        vm.start_object(1).unwrap();
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.read(PSR_PLAYLIST), 5);
        assert!(vm.is_waiting_for_playback());

        vm.playback_finished();
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.gpr(0).unwrap(), 1);
    }

    #[test]
    fn non_resumable_object_is_not_saved() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![object(false, vec![encode(Opcode::PlayPl, true, false, 5, 0)])]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        assert!(!vm.suspend_playback(&mut regs));
        assert!(!regs.has_saved_state());
    }

    #[test]
    fn navigation_timer_jumps_on_expiry() {
        let mut regs = RegisterBank::new();
        let mut vm = vm(vec![
            object(
                false,
                vec![
                    encode(Opcode::SetNvTimer, true, true, 1, 30),
                    encode(Opcode::PlayPl, true, false, 1, 0),
                ],
            ),
            object(false, vec![mov(7, 7)]),
        ]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        drain(&mut vm);
        assert_eq!(regs.read(PSR_NAV_TIMER), 30);

        vm.poll_nv_timer(Instant::now() + Duration::from_secs(31)).unwrap();
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.gpr(7).unwrap(), 7);
    }

    #[test]
    fn set_stream_selects_audio_and_subtitles() {
        let mut regs = RegisterBank::new();
        // audio 2, PG 3 with display flag
        let mut vm = vm(vec![object(
            false,
            vec![encode(Opcode::SetStream, true, true, 0x8002_0000 | 0x8000 | 0x4000 | 3, 0)],
        )]);
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        assert_eq!(regs.read(PSR_PRIMARY_AUDIO_ID), 2);
        let pg = regs.read(PSR_PG_STREAM);
        assert_eq!(pg & 0xfff, 3);
        assert_ne!(pg & 0x8000_0000, 0);
    }

    #[test]
    fn object_flags_feed_uo_mask() {
        let mut vm = HdmvVm::new(
            Arc::new(MovieObjects {
                version: "0200".into(),
                objects: vec![MovieObject {
                    resume_intention_flag: false,
                    menu_call_mask: true,
                    title_search_mask: false,
                    cmds: vec![encode(Opcode::PlayPl, true, false, 1, 0)],
                }],
            }),
            100,
        );
        let mut regs = RegisterBank::new();
        assert!(vm.uo_mask().is_empty());
        vm.start_object(0).unwrap();
        vm.run(&mut regs).unwrap();
        assert!(vm.uo_mask().menu_call());
    }
}
