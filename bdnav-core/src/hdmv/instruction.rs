// HDMV instruction decoding and disassembly
//
// Opcode word, MSB first:
//   op_cnt:3 grp:2 sub_grp:3 imm_op1:1 imm_op2:1 reserved:2 branch_opt:4
//   reserved:4 cmp_opt:4 reserved:3 set_opt:5
// followed by the destination and source operands (32 bits each).

use std::fmt;

use crate::bdparse::mobj::NavCommand;

use super::VmError;

const GROUP_BRANCH: u8 = 0;
const GROUP_CMP: u8 = 1;
const GROUP_SET: u8 = 2;

const BRANCH_GOTO: u8 = 0;
const BRANCH_JUMP: u8 = 1;
const BRANCH_PLAY: u8 = 2;

const SET_SET: u8 = 0;
const SET_SETSYSTEM: u8 = 1;

/// Operand register flag: PSR when set, GPR otherwise
const PSR_FLAG: u32 = 0x8000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    /// Bit test
    Bc,
    Eq,
    Ne,
    Ge,
    Gt,
    Le,
    Lt,
}

impl CmpOp {
    pub fn eval(self, a: u32, b: u32) -> bool {
        match self {
            CmpOp::Bc => a & b != 0,
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Ge => a >= b,
            CmpOp::Gt => a > b,
            CmpOp::Le => a <= b,
            CmpOp::Lt => a < b,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            CmpOp::Bc => "BC",
            CmpOp::Eq => "EQ",
            CmpOp::Ne => "NE",
            CmpOp::Ge => "GE",
            CmpOp::Gt => "GT",
            CmpOp::Le => "LE",
            CmpOp::Lt => "LT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Move,
    Swap,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Rnd,
    And,
    Or,
    Xor,
    BitSet,
    BitClr,
    Shl,
    Shr,
}

impl SetOp {
    fn mnemonic(self) -> &'static str {
        match self {
            SetOp::Move => "MOVE",
            SetOp::Swap => "SWAP",
            SetOp::Add => "ADD",
            SetOp::Sub => "SUB",
            SetOp::Mul => "MUL",
            SetOp::Div => "DIV",
            SetOp::Mod => "MOD",
            SetOp::Rnd => "RND",
            SetOp::And => "AND",
            SetOp::Or => "OR",
            SetOp::Xor => "XOR",
            SetOp::BitSet => "BITSET",
            SetOp::BitClr => "BITCLR",
            SetOp::Shl => "SHL",
            SetOp::Shr => "SHR",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Nop,
    Goto,
    Break,
    JumpObject,
    JumpTitle,
    CallObject,
    CallTitle,
    Resume,
    PlayPl,
    PlayPlPi,
    PlayPlPm,
    TerminatePl,
    LinkPi,
    LinkMk,
    Cmp(CmpOp),
    Set(SetOp),
    SetStream,
    SetNvTimer,
    ButtonPage,
    EnableButton,
    DisableButton,
    SetSecStream,
    PopupOff,
    StillOn,
    StillOff,
    SetOutputMode,
}

impl Opcode {
    fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Goto => "GOTO",
            Opcode::Break => "BREAK",
            Opcode::JumpObject => "JUMP_OBJECT",
            Opcode::JumpTitle => "JUMP_TITLE",
            Opcode::CallObject => "CALL_OBJECT",
            Opcode::CallTitle => "CALL_TITLE",
            Opcode::Resume => "RESUME",
            Opcode::PlayPl => "PLAY_PL",
            Opcode::PlayPlPi => "PLAY_PL_PI",
            Opcode::PlayPlPm => "PLAY_PL_PM",
            Opcode::TerminatePl => "TERMINATE_PL",
            Opcode::LinkPi => "LINK_PI",
            Opcode::LinkMk => "LINK_MK",
            Opcode::Cmp(op) => op.mnemonic(),
            Opcode::Set(op) => op.mnemonic(),
            Opcode::SetStream => "SET_STREAM",
            Opcode::SetNvTimer => "SET_NV_TIMER",
            Opcode::ButtonPage => "SET_BUTTON_PAGE",
            Opcode::EnableButton => "ENABLE_BUTTON",
            Opcode::DisableButton => "DISABLE_BUTTON",
            Opcode::SetSecStream => "SET_SEC_STREAM",
            Opcode::PopupOff => "POPUP_OFF",
            Opcode::StillOn => "STILL_ON",
            Opcode::StillOff => "STILL_OFF",
            Opcode::SetOutputMode => "SET_OUTPUT_MODE",
        }
    }
}

/// Operand as addressed by the instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Imm(u32),
    Psr(u32),
    Gpr(u32),
}

impl Operand {
    fn decode(raw: u32, immediate: bool) -> Self {
        if immediate {
            Operand::Imm(raw)
        } else if raw & PSR_FLAG != 0 {
            Operand::Psr(raw & !PSR_FLAG)
        } else {
            Operand::Gpr(raw)
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Imm(v) if *v > 9 => write!(f, "0x{:x}", v),
            Operand::Imm(v) => write!(f, "{}", v),
            Operand::Psr(n) => write!(f, "PSR{}", n),
            Operand::Gpr(n) => write!(f, "r{}", n),
        }
    }
}

/// Decoded navigation command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub op_cnt: u8,
    pub imm_op1: bool,
    pub imm_op2: bool,
    /// Raw operand words; set-system instructions pack bit fields in them
    pub dst: u32,
    pub src: u32,
}

impl Instruction {
    pub fn decode(cmd: NavCommand) -> Result<Self, VmError> {
        let w = cmd.insn;
        let op_cnt = (w >> 29) as u8 & 0x07;
        let grp = (w >> 27) as u8 & 0x03;
        let sub_grp = (w >> 24) as u8 & 0x07;
        let imm_op1 = w & 0x0080_0000 != 0;
        let imm_op2 = w & 0x0040_0000 != 0;
        let branch_opt = (w >> 16) as u8 & 0x0F;
        let cmp_opt = (w >> 8) as u8 & 0x0F;
        let set_opt = w as u8 & 0x1F;

        let unknown = || VmError::UnknownOpcode { insn: w };

        let opcode = match (grp, sub_grp) {
            (GROUP_BRANCH, BRANCH_GOTO) => match branch_opt {
                0 => Opcode::Nop,
                1 => Opcode::Goto,
                2 => Opcode::Break,
                _ => return Err(unknown()),
            },
            (GROUP_BRANCH, BRANCH_JUMP) => match branch_opt {
                0 => Opcode::JumpObject,
                1 => Opcode::JumpTitle,
                2 => Opcode::CallObject,
                3 => Opcode::CallTitle,
                4 => Opcode::Resume,
                _ => return Err(unknown()),
            },
            (GROUP_BRANCH, BRANCH_PLAY) => match branch_opt {
                0 => Opcode::PlayPl,
                1 => Opcode::PlayPlPi,
                2 => Opcode::PlayPlPm,
                3 => Opcode::TerminatePl,
                4 => Opcode::LinkPi,
                5 => Opcode::LinkMk,
                _ => return Err(unknown()),
            },
            (GROUP_CMP, _) => Opcode::Cmp(match cmp_opt {
                1 => CmpOp::Bc,
                2 => CmpOp::Eq,
                3 => CmpOp::Ne,
                4 => CmpOp::Ge,
                5 => CmpOp::Gt,
                6 => CmpOp::Le,
                7 => CmpOp::Lt,
                _ => return Err(unknown()),
            }),
            (GROUP_SET, SET_SET) => Opcode::Set(match set_opt {
                1 => SetOp::Move,
                2 => SetOp::Swap,
                3 => SetOp::Add,
                4 => SetOp::Sub,
                5 => SetOp::Mul,
                6 => SetOp::Div,
                7 => SetOp::Mod,
                8 => SetOp::Rnd,
                9 => SetOp::And,
                0x0a => SetOp::Or,
                0x0b => SetOp::Xor,
                0x0c => SetOp::BitSet,
                0x0d => SetOp::BitClr,
                0x0e => SetOp::Shl,
                0x0f => SetOp::Shr,
                _ => return Err(unknown()),
            }),
            (GROUP_SET, SET_SETSYSTEM) => match set_opt {
                1 => Opcode::SetStream,
                2 => Opcode::SetNvTimer,
                3 => Opcode::ButtonPage,
                4 => Opcode::EnableButton,
                5 => Opcode::DisableButton,
                6 => Opcode::SetSecStream,
                7 => Opcode::PopupOff,
                8 => Opcode::StillOn,
                9 => Opcode::StillOff,
                0x0a => Opcode::SetOutputMode,
                _ => return Err(unknown()),
            },
            _ => return Err(unknown()),
        };

        Ok(Self {
            opcode,
            op_cnt,
            imm_op1,
            imm_op2,
            dst: cmd.dst,
            src: cmd.src,
        })
    }

    pub fn dst_operand(&self) -> Operand {
        Operand::decode(self.dst, self.imm_op1)
    }

    pub fn src_operand(&self) -> Operand {
        Operand::decode(self.src, self.imm_op2)
    }
}

/// Encode a command word. Used by fixtures and the disassembler tests.
pub fn encode(opcode: Opcode, imm_op1: bool, imm_op2: bool, dst: u32, src: u32) -> NavCommand {
    let (op_cnt, grp, sub_grp, branch_opt, cmp_opt, set_opt): (u32, u32, u32, u32, u32, u32) =
        match opcode {
            Opcode::Nop => (0, 0, 0, 0, 0, 0),
            Opcode::Goto => (1, 0, 0, 1, 0, 0),
            Opcode::Break => (0, 0, 0, 2, 0, 0),
            Opcode::JumpObject => (1, 0, 1, 0, 0, 0),
            Opcode::JumpTitle => (1, 0, 1, 1, 0, 0),
            Opcode::CallObject => (1, 0, 1, 2, 0, 0),
            Opcode::CallTitle => (1, 0, 1, 3, 0, 0),
            Opcode::Resume => (0, 0, 1, 4, 0, 0),
            Opcode::PlayPl => (1, 0, 2, 0, 0, 0),
            Opcode::PlayPlPi => (2, 0, 2, 1, 0, 0),
            Opcode::PlayPlPm => (2, 0, 2, 2, 0, 0),
            Opcode::TerminatePl => (0, 0, 2, 3, 0, 0),
            Opcode::LinkPi => (1, 0, 2, 4, 0, 0),
            Opcode::LinkMk => (1, 0, 2, 5, 0, 0),
            Opcode::Cmp(op) => (2, 1, 0, 0, op as u32 + 1, 0),
            Opcode::Set(op) => (2, 2, 0, 0, 0, op as u32 + 1),
            Opcode::SetStream => (2, 2, 1, 0, 0, 1),
            Opcode::SetNvTimer => (2, 2, 1, 0, 0, 2),
            Opcode::ButtonPage => (2, 2, 1, 0, 0, 3),
            Opcode::EnableButton => (1, 2, 1, 0, 0, 4),
            Opcode::DisableButton => (1, 2, 1, 0, 0, 5),
            Opcode::SetSecStream => (2, 2, 1, 0, 0, 6),
            Opcode::PopupOff => (0, 2, 1, 0, 0, 7),
            Opcode::StillOn => (0, 2, 1, 0, 0, 8),
            Opcode::StillOff => (0, 2, 1, 0, 0, 9),
            Opcode::SetOutputMode => (1, 2, 1, 0, 0, 0x0a),
        };
    let insn = op_cnt << 29
        | grp << 27
        | sub_grp << 24
        | (imm_op1 as u32) << 23
        | (imm_op2 as u32) << 22
        | branch_opt << 16
        | cmp_opt << 8
        | set_opt;
    NavCommand::new(insn, dst, src)
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode.mnemonic();
        match self.opcode {
            Opcode::Nop
            | Opcode::Break
            | Opcode::Resume
            | Opcode::TerminatePl
            | Opcode::PopupOff
            | Opcode::StillOn
            | Opcode::StillOff => write!(f, "{}", name),
            Opcode::SetStream | Opcode::SetSecStream | Opcode::ButtonPage => {
                write!(f, "{:<16} 0x{:08x}, 0x{:08x}", name, self.dst, self.src)
            }
            _ => match self.op_cnt {
                0 => write!(f, "{}", name),
                1 => write!(f, "{:<16} {}", name, self.dst_operand()),
                _ => write!(
                    f,
                    "{:<16} {}, {}",
                    name,
                    self.dst_operand(),
                    self.src_operand()
                ),
            },
        }
    }
}

/// One line per command: `index: raw words  mnemonic operands`
pub fn disassemble(cmds: &[NavCommand]) -> Vec<String> {
    cmds.iter()
        .enumerate()
        .map(|(i, cmd)| {
            let text = match Instruction::decode(*cmd) {
                Ok(insn) => insn.to_string(),
                Err(_) => "<unknown>".to_string(),
            };
            format!(
                "{:4}: {:08x} {:08x} {:08x}  {}",
                i, cmd.insn, cmd.dst, cmd.src, text
            )
        })
        .collect()
}
