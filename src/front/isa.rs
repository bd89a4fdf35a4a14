//! Static instruction-set tables.
//!
//! Mirrors the layout of `vm_bytes.h` in the original implementation: a
//! compile-time table mapping mnemonics to an instruction code, flags, and
//! the operand kinds each side accepts. Lookups are case-insensitive, as
//! required by §4.2; the tables themselves are immutable process-wide data
//! (never built, never mutated — just scanned).

use bitflags::bitflags;

bitflags! {
    /// Per-instruction flags, set NONE unless noted otherwise.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IFlags: u8 {
        const NONE  = 0b000;
        /// Accepts the `CALL A, B` extern-name long form (§4.4 step 3).
        const LONG  = 0b001;
        /// Accepts the `DIVE name` hatch-reference form (§4.4 step 3).
        const HATCH = 0b010;
    }
}

bitflags! {
    /// Operand-kind acceptance for one side (A or B) of an instruction.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OperandFlags: u8 {
        const NONE = 0b0000;
        const REG  = 0b0001;
        const IMM  = 0b0010;
        const ALL  = Self::REG.bits() | Self::IMM.bits();
        /// The operand may be omitted even though REG/IMM bits are set.
        const OPT  = 0b0100;
    }
}

/// The three-bit instruction groups of §4.2/§4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Group {
    Sys = 1,
    Mem = 2,
    Flow = 3,
    Arith = 4,
}

impl Group {
    pub fn from_bits(bits: u32) -> Option<Group> {
        match bits {
            1 => Some(Group::Sys),
            2 => Some(Group::Mem),
            3 => Some(Group::Flow),
            4 => Some(Group::Arith),
            _ => None,
        }
    }
}

/// One ISA table entry.
#[derive(Debug, Clone, Copy)]
pub struct InstrDesc {
    pub mnemonic: &'static str,
    /// 10-bit instruction code: `(group << 7) | offset`.
    pub icode: u32,
    pub group: Group,
    pub iflags: IFlags,
    pub aflags: OperandFlags,
    pub bflags: OperandFlags,
}

const fn icode(group: Group, offset: u32) -> u32 {
    ((group as u32) << 7) | offset
}

macro_rules! instr {
    ($mnemonic:literal, $group:expr, $offset:expr, $iflags:expr, $aflags:expr, $bflags:expr) => {
        InstrDesc {
            mnemonic: $mnemonic,
            icode: icode($group, $offset),
            group: $group,
            iflags: $iflags,
            aflags: $aflags,
            bflags: $bflags,
        }
    };
}

use Group::*;
use IFlags as F;
use OperandFlags as O;

/// The static instruction table. Order is insignificant; lookup is linear
/// scan with case-insensitive comparison, which is plenty fast for a table
/// this small and keeps the table itself trivially `const`-friendly.
pub static INSTRUCTIONS: &[InstrDesc] = &[
    // SYS
    instr!("HALT", Sys, 0x01, F::NONE, O::NONE, O::NONE),
    instr!("RST", Sys, 0x02, F::NONE, O::NONE, O::NONE),
    instr!("DMS", Sys, 0x03, F::NONE, O::NONE, O::NONE),
    instr!("DMR", Sys, 0x04, F::NONE, O::NONE, O::NONE),
    instr!("DMO", Sys, 0x05, F::NONE, O::ALL, O::NONE),
    // MEM
    instr!("PUSH", Mem, 0x01, F::NONE, O::ALL, O::NONE),
    instr!(
        "POP",
        Mem,
        0x02,
        F::NONE,
        O::from_bits_truncate(O::ALL.bits() | O::OPT.bits()),
        O::NONE
    ),
    instr!("DUP", Mem, 0x03, F::NONE, O::NONE, O::NONE),
    instr!("MOV", Mem, 0x04, F::NONE, O::ALL, O::ALL),
    instr!("LOAD", Mem, 0x05, F::NONE, O::NONE, O::NONE),
    instr!("STOR", Mem, 0x06, F::NONE, O::NONE, O::NONE),
    instr!(
        "CST",
        Mem,
        0x07,
        F::NONE,
        O::from_bits_truncate(O::ALL.bits() | O::OPT.bits()),
        O::from_bits_truncate(O::ALL.bits() | O::OPT.bits())
    ),
    // FLOW
    instr!("CALL", Flow, 0x01, F::LONG, O::ALL, O::from_bits_truncate(O::ALL.bits() | O::OPT.bits())),
    instr!("DIVE", Flow, 0x02, F::HATCH, O::ALL, O::NONE),
    instr!("RET", Flow, 0x03, F::NONE, O::NONE, O::NONE),
    instr!("JMP", Flow, 0x04, F::NONE, O::ALL, O::NONE),
    instr!("JZ", Flow, 0x05, F::NONE, O::ALL, O::NONE),
    instr!("JNZ", Flow, 0x06, F::NONE, O::ALL, O::NONE),
    instr!("JE", Flow, 0x07, F::NONE, O::ALL, O::NONE),
    instr!("JNE", Flow, 0x08, F::NONE, O::ALL, O::NONE),
    instr!("JL", Flow, 0x09, F::NONE, O::ALL, O::NONE),
    instr!("JLE", Flow, 0x0A, F::NONE, O::ALL, O::NONE),
    instr!("JG", Flow, 0x0B, F::NONE, O::ALL, O::NONE),
    instr!("JGE", Flow, 0x0C, F::NONE, O::ALL, O::NONE),
    // ARITH — operate purely on the stack, no operands of their own.
    instr!("UADD", Arith, 0x01, F::NONE, O::NONE, O::NONE),
    instr!("USUB", Arith, 0x02, F::NONE, O::NONE, O::NONE),
    instr!("UMUL", Arith, 0x03, F::NONE, O::NONE, O::NONE),
    instr!("UDIV", Arith, 0x04, F::NONE, O::NONE, O::NONE),
    instr!("UAND", Arith, 0x05, F::NONE, O::NONE, O::NONE),
    instr!("UOR", Arith, 0x06, F::NONE, O::NONE, O::NONE),
    instr!("UXOR", Arith, 0x07, F::NONE, O::NONE, O::NONE),
    instr!("UCMP", Arith, 0x08, F::NONE, O::NONE, O::NONE),
    instr!("IADD", Arith, 0x09, F::NONE, O::NONE, O::NONE),
    instr!("ISUB", Arith, 0x0A, F::NONE, O::NONE, O::NONE),
    instr!("IMUL", Arith, 0x0B, F::NONE, O::NONE, O::NONE),
    instr!("IDIV", Arith, 0x0C, F::NONE, O::NONE, O::NONE),
    instr!("ICMP", Arith, 0x0D, F::NONE, O::NONE, O::NONE),
    instr!("FADD", Arith, 0x0E, F::NONE, O::NONE, O::NONE),
    instr!("FSUB", Arith, 0x0F, F::NONE, O::NONE, O::NONE),
    instr!("FMUL", Arith, 0x10, F::NONE, O::NONE, O::NONE),
    instr!("FDIV", Arith, 0x11, F::NONE, O::NONE, O::NONE),
    instr!("FCMP", Arith, 0x12, F::NONE, O::NONE, O::NONE),
];

/// Look up a mnemonic, case-insensitively.
pub fn lookup(mnemonic: &str) -> Option<&'static InstrDesc> {
    INSTRUCTIONS
        .iter()
        .find(|d| d.mnemonic.eq_ignore_ascii_case(mnemonic))
}

/// Look up an instruction descriptor by its encoded 10-bit instruction code.
pub fn lookup_by_icode(icode: u32) -> Option<&'static InstrDesc> {
    INSTRUCTIONS.iter().find(|d| d.icode == icode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("push").unwrap().mnemonic, "PUSH");
        assert_eq!(lookup("Halt").unwrap().mnemonic, "HALT");
        assert!(lookup("nope").is_none());
    }

    #[test]
    fn icodes_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for d in INSTRUCTIONS {
            assert!(seen.insert(d.icode), "duplicate icode for {}", d.mnemonic);
        }
    }

    #[test]
    fn call_is_long_and_dive_is_hatch() {
        assert!(lookup("CALL").unwrap().iflags.contains(IFlags::LONG));
        assert!(lookup("DIVE").unwrap().iflags.contains(IFlags::HATCH));
    }
}
