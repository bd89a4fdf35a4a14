//! The virtual core: fetch/decode/execute loop over a linked image (§4.6).
//!
//! Register file, the unified stack+heap buffer, and the calling
//! convention live here. Dispatch is a flat match on the mnemonic string
//! looked up from the decoded icode via [`crate::front::isa::lookup_by_icode`]
//! — per §9's design note, this replaces the group/code double-switch of
//! the original with a single table-driven lookup, without needing a
//! function-pointer table or an exhaustive enum of every instruction.

use std::fmt;

use log::{debug, error, trace};
use thiserror::Error;

use crate::common::encoding::{self, OperandBits};
use crate::common::regs;
use crate::front::isa;

/// PSR condition bits (§4.6).
pub mod psr {
    pub const HALT: u32 = 1 << 0;
    pub const Z: u32 = 1 << 1;
    pub const N: u32 = 1 << 2;
}

/// A host-provided native callback, invoked by `DIVE`.
pub type HatchFn = Box<dyn FnMut(&mut Core)>;

pub struct Hatch {
    pub name: String,
    pub entry: HatchFn,
}

impl fmt::Debug for Hatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hatch").field("name", &self.name).finish()
    }
}

/// One linked code segment — the unit of linking granularity (§3).
#[derive(Debug, Clone, Default)]
pub struct Segment {
    pub code: Vec<u32>,
    pub entry: u32,
}

/// Destination for `DMS`/`DMR`/`DMO` dump instructions. Kept behind a trait
/// (rather than calling `println!` directly) so tests can capture the
/// dumped lines instead of writing to the process's real stdout.
pub trait DiagnosticSink {
    fn line(&mut self, text: &str);
}

#[derive(Debug, Default)]
pub struct StdoutSink;

impl DiagnosticSink for StdoutSink {
    fn line(&mut self, text: &str) {
        println!("{text}");
    }
}

#[derive(Debug, Default)]
pub struct VecSink(pub Vec<String>);

impl DiagnosticSink for VecSink {
    fn line(&mut self, text: &str) {
        self.0.push(text.to_string());
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("segment {segment}: pc {pc} out of bounds (segment has {size} words)")]
    PcOutOfBounds { segment: u32, pc: u32, size: u32 },
    #[error("stack overflow: sp would exceed stack_size {stack_size}")]
    StackOverflow { stack_size: u32 },
    #[error("stack underflow: sp would go below 0")]
    StackUnderflow,
    #[error("memory address {addr} out of bounds (buffer has {size} words)")]
    MemoryOutOfBounds { addr: u32, size: u32 },
    #[error("invalid segment id {segment}")]
    InvalidSegment { segment: u32 },
    #[error("invalid hatch id {hatch} (have {count} hatches)")]
    InvalidHatch { hatch: u32, count: u32 },
    #[error("invalid operand kind code {code}")]
    InvalidOperandCode { code: u32 },
    #[error("invalid instruction word {word:#010x}")]
    InvalidInstruction { word: u32 },
    #[error("division by zero")]
    DivisionByZero,
}

/// A resolved, writable operand location (§4.6 "Operand resolution").
#[derive(Debug, Clone, Copy)]
enum Loc {
    Reg(u32),
    /// A word in the *current* segment's code buffer — the target of a
    /// non-indirect `IMM` operand ("patches program memory", per spec).
    Code(u32),
    Mem(u32),
}

/// The virtual core image: registers, unified stack/heap, segments, hatches.
pub struct Core {
    pub registers: [u32; regs::COUNT],
    pub stack: Vec<u32>,
    pub stack_size: u32,
    pub heap_size: u32,
    pub segments: Vec<Segment>,
    pub hatches: Vec<Hatch>,
    pub base: u32,
    pub sink: Box<dyn DiagnosticSink>,
}

impl Core {
    pub fn new(stack_size: u32, heap_size: u32, segments: Vec<Segment>, hatches: Vec<Hatch>, base: u32) -> Self {
        let mut core = Core {
            registers: [0; regs::COUNT],
            stack: vec![0; (stack_size + heap_size) as usize],
            stack_size,
            heap_size,
            segments,
            hatches,
            base,
            sink: Box::new(StdoutSink),
        };
        core.reset();
        core
    }

    pub fn with_sink(mut self, sink: Box<dyn DiagnosticSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Reset registers per §4.6: `SEG <- base`, `PC <- segments[base].entry`,
    /// `SP <- 0`, `PSR <- 0`, `HB <- stack_size`.
    pub fn reset(&mut self) {
        self.registers = [0; regs::COUNT];
        self.registers[regs::SEG as usize] = self.base;
        self.registers[regs::PC as usize] = self.segments[self.base as usize].entry;
        self.registers[regs::SP as usize] = 0;
        self.registers[regs::PSR as usize] = 0;
        self.registers[regs::HB as usize] = self.stack_size;
    }

    pub fn halted(&self) -> bool {
        self.registers[regs::PSR as usize] & psr::HALT != 0
    }

    /// Run until `HALT` is set or `PC` runs off the end of the current
    /// segment (§4.6's main loop condition — the latter is a quiet, valid
    /// program end, not a trap).
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.halted() {
                return Ok(());
            }
            let seg = self.registers[regs::SEG as usize] as usize;
            let pc = self.registers[regs::PC as usize];
            let size = self.segments.get(seg).map(|s| s.code.len() as u32).unwrap_or(0);
            if pc >= size {
                return Ok(());
            }
            if let Err(e) = self.step() {
                error!("runtime trap in segment {seg} at pc {pc}: {e}");
                self.registers[regs::PSR as usize] |= psr::HALT;
                return Err(e);
            }
        }
    }

    /// Fetch, decode and execute exactly one instruction.
    pub fn step(&mut self) -> Result<(), RuntimeError> {
        let word = self.fetch_word()?;
        self.registers[regs::IR as usize] = word;
        let (icode, a_bits, b_bits) = encoding::decode(word);
        let desc = isa::lookup_by_icode(icode).ok_or(RuntimeError::InvalidInstruction { word })?;
        debug!(
            "seg={} pc={} {}",
            self.registers[regs::SEG as usize],
            self.registers[regs::PC as usize] - 1,
            desc.mnemonic
        );
        let a = self.resolve_operand(a_bits)?;
        let b = self.resolve_operand(b_bits)?;
        self.execute(desc.mnemonic, a, b)
    }

    fn fetch_word(&mut self) -> Result<u32, RuntimeError> {
        let seg = self.registers[regs::SEG as usize];
        let pc = self.registers[regs::PC as usize];
        let segment = self.segments.get(seg as usize).ok_or(RuntimeError::InvalidSegment { segment: seg })?;
        let w = *segment
            .code
            .get(pc as usize)
            .ok_or(RuntimeError::PcOutOfBounds { segment: seg, pc, size: segment.code.len() as u32 })?;
        self.registers[regs::PC as usize] = pc + 1;
        Ok(w)
    }

    fn resolve_operand(&mut self, bits: OperandBits) -> Result<Option<Loc>, RuntimeError> {
        match bits.kind {
            encoding::KIND_NONE => Ok(None),
            encoding::KIND_REG => {
                if bits.indirect {
                    let mut addr = self.registers[bits.value as usize];
                    if bits.offset {
                        let off = self.fetch_word()? as i32;
                        addr = (addr as i32).wrapping_add(off) as u32;
                    }
                    Ok(Some(Loc::Mem(addr)))
                } else {
                    Ok(Some(Loc::Reg(bits.value)))
                }
            }
            encoding::KIND_IMM => {
                let value_slot = self.registers[regs::PC as usize];
                let imm_value = self.fetch_word()?;
                if bits.indirect {
                    let mut addr = imm_value;
                    if bits.offset {
                        let off = self.fetch_word()? as i32;
                        addr = (addr as i32).wrapping_add(off) as u32;
                    }
                    Ok(Some(Loc::Mem(addr)))
                } else {
                    Ok(Some(Loc::Code(value_slot)))
                }
            }
            code => Err(RuntimeError::InvalidOperandCode { code }),
        }
    }

    fn read_loc(&self, loc: Loc) -> Result<u32, RuntimeError> {
        match loc {
            Loc::Reg(r) => Ok(self.registers[r as usize]),
            Loc::Code(off) => {
                let seg = self.registers[regs::SEG as usize];
                let segment = &self.segments[seg as usize];
                segment
                    .code
                    .get(off as usize)
                    .copied()
                    .ok_or(RuntimeError::PcOutOfBounds { segment: seg, pc: off, size: segment.code.len() as u32 })
            }
            Loc::Mem(a) => self.mem_read(a),
        }
    }

    fn write_loc(&mut self, loc: Loc, v: u32) -> Result<(), RuntimeError> {
        match loc {
            Loc::Reg(r) => {
                self.registers[r as usize] = v;
                Ok(())
            }
            Loc::Code(off) => {
                let seg = self.registers[regs::SEG as usize] as usize;
                let segment = &mut self.segments[seg];
                if off as usize >= segment.code.len() {
                    return Err(RuntimeError::PcOutOfBounds {
                        segment: seg as u32,
                        pc: off,
                        size: segment.code.len() as u32,
                    });
                }
                segment.code[off as usize] = v;
                Ok(())
            }
            Loc::Mem(a) => self.mem_write(a, v),
        }
    }

    fn mem_read(&self, addr: u32) -> Result<u32, RuntimeError> {
        let size = self.stack.len() as u32;
        self.stack.get(addr as usize).copied().ok_or(RuntimeError::MemoryOutOfBounds { addr, size })
    }

    fn mem_write(&mut self, addr: u32, v: u32) -> Result<(), RuntimeError> {
        let size = self.stack.len() as u32;
        if addr >= size {
            return Err(RuntimeError::MemoryOutOfBounds { addr, size });
        }
        self.stack[addr as usize] = v;
        Ok(())
    }

    fn push(&mut self, v: u32) -> Result<(), RuntimeError> {
        let sp = self.registers[regs::SP as usize];
        if sp >= self.stack_size {
            return Err(RuntimeError::StackOverflow { stack_size: self.stack_size });
        }
        self.stack[sp as usize] = v;
        self.registers[regs::SP as usize] = sp + 1;
        Ok(())
    }

    fn pop(&mut self) -> Result<u32, RuntimeError> {
        let sp = self.registers[regs::SP as usize];
        if sp == 0 {
            return Err(RuntimeError::StackUnderflow);
        }
        let sp = sp - 1;
        self.registers[regs::SP as usize] = sp;
        Ok(self.stack[sp as usize])
    }

    /// An operand the ISA table marks as required but the decoded word
    /// left absent — either a hand-assembled bad word or memory the
    /// program overwrote at runtime. Reported the same way as any other
    /// malformed instruction rather than panicking the host process.
    fn require(&self, loc: Option<Loc>) -> Result<Loc, RuntimeError> {
        loc.ok_or(RuntimeError::InvalidInstruction { word: self.registers[regs::IR as usize] })
    }

    fn execute(&mut self, mnemonic: &str, a: Option<Loc>, b: Option<Loc>) -> Result<(), RuntimeError> {
        match mnemonic {
            "HALT" => {
                self.registers[regs::PSR as usize] |= psr::HALT;
                Ok(())
            }
            "RST" => {
                self.reset();
                Ok(())
            }
            "DMS" => {
                self.dump_stack();
                Ok(())
            }
            "DMR" => {
                self.dump_registers();
                Ok(())
            }
            "DMO" => self.dump_operand(a),

            "PUSH" => {
                let v = self.read_loc(self.require(a)?)?;
                self.push(v)
            }
            "POP" => {
                let v = self.pop()?;
                if let Some(loc) = a {
                    self.write_loc(loc, v)?;
                }
                Ok(())
            }
            "DUP" => {
                let sp = self.registers[regs::SP as usize];
                if sp == 0 {
                    return Err(RuntimeError::StackUnderflow);
                }
                let v = self.stack[(sp - 1) as usize];
                self.push(v)
            }
            "MOV" => {
                let v = self.read_loc(self.require(b)?)?;
                self.write_loc(self.require(a)?, v)
            }
            "LOAD" => {
                let addr = self.pop()?;
                let v = self.mem_read(addr)?;
                self.push(v)
            }
            "STOR" => {
                let addr = self.pop()?;
                let value = self.pop()?;
                self.mem_write(addr, value)
            }
            "CST" => {
                let addr = match a {
                    Some(loc) => self.read_loc(loc)?,
                    None => self.pop()?,
                };
                let seg = match b {
                    Some(loc) => self.read_loc(loc)?,
                    None => self.registers[regs::SEG as usize],
                };
                let segment = self.segments.get(seg as usize).ok_or(RuntimeError::InvalidSegment { segment: seg })?;
                let v = *segment
                    .code
                    .get(addr as usize)
                    .ok_or(RuntimeError::MemoryOutOfBounds { addr, size: segment.code.len() as u32 })?;
                self.push(v)
            }

            "CALL" => {
                let (target_seg, target_pc) = match b {
                    Some(b_loc) => (self.read_loc(self.require(a)?)?, self.read_loc(b_loc)?),
                    None => (self.registers[regs::SEG as usize], self.read_loc(self.require(a)?)?),
                };
                self.do_call(target_seg, target_pc)
            }
            "DIVE" => {
                let id = self.read_loc(self.require(a)?)?;
                if id as usize >= self.hatches.len() {
                    return Err(RuntimeError::InvalidHatch { hatch: id, count: self.hatches.len() as u32 });
                }
                let mut entry = std::mem::replace(&mut self.hatches[id as usize].entry, Box::new(|_: &mut Core| {}));
                entry(self);
                self.hatches[id as usize].entry = entry;
                Ok(())
            }
            "RET" => self.do_ret(),
            "JMP" | "JZ" | "JNZ" | "JE" | "JNE" | "JL" | "JLE" | "JG" | "JGE" => self.do_jump(mnemonic, a),

            "UADD" | "USUB" | "UMUL" | "UDIV" | "UAND" | "UOR" | "UXOR" | "UCMP" => self.exec_arith_u(mnemonic),
            "IADD" | "ISUB" | "IMUL" | "IDIV" | "ICMP" => self.exec_arith_i(mnemonic),
            "FADD" | "FSUB" | "FMUL" | "FDIV" | "FCMP" => self.exec_arith_f(mnemonic),

            other => {
                trace!("unhandled mnemonic {other}");
                Err(RuntimeError::InvalidInstruction { word: self.registers[regs::IR as usize] })
            }
        }
    }

    fn do_call(&mut self, target_seg: u32, target_pc: u32) -> Result<(), RuntimeError> {
        if target_seg as usize >= self.segments.len() {
            return Err(RuntimeError::InvalidSegment { segment: target_seg });
        }
        let ab_new = self.registers[regs::SP as usize].wrapping_sub(1);
        for r in 0..10 {
            let v = self.registers[r];
            self.push(v)?;
        }
        self.push(self.registers[regs::AB as usize])?;
        self.push(self.registers[regs::PSR as usize])?;
        self.push(self.registers[regs::PC as usize])?;
        self.push(self.registers[regs::SEG as usize])?;
        self.registers[regs::AB as usize] = ab_new;
        self.registers[regs::SEG as usize] = target_seg;
        self.registers[regs::PC as usize] = target_pc;
        Ok(())
    }

    fn do_ret(&mut self) -> Result<(), RuntimeError> {
        let seg = self.pop()?;
        let pc = self.pop()?;
        let psr = self.pop()?;
        let ab = self.pop()?;
        let mut regs_buf = [0u32; 10];
        for r in (0..10).rev() {
            regs_buf[r] = self.pop()?;
        }
        self.registers[0..10].copy_from_slice(&regs_buf);
        self.registers[regs::AB as usize] = ab;
        self.registers[regs::PSR as usize] = psr;
        self.registers[regs::PC as usize] = pc;
        self.registers[regs::SEG as usize] = seg;
        Ok(())
    }

    fn do_jump(&mut self, mnemonic: &str, a: Option<Loc>) -> Result<(), RuntimeError> {
        let psr = self.registers[regs::PSR as usize];
        let z = psr & psr::Z != 0;
        let n = psr & psr::N != 0;
        let take = match mnemonic {
            "JMP" => true,
            "JZ" | "JE" => z,
            "JNZ" | "JNE" => !z,
            "JL" => n,
            "JLE" => n || z,
            "JG" => !n && !z,
            "JGE" => !n,
            _ => unreachable!("do_jump called with non-jump mnemonic {mnemonic}"),
        };
        if take {
            let target = self.read_loc(self.require(a)?)?;
            self.registers[regs::PC as usize] = target;
        }
        self.registers[regs::PSR as usize] &= !(psr::Z | psr::N);
        Ok(())
    }

    fn set_cmp_flags(&mut self, less: bool, equal: bool) {
        let mut p = self.registers[regs::PSR as usize];
        p &= !(psr::Z | psr::N);
        if equal {
            p |= psr::Z;
        }
        if less {
            p |= psr::N;
        }
        self.registers[regs::PSR as usize] = p;
    }

    fn exec_arith_u(&mut self, mnemonic: &str) -> Result<(), RuntimeError> {
        let rhs = self.pop()?;
        let lhs = self.pop()?;
        match mnemonic {
            "UADD" => self.push(lhs.wrapping_add(rhs)),
            "USUB" => self.push(lhs.wrapping_sub(rhs)),
            "UMUL" => self.push(lhs.wrapping_mul(rhs)),
            "UDIV" => {
                if rhs == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                self.push(lhs / rhs)
            }
            "UAND" => self.push(lhs & rhs),
            "UOR" => self.push(lhs | rhs),
            "UXOR" => self.push(lhs ^ rhs),
            "UCMP" => {
                self.set_cmp_flags(lhs < rhs, lhs == rhs);
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn exec_arith_i(&mut self, mnemonic: &str) -> Result<(), RuntimeError> {
        let rhs = self.pop()? as i32;
        let lhs = self.pop()? as i32;
        match mnemonic {
            "IADD" => self.push(lhs.wrapping_add(rhs) as u32),
            "ISUB" => self.push(lhs.wrapping_sub(rhs) as u32),
            "IMUL" => self.push(lhs.wrapping_mul(rhs) as u32),
            "IDIV" => {
                if rhs == 0 {
                    return Err(RuntimeError::DivisionByZero);
                }
                self.push(lhs.wrapping_div(rhs) as u32)
            }
            "ICMP" => {
                self.set_cmp_flags(lhs < rhs, lhs == rhs);
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn exec_arith_f(&mut self, mnemonic: &str) -> Result<(), RuntimeError> {
        let rhs = f32::from_bits(self.pop()?);
        let lhs = f32::from_bits(self.pop()?);
        match mnemonic {
            "FADD" => self.push((lhs + rhs).to_bits()),
            "FSUB" => self.push((lhs - rhs).to_bits()),
            "FMUL" => self.push((lhs * rhs).to_bits()),
            "FDIV" => self.push((lhs / rhs).to_bits()),
            "FCMP" => {
                self.set_cmp_flags(lhs < rhs, lhs == rhs);
                Ok(())
            }
            _ => unreachable!(),
        }
    }

    fn dump_stack(&mut self) {
        let sp = self.registers[regs::SP as usize];
        for i in 0..sp {
            let line = format!("[{i}] = {}", self.stack[i as usize]);
            self.sink.line(&line);
        }
    }

    fn dump_registers(&mut self) {
        for (i, name) in regs::NAMES.iter().enumerate() {
            let line = format!("{name} = {}", self.registers[i]);
            self.sink.line(&line);
        }
    }

    fn dump_operand(&mut self, a: Option<Loc>) -> Result<(), RuntimeError> {
        if let Some(loc) = a {
            let v = self.read_loc(loc)?;
            let line = format!("{v}");
            self.sink.line(&line);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::encoding::{encode, OperandBits};

    fn single_segment(words: Vec<u32>) -> Core {
        Core::new(16, 16, vec![Segment { code: words, entry: 0 }], vec![], 0)
    }

    fn mnemonic_icode(name: &str) -> u32 {
        isa::lookup(name).unwrap().icode
    }

    #[test]
    fn halt_sets_psr() {
        let w = encode(mnemonic_icode("HALT"), OperandBits::NONE, OperandBits::NONE);
        let mut core = single_segment(vec![w]);
        core.run().unwrap();
        assert!(core.halted());
    }

    #[test]
    fn push_immediate_then_pop_register() {
        let push = encode(mnemonic_icode("PUSH"), OperandBits::imm(false, false), OperandBits::NONE);
        let pop = encode(mnemonic_icode("POP"), OperandBits::reg(regs::R0, false, false), OperandBits::NONE);
        let halt = encode(mnemonic_icode("HALT"), OperandBits::NONE, OperandBits::NONE);
        let mut core = single_segment(vec![push, 42, pop, halt]);
        core.run().unwrap();
        assert_eq!(core.registers[regs::R0 as usize], 42);
        assert_eq!(core.registers[regs::SP as usize], 0);
    }

    #[test]
    fn uadd_pops_both_pushes_sum() {
        let push1 = encode(mnemonic_icode("PUSH"), OperandBits::imm(false, false), OperandBits::NONE);
        let push2 = encode(mnemonic_icode("PUSH"), OperandBits::imm(false, false), OperandBits::NONE);
        let add = encode(mnemonic_icode("UADD"), OperandBits::NONE, OperandBits::NONE);
        let pop = encode(mnemonic_icode("POP"), OperandBits::reg(regs::R0, false, false), OperandBits::NONE);
        let halt = encode(mnemonic_icode("HALT"), OperandBits::NONE, OperandBits::NONE);
        let mut core = single_segment(vec![push1, 2, push2, 3, add, pop, halt]);
        core.run().unwrap();
        assert_eq!(core.registers[regs::R0 as usize], 5);
    }

    #[test]
    fn idiv_by_zero_traps() {
        let push1 = encode(mnemonic_icode("PUSH"), OperandBits::imm(false, false), OperandBits::NONE);
        let push2 = encode(mnemonic_icode("PUSH"), OperandBits::imm(false, false), OperandBits::NONE);
        let div = encode(mnemonic_icode("IDIV"), OperandBits::NONE, OperandBits::NONE);
        let mut core = single_segment(vec![push1, 7, push2, 0, div]);
        let err = core.run().unwrap_err();
        assert!(matches!(err, RuntimeError::DivisionByZero));
        assert!(core.halted());
    }

    #[test]
    fn dive_invokes_hatch_and_reads_argument() {
        let push = encode(mnemonic_icode("PUSH"), OperandBits::imm(false, false), OperandBits::NONE);
        let dive = encode(mnemonic_icode("DIVE"), OperandBits::imm(false, false), OperandBits::NONE);
        let halt = encode(mnemonic_icode("HALT"), OperandBits::NONE, OperandBits::NONE);
        let mut core = single_segment(vec![push, (-7i32) as u32, dive, 0, halt]);
        let seen = std::rc::Rc::new(std::cell::RefCell::new(0i32));
        let seen2 = seen.clone();
        core.hatches.push(Hatch {
            name: "puti".into(),
            entry: Box::new(move |c: &mut Core| {
                let v = c.pop().unwrap() as i32;
                *seen2.borrow_mut() = v;
            }),
        });
        core.run().unwrap();
        assert_eq!(*seen.borrow(), -7);
    }

    #[test]
    fn call_then_ret_restores_frame_and_ab_addresses_argument() {
        // Caller pushes one arg, calls callee which reads [AB-0] into RV, returns.
        let push_arg = encode(mnemonic_icode("PUSH"), OperandBits::imm(false, false), OperandBits::NONE);
        let call = encode(mnemonic_icode("CALL"), OperandBits::imm(false, false), OperandBits::NONE);
        let halt = encode(mnemonic_icode("HALT"), OperandBits::NONE, OperandBits::NONE);
        // callee: mov %rv, [%ab+-0]; ret
        let mov = encode(
            mnemonic_icode("MOV"),
            OperandBits::reg(regs::RV, false, false),
            OperandBits::reg(regs::AB, true, true),
        );
        let ret = encode(mnemonic_icode("RET"), OperandBits::NONE, OperandBits::NONE);
        let callee_pc = 6u32; // where `mov` lands, computed below
        let code = vec![
            push_arg, 99, // 0,1
            call, callee_pc, // 2,3
            halt, // 4
            0,    // 5: padding so callee_pc lines up (unused)
            mov, 0, // 6,7: mov %rv, [%ab + -0]
            ret, // 8
        ];
        let mut core = single_segment(code);
        core.run().unwrap();
        assert_eq!(core.registers[regs::RV as usize], 99);
        // After RET, SP should be back to 1 (the pushed arg is still on the
        // caller's stack — popping args after RET is the caller's job).
        assert_eq!(core.registers[regs::SP as usize], 1);
    }
}
