//! The two-pass assembler (§4.4).
//!
//! A single pass over the token stream builds the code buffer while
//! threading a pending-label table; unresolved references are fixed up the
//! moment their label is bound, and anything still pending when the token
//! stream runs dry is a fatal [`ParseError`].

use std::collections::BTreeSet;

use thiserror::Error;

use crate::common::encoding::{self, OperandBits, KIND_IMM, KIND_REG};
use crate::common::module::{HatchReference, Module, Relocation, Symbol};
use crate::common::regs;
use crate::front::ast::{Label, PendingLabel, Slot};
use crate::front::isa::{self, IFlags, OperandFlags};
use crate::front::lex::{LexError, Lexer, Pos, Token, TokenKind};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error("{pos}: unexpected {found}, expected {expected}")]
    UnexpectedToken { pos: Pos, found: String, expected: &'static str },
    #[error("{pos}: unknown directive .{name}")]
    UnknownDirective { pos: Pos, name: String },
    #[error("{pos}: unknown mnemonic {name}")]
    UnknownMnemonic { pos: Pos, name: String },
    #[error("{pos}: operand kind not allowed here")]
    OperandNotAllowed { pos: Pos },
    #[error("{pos}: missing required operand")]
    MissingOperand { pos: Pos },
    #[error("{pos}: duplicate label {name:?}")]
    DuplicateLabel { pos: Pos, name: String },
    #[error("{pos}: {name:?} is already exported")]
    DuplicateGlobal { pos: Pos, name: String },
    #[error("{pos}: {name:?} is already declared extern")]
    DuplicateExtern { pos: Pos, name: String },
    #[error("{pos}: {name:?} was declared global, cannot also be extern")]
    ExternAfterGlobal { pos: Pos, name: String },
    #[error("{pos}: {name:?} was declared extern, cannot also be global")]
    GlobalAfterExtern { pos: Pos, name: String },
    #[error("{pos}: offset is only allowed inside [...]")]
    OffsetOutsideBrackets { pos: Pos },
    #[error("{pos}: unknown register {name:?}")]
    UnknownRegister { pos: Pos, name: String },
    #[error("{pos}: malformed numeric literal {text:?}")]
    BadNumber { pos: Pos, text: String },
    #[error("{pos}: malformed string escape in {text:?}")]
    BadEscape { pos: Pos, text: String },
    #[error("{pos}: numeric literal {text:?} overflows a 32-bit word")]
    NumberOverflow { pos: Pos, text: String },
    #[error("{pos}: module already has an .entry")]
    DuplicateEntry { pos: Pos },
    #[error("label {name:?} is referenced but never defined")]
    UnresolvedLabel { name: String },
}

/// Assemble one source file into a [`Module`].
pub fn assemble(input: &str) -> Result<Module, ParseError> {
    let mut a = Assembler {
        lexer: Lexer::new(input),
        module: Module::default(),
        labels: crate::common::Map::new(),
        pending: crate::common::Map::new(),
        pending_exports: BTreeSet::new(),
        externs: BTreeSet::new(),
    };
    a.run()?;
    Ok(a.module)
}

struct Assembler<'src> {
    lexer: Lexer<'src>,
    module: Module,
    labels: crate::common::Map<String, Label>,
    pending: crate::common::Map<String, PendingLabel>,
    pending_exports: BTreeSet<String>,
    externs: BTreeSet<String>,
}

impl<'src> Assembler<'src> {
    fn run(&mut self) -> Result<(), ParseError> {
        loop {
            self.skip_newlines()?;
            match self.lexer.peek_type()? {
                TokenKind::Eof => break,
                TokenKind::Directive => self.parse_directive()?,
                TokenKind::Label => self.parse_label()?,
                _ => self.parse_instruction()?,
            }
        }
        self.check_unresolved()
    }

    fn skip_newlines(&mut self) -> Result<(), ParseError> {
        while self.lexer.peek_type()? == TokenKind::Newline {
            self.lexer.get()?;
        }
        Ok(())
    }

    fn expect(&mut self, kind: TokenKind, what: &'static str) -> Result<Token, ParseError> {
        let t = self.lexer.get()?;
        if t.kind != kind {
            return Err(ParseError::UnexpectedToken {
                pos: t.pos,
                found: format!("{} {:?}", t.kind, t.text),
                expected: what,
            });
        }
        Ok(t)
    }

    fn expect_newline(&mut self) -> Result<(), ParseError> {
        match self.lexer.peek_type()? {
            TokenKind::Newline => {
                self.lexer.get()?;
                Ok(())
            }
            TokenKind::Eof => Ok(()),
            _ => {
                let t = self.lexer.peek()?.clone();
                Err(ParseError::UnexpectedToken {
                    pos: t.pos,
                    found: format!("{} {:?}", t.kind, t.text),
                    expected: "newline",
                })
            }
        }
    }

    fn check_unresolved(&self) -> Result<(), ParseError> {
        if let Some(name) = self.pending.keys().next() {
            return Err(ParseError::UnresolvedLabel { name: name.clone() });
        }
        if let Some(name) = self.pending_exports.iter().next() {
            return Err(ParseError::UnresolvedLabel { name: name.clone() });
        }
        Ok(())
    }

    /// Bind `name` to `location`, resolving any fix-ups pending on it.
    fn bind_label(&mut self, name: &str, location: u32, pos: Pos) -> Result<(), ParseError> {
        if self.labels.contains_key(name) {
            return Err(ParseError::DuplicateLabel { pos, name: name.to_string() });
        }
        self.labels.insert(name.to_string(), Label { location });
        if let Some(p) = self.pending.remove(name) {
            for slot in p.pointers {
                match slot {
                    Slot::EntryField => self.module.entry = location,
                    Slot::InBuffer(i) => self.module.segment[i as usize] = location,
                }
            }
            for loc_slot in p.locations {
                self.module.segment[loc_slot as usize] = location;
            }
        }
        if self.pending_exports.remove(name) {
            if let Some(sym) = self.module.find_symbol_mut(name) {
                sym.location = location;
            }
        }
        Ok(())
    }

    /// Resolve `name` to `location` now if already bound, else defer.
    fn add_location_fixup(&mut self, name: &str, loc_slot: u32) {
        if let Some(lbl) = self.labels.get(name) {
            self.module.segment[loc_slot as usize] = lbl.location;
        } else {
            self.pending.entry(name.to_string()).or_default().locations.push(loc_slot);
        }
    }

    fn add_relocation(&mut self, name: &str, seg_slot: u32, loc_slot: u32) {
        if let Some(r) = self.module.find_relocation_mut(name) {
            r.slots.push((seg_slot, loc_slot));
        } else {
            self.module.relocations.push(Relocation { name: name.to_string(), slots: vec![(seg_slot, loc_slot)] });
        }
    }

    fn add_hatch_reference(&mut self, name: &str, loc_slot: u32) {
        if let Some(h) = self.module.find_hatch_reference_mut(name) {
            h.locations.push(loc_slot);
        } else {
            self.module.hatch_references.push(HatchReference { name: name.to_string(), locations: vec![loc_slot] });
        }
    }

    fn parse_label(&mut self) -> Result<(), ParseError> {
        let t = self.expect(TokenKind::Label, "label")?;
        let name = t.text.trim_end_matches(':').to_string();
        let location = self.module.segment.len() as u32;
        self.bind_label(&name, location, t.pos)
    }

    fn parse_directive(&mut self) -> Result<(), ParseError> {
        let d = self.expect(TokenKind::Directive, "directive")?;
        let name = d.text[1..].to_string();
        match name.as_str() {
            "entry" => self.parse_entry_directive(d.pos),
            "global" => self.parse_global_directive(),
            "extern" => self.parse_extern_directive(),
            "data" => self.parse_data_directive(),
            _ => Err(ParseError::UnknownDirective { pos: d.pos, name }),
        }
    }

    fn parse_entry_directive(&mut self, pos: Pos) -> Result<(), ParseError> {
        if self.module.has_entry {
            return Err(ParseError::DuplicateEntry { pos });
        }
        let ident = self.expect(TokenKind::Identifier, "identifier")?;
        self.module.has_entry = true;
        if let Some(lbl) = self.labels.get(&ident.text) {
            self.module.entry = lbl.location;
        } else {
            self.pending.entry(ident.text.clone()).or_default().pointers.push(Slot::EntryField);
        }
        self.expect_newline()
    }

    fn parse_global_directive(&mut self) -> Result<(), ParseError> {
        let ident = self.expect(TokenKind::Identifier, "identifier")?;
        if self.module.find_symbol(&ident.text).is_some() {
            return Err(ParseError::DuplicateGlobal { pos: ident.pos, name: ident.text });
        }
        if self.externs.contains(&ident.text) {
            return Err(ParseError::GlobalAfterExtern { pos: ident.pos, name: ident.text });
        }
        let location = self.labels.get(&ident.text).map(|l| l.location).unwrap_or(0);
        self.module.symbols.push(Symbol { name: ident.text.clone(), location });
        if !self.labels.contains_key(&ident.text) {
            self.pending_exports.insert(ident.text.clone());
        }
        self.expect_newline()
    }

    fn parse_extern_directive(&mut self) -> Result<(), ParseError> {
        let ident = self.expect(TokenKind::Identifier, "identifier")?;
        if self.externs.contains(&ident.text) {
            return Err(ParseError::DuplicateExtern { pos: ident.pos, name: ident.text });
        }
        if self.module.find_symbol(&ident.text).is_some() {
            return Err(ParseError::ExternAfterGlobal { pos: ident.pos, name: ident.text });
        }
        self.externs.insert(ident.text);
        self.expect_newline()
    }

    fn parse_data_directive(&mut self) -> Result<(), ParseError> {
        loop {
            match self.lexer.peek_type()? {
                TokenKind::Immediate => {
                    let t = self.lexer.get()?;
                    let v = parse_immediate_text(&t.text, t.pos)?;
                    self.module.segment.push(v);
                }
                TokenKind::String => {
                    let t = self.lexer.get()?;
                    let s = unescape_string(&t.text, t.pos)?;
                    for c in s.chars() {
                        self.module.segment.push(c as u32);
                    }
                    self.module.segment.push(0);
                }
                _ => {
                    let t = self.lexer.peek()?.clone();
                    return Err(ParseError::UnexpectedToken {
                        pos: t.pos,
                        found: format!("{} {:?}", t.kind, t.text),
                        expected: "immediate or string",
                    });
                }
            }
            if self.lexer.peek_type()? == TokenKind::Comma {
                self.lexer.get()?;
                continue;
            }
            break;
        }
        self.expect_newline()
    }

    fn parse_instruction(&mut self) -> Result<(), ParseError> {
        let mnem = self.expect(TokenKind::Identifier, "mnemonic")?;
        let desc = isa::lookup(&mnem.text)
            .ok_or_else(|| ParseError::UnknownMnemonic { pos: mnem.pos, name: mnem.text.clone() })?;
        let instr_slot = self.module.segment.len() as u32;
        self.module.segment.push(0);

        if desc.iflags.contains(IFlags::LONG) && self.lexer.peek_type()? == TokenKind::Identifier {
            let ident = self.lexer.peek()?.clone();
            if self.externs.contains(&ident.text) {
                self.lexer.get()?;
                let seg_slot = self.module.segment.len() as u32;
                self.module.segment.push(0);
                let loc_slot = self.module.segment.len() as u32;
                self.module.segment.push(0);
                self.add_relocation(&ident.text, seg_slot, loc_slot);
                let w = encoding::encode(desc.icode, OperandBits::imm(false, false), OperandBits::imm(false, false));
                self.module.segment[instr_slot as usize] = w;
                return self.expect_newline();
            }
        }
        if desc.iflags.contains(IFlags::HATCH) && self.lexer.peek_type()? == TokenKind::Identifier {
            let ident = self.lexer.get()?;
            let loc_slot = self.module.segment.len() as u32;
            self.module.segment.push(0);
            self.add_hatch_reference(&ident.text, loc_slot);
            let w = encoding::encode(desc.icode, OperandBits::imm(false, false), OperandBits::NONE);
            self.module.segment[instr_slot as usize] = w;
            return self.expect_newline();
        }

        let mut a_bits = OperandBits::NONE;
        let mut b_bits = OperandBits::NONE;
        if self.lexer.peek_type()? != TokenKind::Newline && self.lexer.peek_type()? != TokenKind::Eof {
            a_bits = self.parse_operand()?;
            if self.lexer.peek_type()? == TokenKind::Comma {
                self.lexer.get()?;
                b_bits = self.parse_operand()?;
            }
        }
        self.check_operand_flags(a_bits, desc.aflags, mnem.pos)?;
        self.check_operand_flags(b_bits, desc.bflags, mnem.pos)?;
        let w = encoding::encode(desc.icode, a_bits, b_bits);
        self.module.segment[instr_slot as usize] = w;
        self.expect_newline()
    }

    fn check_operand_flags(&self, bits: OperandBits, flags: OperandFlags, pos: Pos) -> Result<(), ParseError> {
        if bits.is_none() {
            if flags == OperandFlags::NONE || flags.contains(OperandFlags::OPT) {
                Ok(())
            } else {
                Err(ParseError::MissingOperand { pos })
            }
        } else {
            let allowed = match bits.kind {
                KIND_REG => flags.contains(OperandFlags::REG),
                KIND_IMM => flags.contains(OperandFlags::IMM),
                _ => false,
            };
            if allowed {
                Ok(())
            } else {
                Err(ParseError::OperandNotAllowed { pos })
            }
        }
    }

    fn parse_operand(&mut self) -> Result<OperandBits, ParseError> {
        let indirect = if self.lexer.peek_type()? == TokenKind::LeftBracket {
            self.lexer.get()?;
            true
        } else {
            false
        };
        let tok = self.lexer.get()?;
        let mut bits = match tok.kind {
            TokenKind::Register => {
                let name = &tok.text[1..];
                let code = regs::code_of(name)
                    .ok_or_else(|| ParseError::UnknownRegister { pos: tok.pos, name: name.to_string() })?;
                OperandBits::reg(code, indirect, false)
            }
            TokenKind::Immediate => {
                let v = parse_immediate_text(&tok.text, tok.pos)?;
                self.module.segment.push(v);
                OperandBits::imm(indirect, false)
            }
            TokenKind::Identifier => {
                let loc_slot = self.module.segment.len() as u32;
                self.module.segment.push(0);
                self.add_location_fixup(&tok.text, loc_slot);
                OperandBits::imm(indirect, false)
            }
            _ => {
                return Err(ParseError::UnexpectedToken {
                    pos: tok.pos,
                    found: format!("{} {:?}", tok.kind, tok.text),
                    expected: "operand",
                })
            }
        };

        if indirect {
            if self.lexer.peek_type()? == TokenKind::Offset {
                let off = self.lexer.get()?;
                let v = parse_offset_word(&off.text, off.pos)?;
                self.module.segment.push(v as u32);
                bits.offset = true;
            }
            self.expect(TokenKind::RightBracket, "']'")?;
        } else if self.lexer.peek_type()? == TokenKind::Offset {
            let off = self.lexer.peek()?.clone();
            return Err(ParseError::OffsetOutsideBrackets { pos: off.pos });
        }
        Ok(bits)
    }
}

/// Parse the numeric payload of an `IMMEDIATE` token (leading `#` stripped).
fn parse_immediate_text(raw: &str, pos: Pos) -> Result<u32, ParseError> {
    let s = raw.strip_prefix('#').unwrap_or(raw);
    if let Some(rest) = s.strip_prefix('f').or_else(|| s.strip_prefix('F')) {
        let v: f32 = rest
            .parse()
            .map_err(|_| ParseError::BadNumber { pos, text: raw.to_string() })?;
        return Ok(v.to_bits());
    }
    parse_int_signed(s, pos, raw)
}

/// Parse an `OFFSET` token: a direction sign followed by a signed numeral
/// (decimal or hex only — floats are not valid offsets, per §4.1).
fn parse_offset_word(raw: &str, pos: Pos) -> Result<i32, ParseError> {
    let (outer_neg, rest) = match raw.as_bytes().first() {
        Some(b'+') => (false, &raw[1..]),
        Some(b'-') => (true, &raw[1..]),
        _ => return Err(ParseError::BadNumber { pos, text: raw.to_string() }),
    };
    let inner = parse_int_signed(rest, pos, raw)? as i32 as i64;
    let combined = if outer_neg { -inner } else { inner };
    if combined > i32::MAX as i64 || combined < i32::MIN as i64 {
        return Err(ParseError::NumberOverflow { pos, text: raw.to_string() });
    }
    Ok(combined as i32)
}

/// Parse a decimal or hex numeral (optional leading `-`, optional trailing
/// `u`/`U`) into its 32-bit word pattern.
///
/// A bare literal is range-checked against `i32`. A `u`/`U`-suffixed
/// literal is, per §4.4, "reinterpreted as unsigned": its magnitude is
/// checked against the full `u32` range instead, which is why e.g.
/// `#x80000000u` (one past `i32::MAX`) is valid but `#x80000000` is not.
fn parse_int_signed(s: &str, pos: Pos, original: &str) -> Result<u32, ParseError> {
    let (radix, rest) = if let Some(r) = s.strip_prefix('x').or_else(|| s.strip_prefix('X')) {
        (16, r)
    } else {
        (10, s)
    };
    let (neg, rest) = if let Some(r) = rest.strip_prefix('-') { (true, r) } else { (false, rest) };
    let (unsigned, rest) = if let Some(r) = rest.strip_suffix('u').or_else(|| rest.strip_suffix('U')) {
        (true, r)
    } else {
        (false, rest)
    };
    let mag = u64::from_str_radix(rest, radix)
        .map_err(|_| ParseError::BadNumber { pos, text: original.to_string() })?;
    if unsigned {
        if mag > u32::MAX as u64 {
            return Err(ParseError::NumberOverflow { pos, text: original.to_string() });
        }
        let val = if neg { -(mag as i64) } else { mag as i64 };
        Ok(val as u32)
    } else {
        let val = if neg { -(mag as i64) } else { mag as i64 };
        if val > i32::MAX as i64 || val < i32::MIN as i64 {
            return Err(ParseError::NumberOverflow { pos, text: original.to_string() });
        }
        Ok(val as i32 as u32)
    }
}

fn unescape_string(raw: &str, pos: Pos) -> Result<String, ParseError> {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            _ => return Err(ParseError::BadEscape { pos, text: raw.to_string() }),
        }
    }
    Ok(out)
}
