//! The definitions file format.
//!
//! A definitions file is a flat list of records followed by a definition table, the names of
//! the primitives it uses and the entry point:
//!
//! ```text
//! "TRNR" | u16 version | varint n | record * n
//!        | varint ndefs  | (str name, varint arity, varint root) * ndefs
//!        | varint nprims | str * nprims
//!        | varint entry + 1 (0 = no entry)
//!        | "TEND"
//! ```
//!
//! Application records refer to earlier records by their distance, never by an absolute
//! position, and definitions refer to each other only through the definition table, so cyclic
//! programs need no special treatment and the file can be loaded anywhere in the heap.
//! Integers are LEB128 varints (zig-zag for signed values), strings are a varint length
//! followed by UTF-8 bytes.

use std::{collections::HashMap, rc::Rc};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{
    combinator::{Code, Combinator},
    primitive::Primitive,
    program::{CExpr, CExprPtr, Program},
};
use crate::{error::FormatError, frontend::ast::Literal};

pub const MAGIC: &[u8; 4] = b"TRNR";
pub const END_MARKER: &[u8; 4] = b"TEND";
pub const VERSION: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
enum RecordTag {
    App = 0,
    Comb,
    Int,
    Char,
    Double,
    Str,
    Prim,
    Global,
}

/// One node of the serialized graph. In memory all references are absolute record indices.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    App { fun: u32, arg: u32 },
    Comb(Combinator),
    Int(i64),
    Char(char),
    Double(f64),
    Str(String),
    /// Index into the primitive name table.
    Prim(u32),
    /// Index into the definition table.
    Global(u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefEntry {
    pub name: String,
    pub arity: u32,
    /// Record holding the body.
    pub root: u32,
}

/// A program in its serializable form.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Image {
    pub records: Vec<Record>,
    pub defs: Vec<DefEntry>,
    pub prims: Vec<String>,
    /// Index of the entry definition.
    pub entry: Option<u32>,
}

struct Emitter<'p> {
    records: Vec<Record>,
    /// Nodes already emitted, by identity.
    emitted: HashMap<*const CExpr, u32>,
    globals: HashMap<&'p str, u32>,
    global_records: HashMap<u32, u32>,
    prims: Vec<String>,
    prim_index: HashMap<Primitive, u32>,
}

impl<'p> Emitter<'p> {
    fn push(&mut self, record: Record) -> u32 {
        self.records.push(record);
        (self.records.len() - 1) as u32
    }

    /// Emit `e` after its children. Every distinct node becomes exactly one record.
    fn emit(&mut self, e: &'p CExprPtr) -> Result<u32, FormatError> {
        let key = Rc::as_ptr(e);
        if let Some(&index) = self.emitted.get(&key) {
            return Ok(index);
        }
        let index = match &**e {
            CExpr::App(f, a) => {
                let fun = self.emit(f)?;
                let arg = self.emit(a)?;
                self.push(Record::App { fun, arg })
            }
            CExpr::Comb(c) => self.push(Record::Comb(*c)),
            CExpr::Prim(p) => {
                let next = self.prims.len() as u32;
                let slot = *self.prim_index.entry(*p).or_insert(next);
                if slot == next {
                    self.prims.push(p.name().to_string());
                }
                self.push(Record::Prim(slot))
            }
            CExpr::Global(name) => {
                let def = *self.globals.get(name.as_str()).ok_or_else(|| {
                    FormatError::Malformed(format!("reference to unknown definition `{}`", name))
                })?;
                match self.global_records.get(&def) {
                    Some(&index) => index,
                    None => {
                        let index = self.push(Record::Global(def));
                        self.global_records.insert(def, index);
                        index
                    }
                }
            }
            CExpr::Lit(Literal::Int(n)) => self.push(Record::Int(*n)),
            CExpr::Lit(Literal::Char(c)) => self.push(Record::Char(*c)),
            CExpr::Lit(Literal::Double(x)) => self.push(Record::Double(*x)),
            CExpr::Lit(Literal::Str(s)) => self.push(Record::Str(s.clone())),
            CExpr::Var(x) => {
                return Err(FormatError::Malformed(format!(
                    "variable `{}` left in a compiled definition",
                    x
                )))
            }
        };
        self.emitted.insert(key, index);
        Ok(index)
    }
}

impl Image {
    /// Flatten a program into records in post order, one record per distinct node.
    pub fn from_program(program: &Program) -> Result<Self, FormatError> {
        let mut emitter = Emitter {
            records: Vec::new(),
            emitted: HashMap::new(),
            globals: program
                .defs
                .iter()
                .enumerate()
                .map(|(i, d)| (d.name.as_str(), i as u32))
                .collect(),
            global_records: HashMap::new(),
            prims: Vec::new(),
            prim_index: HashMap::new(),
        };
        let mut defs = Vec::with_capacity(program.defs.len());
        for def in program.defs.iter() {
            let root = emitter.emit(&def.body)?;
            defs.push(DefEntry {
                name: def.name.clone(),
                arity: def.arity as u32,
                root,
            });
        }
        let entry = match &program.entry {
            Some(name) => Some(emitter.globals.get(name.as_str()).copied().ok_or_else(|| {
                FormatError::Malformed(format!("entry point `{}` is not defined", name))
            })?),
            None => None,
        };
        Ok(Self {
            records: emitter.records,
            defs,
            prims: emitter.prims,
            entry,
        })
    }

    pub fn def_index(&self, name: &str) -> Option<usize> {
        self.defs.iter().position(|d| d.name == name)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        w.bytes(MAGIC);
        w.u16(VERSION);
        w.varint(self.records.len() as u64);
        for (i, record) in self.records.iter().enumerate() {
            let i = i as u64;
            match record {
                Record::App { fun, arg } => {
                    w.u8(RecordTag::App.into());
                    w.varint(i - *fun as u64);
                    w.varint(i - *arg as u64);
                }
                Record::Comb(c) => {
                    w.u8(RecordTag::Comb.into());
                    w.u8(c.code().into());
                    match c {
                        Combinator::Con { tag, arity } => {
                            w.varint(*tag as u64);
                            w.varint(*arity as u64);
                        }
                        Combinator::Case(n) => w.varint(*n as u64),
                        _ => (),
                    }
                }
                Record::Int(n) => {
                    w.u8(RecordTag::Int.into());
                    w.zigzag(*n);
                }
                Record::Char(c) => {
                    w.u8(RecordTag::Char.into());
                    w.varint(*c as u64);
                }
                Record::Double(x) => {
                    w.u8(RecordTag::Double.into());
                    w.bytes(&x.to_le_bytes());
                }
                Record::Str(s) => {
                    w.u8(RecordTag::Str.into());
                    w.str(s);
                }
                Record::Prim(p) => {
                    w.u8(RecordTag::Prim.into());
                    w.varint(*p as u64);
                }
                Record::Global(d) => {
                    w.u8(RecordTag::Global.into());
                    w.varint(*d as u64);
                }
            }
        }
        w.varint(self.defs.len() as u64);
        for def in self.defs.iter() {
            w.str(&def.name);
            w.varint(def.arity as u64);
            w.varint(def.root as u64);
        }
        w.varint(self.prims.len() as u64);
        for name in self.prims.iter() {
            w.str(name);
        }
        w.varint(self.entry.map_or(0, |e| e as u64 + 1));
        w.bytes(END_MARKER);
        w.finish()
    }

    /// Decode and validate a definitions file. Every reference is checked, so a successfully
    /// decoded image can be loaded without further bounds checks.
    pub fn decode(bytes: &[u8]) -> Result<Self, FormatError> {
        let mut r = Reader::new(bytes);
        if r.take(MAGIC.len())? != MAGIC {
            return Err(FormatError::BadMagic);
        }
        let version = r.u16()?;
        if version != VERSION {
            return Err(FormatError::VersionMismatch {
                found: version,
                expected: VERSION,
            });
        }

        let count = r.varint()?;
        let mut records = Vec::with_capacity((count as usize).min(r.remaining()));
        for i in 0..count {
            records.push(r.record(i)?);
        }

        let ndefs = r.varint()?;
        let mut defs = Vec::with_capacity((ndefs as usize).min(r.remaining()));
        for i in 0..ndefs {
            let name = r.str()?;
            let arity = r.u32()?;
            let root = r.varint()?;
            if root >= count {
                return Err(FormatError::BadReference {
                    record: i as usize,
                    kind: "definition root",
                    target: root,
                });
            }
            defs.push(DefEntry {
                name,
                arity,
                root: root as u32,
            });
        }

        let nprims = r.varint()?;
        let mut prims = Vec::with_capacity((nprims as usize).min(r.remaining()));
        for _ in 0..nprims {
            prims.push(r.str()?);
        }

        for (i, record) in records.iter().enumerate() {
            match record {
                Record::Prim(p) if *p as u64 >= nprims => {
                    return Err(FormatError::BadReference {
                        record: i,
                        kind: "primitive",
                        target: *p as u64,
                    })
                }
                Record::Global(d) if *d as u64 >= ndefs => {
                    return Err(FormatError::BadReference {
                        record: i,
                        kind: "definition",
                        target: *d as u64,
                    })
                }
                _ => (),
            }
        }

        let entry = match r.varint()? {
            0 => None,
            e if e - 1 < ndefs => Some((e - 1) as u32),
            e => {
                return Err(FormatError::BadReference {
                    record: records.len(),
                    kind: "entry",
                    target: e - 1,
                })
            }
        };

        if r.take(END_MARKER.len())? != END_MARKER {
            return Err(FormatError::Malformed("missing end marker".to_string()));
        }
        if r.remaining() > 0 {
            return Err(FormatError::Malformed(format!(
                "{} trailing bytes after end marker",
                r.remaining()
            )));
        }
        Ok(Self {
            records,
            defs,
            prims,
            entry,
        })
    }
}

//---------------
// Byte utilities
//---------------

pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub(crate) fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub(crate) fn u8(&mut self, b: u8) {
        self.buf.push(b);
    }

    pub(crate) fn u16(&mut self, n: u16) {
        self.buf.extend_from_slice(&n.to_le_bytes());
    }

    pub(crate) fn bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Unsigned LEB128.
    pub(crate) fn varint(&mut self, mut n: u64) {
        loop {
            let byte = (n & 0x7f) as u8;
            n >>= 7;
            if n == 0 {
                self.buf.push(byte);
                return;
            }
            self.buf.push(byte | 0x80);
        }
    }

    pub(crate) fn zigzag(&mut self, n: i64) {
        self.varint(((n << 1) ^ (n >> 63)) as u64);
    }

    pub(crate) fn str(&mut self, s: &str) {
        self.varint(s.len() as u64);
        self.bytes(s.as_bytes());
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        if self.remaining() < n {
            return Err(FormatError::Truncated {
                offset: self.bytes.len(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, FormatError> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn varint(&mut self) -> Result<u64, FormatError> {
        let start = self.pos;
        let mut n = 0u64;
        let mut shift = 0;
        loop {
            let byte = self.u8()?;
            if shift == 63 && byte > 1 || shift > 63 {
                return Err(FormatError::Malformed(format!(
                    "varint at byte {} overflows 64 bits",
                    start
                )));
            }
            n |= ((byte & 0x7f) as u64) << shift;
            if byte & 0x80 == 0 {
                return Ok(n);
            }
            shift += 7;
        }
    }

    pub(crate) fn u32(&mut self) -> Result<u32, FormatError> {
        let start = self.pos;
        let n = self.varint()?;
        u32::try_from(n).map_err(|_| {
            FormatError::Malformed(format!("value {} at byte {} exceeds 32 bits", n, start))
        })
    }

    pub(crate) fn zigzag(&mut self) -> Result<i64, FormatError> {
        let n = self.varint()?;
        Ok((n >> 1) as i64 ^ -((n & 1) as i64))
    }

    pub(crate) fn str(&mut self) -> Result<String, FormatError> {
        let start = self.pos;
        let len = self.varint()?;
        if len > self.remaining() as u64 {
            return Err(FormatError::Truncated {
                offset: self.bytes.len(),
            });
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| FormatError::Malformed(format!("invalid UTF-8 in string at byte {}", start)))
    }

    /// Read record number `index`, turning back distances into indices.
    fn record(&mut self, index: u64) -> Result<Record, FormatError> {
        let offset = self.pos;
        let tag = self.u8()?;
        let tag = RecordTag::try_from(tag).map_err(|_| FormatError::UnknownRecord { tag, offset })?;
        Ok(match tag {
            RecordTag::App => {
                let fun = self.back_reference(index)?;
                let arg = self.back_reference(index)?;
                Record::App { fun, arg }
            }
            RecordTag::Comb => {
                let offset = self.pos;
                let code = self.u8()?;
                let code = Code::try_from(code)
                    .map_err(|_| FormatError::UnknownCombinator { code, offset })?;
                Record::Comb(match code {
                    Code::S => Combinator::S,
                    Code::K => Combinator::K,
                    Code::I => Combinator::I,
                    Code::B => Combinator::B,
                    Code::C => Combinator::C,
                    Code::A => Combinator::A,
                    Code::Y => Combinator::Y,
                    Code::S_ => Combinator::S_,
                    Code::B_ => Combinator::B_,
                    Code::C_ => Combinator::C_,
                    Code::Con => Combinator::Con {
                        tag: self.u32()?,
                        arity: self.u32()?,
                    },
                    Code::Case => Combinator::Case(self.u32()?),
                    Code::Bind => Combinator::Bind,
                    Code::Then => Combinator::Then,
                    Code::Return => Combinator::Return,
                })
            }
            RecordTag::Int => Record::Int(self.zigzag()?),
            RecordTag::Char => {
                let start = self.pos;
                let c = self.u32()?;
                Record::Char(char::from_u32(c).ok_or_else(|| {
                    FormatError::Malformed(format!("invalid character {:#x} at byte {}", c, start))
                })?)
            }
            RecordTag::Double => {
                let b = self.take(8)?;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(b);
                Record::Double(f64::from_le_bytes(raw))
            }
            RecordTag::Str => Record::Str(self.str()?),
            RecordTag::Prim => Record::Prim(self.u32()?),
            RecordTag::Global => Record::Global(self.u32()?),
        })
    }

    fn back_reference(&mut self, index: u64) -> Result<u32, FormatError> {
        let distance = self.varint()?;
        if distance == 0 || distance > index {
            return Err(FormatError::BadReference {
                record: index as usize,
                kind: "record",
                target: distance,
            });
        }
        Ok((index - distance) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::compiler::Compiler;
    use crate::frontend::parse_module;

    fn image(src: &str) -> Image {
        let module = parse_module("M", src).unwrap();
        let program = Compiler::new().compile_module(&module).unwrap();
        Image::from_program(&program).unwrap()
    }

    #[test]
    fn test_varints() {
        let mut w = Writer::new();
        for n in [0u64, 1, 127, 128, 300, u64::MAX] {
            w.varint(n);
        }
        for n in [0i64, -1, 1, i64::MIN, i64::MAX] {
            w.zigzag(n);
        }
        let bytes = w.finish();
        let mut r = Reader::new(&bytes);
        for n in [0u64, 1, 127, 128, 300, u64::MAX] {
            assert_eq!(r.varint().unwrap(), n);
        }
        for n in [0i64, -1, 1, i64::MIN, i64::MAX] {
            assert_eq!(r.zigzag().unwrap(), n);
        }
        assert_eq!(r.remaining(), 0);
        // 300 needs two bytes
        let mut w = Writer::new();
        w.varint(300);
        assert_eq!(w.finish(), vec![0xac, 0x02]);
    }

    #[test]
    fn test_sharing_and_back_references() {
        let img = image("def main = let y = #* 6 7 in #+ y y");
        // Every primitive is named once in the table.
        assert_eq!(img.prims, vec!["+".to_string(), "*".to_string()]);
        let apps = img
            .records
            .iter()
            .enumerate()
            .filter_map(|(i, r)| match r {
                Record::App { fun, arg } => Some((i as u32, *fun, *arg)),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert!(apps.iter().all(|(i, fun, arg)| fun < i && arg < i));
        // The shared multiplication is a single record.
        let muls = img
            .records
            .iter()
            .filter(|r| **r == Record::Prim(1))
            .count();
        assert_eq!(muls, 1);
        assert_eq!(img.entry, Some(0));
        assert_eq!(Image::decode(&img.encode()).unwrap(), img);
    }

    #[test]
    fn test_globals_and_literals() {
        let img = image(
            "data B = F | T\n\
             def f x = #seq x 'c'\n\
             def g = #f+ 1.5 (f \"s\")\n\
             def h = f (f T)",
        );
        assert_eq!(img.entry, None);
        assert_eq!(img.defs.len(), 3);
        assert_eq!(img.def_index("g"), Some(1));
        let globals = img
            .records
            .iter()
            .filter(|r| **r == Record::Global(0))
            .count();
        assert_eq!(globals, 1);
        assert!(img.records.contains(&Record::Double(1.5)));
        assert!(img.records.contains(&Record::Str("s".to_string())));
        assert!(img.records.contains(&Record::Char('c')));
        assert_eq!(Image::decode(&img.encode()).unwrap(), img);
    }

    #[test]
    fn test_every_truncation_fails() {
        let bytes = image("def main = #+ 1 (#neg 2)").encode();
        for len in 0..bytes.len() {
            assert!(Image::decode(&bytes[..len]).is_err(), "prefix of {} bytes", len);
        }
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(
            Image::decode(&longer),
            Err(FormatError::Malformed(_))
        ));
    }

    #[test]
    fn test_header_errors() {
        let mut bytes = image("def main = 1").encode();
        bytes[4] = 9;
        assert_eq!(
            Image::decode(&bytes),
            Err(FormatError::VersionMismatch {
                found: 9,
                expected: VERSION
            })
        );
        assert_eq!(Image::decode(b"JUNKJUNK"), Err(FormatError::BadMagic));
    }

    #[test]
    fn test_bad_references() {
        let bad_app = Image {
            records: vec![Record::Int(1), Record::App { fun: 0, arg: 0 }],
            defs: vec![DefEntry {
                name: "main".to_string(),
                arity: 0,
                root: 1,
            }],
            prims: vec![],
            entry: Some(0),
        };
        let mut bytes = bad_app.encode();
        // Magic, version, record count and the two bytes of `Int 1` come first.
        let app = MAGIC.len() + 2 + 1 + 2;
        assert_eq!(
            &bytes[app..app + 3],
            &[u8::from(RecordTag::App), 1, 1]
        );
        bytes[app + 1] = 5;
        assert!(matches!(
            Image::decode(&bytes),
            Err(FormatError::BadReference { kind: "record", .. })
        ));

        let bad_prim = Image {
            records: vec![Record::Prim(3)],
            defs: vec![],
            prims: vec!["+".to_string()],
            entry: None,
        };
        assert!(matches!(
            Image::decode(&bad_prim.encode()),
            Err(FormatError::BadReference {
                kind: "primitive",
                ..
            })
        ));
        let mut unknown = Image::default().encode();
        unknown[6] = 1;
        unknown.insert(7, 0x42);
        assert!(matches!(
            Image::decode(&unknown),
            Err(FormatError::UnknownRecord { tag: 0x42, .. })
        ));
    }
}
