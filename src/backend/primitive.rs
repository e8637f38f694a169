//! The fixed table of primitive operations known to the reduction machine.
//!
//! Every primitive has a name (used in the textual program and in the primitive table of a
//! definitions file), an arity and the number of leading arguments that are forced to weak
//! head normal form before it fires. I/O primitives are actions: they are values for the
//! reducer and only perform their effect when the I/O driver executes them.

use std::fmt;

use phf::phf_map;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    // Int
    Add,
    Sub,
    Mul,
    Quot,
    Rem,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Char
    Ord,
    Chr,
    // Double
    FAdd,
    FSub,
    FMul,
    FDiv,
    FEq,
    FLt,
    FLe,
    IToF,
    FToI,
    // Show
    IShow,
    FShow,
    // Control
    Seq,
    Error,
    NoMatch,
    Tick,
    // Strings
    Unpack,
    // Pointers
    PNull,
    PAdd,
    PEq,
    PerformIO,
    // I/O handles
    Stdin,
    Stdout,
    Stderr,
    // I/O actions
    HGetChar,
    HPutChar,
    HFlush,
    OpenFile,
    HClose,
    GetArgs,
    Exit,
    Malloc,
    Free,
    Peek,
    Poke,
}

static PRIMITIVES: phf::Map<&'static str, Primitive> = phf_map! {
    "+" => Primitive::Add,
    "-" => Primitive::Sub,
    "*" => Primitive::Mul,
    "quot" => Primitive::Quot,
    "rem" => Primitive::Rem,
    "neg" => Primitive::Neg,
    "==" => Primitive::Eq,
    "/=" => Primitive::Ne,
    "<" => Primitive::Lt,
    "<=" => Primitive::Le,
    ">" => Primitive::Gt,
    ">=" => Primitive::Ge,
    "ord" => Primitive::Ord,
    "chr" => Primitive::Chr,
    "f+" => Primitive::FAdd,
    "f-" => Primitive::FSub,
    "f*" => Primitive::FMul,
    "f/" => Primitive::FDiv,
    "f==" => Primitive::FEq,
    "f<" => Primitive::FLt,
    "f<=" => Primitive::FLe,
    "itof" => Primitive::IToF,
    "ftoi" => Primitive::FToI,
    "ishow" => Primitive::IShow,
    "fshow" => Primitive::FShow,
    "seq" => Primitive::Seq,
    "error" => Primitive::Error,
    "noMatch" => Primitive::NoMatch,
    "tick" => Primitive::Tick,
    "fromUTF8" => Primitive::Unpack,
    "pnull" => Primitive::PNull,
    "p+" => Primitive::PAdd,
    "p==" => Primitive::PEq,
    "IO.performIO" => Primitive::PerformIO,
    "IO.stdin" => Primitive::Stdin,
    "IO.stdout" => Primitive::Stdout,
    "IO.stderr" => Primitive::Stderr,
    "IO.hGetChar" => Primitive::HGetChar,
    "IO.hPutChar" => Primitive::HPutChar,
    "IO.hFlush" => Primitive::HFlush,
    "IO.openFile" => Primitive::OpenFile,
    "IO.hClose" => Primitive::HClose,
    "IO.getArgs" => Primitive::GetArgs,
    "IO.exit" => Primitive::Exit,
    "IO.malloc" => Primitive::Malloc,
    "IO.free" => Primitive::Free,
    "IO.peek" => Primitive::Peek,
    "IO.poke" => Primitive::Poke,
};

impl Primitive {
    pub const ALL: [Primitive; 48] = [
        Primitive::Add,
        Primitive::Sub,
        Primitive::Mul,
        Primitive::Quot,
        Primitive::Rem,
        Primitive::Neg,
        Primitive::Eq,
        Primitive::Ne,
        Primitive::Lt,
        Primitive::Le,
        Primitive::Gt,
        Primitive::Ge,
        Primitive::Ord,
        Primitive::Chr,
        Primitive::FAdd,
        Primitive::FSub,
        Primitive::FMul,
        Primitive::FDiv,
        Primitive::FEq,
        Primitive::FLt,
        Primitive::FLe,
        Primitive::IToF,
        Primitive::FToI,
        Primitive::IShow,
        Primitive::FShow,
        Primitive::Seq,
        Primitive::Error,
        Primitive::NoMatch,
        Primitive::Tick,
        Primitive::Unpack,
        Primitive::PNull,
        Primitive::PAdd,
        Primitive::PEq,
        Primitive::PerformIO,
        Primitive::Stdin,
        Primitive::Stdout,
        Primitive::Stderr,
        Primitive::HGetChar,
        Primitive::HPutChar,
        Primitive::HFlush,
        Primitive::OpenFile,
        Primitive::HClose,
        Primitive::GetArgs,
        Primitive::Exit,
        Primitive::Malloc,
        Primitive::Free,
        Primitive::Peek,
        Primitive::Poke,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        PRIMITIVES.get(name).copied()
    }

    pub fn name(&self) -> &'static str {
        use Primitive::*;
        match self {
            Add => "+",
            Sub => "-",
            Mul => "*",
            Quot => "quot",
            Rem => "rem",
            Neg => "neg",
            Eq => "==",
            Ne => "/=",
            Lt => "<",
            Le => "<=",
            Gt => ">",
            Ge => ">=",
            Ord => "ord",
            Chr => "chr",
            FAdd => "f+",
            FSub => "f-",
            FMul => "f*",
            FDiv => "f/",
            FEq => "f==",
            FLt => "f<",
            FLe => "f<=",
            IToF => "itof",
            FToI => "ftoi",
            IShow => "ishow",
            FShow => "fshow",
            Seq => "seq",
            Error => "error",
            NoMatch => "noMatch",
            Tick => "tick",
            Unpack => "fromUTF8",
            PNull => "pnull",
            PAdd => "p+",
            PEq => "p==",
            PerformIO => "IO.performIO",
            Stdin => "IO.stdin",
            Stdout => "IO.stdout",
            Stderr => "IO.stderr",
            HGetChar => "IO.hGetChar",
            HPutChar => "IO.hPutChar",
            HFlush => "IO.hFlush",
            OpenFile => "IO.openFile",
            HClose => "IO.hClose",
            GetArgs => "IO.getArgs",
            Exit => "IO.exit",
            Malloc => "IO.malloc",
            Free => "IO.free",
            Peek => "IO.peek",
            Poke => "IO.poke",
        }
    }

    /// Number of arguments consumed when the primitive fires (or is executed, for actions).
    pub fn arity(&self) -> usize {
        use Primitive::*;
        match self {
            NoMatch | PNull | Stdin | Stdout | Stderr | GetArgs => 0,
            Neg | Ord | Chr | IToF | FToI | IShow | FShow | Error | Unpack | PerformIO
            | HGetChar | HFlush | HClose | Exit | Malloc | Free | Peek => 1,
            _ => 2,
        }
    }

    /// Number of leading arguments forced to weak head normal form before firing.
    /// `seq` and `tick` force only their first argument, `IO.performIO` runs its argument
    /// as an action instead of forcing it.
    pub fn forced(&self) -> usize {
        match self {
            Primitive::Seq | Primitive::Tick => 1,
            Primitive::PerformIO => 0,
            p => p.arity(),
        }
    }

    /// Actions only run under the I/O driver.
    pub fn is_io(&self) -> bool {
        use Primitive::*;
        matches!(
            self,
            HGetChar | HPutChar | HFlush | OpenFile | HClose | GetArgs | Exit | Malloc | Free
                | Peek | Poke
        )
    }
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Maps the primitive names found in a definitions file to the primitives of this runtime.
pub trait Resolver {
    fn resolve(&self, name: &str) -> Option<Primitive>;
}

/// Resolves names through the built-in primitive table.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimTable;

impl Resolver for PrimTable {
    fn resolve(&self, name: &str) -> Option<Primitive> {
        Primitive::from_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip() {
        for p in Primitive::ALL {
            assert_eq!(Primitive::from_name(p.name()), Some(p), "{}", p);
        }
        assert_eq!(PRIMITIVES.len(), Primitive::ALL.len());
    }

    #[test]
    fn test_strictness_contract() {
        assert_eq!(Primitive::Add.arity(), 2);
        assert_eq!(Primitive::Add.forced(), 2);
        assert_eq!(Primitive::Seq.forced(), 1);
        assert_eq!(Primitive::Tick.arity(), 2);
        assert_eq!(Primitive::PerformIO.forced(), 0);
        assert!(Primitive::HPutChar.is_io());
        assert!(!Primitive::Stdout.is_io());
        assert_eq!(PrimTable.resolve("IO.hPutChar"), Some(Primitive::HPutChar));
        assert_eq!(PrimTable.resolve("nonsense"), None);
    }
}
