//! The closed set of combinators that make up a compiled program.
//!
//! Besides Turner's basis (S, K, I, B, C and the structure sharing variants S', B', C') the set
//! contains the fixed point combinator, constructors, the case dispatcher and the three I/O
//! sequencing combinators which are interpreted by the I/O driver of the reduction machine.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combinator {
    /// `S f g x ~> f x (g x)`
    S,
    /// `K x y ~> x`
    K,
    /// `I x ~> x`
    I,
    /// `B f g x ~> f (g x)`
    B,
    /// `C f x y ~> f y x`
    C,
    /// `A x y ~> y`
    A,
    /// `Y f ~> f (Y f)`, tied into a cycle.
    Y,
    /// `S' c f g x ~> c (f x) (g x)`
    S_,
    /// `B' c f g x ~> c (f (g x))`
    B_,
    /// `C' c f g x ~> c (f x) g`
    C_,
    /// Constructor with the given tag. Applied to `arity` fields it is a value.
    Con { tag: u32, arity: u32 },
    /// `Case n s a0 .. a(n-1)` forces `s` to a constructor with tag `t` and applies `at` to
    /// its fields.
    Case(u32),
    /// `IO.>>= m k`
    Bind,
    /// `IO.>> m n`
    Then,
    /// `IO.return x`
    Return,
}

/// One byte per combinator in the definitions file. `Con` and `Case` carry their payload
/// as varints after the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum Code {
    S = 0,
    K,
    I,
    B,
    C,
    A,
    Y,
    S_,
    B_,
    C_,
    Con,
    Case,
    Bind,
    Then,
    Return,
}

pub const FALSE: Combinator = Combinator::Con { tag: 0, arity: 0 };
pub const TRUE: Combinator = Combinator::Con { tag: 1, arity: 0 };
pub const NIL: Combinator = Combinator::Con { tag: 0, arity: 0 };
pub const CONS: Combinator = Combinator::Con { tag: 1, arity: 2 };
pub const UNIT: Combinator = Combinator::Con { tag: 0, arity: 0 };

impl Combinator {
    /// Number of arguments that have to be present on the spine before the combinator fires.
    /// Constructors and I/O combinators never fire, they are values.
    pub fn arity(&self) -> Option<usize> {
        use Combinator::*;
        match self {
            I | Y => Some(1),
            K | A => Some(2),
            S | B | C => Some(3),
            S_ | B_ | C_ => Some(4),
            Case(n) => Some(*n as usize + 1),
            Con { .. } | Bind | Then | Return => None,
        }
    }

    pub fn code(&self) -> Code {
        match self {
            Combinator::S => Code::S,
            Combinator::K => Code::K,
            Combinator::I => Code::I,
            Combinator::B => Code::B,
            Combinator::C => Code::C,
            Combinator::A => Code::A,
            Combinator::Y => Code::Y,
            Combinator::S_ => Code::S_,
            Combinator::B_ => Code::B_,
            Combinator::C_ => Code::C_,
            Combinator::Con { .. } => Code::Con,
            Combinator::Case(_) => Code::Case,
            Combinator::Bind => Code::Bind,
            Combinator::Then => Code::Then,
            Combinator::Return => Code::Return,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, Combinator::Bind | Combinator::Then | Combinator::Return)
    }

    /// Look up the combinators that can be named in the textual program (`#IO.>>=` etc.).
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "IO.>>=" => Some(Combinator::Bind),
            "IO.>>" => Some(Combinator::Then),
            "IO.return" => Some(Combinator::Return),
            _ => None,
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Combinator::S => write!(f, "S"),
            Combinator::K => write!(f, "K"),
            Combinator::I => write!(f, "I"),
            Combinator::B => write!(f, "B"),
            Combinator::C => write!(f, "C"),
            Combinator::A => write!(f, "A"),
            Combinator::Y => write!(f, "Y"),
            Combinator::S_ => write!(f, "S'"),
            Combinator::B_ => write!(f, "B'"),
            Combinator::C_ => write!(f, "C'"),
            Combinator::Con { tag, arity } => write!(f, "Con{}/{}", tag, arity),
            Combinator::Case(n) => write!(f, "Case{}", n),
            Combinator::Bind => write!(f, "IO.>>="),
            Combinator::Then => write!(f, "IO.>>"),
            Combinator::Return => write!(f, "IO.return"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity() {
        assert_eq!(Combinator::K.arity(), Some(2));
        assert_eq!(Combinator::S_.arity(), Some(4));
        assert_eq!(Combinator::Case(2).arity(), Some(3));
        assert_eq!(CONS.arity(), None);
        assert_eq!(Combinator::Bind.arity(), None);
    }

    #[test]
    fn test_codes() {
        assert_eq!(u8::from(Combinator::C_.code()), 9);
        assert!(matches!(Code::try_from(11u8), Ok(Code::Case)));
        assert!(Code::try_from(200u8).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Combinator::B_.to_string(), "B'");
        assert_eq!(CONS.to_string(), "Con1/2");
        assert_eq!(Combinator::from_name("IO.>>"), Some(Combinator::Then));
        assert_eq!(Combinator::from_name("S"), None);
    }
}
