use phf::phf_map;
use std::fmt;

use super::position::Position;

#[derive(Debug, Clone, PartialEq)]
pub struct Token<'a> {
    pub typ: Type,
    pub pos: Position,
    pub lexeme: &'a str,
}

impl<'a> Token<'a> {
    pub fn new(typ: Type, pos: Position, lexeme: &'a str) -> Self {
        Self { typ, pos, lexeme }
    }

    pub fn get_keyword(key: &str) -> Option<Type> {
        KEYWORDS.get(key).cloned()
    }
}

impl<'a> fmt::Display for Token<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{:?}: {} @ {}>", self.typ, self.lexeme, self.pos)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Type {
    // Literals
    Int(i64),
    Double(f64),
    Char(char),
    String(String),
    // Names
    Identifier,
    Constructor,
    /// `#name`, the payload is the name without the `#`.
    Primitive(String),
    // Keywords
    Data,
    Def,
    Let,
    LetRec,
    In,
    Case,
    Of,
    // Punctuation
    Backslash,
    Arrow,
    Equal,
    Semicolon,
    Bar,
    Underscore,
    LeftParenthese,
    RightParenthese,
    LeftBrace,
    RightBrace,

    Whitespace,
    Eof,
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Int(n) => write!(f, "{}", n),
            Type::Double(x) => write!(f, "{}", x),
            Type::Char(c) => write!(f, "{:?}", c),
            Type::String(s) => write!(f, "{:?}", s),
            Type::Identifier => write!(f, "identifier"),
            Type::Constructor => write!(f, "constructor"),
            Type::Primitive(p) => write!(f, "#{}", p),
            Type::Data => write!(f, "data"),
            Type::Def => write!(f, "def"),
            Type::Let => write!(f, "let"),
            Type::LetRec => write!(f, "letrec"),
            Type::In => write!(f, "in"),
            Type::Case => write!(f, "case"),
            Type::Of => write!(f, "of"),
            Type::Backslash => write!(f, "\\"),
            Type::Arrow => write!(f, "->"),
            Type::Equal => write!(f, "="),
            Type::Semicolon => write!(f, ";"),
            Type::Bar => write!(f, "|"),
            Type::Underscore => write!(f, "_"),
            Type::LeftParenthese => write!(f, "("),
            Type::RightParenthese => write!(f, ")"),
            Type::LeftBrace => write!(f, "{{"),
            Type::RightBrace => write!(f, "}}"),
            Type::Whitespace => write!(f, "whitespace"),
            Type::Eof => write!(f, "end of input"),
        }
    }
}

static KEYWORDS: phf::Map<&'static str, Type> = phf_map! {
    "data" => Type::Data,
    "def" => Type::Def,
    "let" => Type::Let,
    "letrec" => Type::LetRec,
    "in" => Type::In,
    "case" => Type::Case,
    "of" => Type::Of,
    "_" => Type::Underscore,
};

/// Shorthand for the payload-free token types.
#[macro_export]
macro_rules! T {
    [data] => { $crate::frontend::token::Type::Data };
    [def] => { $crate::frontend::token::Type::Def };
    [let] => { $crate::frontend::token::Type::Let };
    [letrec] => { $crate::frontend::token::Type::LetRec };
    [in] => { $crate::frontend::token::Type::In };
    [case] => { $crate::frontend::token::Type::Case };
    [of] => { $crate::frontend::token::Type::Of };
    [lambda] => { $crate::frontend::token::Type::Backslash };
    [->] => { $crate::frontend::token::Type::Arrow };
    [=] => { $crate::frontend::token::Type::Equal };
    [;] => { $crate::frontend::token::Type::Semicolon };
    [|] => { $crate::frontend::token::Type::Bar };
    [_] => { $crate::frontend::token::Type::Underscore };
    ['('] => { $crate::frontend::token::Type::LeftParenthese };
    [')'] => { $crate::frontend::token::Type::RightParenthese };
    ['{'] => { $crate::frontend::token::Type::LeftBrace };
    ['}'] => { $crate::frontend::token::Type::RightBrace };
    [ident] => { $crate::frontend::token::Type::Identifier };
    [con] => { $crate::frontend::token::Type::Constructor };
    [eof] => { $crate::frontend::token::Type::Eof };
}
