//! The lexer is responsible for tokenizing the textual form of the intermediate program so that
//! it can be read by the parser.
//!
//! Besides names, keywords and punctuation the lexer understands integer, floating point,
//! character and string literals (with the usual backslash escapes) and primitive references
//! written as `#name`. Everything after `--` up to the end of the line is a comment.
//!
//! Example:
//! ```rust
//! use turner::frontend::lexer::Lexer;
//! let tokens_or_err = Lexer::new("def main = #+ 1 2").tokenize();
//! ```
//! `tokenize` either returns an error or a queue containing all tokens.

use std::{collections::VecDeque, iter::Peekable, str::Chars};

use super::{
    position::Position,
    token::{Token, Type},
};
use crate::error::FrontendError::{self, SyntaxError};
use crate::T;

/// The lexer struct is responsible for the tokenization of the source text.
pub struct Lexer<'a> {
    /// Contains the source text. Used for 'cutting' out lexemes for the tokens.
    source: &'a str,
    /// Peekable iterator over all characters of the source string.
    chars: Peekable<Chars<'a>>,
    tokens: VecDeque<Token<'a>>,
    /// The current position relative to the current line.
    token_pos: Position,
    /// Byte offset where the current token starts.
    start_idx: usize,
    /// Byte offset of the next unread character.
    current_idx: usize,
}

type LexerResult<'a> = Result<Token<'a>, FrontendError>;

/// Characters that end a `#primitive` name besides whitespace.
const DELIMITERS: &[char] = &['(', ')', '{', '}', ';'];

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().peekable(),
            tokens: VecDeque::new(),
            token_pos: Position::new(1, 1, 0),
            start_idx: 0,
            current_idx: 0,
        }
    }

    /// Tokenize the source string into a queue of tokens ending with `Eof`.
    pub fn tokenize(&mut self) -> Result<VecDeque<Token<'a>>, FrontendError> {
        while !self.is_at_end() {
            self.start_idx = self.current_idx;
            let token = self.next_token()?;
            if token.typ != Type::Whitespace {
                self.tokens.push_back(token);
            }
            self.token_pos.start_column = self.token_pos.end_column + 1;
        }
        self.start_idx = self.current_idx;
        self.tokens.push_back(Token::new(
            T![eof],
            Position::new(
                self.token_pos.line,
                self.token_pos.start_column,
                self.token_pos.end_column,
            ),
            "EOF",
        ));
        Ok(std::mem::take(&mut self.tokens))
    }

    fn next_token(&mut self) -> LexerResult<'a> {
        match self.advance() {
            Some('(') => self.new_token(T!['(']),
            Some(')') => self.new_token(T![')']),
            Some('{') => self.new_token(T!['{']),
            Some('}') => self.new_token(T!['}']),
            Some(';') => self.new_token(T![;]),
            Some('|') => self.new_token(T![|]),
            Some('=') => self.new_token(T![=]),
            Some('\\') => self.new_token(T![lambda]),
            // A '-' starts a comment, an arrow or a negative number.
            Some('-') => match self.chars.peek() {
                Some('-') => {
                    self.advance_while(&|x| x != &'\n');
                    self.new_token(Type::Whitespace)
                }
                Some('>') => {
                    self.advance();
                    self.new_token(T![->])
                }
                Some(c) if c.is_ascii_digit() => self.number(),
                _ => Err(self.error("Expected '->', '--' or a number after '-'.")),
            },
            Some('#') => self.primitive(),
            Some(' ') | Some('\t') | Some('\r') => self.new_token(Type::Whitespace),
            Some('\n') => {
                self.token_pos.next_line();
                self.new_token(Type::Whitespace)
            }
            Some('"') => self.string(),
            Some('\'') => self.character(),
            Some(c) if c.is_ascii_digit() => self.number(),
            Some(c) if c.is_alphabetic() || c == '_' => self.keyword(c),
            Some(c) => Err(self.error(&format!("Unexpected character {:?}.", c))),
            None => Err(self.error("Invalid input.")),
        }
    }

    //-------
    // HELPER
    //-------

    fn get_substr_from_current_range(&self) -> &'a str {
        &self.source[self.start_idx..self.current_idx]
    }

    fn new_token(&self, typ: Type) -> LexerResult<'a> {
        Ok(Token::new(
            typ,
            self.token_pos,
            self.get_substr_from_current_range(),
        ))
    }

    fn error(&self, msg: &str) -> FrontendError {
        SyntaxError {
            pos: self.token_pos,
            msg: msg.to_string(),
        }
    }

    /// Consume the current character and return it.
    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.token_pos.next_column();
        self.current_idx += c.len_utf8();
        Some(c)
    }

    /// Consume characters while a given predicate holds.
    fn advance_while(&mut self, predicate: &dyn Fn(&char) -> bool) {
        while let Some(c) = self.chars.peek() {
            if !predicate(c) {
                break;
            }
            self.advance();
        }
    }

    fn is_at_end(&mut self) -> bool {
        self.chars.peek().is_none()
    }

    //---------
    // Literals
    //---------

    fn number(&mut self) -> LexerResult<'a> {
        self.advance_while(&|c| c.is_ascii_digit());
        let mut is_float = false;
        if self.chars.peek() == Some(&'.') {
            self.advance();
            match self.chars.peek() {
                Some(c) if c.is_ascii_digit() => self.advance_while(&|c| c.is_ascii_digit()),
                _ => return Err(self.error("Expected floating point number.")),
            }
            is_float = true;
        }
        let text = self.get_substr_from_current_range();
        let typ = if is_float {
            Type::Double(
                text.parse()
                    .map_err(|_| self.error("Malformed floating point number."))?,
            )
        } else {
            Type::Int(
                text.parse()
                    .map_err(|_| self.error("Integer literal out of range."))?,
            )
        };
        self.new_token(typ)
    }

    /// Read one possibly escaped character of a char or string literal.
    fn literal_char(&mut self, quote: char) -> Result<char, FrontendError> {
        match self.advance() {
            None => Err(self.error(&format!("missing closing {}.", quote))),
            Some('\n') => Err(self.error("line break inside literal.")),
            Some('\\') => match self.advance() {
                Some('n') => Ok('\n'),
                Some('t') => Ok('\t'),
                Some('r') => Ok('\r'),
                Some('0') => Ok('\0'),
                Some('\\') => Ok('\\'),
                Some('"') => Ok('"'),
                Some('\'') => Ok('\''),
                Some(c) => Err(self.error(&format!("Unknown escape sequence \\{}.", c))),
                None => Err(self.error(&format!("missing closing {}.", quote))),
            },
            Some(c) => Ok(c),
        }
    }

    fn string(&mut self) -> LexerResult<'a> {
        let mut val = String::new();
        loop {
            if self.chars.peek() == Some(&'"') {
                self.advance();
                break;
            }
            val.push(self.literal_char('"')?);
        }
        self.new_token(Type::String(val))
    }

    fn character(&mut self) -> LexerResult<'a> {
        if self.chars.peek() == Some(&'\'') {
            return Err(self.error("Empty character literal."));
        }
        let c = self.literal_char('\'')?;
        match self.advance() {
            Some('\'') => self.new_token(Type::Char(c)),
            _ => Err(self.error("missing closing '.")),
        }
    }

    fn primitive(&mut self) -> LexerResult<'a> {
        self.advance_while(&|c| !c.is_whitespace() && !DELIMITERS.contains(c));
        let name = &self.get_substr_from_current_range()[1..];
        if name.is_empty() {
            return Err(self.error("Expected primitive name after '#'."));
        }
        self.new_token(Type::Primitive(name.to_string()))
    }

    //----------------------
    // Identifier & keywords
    //----------------------

    /// Checks whether the following characters form a keyword. If not it is a name; names
    /// starting with an upper case letter are constructors.
    fn keyword(&mut self, first: char) -> LexerResult<'a> {
        self.advance_while(&|x| x.is_alphanumeric() || *x == '_' || *x == '\'');
        let substr = self.get_substr_from_current_range();
        let typ = match Token::get_keyword(substr) {
            Some(typ) => typ,
            None if first.is_uppercase() => T![con],
            None => T![ident],
        };
        self.new_token(typ)
    }
}
