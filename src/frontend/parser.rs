//! Recursive descent parser for the textual form of the intermediate program.
//!
//! Besides building the expression tree the parser performs scoping: a name bound by a
//! parameter, lambda, let or case alternative becomes a `Var`, every other name must be a
//! top-level definition of the module and becomes a `Global`. Constructors are looked up in
//! the data declarations that precede their use.

use std::collections::{HashMap, VecDeque};

use super::{
    ast::{Alt, Binding, DataDecl, Expr, Literal, Module, Name},
    position::Position,
    token::{Token, Type},
};
use crate::{
    backend::{combinator::Combinator, primitive::Primitive},
    error::FrontendError::{self, ParseError},
    T,
};

/// The `Parser` struct is responsible for parsing a queue of tokens into a `Module`.
pub struct Parser<'a> {
    tokens: VecDeque<Token<'a>>,
    /// Names bound by enclosing binders, innermost last.
    locals: Vec<Name>,
    /// Constructor name to (tag, arity, index of its data declaration).
    constructors: HashMap<String, (u32, u32, usize)>,
    datatypes: Vec<DataDecl>,
    /// Every reference to a top-level name, checked once all definitions are known.
    globals_used: Vec<(Name, Position)>,
}

/// Represents the result of most parser functions where either an expression is returned or
/// a parse error occurred and Err is returned.
type ParserResult = Result<Expr, FrontendError>;

impl<'a> Parser<'a> {
    pub fn new(tokens: VecDeque<Token<'a>>) -> Self {
        Self {
            tokens,
            locals: Vec::new(),
            constructors: HashMap::new(),
            datatypes: Vec::new(),
            globals_used: Vec::new(),
        }
    }

    //-------
    // HELPER
    //-------

    /// True if next token is of expected type.
    fn expect_type(&self, t: Type) -> bool {
        self.peek() == &t
    }

    /// Peeks at the type of the token at front of the queue.
    fn peek(&self) -> &Type {
        self.tokens
            .front()
            .map(|token| &token.typ)
            .unwrap_or(&T![eof])
    }

    fn peek_pos(&self) -> Position {
        self.tokens
            .front()
            .map(|token| token.pos)
            .unwrap_or_else(|| Position::new(0, 0, 0))
    }

    /// Pops the first token of the queue. The queue always ends with `Eof` which is never
    /// popped, so this always yields a token.
    fn next(&mut self) -> Token<'a> {
        if self.tokens.len() > 1 {
            if let Some(token) = self.tokens.pop_front() {
                return token;
            }
        }
        self.tokens
            .front()
            .cloned()
            .unwrap_or_else(|| Token::new(T![eof], Position::new(0, 0, 0), "EOF"))
    }

    /// Tries consuming the next token. If the type matches the expected type the token
    /// is returned otherwise a parse error is returned.
    fn consume(&mut self, expected: &Type) -> Result<Token<'a>, FrontendError> {
        let token = self.next();
        if &token.typ == expected {
            Ok(token)
        } else {
            Err(self.token_parse_err(token, &format!("Expected '{}'.", expected)))
        }
    }

    /// Create a parse error with a custom error message.
    fn token_parse_err(&self, token: Token<'a>, err: &str) -> FrontendError {
        ParseError {
            pos: token.pos,
            msg: format!("{} Found {} '{}' instead.", err, token.typ, token.lexeme),
        }
    }

    fn parse_err(&self, pos: Position, err: &str) -> FrontendError {
        ParseError {
            pos,
            msg: err.to_string(),
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.iter().rev().any(|x| x == name)
    }

    /// True if the next token can start an atom of an application.
    fn starts_atom(&self) -> bool {
        matches!(
            self.peek(),
            Type::Identifier
                | Type::Constructor
                | Type::Int(_)
                | Type::Double(_)
                | Type::Char(_)
                | Type::String(_)
                | Type::Primitive(_)
                | Type::LeftParenthese
        )
    }

    /// Collect the names bound by the `letrec` whose first binding starts at the front of the
    /// queue, so that every right hand side can refer to all of them.
    fn peek_letrec_names(&self) -> Vec<Name> {
        let mut names = Vec::new();
        let mut depth = 0usize;
        let mut at_binding = true;
        for token in self.tokens.iter() {
            match &token.typ {
                Type::Identifier if at_binding && depth == 0 => {
                    names.push(token.lexeme.to_string());
                    at_binding = false;
                    continue;
                }
                T!['('] | T!['{'] | T![let] | T![letrec] => depth += 1,
                T![')'] | T!['}'] => depth = depth.saturating_sub(1),
                T![in] if depth == 0 => break,
                T![in] => depth -= 1,
                T![;] if depth == 0 => {
                    at_binding = true;
                    continue;
                }
                T![eof] => break,
                _ => (),
            }
            at_binding = false;
        }
        names
    }

    //--------
    // PARSING
    //--------

    /// Parse the given tokens into a module named `name`.
    pub fn parse(&mut self, name: &str) -> Result<Module, FrontendError> {
        let mut module = Module::new(name);
        loop {
            match self.peek() {
                T![data] => self.parse_data()?,
                T![def] => module.defs.push(self.parse_def()?),
                T![eof] => break,
                _ => {
                    let token = self.next();
                    return Err(self.token_parse_err(token, "Expected 'data' or 'def'."));
                }
            }
        }
        for (global, pos) in self.globals_used.iter() {
            if module.get(global).is_none() {
                return Err(self.parse_err(*pos, &format!("Unbound identifier '{}'.", global)));
            }
        }
        module.datatypes = std::mem::take(&mut self.datatypes);
        Ok(module)
    }

    fn parse_data(&mut self) -> Result<(), FrontendError> {
        self.consume(&T![data])?;
        let name = self.consume(&T![con])?.lexeme.to_string();
        self.consume(&T![=])?;
        let index = self.datatypes.len();
        let mut constructors = Vec::new();
        loop {
            let con = self.consume(&T![con])?;
            let arity = match self.peek().clone() {
                Type::Int(k) if k >= 0 && k <= u32::MAX as i64 => {
                    self.next();
                    k as u32
                }
                Type::Int(_) => {
                    let token = self.next();
                    return Err(self.token_parse_err(token, "Expected a constructor arity."));
                }
                _ => 0,
            };
            let tag = constructors.len() as u32;
            if self
                .constructors
                .insert(con.lexeme.to_string(), (tag, arity, index))
                .is_some()
            {
                return Err(self.parse_err(
                    con.pos,
                    &format!("Constructor '{}' is declared twice.", con.lexeme),
                ));
            }
            constructors.push((con.lexeme.to_string(), arity));
            if self.expect_type(T![|]) {
                self.next();
            } else {
                break;
            }
        }
        self.datatypes.push(DataDecl { name, constructors });
        Ok(())
    }

    fn parse_def(&mut self) -> Result<Binding, FrontendError> {
        self.consume(&T![def])?;
        let name = self.consume(&T![ident])?.lexeme.to_string();
        let params = self.parse_params()?;
        self.consume(&T![=])?;
        self.locals.extend(params.iter().cloned());
        let body = self.parse_expr();
        self.locals.truncate(self.locals.len() - params.len());
        Ok(Binding {
            name,
            params,
            body: body?,
        })
    }

    fn parse_params(&mut self) -> Result<Vec<Name>, FrontendError> {
        let mut params = Vec::new();
        while self.expect_type(T![ident]) {
            params.push(self.next().lexeme.to_string());
        }
        Ok(params)
    }

    pub fn parse_expr(&mut self) -> ParserResult {
        match self.peek() {
            T![lambda] => self.parse_lambda(),
            T![let] => self.parse_let(),
            T![letrec] => self.parse_letrec(),
            T![case] => self.parse_case(),
            _ => self.parse_application(),
        }
    }

    fn parse_lambda(&mut self) -> ParserResult {
        self.consume(&T![lambda])?;
        let params = self.parse_params()?;
        if params.is_empty() {
            let token = self.next();
            return Err(self.token_parse_err(token, "Expected lambda parameter."));
        }
        self.consume(&T![->])?;
        self.locals.extend(params.iter().cloned());
        let body = self.parse_expr();
        self.locals.truncate(self.locals.len() - params.len());
        Ok(Expr::lams(&params, body?))
    }

    /// `name params = expr`, the parameters become lambdas around the right hand side.
    fn parse_bind(&mut self) -> Result<(Name, Expr), FrontendError> {
        let name = self.consume(&T![ident])?.lexeme.to_string();
        let params = self.parse_params()?;
        self.consume(&T![=])?;
        self.locals.extend(params.iter().cloned());
        let rhs = self.parse_expr();
        self.locals.truncate(self.locals.len() - params.len());
        Ok((name, Expr::lams(&params, rhs?)))
    }

    /// A non-recursive `let`. Each binding sees the ones before it.
    fn parse_let(&mut self) -> ParserResult {
        self.consume(&T![let])?;
        let scope = self.locals.len();
        let result = self.parse_let_binds();
        self.locals.truncate(scope);
        let (binds, body) = result?;
        Ok(binds
            .into_iter()
            .rev()
            .fold(body, |body, (x, rhs)| Expr::Let(x, Box::new(rhs), Box::new(body))))
    }

    fn parse_let_binds(&mut self) -> Result<(Vec<(Name, Expr)>, Expr), FrontendError> {
        let mut binds = Vec::new();
        loop {
            let (name, rhs) = self.parse_bind()?;
            self.locals.push(name.clone());
            binds.push((name, rhs));
            if self.expect_type(T![;]) {
                self.next();
            } else {
                break;
            }
        }
        self.consume(&T![in])?;
        let body = self.parse_expr()?;
        Ok((binds, body))
    }

    fn parse_letrec(&mut self) -> ParserResult {
        self.consume(&T![letrec])?;
        let scope = self.locals.len();
        self.locals.extend(self.peek_letrec_names());
        let result = self.parse_letrec_binds();
        self.locals.truncate(scope);
        let (binds, body) = result?;
        Ok(Expr::LetRec(binds, Box::new(body)))
    }

    fn parse_letrec_binds(&mut self) -> Result<(Vec<(Name, Expr)>, Expr), FrontendError> {
        let mut binds = Vec::new();
        loop {
            binds.push(self.parse_bind()?);
            if self.expect_type(T![;]) {
                self.next();
            } else {
                break;
            }
        }
        self.consume(&T![in])?;
        let body = self.parse_expr()?;
        Ok((binds, body))
    }

    fn parse_case(&mut self) -> ParserResult {
        self.consume(&T![case])?;
        let scrut = self.parse_expr()?;
        self.consume(&T![of])?;
        self.consume(&T!['{'])?;
        let mut datatype: Option<usize> = None;
        let mut alts = Vec::new();
        let mut default = None;
        while !self.expect_type(T!['}']) {
            if self.expect_type(T![_]) {
                self.next();
                self.consume(&T![->])?;
                default = Some(Box::new(self.parse_expr()?));
            } else {
                let con = self.consume(&T![con])?;
                let (tag, arity, index) = self.lookup_constructor(&con)?;
                match datatype {
                    Some(d) if d != index => {
                        return Err(self.parse_err(
                            con.pos,
                            &format!(
                                "Constructor '{}' does not belong to type '{}'.",
                                con.lexeme, self.datatypes[d].name
                            ),
                        ))
                    }
                    _ => datatype = Some(index),
                }
                let binders = self.parse_params()?;
                if binders.len() != arity as usize {
                    return Err(self.parse_err(
                        con.pos,
                        &format!(
                            "Constructor '{}' has {} fields but {} are bound.",
                            con.lexeme,
                            arity,
                            binders.len()
                        ),
                    ));
                }
                self.consume(&T![->])?;
                self.locals.extend(binders.iter().cloned());
                let body = self.parse_expr();
                self.locals.truncate(self.locals.len() - binders.len());
                alts.push(Alt {
                    tag,
                    binders,
                    body: body?,
                });
            }
            if self.expect_type(T![;]) {
                self.next();
            } else {
                break;
            }
        }
        let close = self.consume(&T!['}'])?;
        let datatype = datatype.ok_or_else(|| {
            self.parse_err(close.pos, "Case needs at least one constructor alternative.")
        })?;
        Ok(Expr::Case {
            scrut: Box::new(scrut),
            arities: self.datatypes[datatype].arities(),
            alts,
            default,
        })
    }

    fn lookup_constructor(&self, con: &Token<'a>) -> Result<(u32, u32, usize), FrontendError> {
        self.constructors.get(con.lexeme).copied().ok_or_else(|| {
            self.parse_err(con.pos, &format!("Unknown constructor '{}'.", con.lexeme))
        })
    }

    /// `atom { atom }`, optionally ending in a lambda, let or case which then extends as
    /// far as possible.
    fn parse_application(&mut self) -> ParserResult {
        let mut expr = self.parse_atom()?;
        loop {
            if self.starts_atom() {
                expr = Expr::app(expr, self.parse_atom()?);
            } else if matches!(self.peek(), T![lambda] | T![let] | T![letrec] | T![case]) {
                return Ok(Expr::app(expr, self.parse_expr()?));
            } else {
                return Ok(expr);
            }
        }
    }

    fn parse_atom(&mut self) -> ParserResult {
        let pos = self.peek_pos();
        let token = self.next();
        match token.typ {
            Type::Identifier => {
                let name = token.lexeme.to_string();
                if self.is_local(&name) {
                    Ok(Expr::Var(name))
                } else {
                    self.globals_used.push((name.clone(), pos));
                    Ok(Expr::Global(name))
                }
            }
            Type::Constructor => {
                let (tag, arity, _) = self.lookup_constructor(&token)?;
                Ok(Expr::Con { tag, arity })
            }
            Type::Int(n) => Ok(Expr::Lit(Literal::Int(n))),
            Type::Double(x) => Ok(Expr::Lit(Literal::Double(x))),
            Type::Char(c) => Ok(Expr::Lit(Literal::Char(c))),
            Type::String(s) => Ok(Expr::Lit(Literal::Str(s))),
            Type::Primitive(ref name) => {
                if let Some(p) = Primitive::from_name(name) {
                    Ok(Expr::Prim(p))
                } else if let Some(c) = Combinator::from_name(name) {
                    Ok(Expr::Comb(c))
                } else {
                    Err(self.parse_err(pos, &format!("Unknown primitive '#{}'.", name)))
                }
            }
            T!['('] => {
                let expr = self.parse_expr()?;
                self.consume(&T![')'])?;
                Ok(expr)
            }
            _ => Err(self.token_parse_err(
                token,
                "Expected identifier, constructor, literal, primitive or grouped expression.",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::Lexer;

    fn parse(input: &str) -> Result<Module, FrontendError> {
        Parser::new(Lexer::new(input).tokenize()?).parse("Test")
    }

    fn body(input: &str, def: &str) -> String {
        parse(input).unwrap().get(def).unwrap().body.to_string()
    }

    #[test]
    fn test_parse_def() {
        let module = parse("def plus x y = #+ x y\ndef main = plus 1 2").unwrap();
        assert_eq!(module.name, "Test");
        assert_eq!(module.defs.len(), 2);
        let plus = module.get("plus").unwrap();
        assert_eq!(plus.params, vec!["x", "y"]);
        assert_eq!(plus.body.to_string(), "((#+ @ x) @ y)");
        assert_eq!(
            module.get("main").unwrap().body,
            Expr::apply(Expr::global("plus"), [Expr::int(1), Expr::int(2)])
        );
    }

    #[test]
    fn test_parse_let_and_lambda() {
        assert_eq!(
            body("def f x = let y = #* x x; z = y in \\w -> #+ z w", "f"),
            "(let y = ((#* @ x) @ x) in (let z = y in (\\w -> ((#+ @ z) @ w))))"
        );
        // Block arguments extend to the end of the expression.
        assert_eq!(
            body("def main = #IO.>>= #IO.getArgs \\as -> #IO.return as", "main"),
            "((#IO.>>= @ #IO.getArgs) @ (\\as -> (#IO.return @ as)))"
        );
    }

    #[test]
    fn test_parse_letrec_scoping() {
        let module =
            parse("def f n = letrec ev k = odd k; odd k = ev (let a = 1; b = 2 in k) in ev n")
                .unwrap();
        match &module.get("f").unwrap().body {
            Expr::LetRec(binds, body) => {
                assert_eq!(binds.len(), 2);
                assert_eq!(binds[0].0, "ev");
                assert_eq!(binds[1].0, "odd");
                assert_eq!(binds[0].1.to_string(), "(\\k -> (odd @ k))");
                assert_eq!(body.to_string(), "(ev @ n)");
                if let Expr::Lam(_, b) = &binds[0].1 {
                    assert!(matches!(&**b, Expr::App(f, _) if **f == Expr::var("odd")));
                }
            }
            other => panic!("unexpected {}", other),
        }
    }

    #[test]
    fn test_parse_case() {
        let module = parse(
            "data List = Nil | Cons 2\n\
             def len xs = case xs of { Nil -> 0; Cons y ys -> #+ 1 (len ys) }",
        )
        .unwrap();
        assert_eq!(module.datatypes[0].arities(), vec![0, 2]);
        match &module.get("len").unwrap().body {
            Expr::Case {
                arities,
                alts,
                default,
                ..
            } => {
                assert_eq!(arities, &vec![0, 2]);
                assert_eq!(alts.len(), 2);
                assert_eq!(alts[1].tag, 1);
                assert_eq!(alts[1].binders, vec!["y", "ys"]);
                assert!(default.is_none());
            }
            other => panic!("unexpected {}", other),
        }
        assert_eq!(
            body("data B = F | T\ndef main = T", "main"),
            "Con1/0"
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            parse("def main = foo"),
            Err(ParseError { msg, .. }) if msg == "Unbound identifier 'foo'."
        ));
        assert!(matches!(parse("def main = Just 1"), Err(ParseError { .. })));
        assert!(matches!(parse("def main = #nope"), Err(ParseError { .. })));
        assert!(matches!(
            parse("data L = N | C 2\ndef f x = case x of { C a -> a }"),
            Err(ParseError { .. })
        ));
        assert!(matches!(
            parse("data L = N | C 2\ndata B = F | T\ndef f x = case x of { N -> 1; T -> 2 }"),
            Err(ParseError { msg, .. }) if msg == "Constructor 'T' does not belong to type 'L'."
        ));
        assert!(matches!(parse("def f x = (x"), Err(ParseError { .. })));
        assert!(matches!(parse("1"), Err(ParseError { .. })));
    }
}
