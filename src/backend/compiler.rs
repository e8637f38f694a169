use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

use tracing::{debug, info, trace};

use super::{
    abstractor::{bracket, bracket_all, find_var},
    cache::CacheStore,
    combinator::Combinator,
    lift::Lifter,
    program::{CExpr, CExprPtr, Definition, Program, ENTRY_POINT},
    wire::Image,
};
use crate::{
    app, comb,
    error::{Error, TranslateError},
    frontend::{
        ast::{Alt, Expr, Literal, Module},
        parse_module,
    },
    prim,
};

/// Translates modules into combinator definitions.
pub struct Compiler {
    lifter: Lifter,
    /// Every top-level name of the module being compiled, lifted ones included.
    globals: HashSet<String>,
    /// Definition currently being translated, for error reports.
    current: String,
    counter: usize,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            lifter: Lifter::new(),
            globals: HashSet::new(),
            current: String::new(),
            counter: 0,
        }
    }

    /// Lift, abstract and annotate every definition of `module`.
    pub fn compile_module(&mut self, module: &Module) -> Result<Program, TranslateError> {
        let mut seen = HashSet::new();
        for binding in module.defs.iter() {
            if !seen.insert(binding.name.as_str()) {
                return Err(TranslateError::DuplicateDefinition(binding.name.clone()));
            }
        }

        self.lifter = Lifter::new();
        let bindings = self.lifter.lift_module(module);
        self.globals = bindings.iter().map(|b| b.name.clone()).collect();

        let mut defs = Vec::with_capacity(bindings.len());
        for binding in bindings.iter() {
            self.current = binding.name.clone();
            let body = self.translate(&binding.body)?;
            let body = bracket_all(&binding.params, body);
            if let Some(var) = find_var(&body) {
                return Err(TranslateError::FreeVariable {
                    def: binding.name.clone(),
                    var: var.to_string(),
                });
            }
            defs.push(Definition {
                name: binding.name.clone(),
                arity: 0,
                body,
            });
        }
        annotate_arities(&mut defs);

        for def in defs.iter() {
            debug!(name = %def.name, arity = def.arity, "compiled definition");
            trace!("{} = {}", def.name, def.body);
        }
        info!(module = %module.name, definitions = defs.len(), "compiled module");

        let entry = defs
            .iter()
            .any(|d| d.name == ENTRY_POINT)
            .then(|| ENTRY_POINT.to_string());
        Ok(Program {
            module: module.name.clone(),
            defs,
            entry,
        })
    }

    /// Compile `source` as module `name`, reusing the cached image when the source has not
    /// changed since it was stored.
    pub fn compile_source(
        &mut self,
        name: &str,
        source: &str,
        cache: &mut CacheStore,
    ) -> Result<Image, Error> {
        if let Some(image) = cache.lookup(name, source) {
            return Ok(image);
        }
        let module = parse_module(name, source)?;
        let program = self.compile_module(&module)?;
        let image = Image::from_program(&program)?;
        cache.insert(name, source, image.clone());
        cache.flush()?;
        Ok(image)
    }

    fn fresh(&mut self, base: &str) -> String {
        self.counter += 1;
        format!("{}~{}", base, self.counter)
    }

    fn translate(&mut self, expr: &Expr) -> Result<CExprPtr, TranslateError> {
        Ok(match expr {
            Expr::Var(x) => Rc::new(CExpr::Var(x.clone())),
            Expr::Global(name) => {
                if !self.globals.contains(name) {
                    return Err(TranslateError::UnknownGlobal {
                        def: self.current.clone(),
                        name: name.clone(),
                    });
                }
                Rc::new(CExpr::Global(name.clone()))
            }
            // Strings are unpacked lazily at run time.
            Expr::Lit(lit @ Literal::Str(_)) => app!(prim!(Unpack), Rc::new(CExpr::Lit(lit.clone()))),
            Expr::Lit(lit) => Rc::new(CExpr::Lit(lit.clone())),
            Expr::Prim(p) => Rc::new(CExpr::Prim(*p)),
            Expr::Comb(c) => Rc::new(CExpr::Comb(*c)),
            Expr::Con { tag, arity } => Rc::new(CExpr::Comb(Combinator::Con {
                tag: *tag,
                arity: *arity,
            })),
            Expr::App(f, a) => app!(self.translate(f)?, self.translate(a)?),
            Expr::Lam(x, body) => bracket(x, self.translate(body)?),
            // `([x]body) rhs` keeps the right hand side a single argument node.
            Expr::Let(x, rhs, body) => app!(bracket(x, self.translate(body)?), self.translate(rhs)?),
            Expr::LetRec(binds, body) => {
                let desugared = self
                    .lifter
                    .desugar_group(binds.clone(), (**body).clone());
                self.translate(&desugared)?
            }
            Expr::Case {
                scrut,
                arities,
                alts,
                default,
            } => self.translate_case(scrut, arities, alts, default.as_deref())?,
        })
    }

    /// `Case n scrut alt0 .. alt(n-1)` with one slot per constructor of the type.
    fn translate_case(
        &mut self,
        scrut: &Expr,
        arities: &[u32],
        alts: &[Alt],
        default: Option<&Expr>,
    ) -> Result<CExprPtr, TranslateError> {
        let n = arities.len();
        let mut slots: Vec<Option<CExprPtr>> = vec![None; n];
        for alt in alts.iter() {
            let expected = *arities
                .get(alt.tag as usize)
                .ok_or(TranslateError::UnknownTag {
                    tag: alt.tag,
                    constructors: n,
                })?;
            if alt.binders.len() != expected as usize {
                return Err(TranslateError::BinderMismatch {
                    tag: alt.tag,
                    expected,
                    found: alt.binders.len(),
                });
            }
            let slot = &mut slots[alt.tag as usize];
            if slot.is_some() {
                return Err(TranslateError::DuplicateAlternative(alt.tag));
            }
            let body = self.translate(&alt.body)?;
            *slot = Some(bracket_all(&alt.binders, body));
        }

        let missing = slots.iter().filter(|s| s.is_none()).count();
        let default = default.map(|d| self.translate(d)).transpose()?;
        // A default used by several slots that still mentions variables is bound once,
        // otherwise every slot would get its own copy after abstraction.
        let (default, shared) = match default {
            Some(d) if missing > 1 && matches!(*d, CExpr::App(..)) && find_var(&d).is_some() => {
                let x = self.fresh("$d");
                (Some(Rc::new(CExpr::Var(x.clone()))), Some((x, d)))
            }
            d => (d, None),
        };

        let head = Rc::new(CExpr::Comb(Combinator::Case(n as u32)));
        let mut case = app!(head, self.translate(scrut)?);
        for (slot, arity) in slots.into_iter().zip(arities) {
            let alt = match (slot, &default) {
                (Some(alt), _) => alt,
                (None, Some(d)) => (0..*arity).fold(Rc::clone(d), |d, _| app!(comb!(K), d)),
                (None, None) => prim!(NoMatch),
            };
            case = app!(case, alt);
        }

        Ok(match shared {
            Some((x, d)) => app!(bracket(&x, case), d),
            None => case,
        })
    }
}

/// Record for each definition how many arguments its spine needs before it fires.
fn annotate_arities(defs: &mut [Definition]) {
    let arities = {
        let defs: &[Definition] = defs;
        let mut table = ArityTable {
            defs,
            index: defs
                .iter()
                .enumerate()
                .map(|(i, d)| (d.name.as_str(), i))
                .collect(),
            memo: vec![None; defs.len()],
            visiting: vec![false; defs.len()],
        };
        (0..defs.len()).map(|i| table.arity(i)).collect::<Vec<usize>>()
    };
    for (def, arity) in defs.iter_mut().zip(arities) {
        def.arity = arity;
    }
}

struct ArityTable<'d> {
    defs: &'d [Definition],
    index: HashMap<&'d str, usize>,
    memo: Vec<Option<usize>>,
    visiting: Vec<bool>,
}

impl<'d> ArityTable<'d> {
    fn arity(&mut self, i: usize) -> usize {
        if let Some(arity) = self.memo[i] {
            return arity;
        }
        // A definition that is an alias of itself through other definitions.
        if self.visiting[i] {
            return 0;
        }
        self.visiting[i] = true;
        let (head, args) = self.defs[i].body.spine();
        let head_arity = match head {
            CExpr::Comb(c) => c.arity().unwrap_or(0),
            CExpr::Prim(p) if p.is_io() => 0,
            CExpr::Prim(p) => p.arity(),
            CExpr::Global(name) => match self.index.get(name.as_str()) {
                Some(&j) => self.arity(j),
                None => 0,
            },
            _ => 0,
        };
        let arity = head_arity.saturating_sub(args);
        self.visiting[i] = false;
        self.memo[i] = Some(arity);
        arity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::ast::Binding;

    fn compile(src: &str) -> Program {
        Compiler::new()
            .compile_module(&parse_module("M", src).unwrap())
            .unwrap()
    }

    fn compile_err(defs: Vec<Binding>) -> TranslateError {
        let module = Module {
            name: "M".to_string(),
            datatypes: vec![],
            defs,
        };
        Compiler::new().compile_module(&module).unwrap_err()
    }

    #[test]
    fn test_compile_functions() {
        let program = compile("def plus x y = #+ x y\ndef twice f x = f (f x)");
        let plus = program.get("plus").unwrap();
        assert_eq!(plus.body.to_string(), "+");
        assert_eq!(plus.arity, 2);
        let twice = program.get("twice").unwrap();
        assert_eq!(twice.body.to_string(), "((S @ B) @ I)");
        assert_eq!(twice.arity, 1);
        assert_eq!(program.entry, None);
    }

    #[test]
    fn test_let_is_one_shared_argument() {
        let program = compile("def main = let y = #tick 1 (#* 6 7) in #+ y y");
        let main = program.get("main").unwrap();
        assert_eq!(
            main.body.to_string(),
            "(((S @ +) @ I) @ ((tick @ 1) @ ((* @ 6) @ 7)))"
        );
        assert_eq!(main.arity, 0);
        assert_eq!(program.entry.as_deref(), Some("main"));
    }

    #[test]
    fn test_strings_are_unpacked() {
        let program = compile("def s = \"hi\"");
        assert_eq!(program.get("s").unwrap().body.to_string(), "(fromUTF8 @ \"hi\")");
    }

    #[test]
    fn test_case_translation() {
        let program = compile("data L = N | C 2\ndef hd xs = case xs of { C h t -> h; N -> 0 }");
        let hd = program.get("hd").unwrap();
        assert_eq!(hd.body.to_string(), "((C @ ((C @ Case2) @ 0)) @ K)");
        assert_eq!(hd.arity, 1);

        // A missing alternative without a default fails at run time.
        let program = compile("data B = F | T\ndef g x = case x of { T -> 1 }");
        assert!(program.get("g").unwrap().body.to_string().contains("noMatch"));
    }

    #[test]
    fn test_default_is_shared_between_slots() {
        let program = compile(
            "data T = A | B 1 | D 2\n\
             def f x = case x of { A -> 1; _ -> #+ x 1 }",
        );
        let body = program.get("f").unwrap().body.to_string();
        assert_eq!(body.matches('+').count(), 1, "{}", body);
        assert!(body.contains("Case3"));
    }

    #[test]
    fn test_lifted_definitions_are_globals() {
        let program = compile("def f n k = letrec go i = #+ (go i) (#+ n k) in go 0");
        let names: Vec<_> = program.defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["f", "f$go$5"]);
        assert!(program.get("f").unwrap().body.to_string().contains("f$go$5"));
    }

    #[test]
    fn test_value_recursion_uses_y() {
        let program = compile("data L = N | C 2\ndef ones = letrec xs = C 1 xs in xs");
        let ones = program.get("ones").unwrap().body.to_string();
        assert!(ones.contains('Y'), "{}", ones);
        assert!(find_var(&program.get("ones").unwrap().body).is_none());
    }

    #[test]
    fn test_arity_through_globals() {
        let program = compile("def k = #seq\ndef h = k 1\ndef f x = g x\ndef g x = f x");
        assert_eq!(program.get("k").unwrap().arity, 2);
        assert_eq!(program.get("h").unwrap().arity, 1);
        // An alias cycle never fires on its own.
        assert_eq!(program.get("f").unwrap().arity, 0);
        assert_eq!(program.get("g").unwrap().arity, 0);
    }

    #[test]
    fn test_translation_errors() {
        let case = |tag, binders: &[&str], arities: Vec<u32>| {
            Binding::new(
                "f",
                &["x"],
                Expr::Case {
                    scrut: Box::new(Expr::var("x")),
                    arities,
                    alts: vec![Alt {
                        tag,
                        binders: binders.iter().map(|b| b.to_string()).collect(),
                        body: Expr::int(1),
                    }],
                    default: None,
                },
            )
        };
        assert_eq!(
            compile_err(vec![case(3, &[], vec![0])]),
            TranslateError::UnknownTag {
                tag: 3,
                constructors: 1
            }
        );
        assert_eq!(
            compile_err(vec![case(0, &["a"], vec![2])]),
            TranslateError::BinderMismatch {
                tag: 0,
                expected: 2,
                found: 1
            }
        );
        let mut dup = case(0, &[], vec![0, 0]);
        if let Expr::Case { alts, .. } = &mut dup.body {
            alts.push(alts[0].clone());
        }
        assert_eq!(
            compile_err(vec![dup]),
            TranslateError::DuplicateAlternative(0)
        );
        assert_eq!(
            compile_err(vec![Binding::new("f", &[], Expr::var("y"))]),
            TranslateError::FreeVariable {
                def: "f".to_string(),
                var: "y".to_string()
            }
        );
        assert_eq!(
            compile_err(vec![Binding::new("f", &[], Expr::global("nope"))]),
            TranslateError::UnknownGlobal {
                def: "f".to_string(),
                name: "nope".to_string()
            }
        );
        assert_eq!(
            compile_err(vec![
                Binding::new("f", &[], Expr::int(1)),
                Binding::new("f", &[], Expr::int(2))
            ]),
            TranslateError::DuplicateDefinition("f".to_string())
        );
    }

    #[test]
    fn test_compile_source_uses_cache() {
        let mut cache = CacheStore::in_memory();
        let mut compiler = Compiler::new();
        let first = compiler
            .compile_source("M", "def main = #+ 1 2", &mut cache)
            .unwrap();
        assert!(cache.lookup("M", "def main = #+ 1 2").is_some());
        let again = compiler
            .compile_source("M", "def main = #+ 1 2", &mut cache)
            .unwrap();
        assert_eq!(first, again);
        assert!(compiler
            .compile_source("M", "def main = oops", &mut cache)
            .is_err());
    }
}
