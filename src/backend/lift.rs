//! Lambda lifting.
//!
//! Before bracket abstraction every definition is flattened so that recursion only happens
//! through top-level names or the fixed point combinator:
//!
//! 1. All local binders are renamed to unique names (`x~n`) so later substitutions can not
//!    capture anything.
//! 2. A `letrec` group whose right hand sides are all lambdas is lifted to new top-level
//!    definitions named `owner$name$n`. The free variables of the group become leading
//!    parameters, in sorted order, and every use of a group member becomes the new global
//!    applied to those variables.
//! 3. Any other recursive group is rewritten with `Y`. A single binding becomes
//!    `let x = Y (\x -> e)`, a larger group is tied through a tuple
//!    `t = Y (\t -> Con0/n e1 .. en)` whose members are selected by `case`, so every member is
//!    still a single shared node.
//!
//! Non-recursive lets of lambdas are left in place: abstracting them keeps more sharing than
//! turning them into globals.

use std::collections::{BTreeSet, HashMap};

use crate::backend::combinator::Combinator;
use crate::frontend::ast::{Alt, Binding, Expr, Module, Name};

/// Variables occurring free in `expr`. Globals are not variables.
pub fn free_vars(expr: &Expr) -> BTreeSet<Name> {
    let mut fvs = BTreeSet::new();
    collect_free_vars(expr, &mut Vec::new(), &mut fvs);
    fvs
}

fn collect_free_vars(expr: &Expr, bound: &mut Vec<Name>, fvs: &mut BTreeSet<Name>) {
    match expr {
        Expr::Var(x) => {
            if !bound.contains(x) {
                fvs.insert(x.clone());
            }
        }
        Expr::Global(_) | Expr::Lit(_) | Expr::Prim(_) | Expr::Comb(_) | Expr::Con { .. } => (),
        Expr::App(f, a) => {
            collect_free_vars(f, bound, fvs);
            collect_free_vars(a, bound, fvs);
        }
        Expr::Lam(x, body) => {
            bound.push(x.clone());
            collect_free_vars(body, bound, fvs);
            bound.pop();
        }
        Expr::Let(x, rhs, body) => {
            collect_free_vars(rhs, bound, fvs);
            bound.push(x.clone());
            collect_free_vars(body, bound, fvs);
            bound.pop();
        }
        Expr::LetRec(binds, body) => {
            let scope = bound.len();
            bound.extend(binds.iter().map(|(x, _)| x.clone()));
            for (_, rhs) in binds {
                collect_free_vars(rhs, bound, fvs);
            }
            collect_free_vars(body, bound, fvs);
            bound.truncate(scope);
        }
        Expr::Case {
            scrut,
            alts,
            default,
            ..
        } => {
            collect_free_vars(scrut, bound, fvs);
            for alt in alts {
                let scope = bound.len();
                bound.extend(alt.binders.iter().cloned());
                collect_free_vars(&alt.body, bound, fvs);
                bound.truncate(scope);
            }
            if let Some(d) = default {
                collect_free_vars(d, bound, fvs);
            }
        }
    }
}

/// Replace free occurrences of the variables in `map`. Binders are unique after renaming, so
/// no occurrence can be captured.
fn substitute(expr: Expr, map: &HashMap<Name, Expr>) -> Expr {
    match expr {
        Expr::Var(x) => match map.get(&x) {
            Some(e) => e.clone(),
            None => Expr::Var(x),
        },
        Expr::App(f, a) => Expr::app(substitute(*f, map), substitute(*a, map)),
        Expr::Lam(x, body) => Expr::Lam(x, Box::new(substitute(*body, map))),
        Expr::Let(x, rhs, body) => Expr::Let(
            x,
            Box::new(substitute(*rhs, map)),
            Box::new(substitute(*body, map)),
        ),
        Expr::LetRec(binds, body) => Expr::LetRec(
            binds
                .into_iter()
                .map(|(x, rhs)| (x, substitute(rhs, map)))
                .collect(),
            Box::new(substitute(*body, map)),
        ),
        Expr::Case {
            scrut,
            arities,
            alts,
            default,
        } => Expr::Case {
            scrut: Box::new(substitute(*scrut, map)),
            arities,
            alts: alts
                .into_iter()
                .map(|alt| Alt {
                    body: substitute(alt.body, map),
                    ..alt
                })
                .collect(),
            default: default.map(|d| Box::new(substitute(*d, map))),
        },
        other => other,
    }
}

/// Strip the uniqueness suffix added by renaming.
fn base_name(name: &str) -> &str {
    name.split('~').next().unwrap_or(name)
}

pub struct Lifter {
    counter: usize,
    lifted: Vec<Binding>,
}

impl Default for Lifter {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifter {
    pub fn new() -> Self {
        Self {
            counter: 0,
            lifted: Vec::new(),
        }
    }

    fn fresh(&mut self, base: &str) -> Name {
        self.counter += 1;
        format!("{}~{}", base, self.counter)
    }

    /// Lift every definition of `module`. Lifted definitions follow the definition they were
    /// lifted out of.
    pub fn lift_module(&mut self, module: &Module) -> Vec<Binding> {
        let mut out = Vec::with_capacity(module.defs.len());
        for binding in module.defs.iter() {
            let (params, body) = self.rename_binding(binding);
            let body = self.lift(body, &binding.name);
            out.push(Binding {
                name: binding.name.clone(),
                params,
                body,
            });
            out.append(&mut self.lifted);
        }
        out
    }

    fn rename_binding(&mut self, binding: &Binding) -> (Vec<Name>, Expr) {
        let mut env = Vec::new();
        let params: Vec<Name> = binding
            .params
            .iter()
            .map(|p| {
                let fresh = self.fresh(p);
                env.push((p.clone(), fresh.clone()));
                fresh
            })
            .collect();
        let body = self.rename(&binding.body, &mut env);
        (params, body)
    }

    /// Give every binder a unique name. `env` maps source names to their current renaming,
    /// innermost last.
    fn rename(&mut self, expr: &Expr, env: &mut Vec<(Name, Name)>) -> Expr {
        match expr {
            Expr::Var(x) => Expr::Var(
                env.iter()
                    .rev()
                    .find(|(from, _)| from == x)
                    .map(|(_, to)| to.clone())
                    .unwrap_or_else(|| x.clone()),
            ),
            Expr::App(f, a) => Expr::app(self.rename(f, env), self.rename(a, env)),
            Expr::Lam(x, body) => {
                let fresh = self.fresh(x);
                env.push((x.clone(), fresh.clone()));
                let body = self.rename(body, env);
                env.pop();
                Expr::Lam(fresh, Box::new(body))
            }
            Expr::Let(x, rhs, body) => {
                let rhs = self.rename(rhs, env);
                let fresh = self.fresh(x);
                env.push((x.clone(), fresh.clone()));
                let body = self.rename(body, env);
                env.pop();
                Expr::Let(fresh, Box::new(rhs), Box::new(body))
            }
            Expr::LetRec(binds, body) => {
                let scope = env.len();
                let names: Vec<Name> = binds
                    .iter()
                    .map(|(x, _)| {
                        let fresh = self.fresh(x);
                        env.push((x.clone(), fresh.clone()));
                        fresh
                    })
                    .collect();
                let binds = names
                    .into_iter()
                    .zip(binds.iter())
                    .map(|(name, (_, rhs))| (name, self.rename(rhs, env)))
                    .collect();
                let body = self.rename(body, env);
                env.truncate(scope);
                Expr::LetRec(binds, Box::new(body))
            }
            Expr::Case {
                scrut,
                arities,
                alts,
                default,
            } => {
                let scrut = self.rename(scrut, env);
                let alts = alts
                    .iter()
                    .map(|alt| {
                        let scope = env.len();
                        let binders = alt
                            .binders
                            .iter()
                            .map(|b| {
                                let fresh = self.fresh(b);
                                env.push((b.clone(), fresh.clone()));
                                fresh
                            })
                            .collect();
                        let body = self.rename(&alt.body, env);
                        env.truncate(scope);
                        Alt {
                            tag: alt.tag,
                            binders,
                            body,
                        }
                    })
                    .collect();
                let default = default.as_ref().map(|d| Box::new(self.rename(d, env)));
                Expr::Case {
                    scrut: Box::new(scrut),
                    arities: arities.clone(),
                    alts,
                    default,
                }
            }
            other => other.clone(),
        }
    }

    /// Lift the recursive groups of `expr`, innermost first.
    fn lift(&mut self, expr: Expr, owner: &str) -> Expr {
        match expr {
            Expr::App(f, a) => Expr::app(self.lift(*f, owner), self.lift(*a, owner)),
            Expr::Lam(x, body) => Expr::Lam(x, Box::new(self.lift(*body, owner))),
            Expr::Let(x, rhs, body) => Expr::Let(
                x,
                Box::new(self.lift(*rhs, owner)),
                Box::new(self.lift(*body, owner)),
            ),
            Expr::Case {
                scrut,
                arities,
                alts,
                default,
            } => Expr::Case {
                scrut: Box::new(self.lift(*scrut, owner)),
                arities,
                alts: alts
                    .into_iter()
                    .map(|alt| Alt {
                        body: self.lift(alt.body, owner),
                        ..alt
                    })
                    .collect(),
                default: default.map(|d| Box::new(self.lift(*d, owner))),
            },
            Expr::LetRec(binds, body) => {
                let binds: Vec<(Name, Expr)> = binds
                    .into_iter()
                    .map(|(x, rhs)| (x, self.lift(rhs, owner)))
                    .collect();
                let body = self.lift(*body, owner);
                if binds.iter().all(|(_, rhs)| matches!(rhs, Expr::Lam(..))) {
                    self.lift_group(binds, body, owner)
                } else {
                    self.desugar_group(binds, body)
                }
            }
            other => other,
        }
    }

    fn lift_group(&mut self, binds: Vec<(Name, Expr)>, body: Expr, owner: &str) -> Expr {
        let names: BTreeSet<&Name> = binds.iter().map(|(x, _)| x).collect();
        let captured: Vec<Name> = binds
            .iter()
            .flat_map(|(_, rhs)| free_vars(rhs))
            .filter(|x| !names.contains(x))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut map = HashMap::new();
        let mut globals = Vec::with_capacity(binds.len());
        for (x, _) in binds.iter() {
            self.counter += 1;
            let global = format!("{}${}${}", owner, base_name(x), self.counter);
            let call = Expr::apply(
                Expr::Global(global.clone()),
                captured.iter().map(|v| Expr::Var(v.clone())),
            );
            map.insert(x.clone(), call);
            globals.push(global);
        }

        for (global, (_, rhs)) in globals.into_iter().zip(binds) {
            let mut params = captured.clone();
            let mut body = substitute(rhs, &map);
            while let Expr::Lam(x, inner) = body {
                params.push(x);
                body = *inner;
            }
            self.lifted.push(Binding {
                name: global,
                params,
                body,
            });
        }
        substitute(body, &map)
    }

    /// Rewrite a recursive group that binds values with the fixed point combinator.
    pub(crate) fn desugar_group(&mut self, binds: Vec<(Name, Expr)>, body: Expr) -> Expr {
        if binds.len() == 1 {
            let mut binds = binds;
            let (x, rhs) = binds.remove(0);
            if !free_vars(&rhs).contains(&x) {
                return Expr::Let(x, Box::new(rhs), Box::new(body));
            }
            let inner = self.fresh(base_name(&x));
            let rhs = substitute(rhs, &HashMap::from([(x.clone(), Expr::Var(inner.clone()))]));
            let fix = Expr::app(Expr::Comb(Combinator::Y), Expr::Lam(inner, Box::new(rhs)));
            return Expr::Let(x, Box::new(fix), Box::new(body));
        }

        let n = binds.len();
        let tuple = self.fresh("$t");
        let inner_tuple = self.fresh("$t");
        // Inside the fixed point the members are selected from the tuple under fresh names.
        let inner_names: Vec<Name> = binds.iter().map(|(x, _)| self.fresh(base_name(x))).collect();
        let map: HashMap<Name, Expr> = binds
            .iter()
            .zip(inner_names.iter())
            .map(|((x, _), y)| (x.clone(), Expr::Var(y.clone())))
            .collect();
        let names: Vec<Name> = binds.iter().map(|(x, _)| x.clone()).collect();

        let con = Expr::Con {
            tag: 0,
            arity: n as u32,
        };
        let fields = binds.into_iter().map(|(_, rhs)| substitute(rhs, &map));
        let tuple_body = self.select_all(&inner_names, &inner_tuple, Expr::apply(con, fields));
        let fix = Expr::app(
            Expr::Comb(Combinator::Y),
            Expr::Lam(inner_tuple, Box::new(tuple_body)),
        );
        let body = self.select_all(&names, &tuple, body);
        Expr::Let(tuple, Box::new(fix), Box::new(body))
    }

    /// `let x1 = sel1 t in .. let xn = seln t in body`
    fn select_all(&mut self, names: &[Name], tuple: &str, body: Expr) -> Expr {
        let n = names.len();
        let selectors: Vec<Expr> = (0..n).map(|i| self.select(i, n, tuple)).collect();
        names
            .iter()
            .zip(selectors)
            .rev()
            .fold(body, |body, (x, sel)| {
                Expr::Let(x.clone(), Box::new(sel), Box::new(body))
            })
    }

    /// `case t of { Con0/n y1 .. yn -> yi }`
    fn select(&mut self, i: usize, n: usize, tuple: &str) -> Expr {
        let binders: Vec<Name> = (0..n).map(|_| self.fresh("$y")).collect();
        let body = Expr::Var(binders[i].clone());
        Expr::Case {
            scrut: Box::new(Expr::var(tuple)),
            arities: vec![n as u32],
            alts: vec![Alt {
                tag: 0,
                binders,
                body,
            }],
            default: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_module;

    fn lift(src: &str) -> Vec<Binding> {
        Lifter::new().lift_module(&parse_module("M", src).unwrap())
    }

    #[test]
    fn test_free_vars() {
        let e = Expr::lam(
            "x",
            Expr::apply(Expr::var("f"), [Expr::var("x"), Expr::var("y")]),
        );
        let fvs: Vec<_> = free_vars(&e).into_iter().collect();
        assert_eq!(fvs, vec!["f", "y"]);
        let e = Expr::let_("y", Expr::var("y"), Expr::var("y"));
        assert_eq!(free_vars(&e).len(), 1);
    }

    #[test]
    fn test_rename_makes_binders_unique() {
        let defs = lift("def f x = \\x -> x");
        assert_eq!(defs[0].params, vec!["x~1"]);
        assert_eq!(defs[0].body.to_string(), "(\\x~2 -> x~2)");
    }

    #[test]
    fn test_lift_function_group() {
        let defs = lift("def f n k = letrec go i = #+ (go i) (#+ n k) in go 0");
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "f");
        let go = &defs[1];
        assert_eq!(go.name, "f$go$5");
        // Captured variables come first, in sorted order, then the lambda's own parameter.
        assert_eq!(go.params, vec!["k~2", "n~1", "i~4"]);
        assert_eq!(
            go.body.to_string(),
            "((#+ @ (((f$go$5 @ k~2) @ n~1) @ i~4)) @ ((#+ @ n~1) @ k~2))"
        );
        assert_eq!(defs[0].body.to_string(), "(((f$go$5 @ k~2) @ n~1) @ 0)");
    }

    #[test]
    fn test_desugar_value_recursion() {
        let defs = lift("data L = N | C 2\ndef ones = letrec xs = C 1 xs in xs");
        assert_eq!(defs.len(), 1);
        assert_eq!(
            defs[0].body.to_string(),
            "(let xs~1 = (#Y @ (\\xs~2 -> ((Con1/2 @ 1) @ xs~2))) in xs~1)"
        );
        // A binding that does not refer to itself is just a let.
        let defs = lift("def v = letrec a = 1 in a");
        assert_eq!(defs[0].body.to_string(), "(let a~1 = 1 in a~1)");
    }

    #[test]
    fn test_desugar_mutual_value_recursion() {
        let defs = lift("data L = N | C 2\ndef ab = letrec a = C 1 b; b = C 2 a in a");
        let body = &defs[0].body;
        assert!(free_vars(body).is_empty());
        match body {
            Expr::Let(t, fix, rest) => {
                assert!(t.starts_with("$t~"));
                assert!(matches!(&**fix, Expr::App(y, _) if **y == Expr::Comb(Combinator::Y)));
                // Both members are selected from the tuple outside the fixed point.
                assert!(matches!(&**rest, Expr::Let(a, sel, _) if a == "a~1"
                    && matches!(&**sel, Expr::Case { arities, .. } if arities == &vec![2])));
            }
            other => panic!("unexpected {}", other),
        }
    }
}
