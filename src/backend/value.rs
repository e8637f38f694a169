//! Fully evaluated results.
//!
//! Results can be lists of hundreds of thousands of cells, so comparing and dropping a value
//! walks it with a work list instead of recursing along its fields.

use std::{fmt, mem};

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Char(char),
    Double(f64),
    Ptr(u64),
    /// A string literal that was never unpacked.
    Str(String),
    Con { tag: u32, fields: Vec<Value> },
    /// A partial application, described by its head.
    Function(String),
}

impl Value {
    pub fn con(tag: u32) -> Self {
        Value::Con {
            tag,
            fields: Vec::new(),
        }
    }

    pub fn bool(b: bool) -> Self {
        Value::con(b as u32)
    }

    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        let items: Vec<Value> = items.into_iter().collect();
        items.into_iter().rev().fold(Value::con(0), |tail, head| Value::Con {
            tag: 1,
            fields: vec![head, tail],
        })
    }

    pub fn string(s: &str) -> Self {
        Value::list(s.chars().map(Value::Char))
    }

    /// The elements of a cons list (`Con1/2` cells ending in `Con0/0`).
    pub fn as_list(&self) -> Option<Vec<&Value>> {
        let mut items = Vec::new();
        let mut cell = self;
        loop {
            match cell {
                Value::Con { tag: 0, fields } if fields.is_empty() => return Some(items),
                Value::Con { tag: 1, fields } if fields.len() == 2 => {
                    items.push(&fields[0]);
                    cell = &fields[1];
                }
                _ => return None,
            }
        }
    }

    pub fn as_string(&self) -> Option<String> {
        if let Value::Str(s) = self {
            return Some(s.clone());
        }
        self.as_list()?
            .into_iter()
            .map(|v| match v {
                Value::Char(c) => Some(*c),
                _ => None,
            })
            .collect()
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        let mut pending = vec![(self, other)];
        while let Some(pair) = pending.pop() {
            let same = match pair {
                (Value::Int(x), Value::Int(y)) => x == y,
                (Value::Char(x), Value::Char(y)) => x == y,
                (Value::Double(x), Value::Double(y)) => x == y,
                (Value::Ptr(x), Value::Ptr(y)) => x == y,
                (Value::Str(x), Value::Str(y)) => x == y,
                (Value::Function(x), Value::Function(y)) => x == y,
                (Value::Con { tag: t, fields: xs }, Value::Con { tag: u, fields: ys }) => {
                    pending.extend(xs.iter().zip(ys));
                    t == u && xs.len() == ys.len()
                }
                _ => false,
            };
            if !same {
                return false;
            }
        }
        true
    }
}

impl Drop for Value {
    fn drop(&mut self) {
        if let Value::Con { fields, .. } = self {
            let mut pending = mem::take(fields);
            while let Some(mut value) = pending.pop() {
                if let Value::Con { fields, .. } = &mut value {
                    pending.append(fields);
                }
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Char(c) => write!(f, "{:?}", c),
            Value::Double(x) => write!(f, "{:?}", x),
            Value::Ptr(p) => write!(f, "<ptr {:#x}>", p),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Function(head) => write!(f, "<function {}>", head),
            Value::Con { tag, fields } => {
                // Non-empty lists of characters read best as strings.
                if let (Some(items), Some(s)) = (self.as_list(), self.as_string()) {
                    if !items.is_empty() {
                        return write!(f, "{:?}", s);
                    }
                }
                if let Some(items) = self.as_list().filter(|items| !items.is_empty()) {
                    write!(f, "[")?;
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", item)?;
                    }
                    return write!(f, "]");
                }
                if fields.is_empty() {
                    return write!(f, "Con{}", tag);
                }
                write!(f, "(Con{}", tag)?;
                for field in fields {
                    write!(f, " {}", field)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Value::string("hi").to_string(), "\"hi\"");
        assert_eq!(
            Value::list([Value::Int(1), Value::Int(2)]).to_string(),
            "[1, 2]"
        );
        assert_eq!(Value::con(0).to_string(), "Con0");
        assert_eq!(
            Value::Con {
                tag: 2,
                fields: vec![Value::Double(1.0), Value::bool(true)]
            }
            .to_string(),
            "(Con2 1.0 Con1)"
        );
    }

    #[test]
    fn test_long_lists() {
        let long = || Value::list((0..300_000).map(Value::Int));
        let xs = long();
        assert_eq!(xs, long());
        assert_ne!(xs, Value::list((0..300_000).map(|n| Value::Int(n + 1))));
        assert_eq!(xs.as_list().map(|items| items.len()), Some(300_000));
        assert!(xs.to_string().ends_with("299998, 299999]"));
        drop(xs);
    }

    #[test]
    fn test_as_string() {
        assert_eq!(Value::string("abc").as_string().as_deref(), Some("abc"));
        assert_eq!(Value::list([Value::Int(1)]).as_string(), None);
        assert_eq!(Value::Int(1).as_list(), None);
    }
}
