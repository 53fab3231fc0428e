//! Argument atoms: the scalar/sequence/range value generators used to
//! parameterise modifications (component C).

use crate::errors::ArgumentError;
use std::fmt;

/// One concrete value a modification argument can take. Kept generic over
/// `int` and `str` so the same atom machinery backs both kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Str(String),
    None,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::None => write!(f, "none"),
        }
    }
}

impl Value {
    pub fn as_int(&self) -> Result<i64, ArgumentError> {
        match self {
            Value::Int(i) => Ok(*i),
            other => Err(ArgumentError::TypeMismatch {
                expected: "int",
                got: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> Result<&str, ArgumentError> {
        match self {
            Value::Str(s) => Ok(s),
            other => Err(ArgumentError::TypeMismatch {
                expected: "str",
                got: other.to_string(),
            }),
        }
    }
}

/// A generator producing one or more concrete [`Value`]s. Cardinality of an
/// atom determines how many concrete tests it contributes to the expander's
/// Cartesian product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    /// Yields exactly one value.
    Scalar(Value),
    /// Yields each value in order.
    Seq(Vec<Value>),
    /// Yields `start, start+step, ..` while `< stop`.
    Range { start: i64, stop: i64, step: i64 },
    /// Yields the single absent value.
    Absent,
}

impl Atom {
    /// Number of concrete values this atom will yield.
    pub fn cardinality(&self) -> usize {
        match self {
            Atom::Scalar(_) => 1,
            Atom::Seq(values) => values.len(),
            Atom::Range { start, stop, step } => range_len(*start, *stop, *step),
            Atom::Absent => 1,
        }
    }

    /// Materialises every concrete value this atom yields, in order.
    pub fn values(&self) -> Vec<Value> {
        match self {
            Atom::Scalar(v) => vec![v.clone()],
            Atom::Seq(values) => values.clone(),
            Atom::Range { start, stop, step } => range_values(*start, *stop, *step)
                .into_iter()
                .map(Value::Int)
                .collect(),
            Atom::Absent => vec![Value::None],
        }
    }

    /// Parses one `mod_opts` token (already split on the leading type
    /// keyword by the caller) into an atom per the §4.E grammar.
    pub fn parse(tokens: &[&str]) -> Result<Atom, ArgumentError> {
        let Some((&kw, rest)) = tokens.split_first() else {
            return Err(ArgumentError::Empty);
        };
        match kw {
            "none" => Ok(Atom::Absent),
            "int" => {
                let [tok] = rest else {
                    return Err(ArgumentError::WrongArity {
                        kind: "int",
                        expected: "1",
                        got: rest.len(),
                    });
                };
                Ok(Atom::Scalar(Value::Int(parse_int(tok)?)))
            }
            "str" => {
                let [tok] = rest else {
                    return Err(ArgumentError::WrongArity {
                        kind: "str",
                        expected: "1",
                        got: rest.len(),
                    });
                };
                Ok(Atom::Scalar(Value::Str((*tok).to_owned())))
            }
            "seq_int" => {
                if rest.is_empty() {
                    return Err(ArgumentError::WrongArity {
                        kind: "seq_int",
                        expected: ">=1",
                        got: 0,
                    });
                }
                let values = rest
                    .iter()
                    .map(|t| parse_int(t).map(Value::Int))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Atom::Seq(values))
            }
            "seq_str" => {
                if rest.is_empty() {
                    return Err(ArgumentError::WrongArity {
                        kind: "seq_str",
                        expected: ">=1",
                        got: 0,
                    });
                }
                Ok(Atom::Seq(rest.iter().map(|t| Value::Str((*t).to_owned())).collect()))
            }
            "range" => {
                let ints = rest
                    .iter()
                    .map(|t| parse_int(t))
                    .collect::<Result<Vec<_>, _>>()?;
                let (start, stop, step) = match ints[..] {
                    [stop] => (0, stop, 1),
                    [start, stop] => (start, stop, 1),
                    [start, stop, step] => (start, stop, step),
                    _ => {
                        return Err(ArgumentError::WrongArity {
                            kind: "range",
                            expected: "1..=3",
                            got: ints.len(),
                        })
                    }
                };
                if step == 0 {
                    return Err(ArgumentError::InvalidRange {
                        reason: "step must not be 0".into(),
                    });
                }
                Ok(Atom::Range { start, stop, step })
            }
            // No recognised type prefix: a bare token is a scalar of its
            // natural kind (int if it parses as one, string otherwise).
            _ => {
                if tokens.len() != 1 {
                    return Err(ArgumentError::WrongArity {
                        kind: "scalar",
                        expected: "1",
                        got: tokens.len(),
                    });
                }
                match parse_int(kw) {
                    Ok(i) => Ok(Atom::Scalar(Value::Int(i))),
                    Err(_) => Ok(Atom::Scalar(Value::Str(kw.to_owned()))),
                }
            }
        }
    }
}

fn parse_int(tok: &str) -> Result<i64, ArgumentError> {
    tok.parse::<i64>().map_err(|_| ArgumentError::NotAnInt {
        token: tok.to_owned(),
    })
}

fn range_len(start: i64, stop: i64, step: i64) -> usize {
    if step > 0 {
        if stop <= start {
            0
        } else {
            (((stop - start - 1) / step) + 1) as usize
        }
    } else if step < 0 {
        if stop >= start {
            0
        } else {
            (((start - stop - 1) / (-step)) + 1) as usize
        }
    } else {
        0
    }
}

fn range_values(start: i64, stop: i64, step: i64) -> Vec<i64> {
    let mut out = Vec::with_capacity(range_len(start, stop, step));
    let mut v = start;
    if step > 0 {
        while v < stop {
            out.push(v);
            v += step;
        }
    } else if step < 0 {
        while v > stop {
            out.push(v);
            v += step;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_atoms() {
        assert_eq!(
            Atom::parse(&["int", "5"]).unwrap(),
            Atom::Scalar(Value::Int(5))
        );
        assert_eq!(
            Atom::parse(&["seq_int", "1", "2", "3"]).unwrap().cardinality(),
            3
        );
        assert_eq!(Atom::parse(&["none"]).unwrap(), Atom::Absent);
        assert_eq!(
            Atom::parse(&["str", "random"]).unwrap(),
            Atom::Scalar(Value::Str("random".into()))
        );
    }

    #[test]
    fn bare_token_infers_kind() {
        assert_eq!(Atom::parse(&["42"]).unwrap(), Atom::Scalar(Value::Int(42)));
        assert_eq!(
            Atom::parse(&["random"]).unwrap(),
            Atom::Scalar(Value::Str("random".into()))
        );
    }

    #[test]
    fn range_variants_match_spec_grammar() {
        assert_eq!(
            Atom::parse(&["range", "5"]).unwrap(),
            Atom::Range { start: 0, stop: 5, step: 1 }
        );
        let atom = Atom::parse(&["range", "50", "151", "50"]).unwrap();
        assert_eq!(atom.cardinality(), 3);
        assert_eq!(
            atom.values(),
            vec![Value::Int(50), Value::Int(100), Value::Int(150)]
        );
    }

    #[test]
    fn range_step_zero_is_rejected() {
        assert!(Atom::parse(&["range", "0", "10", "0"]).is_err());
    }
}
