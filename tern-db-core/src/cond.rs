//! Filter conditions
//!
//! [`CondType`] is the condition vocabulary shared by indexes, the query
//! model, and comparator fallbacks. [`match_values`] is the reference
//! evaluation used wherever an index lookup is not available: it tests the
//! multi-valued row side against the condition's value list.

use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition applied by a filter entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CondType {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    Range,
    Set,
    AllSet,
    Any,
    Empty,
    Like,
    DWithin,
}

impl fmt::Display for CondType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CondType::Eq => "=",
            CondType::Lt => "<",
            CondType::Le => "<=",
            CondType::Gt => ">",
            CondType::Ge => ">=",
            CondType::Range => "RANGE",
            CondType::Set => "IN",
            CondType::AllSet => "ALLSET",
            CondType::Any => "ANY",
            CondType::Empty => "EMPTY",
            CondType::Like => "LIKE",
            CondType::DWithin => "DWITHIN",
        };
        f.write_str(s)
    }
}

/// Case handling for string comparisons
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollateMode {
    #[default]
    None,
    /// ASCII case-insensitive
    Ascii,
}

fn value_eq(a: &Value, b: &Value, collate: CollateMode) -> bool {
    match (a, b, collate) {
        (Value::String(x), Value::String(y), CollateMode::Ascii) => x.eq_ignore_ascii_case(y),
        _ => a == b,
    }
}

fn value_cmp(a: &Value, b: &Value, collate: CollateMode) -> std::cmp::Ordering {
    match (a, b, collate) {
        (Value::String(x), Value::String(y), CollateMode::Ascii) => x
            .to_ascii_lowercase()
            .cmp(&y.to_ascii_lowercase()),
        _ => a.cmp(b),
    }
}

/// SQL-ish LIKE: `%` matches any run, `_` matches one character
fn like_match(text: &str, pattern: &str) -> bool {
    fn inner(t: &[char], p: &[char]) -> bool {
        match p.first() {
            None => t.is_empty(),
            Some('%') => (0..=t.len()).any(|i| inner(&t[i..], &p[1..])),
            Some('_') => !t.is_empty() && inner(&t[1..], &p[1..]),
            Some(c) => t.first() == Some(c) && inner(&t[1..], &p[1..]),
        }
    }
    let t: Vec<char> = text.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    inner(&t, &p)
}

/// Great-circle-free planar distance check for DWithin: row values are
/// 2-element point tuples, condition is `[point, radius]`.
fn dwithin_match(row: &Value, cond: &[Value]) -> bool {
    let point = |v: &Value| -> Option<(f64, f64)> {
        if let Value::Tuple(parts) = v {
            if parts.len() == 2 {
                let x = match &parts[0] {
                    Value::Double(d) => *d,
                    Value::Int(i) => *i as f64,
                    Value::Int64(i) => *i as f64,
                    _ => return None,
                };
                let y = match &parts[1] {
                    Value::Double(d) => *d,
                    Value::Int(i) => *i as f64,
                    Value::Int64(i) => *i as f64,
                    _ => return None,
                };
                return Some((x, y));
            }
        }
        None
    };
    let (Some((rx, ry)), Some(center), Some(radius)) = (
        point(row),
        cond.first().and_then(point),
        cond.get(1).and_then(|v| match v {
            Value::Double(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            Value::Int64(i) => Some(*i as f64),
            _ => None,
        }),
    ) else {
        return false;
    };
    let dx = rx - center.0;
    let dy = ry - center.1;
    (dx * dx + dy * dy).sqrt() <= radius
}

/// Test a row's field values against a condition.
///
/// `row_values` holds every value of the field for this row (one element for
/// scalars, possibly many for arrays); the condition matches when ANY row
/// value satisfies it, except `AllSet`/`Empty` which quantify differently.
pub fn match_values(
    cond: CondType,
    row_values: &[&Value],
    cond_values: &[Value],
    collate: CollateMode,
) -> bool {
    match cond {
        CondType::Any => row_values.iter().any(|v| !matches!(v, Value::Null)),
        CondType::Empty => row_values.iter().all(|v| matches!(v, Value::Null)),
        CondType::Eq => cond_values.first().is_some_and(|c| {
            row_values.iter().any(|v| value_eq(v, c, collate))
        }),
        CondType::Set => row_values
            .iter()
            .any(|v| cond_values.iter().any(|c| value_eq(v, c, collate))),
        CondType::AllSet => cond_values
            .iter()
            .all(|c| row_values.iter().any(|v| value_eq(v, c, collate))),
        CondType::Lt => cond_values.first().is_some_and(|c| {
            row_values
                .iter()
                .any(|v| value_cmp(v, c, collate) == std::cmp::Ordering::Less)
        }),
        CondType::Le => cond_values.first().is_some_and(|c| {
            row_values
                .iter()
                .any(|v| value_cmp(v, c, collate) != std::cmp::Ordering::Greater)
        }),
        CondType::Gt => cond_values.first().is_some_and(|c| {
            row_values
                .iter()
                .any(|v| value_cmp(v, c, collate) == std::cmp::Ordering::Greater)
        }),
        CondType::Ge => cond_values.first().is_some_and(|c| {
            row_values
                .iter()
                .any(|v| value_cmp(v, c, collate) != std::cmp::Ordering::Less)
        }),
        CondType::Range => {
            let (Some(lo), Some(hi)) = (cond_values.first(), cond_values.get(1)) else {
                return false;
            };
            row_values.iter().any(|v| {
                value_cmp(v, lo, collate) != std::cmp::Ordering::Less
                    && value_cmp(v, hi, collate) != std::cmp::Ordering::Greater
            })
        }
        CondType::Like => cond_values.first().is_some_and(|c| {
            let Value::String(pattern) = c else {
                return false;
            };
            row_values.iter().any(|v| {
                if let Value::String(s) = v {
                    like_match(s, pattern)
                } else {
                    false
                }
            })
        }),
        CondType::DWithin => row_values.iter().any(|v| dwithin_match(v, cond_values)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vals(vs: &[Value]) -> Vec<&Value> {
        vs.iter().collect()
    }

    #[test]
    fn eq_and_set() {
        let row = [Value::Int(3)];
        assert!(match_values(CondType::Eq, &vals(&row), &[Value::Int(3)], CollateMode::None));
        assert!(match_values(
            CondType::Set,
            &vals(&row),
            &[Value::Int(1), Value::Int(3)],
            CollateMode::None
        ));
        assert!(!match_values(CondType::Set, &vals(&row), &[Value::Int(5)], CollateMode::None));
    }

    #[test]
    fn allset_quantifies_over_cond_values() {
        let row = [Value::Int(1), Value::Int(2), Value::Int(3)];
        assert!(match_values(
            CondType::AllSet,
            &vals(&row),
            &[Value::Int(1), Value::Int(3)],
            CollateMode::None
        ));
        assert!(!match_values(
            CondType::AllSet,
            &vals(&row),
            &[Value::Int(1), Value::Int(9)],
            CollateMode::None
        ));
    }

    #[test]
    fn range_bounds_inclusive() {
        let row = [Value::Int(5)];
        assert!(match_values(
            CondType::Range,
            &vals(&row),
            &[Value::Int(5), Value::Int(10)],
            CollateMode::None
        ));
        assert!(!match_values(
            CondType::Range,
            &vals(&row),
            &[Value::Int(6), Value::Int(10)],
            CollateMode::None
        ));
    }

    #[test]
    fn like_wildcards() {
        assert!(like_match("hello world", "hello%"));
        assert!(like_match("hello", "h_llo"));
        assert!(!like_match("hello", "h_lo"));
        assert!(like_match("abc", "%"));
    }

    #[test]
    fn collate_ascii() {
        let row = [Value::String("Alpha".into())];
        assert!(match_values(
            CondType::Eq,
            &vals(&row),
            &[Value::String("alpha".into())],
            CollateMode::Ascii
        ));
    }

    #[test]
    fn dwithin() {
        let row = [Value::Tuple(vec![Value::Double(1.0), Value::Double(1.0)])];
        let cond = [
            Value::Tuple(vec![Value::Double(0.0), Value::Double(0.0)]),
            Value::Double(2.0),
        ];
        assert!(match_values(CondType::DWithin, &vals(&row), &cond, CollateMode::None));
    }
}
