//! Full-text term expression
//!
//! The small syntax the selector consumes (the SQL/DSL parsers hand the raw
//! expression through):
//!
//! - `word` — OR term
//! - `+word` — AND term (must match, subject to proximity)
//! - `-word` — NOT term (excludes documents)
//! - `=word` — exact: no translit/layout/stem variants, no typos
//! - `word*` — suffix wildcard: prefixes of longer words match
//! - `*word` — prefix wildcard: suffix matches allowed
//! - `word~` — force typo lookup for this term
//! - `@field^2.0,other` — field list with boosts for the following terms

use crate::error::{QueryError, Result};
use rustc_hash::FxHashMap;

/// Term combination operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TermOp {
    #[default]
    Or,
    And,
    Not,
}

/// One parsed search term
#[derive(Debug, Clone)]
pub struct FtTerm {
    pub pattern: String,
    pub op: TermOp,
    pub exact: bool,
    /// `word*`: the pattern may be a prefix of an indexed word
    pub prefix_allowed: bool,
    /// `*word`: the pattern may match a suffix of an indexed word
    pub suffix_allowed: bool,
    pub typos_forced: bool,
    pub boost: f64,
    /// Max position distance to the previous AND term
    pub distance: u32,
    /// Per-field boosts from the `@field^boost` clause; empty = all fields
    pub field_boosts: FxHashMap<String, f64>,
}

impl FtTerm {
    fn new(pattern: String) -> Self {
        Self {
            pattern,
            op: TermOp::Or,
            exact: false,
            prefix_allowed: false,
            suffix_allowed: false,
            typos_forced: false,
            boost: 1.0,
            distance: 100,
            field_boosts: FxHashMap::default(),
        }
    }
}

/// Parsed term expression
#[derive(Debug, Clone, Default)]
pub struct FtQuery {
    pub terms: Vec<FtTerm>,
}

/// Parse a full-text expression
pub fn parse_ft_expression(expr: &str) -> Result<FtQuery> {
    let mut terms = Vec::new();
    let mut active_fields: FxHashMap<String, f64> = FxHashMap::default();
    for raw in expr.split_whitespace() {
        if let Some(fields) = raw.strip_prefix('@') {
            active_fields.clear();
            for part in fields.split(',') {
                if part.is_empty() {
                    continue;
                }
                match part.split_once('^') {
                    Some((name, boost)) => {
                        let boost: f64 = boost.parse().map_err(|_| {
                            QueryError::invalid_query(format!("bad field boost '{}'", part))
                        })?;
                        active_fields.insert(name.to_string(), boost);
                    }
                    None => {
                        active_fields.insert(part.to_string(), 1.0);
                    }
                }
            }
            continue;
        }
        let mut tok = raw;
        let mut term = FtTerm::new(String::new());
        loop {
            if let Some(rest) = tok.strip_prefix('+') {
                term.op = TermOp::And;
                tok = rest;
            } else if let Some(rest) = tok.strip_prefix('-') {
                term.op = TermOp::Not;
                tok = rest;
            } else if let Some(rest) = tok.strip_prefix('=') {
                term.exact = true;
                tok = rest;
            } else if let Some(rest) = tok.strip_prefix('*') {
                term.suffix_allowed = true;
                tok = rest;
            } else {
                break;
            }
        }
        if let Some(rest) = tok.strip_suffix('*') {
            term.prefix_allowed = true;
            tok = rest;
        }
        if let Some(rest) = tok.strip_suffix('~') {
            term.typos_forced = true;
            tok = rest;
        }
        if tok.is_empty() {
            return Err(QueryError::invalid_query(format!(
                "empty full-text term in '{}'",
                expr
            )));
        }
        term.pattern = tok.to_lowercase();
        term.field_boosts = active_fields.clone();
        terms.push(term);
    }
    if terms.is_empty() {
        return Err(QueryError::invalid_query("empty full-text expression"));
    }
    Ok(FtQuery { terms })
}
