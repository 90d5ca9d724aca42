//! scalegrid-expr — rule expressions for reactive scaling.
//!
//! Scaling rules are operator-supplied strings such as
//! `(cpu_avg < 20) * 3`. They are parsed once when the configuration is
//! loaded and evaluated every loop iteration against a set of bindings
//! (usually a metric snapshot). Nothing here ever hands operator text to a
//! host interpreter: the grammar is closed and evaluated by walking a tree.
//!
//! # Grammar
//!
//! ```text
//! expr       := or
//! or         := and ( "or" and )*
//! and        := not ( "and" not )*
//! not        := "not" not | comparison
//! comparison := additive ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" ) additive )?
//! additive   := term ( ( "+" | "-" ) term )*
//! term       := unary ( ( "*" | "/" ) unary )*
//! unary      := "-" unary | primary
//! primary    := NUMBER | "true" | "false" | IDENT | "(" expr ")"
//! ```
//!
//! Every value is a number. Comparisons and logical operators produce
//! `1` or `0`, and any non-zero value counts as true.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

pub use ast::{Bindings, BinaryOp, Node, UnaryOp};
pub use error::{EvaluationError, ParseError};

/// A parsed rule expression.
///
/// Cheap to evaluate repeatedly; parsing happens once in [`Expression::parse`].
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    source: String,
    root: Node,
    identifiers: BTreeSet<String>,
}

impl Expression {
    /// Parse an expression, rejecting anything outside the grammar.
    pub fn parse(source: &str) -> Result<Self, ParseError> {
        let root = parser::parse(source)?;
        let mut identifiers = BTreeSet::new();
        root.collect_identifiers(&mut identifiers);
        Ok(Self {
            source: source.to_string(),
            root,
            identifiers,
        })
    }

    /// The text this expression was parsed from.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Root of the expression tree.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Every identifier the expression references, sorted.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.identifiers.iter().map(String::as_str)
    }

    /// Evaluate against `bindings`.
    ///
    /// Unknown identifiers, division by zero, and non-finite results are
    /// errors. Callers must treat an error as "no signal", never as zero.
    pub fn evaluate<B: Bindings + ?Sized>(&self, bindings: &B) -> Result<f64, EvaluationError> {
        let value = self.root.eval(bindings)?;
        if !value.is_finite() {
            return Err(EvaluationError::NonFinite(value));
        }
        Ok(value)
    }

    /// Evaluate and truncate toward zero, yielding a unit count.
    pub fn evaluate_delta<B: Bindings + ?Sized>(&self, bindings: &B) -> Result<i64, EvaluationError> {
        let value = self.evaluate(bindings)?.trunc();
        // Saturating float-to-int cast; the value is already known finite.
        Ok(value as i64)
    }
}

impl FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn bindings(pairs: &[(&str, f64)]) -> HashMap<String, f64> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn identifiers_are_collected_once() {
        let expr = Expression::parse("cpu < 20 and (cpu > 5 or mem.free > 0.5)").unwrap();
        let ids: Vec<&str> = expr.identifiers().collect();
        assert_eq!(ids, vec!["cpu", "mem.free"]);
    }

    #[test]
    fn comparison_times_magnitude() {
        let expr = Expression::parse("(cpu_avg < 20) * 3").unwrap();
        assert_eq!(expr.evaluate_delta(&bindings(&[("cpu_avg", 12.0)])).unwrap(), 3);
        assert_eq!(expr.evaluate_delta(&bindings(&[("cpu_avg", 40.0)])).unwrap(), 0);
    }

    #[test]
    fn delta_truncates_toward_zero() {
        let expr = Expression::parse("x / 2").unwrap();
        assert_eq!(expr.evaluate_delta(&bindings(&[("x", 5.0)])).unwrap(), 2);
        assert_eq!(expr.evaluate_delta(&bindings(&[("x", -5.0)])).unwrap(), -2);
    }

    #[test]
    fn missing_identifier_is_an_error_not_zero() {
        let expr = Expression::parse("cpu_avg < 20").unwrap();
        let err = expr.evaluate(&bindings(&[])).unwrap_err();
        assert_eq!(err, EvaluationError::UnknownIdentifier("cpu_avg".to_string()));
    }

    #[test]
    fn evaluation_is_deterministic() {
        let expr = Expression::parse("(load / nodes > 0.75) * (nodes / 4 + 1)").unwrap();
        let snap = bindings(&[("load", 31.0), ("nodes", 10.0)]);
        let first = expr.evaluate(&snap).unwrap();
        for _ in 0..100 {
            assert_eq!(expr.evaluate(&snap).unwrap(), first);
        }
    }

    #[test]
    fn display_is_canonical() {
        let expr = Expression::parse("not a<1 and b+2*c>=4").unwrap();
        assert_eq!(expr.to_string(), "((not (a < 1)) and ((b + (2 * c)) >= 4))");
        // Rendering parses back to the same tree.
        let reparsed = Expression::parse(&expr.to_string()).unwrap();
        assert_eq!(reparsed.root(), expr.root());
    }

    #[test]
    fn from_str_parses() {
        let expr: Expression = "1 + 1".parse().unwrap();
        assert_eq!(expr.source(), "1 + 1");
        assert!("1 +".parse::<Expression>().is_err());
    }
}
