//! Expression tree and its evaluator.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use crate::error::EvaluationError;

/// Name resolution for identifiers referenced by an expression.
pub trait Bindings {
    /// Value bound to `name`, or `None` if the name is unknown.
    fn lookup(&self, name: &str) -> Option<f64>;
}

impl Bindings for HashMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl Bindings for BTreeMap<String, f64> {
    fn lookup(&self, name: &str) -> Option<f64> {
        self.get(name).copied()
    }
}

impl<B: Bindings + ?Sized> Bindings for &B {
    fn lookup(&self, name: &str) -> Option<f64> {
        (**self).lookup(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
        }
    }

    #[allow(clippy::float_cmp)]
    fn apply(self, lhs: f64, rhs: f64) -> Result<f64, EvaluationError> {
        let value = match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => {
                if rhs == 0.0 {
                    return Err(EvaluationError::DivisionByZero);
                }
                lhs / rhs
            }
            BinaryOp::Eq => truth(lhs == rhs),
            BinaryOp::Ne => truth(lhs != rhs),
            BinaryOp::Lt => truth(lhs < rhs),
            BinaryOp::Le => truth(lhs <= rhs),
            BinaryOp::Gt => truth(lhs > rhs),
            BinaryOp::Ge => truth(lhs >= rhs),
            BinaryOp::And => truth(lhs != 0.0 && rhs != 0.0),
            BinaryOp::Or => truth(lhs != 0.0 || rhs != 0.0),
        };
        Ok(value)
    }
}

/// A node of the expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Number(f64),
    Ident(String),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

impl Node {
    /// Evaluate the subtree rooted here.
    ///
    /// Both operands of `and`/`or` are always evaluated so that a missing
    /// metric surfaces as an error regardless of the other operand.
    pub fn eval<B: Bindings + ?Sized>(&self, bindings: &B) -> Result<f64, EvaluationError> {
        match self {
            Node::Number(value) => Ok(*value),
            Node::Ident(name) => bindings
                .lookup(name)
                .ok_or_else(|| EvaluationError::UnknownIdentifier(name.clone())),
            Node::Unary(UnaryOp::Neg, operand) => Ok(-operand.eval(bindings)?),
            Node::Unary(UnaryOp::Not, operand) => Ok(truth(operand.eval(bindings)? == 0.0)),
            Node::Binary(op, lhs, rhs) => {
                let lhs = lhs.eval(bindings)?;
                let rhs = rhs.eval(bindings)?;
                op.apply(lhs, rhs)
            }
        }
    }

    pub(crate) fn collect_identifiers(&self, out: &mut BTreeSet<String>) {
        match self {
            Node::Number(_) => {}
            Node::Ident(name) => {
                out.insert(name.clone());
            }
            Node::Unary(_, operand) => operand.collect_identifiers(out),
            Node::Binary(_, lhs, rhs) => {
                lhs.collect_identifiers(out);
                rhs.collect_identifiers(out);
            }
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Number(value) => write!(f, "{value}"),
            Node::Ident(name) => f.write_str(name),
            Node::Unary(UnaryOp::Neg, operand) => write!(f, "(-{operand})"),
            Node::Unary(UnaryOp::Not, operand) => write!(f, "(not {operand})"),
            Node::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}

fn truth(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(v: f64) -> Box<Node> {
        Box::new(Node::Number(v))
    }

    fn ident(name: &str) -> Box<Node> {
        Box::new(Node::Ident(name.to_string()))
    }

    #[test]
    fn arithmetic() {
        let empty: HashMap<String, f64> = HashMap::new();
        let node = Node::Binary(
            BinaryOp::Sub,
            num(10.0),
            Box::new(Node::Binary(BinaryOp::Mul, num(2.0), num(3.0))),
        );
        assert_eq!(node.eval(&empty).unwrap(), 4.0);
    }

    #[test]
    fn division_by_zero() {
        let mut snap = HashMap::new();
        snap.insert("nodes".to_string(), 0.0);
        let node = Node::Binary(BinaryOp::Div, num(1.0), ident("nodes"));
        assert_eq!(node.eval(&snap).unwrap_err(), EvaluationError::DivisionByZero);
    }

    #[test]
    fn logical_operators_use_truthiness() {
        let empty: BTreeMap<String, f64> = BTreeMap::new();
        let and = Node::Binary(BinaryOp::And, num(2.0), num(-1.0));
        let or = Node::Binary(BinaryOp::Or, num(0.0), num(0.0));
        let not = Node::Unary(UnaryOp::Not, num(0.0));
        assert_eq!(and.eval(&empty).unwrap(), 1.0);
        assert_eq!(or.eval(&empty).unwrap(), 0.0);
        assert_eq!(not.eval(&empty).unwrap(), 1.0);
    }

    #[test]
    fn or_does_not_hide_missing_metric() {
        let empty: BTreeMap<String, f64> = BTreeMap::new();
        let node = Node::Binary(BinaryOp::Or, num(1.0), ident("cpu"));
        assert_eq!(
            node.eval(&empty).unwrap_err(),
            EvaluationError::UnknownIdentifier("cpu".to_string())
        );
    }

    #[test]
    fn comparisons() {
        let empty: BTreeMap<String, f64> = BTreeMap::new();
        let cases = [
            (BinaryOp::Eq, 1.0, 1.0, 1.0),
            (BinaryOp::Ne, 1.0, 1.0, 0.0),
            (BinaryOp::Lt, 1.0, 2.0, 1.0),
            (BinaryOp::Le, 2.0, 2.0, 1.0),
            (BinaryOp::Gt, 1.0, 2.0, 0.0),
            (BinaryOp::Ge, 3.0, 2.0, 1.0),
        ];
        for (op, lhs, rhs, expected) in cases {
            let node = Node::Binary(op, num(lhs), num(rhs));
            assert_eq!(node.eval(&empty).unwrap(), expected, "{}", op.symbol());
        }
    }
}
