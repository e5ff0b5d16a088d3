//! Restricted expression language
//!
//! Conditions and inline code are compiled into a small AST and interpreted
//! against a variable map. The grammar has no I/O, no attribute access beyond
//! map keys, and a fixed function table, so an expression can only read the
//! variables it is given.
//!
//! ```text
//! expr     := or
//! or       := and (("or" | "||") and)*
//! and      := not (("and" | "&&") not)*
//! not      := ("not" | "!") not | compare
//! compare  := sum (("==" | "!=" | "<" | "<=" | ">" | ">=" | "in" | "not in") sum)?
//! sum      := product (("+" | "-") product)*
//! product  := unary (("*" | "/" | "%") unary)*
//! unary    := "-" unary | postfix
//! postfix  := primary ("." IDENT | "[" expr "]" | "(" args ")")*
//! primary  := NUMBER | STRING | true | false | null | IDENT | "(" expr ")"
//!           | "[" items "]" | "{" pairs "}"
//! program  := (IDENT "=" expr) ((";" | NEWLINE) IDENT "=" expr)*
//! ```

mod eval;
mod parser;

use serde_json::Value;
use std::collections::HashMap;

pub use eval::{is_truthy, Interpreter};
pub use parser::{parse_expression, parse_program};

/// Errors raised while compiling or evaluating an expression
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExprError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Type error: {0}")]
    Type(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Expression nesting exceeds {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
    And,
    Or,
}

/// Compiled expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Map(Vec<(String, Expr)>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

/// `name = expr`
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub target: String,
    pub value: Expr,
}

/// Parse and evaluate an expression in one go
pub fn eval_str(source: &str, vars: &HashMap<String, Value>) -> Result<Value, ExprError> {
    let expr = parse_expression(source)?;
    Interpreter::new(vars).eval(&expr)
}

/// Run a program of assignments against a copy of `vars`.
///
/// Returns the bindings assigned by the program, in assignment order, with
/// later assignments to the same name replacing earlier ones.
pub fn run_program(
    source: &str,
    vars: &HashMap<String, Value>,
) -> Result<Vec<(String, Value)>, ExprError> {
    let program = parse_program(source)?;
    let mut scope = vars.clone();
    let mut assigned: Vec<(String, Value)> = Vec::new();

    for statement in &program {
        let value = Interpreter::new(&scope).eval(&statement.value)?;
        scope.insert(statement.target.clone(), value.clone());
        match assigned.iter_mut().find(|(name, _)| name == &statement.target) {
            Some(slot) => slot.1 = value,
            None => assigned.push((statement.target.clone(), value)),
        }
    }

    Ok(assigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_eval_str() {
        let mut vars = HashMap::new();
        vars.insert("n".to_string(), json!(4));
        assert_eq!(eval_str("n * 2 + 1", &vars).unwrap(), json!(9));
    }

    #[test]
    fn test_run_program_sees_earlier_assignments() {
        let vars = HashMap::new();
        let assigned = run_program("a = 2\nb = a * 10; a = a + 1", &vars).unwrap();
        assert_eq!(
            assigned,
            vec![("a".to_string(), json!(3)), ("b".to_string(), json!(20))]
        );
    }

    #[test]
    fn test_run_program_reads_variables() {
        let mut vars = HashMap::new();
        vars.insert("scores".to_string(), json!([3, 9, 4]));
        let assigned = run_program("result = {\"best\": max(scores)}", &vars).unwrap();
        assert_eq!(assigned[0].1, json!({"best": 9}));
    }
}
