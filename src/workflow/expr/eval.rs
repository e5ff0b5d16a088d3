//! Tree-walking interpreter with a fixed table of safe functions

use serde_json::{Map, Number, Value};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::{BinaryOp, Expr, ExprError, UnaryOp};

/// Python-style truthiness
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

fn type_error(message: impl Into<String>) -> ExprError {
    ExprError::Type(message.into())
}

fn float_value(f: f64) -> Result<Value, ExprError> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| type_error("arithmetic produced a non-finite number"))
}

/// Numeric view of a value; bools count as 0/1 like in Python
#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(value: &Value) -> Option<Num> {
        match value {
            Value::Bool(b) => Some(Num::Int(i64::from(*b))),
            Value::Number(n) => n
                .as_i64()
                .map(Num::Int)
                .or_else(|| n.as_f64().map(Num::Float)),
            _ => None,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

fn compare(left: &Value, right: &Value) -> Result<Ordering, ExprError> {
    if let (Some(a), Some(b)) = (Num::of(left), Num::of(right)) {
        return a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .ok_or_else(|| type_error("cannot order NaN"));
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match compare(x, y)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(a.len().cmp(&b.len()))
        }
        _ => Err(type_error(format!(
            "cannot order {} and {}",
            type_name(left),
            type_name(right)
        ))),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(_) | Value::Bool(_), Value::Number(_) | Value::Bool(_)) => {
            match (Num::of(left), Num::of(right)) {
                (Some(a), Some(b)) => a.as_f64() == b.as_f64(),
                _ => false,
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => left == right,
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match (op, left, right) {
        (BinaryOp::Add, Value::String(a), Value::String(b)) => {
            return Ok(Value::String(format!("{}{}", a, b)))
        }
        (BinaryOp::Add, Value::Array(a), Value::Array(b)) => {
            return Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
        }
        _ => {}
    }

    let (a, b) = match (Num::of(left), Num::of(right)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(type_error(format!(
                "unsupported operand types for {:?}: {} and {}",
                op,
                type_name(left),
                type_name(right)
            )))
        }
    };

    match (op, a, b) {
        (BinaryOp::Div, _, _) => {
            if b.as_f64() == 0.0 {
                return Err(ExprError::DivisionByZero);
            }
            float_value(a.as_f64() / b.as_f64())
        }
        (BinaryOp::Mod, _, _) if b.as_f64() == 0.0 => Err(ExprError::DivisionByZero),
        (_, Num::Int(x), Num::Int(y)) => {
            let result = match op {
                BinaryOp::Add => x.checked_add(y),
                BinaryOp::Sub => x.checked_sub(y),
                BinaryOp::Mul => x.checked_mul(y),
                BinaryOp::Mod => x.checked_rem_euclid(y),
                _ => None,
            };
            result
                .map(Value::from)
                .ok_or_else(|| type_error("integer overflow"))
        }
        _ => {
            let (x, y) = (a.as_f64(), b.as_f64());
            let result = match op {
                BinaryOp::Add => x + y,
                BinaryOp::Sub => x - y,
                BinaryOp::Mul => x * y,
                BinaryOp::Mod => x.rem_euclid(y),
                _ => return Err(type_error(format!("{:?} is not arithmetic", op))),
            };
            float_value(result)
        }
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, ExprError> {
    match container {
        Value::Array(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::String(s) => match item {
            Value::String(needle) => Ok(s.contains(needle.as_str())),
            other => Err(type_error(format!(
                "'in <string>' requires a string, got {}",
                type_name(other)
            ))),
        },
        Value::Object(map) => match item {
            Value::String(key) => Ok(map.contains_key(key)),
            other => Err(type_error(format!(
                "map keys are strings, got {}",
                type_name(other)
            ))),
        },
        other => Err(type_error(format!(
            "argument of type {} is not a container",
            type_name(other)
        ))),
    }
}

fn index(target: &Value, key: &Value) -> Result<Value, ExprError> {
    match (target, key) {
        (Value::Object(map), Value::String(k)) => map
            .get(k)
            .cloned()
            .ok_or_else(|| type_error(format!("missing key '{}'", k))),
        (Value::Array(_) | Value::String(_), Value::Number(_)) => {
            let i = match Num::of(key) {
                Some(Num::Int(i)) => i,
                _ => return Err(type_error("indices must be integers")),
            };
            let items: Vec<Value> = match target {
                Value::Array(items) => items.clone(),
                Value::String(s) => s.chars().map(|c| Value::String(c.to_string())).collect(),
                _ => Vec::new(),
            };
            let len = items.len() as i64;
            let resolved = if i < 0 { len + i } else { i };
            if resolved < 0 || resolved >= len {
                return Err(type_error(format!("index {} out of range", i)));
            }
            Ok(items[resolved as usize].clone())
        }
        _ => Err(type_error(format!(
            "cannot index {} with {}",
            type_name(target),
            type_name(key)
        ))),
    }
}

/// Iterate the elements of a list argument, or the argument list itself
fn sequence<'v>(name: &str, args: &'v [Value]) -> Result<&'v [Value], ExprError> {
    match args {
        [Value::Array(items)] => Ok(items),
        [single] => Err(type_error(format!(
            "{}() expects a list, got {}",
            name,
            type_name(single)
        ))),
        many => Ok(many),
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), ExprError> {
    if args.len() != expected {
        return Err(type_error(format!(
            "{}() takes {} argument(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn call(name: &str, args: &[Value]) -> Result<Value, ExprError> {
    match name {
        "len" => {
            arity(name, args, 1)?;
            let len = match &args[0] {
                Value::String(s) => s.chars().count(),
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                other => {
                    return Err(type_error(format!(
                        "object of type {} has no len()",
                        type_name(other)
                    )))
                }
            };
            Ok(Value::from(len as u64))
        }
        "min" | "max" => {
            let items = sequence(name, args)?;
            let mut best: Option<&Value> = None;
            for item in items {
                best = match best {
                    None => Some(item),
                    Some(current) => {
                        let ord = compare(item, current)?;
                        let better = if name == "min" {
                            ord == Ordering::Less
                        } else {
                            ord == Ordering::Greater
                        };
                        Some(if better { item } else { current })
                    }
                };
            }
            best.cloned()
                .ok_or_else(|| type_error(format!("{}() of an empty sequence", name)))
        }
        "sum" => {
            let items = sequence(name, args)?;
            items
                .iter()
                .try_fold(Value::from(0), |acc, item| arithmetic(BinaryOp::Add, &acc, item))
        }
        "all" => Ok(Value::Bool(sequence(name, args)?.iter().all(is_truthy))),
        "any" => Ok(Value::Bool(sequence(name, args)?.iter().any(is_truthy))),
        "abs" => {
            arity(name, args, 1)?;
            match Num::of(&args[0]) {
                Some(Num::Int(i)) => i
                    .checked_abs()
                    .map(Value::from)
                    .ok_or_else(|| type_error("integer overflow")),
                Some(Num::Float(f)) => float_value(f.abs()),
                None => Err(type_error(format!(
                    "bad operand type for abs(): {}",
                    type_name(&args[0])
                ))),
            }
        }
        "round" => {
            if args.is_empty() || args.len() > 2 {
                return Err(type_error("round() takes 1 or 2 arguments"));
            }
            let value = Num::of(&args[0])
                .ok_or_else(|| type_error("round() requires a number"))?
                .as_f64();
            match args.get(1).map(Num::of) {
                None => Ok(Value::from(value.round() as i64)),
                Some(Some(Num::Int(digits))) => {
                    let factor = 10f64.powi(digits as i32);
                    float_value((value * factor).round() / factor)
                }
                Some(_) => Err(type_error("round() digits must be an integer")),
            }
        }
        "int" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::String(s) => s
                    .trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .or_else(|_| {
                        s.trim()
                            .parse::<f64>()
                            .map(|f| Value::from(f.trunc() as i64))
                    })
                    .map_err(|_| type_error(format!("invalid literal for int(): '{}'", s))),
                other => match Num::of(other) {
                    Some(Num::Int(i)) => Ok(Value::from(i)),
                    Some(Num::Float(f)) => Ok(Value::from(f.trunc() as i64)),
                    None => Err(type_error(format!(
                        "int() argument must be a string or number, not {}",
                        type_name(other)
                    ))),
                },
            }
        }
        "float" => {
            arity(name, args, 1)?;
            match &args[0] {
                Value::String(s) => s
                    .trim()
                    .parse::<f64>()
                    .map_err(|_| type_error(format!("could not convert string to float: '{}'", s)))
                    .and_then(float_value),
                other => match Num::of(other) {
                    Some(n) => float_value(n.as_f64()),
                    None => Err(type_error(format!(
                        "float() argument must be a string or number, not {}",
                        type_name(other)
                    ))),
                },
            }
        }
        "str" => {
            arity(name, args, 1)?;
            Ok(Value::String(match &args[0] {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            }))
        }
        "bool" => {
            arity(name, args, 1)?;
            Ok(Value::Bool(is_truthy(&args[0])))
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

/// Evaluates compiled expressions against a read-only variable map
pub struct Interpreter<'a> {
    vars: &'a HashMap<String, Value>,
}

impl<'a> Interpreter<'a> {
    pub fn new(vars: &'a HashMap<String, Value>) -> Self {
        Self { vars }
    }

    pub fn eval(&self, expr: &Expr) -> Result<Value, ExprError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self
                .vars
                .get(name)
                .cloned()
                .ok_or_else(|| ExprError::UndefinedVariable(name.clone())),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Expr::Map(pairs) => {
                let mut map = Map::new();
                for (key, value) in pairs {
                    map.insert(key.clone(), self.eval(value)?);
                }
                Ok(Value::Object(map))
            }
            Expr::Member(target, field) => {
                index(&self.eval(target)?, &Value::String(field.clone()))
            }
            Expr::Index(target, key) => index(&self.eval(target)?, &self.eval(key)?),
            Expr::Call(name, args) => {
                let args = args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                call(name, &args)
            }
            Expr::Unary(UnaryOp::Not, operand) => {
                Ok(Value::Bool(!is_truthy(&self.eval(operand)?)))
            }
            Expr::Unary(UnaryOp::Neg, operand) => {
                let value = self.eval(operand)?;
                match Num::of(&value) {
                    Some(Num::Int(i)) => i
                        .checked_neg()
                        .map(Value::from)
                        .ok_or_else(|| type_error("integer overflow")),
                    Some(Num::Float(f)) => float_value(-f),
                    None => Err(type_error(format!(
                        "bad operand type for unary -: {}",
                        type_name(&value)
                    ))),
                }
            }
            Expr::Binary(BinaryOp::And, left, right) => {
                let left = self.eval(left)?;
                if !is_truthy(&left) {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Binary(BinaryOp::Or, left, right) => {
                let left = self.eval(left)?;
                if is_truthy(&left) {
                    return Ok(left);
                }
                self.eval(right)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                match op {
                    BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
                    BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
                    BinaryOp::Lt => Ok(Value::Bool(compare(&left, &right)? == Ordering::Less)),
                    BinaryOp::Le => Ok(Value::Bool(compare(&left, &right)? != Ordering::Greater)),
                    BinaryOp::Gt => Ok(Value::Bool(compare(&left, &right)? == Ordering::Greater)),
                    BinaryOp::Ge => Ok(Value::Bool(compare(&left, &right)? != Ordering::Less)),
                    BinaryOp::In => Ok(Value::Bool(contains(&right, &left)?)),
                    BinaryOp::NotIn => Ok(Value::Bool(!contains(&right, &left)?)),
                    _ => arithmetic(*op, &left, &right),
                }
            }
        }
    }
}
