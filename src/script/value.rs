use crate::interpreter::Value;
use crate::parser::BinaryOp;
use serde_json::Number;
use std::cmp::Ordering;

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Console form: strings unquoted, everything else as JSON.
pub fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn float(result: f64) -> Result<Value, String> {
    Number::from_f64(result)
        .map(Value::Number)
        .ok_or_else(|| "result is not a finite number".to_string())
}

fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(l), Some(r)) => l == r,
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64()?.partial_cmp(&r.as_f64()?),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
    let mismatch = || {
        format!(
            "cannot apply `{}` to {} and {}",
            op.symbol(),
            type_name(left),
            type_name(right)
        )
    };

    match op {
        BinaryOp::Eq => return Ok(Value::Bool(loose_eq(left, right))),
        BinaryOp::Ne => return Ok(Value::Bool(!loose_eq(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right).ok_or_else(mismatch)?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            return Ok(Value::Bool(result));
        }
        BinaryOp::Add if left.is_string() || right.is_string() => {
            return Ok(Value::String(display(left) + &display(right)));
        }
        _ => {}
    }

    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        let exact = match op {
            BinaryOp::Add => l.checked_add(r),
            BinaryOp::Sub => l.checked_sub(r),
            BinaryOp::Mul => l.checked_mul(r),
            BinaryOp::Div if r == 0 => return Err("division by zero".to_string()),
            BinaryOp::Div => (l % r == 0).then(|| l / r),
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Value::from(result));
        }
    }

    let (Some(l), Some(r)) = (left.as_f64(), right.as_f64()) else {
        return Err(mismatch());
    };
    match op {
        BinaryOp::Add => float(l + r),
        BinaryOp::Sub => float(l - r),
        BinaryOp::Mul => float(l * r),
        BinaryOp::Div if r == 0.0 => Err("division by zero".to_string()),
        BinaryOp::Div => float(l / r),
        _ => Err(mismatch()),
    }
}
