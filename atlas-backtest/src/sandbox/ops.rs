//! Operator semantics with scalar/series broadcasting.
//!
//! Series arithmetic follows IEEE rules (division by zero gives inf/NaN),
//! scalar arithmetic raises on division by zero. Comparisons involving NaN
//! are false except `!=`.

use std::rc::Rc;

use crate::dsl::{BinaryOperator, CompareOperator, UnaryOperator};

use super::limits::Budget;
use super::value::Value;
use super::ExecutionError;

type OpResult = Result<Value, ExecutionError>;

pub(crate) enum Operand {
    Scalar(f64),
    Array(Rc<Vec<f64>>),
}

impl Operand {
    /// Element `i`, broadcasting scalars.
    pub(crate) fn at(&self, i: usize) -> f64 {
        match self {
            Self::Scalar(x) => *x,
            Self::Array(values) => values[i],
        }
    }

    pub(crate) fn array_len(&self) -> Option<usize> {
        match self {
            Self::Scalar(_) => None,
            Self::Array(values) => Some(values.len()),
        }
    }
}

pub(crate) fn operand(value: &Value, symbol: &str) -> Result<Operand, ExecutionError> {
    if let Some(n) = value.as_number() {
        return Ok(Operand::Scalar(n));
    }
    if let Some(values) = value.as_series() {
        return Ok(Operand::Array(values));
    }
    Err(ExecutionError::runtime(format!(
        "unsupported operand type for {symbol}: '{}'",
        value.type_name()
    )))
}

pub(crate) fn length_mismatch(left: usize, right: usize) -> ExecutionError {
    ExecutionError::runtime(format!(
        "operands could not be aligned: lengths {left} and {right}"
    ))
}

/// Apply `f` elementwise with broadcasting.
pub(crate) fn zip_numeric(
    left: &Value,
    right: &Value,
    symbol: &str,
    budget: &mut Budget,
    f: impl Fn(f64, f64) -> f64,
) -> OpResult {
    Ok(match (operand(left, symbol)?, operand(right, symbol)?) {
        (Operand::Scalar(a), Operand::Scalar(b)) => Value::Number(f(a, b)),
        (Operand::Array(a), Operand::Scalar(b)) => {
            budget.allocate(a.len())?;
            Value::series(a.iter().map(|&x| f(x, b)).collect())
        }
        (Operand::Scalar(a), Operand::Array(b)) => {
            budget.allocate(b.len())?;
            Value::series(b.iter().map(|&y| f(a, y)).collect())
        }
        (Operand::Array(a), Operand::Array(b)) => {
            if a.len() != b.len() {
                return Err(length_mismatch(a.len(), b.len()));
            }
            budget.allocate(a.len())?;
            Value::series(a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect())
        }
    })
}

/// Apply `f` elementwise to a scalar or series.
pub(crate) fn map_numeric(
    value: &Value,
    what: &str,
    budget: &mut Budget,
    f: impl Fn(f64) -> f64,
) -> OpResult {
    match operand(value, what)? {
        Operand::Scalar(x) => Ok(Value::Number(f(x))),
        Operand::Array(values) => {
            budget.allocate(values.len())?;
            Ok(Value::series(values.iter().map(|&x| f(x)).collect()))
        }
    }
}

fn python_mod(a: f64, b: f64) -> f64 {
    a - b * (a / b).floor()
}

fn is_scalar_zero(value: &Value) -> bool {
    value.as_number() == Some(0.0)
}

// ============================================================================
// Binary
// ============================================================================

pub(crate) fn binary(op: BinaryOperator, left: &Value, right: &Value, budget: &mut Budget) -> OpResult {
    let symbol = op.symbol();
    match (op, left, right) {
        (BinaryOperator::Add, Value::Str(a), Value::Str(b)) => {
            budget.allocate(a.len() + b.len())?;
            return Ok(Value::str(&format!("{a}{b}")));
        }
        (BinaryOperator::Add, Value::List(a), Value::List(b)) => {
            budget.allocate(a.len() + b.len())?;
            let mut items = a.as_ref().clone();
            items.extend(b.iter().cloned());
            return Ok(Value::List(Rc::new(items)));
        }
        (BinaryOperator::BitAnd | BinaryOperator::BitOr | BinaryOperator::BitXor, _, _) => {
            return bitwise(op, left, right, budget)
        }
        _ => {}
    }

    let scalar_pair = left.as_number().is_some() && right.as_number().is_some();
    if scalar_pair
        && is_scalar_zero(right)
        && matches!(
            op,
            BinaryOperator::Div | BinaryOperator::FloorDiv | BinaryOperator::Mod
        )
    {
        return Err(ExecutionError::runtime("division by zero"));
    }

    match op {
        BinaryOperator::Add => zip_numeric(left, right, symbol, budget, |a, b| a + b),
        BinaryOperator::Sub => zip_numeric(left, right, symbol, budget, |a, b| a - b),
        BinaryOperator::Mul => zip_numeric(left, right, symbol, budget, |a, b| a * b),
        BinaryOperator::Div => zip_numeric(left, right, symbol, budget, |a, b| a / b),
        BinaryOperator::FloorDiv => zip_numeric(left, right, symbol, budget, |a, b| (a / b).floor()),
        BinaryOperator::Mod => zip_numeric(left, right, symbol, budget, |a, b| {
            if b == 0.0 {
                f64::NAN
            } else {
                python_mod(a, b)
            }
        }),
        BinaryOperator::Pow => zip_numeric(left, right, symbol, budget, f64::powf),
        BinaryOperator::BitAnd | BinaryOperator::BitOr | BinaryOperator::BitXor => {
            bitwise(op, left, right, budget)
        }
    }
}

enum Logical {
    Scalar(bool),
    Array(Rc<Vec<bool>>),
}

fn logical(value: &Value) -> Option<Logical> {
    match value {
        Value::Bool(b) => Some(Logical::Scalar(*b)),
        Value::Mask(m) => Some(Logical::Array(m.clone())),
        _ => None,
    }
}

fn bitwise(op: BinaryOperator, left: &Value, right: &Value, budget: &mut Budget) -> OpResult {
    let f: fn(bool, bool) -> bool = match op {
        BinaryOperator::BitAnd => |a, b| a & b,
        BinaryOperator::BitOr => |a, b| a | b,
        _ => |a, b| a ^ b,
    };

    if let (Some(l), Some(r)) = (logical(left), logical(right)) {
        return Ok(match (l, r) {
            (Logical::Scalar(a), Logical::Scalar(b)) => Value::Bool(f(a, b)),
            (Logical::Array(a), Logical::Scalar(b)) | (Logical::Scalar(b), Logical::Array(a)) => {
                budget.allocate(a.len())?;
                Value::mask(a.iter().map(|&x| f(x, b)).collect())
            }
            (Logical::Array(a), Logical::Array(b)) => {
                if a.len() != b.len() {
                    return Err(length_mismatch(a.len(), b.len()));
                }
                budget.allocate(a.len())?;
                Value::mask(a.iter().zip(b.iter()).map(|(&x, &y)| f(x, y)).collect())
            }
        });
    }

    match (left, right) {
        (Value::Number(a), Value::Number(b)) if a.fract() == 0.0 && b.fract() == 0.0 => {
            let (a, b) = (*a as i64, *b as i64);
            let out = match op {
                BinaryOperator::BitAnd => a & b,
                BinaryOperator::BitOr => a | b,
                _ => a ^ b,
            };
            Ok(Value::Number(out as f64))
        }
        _ => Err(ExecutionError::runtime(format!(
            "unsupported operand types for {}: '{}' and '{}'",
            op.symbol(),
            left.type_name(),
            right.type_name()
        ))),
    }
}

// ============================================================================
// Comparison
// ============================================================================

fn compare_f64(op: CompareOperator, a: f64, b: f64) -> bool {
    match op {
        CompareOperator::Eq => a == b,
        CompareOperator::Ne => a != b,
        CompareOperator::Lt => a < b,
        CompareOperator::Le => a <= b,
        CompareOperator::Gt => a > b,
        CompareOperator::Ge => a >= b,
        _ => false,
    }
}

fn contains(container: &Value, item: &Value) -> Result<bool, ExecutionError> {
    match (container, item) {
        (Value::Str(haystack), Value::Str(needle)) => Ok(haystack.contains(needle.as_ref())),
        (Value::Frame(frame), Value::Str(name)) => Ok(frame.column(name).is_some()),
        (Value::List(items) | Value::Tuple(items), _) => Ok(items.iter().any(|v| v == item)),
        (Value::Range { start, stop, step }, _) => {
            let Some(n) = item.as_number() else {
                return Ok(false);
            };
            if n.fract() != 0.0 {
                return Ok(false);
            }
            let n = n as i64;
            let inside = if *step > 0 {
                n >= *start && n < *stop
            } else {
                n <= *start && n > *stop
            };
            Ok(inside && (i128::from(n) - i128::from(*start)) % i128::from(*step) == 0)
        }
        _ => Err(ExecutionError::runtime(format!(
            "argument of type '{}' is not iterable",
            container.type_name()
        ))),
    }
}

pub(crate) fn compare(op: CompareOperator, left: &Value, right: &Value, budget: &mut Budget) -> OpResult {
    match op {
        CompareOperator::In => return Ok(Value::Bool(contains(right, left)?)),
        CompareOperator::NotIn => return Ok(Value::Bool(!contains(right, left)?)),
        CompareOperator::Is => return Ok(Value::Bool(left == right)),
        CompareOperator::IsNot => return Ok(Value::Bool(left != right)),
        _ => {}
    }

    match (left, right) {
        (Value::Str(a), Value::Str(b)) => {
            let ord = a.cmp(b);
            let result = match op {
                CompareOperator::Eq => ord.is_eq(),
                CompareOperator::Ne => ord.is_ne(),
                CompareOperator::Lt => ord.is_lt(),
                CompareOperator::Le => ord.is_le(),
                CompareOperator::Gt => ord.is_gt(),
                _ => ord.is_ge(),
            };
            return Ok(Value::Bool(result));
        }
        (Value::None, _) | (_, Value::None) | (Value::Str(_), _) | (_, Value::Str(_))
            if matches!(op, CompareOperator::Eq | CompareOperator::Ne) =>
        {
            let equal = left == right;
            return Ok(Value::Bool(if op == CompareOperator::Eq { equal } else { !equal }));
        }
        _ => {}
    }

    let symbol = match op {
        CompareOperator::Eq => "==",
        CompareOperator::Ne => "!=",
        CompareOperator::Lt => "<",
        CompareOperator::Le => "<=",
        CompareOperator::Gt => ">",
        _ => ">=",
    };
    Ok(match (operand(left, symbol)?, operand(right, symbol)?) {
        (Operand::Scalar(a), Operand::Scalar(b)) => Value::Bool(compare_f64(op, a, b)),
        (Operand::Array(a), Operand::Scalar(b)) => {
            budget.allocate(a.len())?;
            Value::mask(a.iter().map(|&x| compare_f64(op, x, b)).collect())
        }
        (Operand::Scalar(a), Operand::Array(b)) => {
            budget.allocate(b.len())?;
            Value::mask(b.iter().map(|&y| compare_f64(op, a, y)).collect())
        }
        (Operand::Array(a), Operand::Array(b)) => {
            if a.len() != b.len() {
                return Err(length_mismatch(a.len(), b.len()));
            }
            budget.allocate(a.len())?;
            Value::mask(
                a.iter()
                    .zip(b.iter())
                    .map(|(&x, &y)| compare_f64(op, x, y))
                    .collect(),
            )
        }
    })
}

// ============================================================================
// Unary
// ============================================================================

pub(crate) fn unary(op: UnaryOperator, value: &Value, budget: &mut Budget) -> OpResult {
    match op {
        UnaryOperator::Not => Ok(Value::Bool(!value.truthy()?)),
        UnaryOperator::Neg => map_numeric(value, "unary -", budget, |x| -x),
        UnaryOperator::Pos => map_numeric(value, "unary +", budget, |x| x),
        UnaryOperator::Invert => match value {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            Value::Mask(m) => {
                budget.allocate(m.len())?;
                Ok(Value::mask(m.iter().map(|b| !b).collect()))
            }
            Value::Number(n) if n.fract() == 0.0 => Ok(Value::Number(!(*n as i64) as f64)),
            other => Err(ExecutionError::runtime(format!(
                "bad operand type for unary ~: '{}'",
                other.type_name()
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxLimits;

    fn budget() -> Budget {
        Budget::start(SandboxLimits::default())
    }

    fn series(v: &[f64]) -> Value {
        Value::series(v.to_vec())
    }

    #[test]
    fn test_series_scalar_broadcast() {
        let out = binary(BinaryOperator::Mul, &series(&[1.0, 2.0]), &Value::Number(3.0), &mut budget()).unwrap();
        assert_eq!(out, series(&[3.0, 6.0]));
    }

    #[test]
    fn test_length_mismatch_errors() {
        let err = binary(BinaryOperator::Add, &series(&[1.0]), &series(&[1.0, 2.0]), &mut budget()).unwrap_err();
        assert!(err.to_string().contains("lengths 1 and 2"));
    }

    #[test]
    fn test_scalar_division_by_zero_raises_but_series_does_not() {
        assert!(binary(BinaryOperator::Div, &Value::Number(1.0), &Value::Number(0.0), &mut budget()).is_err());
        let out = binary(BinaryOperator::Div, &series(&[1.0]), &Value::Number(0.0), &mut budget()).unwrap();
        assert_eq!(out, series(&[f64::INFINITY]));
    }

    #[test]
    fn test_python_modulo_sign() {
        let out = binary(BinaryOperator::Mod, &Value::Number(-1.0), &Value::Number(3.0), &mut budget()).unwrap();
        assert_eq!(out, Value::Number(2.0));
    }

    #[test]
    fn test_nan_comparisons() {
        let s = series(&[f64::NAN, 1.0]);
        let gt = compare(CompareOperator::Gt, &s, &Value::Number(0.0), &mut budget()).unwrap();
        assert_eq!(gt, Value::mask(vec![false, true]));
        let ne = compare(CompareOperator::Ne, &s, &Value::Number(1.0), &mut budget()).unwrap();
        assert_eq!(ne, Value::mask(vec![true, false]));
    }

    #[test]
    fn test_mask_logic() {
        let a = Value::mask(vec![true, false, true]);
        let b = Value::mask(vec![true, true, false]);
        let and = binary(BinaryOperator::BitAnd, &a, &b, &mut budget()).unwrap();
        assert_eq!(and, Value::mask(vec![true, false, false]));
        let inverted = unary(UnaryOperator::Invert, &a, &mut budget()).unwrap();
        assert_eq!(inverted, Value::mask(vec![false, true, false]));
    }

    #[test]
    fn test_membership() {
        let list = Value::List(Rc::new(vec![Value::Number(1.0), Value::str("a")]));
        assert_eq!(compare(CompareOperator::In, &Value::str("a"), &list, &mut budget()).unwrap(), Value::Bool(true));
        let range = Value::Range { start: 0, stop: 10, step: 2 };
        assert_eq!(compare(CompareOperator::In, &Value::Number(3.0), &range, &mut budget()).unwrap(), Value::Bool(false));
        assert_eq!(compare(CompareOperator::NotIn, &Value::Number(4.0), &range, &mut budget()).unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_not_on_series_is_ambiguous() {
        assert!(unary(UnaryOperator::Not, &series(&[1.0]), &mut budget()).is_err());
    }
}
