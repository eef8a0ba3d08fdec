//! Runtime values of the strategy-script interpreter.

use std::fmt;
use std::rc::Rc;

use super::limits::Budget;
use super::ExecutionError;

/// Library namespaces a script can bind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Module {
    Pandas,
    Numpy,
    Math,
    /// Allow-listed but unavailable inside the sandbox (`vectorbt`, `datetime`)
    Inert(Rc<str>),
}

impl Module {
    pub(crate) fn name(&self) -> &str {
        match self {
            Self::Pandas => "pandas",
            Self::Numpy => "numpy",
            Self::Math => "math",
            Self::Inert(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Builtin {
    Len,
    Range,
    Min,
    Max,
    Abs,
    Sum,
    Enumerate,
    Float,
    Int,
    Round,
}

impl Builtin {
    pub(crate) fn lookup(name: &str) -> Option<Self> {
        Some(match name {
            "len" => Self::Len,
            "range" => Self::Range,
            "min" => Self::Min,
            "max" => Self::Max,
            "abs" => Self::Abs,
            "sum" => Self::Sum,
            "enumerate" => Self::Enumerate,
            "float" => Self::Float,
            "int" => Self::Int,
            "round" => Self::Round,
            _ => return None,
        })
    }
}

/// Something that can be called.
#[derive(Debug, Clone)]
pub(crate) enum Callable {
    Builtin(Builtin),
    Library { module: Module, name: Rc<str> },
    Method { receiver: Box<Value>, name: Rc<str> },
}

/// Price table bound as `data`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Frame {
    pub columns: Vec<(String, Rc<Vec<f64>>)>,
    pub rows: usize,
}

impl Frame {
    pub(crate) fn column(&self, name: &str) -> Option<&Rc<Vec<f64>>> {
        self.columns
            .iter()
            .find(|(col, _)| col == name)
            .or_else(|| self.columns.iter().find(|(col, _)| col.eq_ignore_ascii_case(name)))
            .map(|(_, values)| values)
    }

    pub(crate) fn set_column(&mut self, name: &str, values: Rc<Vec<f64>>) {
        match self.columns.iter_mut().find(|(col, _)| col == name) {
            Some((_, existing)) => *existing = values,
            None => self.columns.push((name.to_string(), values)),
        }
    }
}

/// `series.rolling(window, min_periods)`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Rolling {
    pub source: Rc<Vec<f64>>,
    pub window: usize,
    pub min_periods: usize,
}

/// `series.ewm(alpha, adjust)`
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Ewm {
    pub source: Rc<Vec<f64>>,
    pub alpha: f64,
    pub adjust: bool,
    pub min_periods: usize,
}

#[derive(Debug, Clone)]
pub(crate) enum Value {
    None,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Series(Rc<Vec<f64>>),
    Mask(Rc<Vec<bool>>),
    Frame(Rc<Frame>),
    /// Index of a series or table of the given length
    Index(usize),
    /// Positional indexer returned by `.iloc`
    ILoc(Rc<Vec<f64>>),
    Rolling(Rc<Rolling>),
    Ewm(Rc<Ewm>),
    List(Rc<Vec<Value>>),
    Tuple(Rc<Vec<Value>>),
    Range { start: i64, stop: i64, step: i64 },
    Module(Module),
    Function(Callable),
}

impl Value {
    pub(crate) fn series(values: Vec<f64>) -> Self {
        Self::Series(Rc::new(values))
    }

    pub(crate) fn mask(values: Vec<bool>) -> Self {
        Self::Mask(Rc::new(values))
    }

    pub(crate) fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Number(_) => "float",
            Self::Str(_) => "str",
            Self::Series(_) => "Series",
            Self::Mask(_) => "boolean Series",
            Self::Frame(_) => "DataFrame",
            Self::Index(_) => "Index",
            Self::ILoc(_) => "iLocIndexer",
            Self::Rolling(_) => "Rolling",
            Self::Ewm(_) => "ExponentialMovingWindow",
            Self::List(_) => "list",
            Self::Tuple(_) => "tuple",
            Self::Range { .. } => "range",
            Self::Module(_) => "module",
            Self::Function(_) => "function",
        }
    }

    /// Truth value; array-likes are ambiguous.
    pub(crate) fn truthy(&self) -> Result<bool, ExecutionError> {
        Ok(match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) | Self::Tuple(items) => !items.is_empty(),
            Self::Range { start, stop, step } => range_len(*start, *stop, *step) > 0,
            Self::Series(_) | Self::Mask(_) | Self::Frame(_) | Self::Index(_) => {
                return Err(ExecutionError::runtime(format!(
                    "The truth value of a {} is ambiguous",
                    self.type_name()
                )))
            }
            _ => true,
        })
    }

    /// Scalar numeric view (`bool` counts as 0/1).
    pub(crate) fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub(crate) fn expect_number(&self, what: &str) -> Result<f64, ExecutionError> {
        self.as_number().ok_or_else(|| {
            ExecutionError::runtime(format!("{what} must be a number, got {}", self.type_name()))
        })
    }

    /// Integral numeric view for indices, windows and counts.
    pub(crate) fn expect_int(&self, what: &str) -> Result<i64, ExecutionError> {
        let n = self.expect_number(what)?;
        if n.fract() != 0.0 || !n.is_finite() {
            return Err(ExecutionError::runtime(format!(
                "{what} must be an integer, got {n}"
            )));
        }
        Ok(n as i64)
    }

    /// Array view of a series-like value.
    pub(crate) fn as_series(&self) -> Option<Rc<Vec<f64>>> {
        match self {
            Self::Series(values) => Some(values.clone()),
            Self::Mask(mask) => Some(Rc::new(
                mask.iter().map(|&b| if b { 1.0 } else { 0.0 }).collect(),
            )),
            _ => None,
        }
    }

    /// Length of a sized value.
    pub(crate) fn len(&self) -> Option<usize> {
        match self {
            Self::Series(v) | Self::ILoc(v) => Some(v.len()),
            Self::Mask(m) => Some(m.len()),
            Self::Frame(f) => Some(f.rows),
            Self::Index(n) => Some(*n),
            Self::List(items) | Self::Tuple(items) => Some(items.len()),
            Self::Str(s) => Some(s.chars().count()),
            Self::Range { start, stop, step } => Some(range_len(*start, *stop, *step)),
            _ => None,
        }
    }

    /// Elements of an iterable value, charged against the cell budget before
    /// any of them is built.
    pub(crate) fn iterate(&self, budget: &mut Budget) -> Result<Vec<Value>, ExecutionError> {
        if let Some(n) = self.len() {
            budget.allocate(n)?;
        }
        Ok(match self {
            Self::List(items) | Self::Tuple(items) => items.as_ref().clone(),
            Self::Series(values) => values.iter().map(|&v| Self::Number(v)).collect(),
            Self::Mask(mask) => mask.iter().map(|&b| Self::Bool(b)).collect(),
            Self::Index(n) => (0..*n).map(|i| Self::Number(i as f64)).collect(),
            Self::Str(s) => s.chars().map(|c| Self::str(&c.to_string())).collect(),
            Self::Range { start, stop, step } => {
                let n = range_len(*start, *stop, *step);
                let mut items = Vec::with_capacity(n);
                for i in 0..n {
                    budget.progress(i)?;
                    items.push(Self::Number(range_item(*start, *step, i)));
                }
                items
            }
            other => {
                return Err(ExecutionError::runtime(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Series(a), Self::Series(b)) => a == b,
            (Self::Mask(a), Self::Mask(b)) => a == b,
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Module(a), Self::Module(b)) => a == b,
            (a, b) => match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{n:.1}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "'{s}'"),
            Self::Module(m) => write!(f, "<module '{}'>", m.name()),
            other => match other.len() {
                Some(n) => write!(f, "<{} of length {n}>", other.type_name()),
                None => write!(f, "<{}>", other.type_name()),
            },
        }
    }
}

/// Element count of `range(start, stop, step)`, saturating at `usize::MAX`.
pub(crate) fn range_len(start: i64, stop: i64, step: i64) -> usize {
    let (start, stop, step) = (i128::from(start), i128::from(stop), i128::from(step));
    let n = if step > 0 && stop > start {
        (stop - start - 1) / step + 1
    } else if step < 0 && stop < start {
        (start - stop - 1) / -step + 1
    } else {
        0
    };
    usize::try_from(n).unwrap_or(usize::MAX)
}

/// Element `i` of a range; `i` is below the range length.
pub(crate) fn range_item(start: i64, step: i64, i: usize) -> f64 {
    (i128::from(start) + i as i128 * i128::from(step)) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::SandboxLimits;
    use std::time::Duration;

    fn budget(cells: u64) -> Budget {
        Budget::start(SandboxLimits {
            timeout: Duration::from_secs(5),
            max_steps: 1_000,
            max_allocated_cells: cells,
            max_loop_iterations: 1_000,
        })
    }

    #[test]
    fn test_range_len() {
        assert_eq!(range_len(0, 5, 1), 5);
        assert_eq!(range_len(0, 5, 2), 3);
        assert_eq!(range_len(5, 0, -2), 3);
        assert_eq!(range_len(5, 5, 1), 0);
        assert_eq!(range_len(0, 5, -1), 0);
    }

    #[test]
    fn test_range_len_extremes_do_not_overflow() {
        assert_eq!(range_len(-(1 << 62), 1 << 62, 1), 1usize << 63);
        assert_eq!(range_len(i64::MIN, i64::MAX, 1), usize::MAX);
        assert_eq!(range_len(i64::MAX, i64::MIN, i64::MIN), 2);
        assert_eq!(range_item(i64::MAX, i64::MIN, 1), -1.0);
    }

    #[test]
    fn test_series_truth_is_ambiguous() {
        assert!(Value::series(vec![1.0]).truthy().is_err());
        assert!(Value::Number(f64::NAN).truthy().unwrap());
        assert!(!Value::List(Rc::new(Vec::new())).truthy().unwrap());
    }

    #[test]
    fn test_frame_column_lookup_is_case_insensitive_fallback() {
        let frame = Frame {
            columns: vec![("Close".into(), Rc::new(vec![1.0, 2.0]))],
            rows: 2,
        };
        assert!(frame.column("Close").is_some());
        assert!(frame.column("close").is_some());
        assert!(frame.column("Open").is_none());
    }

    #[test]
    fn test_iterate_range() {
        let items = Value::Range {
            start: 1,
            stop: 7,
            step: 3,
        }
        .iterate(&mut budget(100))
        .unwrap();
        assert_eq!(items, vec![Value::Number(1.0), Value::Number(4.0)]);
    }

    #[test]
    fn test_iterate_charges_before_building() {
        let mut small = budget(1_000);
        let huge = Value::Range {
            start: 0,
            stop: 10_000_000_000,
            step: 1,
        };
        assert_eq!(huge.iterate(&mut small), Err(ExecutionError::MemoryLimit(1_000)));
    }
}
