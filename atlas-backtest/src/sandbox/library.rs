//! Library surface bound into the sandbox: `pd`, `np`, `math`, the safe
//! built-ins and the methods of series, rolling and ewm objects.

use std::rc::Rc;

use super::kernels::{self, Reduction};
use super::limits::Budget;
use super::ops::{self, length_mismatch, operand, Operand};
use super::value::{Builtin, Callable, Ewm, Module, Rolling, Value};
use super::ExecutionError;

type CallResult = Result<Value, ExecutionError>;

const PANDAS_FUNCTIONS: &[&str] = &["Series", "isna", "notna", "isnull", "notnull"];

const NUMPY_FUNCTIONS: &[&str] = &[
    "where", "sign", "abs", "log", "exp", "sqrt", "tanh", "maximum", "minimum", "clip", "mean",
    "std", "zeros", "ones", "full", "array", "isnan",
];

const MATH_FUNCTIONS: &[&str] = &[
    "sqrt", "log", "exp", "fabs", "floor", "ceil", "tanh", "isnan",
];

const SERIES_METHODS: &[&str] = &[
    "rolling", "ewm", "mean", "std", "var", "sum", "min", "max", "median", "count", "shift",
    "pct_change", "diff", "fillna", "ffill", "bfill", "abs", "clip", "cumsum", "cumprod", "copy",
    "where", "astype", "round", "isna", "isnull", "notna", "notnull", "any", "all",
];

const ROLLING_METHODS: &[&str] = &["mean", "std", "var", "sum", "min", "max", "median", "count"];

fn runtime(message: impl Into<String>) -> ExecutionError {
    ExecutionError::runtime(message)
}

// ============================================================================
// Arguments
// ============================================================================

/// Evaluated call arguments.
#[derive(Debug, Default)]
pub(crate) struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub(crate) fn positional(values: Vec<Value>) -> Self {
        Self {
            positional: values,
            keywords: Vec::new(),
        }
    }

    /// Argument at `index`, or passed by keyword `name`.
    fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional
            .get(index)
            .or_else(|| self.keyword(name))
            .filter(|v| !matches!(v, Value::None))
    }

    fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    fn require(&self, index: usize, name: &str, func: &str) -> Result<&Value, ExecutionError> {
        self.get(index, name)
            .ok_or_else(|| runtime(format!("{func}() missing required argument '{name}'")))
    }

    fn accept(&self, func: &str, max_positional: usize, keywords: &[&str]) -> Result<(), ExecutionError> {
        if self.positional.len() > max_positional {
            return Err(runtime(format!(
                "{func}() takes at most {max_positional} positional arguments ({} given)",
                self.positional.len()
            )));
        }
        match self.keywords.iter().find(|(k, _)| !keywords.contains(&k.as_str())) {
            Some((k, _)) => Err(runtime(format!(
                "{func}() got an unexpected keyword argument '{k}'"
            ))),
            None => Ok(()),
        }
    }

    fn int_or(&self, index: usize, name: &str, default: i64) -> Result<i64, ExecutionError> {
        match self.get(index, name) {
            Some(v) => v.expect_int(name),
            None => Ok(default),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

/// Numeric array from a series, mask, list or tuple.
fn to_array(value: &Value, what: &str, budget: &mut Budget) -> Result<Rc<Vec<f64>>, ExecutionError> {
    if let Some(values) = value.as_series() {
        return Ok(values);
    }
    match value {
        Value::List(items) | Value::Tuple(items) => {
            budget.allocate(items.len())?;
            items
                .iter()
                .map(|item| match item {
                    Value::None => Ok(f64::NAN),
                    other => other.expect_number(what),
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Rc::new)
        }
        Value::Range { .. } => Ok(Rc::new(
            value
                .iterate(budget)?
                .iter()
                .filter_map(Value::as_number)
                .collect(),
        )),
        other => Err(runtime(format!(
            "{what} must be array-like, got {}",
            other.type_name()
        ))),
    }
}

enum Condition {
    Scalar(bool),
    Array(Rc<Vec<bool>>),
}

impl Condition {
    fn at(&self, i: usize) -> bool {
        match self {
            Self::Scalar(b) => *b,
            Self::Array(mask) => mask[i],
        }
    }
}

fn condition(value: &Value, budget: &mut Budget) -> Result<Condition, ExecutionError> {
    Ok(match value {
        Value::Bool(b) => Condition::Scalar(*b),
        Value::Number(n) => Condition::Scalar(*n != 0.0),
        Value::Mask(mask) => Condition::Array(mask.clone()),
        Value::Series(values) => Condition::Array(Rc::new(values.iter().map(|&v| v != 0.0).collect())),
        Value::List(_) | Value::Tuple(_) => {
            Condition::Array(Rc::new(to_array(value, "condition", budget)?.iter().map(|&v| v != 0.0).collect()))
        }
        other => {
            return Err(runtime(format!(
                "condition must be boolean, got {}",
                other.type_name()
            )))
        }
    })
}

/// Common length of the array arguments, or `None` if all are scalar.
fn broadcast_len(lengths: &[Option<usize>]) -> Result<Option<usize>, ExecutionError> {
    let mut common: Option<usize> = None;
    for len in lengths.iter().flatten() {
        match common {
            Some(c) if c != *len => return Err(length_mismatch(c, *len)),
            _ => common = Some(*len),
        }
    }
    Ok(common)
}

fn sign(x: f64) -> f64 {
    if x.is_nan() {
        f64::NAN
    } else if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

fn nan_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.max(b)
    }
}

fn nan_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else {
        a.min(b)
    }
}

fn clip_value(x: f64, lower: Option<f64>, upper: Option<f64>) -> f64 {
    let mut x = x;
    if let Some(lo) = lower {
        if x < lo {
            x = lo;
        }
    }
    if let Some(hi) = upper {
        if x > hi {
            x = hi;
        }
    }
    x
}

fn new_series(values: Vec<f64>, budget: &mut Budget) -> CallResult {
    budget.allocate(values.len())?;
    Ok(Value::series(values))
}

fn new_mask(values: Vec<bool>, budget: &mut Budget) -> CallResult {
    budget.allocate(values.len())?;
    Ok(Value::mask(values))
}

fn is_missing(value: &Value) -> Option<bool> {
    match value {
        Value::None => Some(true),
        Value::Number(n) => Some(n.is_nan()),
        Value::Bool(_) | Value::Str(_) => Some(false),
        _ => None,
    }
}

fn missing_mask(value: &Value, negate: bool, budget: &mut Budget) -> CallResult {
    if let Some(missing) = is_missing(value) {
        return Ok(Value::Bool(missing != negate));
    }
    let values = to_array(value, "isna() argument", budget)?;
    new_mask(values.iter().map(|v| v.is_nan() != negate).collect(), budget)
}

// ============================================================================
// Attributes
// ============================================================================

/// Attribute of a library module.
pub(crate) fn module_attribute(module: &Module, name: &str) -> CallResult {
    let function = |list: &[&str]| {
        list.contains(&name).then(|| {
            Value::Function(Callable::Library {
                module: module.clone(),
                name: Rc::from(name),
            })
        })
    };
    let found = match module {
        Module::Inert(m) => {
            return Err(runtime(format!("module '{m}' is not available in the sandbox")))
        }
        Module::Pandas => function(PANDAS_FUNCTIONS),
        Module::Numpy => match name {
            "nan" => Some(Value::Number(f64::NAN)),
            "inf" => Some(Value::Number(f64::INFINITY)),
            "pi" => Some(Value::Number(std::f64::consts::PI)),
            "e" => Some(Value::Number(std::f64::consts::E)),
            _ => function(NUMPY_FUNCTIONS),
        },
        Module::Math => match name {
            "pi" => Some(Value::Number(std::f64::consts::PI)),
            "e" => Some(Value::Number(std::f64::consts::E)),
            "inf" => Some(Value::Number(f64::INFINITY)),
            "nan" => Some(Value::Number(f64::NAN)),
            _ => function(MATH_FUNCTIONS),
        },
    };
    found.ok_or_else(|| {
        runtime(format!(
            "module '{}' has no attribute '{name}'",
            module.name()
        ))
    })
}

/// Names bound by `from <module> import *`.
pub(crate) fn module_exports(module: &Module) -> Vec<(String, Value)> {
    let names: &[&str] = match module {
        Module::Pandas => PANDAS_FUNCTIONS,
        Module::Numpy => NUMPY_FUNCTIONS,
        Module::Math => MATH_FUNCTIONS,
        Module::Inert(_) => &[],
    };
    let constants: &[&str] = match module {
        Module::Numpy | Module::Math => &["nan", "inf", "pi", "e"],
        _ => &[],
    };
    names
        .iter()
        .chain(constants)
        .filter_map(|name| {
            module_attribute(module, name)
                .ok()
                .map(|value| (name.to_string(), value))
        })
        .collect()
}

fn method(receiver: &Value, name: &str) -> Value {
    Value::Function(Callable::Method {
        receiver: Box::new(receiver.clone()),
        name: Rc::from(name),
    })
}

fn no_attribute(value: &Value, name: &str) -> ExecutionError {
    runtime(format!(
        "'{}' object has no attribute '{name}'",
        value.type_name()
    ))
}

/// Attribute of a runtime value.
pub(crate) fn value_attribute(value: &Value, name: &str) -> CallResult {
    match value {
        Value::Series(_) | Value::Mask(_) => {
            let len = value.len().unwrap_or(0);
            match name {
                "values" => Ok(value.clone()),
                "index" => Ok(Value::Index(len)),
                "iloc" => Ok(Value::ILoc(value.as_series().unwrap_or_default())),
                "shape" => Ok(Value::Tuple(Rc::new(vec![Value::Number(len as f64)]))),
                "size" => Ok(Value::Number(len as f64)),
                _ if SERIES_METHODS.contains(&name) => Ok(method(value, name)),
                _ => Err(no_attribute(value, name)),
            }
        }
        Value::Frame(frame) => match name {
            "index" => Ok(Value::Index(frame.rows)),
            "columns" => Ok(Value::List(Rc::new(
                frame.columns.iter().map(|(c, _)| Value::str(c)).collect(),
            ))),
            "shape" => Ok(Value::Tuple(Rc::new(vec![
                Value::Number(frame.rows as f64),
                Value::Number(frame.columns.len() as f64),
            ]))),
            "copy" => Ok(method(value, name)),
            _ => frame
                .column(name)
                .map(|col| Value::Series(col.clone()))
                .ok_or_else(|| no_attribute(value, name)),
        },
        Value::Rolling(_) if ROLLING_METHODS.contains(&name) => Ok(method(value, name)),
        Value::Ewm(_) if name == "mean" => Ok(method(value, name)),
        Value::List(_) if name == "append" => Ok(method(value, name)),
        Value::Index(n) if name == "size" => Ok(Value::Number(*n as f64)),
        Value::Module(module) => module_attribute(module, name),
        other => Err(no_attribute(other, name)),
    }
}

// ============================================================================
// Dispatch
// ============================================================================

pub(crate) fn call(callable: &Callable, args: Args, budget: &mut Budget) -> CallResult {
    match callable {
        Callable::Builtin(builtin) => call_builtin(*builtin, args, budget),
        Callable::Library { module, name } => call_library(module, name, args, budget),
        Callable::Method { receiver, name } => call_method(receiver, name, args, budget),
    }
}

// ============================================================================
// Built-ins
// ============================================================================

fn extremum(args: &Args, func: &str, want_less: bool, budget: &mut Budget) -> CallResult {
    let items = match args.positional.as_slice() {
        [single] => single.iterate(budget)?,
        many => many.to_vec(),
    };
    let mut iter = items.into_iter();
    let mut best = iter
        .next()
        .ok_or_else(|| runtime(format!("{func}() arg is an empty sequence")))?;
    let mut best_n = best.expect_number(func)?;
    for (i, item) in iter.enumerate() {
        budget.progress(i)?;
        let n = item.expect_number(func)?;
        let better = if want_less { n < best_n } else { n > best_n };
        if better {
            best = item;
            best_n = n;
        }
    }
    Ok(best)
}

fn call_builtin(builtin: Builtin, args: Args, budget: &mut Budget) -> CallResult {
    match builtin {
        Builtin::Len => {
            args.accept("len", 1, &[])?;
            let value = args.require(0, "obj", "len")?;
            value.len().map(|n| Value::Number(n as f64)).ok_or_else(|| {
                runtime(format!("object of type '{}' has no len()", value.type_name()))
            })
        }
        Builtin::Range => {
            args.accept("range", 3, &[])?;
            let ints = args
                .positional
                .iter()
                .map(|v| v.expect_int("range() argument"))
                .collect::<Result<Vec<_>, _>>()?;
            let (start, stop, step) = match ints.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step] => (*start, *stop, *step),
                _ => return Err(runtime("range expected at least 1 argument")),
            };
            if step == 0 {
                return Err(runtime("range() arg 3 must not be zero"));
            }
            Ok(Value::Range { start, stop, step })
        }
        Builtin::Min => extremum(&args, "min", true, budget),
        Builtin::Max => extremum(&args, "max", false, budget),
        Builtin::Abs => {
            args.accept("abs", 1, &[])?;
            ops::map_numeric(args.require(0, "x", "abs")?, "abs()", budget, f64::abs)
        }
        Builtin::Sum => {
            args.accept("sum", 2, &["start"])?;
            let items = args.require(0, "iterable", "sum")?.iterate(budget)?;
            let mut total = args.get(1, "start").cloned().unwrap_or(Value::Number(0.0));
            for (i, item) in items.iter().enumerate() {
                budget.progress(i)?;
                total = ops::binary(crate::dsl::BinaryOperator::Add, &total, item, budget)?;
            }
            Ok(total)
        }
        Builtin::Enumerate => {
            args.accept("enumerate", 2, &["start"])?;
            let items = args.require(0, "iterable", "enumerate")?.iterate(budget)?;
            let start = args.int_or(1, "start", 0)?;
            budget.allocate(items.len())?;
            let mut pairs = Vec::with_capacity(items.len());
            for (i, item) in items.into_iter().enumerate() {
                budget.progress(i)?;
                let index = start.saturating_add(i as i64) as f64;
                pairs.push(Value::Tuple(Rc::new(vec![Value::Number(index), item])));
            }
            Ok(Value::List(Rc::new(pairs)))
        }
        Builtin::Float => {
            args.accept("float", 1, &[])?;
            match args.get(0, "x") {
                None => Ok(Value::Number(0.0)),
                Some(Value::Str(s)) => parse_float(s).map(Value::Number),
                Some(v) => v.expect_number("float() argument").map(Value::Number),
            }
        }
        Builtin::Int => {
            args.accept("int", 1, &[])?;
            match args.get(0, "x") {
                None => Ok(Value::Number(0.0)),
                Some(Value::Str(s)) => s
                    .trim()
                    .parse::<i64>()
                    .map(|n| Value::Number(n as f64))
                    .map_err(|_| runtime(format!("invalid literal for int(): '{s}'"))),
                Some(v) => {
                    let n = v.expect_number("int() argument")?;
                    if !n.is_finite() {
                        return Err(runtime(format!("cannot convert float {n} to integer")));
                    }
                    Ok(Value::Number(n.trunc()))
                }
            }
        }
        Builtin::Round => {
            args.accept("round", 2, &["ndigits"])?;
            let digits = args.int_or(1, "ndigits", 0)? as i32;
            ops::map_numeric(args.require(0, "number", "round")?, "round()", budget, |x| {
                kernels::round_half_even(x, digits)
            })
        }
    }
}

fn parse_float(s: &str) -> Result<f64, ExecutionError> {
    let trimmed = s.trim();
    match trimmed.to_ascii_lowercase().as_str() {
        "nan" => Ok(f64::NAN),
        "inf" | "+inf" | "infinity" => Ok(f64::INFINITY),
        "-inf" | "-infinity" => Ok(f64::NEG_INFINITY),
        _ => trimmed
            .parse::<f64>()
            .map_err(|_| runtime(format!("could not convert string to float: '{s}'"))),
    }
}

// ============================================================================
// Modules
// ============================================================================

fn call_library(module: &Module, name: &str, args: Args, budget: &mut Budget) -> CallResult {
    match module {
        Module::Pandas => call_pandas(name, args, budget),
        Module::Numpy => call_numpy(name, args, budget),
        Module::Math => call_math(name, args),
        Module::Inert(m) => Err(runtime(format!("module '{m}' is not available in the sandbox"))),
    }
}

fn call_pandas(name: &str, args: Args, budget: &mut Budget) -> CallResult {
    match name {
        "Series" => {
            args.accept("Series", 2, &["data", "index", "dtype", "name"])?;
            let length = match args.get(1, "index") {
                None => None,
                Some(index) => Some(index.len().ok_or_else(|| {
                    runtime(format!("index must be array-like, got {}", index.type_name()))
                })?),
            };
            let data = args.get(0, "data");
            match (data, length) {
                (None, Some(n)) => new_series(vec![f64::NAN; n], budget),
                (None, None) => new_series(Vec::new(), budget),
                (Some(Value::Mask(mask)), n) => {
                    if let Some(n) = n.filter(|&n| n != mask.len()) {
                        return Err(length_mismatch(mask.len(), n));
                    }
                    new_mask(mask.as_ref().clone(), budget)
                }
                (Some(value), n) => match value.as_number() {
                    Some(x) => new_series(vec![x; n.unwrap_or(1)], budget),
                    None => {
                        let values = to_array(value, "Series data", budget)?;
                        if let Some(n) = n.filter(|&n| n != values.len()) {
                            return Err(length_mismatch(values.len(), n));
                        }
                        new_series(values.as_ref().clone(), budget)
                    }
                },
            }
        }
        "isna" | "isnull" => {
            args.accept(name, 1, &["obj"])?;
            missing_mask(args.require(0, "obj", name)?, false, budget)
        }
        "notna" | "notnull" => {
            args.accept(name, 1, &["obj"])?;
            missing_mask(args.require(0, "obj", name)?, true, budget)
        }
        _ => Err(runtime(format!("module 'pandas' has no attribute '{name}'"))),
    }
}

fn call_numpy(name: &str, args: Args, budget: &mut Budget) -> CallResult {
    let func = format!("np.{name}");
    match name {
        "where" => {
            args.accept(&func, 3, &[])?;
            let cond = condition(args.require(0, "condition", &func)?, budget)?;
            let x = operand(args.require(1, "x", &func)?, &func)?;
            let y = operand(args.require(2, "y", &func)?, &func)?;
            let cond_len = match &cond {
                Condition::Array(mask) => Some(mask.len()),
                Condition::Scalar(_) => None,
            };
            match broadcast_len(&[cond_len, x.array_len(), y.array_len()])? {
                None => Ok(Value::Number(if cond.at(0) { x.at(0) } else { y.at(0) })),
                Some(n) => new_series(
                    (0..n)
                        .map(|i| if cond.at(i) { x.at(i) } else { y.at(i) })
                        .collect(),
                    budget,
                ),
            }
        }
        "sign" | "abs" | "log" | "exp" | "sqrt" | "tanh" => {
            args.accept(&func, 1, &[])?;
            let f: fn(f64) -> f64 = match name {
                "sign" => sign,
                "abs" => f64::abs,
                "log" => f64::ln,
                "exp" => f64::exp,
                "sqrt" => f64::sqrt,
                _ => f64::tanh,
            };
            ops::map_numeric(args.require(0, "x", &func)?, &func, budget, f)
        }
        "isnan" => {
            args.accept(&func, 1, &[])?;
            missing_mask(args.require(0, "x", &func)?, false, budget)
        }
        "maximum" | "minimum" => {
            args.accept(&func, 2, &[])?;
            let f = if name == "maximum" { nan_max } else { nan_min };
            ops::zip_numeric(
                args.require(0, "x1", &func)?,
                args.require(1, "x2", &func)?,
                &func,
                budget,
                f,
            )
        }
        "clip" => {
            args.accept(&func, 3, &["a_min", "a_max"])?;
            let lower = args.get(1, "a_min").map(|v| v.expect_number("a_min")).transpose()?;
            let upper = args.get(2, "a_max").map(|v| v.expect_number("a_max")).transpose()?;
            ops::map_numeric(args.require(0, "a", &func)?, &func, budget, |x| {
                clip_value(x, lower, upper)
            })
        }
        "mean" | "std" => {
            args.accept(&func, 1, &["ddof"])?;
            let values = to_array(args.require(0, "a", &func)?, &func, budget)?;
            let ddof = args.int_or(1, "ddof", 0)?.max(0) as usize;
            let reduction = if name == "mean" {
                Reduction::Mean
            } else {
                Reduction::Std { ddof }
            };
            Ok(Value::Number(kernels::reduce(&values, reduction)))
        }
        "zeros" | "ones" => {
            args.accept(&func, 1, &[])?;
            let n = args.require(0, "shape", &func)?.expect_int("shape")?.max(0) as usize;
            new_series(vec![if name == "zeros" { 0.0 } else { 1.0 }; n], budget)
        }
        "full" => {
            args.accept(&func, 2, &["fill_value"])?;
            let n = args.require(0, "shape", &func)?.expect_int("shape")?.max(0) as usize;
            let fill = args.require(1, "fill_value", &func)?.expect_number("fill_value")?;
            new_series(vec![fill; n], budget)
        }
        "array" => {
            args.accept(&func, 1, &["dtype"])?;
            let source = args.require(0, "object", &func)?;
            if let Value::Mask(mask) = source {
                return new_mask(mask.as_ref().clone(), budget);
            }
            let values = to_array(source, &func, budget)?;
            new_series(values.as_ref().clone(), budget)
        }
        _ => Err(runtime(format!("module 'numpy' has no attribute '{name}'"))),
    }
}

fn call_math(name: &str, args: Args) -> CallResult {
    let func = format!("math.{name}");
    args.accept(&func, if name == "log" { 2 } else { 1 }, &[])?;
    let x = args
        .require(0, "x", &func)?
        .as_number()
        .ok_or_else(|| runtime(format!("{func}() argument must be a real number")))?;
    let domain = || runtime("math domain error");
    let result = match name {
        "isnan" => return Ok(Value::Bool(x.is_nan())),
        "sqrt" if x < 0.0 => return Err(domain()),
        "sqrt" => x.sqrt(),
        "log" if x <= 0.0 => return Err(domain()),
        "log" => match args.get(1, "base") {
            Some(base) => x.ln() / base.expect_number("base")?.ln(),
            None => x.ln(),
        },
        "exp" => x.exp(),
        "fabs" => x.abs(),
        "floor" => x.floor(),
        "ceil" => x.ceil(),
        "tanh" => x.tanh(),
        _ => return Err(runtime(format!("module 'math' has no attribute '{name}'"))),
    };
    if result.is_infinite() && x.is_finite() {
        return Err(runtime("math range error"));
    }
    Ok(Value::Number(result))
}

// ============================================================================
// Methods
// ============================================================================

fn call_method(receiver: &Value, name: &str, args: Args, budget: &mut Budget) -> CallResult {
    match receiver {
        Value::Series(_) | Value::Mask(_) => series_method(receiver, name, args, budget),
        Value::Rolling(rolling) => {
            args.accept(name, 0, &["ddof"])?;
            let ddof = args.int_or(0, "ddof", 1)?.max(0) as usize;
            let reduction = Reduction::from_method(name, ddof)
                .ok_or_else(|| no_attribute(receiver, name))?;
            budget.allocate(rolling.source.len())?;
            Ok(Value::series(kernels::rolling(
                &rolling.source,
                rolling.window,
                rolling.min_periods,
                reduction,
            )))
        }
        Value::Ewm(ewm) => {
            args.accept(name, 0, &[])?;
            budget.allocate(ewm.source.len())?;
            Ok(Value::series(kernels::ewm_mean(
                &ewm.source,
                ewm.alpha,
                ewm.adjust,
                ewm.min_periods,
            )))
        }
        Value::Frame(frame) if name == "copy" => {
            budget.allocate(frame.rows * frame.columns.len())?;
            Ok(Value::Frame(Rc::new(frame.as_ref().clone())))
        }
        Value::List(_) if name == "append" => {
            Err(runtime("append() is only supported on a list bound to a name"))
        }
        other => Err(no_attribute(other, name)),
    }
}

fn periods_arg(args: &Args, method: &str) -> Result<usize, ExecutionError> {
    let periods = args.int_or(0, "periods", 1)?;
    if periods < 0 {
        return Err(runtime(format!(
            "{method}() with negative periods looks ahead and is not allowed"
        )));
    }
    Ok(periods as usize)
}

fn series_method(receiver: &Value, name: &str, args: Args, budget: &mut Budget) -> CallResult {
    let values = receiver.as_series().unwrap_or_default();
    let n = values.len();

    match name {
        "rolling" => {
            args.accept(name, 2, &["window", "min_periods", "center"])?;
            let window = args.require(0, "window", name)?.expect_int("window")?;
            if window <= 0 {
                return Err(runtime("window must be a positive integer"));
            }
            let min_periods = args.int_or(1, "min_periods", window)?.max(0) as usize;
            if matches!(args.keyword("center"), Some(v) if v.truthy().unwrap_or(false)) {
                return Err(runtime("centered rolling windows look ahead and are not allowed"));
            }
            Ok(Value::Rolling(Rc::new(Rolling {
                source: values,
                window: window as usize,
                min_periods,
            })))
        }
        "ewm" => {
            args.accept(name, 1, &["com", "span", "alpha", "adjust", "min_periods"])?;
            let com = args.get(0, "com").map(|v| v.expect_number("com")).transpose()?;
            let span = args.keyword("span").map(|v| v.expect_number("span")).transpose()?;
            let alpha = args.keyword("alpha").map(|v| v.expect_number("alpha")).transpose()?;
            let alpha = match (com, span, alpha) {
                (Some(c), None, None) if c >= 0.0 => 1.0 / (1.0 + c),
                (None, Some(s), None) if s >= 1.0 => 2.0 / (s + 1.0),
                (None, None, Some(a)) if a > 0.0 && a <= 1.0 => a,
                (None, None, None) => {
                    return Err(runtime("ewm() requires one of com, span or alpha"))
                }
                _ => return Err(runtime("ewm() takes exactly one valid decay parameter")),
            };
            let adjust = match args.keyword("adjust") {
                Some(v) => v.truthy()?,
                None => true,
            };
            let min_periods = args.int_or(usize::MAX, "min_periods", 0)?.max(0) as usize;
            Ok(Value::Ewm(Rc::new(Ewm {
                source: values,
                alpha,
                adjust,
                min_periods,
            })))
        }
        "mean" | "std" | "var" | "sum" | "min" | "max" | "median" | "count" => {
            args.accept(name, 0, &["ddof", "skipna"])?;
            let ddof = args.int_or(usize::MAX, "ddof", 1)?.max(0) as usize;
            let reduction = Reduction::from_method(name, ddof).ok_or_else(|| no_attribute(receiver, name))?;
            Ok(Value::Number(kernels::reduce(&values, reduction)))
        }
        "any" | "all" => {
            args.accept(name, 0, &[])?;
            let mut truthy = values.iter().filter(|v| !v.is_nan()).map(|&v| v != 0.0);
            Ok(Value::Bool(if name == "any" {
                truthy.any(|b| b)
            } else {
                truthy.all(|b| b)
            }))
        }
        "shift" => {
            args.accept(name, 1, &["periods", "fill_value"])?;
            let periods = periods_arg(&args, name)?;
            let mut out = kernels::shift(&values, periods);
            if let Some(fill) = args.keyword("fill_value") {
                let fill = fill.expect_number("fill_value")?;
                out.iter_mut().take(periods).for_each(|v| *v = fill);
            }
            new_series(out, budget)
        }
        "diff" => {
            args.accept(name, 1, &["periods"])?;
            let periods = periods_arg(&args, name)?;
            new_series(kernels::diff(&values, periods), budget)
        }
        "pct_change" => {
            args.accept(name, 1, &["periods", "fill_method"])?;
            let periods = periods_arg(&args, name)?;
            new_series(kernels::pct_change(&values, periods), budget)
        }
        "fillna" => {
            args.accept(name, 1, &["value", "method"])?;
            match (args.get(0, "value"), args.keyword("method")) {
                (Some(value), None) => {
                    let fill = operand(value, "fillna")?;
                    if let Some(len) = fill.array_len().filter(|&len| len != n) {
                        return Err(length_mismatch(n, len));
                    }
                    new_series(
                        values
                            .iter()
                            .enumerate()
                            .map(|(i, &v)| if v.is_nan() { fill.at(i) } else { v })
                            .collect(),
                        budget,
                    )
                }
                (None, Some(Value::Str(method))) => match method.as_ref() {
                    "ffill" | "pad" => new_series(kernels::forward_fill(&values), budget),
                    "bfill" | "backfill" => new_series(kernels::backward_fill(&values), budget),
                    other => Err(runtime(format!("invalid fill method '{other}'"))),
                },
                _ => Err(runtime("fillna() requires either a value or a method")),
            }
        }
        "ffill" => {
            args.accept(name, 0, &[])?;
            new_series(kernels::forward_fill(&values), budget)
        }
        "bfill" => {
            args.accept(name, 0, &[])?;
            new_series(kernels::backward_fill(&values), budget)
        }
        "abs" => {
            args.accept(name, 0, &[])?;
            new_series(values.iter().map(|v| v.abs()).collect(), budget)
        }
        "clip" => {
            args.accept(name, 2, &["lower", "upper"])?;
            let lower = args.get(0, "lower").map(|v| v.expect_number("lower")).transpose()?;
            let upper = args.get(1, "upper").map(|v| v.expect_number("upper")).transpose()?;
            new_series(
                values.iter().map(|&v| clip_value(v, lower, upper)).collect(),
                budget,
            )
        }
        "cumsum" => {
            args.accept(name, 0, &[])?;
            new_series(kernels::accumulate(&values, 0.0, |a, b| a + b), budget)
        }
        "cumprod" => {
            args.accept(name, 0, &[])?;
            new_series(kernels::accumulate(&values, 1.0, |a, b| a * b), budget)
        }
        "copy" => {
            args.accept(name, 0, &["deep"])?;
            budget.allocate(n)?;
            Ok(match receiver {
                Value::Mask(mask) => Value::mask(mask.as_ref().clone()),
                _ => Value::series(values.as_ref().clone()),
            })
        }
        "where" => {
            args.accept(name, 2, &["cond", "other"])?;
            let cond = condition(args.require(0, "cond", name)?, budget)?;
            if let Condition::Array(mask) = &cond {
                if mask.len() != n {
                    return Err(length_mismatch(n, mask.len()));
                }
            }
            let other = match args.get(1, "other") {
                Some(v) => operand(v, "where")?,
                None => Operand::Scalar(f64::NAN),
            };
            if let Some(len) = other.array_len().filter(|&len| len != n) {
                return Err(length_mismatch(n, len));
            }
            new_series(
                (0..n)
                    .map(|i| if cond.at(i) { values[i] } else { other.at(i) })
                    .collect(),
                budget,
            )
        }
        "astype" => {
            args.accept(name, 1, &["dtype"])?;
            let dtype = match args.require(0, "dtype", name)? {
                Value::Str(s) => s.to_string(),
                Value::Function(Callable::Builtin(Builtin::Float)) => "float".into(),
                Value::Function(Callable::Builtin(Builtin::Int)) => "int".into(),
                other => {
                    return Err(runtime(format!(
                        "data type '{}' not understood",
                        other.type_name()
                    )))
                }
            };
            match dtype.as_str() {
                "float" | "float64" | "float32" => new_series(values.as_ref().clone(), budget),
                "int" | "int64" | "int32" => {
                    if values.iter().any(|v| !v.is_finite()) {
                        return Err(runtime("Cannot convert non-finite values (NA or inf) to integer"));
                    }
                    new_series(values.iter().map(|v| v.trunc()).collect(), budget)
                }
                "bool" => new_mask(values.iter().map(|&v| v != 0.0).collect(), budget),
                other => Err(runtime(format!("data type '{other}' not understood"))),
            }
        }
        "round" => {
            args.accept(name, 1, &["decimals"])?;
            let decimals = args.int_or(0, "decimals", 0)? as i32;
            new_series(
                values
                    .iter()
                    .map(|&v| kernels::round_half_even(v, decimals))
                    .collect(),
                budget,
            )
        }
        "isna" | "isnull" => {
            args.accept(name, 0, &[])?;
            new_mask(values.iter().map(|v| v.is_nan()).collect(), budget)
        }
        "notna" | "notnull" => {
            args.accept(name, 0, &[])?;
            new_mask(values.iter().map(|v| !v.is_nan()).collect(), budget)
        }
        _ => Err(no_attribute(receiver, name)),
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

    fn call_method_named(receiver: Value, name: &str, args: Args) -> CallResult {
        call(
            &Callable::Method {
                receiver: Box::new(receiver),
                name: Rc::from(name),
            },
            args,
            &mut budget(),
        )
    }

    fn kw(name: &str, value: Value) -> Args {
        Args {
            positional: Vec::new(),
            keywords: vec![(name.to_string(), value)],
        }
    }

    #[test]
    fn test_pd_series_broadcasts_scalar_over_index() {
        let args = Args {
            positional: vec![Value::Number(0.0)],
            keywords: vec![("index".into(), Value::Index(3))],
        };
        let out = call_pandas("Series", args, &mut budget()).unwrap();
        assert_eq!(out, series(&[0.0, 0.0, 0.0]));
    }

    #[test]
    fn test_np_where_broadcasts() {
        let args = Args::positional(vec![
            Value::mask(vec![true, false]),
            Value::Number(1.0),
            series(&[5.0, 6.0]),
        ]);
        assert_eq!(call_numpy("where", args, &mut budget()).unwrap(), series(&[1.0, 6.0]));
    }

    #[test]
    fn test_np_sign_keeps_zero() {
        let out = call_numpy("sign", Args::positional(vec![series(&[-2.0, 0.0, 3.0])]), &mut budget()).unwrap();
        assert_eq!(out, series(&[-1.0, 0.0, 1.0]));
    }

    #[test]
    fn test_math_domain_error() {
        let err = call_math("sqrt", Args::positional(vec![Value::Number(-1.0)])).unwrap_err();
        assert!(err.to_string().contains("math domain error"));
        let ok = call_math("log", Args::positional(vec![Value::Number(8.0), Value::Number(2.0)])).unwrap();
        assert_eq!(ok, Value::Number(3.0));
    }

    #[test]
    fn test_negative_shift_rejected() {
        let err = call_method_named(series(&[1.0, 2.0]), "shift", Args::positional(vec![Value::Number(-1.0)]))
            .unwrap_err();
        assert!(err.to_string().contains("looks ahead"));
        let err = call_method_named(series(&[1.0, 2.0]), "diff", kw("periods", Value::Number(-1.0))).unwrap_err();
        assert!(err.to_string().contains("looks ahead"));
    }

    #[test]
    fn test_rolling_mean_through_method_chain() {
        let rolling = call_method_named(series(&[1.0, 2.0, 3.0]), "rolling", kw("window", Value::Number(2.0))).unwrap();
        let mean = call_method_named(rolling, "mean", Args::default()).unwrap();
        match mean {
            Value::Series(v) => {
                assert!(v[0].is_nan());
                assert_eq!(&v[1..], &[1.5, 2.5]);
            }
            other => panic!("expected series, got {other:?}"),
        }
    }

    #[test]
    fn test_ewm_requires_decay() {
        assert!(call_method_named(series(&[1.0]), "ewm", Args::default()).is_err());
        let ewm = call_method_named(series(&[1.0, 2.0]), "ewm", kw("span", Value::Number(3.0))).unwrap();
        match ewm {
            Value::Ewm(e) => assert_eq!(e.alpha, 0.5),
            other => panic!("expected ewm, got {other:?}"),
        }
    }

    #[test]
    fn test_fillna_value_and_method() {
        let s = series(&[f64::NAN, 1.0, f64::NAN]);
        let filled = call_method_named(s.clone(), "fillna", Args::positional(vec![Value::Number(0.0)])).unwrap();
        assert_eq!(filled, series(&[0.0, 1.0, 0.0]));
        let padded = call_method_named(s.clone(), "fillna", kw("method", Value::str("ffill"))).unwrap();
        match padded {
            Value::Series(v) => assert_eq!(&v[1..], &[1.0, 1.0]),
            other => panic!("expected series, got {other:?}"),
        }
        let back = call_method_named(s, "bfill", Args::default()).unwrap();
        match back {
            Value::Series(v) => {
                assert_eq!(v[0], 1.0);
                assert!(v[2].is_nan());
            }
            other => panic!("expected series, got {other:?}"),
        }
    }

    #[test]
    fn test_builtins() {
        let sum = call_builtin(
            Builtin::Sum,
            Args::positional(vec![Value::List(Rc::new(vec![Value::Number(1.0), Value::Number(2.5)]))]),
            &mut budget(),
        )
        .unwrap();
        assert_eq!(sum, Value::Number(3.5));

        let max = call_builtin(
            Builtin::Max,
            Args::positional(vec![Value::Number(1.0), Value::Number(4.0), Value::Number(2.0)]),
            &mut budget(),
        )
        .unwrap();
        assert_eq!(max, Value::Number(4.0));

        assert!(call_builtin(Builtin::Min, Args::positional(vec![Value::List(Rc::new(Vec::new()))]), &mut budget()).is_err());
        assert_eq!(
            call_builtin(Builtin::Round, Args::positional(vec![Value::Number(2.5)]), &mut budget()).unwrap(),
            Value::Number(2.0)
        );
        assert_eq!(
            call_builtin(Builtin::Int, Args::positional(vec![Value::Number(-2.7)]), &mut budget()).unwrap(),
            Value::Number(-2.0)
        );
    }

    #[test]
    fn test_inert_module_raises() {
        let module = Module::Inert(Rc::from("vectorbt"));
        assert!(module_attribute(&module, "Portfolio").is_err());
    }

    #[test]
    fn test_unknown_keyword_rejected() {
        let err = call_method_named(series(&[1.0]), "abs", kw("inplace", Value::Bool(true))).unwrap_err();
        assert!(err.to_string().contains("unexpected keyword argument 'inplace'"));
    }
}
