//! Tree-walking evaluator for verified strategy scripts.
//!
//! Every statement and expression is charged against the [`Budget`]; every
//! series allocation is charged by cell count. Assignment into series is
//! copy-on-write, so aliases made with `b = a` do not observe later item
//! assignments to `a`.

use std::collections::HashMap;
use std::rc::Rc;

use crate::data::PriceBar;
use crate::dsl::{BoolOperator, Expr, ImportAlias, Program, Stmt, StmtKind};

use super::library::{self, Args};
use super::limits::{Budget, SandboxLimits};
use super::ops::{self, operand, Operand};
use super::value::{range_item, range_len, Builtin, Callable, Frame, Module, Value};
use super::ExecutionError;

type EvalResult<T = Value> = Result<T, ExecutionError>;

fn runtime(message: impl Into<String>) -> ExecutionError {
    ExecutionError::runtime(message)
}

enum Flow {
    Next,
    Break,
    Continue,
}

/// Evaluated subscript.
enum Key {
    Item(Value),
    Slice {
        lower: Option<i64>,
        upper: Option<i64>,
        step: Option<i64>,
    },
}

/// Resolve an importable module; anything else does not exist in here.
fn resolve_module(name: &str) -> EvalResult<Module> {
    let top = name.split('.').next().unwrap_or(name);
    let module = match top {
        "pandas" => Module::Pandas,
        "numpy" => Module::Numpy,
        "math" => Module::Math,
        "vectorbt" | "datetime" => Module::Inert(Rc::from(top)),
        _ => return Err(runtime(format!("No module named '{name}'"))),
    };
    if name.contains('.') {
        return Ok(Module::Inert(Rc::from(name)));
    }
    Ok(module)
}

fn position(len: usize, index: i64) -> EvalResult<usize> {
    let resolved = if index < 0 { index + len as i64 } else { index };
    if resolved < 0 || resolved >= len as i64 {
        return Err(runtime(format!("index {index} is out of bounds for length {len}")));
    }
    Ok(resolved as usize)
}

/// Python slice semantics over a sequence of `len` items.
fn slice_positions(len: usize, lower: Option<i64>, upper: Option<i64>, step: Option<i64>) -> EvalResult<Vec<usize>> {
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(runtime("slice step cannot be zero"));
    }
    let len = len as i64;
    let mut out = Vec::new();
    if step > 0 {
        let bound = |i: i64| if i < 0 { (i + len).max(0) } else { i.min(len) };
        let start = lower.map(bound).unwrap_or(0);
        let stop = upper.map(bound).unwrap_or(len);
        let mut i = start;
        while i < stop {
            out.push(i as usize);
            i += step;
        }
    } else {
        let bound = |i: i64| if i < 0 { (i + len).max(-1) } else { i.min(len - 1) };
        let start = lower.map(bound).unwrap_or(len - 1);
        let stop = upper.map(bound).unwrap_or(-1);
        let mut i = start;
        while i > stop {
            out.push(i as usize);
            i += step;
        }
    }
    Ok(out)
}

/// Values for a table column: a matching series or a broadcast scalar.
fn column_values(value: &Value, rows: usize) -> EvalResult<Rc<Vec<f64>>> {
    match operand(value, "column assignment")? {
        Operand::Scalar(x) => Ok(Rc::new(vec![x; rows])),
        Operand::Array(values) if values.len() == rows => Ok(values),
        Operand::Array(values) => Err(ops::length_mismatch(rows, values.len())),
    }
}

/// Positions a key selects in a sequence of `len` items.
fn positions(len: usize, key: &Key) -> EvalResult<Vec<usize>> {
    match key {
        Key::Slice { lower, upper, step } => slice_positions(len, *lower, *upper, *step),
        Key::Item(Value::Mask(mask)) => {
            if mask.len() != len {
                return Err(ops::length_mismatch(len, mask.len()));
            }
            Ok(mask
                .iter()
                .enumerate()
                .filter_map(|(i, &b)| b.then_some(i))
                .collect())
        }
        Key::Item(Value::Series(_)) => Err(runtime("boolean mask required for indexing, got Series")),
        Key::Item(index) => Ok(vec![position(len, index.expect_int("index")?)?]),
    }
}

fn target_names(target: &Expr, out: &mut Vec<String>) {
    match target {
        Expr::Name(name) => out.push(name.clone()),
        Expr::Tuple(items) | Expr::List(items) => {
            for item in items {
                target_names(item, out);
            }
        }
        _ => {}
    }
}

pub(crate) struct Interpreter {
    globals: HashMap<String, Value>,
    budget: Budget,
    loop_depth: usize,
}

impl Interpreter {
    /// Fresh namespace with `price`, `data`, `pd` and `np` bound.
    pub(crate) fn new(bars: &[PriceBar], limits: SandboxLimits) -> EvalResult<Self> {
        let mut budget = Budget::start(limits);
        budget.allocate(bars.len() * 5)?;

        let column = |f: fn(&PriceBar) -> f64| Rc::new(bars.iter().map(f).collect::<Vec<_>>());
        let closes = column(|b| b.close);
        let frame = Frame {
            columns: vec![
                ("Open".into(), column(|b| b.open)),
                ("High".into(), column(|b| b.high)),
                ("Low".into(), column(|b| b.low)),
                ("Close".into(), closes.clone()),
                ("Volume".into(), column(|b| b.volume)),
            ],
            rows: bars.len(),
        };

        let mut globals = HashMap::new();
        globals.insert("price".to_string(), Value::Series(closes));
        globals.insert("data".to_string(), Value::Frame(Rc::new(frame)));
        globals.insert("pd".to_string(), Value::Module(Module::Pandas));
        globals.insert("np".to_string(), Value::Module(Module::Numpy));

        Ok(Self {
            globals,
            budget,
            loop_depth: 0,
        })
    }

    pub(crate) fn execute(&mut self, program: &Program) -> EvalResult<()> {
        self.exec_block(&program.body).map(|_| ())
    }

    /// Remove and return a binding.
    pub(crate) fn take(&mut self, name: &str) -> Option<Value> {
        self.globals.remove(name)
    }

    pub(crate) fn budget(&self) -> &Budget {
        &self.budget
    }

    // ========================================================================
    // Statements
    // ========================================================================

    fn exec_block(&mut self, body: &[Stmt]) -> EvalResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<Flow> {
        self.exec_kind(&stmt.kind).map_err(|e| e.at_line(stmt.line))
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> EvalResult<Flow> {
        self.budget.step()?;
        match kind {
            StmtKind::Import(names) => {
                for alias in names {
                    self.import(alias)?;
                }
            }
            StmtKind::FromImport { module, names } => self.import_from(module, names)?,
            StmtKind::Assign { targets, value } => {
                let value = self.eval(value)?;
                for target in targets {
                    self.assign(target, value.clone())?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let rhs = self.eval(value)?;
                let current = self.eval(target)?;
                let updated = ops::binary(*op, &current, &rhs, &mut self.budget)?;
                self.assign(target, updated)?;
            }
            StmtKind::Expr(expr) => {
                self.eval(expr)?;
            }
            StmtKind::If { test, body, orelse } => {
                let branch = if self.eval(test)?.truthy()? { body } else { orelse };
                return self.exec_block(branch);
            }
            StmtKind::For { target, iter, body } => {
                let iterable = self.eval(iter)?;
                self.loop_depth += 1;
                let result = self.exec_for(target, iterable, body);
                self.loop_depth -= 1;
                result?;
            }
            StmtKind::While { test, body } => {
                self.loop_depth += 1;
                let result = self.exec_while(test, body);
                self.loop_depth -= 1;
                result?;
            }
            StmtKind::Pass => {}
            StmtKind::Break | StmtKind::Continue if self.loop_depth == 0 => {
                return Err(runtime("'break' or 'continue' outside loop"));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Unsupported { keyword, .. } => {
                return Err(runtime(format!(
                    "'{keyword}' is not supported in strategy scripts"
                )));
            }
        }
        Ok(Flow::Next)
    }

    fn import(&mut self, alias: &ImportAlias) -> EvalResult<()> {
        let module = match &alias.alias {
            Some(_) => resolve_module(&alias.name)?,
            None => {
                resolve_module(&alias.name)?;
                resolve_module(alias.bound_name())?
            }
        };
        self.globals
            .insert(alias.bound_name().to_string(), Value::Module(module));
        Ok(())
    }

    fn import_from(&mut self, module_name: &str, names: &[ImportAlias]) -> EvalResult<()> {
        let module = resolve_module(module_name)?;
        for alias in names {
            if alias.name == "*" {
                for (name, value) in library::module_exports(&module) {
                    self.globals.insert(name, value);
                }
                continue;
            }
            let value = match &module {
                Module::Inert(_) => {
                    Value::Module(Module::Inert(Rc::from(format!("{module_name}.{}", alias.name))))
                }
                _ => library::module_attribute(&module, &alias.name).map_err(|_| {
                    runtime(format!(
                        "cannot import name '{}' from '{module_name}'",
                        alias.name
                    ))
                })?,
            };
            self.globals.insert(alias.bound_name().to_string(), value);
        }
        Ok(())
    }

    fn exec_for(&mut self, target: &Expr, iterable: Value, body: &[Stmt]) -> EvalResult<()> {
        let items: Box<dyn Iterator<Item = Value>> = match iterable {
            Value::Range { start, stop, step } => Box::new(
                (0..range_len(start, stop, step)).map(move |i| Value::Number(range_item(start, step, i))),
            ),
            other => Box::new(self.materialize(&other)?.into_iter()),
        };

        for (count, item) in items.enumerate() {
            self.budget.loop_iteration(count as u64 + 1)?;
            self.assign(target, item)?;
            if let Flow::Break = self.exec_block(body)? {
                break;
            }
        }
        Ok(())
    }

    fn exec_while(&mut self, test: &Expr, body: &[Stmt]) -> EvalResult<()> {
        let mut count = 0u64;
        while self.eval(test)?.truthy()? {
            count += 1;
            self.budget.loop_iteration(count)?;
            if let Flow::Break = self.exec_block(body)? {
                break;
            }
        }
        Ok(())
    }

    fn materialize(&mut self, iterable: &Value) -> EvalResult<Vec<Value>> {
        iterable.iterate(&mut self.budget)
    }

    // ========================================================================
    // Assignment
    // ========================================================================

    fn assign(&mut self, target: &Expr, value: Value) -> EvalResult<()> {
        match target {
            Expr::Name(name) => {
                self.globals.insert(name.clone(), value);
                Ok(())
            }
            Expr::Tuple(targets) | Expr::List(targets) => {
                let values = self.materialize(&value)?;
                if values.len() != targets.len() {
                    return Err(runtime(format!(
                        "cannot unpack {} values into {} targets",
                        values.len(),
                        targets.len()
                    )));
                }
                for (target, value) in targets.iter().zip(values) {
                    self.assign(target, value)?;
                }
                Ok(())
            }
            Expr::Subscript { value: container, index } => {
                let name = match container.as_ref() {
                    Expr::Name(name) => name,
                    Expr::Attribute { value: inner, attr } if attr == "iloc" => match inner.as_ref() {
                        Expr::Name(name) => name,
                        _ => return Err(runtime("unsupported assignment target")),
                    },
                    _ => return Err(runtime("unsupported assignment target")),
                };
                let key = self.eval_key(index)?;
                let mut current = self
                    .globals
                    .remove(name)
                    .ok_or_else(|| runtime(format!("name '{name}' is not defined")))?;
                let result = self.store_item(&mut current, key, value);
                self.globals.insert(name.clone(), current);
                result
            }
            Expr::Attribute { value: inner, attr } => {
                let Expr::Name(name) = inner.as_ref() else {
                    return Err(runtime("unsupported assignment target"));
                };
                match self.globals.get_mut(name) {
                    Some(Value::Frame(frame)) => {
                        let rows = frame.rows;
                        let column = column_values(&value, rows)?;
                        Rc::make_mut(frame).set_column(attr, column);
                        Ok(())
                    }
                    Some(other) => Err(runtime(format!(
                        "'{}' object attribute '{attr}' is read-only",
                        other.type_name()
                    ))),
                    None => Err(runtime(format!("name '{name}' is not defined"))),
                }
            }
            _ => Err(runtime("cannot assign to expression")),
        }
    }

    fn store_item(&mut self, container: &mut Value, key: Key, value: Value) -> EvalResult<()> {
        match container {
            Value::Mask(mask) if matches!(value, Value::Bool(_)) => {
                let positions = positions(mask.len(), &key)?;
                let flag = matches!(value, Value::Bool(true));
                let cells = Rc::make_mut(mask);
                for p in positions {
                    cells[p] = flag;
                }
                Ok(())
            }
            Value::Mask(_) => {
                let mut promoted = Value::Series(container.as_series().unwrap_or_default());
                self.store_item(&mut promoted, key, value)?;
                *container = promoted;
                Ok(())
            }
            Value::Series(values) => {
                let len = values.len();
                let positions = positions(len, &key)?;
                let source = operand(&value, "item assignment")?;
                let aligned = match source.array_len() {
                    None => false,
                    Some(n) if n == len => true,
                    Some(n) if n == positions.len() => false,
                    Some(n) => return Err(ops::length_mismatch(positions.len(), n)),
                };
                if Rc::strong_count(values) > 1 {
                    self.budget.allocate(len)?;
                }
                let cells = Rc::make_mut(values);
                for (k, &p) in positions.iter().enumerate() {
                    cells[p] = source.at(if aligned { p } else { k });
                }
                Ok(())
            }
            Value::Frame(frame) => {
                let Key::Item(Value::Str(column)) = &key else {
                    return Err(runtime("DataFrame columns are assigned by name"));
                };
                let values = column_values(&value, frame.rows)?;
                Rc::make_mut(frame).set_column(column, values);
                Ok(())
            }
            Value::List(items) => {
                let Key::Item(index) = &key else {
                    return Err(runtime("slice assignment on lists is not supported"));
                };
                let p = position(items.len(), index.expect_int("list index")?)?;
                Rc::make_mut(items)[p] = value;
                Ok(())
            }
            other => Err(runtime(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    // ========================================================================
    // Expressions
    // ========================================================================

    fn lookup(&self, name: &str) -> EvalResult {
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        Builtin::lookup(name)
            .map(|b| Value::Function(Callable::Builtin(b)))
            .ok_or_else(|| runtime(format!("name '{name}' is not defined")))
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult {
        self.budget.step()?;
        match expr {
            Expr::None => Ok(Value::None),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::str(s)),
            Expr::Name(name) => self.lookup(name),
            Expr::List(items) => Ok(Value::List(Rc::new(self.eval_all(items)?))),
            Expr::Tuple(items) => Ok(Value::Tuple(Rc::new(self.eval_all(items)?))),
            Expr::Dict(_) => Err(runtime("dict literals are not supported")),
            Expr::Attribute { value, attr } => {
                let base = self.eval(value)?;
                library::value_attribute(&base, attr)
            }
            Expr::Subscript { value, index } => {
                let base = self.eval(value)?;
                let key = self.eval_key(index)?;
                self.load_item(&base, &key)
            }
            Expr::Slice { .. } => Err(runtime("slice is only valid inside a subscript")),
            Expr::Call { func, args, kwargs } => self.eval_call(func, args, kwargs),
            Expr::Unary { op, operand } => {
                let value = self.eval(operand)?;
                ops::unary(*op, &value, &mut self.budget)
            }
            Expr::Binary { left, op, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                ops::binary(*op, &l, &r, &mut self.budget)
            }
            Expr::Compare { left, op, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                ops::compare(*op, &l, &r, &mut self.budget)
            }
            Expr::BoolOp { op, left, right } => {
                let l = self.eval(left)?;
                let short_circuit = match op {
                    BoolOperator::And => !l.truthy()?,
                    BoolOperator::Or => l.truthy()?,
                };
                if short_circuit {
                    Ok(l)
                } else {
                    self.eval(right)
                }
            }
            Expr::IfExp { test, body, orelse } => {
                if self.eval(test)?.truthy()? {
                    self.eval(body)
                } else {
                    self.eval(orelse)
                }
            }
            Expr::ListComp {
                element,
                target,
                iter,
                conditions,
            } => self.eval_list_comp(element, target, iter, conditions),
            Expr::Unsupported { keyword, .. } => Err(runtime(format!(
                "'{keyword}' is not supported in strategy scripts"
            ))),
        }
    }

    fn eval_all(&mut self, exprs: &[Expr]) -> EvalResult<Vec<Value>> {
        exprs.iter().map(|e| self.eval(e)).collect()
    }

    fn eval_optional_int(&mut self, expr: &Option<Box<Expr>>) -> EvalResult<Option<i64>> {
        match expr {
            None => Ok(None),
            Some(e) => match self.eval(e)? {
                Value::None => Ok(None),
                v => v.expect_int("slice index").map(Some),
            },
        }
    }

    fn eval_key(&mut self, index: &Expr) -> EvalResult<Key> {
        match index {
            Expr::Slice { lower, upper, step } => Ok(Key::Slice {
                lower: self.eval_optional_int(lower)?,
                upper: self.eval_optional_int(upper)?,
                step: self.eval_optional_int(step)?,
            }),
            other => Ok(Key::Item(self.eval(other)?)),
        }
    }

    fn load_item(&mut self, base: &Value, key: &Key) -> EvalResult {
        match base {
            Value::Series(values) | Value::ILoc(values) => match key {
                Key::Item(index @ (Value::Number(_) | Value::Bool(_))) => {
                    Ok(Value::Number(values[position(values.len(), index.expect_int("index")?)?]))
                }
                _ => {
                    let positions = positions(values.len(), key)?;
                    self.budget.allocate(positions.len())?;
                    Ok(Value::series(positions.iter().map(|&p| values[p]).collect()))
                }
            },
            Value::Mask(mask) => match key {
                Key::Item(index @ Value::Number(_)) => {
                    Ok(Value::Bool(mask[position(mask.len(), index.expect_int("index")?)?]))
                }
                _ => {
                    let positions = positions(mask.len(), key)?;
                    self.budget.allocate(positions.len())?;
                    Ok(Value::mask(positions.iter().map(|&p| mask[p]).collect()))
                }
            },
            Value::Frame(frame) => match key {
                Key::Item(Value::Str(column)) => frame
                    .column(column)
                    .map(|values| Value::Series(values.clone()))
                    .ok_or_else(|| runtime(format!("KeyError: '{column}'"))),
                _ => Err(runtime("DataFrame columns are selected by name")),
            },
            Value::List(items) | Value::Tuple(items) => match key {
                Key::Item(index) => {
                    Ok(items[position(items.len(), index.expect_int("list index")?)?].clone())
                }
                Key::Slice { .. } => {
                    let selected: Vec<Value> = positions(items.len(), key)?
                        .iter()
                        .map(|&p| items[p].clone())
                        .collect();
                    Ok(match base {
                        Value::Tuple(_) => Value::Tuple(Rc::new(selected)),
                        _ => Value::List(Rc::new(selected)),
                    })
                }
            },
            Value::Str(s) => {
                let chars: Vec<char> = s.chars().collect();
                let positions = positions(chars.len(), key)?;
                Ok(Value::str(&positions.iter().map(|&p| chars[p]).collect::<String>()))
            }
            Value::Index(n) => match key {
                Key::Item(index) => Ok(Value::Number(position(*n, index.expect_int("index")?)? as f64)),
                Key::Slice { .. } => Ok(Value::Index(positions(*n, key)?.len())),
            },
            Value::Range { start, stop, step } => match key {
                Key::Item(index) => {
                    let p = position(range_len(*start, *stop, *step), index.expect_int("index")?)?;
                    Ok(Value::Number(range_item(*start, *step, p)))
                }
                Key::Slice { .. } => {
                    let items = self.materialize(base)?;
                    let positions = positions(items.len(), key)?;
                    Ok(Value::List(Rc::new(positions.iter().map(|&p| items[p].clone()).collect())))
                }
            },
            other => Err(runtime(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    fn eval_call(&mut self, func: &Expr, args: &[Expr], kwargs: &[(String, Expr)]) -> EvalResult {
        if let Expr::Attribute { value, attr } = func {
            if let Expr::Name(name) = value.as_ref() {
                if attr == "append" && matches!(self.globals.get(name), Some(Value::List(_))) {
                    return self.append(name, args, kwargs);
                }
            }
        }

        let callee = self.eval(func)?;
        let positional = self.eval_all(args)?;
        let mut keywords = Vec::with_capacity(kwargs.len());
        for (name, expr) in kwargs {
            keywords.push((name.clone(), self.eval(expr)?));
        }

        match callee {
            Value::Function(callable) => library::call(
                &callable,
                Args {
                    positional,
                    keywords,
                },
                &mut self.budget,
            ),
            Value::Module(Module::Inert(name)) => Err(runtime(format!(
                "'{name}' is not available in the sandbox"
            ))),
            other => Err(runtime(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    fn append(&mut self, name: &str, args: &[Expr], kwargs: &[(String, Expr)]) -> EvalResult {
        if args.len() != 1 || !kwargs.is_empty() {
            return Err(runtime("append() takes exactly one argument"));
        }
        let item = self.eval(&args[0])?;
        self.budget.allocate(1)?;
        if let Some(Value::List(items)) = self.globals.get_mut(name) {
            Rc::make_mut(items).push(item);
        }
        Ok(Value::None)
    }

    fn eval_list_comp(
        &mut self,
        element: &Expr,
        target: &Expr,
        iter: &Expr,
        conditions: &[Expr],
    ) -> EvalResult {
        let iterable = self.eval(iter)?;
        let items = self.materialize(&iterable)?;

        let mut names = Vec::new();
        target_names(target, &mut names);
        let saved: Vec<(String, Option<Value>)> = names
            .into_iter()
            .map(|name| {
                let previous = self.globals.get(&name).cloned();
                (name, previous)
            })
            .collect();

        let result = self.comprehend(element, target, conditions, items);

        for (name, previous) in saved {
            match previous {
                Some(value) => self.globals.insert(name, value),
                None => self.globals.remove(&name),
            };
        }
        result.map(|values| Value::List(Rc::new(values)))
    }

    fn comprehend(
        &mut self,
        element: &Expr,
        target: &Expr,
        conditions: &[Expr],
        items: Vec<Value>,
    ) -> EvalResult<Vec<Value>> {
        let mut out = Vec::new();
        'items: for (count, item) in items.into_iter().enumerate() {
            self.budget.loop_iteration(count as u64 + 1)?;
            self.assign(target, item)?;
            for condition in conditions {
                if !self.eval(condition)?.truthy()? {
                    continue 'items;
                }
            }
            out.push(self.eval(element)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_positions_follow_python() {
        assert_eq!(slice_positions(5, None, None, None).unwrap(), vec![0, 1, 2, 3, 4]);
        assert_eq!(slice_positions(5, Some(-2), None, None).unwrap(), vec![3, 4]);
        assert_eq!(slice_positions(5, None, Some(-3), None).unwrap(), vec![0, 1]);
        assert_eq!(slice_positions(5, None, None, Some(-2)).unwrap(), vec![4, 2, 0]);
        assert_eq!(slice_positions(5, Some(10), None, None).unwrap(), Vec::<usize>::new());
        assert!(slice_positions(5, None, None, Some(0)).is_err());
    }

    #[test]
    fn test_position_wraps_negative() {
        assert_eq!(position(3, -1).unwrap(), 2);
        assert!(position(3, 3).is_err());
        assert!(position(3, -4).is_err());
    }

    #[test]
    fn test_resolve_module() {
        assert_eq!(resolve_module("numpy").unwrap(), Module::Numpy);
        assert!(matches!(resolve_module("numpy.linalg").unwrap(), Module::Inert(_)));
        assert!(matches!(resolve_module("vectorbt").unwrap(), Module::Inert(_)));
        assert!(resolve_module("os").is_err());
    }
}
