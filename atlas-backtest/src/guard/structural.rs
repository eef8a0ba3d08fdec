//! Rules that inspect the parsed tree.

use crate::dsl::{walk_expr, walk_stmt, Expr, Stmt, StmtKind, Visitor};

use super::{PolicyRule, SourceUnit, Violation, ViolationKind};

/// Builtins that evaluate code, reflect on the interpreter or read input.
const BANNED_CALLS: &[&str] = &[
    "eval",
    "exec",
    "compile",
    "input",
    "__import__",
    "globals",
    "locals",
    "vars",
    "getattr",
    "setattr",
    "delattr",
    "breakpoint",
    "memoryview",
];

const FILE_CALLS: &[&str] = &["open", "file"];

/// Method names that read the wall clock.
const CLOCK_METHODS: &[&str] = &[
    "now",
    "today",
    "utcnow",
    "time",
    "perf_counter",
    "monotonic",
    "process_time",
];

/// Dataframe reader/writer methods that touch the filesystem.
const IO_METHODS: &[&str] = &[
    "read_csv",
    "read_json",
    "read_html",
    "read_sql",
    "read_pickle",
    "read_parquet",
    "read_excel",
    "read_table",
    "read_clipboard",
    "to_csv",
    "to_json",
    "to_pickle",
    "to_sql",
    "to_parquet",
    "to_excel",
    "to_html",
    "to_clipboard",
];

/// Namespaces whose attributes reach the OS or the interpreter.
const SYSTEM_NAMESPACES: &[&str] = &[
    "os",
    "sys",
    "subprocess",
    "shutil",
    "builtins",
    "importlib",
    "pathlib",
    "ctypes",
    "signal",
    "multiprocessing",
    "threading",
];

fn is_dunder(name: &str) -> bool {
    name.len() > 4 && name.starts_with("__") && name.ends_with("__")
}

// ============================================================================
// Imports
// ============================================================================

/// Flags imports whose top-level package is outside the allow-list.
#[derive(Debug, Clone)]
pub struct ImportRule {
    allowed: Vec<String>,
}

impl ImportRule {
    pub fn new(allowed: Vec<String>) -> Self {
        Self { allowed }
    }

    fn is_allowed(&self, module: &str) -> bool {
        if module.starts_with('.') {
            return false;
        }
        let top = module.split('.').next().unwrap_or(module);
        self.allowed.iter().any(|m| m == top)
    }
}

struct ImportCollector<'r> {
    rule: &'r ImportRule,
    found: Vec<Violation>,
}

impl Visitor for ImportCollector<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Import(names) => {
                for alias in names {
                    if !self.rule.is_allowed(&alias.name) {
                        self.found.push(Violation::new(
                            ViolationKind::BannedImport,
                            format!("Banned import: {}", alias.name),
                        ));
                    }
                }
            }
            StmtKind::FromImport { module, .. } => {
                if !self.rule.is_allowed(module) {
                    self.found.push(Violation::new(
                        ViolationKind::BannedImport,
                        format!("Banned import from: {module}"),
                    ));
                }
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }
}

impl PolicyRule for ImportRule {
    fn name(&self) -> &'static str {
        "imports"
    }

    fn check(&self, source: &SourceUnit<'_>) -> Vec<Violation> {
        let mut collector = ImportCollector {
            rule: self,
            found: Vec::new(),
        };
        collector.visit_program(source.program);
        collector.found
    }
}

// ============================================================================
// Calls and attributes
// ============================================================================

/// Flags dynamic evaluation, file I/O, clock reads and OS namespace access.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallRule;

#[derive(Default)]
struct CallCollector {
    found: Vec<Violation>,
}

impl CallCollector {
    fn push(&mut self, kind: ViolationKind, message: String) {
        self.found.push(Violation::new(kind, message));
    }

    fn check_call(&mut self, func: &Expr, args: &[Expr]) {
        match func {
            Expr::Name(name) if BANNED_CALLS.contains(&name.as_str()) => {
                self.push(ViolationKind::BannedCall, format!("Banned function call: {name}()"));
            }
            Expr::Name(name) if FILE_CALLS.contains(&name.as_str()) => {
                let target = match args.first() {
                    Some(Expr::Str(path)) => format!("'{path}'"),
                    _ => "...".to_string(),
                };
                self.push(
                    ViolationKind::BannedCall,
                    format!("Banned file operation: {name}({target})"),
                );
            }
            Expr::Attribute { value, attr } if CLOCK_METHODS.contains(&attr.as_str()) => {
                let shown = value
                    .dotted_name()
                    .map(|base| format!("{base}.{attr}"))
                    .unwrap_or_else(|| attr.clone());
                self.push(ViolationKind::BannedCall, format!("Banned clock call: {shown}()"));
            }
            Expr::Attribute { attr, .. } if IO_METHODS.contains(&attr.as_str()) => {
                self.push(
                    ViolationKind::BannedCall,
                    format!("Banned file operation: .{attr}()"),
                );
            }
            _ => {}
        }
    }
}

impl Visitor for CallCollector {
    fn visit_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Call { func, args, .. } => self.check_call(func, args),
            Expr::Attribute { value, attr } => {
                if let Expr::Name(namespace) = value.as_ref() {
                    if SYSTEM_NAMESPACES.contains(&namespace.as_str()) {
                        self.push(
                            ViolationKind::BannedAttribute,
                            format!("Banned module access: {namespace}.{attr}"),
                        );
                    }
                }
                if is_dunder(attr) {
                    self.push(
                        ViolationKind::BannedAttribute,
                        format!("Banned attribute access: {attr}"),
                    );
                }
            }
            Expr::Name(name) if is_dunder(name) && name != "__import__" => {
                self.push(ViolationKind::BannedAttribute, format!("Banned name: {name}"));
            }
            _ => {}
        }
        walk_expr(self, expr);
    }
}

impl PolicyRule for CallRule {
    fn name(&self) -> &'static str {
        "calls"
    }

    fn check(&self, source: &SourceUnit<'_>) -> Vec<Violation> {
        let mut collector = CallCollector::default();
        collector.visit_program(source.program);
        collector.found
    }
}

// ============================================================================
// Unsupported constructs
// ============================================================================

/// Flags constructs the sandbox interpreter never executes.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedConstructRule;

#[derive(Default)]
struct ConstructCollector {
    found: Vec<Violation>,
}

impl Visitor for ConstructCollector {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let StmtKind::Unsupported { keyword, .. } = &stmt.kind {
            self.found.push(Violation::new(
                ViolationKind::UnsupportedConstruct,
                format!("Unsupported construct: {keyword} (line {})", stmt.line),
            ));
        }
        walk_stmt(self, stmt);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Unsupported { keyword, .. } = expr {
            self.found.push(Violation::new(
                ViolationKind::UnsupportedConstruct,
                format!("Unsupported construct: {keyword}"),
            ));
        }
        walk_expr(self, expr);
    }
}

impl PolicyRule for UnsupportedConstructRule {
    fn name(&self) -> &'static str {
        "constructs"
    }

    fn check(&self, source: &SourceUnit<'_>) -> Vec<Violation> {
        let mut collector = ConstructCollector::default();
        collector.visit_program(source.program);
        collector.found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse_program;
    use test_case::test_case;

    fn run(rule: &dyn PolicyRule, code: &str) -> Vec<String> {
        let program = parse_program(code).unwrap();
        let unit = SourceUnit {
            code,
            program: &program,
        };
        rule.check(&unit).into_iter().map(|v| v.message).collect()
    }

    fn imports() -> ImportRule {
        ImportRule::new(
            ["pandas", "numpy", "vectorbt", "math", "datetime"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        )
    }

    // ========================================================================
    // Imports
    // ========================================================================

    #[test_case("import pandas as pd" ; "aliased")]
    #[test_case("import numpy.linalg" ; "submodule")]
    #[test_case("from datetime import timedelta" ; "from import")]
    #[test_case("import math, numpy" ; "multiple")]
    fn test_allowed_imports(code: &str) {
        assert!(run(&imports(), code).is_empty());
    }

    #[test_case("import requests", "Banned import: requests")]
    #[test_case("import os.path", "Banned import: os.path")]
    #[test_case("from subprocess import run", "Banned import from: subprocess")]
    #[test_case("from . import helpers", "Banned import from: .")]
    fn test_banned_imports(code: &str, expected: &str) {
        assert_eq!(run(&imports(), code), vec![expected.to_string()]);
    }

    #[test]
    fn test_nested_import_is_found() {
        let code = "if True:\n    import socket\n";
        assert_eq!(run(&imports(), code), vec!["Banned import: socket"]);
    }

    // ========================================================================
    // Calls and attributes
    // ========================================================================

    #[test_case("x = eval('1')", "Banned function call: eval()")]
    #[test_case("f = open('/etc/passwd')", "Banned file operation: open('/etc/passwd')")]
    #[test_case("df = pd.read_csv(path)", "Banned file operation: .read_csv()")]
    #[test_case("t = datetime.datetime.now()", "Banned clock call: datetime.datetime.now()")]
    #[test_case("t = time.time()", "Banned clock call: time.time()")]
    #[test_case("cls = price.__class__", "Banned attribute access: __class__")]
    #[test_case("b = __builtins__", "Banned name: __builtins__")]
    fn test_banned_calls(code: &str, expected: &str) {
        assert_eq!(run(&CallRule, code), vec![expected.to_string()]);
    }

    #[test]
    fn test_system_namespace_access() {
        let found = run(&CallRule, "os.system('ls')\nsys.exit(0)\n");
        assert_eq!(
            found,
            vec!["Banned module access: os.system", "Banned module access: sys.exit"]
        );
    }

    #[test]
    fn test_ordinary_library_calls_pass() {
        let code = "ma = price.rolling(window=20).mean()\nz = np.where(ma > 0, 1, -1)\n";
        assert!(run(&CallRule, code).is_empty());
    }

    // ========================================================================
    // Unsupported constructs
    // ========================================================================

    #[test]
    fn test_def_and_lambda_flagged() {
        let code = "def f(x):\n    return x\ng = lambda x: x\n";
        let found = run(&UnsupportedConstructRule, code);
        assert_eq!(found.len(), 3);
        assert!(found[0].starts_with("Unsupported construct: def"));
        assert!(found.iter().any(|m| m.starts_with("Unsupported construct: return")));
        assert!(found.iter().any(|m| m == "Unsupported construct: lambda"));
    }
}
