//! Static policy verification for strategy scripts.
//!
//! A script is parsed once and then checked by every registered rule. Rules
//! are independent: each returns its own violations and the verdict is their
//! union, in registration order, so a caller sees every problem at once. A
//! syntax error is the one exception and yields a single violation.
//!
//! # Default rules
//!
//! | Rule | Layer | Flags |
//! |------|-------|-------|
//! | `imports` | structural | modules outside the allow-list |
//! | `calls` | structural | dynamic evaluation, file I/O, clock reads, OS namespaces |
//! | `constructs` | structural | `def`, `class`, `lambda`, `with`, `try`, ... |
//! | `network` | lexical | HTTP/socket/FTP/SMTP client usage |
//! | `forward_looking` | lexical | negative shifts and lookahead vocabulary |
//! | `leverage` | numeric | leverage/margin literals and large multipliers |
//! | `position` | numeric | position/size literals above the ADV fraction |
//!
//! Passing verification is not a security boundary. The sandbox namespace is.

mod audit;
mod bounds;
mod lexical;
mod structural;

pub use audit::{audit_signals, SignalAudit};
pub use bounds::{LeverageRule, PositionRule};
pub use lexical::{ForwardLookingRule, NetworkRule};
pub use structural::{CallRule, ImportRule, UnsupportedConstructRule};

use atlas_common::GuardConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::dsl::{parse_program, Program};
use crate::error::{BacktestError, Result};

/// Category of a policy violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    Syntax,
    BannedImport,
    BannedCall,
    BannedAttribute,
    UnsupportedConstruct,
    NetworkAccess,
    ForwardLooking,
    LeverageLimit,
    PositionLimit,
}

/// One itemized policy violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub message: String,
}

impl Violation {
    pub fn new(kind: ViolationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Pass/fail outcome of verifying one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationVerdict {
    pub passed: bool,
    pub violations: Vec<Violation>,
}

impl VerificationVerdict {
    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Violation messages in order.
    pub fn violations_text(&self) -> Vec<String> {
        self.violations.iter().map(|v| v.message.clone()).collect()
    }

    pub fn has_kind(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }
}

/// Source handed to every rule: the raw text and its parsed tree.
pub struct SourceUnit<'a> {
    pub code: &'a str,
    pub program: &'a Program,
}

impl SourceUnit<'_> {
    /// 1-based line number of a byte offset in the raw text.
    pub fn line_of(&self, offset: usize) -> usize {
        self.code[..offset.min(self.code.len())]
            .bytes()
            .filter(|&b| b == b'\n')
            .count()
            + 1
    }
}

/// An independent check over a parsed submission.
pub trait PolicyRule: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// Return every violation found; an empty list means the rule passed.
    fn check(&self, source: &SourceUnit<'_>) -> Vec<Violation>;
}

/// Strategy code that passed verification, together with its parsed tree.
///
/// Only [`PolicyVerifier::approve`] constructs this, and the sandbox only
/// executes this, so unverified code cannot reach execution.
#[derive(Debug, Clone)]
pub struct VerifiedStrategy {
    code: Arc<str>,
    program: Arc<Program>,
}

impl VerifiedStrategy {
    pub fn code(&self) -> &str {
        &self.code
    }

    pub(crate) fn program(&self) -> &Program {
        &self.program
    }
}

/// Runs a set of [`PolicyRule`]s over strategy code.
pub struct PolicyVerifier {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl Default for PolicyVerifier {
    fn default() -> Self {
        Self::new(&GuardConfig::default())
    }
}

impl fmt::Debug for PolicyVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PolicyVerifier")
            .field("rules", &self.rule_names())
            .finish()
    }
}

impl PolicyVerifier {
    /// Verifier with the default rule set configured from `config`.
    pub fn new(config: &GuardConfig) -> Self {
        Self::empty()
            .with_rule(ImportRule::new(config.allowed_modules.clone()))
            .with_rule(CallRule)
            .with_rule(UnsupportedConstructRule)
            .with_rule(NetworkRule)
            .with_rule(ForwardLookingRule)
            .with_rule(LeverageRule::new(config.max_leverage))
            .with_rule(PositionRule::new(config.max_position_fraction))
    }

    /// Verifier with no rules; only syntax is checked.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register an additional rule; it runs after the existing ones.
    pub fn with_rule(mut self, rule: impl PolicyRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Check `code` against every rule.
    pub fn verify(&self, code: &str) -> VerificationVerdict {
        self.inspect(code).0
    }

    /// Verify and, on success, return the token the sandbox accepts.
    pub fn approve(&self, code: &str) -> Result<VerifiedStrategy> {
        match self.inspect(code) {
            (verdict, Some(program)) if verdict.passed => Ok(VerifiedStrategy {
                code: Arc::from(code),
                program: Arc::new(program),
            }),
            (verdict, _) => Err(BacktestError::VerificationFailure(verdict)),
        }
    }

    fn inspect(&self, code: &str) -> (VerificationVerdict, Option<Program>) {
        let program = match parse_program(code) {
            Ok(program) => program,
            Err(e) => {
                tracing::debug!(error = %e, "Strategy failed to parse");
                let violation = Violation::new(ViolationKind::Syntax, format!("Syntax error: {e}"));
                return (VerificationVerdict::from_violations(vec![violation]), None);
            }
        };

        let source = SourceUnit {
            code,
            program: &program,
        };

        let mut violations = Vec::new();
        for rule in &self.rules {
            let found = rule.check(&source);
            if !found.is_empty() {
                tracing::debug!(rule = rule.name(), count = found.len(), "Policy rule flagged code");
            }
            violations.extend(found);
        }

        let verdict = VerificationVerdict::from_violations(violations);
        tracing::info!(
            passed = verdict.passed,
            violations = verdict.violations.len(),
            "Strategy verification complete"
        );
        (verdict, Some(program))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEED: &str = "import pandas as pd
import numpy as np

short_window = 20
long_window = 50

short_ma = price.rolling(window=short_window).mean()
long_ma = price.rolling(window=long_window).mean()

signals = pd.Series(0.0, index=price.index)
signals[short_ma > long_ma] = 1.0
signals[short_ma < long_ma] = -1.0
";

    #[test]
    fn test_seed_strategy_passes() {
        let verdict = PolicyVerifier::default().verify(SEED);
        assert!(verdict.passed, "unexpected violations: {:?}", verdict.violations);
    }

    #[test]
    fn test_syntax_error_short_circuits() {
        let verdict = PolicyVerifier::default().verify("import os\nsignals = (1 +\n");
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
        assert_eq!(verdict.violations[0].kind, ViolationKind::Syntax);
        assert!(verdict.violations[0].message.starts_with("Syntax error:"));
    }

    #[test]
    fn test_deeply_nested_code_is_a_syntax_violation() {
        let code = format!("signals = {}1{}", "(".repeat(100_000), ")".repeat(100_000));
        let verdict = PolicyVerifier::default().verify(&code);
        assert!(!verdict.passed);
        assert_eq!(verdict.violations.len(), 1);
        assert_eq!(verdict.violations[0].kind, ViolationKind::Syntax);
        assert!(verdict.violations[0].message.contains("nesting exceeds"));
    }

    #[test]
    fn test_violations_are_unioned_without_short_circuit() {
        let code = "import requests\nimport os\nx = os.getcwd()\nsignals = price.shift(-1)\n";
        let verdict = PolicyVerifier::default().verify(code);
        assert!(!verdict.passed);
        assert!(verdict.has_kind(ViolationKind::BannedImport));
        assert!(verdict.has_kind(ViolationKind::BannedAttribute));
        assert!(verdict.has_kind(ViolationKind::ForwardLooking));
        assert!(verdict.violations.len() >= 4);
    }

    #[test]
    fn test_approve_returns_token_only_on_pass() {
        let verifier = PolicyVerifier::default();
        let strategy = verifier.approve(SEED).unwrap();
        assert_eq!(strategy.code(), SEED);
        assert!(!strategy.program().body.is_empty());

        match verifier.approve("import socket\n") {
            Err(BacktestError::VerificationFailure(verdict)) => {
                assert_eq!(verdict.violations_text(), vec!["Banned import: socket"]);
            }
            other => panic!("expected verification failure, got {other:?}"),
        }
    }

    #[test]
    fn test_custom_rule_is_appended() {
        struct NoPrint;
        impl PolicyRule for NoPrint {
            fn name(&self) -> &'static str {
                "no_print"
            }
            fn check(&self, source: &SourceUnit<'_>) -> Vec<Violation> {
                if source.code.contains("print(") {
                    vec![Violation::new(ViolationKind::BannedCall, "print is not allowed")]
                } else {
                    Vec::new()
                }
            }
        }

        let verifier = PolicyVerifier::empty().with_rule(NoPrint);
        assert_eq!(verifier.rule_names(), vec!["no_print"]);
        assert!(!verifier.verify("print(1)").passed);
        assert!(verifier.verify("x = 1").passed);
    }

    #[test]
    fn test_line_of() {
        let program = Program::default();
        let unit = SourceUnit {
            code: "a\nb\nc",
            program: &program,
        };
        assert_eq!(unit.line_of(0), 1);
        assert_eq!(unit.line_of(2), 2);
        assert_eq!(unit.line_of(4), 3);
    }
}
