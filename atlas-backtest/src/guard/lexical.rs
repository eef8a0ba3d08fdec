//! Rules that scan the raw source text.
//!
//! These are deliberately coarse: they also match inside comments and string
//! literals, and they report the first occurrence of each pattern.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::dsl::{walk_expr, Expr, UnaryOperator, Visitor};

use super::{PolicyRule, SourceUnit, Violation, ViolationKind};

/// A labelled source pattern.
struct LexicalPattern {
    label: &'static str,
    pattern: Regex,
}

fn compile(table: &[(&'static str, &str)]) -> Vec<LexicalPattern> {
    table
        .iter()
        .filter_map(|(label, pattern)| match Regex::new(pattern) {
            Ok(pattern) => Some(LexicalPattern { label, pattern }),
            Err(e) => {
                tracing::error!(label, error = %e, "Invalid guard pattern");
                None
            }
        })
        .collect()
}

static NETWORK_PATTERNS: Lazy<Vec<LexicalPattern>> = Lazy::new(|| {
    compile(&[
        ("requests", r"requests\."),
        ("urllib", r"urllib\."),
        ("aiohttp", r"aiohttp\."),
        ("httpx", r"httpx\."),
        ("socket", r"socket\."),
        ("http", r"http\."),
        ("ftp", r"ftp\."),
        ("smtp", r"smtp\."),
        ("url", r"https?://"),
        ("get", r"\.get\("),
        ("post", r"\.post\("),
        ("put", r"\.put\("),
        ("delete", r"\.delete\("),
        ("download", r"\.download"),
        ("fetch", r"\.fetch"),
    ])
});

static FORWARD_PATTERNS: Lazy<Vec<LexicalPattern>> = Lazy::new(|| {
    compile(&[
        ("negative shift", r"(?i)\.shift\(\s*-"),
        ("future", r"(?i)future"),
        ("tomorrow", r"(?i)tomorrow"),
        ("next", r"(?i)next_"),
        ("lead", r"(?i)lead\("),
    ])
});

fn scan(
    source: &SourceUnit<'_>,
    patterns: &[LexicalPattern],
    kind: ViolationKind,
    describe: &str,
) -> Vec<Violation> {
    patterns
        .iter()
        .filter_map(|p| {
            p.pattern.find(source.code).map(|m| {
                Violation::new(
                    kind,
                    format!(
                        "{describe} ({}): `{}` (line {})",
                        p.label,
                        m.as_str(),
                        source.line_of(m.start())
                    ),
                )
            })
        })
        .collect()
}

// ============================================================================
// Network
// ============================================================================

/// Flags HTTP, socket, FTP and SMTP client usage.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkRule;

impl PolicyRule for NetworkRule {
    fn name(&self) -> &'static str {
        "network"
    }

    fn check(&self, source: &SourceUnit<'_>) -> Vec<Violation> {
        scan(
            source,
            &NETWORK_PATTERNS,
            ViolationKind::NetworkAccess,
            "Network operation detected",
        )
    }
}

// ============================================================================
// Forward-looking
// ============================================================================

/// Flags lookahead: negative shifts and future-referencing vocabulary.
///
/// Besides the text patterns, `shift(periods=-n)` is caught on the tree since
/// the keyword form slips past the `.shift(-` pattern.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardLookingRule;

#[derive(Default)]
struct NegativeShiftCollector {
    found: Vec<Violation>,
}

fn is_negative_literal(expr: &Expr) -> bool {
    match expr {
        Expr::Number(n) => *n < 0.0,
        Expr::Unary {
            op: UnaryOperator::Neg,
            operand,
        } => matches!(operand.as_ref(), Expr::Number(n) if *n > 0.0),
        _ => false,
    }
}

impl Visitor for NegativeShiftCollector {
    fn visit_expr(&mut self, expr: &Expr) {
        if let Expr::Call { func, kwargs, .. } = expr {
            let is_shift = matches!(func.as_ref(), Expr::Attribute { attr, .. } if attr == "shift");
            if is_shift
                && kwargs
                    .iter()
                    .any(|(name, value)| name == "periods" && is_negative_literal(value))
            {
                self.found.push(Violation::new(
                    ViolationKind::ForwardLooking,
                    "Potential forward-looking operation (negative shift): `shift(periods=-n)`",
                ));
            }
        }
        walk_expr(self, expr);
    }
}

impl PolicyRule for ForwardLookingRule {
    fn name(&self) -> &'static str {
        "forward_looking"
    }

    fn check(&self, source: &SourceUnit<'_>) -> Vec<Violation> {
        let mut found = scan(
            source,
            &FORWARD_PATTERNS,
            ViolationKind::ForwardLooking,
            "Potential forward-looking operation",
        );
        let mut shifts = NegativeShiftCollector::default();
        shifts.visit_program(source.program);
        found.extend(shifts.found);
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse_program;
    use test_case::test_case;

    fn run(rule: &dyn PolicyRule, code: &str) -> Vec<Violation> {
        let program = parse_program(code).unwrap();
        rule.check(&SourceUnit {
            code,
            program: &program,
        })
    }

    #[test]
    fn test_patterns_compile() {
        assert_eq!(NETWORK_PATTERNS.len(), 15);
        assert_eq!(FORWARD_PATTERNS.len(), 5);
    }

    #[test_case("r = requests.get('x')" ; "requests")]
    #[test_case("u = 'https://example.com'" ; "url literal")]
    #[test_case("s = socket.socket()" ; "socket")]
    #[test_case("d = client.download" ; "download")]
    fn test_network_detected(code: &str) {
        let found = run(&NetworkRule, code);
        assert!(!found.is_empty());
        assert!(found.iter().all(|v| v.kind == ViolationKind::NetworkAccess));
    }

    #[test]
    fn test_network_reports_line_and_text() {
        let found = run(&NetworkRule, "x = 1\ny = urllib.parse\n");
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].message,
            "Network operation detected (urllib): `urllib.` (line 2)"
        );
    }

    #[test]
    fn test_clean_code_has_no_network() {
        let found = run(&NetworkRule, "ma = price.rolling(20).mean()\n");
        assert!(found.is_empty());
    }

    #[test_case("signals = price.shift(-1)" ; "negative shift")]
    #[test_case("signals = price.shift( -5) > price" ; "negative shift with space")]
    #[test_case("future_price = price" ; "future")]
    #[test_case("Tomorrow = 1" ; "tomorrow any case")]
    #[test_case("next_close = price" ; "next prefix")]
    #[test_case("signals = price.shift(periods=-2)" ; "keyword shift")]
    fn test_forward_looking_detected(code: &str) {
        let found = run(&ForwardLookingRule, code);
        assert!(!found.is_empty(), "nothing flagged in {code}");
        assert!(found.iter().all(|v| v.kind == ViolationKind::ForwardLooking));
    }

    #[test]
    fn test_positive_shift_allowed() {
        let found = run(&ForwardLookingRule, "prev = price.shift(1)\nsignals = price.shift(periods=3)\n");
        assert!(found.is_empty());
    }
}
