//! Numeric limits on leverage and position size found in the source text.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{PolicyRule, SourceUnit, Violation, ViolationKind};

fn compile(label: &'static str, pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|e| tracing::error!(label, error = %e, "Invalid guard pattern"))
        .ok()
}

/// `leverage = 5`, `max_leverage: 5`, `margin=4`
static LEVERAGE_ASSIGNMENT: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(
        "leverage assignment",
        r"(?i)(?:\b|_)(?:leverage|margin)\s*[=:]\s*(\d+(?:\.\d+)?)",
    )
});

/// `name * 3`, `x) * 3`, `x] * 3`; the left side excludes `*` so `**` never matches.
static TRAILING_FACTOR: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(
        "trailing factor",
        r"(?:[A-Za-z_][A-Za-z0-9_]*|[)\]])\s*\*\s*(\d+(?:\.\d+)?)",
    )
});

/// `3 * name`, `3 * (x)`
static LEADING_FACTOR: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(
        "leading factor",
        r"(?:^|[^\w.*])(\d+(?:\.\d+)?)\s*\*\s*[A-Za-z_(]",
    )
});

/// `position`, `max_position` and `pos_size` take any `_` prefix; a bare
/// `size` must stand alone so `window_size` is not a position.
static POSITION_ASSIGNMENT: Lazy<Option<Regex>> = Lazy::new(|| {
    compile(
        "position assignment",
        r"(?i)(?:(?:\b|_)(?:position_size|pos_size|position)|\bsize)\s*(?:>=|>|=)\s*(\d*\.?\d+)",
    )
});

/// Multipliers below this are never read as leverage.
const MIN_LEVERAGE_FACTOR: f64 = 3.0;

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

fn format_percent(fraction: f64) -> String {
    format_number((fraction * 100.0 * 1e6).round() / 1e6)
}

fn captured_values<'a>(pattern: &'a Option<Regex>, code: &'a str) -> impl Iterator<Item = f64> + 'a {
    pattern
        .iter()
        .flat_map(move |p| p.captures_iter(code))
        .filter_map(|caps| caps.get(1))
        .filter_map(|m| m.as_str().parse::<f64>().ok())
}

fn push_unique(found: &mut Vec<Violation>, violation: Violation) {
    if !found.contains(&violation) {
        found.push(violation);
    }
}

// ============================================================================
// Leverage
// ============================================================================

/// Flags explicit leverage/margin values and large literal multipliers.
#[derive(Debug, Clone, Copy)]
pub struct LeverageRule {
    max_leverage: f64,
}

impl LeverageRule {
    pub fn new(max_leverage: f64) -> Self {
        Self { max_leverage }
    }

    fn violation(&self, value: f64) -> Violation {
        Violation::new(
            ViolationKind::LeverageLimit,
            format!(
                "Leverage {}x exceeds maximum {}x",
                format_number(value),
                format_number(self.max_leverage)
            ),
        )
    }
}

impl PolicyRule for LeverageRule {
    fn name(&self) -> &'static str {
        "leverage"
    }

    fn check(&self, source: &SourceUnit<'_>) -> Vec<Violation> {
        let mut found = Vec::new();

        for value in captured_values(&LEVERAGE_ASSIGNMENT, source.code) {
            if value > self.max_leverage {
                push_unique(&mut found, self.violation(value));
            }
        }

        let factors = captured_values(&TRAILING_FACTOR, source.code)
            .chain(captured_values(&LEADING_FACTOR, source.code));
        for factor in factors {
            if factor >= MIN_LEVERAGE_FACTOR && factor > self.max_leverage {
                push_unique(&mut found, self.violation(factor));
            }
        }

        found
    }
}

// ============================================================================
// Position size
// ============================================================================

/// Flags position/size literals above the allowed fraction of daily volume.
#[derive(Debug, Clone, Copy)]
pub struct PositionRule {
    max_position_fraction: f64,
}

impl PositionRule {
    pub fn new(max_position_fraction: f64) -> Self {
        Self {
            max_position_fraction,
        }
    }
}

impl PolicyRule for PositionRule {
    fn name(&self) -> &'static str {
        "position"
    }

    fn check(&self, source: &SourceUnit<'_>) -> Vec<Violation> {
        let mut found = Vec::new();
        for value in captured_values(&POSITION_ASSIGNMENT, source.code) {
            if value > self.max_position_fraction {
                push_unique(
                    &mut found,
                    Violation::new(
                        ViolationKind::PositionLimit,
                        format!(
                            "Position size {}% exceeds maximum {}% of average daily volume",
                            format_percent(value),
                            format_percent(self.max_position_fraction)
                        ),
                    ),
                );
            }
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::parse_program;
    use test_case::test_case;

    fn messages(rule: &dyn PolicyRule, code: &str) -> Vec<String> {
        let program = parse_program(code).unwrap();
        rule.check(&SourceUnit {
            code,
            program: &program,
        })
        .into_iter()
        .map(|v| v.message)
        .collect()
    }

    #[test_case("leverage = 3", "Leverage 3x exceeds maximum 2x")]
    #[test_case("MARGIN = 4.5", "Leverage 4.5x exceeds maximum 2x")]
    #[test_case("signals = raw * 5", "Leverage 5x exceeds maximum 2x")]
    #[test_case("signals = 10 * raw", "Leverage 10x exceeds maximum 2x")]
    #[test_case("signals = (a + b) * 3", "Leverage 3x exceeds maximum 2x")]
    #[test_case("max_leverage = 5", "Leverage 5x exceeds maximum 2x")]
    #[test_case("target_leverage=4", "Leverage 4x exceeds maximum 2x")]
    #[test_case("initial_margin = 3", "Leverage 3x exceeds maximum 2x")]
    fn test_leverage_flagged(code: &str, expected: &str) {
        assert_eq!(messages(&LeverageRule::new(2.0), code), vec![expected.to_string()]);
    }

    #[test_case("leverage = 1.5" ; "under limit")]
    #[test_case("signals = raw * 2" ; "small factor")]
    #[test_case("vol = ret ** 3" ; "power is not multiplication")]
    #[test_case("x = 2 * 3" ; "pure literals")]
    fn test_leverage_allowed(code: &str) {
        assert!(messages(&LeverageRule::new(2.0), code).is_empty());
    }

    #[test]
    fn test_duplicate_leverage_reported_once() {
        let found = messages(&LeverageRule::new(2.0), "a = x * 4\nb = y * 4\n");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_factor_must_exceed_configured_max() {
        assert!(messages(&LeverageRule::new(5.0), "s = x * 4").is_empty());
    }

    #[test_case("position = 0.10", "Position size 10% exceeds maximum 5% of average daily volume")]
    #[test_case("pos_size = 1", "Position size 100% exceeds maximum 5% of average daily volume")]
    #[test_case("flag = size > .5", "Position size 50% exceeds maximum 5% of average daily volume")]
    #[test_case("max_position = 0.5", "Position size 50% exceeds maximum 5% of average daily volume")]
    #[test_case("target_pos_size = 0.2", "Position size 20% exceeds maximum 5% of average daily volume")]
    fn test_position_flagged(code: &str, expected: &str) {
        assert_eq!(messages(&PositionRule::new(0.05), code), vec![expected.to_string()]);
    }

    #[test_case("position = 0.01" ; "under limit")]
    #[test_case("window_size = 20" ; "size suffix is not a position")]
    #[test_case("lot_size = 100" ; "other size suffix")]
    #[test_case("same = position == 1" ; "equality comparison")]
    fn test_position_allowed(code: &str) {
        assert!(messages(&PositionRule::new(0.05), code).is_empty());
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let broken = compile("broken", r"(unclosed");
        assert!(broken.is_none());
        assert_eq!(captured_values(&broken, "leverage = 9").count(), 0);
    }
}
