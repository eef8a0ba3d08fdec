//! Prompt and response contract with the text-generation collaborator.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use atlas_common::util::truncate_with_ellipsis;

use crate::collaborators::{AnalysisRequest, KnowledgeSnippet};

pub const PLANNER_SYSTEM_PROMPT: &str =
    "You are an expert quantitative trader and strategy developer.";

pub const ANALYST_SYSTEM_PROMPT: &str = "You are an expert quantitative trading analyst \
     specializing in strategy performance evaluation and improvement.";

/// Query used to pull knowledge for planning.
pub const PLANNING_QUERY: &str = "trading strategy improvement risk management";

/// Snippet text is cut to this many characters in planning prompts.
const SNIPPET_CHARS: usize = 300;

const DEFAULT_MOTIVATION: &str =
    "Strategy modification based on feedback and knowledge insights.";

const PLANNER_INSTRUCTIONS: &str = r#"You improve daily trading strategies written as short scripts.

Script rules:
- `price` is the close series and `data` the OHLCV table of the period being tested.
- `pd`, `np` and `math` (after `import math`) provide the numeric toolkit.
- The script must assign `signals`: a number or a series of target exposures in [-1, 1].
- Only pandas, numpy, math, vectorbt and datetime may be imported.
- Never look ahead: no negative shifts, no file, network, clock or system access.
- Functions, classes, lambdas and try blocks are not available.

Answer with exactly one fenced ```python code block followed by a
`## Motivation:` section explaining the change."#;

/// Failure to read a strategy out of generated text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseError {
    #[error("No strategy code found in generated response")]
    MissingCode,
}

/// Code and motivation extracted from a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyDraft {
    pub code: String,
    pub motivation: String,
}

/// Planning prompt for the next generation of a strategy.
#[derive(Debug, Clone, Default)]
pub struct PlanningPrompt {
    pub parent_code: String,
    pub parent_motivation: String,
    pub analyzer_feedback: String,
    pub snippets: Vec<KnowledgeSnippet>,
}

impl PlanningPrompt {
    pub fn render(&self) -> String {
        format!(
            "{PLANNER_INSTRUCTIONS}\n\n## Current Task:\n\n\
             **Parent Strategy Code:**\n```python\n{}\n```\n\n\
             **Parent Motivation:**\n{}\n\n\
             **Analyzer Feedback:**\n{}\n\n\
             **Relevant Knowledge Context:**\n{}\n\n---\n\n\
             Please generate an improved strategy following the format specified above. \
             Focus on making incremental improvements that address the analyzer feedback \
             while incorporating insights from the knowledge context.\n",
            self.parent_code.trim_end(),
            self.parent_motivation.trim(),
            self.analyzer_feedback.trim(),
            format_snippets(&self.snippets),
        )
    }
}

/// Numbered citation list, text truncated to a few hundred characters.
pub fn format_snippets(snippets: &[KnowledgeSnippet]) -> String {
    if snippets.is_empty() {
        return "No relevant knowledge found.".to_string();
    }
    snippets
        .iter()
        .enumerate()
        .map(|(i, s)| {
            format!(
                "[{}] From {} (similarity: {:.3}):\n{}\n",
                i + 1,
                s.source_name(),
                s.score,
                truncate_with_ellipsis(&s.text, SNIPPET_CHARS)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Analysis prompt for the report collaborator.
pub fn render_analysis_prompt(request: &AnalysisRequest) -> String {
    let windows = request.summary.num_test_windows;
    let unstable_windows = request.metric("test_unstable_windows");
    format!(
        "## Analysis Task:\n\n**Strategy ID:** {id}\n\n\
         **Strategy Code:**\n```python\n{code}\n```\n\n\
         **Strategy Motivation:**\n{motivation}\n\n\
         **Backtest Results:**\n\
         - Test Sharpe Ratio: {sharpe:.3}\n\
         - Test Return: {ret:.2}%\n\
         - Test Max Drawdown: {maxdd:.2}%\n\
         - Test Turnover: {turnover:.3}\n\
         - Test Beta: {beta:.3}\n\
         - Unstable Windows: {unstable_windows} out of {windows}\n\
         - Stability Score: {stability:.1}%\n\n\
         **Full Metrics:**\n\
         - Train Sharpe: {train:.3}\n\
         - Validation Sharpe: {validation:.3}\n\
         - Test Sharpe: {sharpe:.3}\n\n\
         **Stability Analysis:**\n\
         - Strategy marked as {label}\n\n\
         **Walk-Forward Report:**\n```\n{report}```\n\n\
         **Relevant Knowledge Context:**\n{knowledge}\n\n---\n\n\
         Write a markdown analysis with actionable improvements. End with a \
         `## Next Action for Planner` section.\n",
        id = request.strategy_id,
        code = request.code.trim_end(),
        motivation = request.motivation.trim(),
        sharpe = request.metric("test_avg_sharpe"),
        ret = request.metric("test_avg_return") * 100.0,
        maxdd = request.metric("test_avg_maxdd") * 100.0,
        turnover = request.metric("test_avg_turnover"),
        beta = request.metric("test_avg_beta"),
        stability = request.summary.stability_pct(),
        train = request.metric("train_avg_sharpe"),
        validation = request.metric("validation_avg_sharpe"),
        label = if request.unstable() { "UNSTABLE" } else { "STABLE" },
        report = request.report,
        knowledge = format_snippets(&request.snippets),
    )
}

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[ \t]*(?:python|py)?[ \t]*\r?\n(.*?)```").unwrap());

static MOTIVATION_FALLBACK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)(?:Motivation|Explanation):\s*(.*?)(?:\n\n|\n##|$)").unwrap()
});

/// Extract a [`StrategyDraft`] from generated text.
///
/// Code is the first fenced block. Motivation is the text under
/// `## Motivation:` or `**Motivation:**` up to the next `##` heading, falling
/// back to any `Motivation:`/`Explanation:` label, then to a default.
pub fn parse_strategy_response(text: &str) -> Result<StrategyDraft, ResponseError> {
    let code = FENCED_BLOCK
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|code| !code.is_empty())
        .ok_or(ResponseError::MissingCode)?;

    let mut motivation = motivation_section(text);
    if motivation.is_empty() {
        motivation = MOTIVATION_FALLBACK
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
    }
    if motivation.is_empty() {
        motivation = DEFAULT_MOTIVATION.to_string();
    }

    Ok(StrategyDraft { code, motivation })
}

fn motivation_section(text: &str) -> String {
    let mut lines = Vec::new();
    let mut inside = false;
    let mut in_code = false;
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_code = !in_code;
            continue;
        }
        if in_code {
            continue;
        }
        if trimmed.starts_with("## Motivation:") || trimmed.starts_with("**Motivation:**") {
            inside = true;
            continue;
        }
        if inside && trimmed.starts_with("##") {
            break;
        }
        if inside {
            lines.push(line);
        }
    }
    lines.join("\n").trim().to_string()
}

/// The `## Next Action for Planner` section of a previous analysis.
pub fn extract_next_action(analysis: &str) -> String {
    let mut lines = Vec::new();
    let mut inside = false;
    for line in analysis.lines() {
        if line.contains("## Next Action for Planner") {
            inside = true;
            continue;
        }
        if inside && line.starts_with("##") {
            break;
        }
        if inside {
            lines.push(line);
        }
    }
    lines.join("\n").trim().to_string()
}

/// 20/50 moving-average crossover used when no parent exists yet.
pub fn seed_strategy() -> StrategyDraft {
    StrategyDraft {
        code: r#"import pandas as pd
import numpy as np

# Simple moving average crossover
short_window = 20
long_window = 50

short_ma = price.rolling(window=short_window).mean()
long_ma = price.rolling(window=long_window).mean()

signals = pd.Series(0.0, index=price.index)

# Long when the short average is above the long one, short when below
signals[short_ma > long_ma] = 1.0
signals[short_ma < long_ma] = -1.0

signals = signals.fillna(method='ffill').fillna(0.0)"#
            .to_string(),
        motivation: "Initial seed strategy using a classic 20/50 day moving average crossover. \
             It goes long when short-term momentum exceeds long-term momentum and short \
             otherwise, and serves as the baseline for later generations."
            .to_string(),
    }
}

// ============================================================================
// Tests
// ============================================================================
