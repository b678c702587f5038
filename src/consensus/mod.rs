//! Cross-model consensus validation.
//!
//! A prompt is run through the cascade twice. The two JSON verdicts are
//! scored for structural agreement; when the score is below the threshold
//! and they disagree somewhere, a third "judge" call picks one of them.
//! Validation never fails: missing or unparsable verdicts yield a result
//! with [`ConsensusStatus::Degraded`].

mod scoring;

pub use scoring::{consensus_score, disagreements, MISSING};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::instrument;

use crate::cascade::ProviderCascade;
use crate::observability::{default_metrics, MetricsCollector};

/// Reasoning recorded when the judge call fails.
pub const JUDGE_FALLBACK_REASONING: &str = "Judge unavailable; falling back to verdict 1";

/// Consensus configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsensusConfig {
    /// Scores below this trigger the judge (0–100).
    pub threshold: u8,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self { threshold: 80 }
    }
}

/// How the final verdict was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusStatus {
    /// Scores met the threshold (or nothing disagreed); verdict A stands.
    Agreed,
    /// The judge chose a verdict.
    Judged,
    /// The judge failed; verdict A stands.
    JudgeFailed,
    /// A verdict was missing or unparsable.
    Degraded,
}

/// Outcome of a validation. Immutable; owned by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    model_a: String,
    model_b: String,
    verdict_a: Value,
    verdict_b: Value,
    consensus_score: u8,
    disagreements: Vec<String>,
    final_verdict: Value,
    judge_reasoning: Option<String>,
    judge_credibility: Option<u8>,
    status: ConsensusStatus,
    raw: Option<String>,
}

impl ConsensusResult {
    /// `"provider/model"` that produced verdict A.
    pub fn model_a(&self) -> &str {
        &self.model_a
    }

    /// `"provider/model"` that produced verdict B.
    pub fn model_b(&self) -> &str {
        &self.model_b
    }

    /// First verdict (`Null` when unavailable).
    pub fn verdict_a(&self) -> &Value {
        &self.verdict_a
    }

    /// Second verdict (`Null` when unavailable).
    pub fn verdict_b(&self) -> &Value {
        &self.verdict_b
    }

    /// Agreement score, 0–100.
    pub fn consensus_score(&self) -> u8 {
        self.consensus_score
    }

    /// Differing keys, `"key: <a> vs <b>"`.
    pub fn disagreements(&self) -> &[String] {
        &self.disagreements
    }

    /// The verdict to use.
    pub fn final_verdict(&self) -> &Value {
        &self.final_verdict
    }

    /// Judge's (or the fallback) reasoning, when a judge call was made.
    pub fn judge_reasoning(&self) -> Option<&str> {
        self.judge_reasoning.as_deref()
    }

    /// Judge's credibility score, 0–100.
    pub fn judge_credibility(&self) -> Option<u8> {
        self.judge_credibility
    }

    /// How the final verdict was reached.
    pub fn status(&self) -> ConsensusStatus {
        self.status
    }

    /// Raw answer text, for degraded results.
    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// True when the judge was called.
    pub fn judged(&self) -> bool {
        matches!(self.status, ConsensusStatus::Judged | ConsensusStatus::JudgeFailed)
    }
}

#[derive(Debug, Deserialize)]
struct JudgeDecision {
    #[serde(alias = "chosenVerdict")]
    chosen_verdict: Value,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default, alias = "credibilityScore")]
    credibility_score: Option<f64>,
}

impl JudgeDecision {
    fn choice(&self) -> Option<u8> {
        match &self.chosen_verdict {
            Value::Number(n) if n.as_u64() == Some(1) => Some(1),
            Value::Number(n) if n.as_u64() == Some(2) => Some(2),
            Value::String(s) => match s.trim() {
                "1" => Some(1),
                "2" => Some(2),
                _ => None,
            },
            _ => None,
        }
    }

    fn credibility(&self) -> Option<u8> {
        self.credibility_score
            .filter(|s| s.is_finite())
            .map(|s| s.clamp(0.0, 100.0).round() as u8)
    }
}

/// Runs prompts twice and arbitrates disagreements.
pub struct ConsensusValidator {
    cascade: Arc<ProviderCascade>,
    config: ConsensusConfig,
    metrics: Arc<dyn MetricsCollector>,
}

impl ConsensusValidator {
    /// Creates a validator over `cascade`.
    pub fn new(cascade: Arc<ProviderCascade>, config: ConsensusConfig) -> Self {
        Self {
            cascade,
            config,
            metrics: default_metrics(),
        }
    }

    /// Records validations in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Validates `prompt` across two cascade calls.
    #[instrument(skip(self, prompt))]
    pub async fn validate(&self, prompt: &str) -> ConsensusResult {
        tracing::info!("Generating first verdict");
        let (response_a, verdict_a) = self.cascade.chat_json_value(prompt).await;
        tracing::info!("Generating second verdict");
        let (response_b, verdict_b) = self.cascade.chat_json_value(prompt).await;

        let model_a = response_a.label();
        let model_b = response_b.label();

        let (verdict_a, verdict_b) = match (verdict_a, verdict_b) {
            (Ok(a), Ok(b)) => (a, b),
            (a, b) => {
                let raw = match (&a, &b) {
                    (Err(_), _) => raw_text(&response_a.content, response_a.last_error.as_deref()),
                    _ => raw_text(&response_b.content, response_b.last_error.as_deref()),
                };
                let verdict_a = a.unwrap_or(Value::Null);
                let verdict_b = b.unwrap_or(Value::Null);
                let final_verdict = if verdict_a.is_null() {
                    verdict_b.clone()
                } else {
                    verdict_a.clone()
                };

                tracing::warn!(model_a = %model_a, model_b = %model_b, "Verdict unavailable, returning degraded result");
                self.metrics.record_consensus(0, false);
                return ConsensusResult {
                    model_a,
                    model_b,
                    verdict_a,
                    verdict_b,
                    consensus_score: 0,
                    disagreements: Vec::new(),
                    final_verdict,
                    judge_reasoning: None,
                    judge_credibility: None,
                    status: ConsensusStatus::Degraded,
                    raw: Some(raw),
                };
            }
        };

        let score = consensus_score(&verdict_a, &verdict_b);
        let disagreements = disagreements(&verdict_a, &verdict_b);
        tracing::info!(score, disagreements = disagreements.len(), "Verdicts compared");

        let mut result = ConsensusResult {
            model_a,
            model_b,
            final_verdict: verdict_a.clone(),
            verdict_a,
            verdict_b,
            consensus_score: score,
            disagreements,
            judge_reasoning: None,
            judge_credibility: None,
            status: ConsensusStatus::Agreed,
            raw: None,
        };

        if score < self.config.threshold && !result.disagreements.is_empty() {
            tracing::warn!(score, threshold = self.config.threshold, "Low consensus, calling judge");
            self.judge(&mut result).await;
        }

        self.metrics.record_consensus(result.consensus_score, result.judged());
        result
    }

    async fn judge(&self, result: &mut ConsensusResult) {
        let prompt = judge_prompt(&result.verdict_a, &result.verdict_b, &result.disagreements);

        let decision = match self.cascade.chat_json::<JudgeDecision>(&prompt).await {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(error = %e, "Judge call failed");
                return judge_failed(result);
            }
        };

        let chosen = match decision.choice() {
            Some(1) => result.verdict_a.clone(),
            Some(2) => result.verdict_b.clone(),
            _ => {
                tracing::error!(choice = %decision.chosen_verdict, "Judge chose an unknown verdict");
                return judge_failed(result);
            }
        };

        result.final_verdict = chosen;
        result.judge_credibility = decision.credibility();
        result.judge_reasoning = Some(decision.reasoning.unwrap_or_default());
        result.status = ConsensusStatus::Judged;
    }
}

fn judge_failed(result: &mut ConsensusResult) {
    result.final_verdict = result.verdict_a.clone();
    result.judge_reasoning = Some(JUDGE_FALLBACK_REASONING.to_string());
    result.status = ConsensusStatus::JudgeFailed;
}

fn raw_text(content: &str, last_error: Option<&str>) -> String {
    if content.is_empty() {
        last_error.unwrap_or_default().to_string()
    } else {
        content.to_string()
    }
}

fn judge_prompt(verdict_a: &Value, verdict_b: &Value, disagreements: &[String]) -> String {
    format!(
        "You are an impartial judge of forensic audit verdicts.\n\n\
         Verdict 1:\n{:#}\n\n\
         Verdict 2:\n{:#}\n\n\
         Areas of disagreement:\n{}\n\n\
         Analyse both verdicts and choose the more reliable one.\n\
         Answer with JSON only:\n\
         {{\"chosenVerdict\": 1 or 2, \"reasoning\": \"why this verdict is more reliable\", \"credibilityScore\": 0-100}}",
        verdict_a,
        verdict_b,
        disagreements.join("\n")
    )
}

impl std::fmt::Debug for ConsensusValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusValidator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decision(value: Value) -> JudgeDecision {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_judge_decision_accepts_camel_case() {
        let d = decision(json!({"chosenVerdict": 2, "reasoning": "better sourced", "credibilityScore": 87.4}));
        assert_eq!(d.choice(), Some(2));
        assert_eq!(d.credibility(), Some(87));
        assert_eq!(d.reasoning.as_deref(), Some("better sourced"));
    }

    #[test]
    fn test_judge_decision_string_choice() {
        assert_eq!(decision(json!({"chosen_verdict": "1"})).choice(), Some(1));
    }

    #[test]
    fn test_judge_decision_rejects_other_choices() {
        assert_eq!(decision(json!({"chosenVerdict": 3})).choice(), None);
        assert_eq!(decision(json!({"chosenVerdict": "both"})).choice(), None);
    }

    #[test]
    fn test_credibility_is_clamped() {
        assert_eq!(decision(json!({"chosenVerdict": 1, "credibilityScore": 140})).credibility(), Some(100));
    }

    #[test]
    fn test_judge_prompt_lists_disagreements() {
        let prompt = judge_prompt(
            &json!({"a": 1}),
            &json!({"a": 2}),
            &["a: 1 vs 2".to_string()],
        );
        assert!(prompt.contains("a: 1 vs 2"));
        assert!(prompt.contains("\"chosenVerdict\": 1 or 2"));
    }
}
