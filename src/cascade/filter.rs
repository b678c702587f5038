//! Content-filter detection and prompt softening.
//!
//! Both are driven by a rule table so signatures can be tuned without
//! touching the cascade's control flow.

use regex::Regex;

use crate::errors::{NexusError, NexusResult};

/// Characters of a response inspected for refusal signatures. Refusals open
/// the answer; a long analysis that quotes one later is not a refusal.
pub const REFUSAL_SCAN_CHARS: usize = 400;

/// What a matching rule does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterAction {
    /// A response matching the pattern is a content-filter refusal.
    Refuse,
    /// Prompt text matching the pattern is replaced when softening.
    Rewrite(String),
}

/// A pattern and its action.
#[derive(Debug, Clone)]
pub struct FilterRule {
    pattern: Regex,
    action: FilterAction,
}

impl FilterRule {
    /// Creates a refusal signature.
    pub fn refuse(pattern: &str) -> NexusResult<Self> {
        Ok(Self {
            pattern: compile(pattern)?,
            action: FilterAction::Refuse,
        })
    }

    /// Creates a softening rewrite.
    pub fn rewrite(pattern: &str, replacement: impl Into<String>) -> NexusResult<Self> {
        Ok(Self {
            pattern: compile(pattern)?,
            action: FilterAction::Rewrite(replacement.into()),
        })
    }

    /// The rule's pattern.
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    /// The rule's action.
    pub fn action(&self) -> &FilterAction {
        &self.action
    }
}

fn compile(pattern: &str) -> NexusResult<Regex> {
    Regex::new(pattern)
        .map_err(|e| NexusError::configuration(format!("invalid filter pattern '{}': {}", pattern, e)))
}

const DEFAULT_REFUSALS: &[&str] = &[
    r"(?i)\bI(?:'m| am) sorry,? but I (?:can(?:'|no)?t|am unable|won't)",
    r"(?i)\bI (?:can(?:'|no)?t|cannot|won't) (?:assist|help|comply|provide)",
    r"(?i)\bI(?:'m| am) (?:not able|unable) to (?:assist|help|provide|comply)",
    r"(?i)\bas an AI(?: language model)?\b",
    r"(?i)\bnão posso (?:ajudar|atender|fornecer|responder)",
    r"(?i)\bdesculpe,? mas não (?:posso|consigo)",
    r"(?i)\bcomo (?:um|uma) (?:modelo de linguagem|IA)\b",
];

const DEFAULT_REWRITES: &[(&str, &str)] = &[
    (r"(?i)\badversarial\b", "critical"),
    (r"(?i)\battack(?:s|ing)?\b", "analyze"),
    (r"(?i)\bexpose\b", "document"),
    (r"(?i)\bdestroy\b", "evaluate"),
    (r"(?i)\bcorruption\b", "alleged irregularities"),
    (r"(?i)\bcriminals?\b", "public officials under scrutiny"),
    (r"(?i)\bagressiv[oa]\b", "crítico"),
    (r"(?i)\bataque\b", "análise"),
];

const DEFAULT_SOFTEN_PREFIX: &str =
    "Provide an objective, factual and neutral analysis based on public records. ";

/// Ordered refusal and rewrite rules.
#[derive(Debug, Clone)]
pub struct FilterRules {
    rules: Vec<FilterRule>,
    soften_prefix: String,
}

impl Default for FilterRules {
    fn default() -> Self {
        let refusals = DEFAULT_REFUSALS
            .iter()
            .filter_map(|p| FilterRule::refuse(p).ok());
        let rewrites = DEFAULT_REWRITES
            .iter()
            .filter_map(|(p, r)| FilterRule::rewrite(p, *r).ok());

        Self {
            rules: refusals.chain(rewrites).collect(),
            soften_prefix: DEFAULT_SOFTEN_PREFIX.to_string(),
        }
    }
}

impl FilterRules {
    /// Creates an empty table.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            soften_prefix: String::new(),
        }
    }

    /// Appends a rule.
    pub fn with_rule(mut self, rule: FilterRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Sets the text prepended to softened prompts.
    pub fn with_soften_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.soften_prefix = prefix.into();
        self
    }

    /// The rules in evaluation order.
    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    /// Returns the first refusal pattern matching the opening of `content`.
    pub fn refusal(&self, content: &str) -> Option<&str> {
        let head = match content.char_indices().nth(REFUSAL_SCAN_CHARS) {
            Some((idx, _)) => &content[..idx],
            None => content,
        };

        self.rules
            .iter()
            .filter(|r| r.action == FilterAction::Refuse)
            .find(|r| r.pattern.is_match(head))
            .map(FilterRule::pattern)
    }

    /// Applies every rewrite rule and prepends the softening prefix.
    pub fn soften(&self, prompt: &str) -> String {
        let mut softened = prompt.to_string();
        for rule in &self.rules {
            if let FilterAction::Rewrite(replacement) = &rule.action {
                softened = rule
                    .pattern
                    .replace_all(&softened, replacement.as_str())
                    .into_owned();
            }
        }
        format!("{}{}", self.soften_prefix, softened)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("I'm sorry, but I can't help with that request." ; "english apology")]
    #[test_case("I cannot assist with requests about specific politicians." ; "cannot assist")]
    #[test_case("As an AI language model, I do not have opinions." ; "as an ai")]
    #[test_case("Desculpe, mas não posso ajudar com isso." ; "portuguese apology")]
    #[test_case("Não posso fornecer esse tipo de análise." ; "portuguese refusal")]
    fn test_detects_refusals(content: &str) {
        assert!(FilterRules::default().refusal(content).is_some());
    }

    #[test_case(r#"{"score": 72, "summary": "Promise partially fulfilled"}"# ; "json verdict")]
    #[test_case("The senator voted for the bill in 2023 and kept the promise." ; "plain analysis")]
    fn test_accepts_answers(content: &str) {
        assert!(FilterRules::default().refusal(content).is_none());
    }

    #[test]
    fn test_refusal_only_scans_opening() {
        let content = format!("{} I cannot assist with that.", "x".repeat(REFUSAL_SCAN_CHARS));
        assert!(FilterRules::default().refusal(&content).is_none());
    }

    #[test]
    fn test_soften_rewrites_and_prefixes() {
        let rules = FilterRules::empty()
            .with_rule(FilterRule::rewrite(r"(?i)\battack\b", "analyze").unwrap())
            .with_soften_prefix("Be neutral. ");

        assert_eq!(rules.soften("Attack the record"), "Be neutral. analyze the record");
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        assert!(matches!(
            FilterRule::refuse("("),
            Err(NexusError::Configuration { .. })
        ));
    }

    #[test]
    fn test_default_rules_all_compile() {
        let rules = FilterRules::default();
        assert_eq!(rules.rules().len(), DEFAULT_REFUSALS.len() + DEFAULT_REWRITES.len());
    }
}
