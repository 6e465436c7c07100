//! HEURISTIC tier: deterministic keyword matcher
//!
//! A static rule table maps word patterns to categories. No ML, no I/O; a
//! query is matched in well under a millisecond. Caller context can add
//! signals (`has_git_repo`, `has_test_files`, `error_output`).

use crate::error::HeuristicError;
use crate::types::{Category, DetectionContext, DetectionResult};
use regex::Regex;
use std::time::Instant;

/// One row of the rule table
#[derive(Debug, Clone, Copy)]
pub struct RuleSpec {
    pub category: Category,
    pub pattern: &'static str,
}

/// Keyword rules, one per category
pub const RULES: &[RuleSpec] = &[
    RuleSpec {
        category: Category::Git,
        pattern: r"(?i)\b(git|commit|commits|branch|merge|rebase|diff|checkout|stash|cherry-pick|pull request|blame)\b",
    },
    RuleSpec {
        category: Category::Debug,
        pattern: r"(?i)\b(debug|debugging|bug|bugs|error|errors|exception|crash|crashes|panic|traceback|stack trace|broken|fix|failing|fails|failed|failure)\b",
    },
    RuleSpec {
        category: Category::Test,
        pattern: r"(?i)\b(test|tests|testing|unit test|coverage|pytest|assert|mock|mocks|fixture|fixtures)\b",
    },
    RuleSpec {
        category: Category::Analysis,
        pattern: r"(?i)\b(analy[sz]e|analysis|explain|understand|review|investigate|architecture|structure|how does)\b",
    },
    RuleSpec {
        category: Category::Quality,
        pattern: r"(?i)\b(refactor|refactoring|lint|linter|clean up|cleanup|style|format|formatting|code smell|quality|readability)\b",
    },
    RuleSpec {
        category: Category::Security,
        pattern: r"(?i)\b(security|vulnerability|vulnerabilities|auth|authentication|authorization|injection|xss|csrf|secret|secrets|encrypt|encryption|cve)\b",
    },
    RuleSpec {
        category: Category::Performance,
        pattern: r"(?i)\b(performance|slow|slower|optimi[sz]e|optimization|latency|memory leak|profile|profiling|benchmark|speed up)\b",
    },
    RuleSpec {
        category: Category::Docs,
        pattern: r"(?i)\b(doc|docs|documentation|readme|docstring|docstrings|comment|comments|tutorial)\b",
    },
    RuleSpec {
        category: Category::External,
        pattern: r"(?i)\b(api|http|https|fetch|download|web|url|endpoint|third-party|deploy|deployment)\b",
    },
];

/// Confidence for a category matched by one keyword
const BASE_CONFIDENCE: f64 = 0.6;
/// Added per additional distinct keyword
const CONFIDENCE_STEP: f64 = 0.1;
/// Ceiling for keyword matches
const MAX_CONFIDENCE: f64 = 0.95;
/// Confidence for a category supported only by context
const CONTEXT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone)]
struct CompiledRule {
    category: Category,
    regex: Regex,
}

/// Keyword/signal matcher for the HEURISTIC tier
#[derive(Debug, Clone)]
pub struct HeuristicMatcher {
    rules: Vec<CompiledRule>,
    max_query_chars: usize,
}

impl HeuristicMatcher {
    /// Compile the built-in rule table
    ///
    /// # Errors
    /// - `HeuristicError::InvalidRule` if a pattern fails to compile
    pub fn new(max_query_chars: usize) -> Result<Self, HeuristicError> {
        Self::with_rules(RULES, max_query_chars)
    }

    /// Compile a custom rule table
    ///
    /// # Errors
    /// - `HeuristicError::InvalidRule` if a pattern fails to compile
    pub fn with_rules(rules: &[RuleSpec], max_query_chars: usize) -> Result<Self, HeuristicError> {
        let rules = rules
            .iter()
            .map(|spec| {
                Regex::new(spec.pattern)
                    .map(|regex| CompiledRule {
                        category: spec.category,
                        regex,
                    })
                    .map_err(|source| HeuristicError::InvalidRule {
                        category: spec.category,
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            max_query_chars,
        })
    }

    /// Match a query
    ///
    /// Returns `Ok(None)` when no rule and no context hint fired (empty
    /// signals). `core` is always on in a non-empty result, and every
    /// registry category is present as an explicit toggle.
    ///
    /// # Errors
    /// - `HeuristicError::QueryTooLong` if the query exceeds the configured limit
    pub fn detect(
        &self,
        query: &str,
        context: Option<&DetectionContext>,
    ) -> Result<Option<DetectionResult>, HeuristicError> {
        let started = Instant::now();

        let len = query.chars().count();
        if len > self.max_query_chars {
            return Err(HeuristicError::QueryTooLong {
                len,
                max: self.max_query_chars,
            });
        }

        let mut result = DetectionResult::new(Category::ALL.iter().map(|c| (*c, false)).collect());
        let mut matched_any = false;

        for rule in &self.rules {
            let mut hits: Vec<String> = Vec::new();
            for m in rule.regex.find_iter(query) {
                let word = m.as_str().to_ascii_lowercase();
                if !hits.contains(&word) {
                    hits.push(word);
                }
            }
            if hits.is_empty() {
                continue;
            }

            matched_any = true;
            let extra = f64::from(u32::try_from(hits.len() - 1).unwrap_or(u32::MAX));
            let confidence = (BASE_CONFIDENCE + CONFIDENCE_STEP * extra).min(MAX_CONFIDENCE);
            result.categories.insert(rule.category, true);
            result = result.with_confidence(rule.category, confidence);
            for hit in hits {
                result = result.with_signal(rule.category, format!("keyword:{hit}"));
            }
        }

        for (category, hint) in context_hints(context) {
            matched_any = true;
            result.categories.insert(category, true);
            if !result.confidence_scores.contains_key(&category) {
                result = result.with_confidence(category, CONTEXT_CONFIDENCE);
            }
            result = result.with_signal(category, format!("context:{hint}"));
        }

        if !matched_any {
            return Ok(None);
        }

        result.categories.insert(Category::Core, true);
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(Some(
            result
                .with_confidence(Category::Core, 1.0)
                .with_signal(Category::Core, "always_on")
                .with_detection_time_ms(elapsed_ms),
        ))
    }

    /// Number of compiled rules
    #[inline]
    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

/// Categories implied by caller context
fn context_hints(context: Option<&DetectionContext>) -> Vec<(Category, &'static str)> {
    let Some(ctx) = context else {
        return Vec::new();
    };

    let flag = |key: &str| ctx.get(key).and_then(serde_json::Value::as_bool) == Some(true);

    let mut hints = Vec::new();
    if flag("has_git_repo") {
        hints.push((Category::Git, "has_git_repo"));
    }
    if flag("has_test_files") {
        hints.push((Category::Test, "has_test_files"));
    }
    let has_error_output = ctx
        .get("error_output")
        .and_then(serde_json::Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if has_error_output {
        hints.push((Category::Debug, "error_output"));
    }
    hints
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matcher() -> HeuristicMatcher {
        HeuristicMatcher::new(4096).unwrap()
    }

    #[test]
    fn builtin_rules_compile() {
        assert_eq!(matcher().rule_count(), RULES.len());
    }

    #[test]
    fn matches_keywords_to_categories() {
        let result = matcher()
            .detect("Please commit this and fix the failing test", None)
            .unwrap()
            .unwrap();

        let enabled: Vec<_> = result.enabled().collect();
        assert_eq!(
            enabled,
            vec![Category::Core, Category::Git, Category::Debug, Category::Test]
        );
        assert_eq!(result.categories.len(), Category::ALL.len());
        assert!(result.signals_used[&Category::Git].contains(&"keyword:commit".to_string()));
        assert!(result.fallback_applied.is_none());
    }

    #[test]
    fn more_hits_raise_confidence() {
        let m = matcher();
        let one = m.detect("there is a bug", None).unwrap().unwrap();
        let three = m.detect("bug crash traceback", None).unwrap().unwrap();
        assert!(three.confidence_scores[&Category::Debug] > one.confidence_scores[&Category::Debug]);
        assert!(three.confidence_scores[&Category::Debug] <= MAX_CONFIDENCE);
    }

    #[test]
    fn no_signals_is_none() {
        assert!(matcher().detect("hello there", None).unwrap().is_none());
        assert!(matcher().detect("", None).unwrap().is_none());
    }

    #[test]
    fn word_boundaries_respected() {
        // "digit" contains "git" but is not a git query
        assert!(matcher().detect("count every digit", None).unwrap().is_none());
    }

    #[test]
    fn context_hints_add_signals() {
        let ctx = json!({ "has_git_repo": true, "error_output": "E0382: borrow of moved value" });
        let ctx = ctx.as_object().unwrap();

        let result = matcher().detect("hello there", Some(ctx)).unwrap().unwrap();
        assert!(result.categories[&Category::Git]);
        assert!(result.categories[&Category::Debug]);
        assert!(!result.categories[&Category::Test]);
        assert_eq!(result.confidence_scores[&Category::Git], CONTEXT_CONFIDENCE);
        assert_eq!(
            result.signals_used[&Category::Git],
            vec!["context:has_git_repo".to_string()]
        );
    }

    #[test]
    fn oversized_query_is_an_error() {
        let m = HeuristicMatcher::new(10).unwrap();
        let err = m.detect("debug this very long query", None).unwrap_err();
        assert!(matches!(err, HeuristicError::QueryTooLong { len: 26, max: 10 }));
    }

    #[test]
    fn invalid_rule_rejected() {
        let rules = [RuleSpec {
            category: Category::Git,
            pattern: r"(unclosed",
        }];
        let err = HeuristicMatcher::with_rules(&rules, 100).unwrap_err();
        assert!(matches!(
            err,
            HeuristicError::InvalidRule {
                category: Category::Git,
                ..
            }
        ));
    }
}
