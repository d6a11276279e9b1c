//! Rule compiler: keyword filters, modifier flags, compiled regexes.
//!
//! Rules are compiled once at startup. A single bad rule aborts the whole
//! set, so the relay never runs with a partial rule list.

use regex::{Captures, Regex, RegexBuilder};
use tracing::debug;

use crate::config::RuleConfig;
use crate::error::ConfigError;

/// Separator between alternatives in a keyword filter.
pub const KEYWORD_SEPARATOR: char = '|';

/// A rule ready for evaluation. Never mutated after construction.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    /// Position in the configured rule list (0-based).
    pub index: usize,
    /// Substrings gating the rule; empty means no gate.
    pub keywords: Vec<String>,
    /// Compiled pattern with the configured flags applied.
    pub matcher: Regex,
    /// Output template, stored verbatim.
    pub template: String,
}

impl CompiledRule {
    /// Whether `text` passes the keyword gate.
    ///
    /// Case-sensitive substring test; any one keyword is enough.
    pub fn passes_keyword_gate(&self, text: &str) -> bool {
        self.keywords.is_empty() || self.keywords.iter().any(|k| text.contains(k.as_str()))
    }

    /// Run the keyword gate, then the matcher. Returns the first match.
    pub fn evaluate(&self, text: &str) -> Option<MatchResult> {
        if !self.passes_keyword_gate(text) {
            debug!(rule = self.index, "Keyword gate rejected message");
            return None;
        }
        let result = self.matcher.captures(text).map(|c| MatchResult::from_captures(&c));
        debug!(
            rule = self.index,
            pattern = %self.matcher.as_str(),
            matched = result.is_some(),
            "Rule evaluated"
        );
        result
    }
}

/// Captured strings of one match: index 0 is the whole match, 1..n the
/// groups. Groups that did not take part in the match are `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    groups: Vec<Option<String>>,
}

impl MatchResult {
    pub fn new(groups: Vec<Option<String>>) -> Self {
        Self { groups }
    }

    fn from_captures(caps: &Captures<'_>) -> Self {
        Self {
            groups: caps
                .iter()
                .map(|m| m.map(|m| m.as_str().to_string()))
                .collect(),
        }
    }

    /// Capture `index`, or `None` when out of range or not participating.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> {
        self.groups.iter().map(|g| g.as_deref())
    }
}

/// Compile every configured rule, in order.
pub fn compile_rules(rules: &[RuleConfig]) -> Result<Vec<CompiledRule>, ConfigError> {
    rules
        .iter()
        .enumerate()
        .map(|(index, rule)| compile_rule(index, rule))
        .collect()
}

/// Compile a single rule.
pub fn compile_rule(index: usize, rule: &RuleConfig) -> Result<CompiledRule, ConfigError> {
    let flags = Flags::parse(&rule.flags).map_err(|reason| ConfigError::InvalidFlags {
        index,
        flags: rule.flags.clone(),
        reason,
    })?;

    let source = if flags.sticky {
        // A trailing newline keeps a `#` comment in verbose mode from
        // swallowing the closing group.
        let tail = if flags.ignore_whitespace { "\n" } else { "" };
        format!(r"\A(?:{}{tail})", rule.pattern)
    } else {
        rule.pattern.clone()
    };

    let matcher = RegexBuilder::new(&source)
        .case_insensitive(flags.case_insensitive)
        .multi_line(flags.multi_line)
        .dot_matches_new_line(flags.dot_all)
        .ignore_whitespace(flags.ignore_whitespace)
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            index,
            reason: e.to_string(),
        })?;

    Ok(CompiledRule {
        index,
        keywords: split_keywords(rule.keywords.as_deref().unwrap_or_default()),
        matcher,
        template: rule.template.clone(),
    })
}

/// Split a `|`-separated keyword filter. Empty alternatives are dropped.
pub fn split_keywords(filter: &str) -> Vec<String> {
    filter
        .split(KEYWORD_SEPARATOR)
        .filter(|k| !k.is_empty())
        .map(String::from)
        .collect()
}

/// Regex modifier letters, JavaScript style.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Flags {
    case_insensitive: bool,
    multi_line: bool,
    dot_all: bool,
    ignore_whitespace: bool,
    sticky: bool,
}

impl Flags {
    fn parse(flags: &str) -> Result<Self, String> {
        let mut parsed = Flags::default();
        let mut seen = String::new();
        for ch in flags.chars() {
            if seen.contains(ch) {
                return Err(format!("flag '{ch}' given more than once"));
            }
            seen.push(ch);
            match ch {
                'i' => parsed.case_insensitive = true,
                'm' => parsed.multi_line = true,
                's' => parsed.dot_all = true,
                'x' => parsed.ignore_whitespace = true,
                'y' => parsed.sticky = true,
                // Only the first match is used and Unicode is always on.
                'g' | 'u' | 'd' | 'v' => {}
                other => return Err(format!("unknown flag '{other}'")),
            }
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(keywords: Option<&str>, pattern: &str, flags: &str, template: &str) -> RuleConfig {
        RuleConfig {
            keywords: keywords.map(String::from),
            pattern: pattern.into(),
            flags: flags.into(),
            template: template.into(),
        }
    }

    #[test]
    fn splits_keyword_filter() {
        assert_eq!(split_keywords("验证码|code"), vec!["验证码", "code"]);
        assert_eq!(split_keywords("a||b|"), vec!["a", "b"]);
        assert!(split_keywords("").is_empty());
    }

    #[test]
    fn empty_filter_always_passes_gate() {
        let compiled = compile_rule(0, &rule(None, r"\d+", "", "$0")).unwrap();
        assert!(compiled.keywords.is_empty());
        assert!(compiled.passes_keyword_gate(""));
        assert!(compiled.passes_keyword_gate("anything at all"));

        let compiled = compile_rule(0, &rule(Some(""), r"\d+", "", "$0")).unwrap();
        assert!(compiled.passes_keyword_gate("anything at all"));
    }

    #[test]
    fn gate_is_case_sensitive() {
        let compiled = compile_rule(0, &rule(Some("Code"), r"\d+", "i", "$0")).unwrap();
        assert!(compiled.passes_keyword_gate("Your Code is 1234"));
        assert!(!compiled.passes_keyword_gate("your code is 1234"));
    }

    #[test]
    fn missing_keyword_skips_matching_pattern() {
        let compiled = compile_rule(0, &rule(Some("验证码"), r"\d{6}", "g", "$0")).unwrap();
        assert!(compiled.matcher.is_match("订单号 123456"));
        assert!(compiled.evaluate("订单号 123456").is_none());
    }

    #[test]
    fn evaluate_returns_whole_match_and_groups() {
        let compiled = compile_rule(0, &rule(None, r"code: (\d+)", "", "$1")).unwrap();
        let result = compiled.evaluate("your code: 42!").unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(0), Some("code: 42"));
        assert_eq!(result.get(1), Some("42"));
    }

    #[test]
    fn non_participating_group_is_none() {
        let compiled = compile_rule(0, &rule(None, r"(a)|(b)", "", "")).unwrap();
        let result = compiled.evaluate("b").unwrap();
        assert_eq!(result.len(), 3);
        assert_eq!(result.get(1), None);
        assert_eq!(result.get(2), Some("b"));
    }

    #[test]
    fn case_insensitive_flag() {
        let compiled = compile_rule(0, &rule(None, "hello", "i", "")).unwrap();
        assert!(compiled.evaluate("HeLLo world").is_some());
        let compiled = compile_rule(0, &rule(None, "hello", "", "")).unwrap();
        assert!(compiled.evaluate("HeLLo world").is_none());
    }

    #[test]
    fn accepts_noop_flags() {
        for flags in ["g", "u", "d", "v", "gudv"] {
            let compiled = compile_rule(0, &rule(None, r"(\d+)", flags, "$1")).unwrap();
            let result = compiled.evaluate("a 12 b 34").unwrap();
            assert_eq!(result.get(1), Some("12"), "flags {flags}");
        }
        // No-op letters still count toward the repeat check.
        assert!(compile_rule(0, &rule(None, "a", "uu", "")).is_err());
    }

    #[test]
    fn multi_line_flag_anchors_lines() {
        let compiled = compile_rule(0, &rule(None, r"^\d+$", "m", "")).unwrap();
        let result = compiled.evaluate("header\n778899\nfooter").unwrap();
        assert_eq!(result.get(0), Some("778899"));
        let compiled = compile_rule(0, &rule(None, r"^\d+$", "", "")).unwrap();
        assert!(compiled.evaluate("header\n778899\nfooter").is_none());
    }

    #[test]
    fn dot_all_flag() {
        let compiled = compile_rule(0, &rule(None, "a.b", "s", "")).unwrap();
        assert!(compiled.evaluate("a\nb").is_some());
        let compiled = compile_rule(0, &rule(None, "a.b", "", "")).unwrap();
        assert!(compiled.evaluate("a\nb").is_none());
    }

    #[test]
    fn sticky_flag_anchors_at_start() {
        let compiled = compile_rule(0, &rule(None, r"\d+", "y", "")).unwrap();
        assert!(compiled.evaluate("123 abc").is_some());
        assert!(compiled.evaluate("abc 123").is_none());
    }

    #[test]
    fn sticky_with_verbose_comment() {
        let compiled = compile_rule(0, &rule(None, r"\d+ # digits", "xy", "")).unwrap();
        assert_eq!(compiled.evaluate("42 abc").unwrap().get(0), Some("42"));
    }

    #[test]
    fn default_rule_matches_long_numbers() {
        let compiled = compile_rule(0, &RuleConfig::default()).unwrap();
        let result = compiled.evaluate("Code 12345 or 6543210").unwrap();
        assert_eq!(result.get(0), Some("6543210"));
    }

    #[test]
    fn unknown_flag_is_config_error() {
        let err = compile_rule(3, &rule(None, r"\d+", "iq", "")).unwrap_err();
        match err {
            ConfigError::InvalidFlags { index, flags, reason } => {
                assert_eq!(index, 3);
                assert_eq!(flags, "iq");
                assert!(reason.contains('q'));
            }
            other => panic!("Expected InvalidFlags, got {:?}", other),
        }
    }

    #[test]
    fn repeated_flag_is_config_error() {
        let err = compile_rule(0, &rule(None, r"\d+", "gig", "")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFlags { .. }));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let err = compile_rule(1, &rule(None, r"(\d+", "", "")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { index: 1, .. }));
    }

    #[test]
    fn compile_rules_is_all_or_nothing() {
        let rules = vec![
            rule(None, r"\d+", "", "$0"),
            rule(None, r"[", "", "$0"),
            rule(None, r"\w+", "", "$0"),
        ];
        let err = compile_rules(&rules).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { index: 1, .. }));
    }

    #[test]
    fn compile_rules_keeps_declaration_order() {
        let rules = vec![
            rule(None, "first", "", "1"),
            rule(None, "second", "", "2"),
            rule(None, "third", "", "3"),
        ];
        let compiled = compile_rules(&rules).unwrap();
        let order: Vec<_> = compiled.iter().map(|r| (r.index, r.template.as_str())).collect();
        assert_eq!(order, vec![(0, "1"), (1, "2"), (2, "3")]);
    }
}
