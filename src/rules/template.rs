//! Output templating.
//!
//! Plain literal substitution: `$0`..`$n` become the captures of the match,
//! `{content}` becomes the full message text. Tokens are replaced in index
//! order, so with ten or more groups `$10` is hit by the `$1` pass first.

use crate::rules::compiler::MatchResult;

/// Token replaced with the full message text.
pub const CONTENT_TOKEN: &str = "{content}";

/// Shown in the sandbox dump for a group that took no part in the match.
const UNMATCHED_GROUP: &str = "(not matched)";

/// Render `template` against a match and the original message text.
///
/// Groups that did not participate substitute as the empty string.
pub fn render(template: &str, result: &MatchResult, content: &str) -> String {
    let mut output = template.to_string();
    for (i, value) in result.iter().enumerate() {
        output = output.replace(&format!("${i}"), value.unwrap_or(""));
    }
    output.replace(CONTENT_TOKEN, content)
}

/// One `$i => value` line per capture, for the sandbox echo.
pub fn describe_match(result: &MatchResult) -> String {
    result
        .iter()
        .enumerate()
        .map(|(i, value)| format!("${i} => {}", value.unwrap_or(UNMATCHED_GROUP)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(values: &[Option<&str>]) -> MatchResult {
        MatchResult::new(values.iter().map(|v| v.map(String::from)).collect())
    }

    #[test]
    fn template_without_tokens_is_unchanged() {
        let result = groups(&[Some("123456"), Some("12")]);
        assert_eq!(
            render("New mail arrived", &result, "body"),
            "New mail arrived"
        );
    }

    #[test]
    fn substitutes_group_one() {
        let result = groups(&[Some("code 123456"), Some("123456")]);
        assert_eq!(render("code: $1", &result, "body"), "code: 123456");
    }

    #[test]
    fn substitutes_every_occurrence() {
        let result = groups(&[Some("42")]);
        assert_eq!(render("$0/$0", &result, ""), "42/42");
    }

    #[test]
    fn substitutes_content() {
        let result = groups(&[Some("123456")]);
        assert_eq!(
            render("[$0] {content}", &result, "your code is 123456"),
            "[123456] your code is 123456"
        );
    }

    #[test]
    fn content_is_substituted_after_groups() {
        // A literal "$0" inside the message text survives.
        let result = groups(&[Some("x")]);
        assert_eq!(render("{content}", &result, "cost $0"), "cost $0");
    }

    #[test]
    fn unmatched_group_renders_empty() {
        let result = groups(&[Some("b"), None, Some("b")]);
        assert_eq!(render("[$1][$2]", &result, ""), "[][b]");
    }

    #[test]
    fn tokens_beyond_captures_are_left_alone() {
        let result = groups(&[Some("42")]);
        assert_eq!(render("$0 $3 $x", &result, ""), "42 $3 $x");
    }

    #[test]
    fn double_digit_token_is_hit_by_single_digit_pass() {
        let values: Vec<Option<&str>> = std::iter::once(Some("abcdefghij"))
            .chain(["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"].map(Some))
            .collect();
        let result = groups(&values);
        assert_eq!(render("$10", &result, ""), "a0");
    }

    #[test]
    fn describe_lists_every_capture() {
        let result = groups(&[Some("code 42"), Some("42"), None]);
        assert_eq!(
            describe_match(&result),
            "$0 => code 42\n$1 => 42\n$2 => (not matched)"
        );
    }
}
