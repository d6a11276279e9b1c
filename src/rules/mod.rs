//! Rule engine: keyword-gated regex rules and output templating.
//!
//! - `compiler`: turns configured rules into immutable `CompiledRule`s
//! - `template`: `$i` / `{content}` substitution and the sandbox match dump

pub mod compiler;
pub mod template;

pub use compiler::{CompiledRule, MatchResult, compile_rules};
pub use template::{CONTENT_TOKEN, describe_match, render};
