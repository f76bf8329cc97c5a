//! Post add/sync hook commands.
//!
//! A hook is configured as a command line such as
//! `egencache --update --repo={path}`. The line is split into words with
//! shell quoting rules, then `{path}` is replaced in every word by the working
//! copy path. No shell is involved, so the substituted path never gets
//! re-interpreted. Any other `{...}` token is rejected.

use std::path::Path;

use crate::overlay::error::HookError;

pub const PATH_TOKEN: &str = "path";

/// A parsed, validated hook command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookTemplate {
    words: Vec<String>,
}

impl HookTemplate {
    pub fn parse(template: &str) -> Result<Self, HookError> {
        let words = shell_words::split(template).map_err(|e| HookError::Syntax(e.to_string()))?;
        if words.is_empty() {
            return Err(HookError::Empty);
        }
        for word in &words {
            check_tokens(word)?;
        }
        Ok(Self { words })
    }

    /// Substitute the working-copy path and return `(program, args)`.
    pub fn render(&self, target: &Path) -> (String, Vec<String>) {
        let path = target.to_string_lossy();
        let placeholder = format!("{{{PATH_TOKEN}}}");
        let mut rendered = self
            .words
            .iter()
            .map(|w| w.replace(&placeholder, &path));
        // parse() guarantees at least one word
        let program = rendered.next().unwrap_or_default();
        (program, rendered.collect())
    }
}

fn check_tokens(word: &str) -> Result<(), HookError> {
    let mut rest = word;
    while let Some(start) = rest.find('{') {
        let after = &rest[start + 1..];
        let Some(end) = after.find('}') else {
            return Err(HookError::Unterminated(word.to_string()));
        };
        let token = &after[..end];
        if token != PATH_TOKEN {
            return Err(HookError::UnknownToken(token.to_string()));
        }
        rest = &after[end + 1..];
    }
    Ok(())
}
