//! Maintains the build-system variable that lists active overlay paths.
//!
//! The managed value is the installed paths, one per line, in priority order,
//! followed by whatever unmanaged tokens the variable already held:
//!
//! ```text
//! PORTDIR_OVERLAY="
//! /var/lib/overlayman/foo
//! /var/lib/overlayman/bar
//! $PORTDIR_OVERLAY
//! "
//! ```
//!
//! A token is managed when it lies under the storage directory. Everything
//! outside the assignment is copied through byte for byte.
//!
//! An assignment the patcher created, or an unquoted one it had to quote, is
//! tagged with a trailing comment so that removing the last managed path
//! gives back the original bytes.

use regex::Regex;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::common::fs::write_atomic;
use crate::overlay::error::{OverlayError, OverlayResult};
use crate::overlay::installed::InstalledStore;

/// Trails an assignment that did not exist before the first path was added.
const APPENDED_MARK: &str = " # added by overlayman";
/// Trails a formerly unquoted assignment that now needs quotes.
const REQUOTED_MARK: &str = " # quoted by overlayman";

/// Byte offsets of one `VAR=value` assignment.
#[derive(Debug)]
struct Assignment {
    line_start: usize,
    value_start: usize,
    value_end: usize,
    quote: Option<char>,
    /// Just past the closing quote, or the unquoted value
    end: usize,
    /// Just past the newline ending the line that holds `end`
    line_end: usize,
}

fn closing_quote(text: &str, from: usize, quote: char) -> Option<usize> {
    let mut escaped = false;
    for (i, c) in text[from..].char_indices() {
        if quote == '"' && escaped {
            escaped = false;
            continue;
        }
        if quote == '"' && c == '\\' {
            escaped = true;
        } else if c == quote {
            return Some(from + i);
        }
    }
    None
}

fn locate(text: &str, var: &str) -> Result<Option<Assignment>, String> {
    let pattern = format!(r"(?m)^[ \t]*(?:export[ \t]+)?{}=", regex::escape(var));
    let re = Regex::new(&pattern).map_err(|e| e.to_string())?;
    let Some(found) = re.find(text) else {
        return Ok(None);
    };

    let after = found.end();
    let (quote, value_start, value_end, end) = match text[after..].chars().next() {
        Some(q @ ('"' | '\'')) => {
            let close = closing_quote(text, after + 1, q)
                .ok_or_else(|| format!("unterminated quote in {var} assignment"))?;
            (Some(q), after + 1, close, close + 1)
        }
        _ => {
            let len = text[after..]
                .find(char::is_whitespace)
                .unwrap_or(text.len() - after);
            (None, after, after + len, after + len)
        }
    };
    let line_end = text[end..]
        .find('\n')
        .map(|i| end + i + 1)
        .unwrap_or(text.len());

    Ok(Some(Assignment {
        line_start: found.start(),
        value_start,
        value_end,
        quote,
        end,
        line_end,
    }))
}

fn whitespace_len(s: &str) -> usize {
    s.find(|c: char| !c.is_whitespace()).unwrap_or(s.len())
}

fn token_len(s: &str) -> usize {
    s.find(char::is_whitespace).unwrap_or(s.len())
}

/// Split a value into its leading whitespace and the unmanaged remainder.
/// Managed tokens are dropped wherever they appear.
fn split_value<'v>(value: &'v str, managed: &dyn Fn(&str) -> bool) -> (&'v str, String) {
    let lead_len = whitespace_len(value);
    let mut cursor = lead_len;
    while cursor < value.len() {
        let len = token_len(&value[cursor..]);
        if !managed(&value[cursor..cursor + len]) {
            break;
        }
        cursor += len;
        cursor += whitespace_len(&value[cursor..]);
    }

    let rest = &value[cursor..];
    let mut kept = String::with_capacity(rest.len());
    let mut i = 0;
    while i < rest.len() {
        let token_start = i + whitespace_len(&rest[i..]);
        if token_start >= rest.len() {
            kept.push_str(&rest[i..]);
            break;
        }
        let token_end = token_start + token_len(&rest[token_start..]);
        if !managed(&rest[token_start..token_end]) {
            kept.push_str(&rest[i..token_end]);
        }
        i = token_end;
    }
    (&value[..lead_len], kept)
}

/// Rewrites one variable in one file.
pub struct ConfigPatcher<'a> {
    path: &'a Path,
    var: &'a str,
    storage_prefix: String,
}

impl<'a> ConfigPatcher<'a> {
    pub fn new(path: &'a Path, var: &'a str, storage: &Path) -> Self {
        let storage = storage.to_string_lossy();
        Self {
            path,
            var,
            storage_prefix: format!("{}/", storage.trim_end_matches('/')),
        }
    }

    /// Compute the patched file content for `paths` (already in final order).
    pub fn render(&self, text: &str, paths: &[String]) -> Result<String, String> {
        let managed = |token: &str| token.starts_with(&self.storage_prefix) || paths.iter().any(|p| p == token);
        let managed_lines: String = paths.iter().map(|p| format!("{p}\n")).collect();

        let Some(found) = locate(text, self.var)? else {
            if paths.is_empty() {
                return Ok(text.to_string());
            }
            let mut out = text.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(&format!("{}=\"{managed_lines}\"{APPENDED_MARK}\n", self.var));
            return Ok(out);
        };

        let (lead, rest) = split_value(&text[found.value_start..found.value_end], &managed);
        let value = format!("{lead}{managed_lines}{rest}");
        let tail = &text[found.end..];

        let mut out = String::with_capacity(text.len() + managed_lines.len());
        if value.trim().is_empty()
            && text[found.end..found.line_end]
                .strip_prefix(APPENDED_MARK)
                .is_some_and(|r| r.trim().is_empty())
        {
            out.push_str(&text[..found.line_start]);
            out.push_str(&text[found.line_end..]);
            return Ok(out);
        }

        let needs_quotes = value.chars().any(char::is_whitespace);
        let (quote, mark) = match found.quote {
            Some(_) if !needs_quotes && tail.starts_with(REQUOTED_MARK) => {
                out.push_str(&text[..found.value_start - 1]);
                out.push_str(&value);
                out.push_str(&tail[REQUOTED_MARK.len()..]);
                return Ok(out);
            }
            Some(q) => (q, ""),
            None if needs_quotes => ('"', REQUOTED_MARK),
            None => {
                out.push_str(&text[..found.value_start]);
                out.push_str(&value);
                out.push_str(tail);
                return Ok(out);
            }
        };
        let head_end = if found.quote.is_some() {
            found.value_start - 1
        } else {
            found.value_start
        };
        out.push_str(&text[..head_end]);
        out.push(quote);
        out.push_str(&value);
        out.push(quote);
        out.push_str(mark);
        out.push_str(tail);
        Ok(out)
    }

    /// Patch the file from `paths`. Returns whether the file changed.
    pub fn apply_paths(&self, paths: &[String]) -> OverlayResult<bool> {
        let fail = |message: String| OverlayError::ConfigWrite {
            path: self.path.to_path_buf(),
            message,
        };

        let (current, exists) = match fs::read_to_string(self.path) {
            Ok(text) => (text, true),
            Err(e) if e.kind() == ErrorKind::NotFound => (String::new(), false),
            Err(e) => return Err(fail(e.to_string())),
        };

        let patched = self.render(&current, paths).map_err(fail)?;
        if exists && patched == current {
            return Ok(false);
        }
        write_atomic(self.path, patched.as_bytes()).map_err(|e| fail(e.to_string()))?;
        Ok(true)
    }

    /// Patch the file from the installed set, ascending by priority.
    pub fn apply(&self, store: &InstalledStore) -> OverlayResult<bool> {
        let paths: Vec<String> = store
            .by_priority()
            .into_iter()
            .map(|e| e.local_path.to_string_lossy().into_owned())
            .collect();
        self.apply_paths(&paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const STORAGE: &str = "/var/lib/overlayman";

    fn patcher(path: &Path) -> ConfigPatcher<'_> {
        ConfigPatcher::new(path, "PORTDIR_OVERLAY", Path::new(STORAGE))
    }

    fn paths(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| format!("{STORAGE}/{n}")).collect()
    }

    fn render(original: &str, names: &[&str]) -> String {
        patcher(Path::new("/unused")).render(original, &paths(names)).unwrap()
    }

    #[test]
    fn appends_assignment_when_absent() {
        assert_eq!(
            render("# local settings\nFOO=1", &["a", "b"]),
            "# local settings\nFOO=1\nPORTDIR_OVERLAY=\"/var/lib/overlayman/a\n/var/lib/overlayman/b\n\" # added by overlayman\n"
        );
        assert_eq!(render("FOO=1\n", &[]), "FOO=1\n");
    }

    #[test]
    fn replaces_managed_paths_and_keeps_unmanaged_tokens() {
        let original = "A=1\nPORTDIR_OVERLAY=\"\n/var/lib/overlayman/old\n$PORTDIR_OVERLAY\n/usr/local/portage\n\"\nB=2\n";
        assert_eq!(
            render(original, &["new", "old"]),
            "A=1\nPORTDIR_OVERLAY=\"\n/var/lib/overlayman/new\n/var/lib/overlayman/old\n$PORTDIR_OVERLAY\n/usr/local/portage\n\"\nB=2\n"
        );
    }

    #[test]
    fn add_then_remove_restores_original_bytes() {
        let original = "# header\nexport PORTDIR_OVERLAY='\n$PORTDIR_OVERLAY\n' # keep me\nTAIL=1\n";
        let added = render(original, &["x"]);
        assert!(added.contains("'\n/var/lib/overlayman/x\n$PORTDIR_OVERLAY\n' # keep me"));
        assert_eq!(render(&added, &[]), original);

        let bare = "FOO=1\n";
        assert_eq!(render(&render(bare, &["x"]), &[]), bare);
    }

    #[test]
    fn unquoted_value_round_trips_without_quotes() {
        for original in [
            "PORTDIR_OVERLAY=/usr/local/portage\n",
            "PORTDIR_OVERLAY=/usr/local/portage # mine\nB=2\n",
            "A=1\nPORTDIR_OVERLAY=\nB=2\n",
        ] {
            let added = render(original, &["x", "y"]);
            assert!(added.contains("/var/lib/overlayman/x\n/var/lib/overlayman/y\n"));
            let shuffled = render(&added, &["y"]);
            assert_eq!(render(&shuffled, &[]), original);
        }
    }

    #[test]
    fn user_owned_empty_assignment_survives() {
        for original in [
            "A=1\nPORTDIR_OVERLAY=\"\"\nB=2\n",
            "A=1\nexport PORTDIR_OVERLAY=''\n",
        ] {
            let added = render(original, &["x"]);
            assert_ne!(added, original);
            assert_eq!(render(&added, &[]), original);
        }
    }

    #[test]
    fn stray_managed_tokens_are_dropped() {
        let original = "PORTDIR_OVERLAY=\"/usr/local/portage /var/lib/overlayman/gone\"\n";
        assert_eq!(
            render(original, &["a"]),
            "PORTDIR_OVERLAY=\"/var/lib/overlayman/a\n/usr/local/portage\"\n"
        );
    }

    #[test]
    fn unquoted_values_are_quoted_when_needed() {
        assert_eq!(
            render("PORTDIR_OVERLAY=/usr/local/portage\n", &["a"]),
            "PORTDIR_OVERLAY=\"/var/lib/overlayman/a\n/usr/local/portage\" # quoted by overlayman\n"
        );
        assert_eq!(
            render("PORTDIR_OVERLAY=/usr/local/portage\n", &[]),
            "PORTDIR_OVERLAY=/usr/local/portage\n"
        );
    }

    #[test]
    fn commented_assignments_are_ignored() {
        let original = "#PORTDIR_OVERLAY=\"/x\"\n";
        assert_eq!(
            render(original, &["a"]),
            "#PORTDIR_OVERLAY=\"/x\"\nPORTDIR_OVERLAY=\"/var/lib/overlayman/a\n\" # added by overlayman\n"
        );
    }

    #[test]
    fn unterminated_quote_is_refused() {
        let err = patcher(Path::new("/unused"))
            .render("PORTDIR_OVERLAY=\"/x\n", &paths(&["a"]))
            .unwrap_err();
        assert!(err.contains("unterminated"));
    }

    #[test]
    fn escaped_quotes_do_not_end_the_value() {
        let original = "PORTDIR_OVERLAY=\"\\\"odd\\\"\"\n";
        let added = render(original, &["a"]);
        assert_eq!(added, "PORTDIR_OVERLAY=\"/var/lib/overlayman/a\n\\\"odd\\\"\"\n");
    }

    #[test]
    fn creates_missing_file_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("etc/portage/make.conf");
        let p = patcher(&path);

        assert!(p.apply_paths(&paths(&["a"])).unwrap());
        let first = fs::read_to_string(&path).unwrap();
        assert!(!p.apply_paths(&paths(&["a"])).unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), first);
    }

    #[test]
    fn priority_change_only_moves_that_path() {
        let original = "X=1\nPORTDIR_OVERLAY=\"\n/var/lib/overlayman/a\n/var/lib/overlayman/b\n/opt/mine\n\"\n";
        let reordered = render(original, &["b", "a"]);
        assert_eq!(
            reordered,
            "X=1\nPORTDIR_OVERLAY=\"\n/var/lib/overlayman/b\n/var/lib/overlayman/a\n/opt/mine\n\"\n"
        );
    }

    #[test]
    fn unreadable_target_is_config_write_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("make.conf");
        fs::create_dir(&path).unwrap();
        assert!(matches!(
            patcher(&path).apply_paths(&paths(&["a"])),
            Err(OverlayError::ConfigWrite { .. })
        ));
    }
}
