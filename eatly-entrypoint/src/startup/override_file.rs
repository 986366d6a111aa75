//! `.env` style override file
//!
//! One `key=value` binding per line. `#` starts a comment when it opens the
//! line or follows whitespace, `export ` is accepted as a prefix, and one
//! pair of matching outer quotes is stripped from the value. Values are
//! taken literally: no `$VAR` substitution, no escapes, no multi-line
//! values. Lines without `=` (or with an empty key) are collected in
//! `skipped` by line number and never abort parsing.

use anyhow::{Context, Result};
use std::path::Path;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OverrideFile {
    /// Bindings in file order; later duplicates win when applied
    pub bindings: Vec<(String, String)>,
    pub skipped: Vec<SkippedLine>,
}

/// A line that could not be parsed into a binding. Only the position is
/// kept so a malformed secret can't reach the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkippedLine {
    /// 1-based line number
    pub line: usize,
}

impl OverrideFile {
    pub fn parse(contents: &str) -> Self {
        let mut file = Self::default();

        for (index, raw) in contents.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match parse_binding(line) {
                Some(binding) => file.bindings.push(binding),
                None => file.skipped.push(SkippedLine { line: index + 1 }),
            }
        }

        file
    }

    /// Read and parse `path`; `Ok(None)` when the file does not exist
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read override file {}", path.display()))?;
        Ok(Some(Self::parse(&contents)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.bindings.iter().map(|(key, _)| key.as_str())
    }
}

fn parse_binding(line: &str) -> Option<(String, String)> {
    let line = line.strip_prefix("export ").map_or(line, str::trim_start);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), parse_value(value).to_string()))
}

fn parse_value(raw: &str) -> &str {
    let value = raw.trim();

    if let Some(quote) = value.chars().next().filter(|c| matches!(*c, '"' | '\'')) {
        if let Some(end) = value[1..].find(quote) {
            let rest = value[end + 2..].trim_start();
            if rest.is_empty() || rest.starts_with('#') {
                return &value[1..=end];
            }
        }
    }

    strip_comment(value).trim_end()
}

/// Cut at the first `#` preceded by whitespace
fn strip_comment(value: &str) -> &str {
    let mut previous = None;
    for (index, c) in value.char_indices() {
        if c == '#' && previous.is_some_and(char::is_whitespace) {
            return &value[..index];
        }
        previous = Some(c);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(key: &str, value: &str) -> (String, String) {
        (key.to_string(), value.to_string())
    }

    #[test]
    fn test_parse_bindings_comments_and_blanks() {
        let file = OverrideFile::parse(
            "# settings for the local stack\n\
             ENV_ID=prod\n\
             \n\
             POSTGRES_HOST=postgres\n\
             POSTGRES_PORT=6543 # non-default port\n\
             export POSTGRES_USER=eatly\n\
             GREETING=\"hello world\"\n\
             EMPTY=\n",
        );

        assert_eq!(
            file.bindings,
            vec![
                binding("ENV_ID", "prod"),
                binding("POSTGRES_HOST", "postgres"),
                binding("POSTGRES_PORT", "6543"),
                binding("POSTGRES_USER", "eatly"),
                binding("GREETING", "hello world"),
                binding("EMPTY", ""),
            ]
        );
        assert!(file.skipped.is_empty());
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let file = OverrideFile::parse("FIRST=1\nNOT_A_BINDING\nSECOND=2\n=orphan\n");

        assert_eq!(file.bindings, vec![binding("FIRST", "1"), binding("SECOND", "2")]);
        assert_eq!(
            file.skipped,
            vec![SkippedLine { line: 2 }, SkippedLine { line: 4 }]
        );
    }

    #[test]
    fn test_values_are_taken_literally() {
        let file = OverrideFile::parse(
            "POSTGRES_PASSWORD=pa$word\n\
             SECRET=a\\b\n\
             TEMPLATE=${HOME}/x\n\
             HASHED=abc#def\n\
             MY-KEY=1\n\
             URL=postgres://u:p@db/eatly?x=1\n",
        );

        assert_eq!(
            file.bindings,
            vec![
                binding("POSTGRES_PASSWORD", "pa$word"),
                binding("SECRET", "a\\b"),
                binding("TEMPLATE", "${HOME}/x"),
                binding("HASHED", "abc#def"),
                binding("MY-KEY", "1"),
                binding("URL", "postgres://u:p@db/eatly?x=1"),
            ]
        );
        assert!(file.skipped.is_empty());
    }

    #[test]
    fn test_unclosed_quote_stays_on_its_line() {
        let file = OverrideFile::parse("A=1\nB=\"oops\nENV_ID=prod\nPOSTGRES_HOST=pg\n");

        assert_eq!(
            file.bindings,
            vec![
                binding("A", "1"),
                binding("B", "\"oops"),
                binding("ENV_ID", "prod"),
                binding("POSTGRES_HOST", "pg"),
            ]
        );
    }

    #[test]
    fn test_quotes_protect_hash_and_only_outer_pair_is_stripped() {
        let file = OverrideFile::parse(
            "GREETING=\"a # b\" # trailing\n\
             SINGLE='it''s'\n\
             MIXED=\"left'\n\
             CRLF=value\r\n",
        );

        assert_eq!(
            file.bindings,
            vec![
                binding("GREETING", "a # b"),
                binding("SINGLE", "'it''s'"),
                binding("MIXED", "\"left'"),
                binding("CRLF", "value"),
            ]
        );
    }

    #[test]
    fn test_comment_only_file_has_no_bindings() {
        let file = OverrideFile::parse("# nothing here\n\n   # indented comment\n");
        assert!(file.bindings.is_empty());
        assert!(file.skipped.is_empty());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(OverrideFile::load(&dir.path().join(".env")).unwrap().is_none());
    }

    #[test]
    fn test_load_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        std::fs::write(&path, "ENV_ID=dev\n").unwrap();

        let file = OverrideFile::load(&path).unwrap().unwrap();
        assert_eq!(file.keys().collect::<Vec<_>>(), vec!["ENV_ID"]);
    }
}
