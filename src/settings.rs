//! Flat key/value configuration entries.
//!
//! Tenant configuration arrives as flat entries such as
//! `mdb.url.acme=postgres://db1/acme`. Entries are kept in key order so every
//! resolution pass over the same source produces the same result.

use crate::error::{DbError, DbResult};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Where configuration entries come from.
///
/// Every reconciliation pass reads its source again, so a file source picks up
/// edits without a restart.
pub trait ConfigSource: Send + Sync {
    fn entries(&self) -> DbResult<ConfigEntries>;
}

/// Entries read from a properties or JSON file on each call.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileSource {
    fn entries(&self) -> DbResult<ConfigEntries> {
        let entries = ConfigEntries::load(&self.path)?;
        debug!(path = %self.path.display(), entries = entries.len(), "Loaded configuration");
        Ok(entries)
    }
}

impl ConfigSource for ConfigEntries {
    fn entries(&self) -> DbResult<ConfigEntries> {
        Ok(self.clone())
    }
}

/// Ordered set of flat configuration entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigEntries {
    entries: BTreeMap<String, String>,
}

impl ConfigEntries {
    /// Create an empty set of entries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace one entry.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Load entries from a file: `.json` files as JSON, anything else as properties.
    pub fn load(path: &Path) -> DbResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DbError::configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            let value: Value = serde_json::from_str(&content).map_err(|e| {
                DbError::configuration(format!("Invalid JSON in {}: {}", path.display(), e))
            })?;
            Self::from_json(&value)
        } else {
            Ok(Self::parse_properties(&content))
        }
    }

    /// Parse Java-properties style text.
    ///
    /// Keys end at the first unescaped `=`, `:` or whitespace; whitespace
    /// around the separator is dropped. `#` and `!` start comment lines, a
    /// line ending in an odd number of backslashes continues on the next
    /// line, and `\t`, `\n`, `\r`, `\f` and `\uXXXX` escapes are decoded in
    /// keys and values. A line holding only a key is skipped with a warning.
    pub fn parse_properties(content: &str) -> Self {
        let mut entries = Self::new();
        let mut lines = content.lines().enumerate();

        while let Some((index, line)) = lines.next() {
            let mut logical = line.trim_start().to_string();
            if logical.is_empty() || logical.starts_with('#') || logical.starts_with('!') {
                continue;
            }
            while continues(&logical) {
                logical.pop();
                match lines.next() {
                    Some((_, next)) => logical.push_str(next.trim_start()),
                    None => break,
                }
            }

            let Some((key, value)) = split_entry(logical.trim_end()) else {
                warn!(line = index + 1, "Skipping configuration line without separator");
                continue;
            };
            if key.is_empty() {
                warn!(line = index + 1, "Skipping configuration line with empty key");
                continue;
            }
            entries.insert(key, value);
        }

        entries
    }

    /// Build entries from a JSON object.
    ///
    /// Strings, numbers and booleans are taken as their text; null, array and
    /// object values are not string entries and are skipped with a warning.
    pub fn from_json(value: &Value) -> DbResult<Self> {
        let Value::Object(map) = value else {
            return Err(DbError::configuration(
                "Configuration JSON must be an object of flat key/value entries",
            ));
        };

        let mut entries = Self::new();
        for (key, value) in map {
            let text = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null | Value::Array(_) | Value::Object(_) => {
                    warn!(key = %key, "Unexpected non-string configuration entry, skipping");
                    continue;
                }
            };
            entries.insert(key.clone(), text);
        }
        Ok(entries)
    }
}

impl FromIterator<(String, String)> for ConfigEntries {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<const N: usize> From<[(&str, &str); N]> for ConfigEntries {
    fn from(pairs: [(&str, &str); N]) -> Self {
        pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// True when the line ends in an unescaped backslash.
fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// Split a logical line into its decoded key and value.
fn split_entry(line: &str) -> Option<(String, String)> {
    let mut escaped = false;
    let mut separator = None;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => {
                separator = Some((i, c, true));
                break;
            }
            c if c.is_whitespace() => {
                separator = Some((i, c, false));
                break;
            }
            _ => {}
        }
    }

    let (end, sep, explicit) = separator?;
    let mut value = &line[end + sep.len_utf8()..];
    if !explicit {
        value = value.trim_start();
        value = value.strip_prefix(['=', ':']).unwrap_or(value);
    }
    Some((unescape(&line[..end]), unescape(value.trim_start())))
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                let decoded = (hex.len() == 4 && hex.chars().all(|h| h.is_ascii_hexdigit()))
                    .then(|| u32::from_str_radix(&hex, 16).ok())
                    .flatten()
                    .and_then(char::from_u32);
                match decoded {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push('u');
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }

    out
}
