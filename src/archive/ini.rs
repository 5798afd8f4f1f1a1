//! Sectioned `key = value` codec
//!
//! The archive config (`archive.ini`), volume info (`volinfo`) and
//! session info files all share one line format: `key = value`, UTF-8,
//! one pair per line. `archive.ini` additionally groups pairs under
//! `[section]` headers.

use crate::error::{IoResultExt, Result, VaultError};
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::path::Path;

/// An ordered set of `[section]` blocks of `key = value` pairs
#[derive(Debug, Clone, Default)]
pub struct IniDoc {
    sections: Vec<(String, Vec<(String, String)>)>,
}

impl IniDoc {
    /// Create an empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document from text
    pub fn parse(text: &str) -> Result<Self> {
        let mut doc = Self::new();
        let mut current: Option<usize> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
                doc.sections.push((name.to_string(), Vec::new()));
                current = Some(doc.sections.len() - 1);
                continue;
            }
            let (key, value) = split_pair(line).ok_or_else(|| {
                VaultError::config(format!("Bad config line {}: '{}'", lineno + 1, raw))
            })?;
            let idx = current.ok_or_else(|| {
                VaultError::config(format!("Key '{}' outside any [section]", key))
            })?;
            doc.sections[idx].1.push((key, value));
        }
        Ok(doc)
    }

    /// Load a document from a file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_path(path)?;
        Self::parse(&text)
    }

    /// Write the document to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render()).with_path(path)
    }

    /// Render the document as text
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, pairs) in &self.sections {
            let _ = writeln!(out, "[{}]", name);
            for (k, v) in pairs {
                let _ = writeln!(out, "{} = {}", k, v);
            }
            out.push('\n');
        }
        out
    }

    /// Pairs of a section, in file order; empty if absent
    pub fn section(&self, name: &str) -> &[(String, String)] {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p.as_slice())
            .unwrap_or(&[])
    }

    /// Look up one value
    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set a value, creating the section if needed; replaces any prior key
    pub fn set(&mut self, section: &str, key: &str, value: impl Into<String>) {
        let idx = match self.sections.iter().position(|(n, _)| n == section) {
            Some(i) => i,
            None => {
                self.sections.push((section.to_string(), Vec::new()));
                self.sections.len() - 1
            }
        };
        let pairs = &mut self.sections[idx].1;
        match pairs.iter_mut().find(|(k, _)| k.as_str() == key) {
            Some(pair) => pair.1 = value.into(),
            None => pairs.push((key.to_string(), value.into())),
        }
    }

    /// Remove a key; returns its old value if present
    pub fn remove(&mut self, section: &str, key: &str) -> Option<String> {
        let pairs = &mut self.sections.iter_mut().find(|(n, _)| n.as_str() == section)?.1;
        let pos = pairs.iter().position(|(k, _)| k == key)?;
        Some(pairs.remove(pos).1)
    }
}

fn split_pair(line: &str) -> Option<(String, String)> {
    let eq = line.find('=')?;
    let key = line[..eq].trim();
    let value = line[eq + 1..].trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}

/// Parse a plain (sectionless) `key = value` file such as `volinfo`
/// or a session `info` file
pub fn load_kv(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = std::fs::read_to_string(path).with_path(path)?;
    let mut map = BTreeMap::new();
    for (lineno, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        let (key, value) = split_pair(line).ok_or_else(|| {
            VaultError::config(format!(
                "Bad line {} in {}: '{}'",
                lineno + 1,
                path.display(),
                raw
            ))
        })?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Write a plain `key = value` file in the given pair order
pub fn save_kv(path: &Path, pairs: &[(&str, String)]) -> Result<()> {
    let mut out = String::new();
    for (k, v) in pairs {
        let _ = writeln!(out, "{} = {}", k, v);
    }
    std::fs::write(path, out).with_path(path)
}
