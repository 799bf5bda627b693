//! Strict `{{ placeholder }}` substitution over named script templates.
//!
//! Rendering is key-complete in both directions: every placeholder the template
//! references must be bound, and every binding must be referenced.

#![allow(missing_docs)]

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::core::errors::{HarnessError, Result};
use crate::template::binding::Bindings;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern")
    })
}

/// Named template sources.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    sources: BTreeMap<String, String>,
}

impl TemplateRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `<name>.<extension>` file in `dir`.
    ///
    /// A missing directory yields an empty registry; lookups then fail with
    /// `TemplateNotFound` naming the template that was asked for.
    pub fn from_dir(dir: &Path, extension: &str) -> Result<Self> {
        let mut registry = Self::new();
        if !dir.is_dir() {
            return Ok(registry);
        }
        let entries = fs::read_dir(dir).map_err(|source| HarnessError::io(dir, source))?;
        for entry in entries {
            let entry = entry.map_err(|source| HarnessError::io(dir, source))?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(extension) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let source =
                fs::read_to_string(&path).map_err(|source| HarnessError::io(&path, source))?;
            registry.sources.insert(name.to_string(), source);
        }
        Ok(registry)
    }

    /// Add or replace a template.
    pub fn register(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.sources.insert(name.into(), source.into());
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    /// Placeholders referenced by a template, sorted and deduplicated.
    pub fn placeholders(&self, name: &str) -> Result<BTreeSet<String>> {
        let source = self.source(name)?;
        Ok(scan_placeholders(source).into_iter().collect())
    }

    /// Substitute every placeholder of `name` from `bindings`.
    pub fn render(&self, name: &str, bindings: &Bindings) -> Result<String> {
        let source = self.source(name)?;
        let referenced = scan_placeholders(source);

        if let Some(missing) = referenced.iter().find(|key| !bindings.contains_key(*key)) {
            return Err(HarnessError::UnboundPlaceholder {
                template: name.to_string(),
                placeholder: missing.clone(),
            });
        }
        if let Some(unused) = bindings.keys().find(|key| !referenced.contains(*key)) {
            return Err(HarnessError::UnusedBinding {
                template: name.to_string(),
                key: unused.clone(),
            });
        }

        let rendered = placeholder_pattern().replace_all(source, |caps: &Captures<'_>| {
            bindings
                .get(&caps[1])
                .map(ToString::to_string)
                .unwrap_or_default()
        });
        Ok(rendered.into_owned())
    }

    fn source(&self, name: &str) -> Result<&str> {
        self.sources
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| HarnessError::TemplateNotFound {
                name: name.to_string(),
            })
    }
}

/// Placeholder names in order of first appearance.
fn scan_placeholders(source: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in placeholder_pattern().captures_iter(source) {
        let key = &caps[1];
        if !seen.iter().any(|k: &String| k == key) {
            seen.push(key.to_string());
        }
    }
    seen
}
