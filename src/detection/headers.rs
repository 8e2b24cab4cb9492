//! Header name lists and raw response headers.

use std::sync::Arc;

/// A single response header as reported by the browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub name: String,
    pub value: String,
}

impl ResponseHeader {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Recognized backend header names, lowercase, in priority order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderNames {
    names: Arc<[String]>,
}

impl HeaderNames {
    /// Parse a whitespace or `;` separated list.
    ///
    /// Duplicates keep their first position.
    pub fn parse(config: &str) -> Self {
        let mut names: Vec<String> = Vec::new();
        for name in config
            .split(|c: char| c == ';' || c.is_whitespace())
            .filter(|s| !s.is_empty())
        {
            let name = name.to_ascii_lowercase();
            if !names.contains(&name) {
                names.push(name);
            }
        }
        Self { names: names.into() }
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }
}
