//! Ordered, case-insensitive header mapping.

use hyper::header::SET_COOKIE;
use hyper::HeaderMap;
use serde::{Deserialize, Serialize};

/// Header mapping with unique, case-insensitive names in insertion order.
///
/// Serialized as a list of `[name, value]` pairs. Repeated names in input
/// are folded into one entry with values joined by `", "`. `Set-Cookie`
/// values may contain commas themselves, so they are joined by `"\n"`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<(String, String)>", into = "Vec<(String, String)>")]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Replace the value of `name`, keeping its original position and spelling.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i].1 = value,
            None => self.entries.push((name, value)),
        }
    }

    /// Add a value to `name`, folding into an existing entry.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => {
                let separator = if name.eq_ignore_ascii_case(SET_COOKIE.as_str()) { "\n" } else { ", " };
                let existing = &mut self.entries[i].1;
                existing.push_str(separator);
                existing.push_str(&value);
            }
            None => self.entries.push((name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Convert a parsed response header block. Non-UTF-8 values are decoded lossily.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Headers::new();
        for (name, value) in map {
            headers.append(name.as_str(), String::from_utf8_lossy(value.as_bytes()));
        }
        headers
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

impl From<Vec<(String, String)>> for Headers {
    fn from(pairs: Vec<(String, String)>) -> Self {
        pairs.into_iter().collect()
    }
}

impl From<Headers> for Vec<(String, String)> {
    fn from(headers: Headers) -> Self {
        headers.entries
    }
}
