//! Order-preserving symbol sequences.
//!
//! Universe membership is decided with set operations, but every sequence the
//! engine emits must follow a deterministic order. `OrderedSymbols` keeps the
//! first-seen order in a `Vec` and a set for constant-time membership.

use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderedSymbols {
    order: Vec<String>,
    members: HashSet<String>,
}

impl OrderedSymbols {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from any sequence, keeping the first occurrence of each symbol.
    /// Blank identifiers are dropped.
    pub fn dedup<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut out = Self::new();
        for symbol in symbols {
            out.push(symbol.as_ref());
        }
        out
    }

    /// Append `symbol` if it is non-blank and not already present.
    /// Returns whether it was inserted.
    pub fn push(&mut self, symbol: &str) -> bool {
        if symbol.trim().is_empty() || !self.members.insert(symbol.to_string()) {
            return false;
        }
        self.order.push(symbol.to_string());
        true
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.members.contains(symbol)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.order
    }

    pub fn into_vec(self) -> Vec<String> {
        self.order
    }
}

impl<'a> FromIterator<&'a str> for OrderedSymbols {
    fn from_iter<T: IntoIterator<Item = &'a str>>(iter: T) -> Self {
        Self::dedup(iter)
    }
}
