use std::fmt;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// Interned identifier handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrId(u32);

impl StrId {
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Name → id interner shared by the parser and the analyzer.
///
/// Serialized as the plain list of strings; the reverse index is rebuilt on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct StringPool {
    strings: Vec<String>,
    index: FxHashMap<String, StrId>,
}

impl StringPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn intern(&mut self, name: &str) -> StrId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = StrId(self.strings.len() as u32);
        self.strings.push(name.to_string());
        self.index.insert(name.to_string(), id);
        id
    }

    pub fn get(&self, name: &str) -> Option<StrId> {
        self.index.get(name).copied()
    }

    pub fn resolve(&self, id: StrId) -> Option<&str> {
        self.strings.get(id.index()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

impl From<Vec<String>> for StringPool {
    fn from(strings: Vec<String>) -> Self {
        let mut pool = StringPool::new();
        for s in strings {
            // Duplicates in a hand-written pool keep their first id.
            let id = StrId(pool.strings.len() as u32);
            pool.index.entry(s.clone()).or_insert(id);
            pool.strings.push(s);
        }
        pool
    }
}

impl From<StringPool> for Vec<String> {
    fn from(pool: StringPool) -> Self {
        pool.strings
    }
}
