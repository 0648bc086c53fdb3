//! Deterministic surrogate-key assignment

use std::collections::{BTreeMap, BTreeSet};

/// First surrogate key handed out in every dimension
pub const SURROGATE_KEY_START: i64 = 0;

/// Natural key to surrogate key, dense and ordered by natural key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SurrogateKeyMap {
    keys: BTreeMap<String, i64>,
}

impl SurrogateKeyMap {
    /// Number the distinct natural keys in ascending order from [`SURROGATE_KEY_START`]
    ///
    /// The result depends only on the set of keys, never on their input order.
    pub fn assign<I, S>(natural_keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let distinct: BTreeSet<String> = natural_keys.into_iter().map(Into::into).collect();
        let keys = distinct.into_iter().zip(SURROGATE_KEY_START..).collect();
        Self { keys }
    }

    pub fn get(&self, natural_key: &str) -> Option<i64> {
        self.keys.get(natural_key).copied()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Pairs in ascending natural-key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.keys.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
