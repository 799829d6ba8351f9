//! Rate limit key generation and handling.

use serde::{Deserialize, Serialize};

/// A key that identifies an independent rate limit budget.
///
/// Keys are stored as text so that every backend, including the SQLite
/// table, sees the same identity. Integers render in decimal, which means
/// `RateKey::from(1)` and `RateKey::from("1")` address the same budget.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateKey(String);

impl RateKey {
    /// Create a new key from any string-like identity.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Create a key composed of several key-value pairs.
    ///
    /// Entries are serialized in the order given, so callers should use a
    /// consistent order for the same logical identity.
    pub fn composite<K, V>(entries: &[(K, V)]) -> Self
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let entries_str: Vec<String> = entries
            .iter()
            .map(|(k, v)| format!("{}={}", k.as_ref(), v.as_ref()))
            .collect();

        Self(entries_str.join(","))
    }

    /// The key as stored.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the empty key shared by un-keyed guards.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for RateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for RateKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<String> for RateKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl From<&str> for RateKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<&String> for RateKey {
    fn from(key: &String) -> Self {
        Self(key.clone())
    }
}

impl From<&RateKey> for RateKey {
    fn from(key: &RateKey) -> Self {
        key.clone()
    }
}

macro_rules! impl_from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for RateKey {
                fn from(key: $ty) -> Self {
                    Self(key.to_string())
                }
            }
        )*
    };
}

impl_from_integer!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);
