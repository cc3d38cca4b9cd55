//! StreamId - shared name of a delivery stream
//!
//! The name ends up in object paths and metric labels, so it is cloned on
//! every batch. Backed by `Arc<str>`.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Delivery stream name.
///
/// ```
/// use contracts::StreamId;
///
/// let id: StreamId = "clicks".into();
/// assert_eq!(id, "clicks");
/// assert!(id.is_path_safe());
/// ```
#[derive(Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(Arc<str>);

impl StreamId {
    #[inline]
    pub fn new(s: &str) -> Self {
        Self(Arc::from(s))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the name can be used verbatim as an object-name component:
    /// non-empty, ASCII alphanumerics plus `-`, `_` and `.`, and not a dot path.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.as_ref() != "."
            && self.0.as_ref() != ".."
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    }
}

impl Deref for StreamId {
    type Target = str;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for StreamId {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for StreamId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for StreamId {
    #[inline]
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl From<String> for StreamId {
    #[inline]
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StreamId({:?})", self.0)
    }
}

impl PartialEq<str> for StreamId {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        self.0.as_ref() == other
    }
}

impl PartialEq<&str> for StreamId {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        self.0.as_ref() == *other
    }
}

impl Serialize for StreamId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for StreamId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_clone_shares_storage() {
        let a: StreamId = "orders".into();
        let b = a.clone();
        assert_eq!(a.as_str().as_ptr(), b.as_str().as_ptr());
    }

    #[test]
    fn test_lookup_by_str() {
        let mut map: HashMap<StreamId, u32> = HashMap::new();
        map.insert("orders".into(), 7);
        assert_eq!(map.get("orders"), Some(&7));
    }

    #[test]
    fn test_path_safety() {
        assert!(StreamId::from("web-logs_v2.prod").is_path_safe());
        assert!(!StreamId::from("").is_path_safe());
        assert!(!StreamId::from("..").is_path_safe());
        assert!(!StreamId::from("a/b").is_path_safe());
        assert!(!StreamId::from("with space").is_path_safe());
    }

    #[test]
    fn test_serde_as_plain_string() {
        let id: StreamId = "orders".into();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"orders\"");
        let back: StreamId = serde_json::from_str("\"orders\"").unwrap();
        assert_eq!(back, id);
    }
}
