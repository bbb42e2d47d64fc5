//! Query key construction

use std::fmt;

/// Identifies one query in the host's polled cache, rendered `<name>:<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub name: String,
    pub id: String,
}

impl QueryKey {
    /// # Example
    ///
    /// ```
    /// use cache_sync::QueryKey;
    ///
    /// let key = QueryKey::new("notifications", 42);
    /// assert_eq!(key.to_string(), "notifications:42");
    /// ```
    pub fn new(name: impl Into<String>, id: impl fmt::Display) -> Self {
        Self {
            name: name.into(),
            id: id.to_string(),
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.id)
    }
}
