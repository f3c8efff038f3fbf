//! Backend-interpreted query expressions

use serde::{Deserialize, Serialize};
use std::fmt;

/// An opaque filter or path expression.
///
/// The text is interpreted by the backend: for class queries it filters the
/// instances of a class, for path queries it walks relationships from a
/// source object. An empty query selects every instance of the class and of
/// its subclasses. Queries carry no state and can be reused freely.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Query {
    text: String,
}

impl Query {
    /// Wrap query text without any syntax check.
    ///
    /// Use `Configuration::query` to have the backend check the syntax first.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
        }
    }

    /// The always-true query
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_all(&self) -> bool {
        self.text.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.text.is_empty() {
            f.write_str("(all)")
        } else {
            f.write_str(&self.text)
        }
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::new(text)
    }
}
