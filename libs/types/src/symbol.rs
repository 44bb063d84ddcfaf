//! Trading pair identifier

use serde::{Deserialize, Serialize};
use std::fmt;

/// Trading pair symbol in venue notation (e.g. "BTCUSDT").
///
/// Stored lowercase-insensitively as received; comparisons are exact, so a
/// single pipeline instance must use one canonical spelling throughout.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new symbol from a string.
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the symbol as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used in stream subscription paths.
    pub fn stream_name(&self) -> String {
        self.0.to_lowercase()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name_lowercases() {
        let sym = Symbol::new("BTCUSDT");
        assert_eq!(sym.stream_name(), "btcusdt");
        assert_eq!(sym.as_str(), "BTCUSDT");
    }

    #[test]
    fn test_symbol_serde_transparent() {
        let sym = Symbol::new("ETHUSDT");
        let json = serde_json::to_string(&sym).unwrap();
        assert_eq!(json, "\"ETHUSDT\"");
        let back: Symbol = serde_json::from_str(&json).unwrap();
        assert_eq!(back, sym);
    }
}
