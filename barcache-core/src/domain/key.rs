use super::{DomainError, Period};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one persisted bar sequence: a normalized symbol plus its period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    symbol: String,
    period: Period,
}

impl CacheKey {
    /// Trims and uppercases the symbol. The symbol doubles as a file stem, so
    /// whitespace and path separators are rejected.
    pub fn new(symbol: &str, period: Period) -> Result<Self, DomainError> {
        let symbol = symbol.trim().to_ascii_uppercase();
        if symbol.is_empty() {
            return Err(DomainError::EmptySymbol);
        }
        if symbol.starts_with('.')
            || symbol
                .chars()
                .any(|c| c.is_whitespace() || c == '/' || c == '\\')
        {
            return Err(DomainError::InvalidSymbol(symbol));
        }
        Ok(Self { symbol, period })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn period(&self) -> Period {
        self.period
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.symbol, self.period)
    }
}
