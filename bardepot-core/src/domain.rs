//! Typed dataset handed over by provider clients.

use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};

/// Descriptive fields a provider attaches to the bars it fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMetadata {
    pub symbol: String,
    /// e.g. `equities`, `crypto`, `futures`.
    pub asset_class: String,
    /// e.g. `daily`, `minute`.
    pub frequency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

/// A frame of bars together with its metadata.
#[derive(Debug, Clone)]
pub struct DataObject {
    pub data: DataFrame,
    pub metadata: DataMetadata,
}

impl DataObject {
    pub fn new(data: DataFrame, metadata: DataMetadata) -> Self {
        Self { data, metadata }
    }

    /// `asset_class/frequency/symbol`
    pub fn storage_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.metadata.asset_class, self.metadata.frequency, self.metadata.symbol
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_from_metadata() {
        let obj = DataObject::new(
            DataFrame::empty(),
            DataMetadata {
                symbol: "AAPL".into(),
                asset_class: "equities".into(),
                frequency: "daily".into(),
                provider: Some("yahoo".into()),
            },
        );
        assert_eq!(obj.storage_key(), "equities/daily/AAPL");
    }
}
