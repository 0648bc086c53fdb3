use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Exchange-rate payload as served by the rates feed or stored as raw JSON
///
/// `rates[symbol]` is the number of units of `symbol` per one unit of `base`.
/// Some feeds report the effective date as `date`; the pipeline stamps its own
/// `run_date` before persisting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatesPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default)]
    pub rates: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_date: Option<String>,
}

impl RatesPayload {
    /// Effective date: the pipeline's run date wins over the feed's own date
    pub fn effective_date(&self) -> Option<&str> {
        self.run_date
            .as_deref()
            .or(self.date.as_deref())
            .filter(|d| !d.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_date_prefers_run_date() {
        let payload: RatesPayload = serde_json::from_value(serde_json::json!({
            "base": "EUR",
            "rates": {"USD": 1.1},
            "date": "2025-08-12",
            "run_date": "2025-08-13"
        }))
        .unwrap();
        assert_eq!(payload.effective_date(), Some("2025-08-13"));
    }

    #[test]
    fn test_missing_fields_default() {
        let payload: RatesPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.base.is_none());
        assert!(payload.rates.is_empty());
        assert_eq!(payload.effective_date(), None);
    }
}
