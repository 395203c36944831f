//! Named signal definitions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::layout::SignalLayout;

/// A named physical quantity packed into a fixed bit range of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub name: String,
    pub layout: SignalLayout,
    /// Engineering unit (e.g. "km/h", "degC").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Nodes that consume this signal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub receivers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw value -> label table (`VAL_` entries).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub value_descriptions: BTreeMap<i128, String>,
}

impl Signal {
    pub fn new(name: impl Into<String>, layout: SignalLayout) -> Self {
        Self {
            name: name.into(),
            layout,
            unit: None,
            receivers: Vec::new(),
            description: None,
            value_descriptions: BTreeMap::new(),
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_receivers<I, S>(mut self, receivers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.receivers = receivers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_value_description(mut self, raw: i128, label: impl Into<String>) -> Self {
        self.value_descriptions.insert(raw, label.into());
        self
    }

    /// Label for a raw value, if the signal has a value table entry for it.
    pub fn describe(&self, raw: i128) -> Option<&str> {
        self.value_descriptions.get(&raw).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::BitOrder;

    #[test]
    fn value_description_lookup() {
        let signal = Signal::new("GearLever", SignalLayout::new(0, 3, BitOrder::LsbFirst))
            .with_value_description(0, "Park")
            .with_value_description(1, "Reverse");
        assert_eq!(signal.describe(1), Some("Reverse"));
        assert_eq!(signal.describe(5), None);
    }

    #[test]
    fn deserialize_with_defaults() {
        let json = r#"{
            "name": "VehicleSpeed",
            "layout": { "start_bit": 0, "length": 16, "order": "lsb_first", "scale": 0.01 },
            "unit": "km/h",
            "value_descriptions": { "65535": "Invalid" }
        }"#;
        let signal: Signal = serde_json::from_str(json).unwrap();
        assert_eq!(signal.layout.length, 16);
        assert!(!signal.layout.signed);
        assert_eq!(signal.layout.offset, 0.0);
        assert!(signal.layout.mux.is_none());
        assert!(signal.receivers.is_empty());
        assert_eq!(signal.describe(65535), Some("Invalid"));
    }
}
