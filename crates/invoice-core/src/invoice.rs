//! Invoice Records
//!
//! One record per invoice issued through the payment provider.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An invoice created by this process.
///
/// Besides the provider-assigned `id`, a record carries an open set of
/// metadata fields which are stored flattened next to the id:
///
/// ```json
/// { "id": "INV2-ABCD-1234", "amount": "10.00", "currency": "USD" }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvoiceRecord {
    /// Provider-assigned invoice identifier
    pub id: String,

    /// Implementation-defined metadata
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl InvoiceRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            metadata: Map::new(),
        }
    }

    /// Attach a metadata field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if key != "id" {
            self.metadata.insert(key, value.into());
        }
        self
    }

    /// Look up a metadata field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Metadata field as a string, if it is one
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_is_flattened() {
        let record = InvoiceRecord::new("INV-001")
            .with("amount", "10.00")
            .with("currency", "USD");

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "INV-001");
        assert_eq!(json["amount"], "10.00");
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_unknown_fields_survive_deserialization() {
        let record: InvoiceRecord =
            serde_json::from_str(r#"{"id":"INV-002","key":"value","paid":false}"#).unwrap();

        assert_eq!(record.id, "INV-002");
        assert_eq!(record.get_str("key"), Some("value"));
        assert_eq!(record.get("paid"), Some(&Value::Bool(false)));
    }

    #[test]
    fn test_id_cannot_be_shadowed_by_metadata() {
        let record = InvoiceRecord::new("INV-003").with("id", "other");
        assert_eq!(record.id, "INV-003");
        assert!(record.metadata.is_empty());
    }
}
