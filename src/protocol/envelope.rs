//! The wire envelope `{type, data, for}` (§6). `data` is omitted when
//! empty; `for` only appears on MULTI-mode traffic, carrying the
//! recipient's `unique_id` outbound or `pid` on incoming routing (§4.6).

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_: Option<String>,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
            for_: None,
        }
    }

    pub fn tagged_for(mut self, unique_id: impl Into<String>) -> Self {
        self.for_ = Some(unique_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_data_is_omitted_from_json() {
        let envelope = Envelope::new("ping", None);
        let json = serde_json::to_string(&envelope).unwrap();
        assert_eq!(json, r#"{"type":"ping"}"#);
    }

    #[test]
    fn multi_mode_envelope_carries_for_field() {
        let envelope = Envelope::new("temps", Some(serde_json::json!({"bed": [10, 20]})))
            .tagged_for("abc-123");
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains(r#""for":"abc-123""#));
    }
}
