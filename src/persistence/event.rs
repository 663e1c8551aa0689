//! Event types for the store's append-only log.
//!
//! Every store mutation is one event. Replaying the events of a generation on
//! top of its snapshot rebuilds the in-memory index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Fields, Identity};

/// One line of the event log.
///
/// Example JSON:
/// ```json
/// {"seq":4,"ts":"2025-03-01T10:00:00Z","type":"observed","identity":"111","fields":[{"name":"ismingiz?","value":"Ali"}]}
/// {"seq":5,"ts":"2025-03-01T10:00:02Z","type":"sent","identity":"111"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreEvent {
    /// Store-wide, strictly increasing sequence number.
    pub seq: u64,

    pub ts: DateTime<Utc>,

    #[serde(flatten)]
    pub payload: StoreEventPayload,
}

impl StoreEvent {
    pub fn new(seq: u64, payload: StoreEventPayload) -> Self {
        StoreEvent {
            seq,
            ts: Utc::now(),
            payload,
        }
    }

    pub fn identity(&self) -> &Identity {
        self.payload.identity()
    }
}

/// What happened to an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreEventPayload {
    /// First observation of an identity. Creates a pending record.
    Observed { identity: Identity, fields: Fields },

    /// The channel acknowledged every chunk of the record's message.
    Sent { identity: Identity },
}

impl StoreEventPayload {
    pub fn identity(&self) -> &Identity {
        match self {
            StoreEventPayload::Observed { identity, .. } | StoreEventPayload::Sent { identity } => {
                identity
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::arb_store_event_payload;
    use proptest::prelude::*;

    #[test]
    fn observed_serializes_flat_with_type_tag() {
        let fields: Fields = [("name", "Ali")].into_iter().collect();
        let event = StoreEvent::new(
            7,
            StoreEventPayload::Observed {
                identity: Identity::new("111").unwrap(),
                fields,
            },
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["seq"], 7);
        assert_eq!(json["type"], "observed");
        assert_eq!(json["identity"], "111");
        assert_eq!(json["fields"][0]["value"], "Ali");
    }

    #[test]
    fn sent_parses_from_log_line() {
        let line = r#"{"seq":5,"ts":"2025-03-01T10:00:02Z","type":"sent","identity":"111"}"#;
        let event: StoreEvent = serde_json::from_str(line).unwrap();

        assert_eq!(event.seq, 5);
        assert_eq!(event.identity().as_str(), "111");
        assert!(matches!(event.payload, StoreEventPayload::Sent { .. }));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let line = r#"{"seq":1,"ts":"2025-03-01T10:00:02Z","type":"deleted","identity":"111"}"#;
        assert!(serde_json::from_str::<StoreEvent>(line).is_err());
    }

    proptest! {
        #[test]
        fn json_line_roundtrip(seq in 0u64..1_000_000, payload in arb_store_event_payload()) {
            let event = StoreEvent::new(seq, payload);
            let line = serde_json::to_string(&event).unwrap();
            prop_assert!(!line.contains('\n'));
            let parsed: StoreEvent = serde_json::from_str(&line).unwrap();
            prop_assert_eq!(parsed, event);
        }
    }
}
