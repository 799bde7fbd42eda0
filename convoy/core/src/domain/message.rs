// Copyright (c) 2026 parknet contributors
// SPDX-License-Identifier: AGPL-3.0
//! # Message Envelope
//!
//! JSON envelope every agent broadcasts on the bus:
//!
//! ```json
//! {"sender": "a", "topic": "formation", "content": {...}, "timestamp": 1700000000.25}
//! ```
//!
//! `content` stays opaque [`serde_json::Value`] until a subscriber decodes it
//! for the topic it handles, so one malformed payload only fails that
//! message.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::signature::{Signature, Timestamp};

/// Topics the convoy protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Relation facts (`MemberRelation`).
    Formation,
    /// Global action claims and heartbeats.
    ActiveGlobal,
    /// The owner finished its global action.
    CompletedGlobal,
    /// A leave maneuver finished; content is the leaver's signature.
    ProcessFinished,
}

impl Topic {
    pub const ALL: [Topic; 4] = [
        Topic::Formation,
        Topic::ActiveGlobal,
        Topic::CompletedGlobal,
        Topic::ProcessFinished,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Formation => "formation",
            Topic::ActiveGlobal => "action/active-global",
            Topic::CompletedGlobal => "action/completed-global",
            Topic::ProcessFinished => "process-finished",
        }
    }

    /// Unrecognized topic strings yield `None`.
    pub fn parse(topic: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == topic)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    #[error("Malformed {kind} on topic '{topic}': {source}")]
    Content {
        kind: &'static str,
        topic: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Immutable once sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Signature,
    pub topic: String,
    pub content: serde_json::Value,
    pub timestamp: Timestamp,
}

impl Envelope {
    pub fn new(sender: Signature, topic: Topic, content: serde_json::Value, timestamp: Timestamp) -> Self {
        Self {
            sender,
            topic: topic.as_str().to_string(),
            content,
            timestamp,
        }
    }

    /// The recognized topic, if any.
    pub fn topic(&self) -> Option<Topic> {
        Topic::parse(&self.topic)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(payload).map_err(DecodeError::Envelope)
    }

    /// Decodes `content` as `T`. `kind` names the payload in errors.
    pub fn content_as<T: DeserializeOwned>(&self, kind: &'static str) -> Result<T, DecodeError> {
        T::deserialize(&self.content).map_err(|source| DecodeError::Content {
            kind,
            topic: self.topic.clone(),
            source,
        })
    }

    pub fn is_from(&self, signature: &Signature) -> bool {
        &self.sender == signature
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::member::MemberRelation;
    use serde_json::json;

    #[test]
    fn test_topic_names() {
        for topic in Topic::ALL {
            assert_eq!(Topic::parse(topic.as_str()), Some(topic));
        }
        assert_eq!(Topic::ActiveGlobal.to_string(), "action/active-global");
        assert_eq!(Topic::parse("parking/lot-map"), None);
    }

    #[test]
    fn test_decode_wire_envelope() {
        let payload = br#"{"sender":"b","topic":"formation","content":{"member":{"signature":"b","delta":60.0,"filing":null},"ahead_signature":"a"},"timestamp":100.5}"#;
        let envelope = Envelope::decode(payload).unwrap();
        assert_eq!(envelope.topic(), Some(Topic::Formation));
        assert_eq!(envelope.timestamp, Timestamp::from_secs(100.5));

        let relation: MemberRelation = envelope.content_as("relation").unwrap();
        assert_eq!(relation.ahead_signature, Some(Signature::from("a")));
    }

    #[test]
    fn test_decode_missing_timestamp_fails() {
        let payload = br#"{"sender":"b","topic":"formation","content":null}"#;
        let err = Envelope::decode(payload).unwrap_err();
        assert!(matches!(err, DecodeError::Envelope(_)));
        assert!(err.to_string().contains("timestamp"));
    }

    #[test]
    fn test_decode_missing_content_fails() {
        let payload = br#"{"sender":"b","topic":"action/completed-global","timestamp":3.0}"#;
        let err = Envelope::decode(payload).unwrap_err();
        assert!(matches!(err, DecodeError::Envelope(_)));
        assert!(err.to_string().contains("content"));

        let explicit_null = br#"{"sender":"b","topic":"action/completed-global","content":null,"timestamp":3.0}"#;
        assert_eq!(Envelope::decode(explicit_null).unwrap().content, serde_json::Value::Null);
    }

    #[test]
    fn test_malformed_content_is_reported_per_topic() {
        let envelope = Envelope::new(
            Signature::from("b"),
            Topic::Formation,
            json!({"ahead_signature": "a"}),
            Timestamp::from_secs(1.0),
        );
        let err = envelope.content_as::<MemberRelation>("relation").unwrap_err();
        match err {
            DecodeError::Content { kind, topic, .. } => {
                assert_eq!(kind, "relation");
                assert_eq!(topic, "formation");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_encode_keeps_timestamp_exact() {
        let envelope = Envelope::new(
            Signature::from("a"),
            Topic::CompletedGlobal,
            serde_json::Value::Null,
            Timestamp::from_secs(1700000000.123456),
        );
        let decoded = Envelope::decode(&envelope.encode().unwrap()).unwrap();
        assert_eq!(decoded, envelope);
    }
}
