use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// A routing decision or lifecycle moment worth keeping a durable record of.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ProcessStarted,
    ProcessStopped,
    ListenerStarted,
    ConnectionOpened,
    ConnectionDenied,
    UpstreamConnected,
    CommandDispatched,
    ResponseIntercepted,
    MessageDropped,
    MalformedFrame,
    PairClosed,
}

/// One event line in the relay's JSONL log.
///
/// `pair` and `client_ip` scope the event to a proxied session when there is
/// one; process-level events leave them unset. `details` is free-form JSON
/// owned by the emitting site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEvent {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pair: Option<uuid::Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ip: Option<String>,
    pub details: serde_json::Value,
}

impl RelayEvent {
    /// A process-scoped event with a fresh id and the current UTC time.
    pub fn new(kind: EventKind, details: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            kind,
            pair: None,
            client_ip: None,
            details,
        }
    }

    /// Scope the event to a connection pair.
    pub fn for_pair(mut self, pair: uuid::Uuid) -> Self {
        self.pair = Some(pair);
        self
    }

    /// Record the resolved client address the event concerns.
    pub fn from_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&EventKind::ResponseIntercepted).unwrap();
        assert_eq!(json, "\"response_intercepted\"");
    }

    #[test]
    fn process_event_omits_pair_fields() {
        let event = RelayEvent::new(EventKind::ProcessStarted, serde_json::json!({"v": 1}));
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("\"pair\""));
        assert!(!json.contains("client_ip"));
        assert!(json.contains("process_started"));
    }

    #[test]
    fn pair_scoped_event_round_trips() {
        let pair = uuid::Uuid::new_v4();
        let event = RelayEvent::new(EventKind::MessageDropped, serde_json::json!({"reason": "rate"}))
            .for_pair(pair)
            .from_ip("203.0.113.7".parse().unwrap());

        let parsed: RelayEvent =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(parsed.pair, Some(pair));
        assert_eq!(parsed.client_ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(parsed.details["reason"], "rate");
    }
}
