//! Wire envelope and typed events.
//!
//! Every frame in either direction is `{"event": "<name>", "data": <payload>}`.
//! Inbound frames are decoded into [`PushEvent`]s; frames with an unknown
//! event name or an undecodable payload are dropped with a warning.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Identity, NotificationEvent, NotificationKind};

/// Named events a subscriber can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventName {
    NewLead,
    NewMeeting,
    NewBooking,
    MeetingReminder,
    LeadUpdate,
    UserTyping,
    MessageRead,
    /// A (re)handshake completed.
    Connected,
    /// The session dropped without the caller asking for it.
    Disconnected,
    /// The reconnection policy gave up.
    MaxReconnectAttemptsReached,
}

impl EventName {
    /// Server events carrying a [`NotificationEvent`].
    pub const NOTIFICATIONS: [EventName; 5] = [
        EventName::NewLead,
        EventName::NewMeeting,
        EventName::NewBooking,
        EventName::MeetingReminder,
        EventName::LeadUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::NewLead => "newLead",
            EventName::NewMeeting => "newMeeting",
            EventName::NewBooking => "newBooking",
            EventName::MeetingReminder => "meetingReminder",
            EventName::LeadUpdate => "leadUpdate",
            EventName::UserTyping => "userTyping",
            EventName::MessageRead => "messageRead",
            EventName::Connected => "connected",
            EventName::Disconnected => "disconnected",
            EventName::MaxReconnectAttemptsReached => "maxReconnectAttemptsReached",
        }
    }

    /// Resolves a name received from the server. Local lifecycle names are
    /// never accepted off the wire.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "newLead" => Some(EventName::NewLead),
            "newMeeting" => Some(EventName::NewMeeting),
            "newBooking" => Some(EventName::NewBooking),
            "meetingReminder" => Some(EventName::MeetingReminder),
            "leadUpdate" => Some(EventName::LeadUpdate),
            "userTyping" => Some(EventName::UserTyping),
            "messageRead" => Some(EventName::MessageRead),
            _ => None,
        }
    }

    pub fn for_kind(kind: NotificationKind) -> Self {
        match kind {
            NotificationKind::NewLead => EventName::NewLead,
            NotificationKind::NewMeeting => EventName::NewMeeting,
            NotificationKind::NewBooking => EventName::NewBooking,
            NotificationKind::MeetingReminder => EventName::MeetingReminder,
            NotificationKind::LeadUpdate => EventName::LeadUpdate,
        }
    }

    pub fn is_notification(&self) -> bool {
        Self::NOTIFICATIONS.contains(self)
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload handed to dispatcher handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Notification {
        name: EventName,
        event: NotificationEvent,
    },
    UserTyping(Value),
    MessageRead(Value),
    Connected,
    Disconnected {
        reason: String,
    },
    MaxReconnectAttemptsReached {
        attempts: u32,
    },
}

impl PushEvent {
    pub fn name(&self) -> EventName {
        match self {
            PushEvent::Notification { name, .. } => *name,
            PushEvent::UserTyping(_) => EventName::UserTyping,
            PushEvent::MessageRead(_) => EventName::MessageRead,
            PushEvent::Connected => EventName::Connected,
            PushEvent::Disconnected { .. } => EventName::Disconnected,
            PushEvent::MaxReconnectAttemptsReached { .. } => {
                EventName::MaxReconnectAttemptsReached
            }
        }
    }

    pub fn notification(&self) -> Option<&NotificationEvent> {
        match self {
            PushEvent::Notification { event, .. } => Some(event),
            _ => None,
        }
    }
}

/// Raw inbound envelope before the event name is resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("invalid payload for '{event}': {source}")]
    Payload {
        event: EventName,
        #[source]
        source: serde_json::Error,
    },
}

pub fn decode_frame(text: &str) -> Result<PushEvent, DecodeError> {
    let envelope: Envelope = serde_json::from_str(text).map_err(DecodeError::Envelope)?;
    decode_envelope(envelope)
}

pub fn decode_envelope(envelope: Envelope) -> Result<PushEvent, DecodeError> {
    let name = EventName::from_wire(&envelope.event)
        .ok_or_else(|| DecodeError::UnknownEvent(envelope.event.clone()))?;

    match name {
        EventName::UserTyping => Ok(PushEvent::UserTyping(envelope.data)),
        EventName::MessageRead => Ok(PushEvent::MessageRead(envelope.data)),
        _ => {
            let event: NotificationEvent = serde_json::from_value(envelope.data)
                .map_err(|source| DecodeError::Payload { event: name, source })?;
            Ok(PushEvent::Notification { name, event })
        }
    }
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    Join(Identity),
    #[serde(rename_all = "camelCase")]
    MarkAsRead {
        notification_id: String,
    },
    Typing(Value),
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Join(_) => "join",
            ClientMessage::MarkAsRead { .. } => "markAsRead",
            ClientMessage::Typing(_) => "typing",
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_new_lead() {
        let frame = json!({
            "event": "newLead",
            "data": {
                "type": "new_lead",
                "title": "New lead",
                "message": "Jane Doe",
                "timestamp": "2026-10-15T09:30:00Z"
            }
        })
        .to_string();

        let event = decode_frame(&frame).unwrap();
        assert_eq!(event.name(), EventName::NewLead);
        assert_eq!(event.notification().unwrap().message, "Jane Doe");
    }

    #[test]
    fn test_decode_passthrough_events_keep_payload() {
        let frame = json!({ "event": "userTyping", "data": { "chatId": 7 } }).to_string();
        assert_eq!(
            decode_frame(&frame).unwrap(),
            PushEvent::UserTyping(json!({ "chatId": 7 }))
        );
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        let frame = json!({ "event": "priceDrop", "data": {} }).to_string();
        assert!(matches!(
            decode_frame(&frame),
            Err(DecodeError::UnknownEvent(name)) if name == "priceDrop"
        ));
    }

    #[test]
    fn test_lifecycle_names_not_accepted_from_server() {
        let frame = json!({ "event": "maxReconnectAttemptsReached", "data": {} }).to_string();
        assert!(decode_frame(&frame).is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_notification_type() {
        let frame = json!({
            "event": "leadUpdate",
            "data": { "type": "lead_deleted", "title": "t", "message": "m",
                      "timestamp": "2026-10-15T09:30:00Z" }
        })
        .to_string();
        assert!(matches!(
            decode_frame(&frame),
            Err(DecodeError::Payload { event: EventName::LeadUpdate, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_frame("not json"), Err(DecodeError::Envelope(_))));
    }

    #[test]
    fn test_client_messages_encode_as_envelopes() {
        let join = ClientMessage::Join(Identity::agent("a1")).encode().unwrap();
        let value: Value = serde_json::from_str(&join).unwrap();
        assert_eq!(
            value,
            json!({ "event": "join", "data": { "userId": "a1", "userType": "agent" } })
        );

        let receipt = ClientMessage::MarkAsRead {
            notification_id: "new_lead_1_abc".into(),
        };
        let value: Value = serde_json::from_str(&receipt.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({ "event": "markAsRead", "data": { "notificationId": "new_lead_1_abc" } })
        );
    }

    #[test]
    fn test_event_name_for_kind_round_trips_wire_name() {
        for kind in NotificationKind::ALL {
            let name = EventName::for_kind(kind);
            assert!(name.is_notification());
            assert_eq!(EventName::from_wire(name.as_str()), Some(name));
        }
    }
}
