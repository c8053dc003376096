use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Closed set of notification kinds the push server emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewLead,
    NewMeeting,
    NewBooking,
    MeetingReminder,
    LeadUpdate,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 5] = [
        NotificationKind::NewLead,
        NotificationKind::NewMeeting,
        NotificationKind::NewBooking,
        NotificationKind::MeetingReminder,
        NotificationKind::LeadUpdate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::NewLead => "new_lead",
            NotificationKind::NewMeeting => "new_meeting",
            NotificationKind::NewBooking => "new_booking",
            NotificationKind::MeetingReminder => "meeting_reminder",
            NotificationKind::LeadUpdate => "lead_update",
        }
    }

    /// Reminders stay until explicitly cleared; everything else ages out.
    pub fn expires(&self) -> bool {
        !matches!(self, NotificationKind::MeetingReminder)
    }
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload carried by every server-pushed notification event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    /// Opaque domain payload (lead id, meeting details, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Server clock at generation time.
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        kind: NotificationKind,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A received event materialized on the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(flatten)]
    pub event: NotificationEvent,
    pub read: bool,
}

impl Notification {
    pub fn from_event(event: NotificationEvent) -> Self {
        Self {
            id: generate_id(event.kind, Utc::now()),
            event,
            read: false,
        }
    }

    pub fn kind(&self) -> NotificationKind {
        self.event.kind
    }
}

const ID_SUFFIX_LEN: usize = 9;

/// `<kind>_<receipt millis>_<random suffix>`. Unique for practical purposes
/// within a session; callers that need a hard guarantee check against the
/// live set.
pub fn generate_id(kind: NotificationKind, received_at: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(ID_SUFFIX_LEN)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();
    format!("{}_{}_{}", kind.as_str(), received_at.timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_decodes_wire_payload() {
        let event: NotificationEvent = serde_json::from_value(json!({
            "type": "new_lead",
            "title": "New lead",
            "message": "Jane Doe",
            "data": { "leadId": "l-42" },
            "timestamp": "2026-10-15T09:30:00Z"
        }))
        .unwrap();

        assert_eq!(event.kind, NotificationKind::NewLead);
        assert_eq!(event.title, "New lead");
        assert_eq!(event.data, Some(json!({ "leadId": "l-42" })));
    }

    #[test]
    fn test_event_data_is_optional() {
        let event: NotificationEvent = serde_json::from_value(json!({
            "type": "meeting_reminder",
            "title": "Reminder",
            "message": "Viewing at 3pm",
            "timestamp": "2026-10-15T09:30:00Z"
        }))
        .unwrap();
        assert!(event.data.is_none());
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let result = serde_json::from_value::<NotificationEvent>(json!({
            "type": "price_drop",
            "title": "x",
            "message": "y",
            "timestamp": "2026-10-15T09:30:00Z"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_only_reminders_are_retained() {
        for kind in NotificationKind::ALL {
            assert_eq!(kind.expires(), kind != NotificationKind::MeetingReminder);
        }
    }

    #[test]
    fn test_generated_id_shape() {
        let at = DateTime::parse_from_rfc3339("2026-10-15T09:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let id = generate_id(NotificationKind::LeadUpdate, at);
        let prefix = format!("lead_update_{}_", at.timestamp_millis());
        assert!(id.starts_with(&prefix), "unexpected id {id}");
        assert_eq!(id.len(), prefix.len() + ID_SUFFIX_LEN);
    }

    #[test]
    fn test_notification_serializes_flat() {
        let n = Notification::from_event(NotificationEvent::new(
            NotificationKind::NewBooking,
            "Booked",
            "Unit 4B",
        ));
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["type"], "new_booking");
        assert_eq!(value["read"], false);
        assert_eq!(value["id"], n.id.as_str());
    }
}
