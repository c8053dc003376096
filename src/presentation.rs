//! Text helpers for rendering notifications: relative ages, per-kind glyphs,
//! and the bell badge/footer labels.

use chrono::{DateTime, Utc};

use crate::models::{Notification, NotificationKind};

pub fn format_time_ago(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = now.signed_duration_since(timestamp);
    let minutes = elapsed.num_minutes();
    let hours = elapsed.num_hours();
    let days = elapsed.num_days();

    if minutes < 1 {
        "Just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if hours < 24 {
        format!("{}h ago", hours)
    } else {
        format!("{}d ago", days)
    }
}

pub fn icon(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::NewLead => "👤",
        NotificationKind::NewMeeting => "📅",
        NotificationKind::NewBooking => "✅",
        NotificationKind::MeetingReminder => "⏰",
        NotificationKind::LeadUpdate => "📝",
    }
}

/// Badge text over the bell; `None` hides the badge.
pub fn badge_label(unread_count: usize) -> Option<String> {
    match unread_count {
        0 => None,
        n if n > 9 => Some("9+".to_string()),
        n => Some(n.to_string()),
    }
}

pub fn bell_title(is_connected: bool) -> &'static str {
    if is_connected {
        "Notifications"
    } else {
        "Connecting..."
    }
}

pub fn summary_line(unread_count: usize, total: usize) -> String {
    format!("{} unread • {} total", unread_count, total)
}

/// One-line rendering used by the terminal watcher.
pub fn render_line(notification: &Notification, now: DateTime<Utc>) -> String {
    let marker = if notification.read { ' ' } else { '•' };
    format!(
        "{} {} {}: {} ({})",
        marker,
        icon(notification.kind()),
        notification.event.title,
        notification.event.message,
        format_time_ago(notification.event.timestamp, now)
    )
}
