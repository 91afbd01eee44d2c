use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length in characters of the body excerpt carried by an [`IngestionEvent`].
pub const SNIPPET_CHARS: usize = 200;

/// Business category assigned to every ingested message.
///
/// The set is closed: classifiers are handed exactly [`Category::ALL`] and
/// must answer with one of its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Interested")]
    Interested,
    #[serde(rename = "Meeting Booked")]
    MeetingBooked,
    #[serde(rename = "Not Interested")]
    NotInterested,
    #[serde(rename = "Spam")]
    Spam,
    #[serde(rename = "Out of Office")]
    OutOfOffice,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::Interested,
        Category::MeetingBooked,
        Category::NotInterested,
        Category::Spam,
        Category::OutOfOffice,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Category::Interested => "Interested",
            Category::MeetingBooked => "Meeting Booked",
            Category::NotInterested => "Not Interested",
            Category::Spam => "Spam",
            Category::OutOfOffice => "Out of Office",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown category {0:?}")]
pub struct UnknownCategory(pub String);

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCategory(s.to_string()))
    }
}

/// Where a message came from: the one-time historical fetch or live monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Backfill,
    Live,
}

impl Origin {
    pub fn is_live(self) -> bool {
        matches!(self, Origin::Live)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub content_type: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

/// A message decoded from its raw bytes. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    /// RFC 3339, when the message carried a usable Date header.
    pub date: Option<String>,
    pub message_id: Option<String>,
    pub attachments: Vec<Attachment>,
}

impl ParsedEmail {
    pub fn snippet(&self) -> String {
        self.body_text.chars().take(SNIPPET_CHARS).collect()
    }
}

/// Document handed to the persistence adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRecord {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
    pub date: String,
    pub message_id: String,
    pub account: String,
    pub labels: Vec<String>,
    pub category: Category,
    pub attachments: Vec<Attachment>,
}

impl EmailRecord {
    pub fn new(email: &ParsedEmail, category: Category, account: &str, received: &str) -> Self {
        Self {
            from: email.from.clone(),
            to: email.to.clone(),
            subject: email.subject.clone(),
            text: email.body_text.clone(),
            html: email.body_html.clone(),
            date: email.date.clone().unwrap_or_else(|| received.to_string()),
            message_id: email.message_id.clone().unwrap_or_default(),
            account: account.to_string(),
            labels: Vec::new(),
            category,
            attachments: email.attachments.clone(),
        }
    }
}

/// Payload broadcast for every successfully parsed message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionEvent {
    pub sender: String,
    pub subject: String,
    pub account: String,
    pub category: Category,
    pub snippet: String,
    pub date: String,
}

impl IngestionEvent {
    pub fn new(email: &ParsedEmail, category: Category, account: &str, received: &str) -> Self {
        Self {
            sender: email.from.clone(),
            subject: email.subject.clone(),
            account: account.to_string(),
            category,
            snippet: email.snippet(),
            date: email.date.clone().unwrap_or_else(|| received.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ParsedEmail {
        ParsedEmail {
            from: "Ann <ann@example.com>".into(),
            to: "me@example.com".into(),
            subject: "Hello".into(),
            body_text: "é".repeat(300),
            body_html: String::new(),
            date: None,
            message_id: Some("<1@example.com>".into()),
            attachments: vec![Attachment {
                filename: Some("cv.pdf".into()),
                content_type: "application/pdf".into(),
                size_bytes: 1024,
            }],
        }
    }

    #[test]
    fn category_labels_parse_back() {
        for category in Category::ALL {
            assert_eq!(category.label().parse::<Category>(), Ok(category));
        }
        assert_eq!("meeting booked".parse::<Category>(), Ok(Category::MeetingBooked));
        let err = "Urgent".parse::<Category>().unwrap_err();
        assert_eq!(err.to_string(), "unknown category \"Urgent\"");
        let boxed: Box<dyn std::error::Error> = Box::new(err);
        assert!(boxed.source().is_none());
    }

    #[test]
    fn category_serializes_as_display_label() {
        let json = serde_json::to_string(&Category::OutOfOffice).unwrap();
        assert_eq!(json, "\"Out of Office\"");
    }

    #[test]
    fn snippet_is_char_bounded() {
        let email = sample();
        assert_eq!(email.snippet().chars().count(), SNIPPET_CHARS);
    }

    #[test]
    fn event_falls_back_to_received_date() {
        let event = IngestionEvent::new(&sample(), Category::Spam, "Account-1", "2026-10-18T00:00:00+00:00");
        assert_eq!(event.date, "2026-10-18T00:00:00+00:00");
        assert_eq!(event.account, "Account-1");
        assert_eq!(event.sender, "Ann <ann@example.com>");
    }

    #[test]
    fn record_uses_index_field_names() {
        let record = EmailRecord::new(&sample(), Category::Interested, "Account-2", "now");
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["messageId"], "<1@example.com>");
        assert_eq!(value["account"], "Account-2");
        assert_eq!(value["category"], "Interested");
        assert_eq!(value["attachments"][0]["contentType"], "application/pdf");
        assert_eq!(value["attachments"][0]["size"], 1024);
        assert!(value["labels"].as_array().unwrap().is_empty());
    }
}
