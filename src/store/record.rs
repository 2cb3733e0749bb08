//! Saved response records and bundle formats

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Current export bundle format version
pub const EXPORT_VERSION: &str = "1.0";

/// Title used when the page exposes none.
pub const DEFAULT_TITLE: &str = "ChatGPT Conversation";

/// One saved assistant response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub text: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub context: RecordContext,
}

impl Record {
    /// New record stamped with a fresh id and the current time.
    pub fn new(text: impl Into<String>, url: impl Into<String>, context: RecordContext) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            timestamp: Utc::now(),
            url: url.into(),
            context,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn char_count(&self) -> usize {
        self.text.chars().count()
    }
}

/// Where a record came from.
///
/// Unknown keys from older records are preserved in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordContext {
    #[serde(default = "default_title")]
    pub title: String,
    /// 1-based position among assistant turns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl Default for RecordContext {
    fn default() -> Self {
        Self {
            title: default_title(),
            message_index: None,
            conversation_id: None,
            extra: Map::new(),
        }
    }
}

impl RecordContext {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_message_index(mut self, index: usize) -> Self {
        self.message_index = Some(index);
        self
    }

    pub fn with_conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }
}

/// Aggregate numbers over a store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_responses: usize,
    pub total_characters: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

impl StoreStats {
    pub fn from_records(records: &[Record]) -> Self {
        Self {
            total_responses: records.len(),
            total_characters: records.iter().map(Record::char_count).sum(),
            oldest: records.iter().map(|r| r.timestamp).min(),
            newest: records.iter().map(|r| r.timestamp).max(),
        }
    }
}

/// Portable dump of a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportBundle {
    pub version: String,
    #[serde(with = "timestamp")]
    pub export_date: DateTime<Utc>,
    pub total_responses: usize,
    pub responses: Vec<Record>,
}

impl ExportBundle {
    pub fn new(responses: Vec<Record>) -> Self {
        Self {
            version: EXPORT_VERSION.to_string(),
            export_date: Utc::now(),
            total_responses: responses.len(),
            responses,
        }
    }
}

/// Outcome of an import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    /// Records added by this import
    pub imported: usize,
    /// Records in the store afterwards
    pub total: usize,
}

/// Newest first; equal timestamps keep the later-saved record first.
pub(crate) fn newest_first<T>(entries: &mut [(u64, T)], timestamp: impl Fn(&T) -> DateTime<Utc>) {
    entries.sort_by(|(seq_a, a), (seq_b, b)| {
        timestamp(b)
            .cmp(&timestamp(a))
            .then_with(|| seq_b.cmp(seq_a))
    });
}

/// Canonical text form used on disk and in bundles.
pub(crate) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// RFC 3339 on the way out; RFC 3339 or epoch milliseconds on the way in.
pub(crate) mod timestamp {
    use super::*;
    use serde::de::Error as _;
    use serde::{Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Float(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => from_millis(ms),
            Raw::Float(ms) => from_millis(ms as i64),
            Raw::Text(text) => match DateTime::parse_from_rfc3339(&text) {
                Ok(ts) => Ok(ts.with_timezone(&Utc)),
                Err(e) => match text.trim().parse::<i64>() {
                    Ok(ms) => from_millis(ms),
                    Err(_) => Err(D::Error::custom(format!("invalid timestamp {:?}: {}", text, e))),
                },
            },
        }
    }

    fn from_millis<E: serde::de::Error>(ms: i64) -> Result<DateTime<Utc>, E> {
        Utc.timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| E::custom(format!("timestamp out of range: {}", ms)))
    }
}
