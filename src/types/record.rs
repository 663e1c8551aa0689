//! Records and their persisted delivery state.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::Identity;

/// A single named attribute of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub value: String,
}

/// Ordered attributes of a record, keyed by normalized column name.
///
/// Order follows the configured column list, which is also the order the
/// message template renders them in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(Vec<Field>);

impl Fields {
    pub fn new() -> Self {
        Fields(Vec::new())
    }

    /// Appends a field. A later field with the same name shadows nothing:
    /// lookups return the first match.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push(Field {
            name: name.into(),
            value: value.into(),
        });
    }

    /// Returns the value of the named field, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Field> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<N: Into<String>, V: Into<String>> FromIterator<(N, V)> for Fields {
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        let mut fields = Fields::new();
        for (name, value) in iter {
            fields.push(name, value);
        }
        fields
    }
}

/// One logical entity from a source snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub identity: Identity,
    pub fields: Fields,
}

impl Record {
    pub fn new(identity: Identity, fields: Fields) -> Self {
        Record { identity, fields }
    }
}

/// Delivery status of a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Observed but not yet confirmed delivered.
    Pending,
    /// Every chunk of the record's message was acknowledged by the channel.
    Sent,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Sent => write!(f, "sent"),
        }
    }
}

/// The persisted state of one identity.
///
/// `fields` are the values from the first snapshot the identity was seen in;
/// later edits to the source row never overwrite them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub identity: Identity,
    pub fields: Fields,
    pub status: DeliveryStatus,

    /// Store-wide sequence number of the observation that created this record.
    /// Pending records are re-delivered in ascending `seq` order.
    pub seq: u64,

    pub observed_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
}

impl DeliveryRecord {
    /// Creates a freshly observed, pending record.
    pub fn observed(identity: Identity, fields: Fields, seq: u64, at: DateTime<Utc>) -> Self {
        DeliveryRecord {
            identity,
            fields,
            status: DeliveryStatus::Pending,
            seq,
            observed_at: at,
            sent_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == DeliveryStatus::Pending
    }

    /// The record as it should be delivered: stored identity and stored fields.
    pub fn to_record(&self) -> Record {
        Record::new(self.identity.clone(), self.fields.clone())
    }
}
