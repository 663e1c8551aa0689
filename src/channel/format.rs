//! Message rendering and chunking.

use crate::resolve::normalize_key;
use crate::types::Record;

/// Telegram's per-message limit. Telegram counts UTF-16 code units, so an
/// emoji outside the Basic Multilingual Plane uses two.
pub const MAX_CHUNK_CHARS: usize = 4096;

pub const DEFAULT_HEADER: &str = "📊 Yangi ma'lumot:";

/// Display labels for the default sheet columns.
const DEFAULT_LABELS: &[(&str, &str)] = &[
    ("ismingiz?", "👤 Ism"),
    ("telefon_raqamingiz?", "📞 Telefon"),
    ("номер_телефона", "📱 Номер телефона"),
    ("xodimlar_soni?", "👥 Xodimlar soni"),
    ("adset_name", "📌 Adset"),
    ("ad_name", "📢 Reklama"),
];

/// One labelled line of a rendered message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLine {
    /// Normalized field name to look up in the record.
    pub field: String,
    pub label: String,
}

/// Fixed message layout: a header line, then `label: value` per field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    header: String,
    lines: Vec<FieldLine>,
}

impl MessageTemplate {
    pub fn new(header: impl Into<String>, lines: Vec<FieldLine>) -> Self {
        MessageTemplate {
            header: header.into(),
            lines,
        }
    }

    /// Template listing `columns` in order, using the built-in label for
    /// known columns and the column name itself otherwise.
    pub fn for_columns<S: AsRef<str>>(columns: &[S]) -> Self {
        let lines = columns
            .iter()
            .map(|column| {
                let field = normalize_key(column.as_ref());
                let label = DEFAULT_LABELS
                    .iter()
                    .find(|(name, _)| *name == field)
                    .map(|(_, label)| (*label).to_string())
                    .unwrap_or_else(|| column.as_ref().trim().to_string());
                FieldLine { field, label }
            })
            .collect();
        Self::new(DEFAULT_HEADER, lines)
    }

    /// Renders a record. A field the record lacks renders as empty.
    pub fn render(&self, record: &Record) -> String {
        let mut text = self.header.clone();
        for line in &self.lines {
            let value = record.fields.get(&line.field).unwrap_or("");
            text.push('\n');
            text.push_str(&line.label);
            text.push_str(": ");
            text.push_str(value);
        }
        text
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        let columns: Vec<&str> = DEFAULT_LABELS.iter().map(|(name, _)| *name).collect();
        Self::for_columns(&columns)
    }
}

/// Splits `text` into pieces of at most `max_units` UTF-16 code units.
///
/// Splits only on `char` boundaries, so every chunk is valid UTF-8 and the
/// chunks concatenate back to `text`. A single character wider than
/// `max_units` gets a chunk of its own. An empty `text` yields one empty chunk.
pub fn split_into_chunks(text: &str, max_units: usize) -> Vec<&str> {
    let max_units = max_units.max(1);
    let mut chunks = Vec::new();
    let mut start = 0;
    let mut units = 0;

    for (idx, c) in text.char_indices() {
        let width = c.len_utf16();
        if units > 0 && units + width > max_units {
            chunks.push(&text[start..idx]);
            start = idx;
            units = 0;
        }
        units += width;
    }

    if start < text.len() || chunks.is_empty() {
        chunks.push(&text[start..]);
    }
    chunks
}
