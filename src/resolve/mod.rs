//! Record identity resolution.
//!
//! Turns a [`RawSnapshot`] into normalized [`Record`]s. The source has no
//! primary key, so which column(s) identify a record is configuration: see
//! [`IdentityRule`].
//!
//! Resolution fails as a whole only when the header is missing a required
//! column ([`SchemaMismatch`]). Individual rows without an identity are
//! returned as [`Rejected`] and the rest of the batch continues.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;
use tracing::warn;

use crate::source::RawSnapshot;
use crate::types::{Identity, Record};

pub mod normalize;

pub use normalize::{normalize_key, normalize_value};

/// Separator used between parts of a composite identity (ASCII unit separator).
const COMPOSITE_SEPARATOR: &str = "\u{1F}";

/// The header lacks one or more required columns.
///
/// This indicates a structural change upstream, so it aborts the whole pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("source is missing required columns: {}", .missing.join(", "))]
pub struct SchemaMismatch {
    /// Normalized names of every required column not found in the header.
    pub missing: Vec<String>,
}

/// How a record's identity is derived from its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityRule {
    /// A single column, used verbatim after trimming.
    Field(String),

    /// The first non-empty of several columns, checked in order.
    FirstNonEmpty(Vec<String>),

    /// All columns joined together. Empty if any part is empty.
    Composite(Vec<String>),
}

impl IdentityRule {
    /// Normalized names of the columns this rule reads.
    pub fn columns(&self) -> Vec<String> {
        match self {
            IdentityRule::Field(name) => vec![normalize_key(name)],
            IdentityRule::FirstNonEmpty(names) | IdentityRule::Composite(names) => {
                names.iter().map(|n| normalize_key(n)).collect()
            }
        }
    }

    /// Derives the identity from a row's normalized values.
    ///
    /// `value` looks up a normalized column name; absent columns read as empty.
    fn derive<'a>(&self, value: impl Fn(&str) -> &'a str) -> Option<Identity> {
        match self {
            IdentityRule::Field(name) => Identity::new(value(&normalize_key(name))),
            IdentityRule::FirstNonEmpty(names) => names
                .iter()
                .map(|n| value(&normalize_key(n)))
                .find(|v| !v.is_empty())
                .and_then(Identity::new),
            IdentityRule::Composite(names) => {
                let parts: Vec<&str> = names.iter().map(|n| value(&normalize_key(n))).collect();
                if parts.iter().any(|p| p.is_empty()) {
                    return None;
                }
                let joined = parts.join(COMPOSITE_SEPARATOR);
                Identity::new(joined)
            }
        }
    }
}

impl fmt::Display for IdentityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityRule::Field(name) => write!(f, "{name}"),
            IdentityRule::FirstNonEmpty(names) => write!(f, "first-non-empty({})", names.join(", ")),
            IdentityRule::Composite(names) => write!(f, "composite({})", names.join(", ")),
        }
    }
}

/// Why a row was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The identity column(s) were empty.
    EmptyIdentity,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::EmptyIdentity => write!(f, "empty identity"),
        }
    }
}

/// A row that produced no record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    /// Zero-based index of the data row (header excluded).
    pub row_index: usize,
    pub reason: RejectReason,
}

/// Result of resolving one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Accepted records in row order.
    pub records: Vec<Record>,
    /// Rejected rows in row order.
    pub rejected: Vec<Rejected>,
}

/// Resolves raw rows into records for a fixed set of columns.
#[derive(Debug, Clone)]
pub struct Resolver {
    /// Normalized expected field names, in output order.
    fields: Vec<String>,
    identity: IdentityRule,
}

impl Resolver {
    /// Creates a resolver for `expected_fields` with the given identity rule.
    ///
    /// Field names are normalized here, so callers may pass them as they
    /// appear in the sheet.
    pub fn new<S: AsRef<str>>(expected_fields: &[S], identity: IdentityRule) -> Self {
        let fields = expected_fields
            .iter()
            .map(|f| normalize_key(f.as_ref()))
            .collect();
        Resolver { fields, identity }
    }

    /// Normalized names of the fields each record carries.
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn identity_rule(&self) -> &IdentityRule {
        &self.identity
    }

    /// Every column that must be present in the header: expected fields
    /// followed by identity columns not already listed.
    fn required_columns(&self) -> Vec<String> {
        let mut required = self.fields.clone();
        for column in self.identity.columns() {
            if !required.contains(&column) {
                required.push(column);
            }
        }
        required
    }

    /// Maps each required column to its position in the header.
    ///
    /// If a normalized header name occurs twice, the first occurrence wins.
    fn column_positions(&self, headers: &[String]) -> Result<HashMap<String, usize>, SchemaMismatch> {
        let mut by_name: HashMap<String, usize> = HashMap::new();
        for (idx, header) in headers.iter().enumerate() {
            by_name.entry(normalize_key(header)).or_insert(idx);
        }

        let required = self.required_columns();
        let missing: Vec<String> = required
            .iter()
            .filter(|c| !by_name.contains_key(*c))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(SchemaMismatch { missing });
        }

        Ok(required
            .into_iter()
            .map(|c| {
                let idx = by_name[&c];
                (c, idx)
            })
            .collect())
    }

    /// Resolves a single row given the header positions of required columns.
    pub fn resolve_row(
        &self,
        positions: &HashMap<String, usize>,
        row_index: usize,
        row: &[String],
    ) -> Result<Record, Rejected> {
        let values: HashMap<&str, String> = positions
            .iter()
            .map(|(name, &idx)| {
                let raw = row.get(idx).map(String::as_str).unwrap_or("");
                (name.as_str(), normalize_value(raw))
            })
            .collect();
        let value = |name: &str| values.get(name).map(String::as_str).unwrap_or("");

        let identity = self.identity.derive(value).ok_or(Rejected {
            row_index,
            reason: RejectReason::EmptyIdentity,
        })?;

        let fields = self
            .fields
            .iter()
            .map(|name| (name.clone(), value(name).to_string()))
            .collect();

        Ok(Record::new(identity, fields))
    }

    /// Resolves a whole snapshot.
    ///
    /// Fails only if the header lacks required columns. Rejected rows are
    /// logged and collected; they never abort the batch.
    pub fn resolve(&self, snapshot: &RawSnapshot) -> Result<Resolution, SchemaMismatch> {
        let positions = self.column_positions(&snapshot.headers)?;

        let mut resolution = Resolution::default();
        for (row_index, row) in snapshot.rows.iter().enumerate() {
            match self.resolve_row(&positions, row_index, row) {
                Ok(record) => resolution.records.push(record),
                Err(rejected) => {
                    warn!(row = row_index, reason = %rejected.reason, "Rejected row");
                    resolution.rejected.push(rejected);
                }
            }
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn snapshot(headers: &[&str], rows: &[&[&str]]) -> RawSnapshot {
        RawSnapshot::new(
            headers.iter().map(|s| s.to_string()).collect(),
            rows.iter()
                .map(|r| r.iter().map(|s| s.to_string()).collect())
                .collect(),
        )
    }

    fn phone_resolver() -> Resolver {
        Resolver::new(&["phone", "name"], IdentityRule::Field("phone".into()))
    }

    #[test]
    fn resolves_rows_in_order() {
        let snap = snapshot(&["phone", "name"], &[&["111", "Ali"], &["222", "Vali"]]);
        let res = phone_resolver().resolve(&snap).unwrap();

        let ids: Vec<_> = res.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, ["111", "222"]);
        assert_eq!(res.records[0].fields.get("name"), Some("Ali"));
        assert!(res.rejected.is_empty());
    }

    #[test]
    fn header_matching_ignores_case_whitespace_and_bom() {
        let snap = snapshot(&["\u{feff} PHONE ", "Na\u{200b}me"], &[&["111", "Ali"]]);
        let res = phone_resolver().resolve(&snap).unwrap();
        assert_eq!(res.records.len(), 1);
        assert_eq!(res.records[0].fields.get("name"), Some("Ali"));
    }

    #[test]
    fn extra_columns_are_ignored_and_order_follows_config() {
        let snap = snapshot(&["name", "junk", "phone"], &[&["Ali", "x", "111"]]);
        let res = phone_resolver().resolve(&snap).unwrap();

        let names: Vec<_> = res.records[0].fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["phone", "name"]);
    }

    #[test]
    fn missing_columns_fail_fast_listing_all() {
        let snap = snapshot(&["other"], &[&["x"]]);
        let err = phone_resolver().resolve(&snap).unwrap_err();
        assert_eq!(err.missing, ["phone", "name"]);
        assert!(err.to_string().contains("phone, name"));
    }

    #[test]
    fn identity_column_outside_field_list_is_required() {
        let resolver = Resolver::new(&["name"], IdentityRule::Field("phone".into()));
        let err = resolver.resolve(&snapshot(&["name"], &[])).unwrap_err();
        assert_eq!(err.missing, ["phone"]);
    }

    #[test]
    fn empty_identity_rejects_row_and_continues() {
        let snap = snapshot(
            &["phone", "name"],
            &[&["111", "Ali"], &["   ", "Nobody"], &["333", "Hasan"]],
        );
        let res = phone_resolver().resolve(&snap).unwrap();

        assert_eq!(res.records.len(), 2);
        assert_eq!(
            res.rejected,
            [Rejected {
                row_index: 1,
                reason: RejectReason::EmptyIdentity
            }]
        );
    }

    #[test]
    fn short_rows_read_missing_cells_as_empty() {
        let snap = snapshot(&["phone", "name"], &[&["111"]]);
        let res = phone_resolver().resolve(&snap).unwrap();
        assert_eq!(res.records[0].fields.get("name"), Some(""));
    }

    #[test]
    fn identity_is_trimmed_value() {
        let snap = snapshot(&["phone", "name"], &[&["  +998 90 123 ", "Ali"]]);
        let res = phone_resolver().resolve(&snap).unwrap();
        assert_eq!(res.records[0].identity.as_str(), "+998 90 123");
    }

    #[test]
    fn first_non_empty_falls_back_to_second_column() {
        let resolver = Resolver::new(
            &["name", "phone_a", "phone_b"],
            IdentityRule::FirstNonEmpty(vec!["phone_a".into(), "phone_b".into()]),
        );
        let snap = snapshot(
            &["name", "phone_a", "phone_b"],
            &[&["Ali", "", "222"], &["Vali", "111", "999"], &["X", "", ""]],
        );
        let res = resolver.resolve(&snap).unwrap();

        let ids: Vec<_> = res.records.iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(ids, ["222", "111"]);
        assert_eq!(res.rejected.len(), 1);
    }

    #[test]
    fn composite_requires_every_part() {
        let resolver = Resolver::new(
            &["phone", "ad"],
            IdentityRule::Composite(vec!["phone".into(), "ad".into()]),
        );
        let snap = snapshot(&["phone", "ad"], &[&["111", "spring"], &["111", ""]]);
        let res = resolver.resolve(&snap).unwrap();

        assert_eq!(res.records.len(), 1);
        assert_eq!(res.records[0].identity.as_str(), "111\u{1f}spring");
        assert_eq!(res.rejected.len(), 1);
    }

    #[test]
    fn rule_display_is_readable() {
        let rule = IdentityRule::FirstNonEmpty(vec!["a".into(), "b".into()]);
        assert_eq!(rule.to_string(), "first-non-empty(a, b)");
    }

    proptest! {
        #[test]
        fn unrelated_field_changes_keep_identity(
            phone in "[0-9]{3,12}",
            name_a in "[A-Za-z]{1,10}",
            name_b in "[A-Za-z]{1,10}",
        ) {
            let resolver = phone_resolver();
            let a = resolver.resolve(&snapshot(&["phone", "name"], &[&[phone.as_str(), name_a.as_str()]])).unwrap();
            let b = resolver.resolve(&snapshot(&["phone", "name"], &[&[phone.as_str(), name_b.as_str()]])).unwrap();
            prop_assert_eq!(&a.records[0].identity, &b.records[0].identity);
        }

        #[test]
        fn every_row_is_either_record_or_rejected(
            rows in prop::collection::vec(("[0-9 ]{0,4}", "[a-z]{0,4}"), 0..20),
        ) {
            let raw_rows: Vec<Vec<String>> = rows.iter().map(|(p, n)| vec![p.clone(), n.clone()]).collect();
            let snap = RawSnapshot::new(vec!["phone".into(), "name".into()], raw_rows);
            let res = phone_resolver().resolve(&snap).unwrap();
            prop_assert_eq!(res.records.len() + res.rejected.len(), rows.len());
        }
    }
}
