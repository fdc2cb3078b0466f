//! Pure filtering, sorting and owner grouping over metadata records.
//!
//! Nothing here performs I/O: callers fetch the full record list from the
//! record store and pass it in.

use crate::models::record::FileRecord;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("`{0}` is required for a date range query")]
    MissingBound(&'static str),
    #[error("`{field}` value `{value}` is not a valid date")]
    InvalidDate { field: &'static str, value: String },
}

/// Requested ordering or filtering of a record listing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortSpec {
    #[default]
    CreationDateAsc,
    CreationDateDesc,
    ModificationDateAsc,
    ModificationDateDesc,
    /// Keep records whose `creation_date` lies in `[start, end]`, order untouched.
    DateRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl SortSpec {
    /// Build a `SortSpec` from loosely typed request parameters.
    ///
    /// `sort_type` is matched by name (case and `_`/`-` insensitive) or by
    /// ordinal `0..=4`; anything else falls back to `CreationDateAsc`. Bounds
    /// are only read for `DateRange`, where both are required.
    pub fn from_params(
        sort_type: Option<&str>,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<Self, QueryError> {
        let normalized = sort_type
            .unwrap_or_default()
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();

        let spec = match normalized.as_str() {
            "creationdatedesc" | "1" => Self::CreationDateDesc,
            "modificationdateasc" | "2" => Self::ModificationDateAsc,
            "modificationdatedesc" | "3" => Self::ModificationDateDesc,
            "daterange" | "4" => {
                let start = start
                    .filter(|s| !s.trim().is_empty())
                    .ok_or(QueryError::MissingBound("start_date"))?;
                let end = end
                    .filter(|s| !s.trim().is_empty())
                    .ok_or(QueryError::MissingBound("end_date"))?;
                Self::DateRange {
                    start: parse_timestamp("start_date", start)?,
                    end: parse_timestamp("end_date", end)?,
                }
            }
            _ => Self::CreationDateAsc,
        };
        Ok(spec)
    }

    /// Sort or filter `records`.
    ///
    /// Sorts are stable, so records with equal keys keep their input order.
    pub fn apply(&self, mut records: Vec<FileRecord>) -> Vec<FileRecord> {
        match *self {
            Self::CreationDateAsc => {
                records.sort_by(|a, b| a.creation_date.cmp(&b.creation_date))
            }
            Self::CreationDateDesc => {
                records.sort_by(|a, b| b.creation_date.cmp(&a.creation_date))
            }
            Self::ModificationDateAsc => {
                records.sort_by(|a, b| a.modification_date.cmp(&b.modification_date))
            }
            Self::ModificationDateDesc => {
                records.sort_by(|a, b| b.modification_date.cmp(&a.modification_date))
            }
            Self::DateRange { start, end } => {
                records.retain(|r| start <= r.creation_date && r.creation_date <= end)
            }
        }
        records
    }
}

/// Keep the records owned by one of `owners`, group them by owner and apply
/// `spec` within each group.
///
/// Groups are emitted in the order their owner first appears in `records`.
/// Owners with no records contribute nothing.
pub fn group_by_owners(
    records: Vec<FileRecord>,
    owners: &[String],
    spec: &SortSpec,
) -> Vec<FileRecord> {
    let mut groups: Vec<Vec<FileRecord>> = Vec::new();
    let mut slot_by_owner: HashMap<String, usize> = HashMap::new();

    for record in records {
        if !owners.iter().any(|o| *o == record.owner) {
            continue;
        }
        let slot = *slot_by_owner
            .entry(record.owner.clone())
            .or_insert_with(|| {
                groups.push(Vec::new());
                groups.len() - 1
            });
        groups[slot].push(record);
    }

    groups
        .into_iter()
        .flat_map(|group| spec.apply(group))
        .collect()
}

/// Split a comma-separated owner list, trimming entries and dropping blanks.
pub fn parse_owner_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse an RFC 3339 timestamp, a naive date-time (taken as UTC) or a bare date
/// (midnight UTC).
pub fn parse_timestamp(field: &'static str, value: &str) -> Result<DateTime<Utc>, QueryError> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(midnight) = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc());
    }
    Err(QueryError::InvalidDate {
        field,
        value: value.to_string(),
    })
}
