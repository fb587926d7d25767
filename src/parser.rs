//! Parsing of delimited log lines into measurement points

use crate::config::{FieldMapping, SinkConfig};
use crate::errors::{Result, SinkError};
use crate::point::{FieldValue, Point};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use std::collections::BTreeMap;

/// Layout every `ts` column must match, e.g. `2024-01-01 12:00:00.000`.
/// The fractional part accepts any number of digits.
const TIMESTAMP_LAYOUT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Immutable snapshot of everything a single `write` call needs to turn a
/// line into a [`Point`]. The sink swaps the whole snapshot atomically when a
/// setter is called, so a parse in flight never sees a half-updated mix.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub measurement: String,
    pub separator: String,
    pub field_mapping: FieldMapping,
    pub timezone: FixedOffset,
    pub additional_tags: BTreeMap<String, String>,
    pub additional_fields: BTreeMap<String, FieldValue>,
}

impl ParseOptions {
    pub fn from_config(config: &SinkConfig) -> Result<Self> {
        let timezone = FixedOffset::east_opt(config.utc_offset_secs).ok_or_else(|| {
            SinkError::Config(format!(
                "utc_offset_secs {} is out of range",
                config.utc_offset_secs
            ))
        })?;

        Ok(Self {
            measurement: config.measurement.clone(),
            separator: config.separator.clone(),
            field_mapping: config.field_mapping.clone(),
            timezone,
            additional_tags: BTreeMap::new(),
            additional_fields: BTreeMap::new(),
        })
    }
}

/// Parse a raw log line into a [`Point`].
///
/// The line is split on the configured separator and each mapped column is
/// cleaned up and interpreted per its classification. The highest mapped
/// column absorbs all trailing columns, rejoined with the separator, so a
/// free-text message is never truncated by separator occurrences inside it.
pub fn parse_line(line: &[u8], opts: &ParseOptions) -> Result<Point> {
    let text = String::from_utf8_lossy(line);
    let columns: Vec<&str> = text.split(opts.separator.as_str()).collect();

    if columns.len() < opts.field_mapping.len() {
        return Err(SinkError::TooFewColumns {
            expected: opts.field_mapping.len(),
            actual: columns.len(),
        });
    }

    // BTreeMap iteration is ascending, so the last key is the highest index.
    let last_index = opts
        .field_mapping
        .keys()
        .next_back()
        .copied()
        .unwrap_or_default();

    // A sparse mapping can point past the end even when the count check holds.
    if last_index >= columns.len() {
        return Err(SinkError::TooFewColumns {
            expected: last_index + 1,
            actual: columns.len(),
        });
    }

    let mut tags = opts.additional_tags.clone();
    let mut fields = opts.additional_fields.clone();
    let mut timestamp: Option<DateTime<Utc>> = None;

    for (&index, classification) in &opts.field_mapping {
        let raw = if index == last_index {
            columns[index..].join(&opts.separator)
        } else {
            columns
                .get(index)
                .ok_or(SinkError::TooFewColumns {
                    expected: index + 1,
                    actual: columns.len(),
                })?
                .to_string()
        };

        let content = clean_column(&raw);

        if classification == "ts" {
            timestamp = Some(parse_timestamp(&content, opts.timezone)?);
            continue;
        }

        match classification.split_once(':') {
            Some(("tag", name)) if !name.is_empty() && !name.contains(':') => {
                tags.insert(name.to_string(), content);
            }
            Some(("field", name)) if !name.is_empty() && !name.contains(':') => {
                fields.insert(name.to_string(), FieldValue::String(content));
            }
            _ => {
                return Err(SinkError::InvalidClassification(classification.clone()));
            }
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        SinkError::Config("field_mapping classifies no column as `ts`".to_string())
    })?;

    Point::new(opts.measurement.clone(), tags, fields, timestamp)
}

/// Per-column cleanup, in this fixed order: trim surrounding whitespace,
/// forward-slash every backslash, escape double quotes, strip one trailing
/// newline.
fn clean_column(raw: &str) -> String {
    let trimmed = raw.trim();
    let replaced = trimmed.replace('\\', "/").replace('"', "\\\"");
    match replaced.strip_suffix('\n') {
        Some(stripped) => stripped.to_string(),
        None => replaced,
    }
}

fn parse_timestamp(content: &str, timezone: FixedOffset) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(content, TIMESTAMP_LAYOUT)?;

    // Fixed offsets resolve every local time to exactly one instant.
    let local = timezone.from_local_datetime(&naive).earliest().ok_or_else(|| {
        SinkError::Config(format!(
            "timestamp `{}` is not representable in the configured offset",
            content
        ))
    })?;

    Ok(local.with_timezone(&Utc))
}
