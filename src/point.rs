//! Measurement data structures and InfluxDB line-protocol encoding

use crate::errors::{Result, SinkError};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use uuid::Uuid;

/// Scalar value of a point field, matching the InfluxDB 1.x field types.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
    Boolean(bool),
    String(String),
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

/// A single timestamped measurement with tags and fields, the unit of data
/// sent to the backend.
#[derive(Clone, Debug, PartialEq)]
pub struct Point {
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    pub fields: BTreeMap<String, FieldValue>,
    pub timestamp: DateTime<Utc>,
}

impl Point {
    /// Create a new point.
    ///
    /// The backend rejects points with an empty measurement name or no
    /// fields, so those are refused here before they reach the queue.
    pub fn new(
        measurement: impl Into<String>,
        tags: BTreeMap<String, String>,
        fields: BTreeMap<String, FieldValue>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let measurement = measurement.into();

        if measurement.is_empty() {
            return Err(SinkError::PointConstruction(
                "measurement name cannot be empty".to_string(),
            ));
        }

        if fields.is_empty() {
            return Err(SinkError::PointConstruction(
                "a point needs at least one field".to_string(),
            ));
        }

        Ok(Self {
            measurement,
            tags,
            fields,
            timestamp,
        })
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Timestamp in nanoseconds since the Unix epoch; saturates past 2262.
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }

    /// Encode this point as one line of InfluxDB 1.x line protocol.
    pub fn to_line_protocol(&self) -> String {
        let mut line = String::new();

        line.push_str(&escape_measurement(&self.measurement));

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&escape_tag(value));
        }

        line.push(' ');

        let mut first = true;
        for (key, value) in &self.fields {
            if !first {
                line.push(',');
            }
            first = false;
            line.push_str(&escape_tag(key));
            line.push('=');
            match value {
                FieldValue::Float(v) => {
                    let _ = write!(line, "{}", v);
                }
                FieldValue::Integer(v) => {
                    let _ = write!(line, "{}i", v);
                }
                FieldValue::Boolean(v) => {
                    let _ = write!(line, "{}", v);
                }
                FieldValue::String(v) => {
                    line.push('"');
                    line.push_str(&escape_string_field(v));
                    line.push('"');
                }
            }
        }

        let _ = write!(line, " {}", self.timestamp_nanos());
        line
    }
}

/// A group of points submitted to the backend in one write operation.
///
/// Batches are transient: assembled by the flush loop, sent once, discarded.
/// The id only exists so log lines about a batch can be correlated.
#[derive(Clone, Debug)]
pub struct Batch {
    pub points: Vec<Point>,
    pub batch_id: Uuid,
}

impl Batch {
    pub fn new(points: Vec<Point>) -> Self {
        Self {
            points,
            batch_id: Uuid::new_v4(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Encode the whole batch as a line-protocol request body.
    pub fn to_line_protocol(&self) -> String {
        let mut body = String::new();
        for point in &self.points {
            body.push_str(&point.to_line_protocol());
            body.push('\n');
        }
        body
    }
}

// Measurement names escape commas and spaces.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

// Tag keys, tag values and field keys escape commas, equals signs and spaces.
fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

// String field values are double-quoted; backslashes and quotes are escaped.
fn escape_string_field(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
