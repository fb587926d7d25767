//! Asynchronous log-shipping sink for InfluxDB 1.x
//!
//! This library turns delimiter-separated application log lines into tagged,
//! multi-field measurement points and ships them to an InfluxDB backend in
//! batches, without ever blocking the logging call site on network I/O.

pub mod config;
pub mod errors;
pub mod parser;
pub mod point;
pub mod queue;
pub mod sink;
pub mod transport;

mod flusher;

pub use config::{default_field_mapping, FieldMapping, SinkConfig};
pub use errors::{Result, SinkError};
pub use point::{Batch, FieldValue, Point};
pub use sink::InfluxLogSink;
pub use transport::{HttpTransport, PointWriter};
