//! Splunk HTTP Event Collector output.

pub mod acknowledgements;
pub mod common;
pub mod config;
pub mod formatter;
pub mod service;
pub mod sink;


pub use acknowledgements::{AckTracker, Reconciled};
pub use config::{ConfigurationError, DataType, HecOutputConfig, Protocol};
pub use formatter::{EncodingError, HecFormatter, MetadataField, Payload};
pub use service::{AckQueryError, ClassifiedResponse, HecService};
pub use sink::{DeliveryError, HecOutput, HecSink};
