use std::time::Duration;

use bytes::Bytes;
use http::StatusCode;
use metrics::counter;

use super::InternalEvent;
use crate::buffers::ChunkId;

#[derive(Debug)]
pub struct SplunkEventEncodeError<'a> {
    pub tag: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl InternalEvent for SplunkEventEncodeError<'_> {
    fn emit(self) {
        error!(
            message = "Encountered encoding issues potentially due to non UTF-8 characters. \
                       To allow non-UTF-8 characters and replace them with spaces, \
                       set `coerce_to_utf8` to true.",
            tag = %self.tag,
            error = %self.error,
            error_type = "encoder_failed",
        );
        counter!(
            "component_errors_total",
            "error_type" => "encoder_failed",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkInvalidUtf8Replaced<'a> {
    pub tag: &'a str,
    pub count: usize,
}

impl InternalEvent for SplunkInvalidUtf8Replaced<'_> {
    fn emit(self) {
        debug!(
            message = "Replaced invalid UTF-8 sequences.",
            tag = %self.tag,
            count = self.count,
        );
        counter!(
            "splunk_invalid_utf8_replaced_total",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(self.count as u64);
    }
}

#[derive(Debug)]
pub struct SplunkEmptyEventDropped<'a> {
    pub tag: &'a str,
}

impl InternalEvent for SplunkEmptyEventDropped<'_> {
    fn emit(self) {
        warn!(
            message = "Event body is empty after formatting; dropping it.",
            tag = %self.tag,
        );
        counter!(
            "component_discarded_events_total",
            "intentional" => "true",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkResponseClientError<'a> {
    pub uri: &'a http::Uri,
    pub status: StatusCode,
    pub body: &'a Bytes,
}

impl InternalEvent for SplunkResponseClientError<'_> {
    fn emit(self) {
        error!(
            message = "Failed POST to Splunk HEC.",
            uri = %self.uri,
            status = %self.status,
            response = %String::from_utf8_lossy(self.body),
            error_type = "request_failed",
        );
        counter!(
            "component_errors_total",
            "error_type" => "request_failed",
            "status" => self.status.as_u16().to_string(),
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkResponseServerError<'a> {
    pub uri: &'a http::Uri,
    pub status: StatusCode,
    pub body: &'a Bytes,
}

impl InternalEvent for SplunkResponseServerError<'_> {
    fn emit(self) {
        warn!(
            message = "Server error for POST to Splunk HEC; chunk will be retried.",
            uri = %self.uri,
            status = %self.status,
            response = %String::from_utf8_lossy(self.body),
            error_type = "request_failed",
        );
        counter!(
            "component_errors_total",
            "error_type" => "server_error",
            "status" => self.status.as_u16().to_string(),
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkChunkSent<'a> {
    pub chunk_id: &'a ChunkId,
    pub byte_size: usize,
}

impl InternalEvent for SplunkChunkSent<'_> {
    fn emit(self) {
        debug!(
            message = "Sent chunk to Splunk.",
            chunk_id = %self.chunk_id,
            byte_size = self.byte_size,
        );
        counter!(
            "component_sent_bytes_total",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(self.byte_size as u64);
    }
}

#[derive(Debug)]
pub struct SplunkChunkCommitted<'a> {
    pub chunk_id: &'a ChunkId,
}

impl InternalEvent for SplunkChunkCommitted<'_> {
    fn emit(self) {
        trace!(message = "Committed chunk.", chunk_id = %self.chunk_id);
        counter!(
            "splunk_chunks_committed_total",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkAckRegistered<'a> {
    pub chunk_id: &'a ChunkId,
    pub ack_id: u64,
}

impl InternalEvent for SplunkAckRegistered<'_> {
    fn emit(self) {
        debug!(
            message = "Awaiting indexer acknowledgement.",
            chunk_id = %self.chunk_id,
            ack_id = self.ack_id,
        );
        counter!(
            "splunk_acks_registered_total",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkChunkAcknowledged<'a> {
    pub chunk_id: &'a ChunkId,
    pub ack_id: u64,
}

impl InternalEvent for SplunkChunkAcknowledged<'_> {
    fn emit(self) {
        debug!(
            message = "Chunk acknowledged by indexer.",
            chunk_id = %self.chunk_id,
            ack_id = self.ack_id,
        );
        counter!(
            "splunk_acks_confirmed_total",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkAckExpired<'a> {
    pub chunk_id: &'a ChunkId,
    pub ack_id: u64,
    pub age: Duration,
}

impl InternalEvent for SplunkAckExpired<'_> {
    fn emit(self) {
        warn!(
            message = "Indexer acknowledgement timed out; rolling back chunk.",
            chunk_id = %self.chunk_id,
            ack_id = self.ack_id,
            age_secs = self.age.as_secs_f64(),
        );
        counter!(
            "splunk_acks_expired_total",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkAckIdDisplaced<'a> {
    pub chunk_id: &'a ChunkId,
    pub ack_id: u64,
}

impl InternalEvent for SplunkAckIdDisplaced<'_> {
    fn emit(self) {
        error!(
            message = "Ack id reused while still pending; rolling back the older chunk.",
            chunk_id = %self.chunk_id,
            ack_id = self.ack_id,
        );
        counter!(
            "splunk_acks_displaced_total",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkAckQueryFailed<'a> {
    pub error: &'a dyn std::error::Error,
    pub pending: usize,
}

impl InternalEvent for SplunkAckQueryFailed<'_> {
    fn emit(self) {
        warn!(
            message = "Unable to check indexer acknowledgements; entries stay pending.",
            error = %self.error,
            pending = self.pending,
            error_type = "request_failed",
        );
        counter!(
            "component_errors_total",
            "error_type" => "ack_query_failed",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkResponseParseError<'a> {
    pub error: &'a serde_json::Error,
    pub endpoint: &'static str,
}

impl InternalEvent for SplunkResponseParseError<'_> {
    fn emit(self) {
        warn!(
            message = "Unable to parse Splunk HEC response.",
            endpoint = self.endpoint,
            error = %self.error,
            error_type = "parser_failed",
        );
        counter!(
            "component_errors_total",
            "error_type" => "parser_failed",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}

#[derive(Debug)]
pub struct SplunkIndexerAcknowledgementUnavailable<'a> {
    pub chunk_id: &'a ChunkId,
}

impl InternalEvent for SplunkIndexerAcknowledgementUnavailable<'_> {
    fn emit(self) {
        warn!(
            message = "Response carried no ackId; committing chunk without acknowledgement. \
                       Is indexer acknowledgement enabled on the HEC token?",
            chunk_id = %self.chunk_id,
            internal_log_rate_secs = 30,
        );
    }
}

#[derive(Debug)]
pub struct SplunkPendingAcksAbandoned {
    pub count: usize,
}

impl InternalEvent for SplunkPendingAcksAbandoned {
    fn emit(self) {
        if self.count > 0 {
            warn!(
                message = "Abandoning pending acknowledgements at shutdown; chunks may be redelivered.",
                count = self.count,
            );
        }
    }
}

#[derive(Debug)]
pub struct SplunkHealthcheckFailed<'a> {
    pub error: &'a dyn std::error::Error,
}

impl InternalEvent for SplunkHealthcheckFailed<'_> {
    fn emit(self) {
        warn!(message = "Splunk HEC healthcheck failed.", error = %self.error);
    }
}

#[derive(Debug)]
pub struct SplunkMetricFieldMissing {
    pub name_key: String,
    pub value_key: String,
}

impl InternalEvent for SplunkMetricFieldMissing {
    fn emit(self) {
        warn!(
            message = "Record is missing the metric name or value; dropping it.",
            metric_name_key = %self.name_key,
            metric_value_key = %self.value_key,
            internal_log_rate_secs = 30,
        );
        counter!(
            "component_discarded_events_total",
            "intentional" => "false",
            "component_kind" => "sink",
            "component_type" => "splunk_hec",
        )
        .increment(1);
    }
}
