use std::{sync::Arc, time::Duration};

use bytes::BytesMut;
use http::StatusCode;
use snafu::Snafu;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{
    acknowledgements::AckTracker,
    formatter::{EncodingError, HecFormatter},
    service::{ClassifiedResponse, HecService},
};
use crate::{
    buffers::{Chunk, ChunkAcker, ChunkId},
    event::Record,
    http::HttpError,
    internal_events::{
        SplunkChunkCommitted, SplunkChunkSent, SplunkHealthcheckFailed,
        SplunkIndexerAcknowledgementUnavailable,
    },
    sinks::Healthcheck,
};

/// Failures returned to the host buffer, which retries the whole chunk.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum DeliveryError {
    #[snafu(display("Splunk HEC responded with {}: {}", status, body))]
    RetryableResponse { status: StatusCode, body: String },
    #[snafu(display("Request to Splunk HEC failed: {}", source))]
    Request { source: HttpError },
}

impl DeliveryError {
    pub const fn status(&self) -> Option<StatusCode> {
        match self {
            DeliveryError::RetryableResponse { status, .. } => Some(*status),
            DeliveryError::Request { .. } => None,
        }
    }
}

/// Delivers chunks and decides their fate.
pub struct HecSink {
    service: HecService,
    acker: Arc<dyn ChunkAcker>,
    tracker: Option<Arc<AckTracker>>,
    ack_timeout: Duration,
}

impl HecSink {
    pub fn new(
        service: HecService,
        acker: Arc<dyn ChunkAcker>,
        tracker: Option<Arc<AckTracker>>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            service,
            acker,
            tracker,
            ack_timeout,
        }
    }

    /// Sends one chunk.
    ///
    /// On `Ok` the chunk has either been committed or handed to the ack
    /// tracker, which will commit or roll it back later. On `Err` nothing was
    /// committed and the host is expected to retry the chunk.
    pub async fn deliver(&self, chunk: &Chunk) -> Result<(), DeliveryError> {
        let response = self
            .service
            .send(chunk.body().clone())
            .await
            .map_err(|source| DeliveryError::Request { source })?;

        match response {
            ClassifiedResponse::Success { ack_id } => {
                emit!(SplunkChunkSent {
                    chunk_id: chunk.id(),
                    byte_size: chunk.len(),
                });
                match (&self.tracker, ack_id) {
                    (Some(tracker), Some(ack_id)) => {
                        tracker.register(*chunk.id(), ack_id, self.ack_timeout)
                    }
                    (Some(_), None) => {
                        emit!(SplunkIndexerAcknowledgementUnavailable {
                            chunk_id: chunk.id()
                        });
                        self.commit(chunk.id());
                    }
                    (None, _) => self.commit(chunk.id()),
                }
                Ok(())
            }
            // Already logged by the service; resending the same body cannot succeed.
            ClassifiedResponse::NonRetryable { .. } => {
                self.commit(chunk.id());
                Ok(())
            }
            ClassifiedResponse::Retryable { status, body } => RetryableResponseSnafu {
                status,
                body: String::from_utf8_lossy(&body),
            }
            .fail(),
        }
    }

    fn commit(&self, chunk_id: &ChunkId) {
        emit!(SplunkChunkCommitted { chunk_id });
        self.acker.commit(chunk_id);
    }
}

impl std::fmt::Debug for HecSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HecSink")
            .field("service", &self.service)
            .field("tracker", &self.tracker)
            .field("ack_timeout", &self.ack_timeout)
            .finish()
    }
}

/// A configured output: the formatter used at enqueue time, the delivery
/// entry point and the background acknowledgement task.
pub struct HecOutput {
    formatter: HecFormatter,
    sink: Arc<HecSink>,
    tracker: Option<Arc<AckTracker>>,
    healthcheck: Option<Healthcheck>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl HecOutput {
    pub(super) fn new(
        formatter: HecFormatter,
        sink: Arc<HecSink>,
        tracker: Option<Arc<AckTracker>>,
        healthcheck: Option<Healthcheck>,
    ) -> Self {
        Self {
            formatter,
            sink,
            tracker,
            healthcheck,
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    pub const fn formatter(&self) -> &HecFormatter {
        &self.formatter
    }

    /// Shared handle for concurrent delivery workers.
    pub fn sink(&self) -> Arc<HecSink> {
        Arc::clone(&self.sink)
    }

    pub fn tracker(&self) -> Option<&Arc<AckTracker>> {
        self.tracker.as_ref()
    }

    pub fn encode(&self, record: &Record, body: &mut BytesMut) -> Result<usize, EncodingError> {
        self.formatter.encode(record, body)
    }

    pub async fn deliver(&self, chunk: &Chunk) -> Result<(), DeliveryError> {
        self.sink.deliver(chunk).await
    }

    /// Runs the healthcheck, if configured, and starts acknowledgement
    /// polling. Must be called from within a Tokio runtime.
    pub async fn start(&mut self) {
        if let Some(healthcheck) = self.healthcheck.take() {
            if let Err(error) = healthcheck.await {
                emit!(SplunkHealthcheckFailed { error: &*error });
            }
        }

        if self.task.is_none() {
            if let Some(tracker) = &self.tracker {
                let run = Arc::clone(tracker).run(self.shutdown.clone());
                self.task = Some(tokio::spawn(run));
            }
        }
    }

    /// Stops acknowledgement polling. Entries still pending are abandoned;
    /// in-flight deliveries are not interrupted.
    pub async fn shutdown(&mut self) {
        self.shutdown.cancel();
        if let Some(task) = self.task.take() {
            if let Err(error) = task.await {
                error!(message = "Acknowledgement task failed.", %error);
            }
        }
    }
}

impl std::fmt::Debug for HecOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HecOutput")
            .field("formatter", &self.formatter)
            .field("sink", &self.sink)
            .field("healthcheck", &self.healthcheck.is_some())
            .field("running", &self.task.is_some())
            .finish()
    }
}
