use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use super::common::HttpRequestBuilder;
use crate::{
    http::{CallRequestSnafu, HttpClient, HttpError},
    internal_events::{SplunkResponseClientError, SplunkResponseParseError, SplunkResponseServerError},
};

/// Outcome of one ingest POST, bucketed by status class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedResponse {
    /// 2xx. `ack_id` is only read when indexer acknowledgement is in use.
    Success { ack_id: Option<u64> },
    /// The data will never be accepted; retrying is futile.
    NonRetryable { status: StatusCode, body: Bytes },
    /// The server is unhealthy; the chunk must be sent again later.
    Retryable { status: StatusCode, body: Bytes },
}

#[derive(Deserialize, Serialize, Debug)]
pub(super) struct HecAckResponseBody {
    #[serde(rename = "ackId", default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug)]
pub(super) struct HecAckStatusRequest {
    pub acks: Vec<u64>,
}

#[derive(Deserialize, Serialize, Debug)]
pub(super) struct HecAckStatusResponse {
    pub acks: HashMap<u64, bool>,
}

#[derive(Debug, Snafu)]
pub enum AckQueryError {
    #[snafu(display("Failed to encode ack query: {}", source))]
    EncodeQuery { source: serde_json::Error },
    #[snafu(display("Ack query request failed: {}", source))]
    QueryRequest { source: HttpError },
    #[snafu(display("Ack query failed with status {}: {}", status, body))]
    QueryStatus { status: StatusCode, body: String },
    #[snafu(display("Unable to parse ack query response: {}", source))]
    QueryParse { source: serde_json::Error },
}

/// Sends chunks and ack queries over the shared client.
#[derive(Debug, Clone)]
pub struct HecService {
    client: HttpClient,
    request_builder: Arc<HttpRequestBuilder>,
    use_ack: bool,
    retry_on_client_error: bool,
}

impl HecService {
    pub const fn new(
        client: HttpClient,
        request_builder: Arc<HttpRequestBuilder>,
        use_ack: bool,
        retry_on_client_error: bool,
    ) -> Self {
        Self {
            client,
            request_builder,
            use_ack,
            retry_on_client_error,
        }
    }

    /// POSTs one chunk body. Network failures are errors; every HTTP status
    /// is a classified response.
    pub async fn send(&self, body: Bytes) -> Result<ClassifiedResponse, HttpError> {
        let request = self.request_builder.build_request(body);
        let response = self.client.send(request).await?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .context(CallRequestSnafu)?;
        Ok(self.classify(status, body))
    }

    fn classify(&self, status: StatusCode, body: Bytes) -> ClassifiedResponse {
        let uri = self.request_builder.ingest_uri();
        if status.is_success() {
            let ack_id = if self.use_ack { parse_ack_id(&body) } else { None };
            ClassifiedResponse::Success { ack_id }
        } else if status.is_server_error() {
            emit!(SplunkResponseServerError {
                uri,
                status,
                body: &body
            });
            ClassifiedResponse::Retryable { status, body }
        } else {
            emit!(SplunkResponseClientError {
                uri,
                status,
                body: &body
            });
            if self.retry_on_client_error && status.is_client_error() {
                ClassifiedResponse::Retryable { status, body }
            } else {
                ClassifiedResponse::NonRetryable { status, body }
            }
        }
    }

    /// Asks the server which of `ack_ids` have been indexed. Ids missing from
    /// the answer are reported as not yet indexed.
    pub async fn query_acks(&self, ack_ids: &[u64]) -> Result<HashMap<u64, bool>, AckQueryError> {
        let query = serde_json::to_vec(&HecAckStatusRequest {
            acks: ack_ids.to_vec(),
        })
        .context(EncodeQuerySnafu)?;
        let request = self.request_builder.build_ack_request(query);

        let response = self.client.send(request).await.context(QueryRequestSnafu)?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .context(CallRequestSnafu)
            .context(QueryRequestSnafu)?;
        if !status.is_success() {
            return QueryStatusSnafu {
                status,
                body: String::from_utf8_lossy(&body),
            }
            .fail();
        }

        let response = serde_json::from_slice::<HecAckStatusResponse>(&body)
            .inspect_err(|error| {
                emit!(SplunkResponseParseError {
                    error,
                    endpoint: "ack"
                })
            })
            .context(QueryParseSnafu)?;
        Ok(ack_ids
            .iter()
            .map(|ack_id| (*ack_id, response.acks.get(ack_id).copied().unwrap_or(false)))
            .collect())
    }
}

// A body without `ackId` means acknowledgement is disabled for the token.
fn parse_ack_id(body: &Bytes) -> Option<u64> {
    match serde_json::from_slice::<HecAckResponseBody>(body) {
        Ok(response) => response.ack_id,
        Err(error) => {
            emit!(SplunkResponseParseError {
                error: &error,
                endpoint: "event"
            });
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::{
        matchers::{body_json, header, header_exists, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{
        config::ProxyConfig,
        http::Timeouts,
        sinks::splunk_hec::common::{ACK_PATH, INGEST_PATH},
        tls::TlsSettings,
    };

    fn service(endpoint: &str, use_ack: bool, retry_on_client_error: bool) -> HecService {
        let proxy = ProxyConfig {
            enabled: false,
            ..Default::default()
        };
        let client = HttpClient::new(&TlsSettings::default(), &proxy, Timeouts::default()).unwrap();
        let channel = use_ack.then(Uuid::new_v4);
        let request_builder = HttpRequestBuilder::new(endpoint, "token", channel).unwrap();
        HecService::new(client, Arc::new(request_builder), use_ack, retry_on_client_error)
    }

    async fn ingest_server(response: ResponseTemplate) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(INGEST_PATH))
            .and(header("Authorization", "Splunk token"))
            .and(header("Content-Type", "application/json"))
            .respond_with(response)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn success_without_acks_ignores_ack_id() {
        let server =
            ingest_server(ResponseTemplate::new(200).set_body_json(json!({"text": "Success", "code": 0, "ackId": 3}))).await;
        let response = service(&server.uri(), false, false)
            .send(Bytes::from_static(b"{\"event\":\"x\"}"))
            .await
            .unwrap();
        assert_eq!(response, ClassifiedResponse::Success { ack_id: None });
    }

    #[tokio::test]
    async fn success_with_acks_extracts_ack_id() {
        let server =
            ingest_server(ResponseTemplate::new(200).set_body_json(json!({"text": "Success", "code": 0, "ackId": 6}))).await;
        let response = service(&server.uri(), true, false)
            .send(Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(response, ClassifiedResponse::Success { ack_id: Some(6) });
    }

    #[tokio::test]
    async fn unparseable_success_body_has_no_ack_id() {
        let server = ingest_server(ResponseTemplate::new(200).set_body_string("not json")).await;
        let response = service(&server.uri(), true, false)
            .send(Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(response, ClassifiedResponse::Success { ack_id: None });
    }

    #[tokio::test]
    async fn client_errors_are_not_retryable() {
        let server = ingest_server(ResponseTemplate::new(400).set_body_string("Invalid data format")).await;
        let response = service(&server.uri(), false, false)
            .send(Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(
            response,
            ClassifiedResponse::NonRetryable {
                status: StatusCode::BAD_REQUEST,
                body: Bytes::from_static(b"Invalid data format"),
            }
        );
    }

    #[tokio::test]
    async fn client_errors_can_be_retried() {
        let server = ingest_server(ResponseTemplate::new(403)).await;
        let response = service(&server.uri(), false, true)
            .send(Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(matches!(response, ClassifiedResponse::Retryable { status, .. } if status == StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn server_errors_are_retryable() {
        let server = ingest_server(ResponseTemplate::new(503).set_body_string("busy")).await;
        let response = service(&server.uri(), true, false)
            .send(Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(matches!(response, ClassifiedResponse::Retryable { status, .. } if status == StatusCode::SERVICE_UNAVAILABLE));
    }

    #[tokio::test]
    async fn redirects_are_not_retryable() {
        let server = ingest_server(ResponseTemplate::new(302)).await;
        let response = service(&server.uri(), false, true)
            .send(Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(matches!(response, ClassifiedResponse::NonRetryable { .. }));
    }

    #[tokio::test]
    async fn connection_failure_is_an_error() {
        let uri = format!("http://{}", crate::test_util::closed_addr());
        assert!(service(&uri, false, false).send(Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn ack_query_batches_ids_and_defaults_missing_to_false() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ACK_PATH))
            .and(header_exists("X-Splunk-Request-Channel"))
            .and(body_json(json!({"acks": [1, 2, 3]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acks": {"1": true, "2": false}})))
            .expect(1)
            .mount(&server)
            .await;

        let statuses = service(&server.uri(), true, false)
            .query_acks(&[1, 2, 3])
            .await
            .unwrap();
        assert_eq!(statuses, HashMap::from([(1, true), (2, false), (3, false)]));
    }

    #[tokio::test]
    async fn ack_query_failures_are_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(ACK_PATH))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(ACK_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"unexpected\": 1}"))
            .mount(&server)
            .await;

        let service = service(&server.uri(), true, false);
        assert!(matches!(
            service.query_acks(&[1]).await,
            Err(AckQueryError::QueryStatus { .. })
        ));
        assert!(matches!(
            service.query_acks(&[1]).await,
            Err(AckQueryError::QueryParse { .. })
        ));
    }
}
