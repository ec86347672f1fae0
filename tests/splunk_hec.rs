use std::{collections::HashMap, sync::Arc};

use bytes::BytesMut;
use parking_lot::Mutex;
use serde_json::json;
use splunk_hec_output::{
    buffers::{Chunk, ChunkAcker, ChunkId},
    event::{EventTime, Record},
    sinks::splunk_hec::{DeliveryError, HecOutputConfig},
};
use wiremock::{
    matchers::{body_json, header_exists, method, path},
    Mock, MockServer, ResponseTemplate,
};

#[derive(Default)]
struct CountingAcker {
    commits: Mutex<HashMap<ChunkId, usize>>,
    rollbacks: Mutex<HashMap<ChunkId, usize>>,
}

impl CountingAcker {
    fn commits(&self, chunk_id: &ChunkId) -> usize {
        self.commits.lock().get(chunk_id).copied().unwrap_or(0)
    }

    fn rollbacks(&self, chunk_id: &ChunkId) -> usize {
        self.rollbacks.lock().get(chunk_id).copied().unwrap_or(0)
    }
}

impl ChunkAcker for CountingAcker {
    fn commit(&self, chunk_id: &ChunkId) {
        *self.commits.lock().entry(*chunk_id).or_default() += 1;
    }

    fn rollback(&self, chunk_id: &ChunkId) {
        *self.rollbacks.lock().entry(*chunk_id).or_default() += 1;
    }
}

fn config(server: &MockServer, extra: &str) -> HecOutputConfig {
    let address = server.address();
    toml::from_str(&format!(
        r#"
        protocol = "http"
        hec_host = "{}"
        hec_port = {}
        hec_token = "integration"
        host = "ingest-01"
        index = "${{tag_parts[0]}}"
        proxy = {{ enabled = false }}
        {extra}
        "#,
        address.ip(),
        address.port()
    ))
    .unwrap()
}

#[tokio::test]
async fn batches_records_into_one_request_and_confirms_with_acks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector"))
        .and(header_exists("X-Splunk-Request-Channel"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"text": "Success", "code": 0, "ackId": 6})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/services/collector/ack"))
        .and(body_json(json!({"acks": [6]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"acks": {"6": true}})))
        .expect(1)
        .mount(&server)
        .await;

    let acker = Arc::new(CountingAcker::default());
    let output = config(&server, "use_ack = true")
        .build(Arc::clone(&acker) as Arc<dyn ChunkAcker>)
        .unwrap();

    let mut body = BytesMut::new();
    for message in ["first", "second"] {
        let record = Record::from_json(
            "app.web",
            EventTime::new(1_700_000_000, 250_000_000),
            json!({ "message": message }),
        );
        output.encode(&record, &mut body).unwrap();
    }
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert_eq!(
        text,
        concat!(
            r#"{"time":"1700000000.250","host":"ingest-01","source":"app.web","index":"app","event":{"message":"first"}}"#,
            r#"{"time":"1700000000.250","host":"ingest-01","source":"app.web","index":"app","event":{"message":"second"}}"#,
        )
    );

    let chunk = Chunk::new(ChunkId::new(), body.freeze());
    output.deliver(&chunk).await.unwrap();
    assert_eq!(acker.commits(chunk.id()), 0);

    output.tracker().unwrap().reconcile().await;
    assert_eq!(acker.commits(chunk.id()), 1);
    assert_eq!(acker.rollbacks(chunk.id()), 0);
}

#[tokio::test]
async fn retryable_failures_leave_the_chunk_with_the_host() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/services/collector"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .mount(&server)
        .await;

    let acker = Arc::new(CountingAcker::default());
    let output = config(&server, "")
        .build(Arc::clone(&acker) as Arc<dyn ChunkAcker>)
        .unwrap();
    let chunk = Chunk::new(ChunkId::new(), r#"{"event":"x"}"#);

    let error = output.deliver(&chunk).await.unwrap_err();
    assert!(matches!(error, DeliveryError::RetryableResponse { .. }));
    assert_eq!(
        error.to_string(),
        "Splunk HEC responded with 500 Internal Server Error: internal error"
    );
    assert_eq!(acker.commits(chunk.id()), 0);
    assert_eq!(acker.rollbacks(chunk.id()), 0);
}

#[test]
fn metric_name_key_without_value_key_fails_at_setup() {
    let config: HecOutputConfig = toml::from_str(
        r#"
        hec_host = "localhost"
        hec_token = "token"
        data_type = "metric"
        metric_name_key = "from"
        "#,
    )
    .unwrap();
    let error = config
        .build(Arc::new(CountingAcker::default()))
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "`metric_name_key` is set but `metric_value_key` is not"
    );
}
