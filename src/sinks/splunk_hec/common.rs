use bytes::Bytes;
use http::{
    header::{HeaderValue, InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE},
    uri::InvalidUri,
    Method, Request, StatusCode, Uri,
};
use hyper::Body;
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use uuid::Uuid;

use crate::{http::HttpClient, sinks::HealthcheckError};

pub const INGEST_PATH: &str = "/services/collector";
pub const ACK_PATH: &str = "/services/collector/ack";
pub const HEALTH_PATH: &str = "/services/collector/health/1.0";

const CHANNEL_HEADER: &str = "X-Splunk-Request-Channel";

#[derive(Debug, Snafu)]
pub enum EndpointError {
    #[snafu(display("URI parse error: {}", source))]
    UriParse { source: InvalidUri },
    #[snafu(display("HEC token is not a valid header value: {}", source))]
    InvalidToken { source: InvalidHeaderValue },
}

#[derive(Debug, Snafu)]
enum HecHealthcheckError {
    #[snafu(display("Invalid HEC token"))]
    BadToken,
    #[snafu(display("Queues are full"))]
    QueuesFull,
}

pub fn build_uri(endpoint: &str, path: &str) -> Result<Uri, InvalidUri> {
    format!("{}{}", endpoint.trim_end_matches('/'), path).parse::<Uri>()
}

/// Builds every request sent to one HEC endpoint.
#[derive(Debug, Clone)]
pub struct HttpRequestBuilder {
    ingest_uri: Uri,
    ack_uri: Uri,
    health_uri: Uri,
    authorization: HeaderValue,
    // A Splunk channel must be a GUID/UUID formatted value.
    channel: Option<HeaderValue>,
}

impl HttpRequestBuilder {
    pub fn new(endpoint: &str, token: &str, channel: Option<Uuid>) -> Result<Self, EndpointError> {
        let mut authorization =
            HeaderValue::from_str(&format!("Splunk {token}")).context(InvalidTokenSnafu)?;
        authorization.set_sensitive(true);

        Ok(Self {
            ingest_uri: build_uri(endpoint, INGEST_PATH).context(UriParseSnafu)?,
            ack_uri: build_uri(endpoint, ACK_PATH).context(UriParseSnafu)?,
            health_uri: build_uri(endpoint, HEALTH_PATH).context(UriParseSnafu)?,
            authorization,
            channel: channel
                .and_then(|channel| HeaderValue::from_str(&channel.hyphenated().to_string()).ok()),
        })
    }

    pub const fn ingest_uri(&self) -> &Uri {
        &self.ingest_uri
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_ref().and_then(|value| value.to_str().ok())
    }

    pub fn build_request(&self, body: Bytes) -> Request<Body> {
        self.post(self.ingest_uri.clone(), Body::from(body))
    }

    pub fn build_ack_request(&self, body: Vec<u8>) -> Request<Body> {
        self.post(self.ack_uri.clone(), Body::from(body))
    }

    pub fn build_healthcheck_request(&self) -> Request<Body> {
        let mut request = Request::new(Body::empty());
        *request.uri_mut() = self.health_uri.clone();
        request
            .headers_mut()
            .insert(AUTHORIZATION, self.authorization.clone());
        request
    }

    fn post(&self, uri: Uri, body: Body) -> Request<Body> {
        let mut request = Request::new(body);
        *request.method_mut() = Method::POST;
        *request.uri_mut() = uri;
        let headers = request.headers_mut();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, self.authorization.clone());
        if let Some(channel) = &self.channel {
            headers.insert(CHANNEL_HEADER, channel.clone());
        }
        request
    }
}

pub async fn build_healthcheck(
    client: HttpClient,
    request_builder: Arc<HttpRequestBuilder>,
) -> crate::Result<()> {
    let request = request_builder.build_healthcheck_request();
    let response = client.send(request).await?;
    match response.status() {
        StatusCode::OK => Ok(()),
        StatusCode::BAD_REQUEST => Err(HecHealthcheckError::BadToken.into()),
        StatusCode::SERVICE_UNAVAILABLE => Err(HecHealthcheckError::QueuesFull.into()),
        other => Err(HealthcheckError::UnexpectedStatus { status: other }.into()),
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{header, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;
    use crate::{config::ProxyConfig, http::Timeouts, tls::TlsSettings};

    fn client() -> HttpClient {
        let proxy = ProxyConfig {
            enabled: false,
            ..Default::default()
        };
        HttpClient::new(&TlsSettings::default(), &proxy, Timeouts::default()).unwrap()
    }

    async fn healthcheck_with_status(status: u16) -> crate::Result<()> {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(HEALTH_PATH))
            .and(header("Authorization", "Splunk token"))
            .respond_with(ResponseTemplate::new(status))
            .mount(&mock_server)
            .await;

        let request_builder = HttpRequestBuilder::new(&mock_server.uri(), "token", None).unwrap();
        build_healthcheck(client(), Arc::new(request_builder)).await
    }

    #[tokio::test]
    async fn healthcheck_200_response_returns_ok() {
        assert!(healthcheck_with_status(200).await.is_ok());
    }

    #[tokio::test]
    async fn healthcheck_400_response_returns_error() {
        assert_eq!(
            healthcheck_with_status(400).await.unwrap_err().to_string(),
            "Invalid HEC token"
        );
    }

    #[tokio::test]
    async fn healthcheck_503_response_returns_error() {
        assert_eq!(
            healthcheck_with_status(503).await.unwrap_err().to_string(),
            "Queues are full"
        );
    }

    #[tokio::test]
    async fn healthcheck_500_response_returns_error() {
        assert_eq!(
            healthcheck_with_status(500).await.unwrap_err().to_string(),
            "Unexpected status: 500 Internal Server Error"
        );
    }

    #[test]
    fn build_uri_joins_paths() {
        let uri = build_uri("https://splunk.example.com:8088/", INGEST_PATH).unwrap();
        assert_eq!(uri.to_string(), "https://splunk.example.com:8088/services/collector");
    }

    #[test]
    fn requests_carry_token_and_channel() {
        let channel = Uuid::new_v4();
        let builder = HttpRequestBuilder::new("http://localhost:8088", "abc", Some(channel)).unwrap();

        let request = builder.build_request(Bytes::from_static(b"{}"));
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.uri().path(), INGEST_PATH);
        assert_eq!(request.headers()["Authorization"], "Splunk abc");
        assert_eq!(request.headers()["Content-Type"], "application/json");
        assert_eq!(
            request.headers()[CHANNEL_HEADER],
            channel.hyphenated().to_string().as_str()
        );

        let request = builder.build_ack_request(b"{\"acks\":[1]}".to_vec());
        assert_eq!(request.uri().path(), ACK_PATH);
        assert!(request.headers().contains_key(CHANNEL_HEADER));
    }

    #[test]
    fn channel_is_omitted_without_acks() {
        let builder = HttpRequestBuilder::new("http://localhost:8088", "abc", None).unwrap();
        let request = builder.build_request(Bytes::new());
        assert!(!request.headers().contains_key(CHANNEL_HEADER));
        assert_eq!(builder.channel(), None);
    }

    #[test]
    fn invalid_token_is_rejected() {
        assert!(matches!(
            HttpRequestBuilder::new("http://localhost:8088", "bad\ntoken", None),
            Err(EndpointError::InvalidToken { .. })
        ));
    }
}
