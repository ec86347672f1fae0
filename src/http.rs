use std::{
    fmt,
    time::{Duration, Instant},
};

use futures::future::BoxFuture;
use http::{header::HeaderValue, Request};
use hyper::{
    body::Body,
    client::{Client, HttpConnector},
};
use hyper_openssl::HttpsConnector;
use hyper_proxy::ProxyConnector;
use snafu::{ResultExt, Snafu};
use tracing::Span;
use tracing_futures::Instrument;

use crate::{
    config::ProxyConfig,
    internal_events::{AboutToSendHttpRequest, GotHttpResponse, GotHttpWarning, HttpRequestTimedOut},
    tls::{tls_connector_builder, TlsError, TlsSettings},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HttpError {
    #[snafu(display("Failed to build TLS connector: {}", source))]
    BuildTlsConnector { source: TlsError },
    #[snafu(display("Failed to build HTTPS connector: {}", source))]
    MakeHttpsConnector { source: openssl::error::ErrorStack },
    #[snafu(display("Failed to build proxy connector: {}", source))]
    MakeProxyConnector { source: std::io::Error },
    #[snafu(display("Invalid proxy URI: {}", source))]
    ConfigureProxy { source: http::uri::InvalidUri },
    #[snafu(display("Failed to make HTTP(S) request: {}", source))]
    CallRequest { source: hyper::Error },
    #[snafu(display("Request timed out after {:?}", timeout))]
    Timeout { timeout: Duration },
}

/// Connection timeouts. `None` leaves the transport default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeouts {
    /// Time allowed to establish the TCP connection.
    pub open: Option<Duration>,
    /// Time allowed between sending a request and receiving the response head.
    pub read: Option<Duration>,
    /// How long an unused pooled connection is kept.
    pub idle: Option<Duration>,
}

type Connector = ProxyConnector<HttpsConnector<HttpConnector>>;

/// A pooled HTTP(S) client, built once and shared by every request.
pub struct HttpClient {
    client: Client<Connector, Body>,
    span: Span,
    user_agent: HeaderValue,
    read_timeout: Option<Duration>,
}

impl HttpClient {
    pub fn new(
        tls_settings: &TlsSettings,
        proxy_config: &ProxyConfig,
        timeouts: Timeouts,
    ) -> Result<Self, HttpError> {
        let proxy = build_proxy_connector(tls_settings, proxy_config, timeouts.open)?;

        let mut builder = Client::builder();
        if let Some(idle) = timeouts.idle {
            builder.pool_idle_timeout(idle);
        }
        let client = builder.build(proxy);

        let user_agent = HeaderValue::from_str(&format!(
            "splunk-hec-output/{}",
            crate::get_version()
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("splunk-hec-output"));

        Ok(Self {
            client,
            span: info_span!("http"),
            user_agent,
            read_timeout: timeouts.read,
        })
    }

    pub fn send(
        &self,
        mut request: Request<Body>,
    ) -> BoxFuture<'static, Result<http::Response<Body>, HttpError>> {
        let _enter = self.span.enter();

        default_request_headers(&mut request, &self.user_agent);

        emit!(AboutToSendHttpRequest { request: &request });

        let response = self.client.request(request);
        let read_timeout = self.read_timeout;

        let fut = async move {
            // The request is not issued until the future is first polled.
            let before = Instant::now();

            let response_result = match read_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, response).await {
                    Ok(result) => result,
                    Err(_) => {
                        emit!(HttpRequestTimedOut { timeout });
                        return TimeoutSnafu { timeout }.fail();
                    }
                },
                None => response.await,
            };

            let roundtrip = before.elapsed();

            let response = response_result
                .inspect_err(|error| emit!(GotHttpWarning { error, roundtrip }))
                .context(CallRequestSnafu)?;

            emit!(GotHttpResponse {
                response: &response,
                roundtrip
            });
            Ok::<_, HttpError>(response)
        }
        .instrument(self.span.clone());

        Box::pin(fut)
    }
}

fn build_proxy_connector(
    tls_settings: &TlsSettings,
    proxy_config: &ProxyConfig,
    open_timeout: Option<Duration>,
) -> Result<Connector, HttpError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(open_timeout);

    let tls = tls_connector_builder(tls_settings).context(BuildTlsConnectorSnafu)?;
    let mut https = HttpsConnector::with_connector(http, tls).context(MakeHttpsConnectorSnafu)?;
    let settings = tls_settings.clone();
    https.set_callback(move |connection, _uri| {
        settings.apply_connect_configuration(connection);
        Ok(())
    });

    let mut proxy = ProxyConnector::new(https).context(MakeProxyConnectorSnafu)?;
    // Tunnels through an HTTPS proxy use the same TLS policy as direct connections.
    let tunnel_tls = tls_connector_builder(tls_settings).context(BuildTlsConnectorSnafu)?;
    proxy.set_tls(Some(tunnel_tls.build()));
    proxy_config
        .with_env()
        .configure(&mut proxy)
        .context(ConfigureProxySnafu)?;
    Ok(proxy)
}

fn default_request_headers<B>(request: &mut Request<B>, user_agent: &HeaderValue) {
    if !request.headers().contains_key("User-Agent") {
        request
            .headers_mut()
            .insert("User-Agent", user_agent.clone());
    }

    if !request.headers().contains_key("Accept-Encoding") {
        request
            .headers_mut()
            .insert("Accept-Encoding", HeaderValue::from_static("identity"));
    }
}

impl Clone for HttpClient {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            span: self.span.clone(),
            user_agent: self.user_agent.clone(),
            read_timeout: self.read_timeout,
        }
    }
}

impl fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpClient")
            .field("client", &self.client)
            .field("user_agent", &self.user_agent)
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        matchers::{header, method},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    #[test]
    fn default_request_headers_defaults() {
        let user_agent = HeaderValue::from_static("splunk-hec-output");
        let mut request = Request::post("http://example.com").body(()).unwrap();
        default_request_headers(&mut request, &user_agent);
        assert_eq!(
            request.headers().get("Accept-Encoding"),
            Some(&HeaderValue::from_static("identity")),
        );
        assert_eq!(request.headers().get("User-Agent"), Some(&user_agent));
    }

    #[test]
    fn default_request_headers_does_not_overwrite() {
        let mut request = Request::post("http://example.com")
            .header("User-Agent", "foo")
            .body(())
            .unwrap();
        default_request_headers(&mut request, &HeaderValue::from_static("bar"));
        assert_eq!(
            request.headers().get("User-Agent"),
            Some(&HeaderValue::from_static("foo"))
        );
    }

    fn client(timeouts: Timeouts) -> HttpClient {
        let proxy = ProxyConfig {
            enabled: false,
            ..Default::default()
        };
        HttpClient::new(&TlsSettings::default(), &proxy, timeouts).unwrap()
    }

    #[tokio::test]
    async fn sends_with_user_agent() {
        let server = MockServer::start().await;
        let user_agent = format!("splunk-hec-output/{}", crate::get_version());
        Mock::given(method("GET"))
            .and(header("User-Agent", user_agent.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let request = Request::get(server.uri()).body(Body::empty()).unwrap();
        let response = client(Timeouts::default()).send(request).await.unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(
            hyper::body::to_bytes(response.into_body()).await.unwrap(),
            "ok"
        );
    }

    #[tokio::test]
    async fn read_timeout_fails_slow_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let client = client(Timeouts {
            read: Some(Duration::from_millis(100)),
            ..Default::default()
        });
        let request = Request::get(server.uri()).body(Body::empty()).unwrap();
        let error = client.send(request).await.unwrap_err();
        assert!(matches!(error, HttpError::Timeout { .. }));
    }
}
