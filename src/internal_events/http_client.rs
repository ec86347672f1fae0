use std::time::Duration;

use http::{Request, Response};
use hyper::body::HttpBody;
use metrics::{counter, histogram};

use super::InternalEvent;

#[derive(Debug)]
pub struct AboutToSendHttpRequest<'a, T> {
    pub request: &'a Request<T>,
}

impl<T: HttpBody> InternalEvent for AboutToSendHttpRequest<'_, T> {
    fn emit(self) {
        debug!(
            message = "Sending HTTP request.",
            uri = %self.request.uri(),
            method = %self.request.method(),
            version = ?self.request.version(),
            headers = ?remove_sensitive(self.request.headers()),
            body = %FormatBody(self.request.body()),
        );
        counter!("http_client_requests_sent_total", "method" => self.request.method().to_string())
            .increment(1);
    }
}

#[derive(Debug)]
pub struct GotHttpResponse<'a, T> {
    pub response: &'a Response<T>,
    pub roundtrip: Duration,
}

impl<T: HttpBody> InternalEvent for GotHttpResponse<'_, T> {
    fn emit(self) {
        debug!(
            message = "HTTP response.",
            status = %self.response.status(),
            version = ?self.response.version(),
            headers = ?remove_sensitive(self.response.headers()),
            body = %FormatBody(self.response.body()),
        );
        counter!(
            "http_client_responses_total",
            "status" => self.response.status().as_u16().to_string(),
        )
        .increment(1);
        histogram!("http_client_rtt_seconds").record(self.roundtrip);
    }
}

#[derive(Debug)]
pub struct GotHttpWarning<'a> {
    pub error: &'a hyper::Error,
    pub roundtrip: Duration,
}

impl InternalEvent for GotHttpWarning<'_> {
    fn emit(self) {
        warn!(
            message = "HTTP error.",
            error = %self.error,
            error_type = "request_failed",
        );
        counter!("http_client_errors_total", "error_kind" => self.error.to_string()).increment(1);
        histogram!("http_client_rtt_seconds").record(self.roundtrip);
    }
}

#[derive(Debug)]
pub struct HttpRequestTimedOut {
    pub timeout: Duration,
}

impl InternalEvent for HttpRequestTimedOut {
    fn emit(self) {
        warn!(
            message = "HTTP request timed out.",
            timeout_secs = self.timeout.as_secs_f64(),
            error_type = "timed_out",
        );
        counter!("http_client_errors_total", "error_kind" => "timed_out").increment(1);
    }
}

/// The `Authorization` header carries the HEC token; keep it out of the logs.
fn remove_sensitive(headers: &http::HeaderMap) -> http::HeaderMap {
    let mut headers = headers.clone();
    for name in &[
        http::header::AUTHORIZATION,
        http::header::PROXY_AUTHORIZATION,
    ] {
        if let Some(value) = headers.get_mut(name) {
            *value = http::HeaderValue::from_static("******");
        }
    }
    headers
}

/// Newtype placeholder to provide a formatter for the request and response body.
struct FormatBody<'a, B>(&'a B);

impl<B: HttpBody> std::fmt::Display for FormatBody<'_, B> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        let size = self.0.size_hint();
        match (size.lower(), size.upper()) {
            (0, None) => write!(fmt, "[unknown]"),
            (lower, None) => write!(fmt, "[>={lower} bytes]"),

            (0, Some(0)) => write!(fmt, "[empty]"),
            (0, Some(upper)) => write!(fmt, "[<={upper} bytes]"),

            (lower, Some(upper)) if lower == upper => write!(fmt, "[{lower} bytes]"),
            (lower, Some(upper)) => write!(fmt, "[{lower}..={upper} bytes]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_authorization_header() {
        let mut headers = http::HeaderMap::new();
        headers.insert("Authorization", "Splunk secret".parse().unwrap());
        headers.insert("Content-Type", "application/json".parse().unwrap());

        let masked = remove_sensitive(&headers);
        assert_eq!(masked["Authorization"], "******");
        assert_eq!(masked["Content-Type"], "application/json");
    }

    #[test]
    fn formats_known_body_size() {
        let body = hyper::Body::from("12345");
        assert_eq!(FormatBody(&body).to_string(), "[5 bytes]");
        assert_eq!(FormatBody(&hyper::Body::empty()).to_string(), "[empty]");
    }
}
