use futures::future::BoxFuture;
use snafu::Snafu;

pub mod splunk_hec;

pub type Healthcheck = BoxFuture<'static, crate::Result<()>>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum HealthcheckError {
    #[snafu(display("Unexpected status: {}", status))]
    UnexpectedStatus { status: ::http::StatusCode },
}
