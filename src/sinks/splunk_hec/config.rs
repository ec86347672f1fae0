use std::{sync::Arc, time::Duration};

use futures::FutureExt;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use uuid::Uuid;

use super::{
    acknowledgements::{AckTracker, DEFAULT_ACK_INTERVAL, DEFAULT_ACK_TIMEOUT},
    common::{build_healthcheck, EndpointError, HttpRequestBuilder},
    formatter::{DataMode, FormatConfig, HecFormatter, MatchFormatter, MetricMode, PatternError, Utf8Coercion},
    service::HecService,
    sink::{HecOutput, HecSink},
};
use crate::{
    buffers::ChunkAcker,
    config::ProxyConfig,
    event::{KeyPath, PathParseError, Value},
    http::{HttpClient, HttpError, Timeouts},
    template::{FieldValue, Template, TemplateEngine, TemplateParseError},
    tls::{TlsError, TlsOptions, TlsSettings},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ConfigurationError {
    #[snafu(display("Invalid hec_host {:?}", host))]
    InvalidHost { host: String },
    #[snafu(display("hec_port must be between 1 and 65535"))]
    InvalidPort,
    #[snafu(display("hec_token must not be empty"))]
    MissingToken,
    #[snafu(display("Invalid HEC endpoint: {}", source))]
    Endpoint { source: EndpointError },
    #[snafu(display("`{}` and `{}_key` cannot both be set", field, field))]
    ConflictingField { field: &'static str },
    #[snafu(display("Invalid template for `{}`: {}", field, source))]
    InvalidTemplate {
        field: &'static str,
        source: TemplateParseError,
    },
    #[snafu(display("Invalid key path for `{}`: {}", field, source))]
    InvalidKeyPath {
        field: String,
        source: PathParseError,
    },
    #[snafu(display("`metric_name_key` is set but `metric_value_key` is not"))]
    MissingMetricValueKey,
    #[snafu(display("`metric_value_key` is set but `metric_name_key` is not"))]
    MissingMetricNameKey,
    #[snafu(display("`metrics_from_event = true` conflicts with `metric_name_key`/`metric_value_key`"))]
    MetricsFromEventWithKeys,
    #[snafu(display("`metrics_from_event = false` requires `metric_name_key` and `metric_value_key`"))]
    MetricKeysRequired,
    #[snafu(display("Invalid format for tag {:?}: {}", tag, source))]
    InvalidFormat {
        tag: Option<String>,
        source: PatternError,
    },
    #[snafu(display("`{}` must be greater than zero", field))]
    ZeroDuration { field: &'static str },
    #[snafu(display("Unable to determine the local hostname: {}", source))]
    Hostname { source: std::io::Error },
    #[snafu(display("Invalid TLS configuration: {}", source))]
    Tls { source: TlsError },
    #[snafu(display("Unable to build HTTP client: {}", source))]
    Http { source: HttpError },
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Http,
    #[default]
    Https,
}

impl Protocol {
    const fn scheme(self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    #[default]
    Event,
    Metric,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct HecOutputConfig {
    #[serde(default)]
    pub protocol: Protocol,
    pub hec_host: String,
    #[serde(default = "default_hec_port")]
    pub hec_port: u32,
    pub hec_token: String,
    #[serde(default)]
    pub tls: TlsOptions,

    pub host: Option<String>,
    pub source: Option<String>,
    pub sourcetype: Option<String>,
    pub index: Option<String>,
    pub host_key: Option<String>,
    pub source_key: Option<String>,
    pub sourcetype_key: Option<String>,
    pub index_key: Option<String>,
    pub time_key: Option<String>,
    #[serde(default)]
    pub template_engine: TemplateEngine,

    #[serde(default)]
    pub data_type: DataType,
    pub metric_name_key: Option<String>,
    pub metric_value_key: Option<String>,
    pub metrics_from_event: Option<bool>,

    /// Output field name to record key. An empty key reads the field's own name.
    pub fields: Option<IndexMap<String, String>>,
    #[serde(default)]
    pub keep_keys: bool,
    #[serde(default = "default_true")]
    pub coerce_to_utf8: bool,
    #[serde(default = "default_replacement")]
    pub non_utf8_replacement_string: String,
    #[serde(default)]
    pub formats: Vec<FormatConfig>,

    #[serde(default)]
    pub retry_on_client_error: bool,
    #[serde(default)]
    pub use_ack: bool,
    pub channel: Option<Uuid>,
    #[serde(default = "default_ack_interval_secs")]
    pub ack_interval_secs: u64,
    #[serde(default = "default_ack_response_timeout_secs")]
    pub ack_response_timeout_secs: u64,

    pub open_timeout_secs: Option<u64>,
    pub read_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub healthcheck: bool,
}

const fn default_hec_port() -> u32 {
    8088
}

const fn default_true() -> bool {
    true
}

fn default_replacement() -> String {
    " ".to_owned()
}

const fn default_ack_interval_secs() -> u64 {
    DEFAULT_ACK_INTERVAL.as_secs()
}

const fn default_ack_response_timeout_secs() -> u64 {
    DEFAULT_ACK_TIMEOUT.as_secs()
}

impl HecOutputConfig {
    /// Validates the configuration and builds a ready output. Nothing here
    /// talks to the network; the healthcheck runs from `HecOutput::start`.
    pub fn build(&self, acker: Arc<dyn ChunkAcker>) -> Result<HecOutput, ConfigurationError> {
        let endpoint = self.endpoint()?;
        if self.hec_token.is_empty() {
            return MissingTokenSnafu.fail();
        }
        let formatter = self.build_formatter()?;

        let ack_interval = non_zero_secs(self.ack_interval_secs, "ack_interval_secs")?;
        let ack_timeout = non_zero_secs(self.ack_response_timeout_secs, "ack_response_timeout_secs")?;

        let tls = TlsSettings::from_options(&self.tls).context(TlsSnafu)?;
        let client = HttpClient::new(&tls, &self.proxy, self.timeouts()).context(HttpSnafu)?;

        let channel = self
            .use_ack
            .then(|| self.channel.unwrap_or_else(Uuid::new_v4));
        let request_builder = Arc::new(
            HttpRequestBuilder::new(&endpoint, &self.hec_token, channel).context(EndpointSnafu)?,
        );

        let service = HecService::new(
            client.clone(),
            Arc::clone(&request_builder),
            self.use_ack,
            self.retry_on_client_error,
        );
        let tracker = self.use_ack.then(|| {
            Arc::new(AckTracker::new(
                service.clone(),
                Arc::clone(&acker),
                ack_interval,
            ))
        });
        let sink = Arc::new(HecSink::new(service, acker, tracker.clone(), ack_timeout));
        let healthcheck = self
            .healthcheck
            .then(|| build_healthcheck(client, request_builder).boxed());

        Ok(HecOutput::new(formatter, sink, tracker, healthcheck))
    }

    pub fn endpoint(&self) -> Result<String, ConfigurationError> {
        if !valid_host(&self.hec_host) {
            return InvalidHostSnafu {
                host: self.hec_host.clone(),
            }
            .fail();
        }
        if self.hec_port == 0 || self.hec_port > u32::from(u16::MAX) {
            return InvalidPortSnafu.fail();
        }
        Ok(format!(
            "{}://{}:{}",
            self.protocol.scheme(),
            self.hec_host,
            self.hec_port
        ))
    }

    pub fn build_formatter(&self) -> Result<HecFormatter, ConfigurationError> {
        let hostname: Arc<str> = crate::get_hostname().context(HostnameSnafu)?.into();

        let host = match self.field_value("host", &self.host, &self.host_key, &hostname)? {
            Some(host) => host,
            None => FieldValue::Literal(Value::from(&*hostname)),
        };

        // Without a configured source every payload names its tag.
        let source = match self.field_value("source", &self.source, &self.source_key, &hostname)? {
            Some(source) => source,
            None => Template::parse("${tag}", Arc::clone(&hostname))
                .map(FieldValue::Template)
                .context(InvalidTemplateSnafu { field: "source" })?,
        };

        let formats = self
            .formats
            .iter()
            .map(|format| {
                MatchFormatter::from_config(format).context(InvalidFormatSnafu {
                    tag: format.tag.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let fields = self
            .fields
            .as_ref()
            .map(|fields| {
                fields
                    .iter()
                    .map(|(name, key)| {
                        let key = if key.is_empty() { name } else { key };
                        let path = KeyPath::parse(key).context(InvalidKeyPathSnafu {
                            field: format!("fields.{name}"),
                        })?;
                        Ok((name.clone(), path))
                    })
                    .collect::<Result<Vec<_>, ConfigurationError>>()
            })
            .transpose()?;

        Ok(HecFormatter {
            host: Some(host),
            source: Some(source),
            sourcetype: self.field_value(
                "sourcetype",
                &self.sourcetype,
                &self.sourcetype_key,
                &hostname,
            )?,
            index: self.field_value("index", &self.index, &self.index_key, &hostname)?,
            time_key: key_path("time_key", &self.time_key)?,
            fields,
            keep_keys: self.keep_keys,
            mode: self.data_mode()?,
            formats,
            utf8: if self.coerce_to_utf8 {
                Utf8Coercion::Replace(self.non_utf8_replacement_string.clone())
            } else {
                Utf8Coercion::Strict
            },
        })
    }

    fn field_value(
        &self,
        field: &'static str,
        template: &Option<String>,
        key: &Option<String>,
        hostname: &Arc<str>,
    ) -> Result<Option<FieldValue>, ConfigurationError> {
        match (template, key) {
            (Some(_), Some(_)) => ConflictingFieldSnafu { field }.fail(),
            (Some(template), None) => self
                .template_engine
                .compile(template, hostname)
                .map(Some)
                .context(InvalidTemplateSnafu { field }),
            (None, Some(key)) => KeyPath::parse(key)
                .map(|path| Some(FieldValue::RecordKey(path)))
                .context(InvalidKeyPathSnafu {
                    field: format!("{field}_key"),
                }),
            (None, None) => Ok(None),
        }
    }

    fn data_mode(&self) -> Result<DataMode, ConfigurationError> {
        let keys = match (&self.metric_name_key, &self.metric_value_key) {
            (Some(_), None) => return MissingMetricValueKeySnafu.fail(),
            (None, Some(_)) => return MissingMetricNameKeySnafu.fail(),
            (Some(name), Some(value)) => Some((name, value)),
            (None, None) => None,
        };

        if self.data_type == DataType::Event {
            return Ok(DataMode::Event);
        }

        let mode = match (self.metrics_from_event, keys) {
            (Some(true), Some(_)) => return MetricsFromEventWithKeysSnafu.fail(),
            (Some(false), None) => return MetricKeysRequiredSnafu.fail(),
            (_, Some((name_key, value_key))) => MetricMode::Explicit {
                name_key: KeyPath::parse(name_key).context(InvalidKeyPathSnafu {
                    field: "metric_name_key",
                })?,
                value_key: KeyPath::parse(value_key).context(InvalidKeyPathSnafu {
                    field: "metric_value_key",
                })?,
            },
            (_, None) => MetricMode::FromEvent,
        };
        Ok(DataMode::Metric(mode))
    }

    fn timeouts(&self) -> Timeouts {
        Timeouts {
            open: self.open_timeout_secs.map(Duration::from_secs),
            read: self.read_timeout_secs.map(Duration::from_secs),
            idle: self.idle_timeout_secs.map(Duration::from_secs),
        }
    }
}

fn key_path(field: &'static str, key: &Option<String>) -> Result<Option<KeyPath>, ConfigurationError> {
    key.as_deref()
        .map(KeyPath::parse)
        .transpose()
        .context(InvalidKeyPathSnafu { field })
}

fn non_zero_secs(secs: u64, field: &'static str) -> Result<Duration, ConfigurationError> {
    if secs == 0 {
        return ZeroDurationSnafu { field }.fail();
    }
    Ok(Duration::from_secs(secs))
}

fn valid_host(host: &str) -> bool {
    if let Some(inner) = host.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
        return inner.parse::<std::net::Ipv6Addr>().is_ok();
    }
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'))
}
