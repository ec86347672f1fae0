use headers::Authorization;
use http::uri::InvalidUri;
use hyper_proxy::{Custom, Intercept, Proxy, ProxyConnector};
use no_proxy::NoProxy;
use serde::{Deserialize, Serialize};
use url::Url;

// Lowercase wins over uppercase, as most tooling does.
fn from_env(key: &str) -> Option<String> {
    std::env::var(key.to_lowercase())
        .ok()
        .or_else(|| std::env::var(key.to_uppercase()).ok())
        .filter(|value| !value.is_empty())
}

#[derive(Clone, Default, Debug, PartialEq, Eq)]
struct NoProxyInterceptor(NoProxy);

impl NoProxyInterceptor {
    fn intercept(self, expected_scheme: &'static str) -> Intercept {
        Intercept::Custom(Custom::from(
            move |scheme: Option<&str>, host: Option<&str>, port: Option<u16>| {
                if scheme.is_some() && scheme != Some(expected_scheme) {
                    return false;
                }
                let bypass = host.is_some_and(|host| {
                    self.0.matches(host)
                        || port.is_some_and(|port| self.0.matches(&format!("{host}:{port}")))
                });
                !bypass
            },
        ))
    }
}

/// Proxy used for requests to the HEC endpoint.
///
/// Unset fields fall back to the `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY`
/// environment variables.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Proxy for plain HTTP traffic.
    #[serde(default)]
    pub http: Option<String>,

    /// Proxy for HTTPS traffic.
    #[serde(default)]
    pub https: Option<String>,

    /// Hosts, domains (`.example.com`), IP addresses or CIDR blocks that are
    /// never proxied.
    #[serde(default)]
    pub no_proxy: NoProxy,
}

const fn default_enabled() -> bool {
    true
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            http: None,
            https: None,
            no_proxy: NoProxy::default(),
        }
    }
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self {
            enabled: true,
            http: from_env("HTTP_PROXY"),
            https: from_env("HTTPS_PROXY"),
            no_proxy: from_env("NO_PROXY").map(NoProxy::from).unwrap_or_default(),
        }
    }

    /// The effective proxy: `self` layered over the environment.
    #[must_use]
    pub fn with_env(&self) -> Self {
        Self::from_env().merge(self)
    }

    /// Layers `other` over `self`; values set in `other` win.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        let no_proxy = if other.no_proxy.is_empty() {
            self.no_proxy.clone()
        } else {
            other.no_proxy.clone()
        };

        Self {
            enabled: self.enabled && other.enabled,
            http: other.http.clone().or_else(|| self.http.clone()),
            https: other.https.clone().or_else(|| self.https.clone()),
            no_proxy,
        }
    }

    fn build_proxy(
        &self,
        proxy_scheme: &'static str,
        proxy_url: Option<&String>,
    ) -> Result<Option<Proxy>, InvalidUri> {
        proxy_url
            .map(|url| {
                url.parse().map(|parsed| {
                    let interceptor = NoProxyInterceptor(self.no_proxy.clone());
                    let mut proxy = Proxy::new(interceptor.intercept(proxy_scheme), parsed);
                    if let Ok(authority) = Url::parse(url) {
                        if let Some(password) = authority.password() {
                            proxy.set_authorization(Authorization::basic(
                                authority.username(),
                                password,
                            ));
                        }
                    }
                    proxy
                })
            })
            .transpose()
    }

    fn http_proxy(&self) -> Result<Option<Proxy>, InvalidUri> {
        self.build_proxy("http", self.http.as_ref())
    }

    fn https_proxy(&self) -> Result<Option<Proxy>, InvalidUri> {
        self.build_proxy("https", self.https.as_ref())
    }

    /// Installs the configured proxies on `connector`.
    pub fn configure<C>(&self, connector: &mut ProxyConnector<C>) -> Result<(), InvalidUri> {
        if self.enabled {
            if let Some(proxy) = self.http_proxy()? {
                connector.add_proxy(proxy);
            }
            if let Some(proxy) = self.https_proxy()? {
                connector.add_proxy(proxy);
            }
        }
        Ok(())
    }
}
