use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use openssl::{
    pkey::{PKey, Private},
    ssl::{ConnectConfiguration, SslContextBuilder, SslVerifyMode, SslVersion},
    x509::X509,
};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::{
    AddCertToStoreSnafu, CaPathNotDirectorySnafu, CheckPrivateKeySnafu, FileOpenFailedSnafu,
    FileReadFailedSnafu, LoadCaPathSnafu, NoCertificatesSnafu, PrivateKeyParseSnafu, Result,
    SetCertificateSnafu, SetCipherListSnafu, SetMinVersionSnafu, SetPrivateKeySnafu, TlsError,
    X509ParseSnafu,
};

const PEM_START_MARKER: &str = "-----BEGIN ";

/// Minimum accepted TLS protocol version.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    #[serde(rename = "TLSv1")]
    Tls1,
    #[serde(rename = "TLSv1.1")]
    Tls1_1,
    #[default]
    #[serde(rename = "TLSv1.2")]
    Tls1_2,
    #[serde(rename = "TLSv1.3")]
    Tls1_3,
}

impl TlsVersion {
    const fn ssl_version(self) -> SslVersion {
        match self {
            TlsVersion::Tls1 => SslVersion::TLS1,
            TlsVersion::Tls1_1 => SslVersion::TLS1_1,
            TlsVersion::Tls1_2 => SslVersion::TLS1_2,
            TlsVersion::Tls1_3 => SslVersion::TLS1_3,
        }
    }
}

/// TLS options for the connection to the HEC endpoint.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TlsOptions {
    /// PEM encoded client certificate.
    pub client_cert: Option<PathBuf>,
    /// PEM encoded private key for `client_cert`.
    pub client_key: Option<PathBuf>,
    /// PEM file with one or more CA certificates to trust, in addition to the
    /// system roots.
    pub ca_file: Option<PathBuf>,
    /// Directory of hashed CA certificates to trust.
    pub ca_path: Option<PathBuf>,
    /// OpenSSL cipher names allowed for the connection.
    pub ssl_ciphers: Option<Vec<String>>,
    #[serde(default)]
    pub min_version: TlsVersion,
    /// Skip certificate and hostname verification.
    #[serde(default)]
    pub insecure_ssl: bool,
}

/// Directly usable settings for TLS connectors
#[derive(Clone, Default)]
pub struct TlsSettings {
    insecure: bool,
    min_version: TlsVersion,
    authorities: Vec<X509>,
    ca_path: Option<PathBuf>,
    ciphers: Option<String>,
    identity: Option<(X509, PKey<Private>)>,
}

impl std::fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsSettings")
            .field("insecure", &self.insecure)
            .field("min_version", &self.min_version)
            .field("authorities", &self.authorities.len())
            .field("ca_path", &self.ca_path)
            .field("ciphers", &self.ciphers)
            .field("identity", &self.identity.is_some())
            .finish()
    }
}

impl TlsSettings {
    /// Loads and validates every referenced file so that bad TLS material is
    /// reported at setup rather than on the first connection.
    pub fn from_options(options: &TlsOptions) -> Result<Self> {
        if options.insecure_ssl {
            warn!("`insecure_ssl` is ENABLED, certificates and hostnames will not be verified.");
        }

        if let Some(path) = &options.ca_path {
            if !path.is_dir() {
                return CaPathNotDirectorySnafu { path: path.clone() }.fail();
            }
        }

        Ok(Self {
            insecure: options.insecure_ssl,
            min_version: options.min_version,
            authorities: options.load_authorities()?,
            ca_path: options.ca_path.clone(),
            ciphers: options
                .ssl_ciphers
                .as_ref()
                .filter(|ciphers| !ciphers.is_empty())
                .map(|ciphers| ciphers.join(":")),
            identity: options.load_identity()?,
        })
    }

    pub const fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub(super) fn apply_context(&self, context: &mut SslContextBuilder) -> Result<()> {
        context.set_verify(if self.insecure {
            SslVerifyMode::NONE
        } else {
            SslVerifyMode::PEER
        });

        context
            .set_min_proto_version(Some(self.min_version.ssl_version()))
            .context(SetMinVersionSnafu)?;

        if let Some(ciphers) = &self.ciphers {
            context
                .set_cipher_list(ciphers)
                .context(SetCipherListSnafu { ciphers })?;
        }

        if let Some((cert, key)) = &self.identity {
            context.set_certificate(cert).context(SetCertificateSnafu)?;
            context.set_private_key(key).context(SetPrivateKeySnafu)?;
            context.check_private_key().context(CheckPrivateKeySnafu)?;
        }

        for authority in &self.authorities {
            context
                .cert_store_mut()
                .add_cert(authority.clone())
                .context(AddCertToStoreSnafu)?;
        }

        if let Some(path) = &self.ca_path {
            context
                .load_verify_locations(None, Some(path.as_path()))
                .context(LoadCaPathSnafu { path })?;
        }

        Ok(())
    }

    pub fn apply_connect_configuration(&self, connection: &mut ConnectConfiguration) {
        connection.set_verify_hostname(!self.insecure);
    }
}

impl TlsOptions {
    fn load_authorities(&self) -> Result<Vec<X509>> {
        match &self.ca_file {
            None => Ok(vec![]),
            Some(filename) => {
                let pem = read_pem(filename, "CA certificate")?;
                let authorities = pem
                    .match_indices(PEM_START_MARKER)
                    .map(|(start, _)| X509::from_pem(pem[start..].as_bytes()))
                    .collect::<std::result::Result<Vec<_>, _>>()
                    .context(X509ParseSnafu { filename })?;
                if authorities.is_empty() {
                    return NoCertificatesSnafu { filename }.fail();
                }
                Ok(authorities)
            }
        }
    }

    fn load_identity(&self) -> Result<Option<(X509, PKey<Private>)>> {
        match (&self.client_cert, &self.client_key) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err(TlsError::MissingCrtKeyFile),
            (Some(_), None) => Err(TlsError::MissingKey),
            (Some(crt_file), Some(key_file)) => {
                let pem = read_pem(crt_file, "certificate")?;
                let cert = X509::from_pem(pem.as_bytes())
                    .context(X509ParseSnafu { filename: crt_file })?;
                let pem = read_pem(key_file, "key")?;
                let key = PKey::private_key_from_pem(pem.as_bytes())
                    .context(PrivateKeyParseSnafu { filename: key_file })?;
                Ok(Some((cert, key)))
            }
        }
    }
}

fn read_pem(filename: &Path, note: &'static str) -> Result<String> {
    let mut text = String::new();
    File::open(filename)
        .context(FileOpenFailedSnafu { note, filename })?
        .read_to_string(&mut text)
        .context(FileReadFailedSnafu { note, filename })?;
    Ok(text)
}
