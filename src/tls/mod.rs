use std::{fmt::Debug, path::PathBuf};

use openssl::{
    error::ErrorStack,
    ssl::{SslConnector, SslConnectorBuilder, SslMethod},
};
use snafu::{ResultExt, Snafu};

mod settings;

pub use settings::{TlsOptions, TlsSettings, TlsVersion};

pub type Result<T> = std::result::Result<T, TlsError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TlsError {
    #[snafu(display("Could not open {} file {:?}: {}", note, filename, source))]
    FileOpenFailed {
        note: &'static str,
        filename: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not read {} file {:?}: {}", note, filename, source))]
    FileReadFailed {
        note: &'static str,
        filename: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Could not parse certificate in {:?}: {}", filename, source))]
    X509ParseError {
        filename: PathBuf,
        source: ErrorStack,
    },
    #[snafu(display("No certificates found in {:?}", filename))]
    NoCertificates { filename: PathBuf },
    #[snafu(display("Could not parse private key in {:?}: {}", filename, source))]
    PrivateKeyParseError {
        filename: PathBuf,
        source: ErrorStack,
    },
    #[snafu(display("TLS client_cert specified without client_key"))]
    MissingKey,
    #[snafu(display("Must specify both TLS client_key and client_cert"))]
    MissingCrtKeyFile,
    #[snafu(display("TLS ca_path {:?} is not a directory", path))]
    CaPathNotDirectory { path: PathBuf },
    #[snafu(display("Could not build TLS connector: {}", source))]
    TlsBuildConnector { source: ErrorStack },
    #[snafu(display("Could not set TLS certificate: {}", source))]
    SetCertificate { source: ErrorStack },
    #[snafu(display("Could not set TLS private key: {}", source))]
    SetPrivateKey { source: ErrorStack },
    #[snafu(display("TLS private key does not match certificate: {}", source))]
    CheckPrivateKey { source: ErrorStack },
    #[snafu(display("Could not add certificate to trust store: {}", source))]
    AddCertToStore { source: ErrorStack },
    #[snafu(display("Could not load CA directory {:?}: {}", path, source))]
    LoadCaPath { path: PathBuf, source: ErrorStack },
    #[snafu(display("Invalid TLS cipher list {:?}: {}", ciphers, source))]
    SetCipherList { ciphers: String, source: ErrorStack },
    #[snafu(display("Could not set minimum TLS version: {}", source))]
    SetMinVersion { source: ErrorStack },
}

/// Builds an OpenSSL connector configured from the given settings.
pub fn tls_connector_builder(settings: &TlsSettings) -> Result<SslConnectorBuilder> {
    let mut builder = SslConnector::builder(SslMethod::tls()).context(TlsBuildConnectorSnafu)?;
    settings.apply_context(&mut builder)?;
    Ok(builder)
}
