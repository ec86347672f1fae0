//! Configuration shared by every part of the output.

pub mod proxy;

pub use proxy::ProxyConfig;
