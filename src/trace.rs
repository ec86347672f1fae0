//! Diagnostic log setup for embedding hosts and tests.

use tracing_subscriber::FmtSubscriber;

/// Installs a global subscriber writing human-readable or JSON lines,
/// filtered by an `EnvFilter` directive string such as
/// `"splunk_hec_output=debug,info"`.
///
/// Calling it more than once is harmless; only the first call takes effect.
pub fn init(color: bool, json: bool, levels: &str) {
    // `try_init` also bridges `log` records into tracing.
    let _ = if json {
        FmtSubscriber::builder()
            .with_env_filter(levels)
            .json()
            .flatten_event(true)
            .try_init()
    } else {
        FmtSubscriber::builder()
            .with_ansi(color)
            .with_env_filter(levels)
            .try_init()
    };
}
