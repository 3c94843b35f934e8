/// Application-level constants
pub const APP_NAME: &str = "Scriptgrade";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Log filter used when `RUST_LOG` is not set.
/// Pipeline stages log at info, everything else (reqwest, hyper) at warn.
pub fn default_log_filter() -> String {
    "warn,scriptgrade=info".to_string()
}
