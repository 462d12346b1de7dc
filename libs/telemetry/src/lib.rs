//! Logging bootstrap shared by the Symphony binaries.

mod config;
mod tracing_init;

pub use config::TelemetryConfig;
pub use tracing_init::init_telemetry;

/// Installs the subscriber configured from the environment.
pub fn install(service_name: &str) -> anyhow::Result<()> {
    init_telemetry(TelemetryConfig::from_env(
        service_name,
        env!("CARGO_PKG_VERSION"),
    ))
}
