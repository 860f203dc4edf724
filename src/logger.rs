//! Logging setup shared by the fusion binaries, benches and tests
//!
//! Library code only emits `tracing` events; installing a subscriber is left to
//! the executable.

use tracing::Level;

/// Initialize the tracing subscriber with the default INFO level
///
/// Default log level: INFO (overrideable via RUST_LOG environment variable)
///
/// Format includes:
/// - Timestamp
/// - Log level
/// - Module/target path
///
/// # Example
/// ```no_run
/// use imu_gnss_fusion::init_logger;
///
/// init_logger();
/// tracing::info!("replay started");
/// ```
///
/// # Environment Variables
/// ```bash
/// RUST_LOG=debug cargo run --bin fuse_sensor_log -- --log replay.log
/// RUST_LOG=imu_gnss_fusion::optimizer=trace cargo run --bin fuse_sensor_log
/// ```
pub fn init_logger() {
    init_logger_with_level(Level::INFO)
}

/// Initialize the tracing subscriber with a custom default level
///
/// Calling it a second time is a no-op, so tests may call it freely.
///
/// # Example
/// ```no_run
/// use imu_gnss_fusion::init_logger_with_level;
/// use tracing::Level;
///
/// init_logger_with_level(Level::DEBUG);
/// tracing::debug!("per-epoch state logging enabled");
/// ```
pub fn init_logger_with_level(default_level: Level) {
    use tracing_subscriber::fmt::time::SystemTime;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_timer(SystemTime)
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_thread_ids(false)
        .with_thread_names(true)
        .try_init();
}

/// Level names accepted on the command line.
pub fn parse_level(name: &str) -> Option<Level> {
    match name.to_ascii_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
