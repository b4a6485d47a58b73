pub mod client;
pub mod codec;
pub mod commands;
pub mod config;
pub mod connection;
pub mod frame;
pub mod input;
pub mod message;
pub mod model;
pub mod repl;
pub mod server;
pub mod store;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

/// Installs the global fmt subscriber. `RUST_LOG` overrides `default_directive`. Calling it
/// more than once is harmless.
pub fn init_tracing(default_directive: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| tracing::debug!("Failed to initialize global tracing: {}", e));
}
