use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::codec::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};

pub const HOST: &str = "127.0.0.1";
pub const PORT: u16 = 7878;
pub const DATA_FILE: &str = "bandstore.dat";
const FLUSH_INTERVAL_SECS: u64 = 30;
const TIMEOUT_MS: u64 = 5000;

#[derive(Parser, Debug, Clone)]
#[command(name = "bandstore-server", about = "Serves a music band collection over TCP")]
pub struct ServerConfig {
    /// The address to listen on
    #[arg(long, env = "BANDSTORE_HOST", default_value = HOST)]
    pub host: String,

    /// The port to listen on
    #[arg(short, long, env = "BANDSTORE_PORT", default_value_t = PORT)]
    pub port: u16,

    /// File the collection is loaded from and saved to
    #[arg(short, long, env = "BANDSTORE_DATA_FILE", default_value = DATA_FILE)]
    pub data_file: PathBuf,

    /// Seconds between background saves, 0 disables them
    #[arg(long, env = "BANDSTORE_FLUSH_INTERVAL", default_value_t = FLUSH_INTERVAL_SECS)]
    pub flush_interval: u64,

    /// Largest accepted message in bytes
    #[arg(long, env = "MAX_FRAME_SIZE", default_value_t = DEFAULT_MAX_FRAME_SIZE)]
    pub max_frame_size: usize,
}

impl ServerConfig {
    pub fn flush_interval(&self) -> Option<Duration> {
        match self.flush_interval {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn codec(&self) -> FrameCodec {
        FrameCodec::new(self.max_frame_size)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: HOST.to_string(),
            port: PORT,
            data_file: PathBuf::from(DATA_FILE),
            flush_interval: FLUSH_INTERVAL_SECS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "bandstore-client", about = "Interactive client for a bandstore server")]
pub struct ClientConfig {
    /// The server address
    #[arg(long, env = "BANDSTORE_HOST", default_value = HOST)]
    pub host: String,

    /// The server port
    #[arg(short, long, env = "BANDSTORE_PORT", default_value_t = PORT)]
    pub port: u16,

    /// Milliseconds to wait for a response
    #[arg(short, long, env = "BANDSTORE_TIMEOUT", default_value_t = TIMEOUT_MS)]
    pub timeout: u64,

    /// Run the commands of this file and exit
    #[arg(long)]
    pub script: Option<PathBuf>,
}

impl ClientConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }
}
