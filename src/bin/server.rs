use bandstore::config::ServerConfig;
use bandstore::{server, Error};
use clap::Parser;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = ServerConfig::parse();

    server::run(config, signal::ctrl_c()).await
}
