use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{self, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::codec::{CodecError, FrameCodec};
use crate::commands::Registry;
use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::message::{Request, Response, Status};
use crate::store::Store;
use crate::Error;

/// Serves the collection stored at `path` on `127.0.0.1:port` until Ctrl-C.
pub async fn start(port: u16, path: impl Into<PathBuf>) -> Result<(), Error> {
    let config = ServerConfig {
        port,
        data_file: path.into(),
        ..ServerConfig::default()
    };

    run(config, tokio::signal::ctrl_c()).await
}

/// Loads the data file, binds the configured address and serves until `shutdown` completes.
/// A data file that can't be loaded is fatal.
pub async fn run(config: ServerConfig, shutdown: impl Future) -> Result<(), Error> {
    crate::init_tracing("info");

    let data_file = config.data_file.clone();
    let store = task::spawn_blocking(move || Store::open(data_file)).await??;
    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;

    serve(listener, store, config, shutdown).await
}

/// How long a rejected connection waits for the peer to stop sending before it is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Accepts connections on `listener` until `shutdown` completes. Open connections then finish
/// the request they are running and close, and the store is flushed one last time.
pub async fn serve(
    listener: TcpListener,
    store: Store,
    config: ServerConfig,
    shutdown: impl Future,
) -> Result<(), Error> {
    let registry = Arc::new(Registry::default().with_data_file(&config.data_file));
    let codec = config.codec();

    info!("Bandstore server listening on {}", listener.local_addr()?);

    let flusher = config.flush_interval().map(|period| {
        tokio::spawn(flush_periodically(
            store.clone(),
            config.data_file.clone(),
            period,
        ))
    });

    let (notify_shutdown, shutdown_rx) = watch::channel(false);
    let mut connections = JoinSet::new();

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (socket, client_address) = match res {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        // Usually a transient condition such as running out of file descriptors.
                        warn!("Failed to accept connection: {}", e);
                        time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                };
                info!("Accepted connection from {:?}", client_address);

                let store = store.clone();
                let registry = registry.clone();
                let codec = codec.clone();
                let shutdown_rx = shutdown_rx.clone();
                connections.spawn(async move {
                    if let Err(e) = handle_connection(socket, client_address, store, registry, codec, shutdown_rx).await {
                        error!("Connection failed: {}", e);
                    }
                });
            }
            Some(res) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = res {
                    error!("Connection task failed: {}", e);
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    // Nothing may be acknowledged after the final flush.
    let _ = notify_shutdown.send(true);
    while let Some(res) = connections.join_next().await {
        if let Err(e) = res {
            error!("Connection task failed: {}", e);
        }
    }

    if let Some(flusher) = flusher {
        flusher.abort();
    }
    flush(&store, &config.data_file).await;

    Ok(())
}

#[instrument(
    name = "connection",
    skip(stream, store, registry, codec, shutdown),
    fields(connection_id, client_address)
)]
async fn handle_connection(
    stream: TcpStream,
    client_address: SocketAddr,
    store: Store,
    registry: Arc<Registry>,
    codec: FrameCodec,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let mut conn = Connection::new(stream, client_address, codec);

    tracing::Span::current()
        .record("connection_id", conn.id.to_string())
        .record("client_address", client_address.to_string());

    loop {
        // Shutdown is only observed between requests, so an admitted request always completes.
        let res = tokio::select! {
            res = conn.read_frame() => Some(res),
            _ = shutdown.changed() => None,
        };
        let Some(res) = res else {
            info!("Closing connection for shutdown");
            conn.shutdown().await?;
            return Ok(());
        };

        let frame = match res {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(CodecError::Io(e)) => return Err(e.into()),
            Err(e) => {
                warn!("Closing connection after malformed message: {}", e);
                return reject(&mut conn).await;
            }
        };

        let request = match Request::try_from(frame) {
            Ok(request) => request,
            Err(e) => {
                warn!("Closing connection after malformed request: {}", e);
                return reject(&mut conn).await;
            }
        };

        debug!("Received request {} ({})", request.command, request.token);
        let response = dispatch(request, &store, &registry).await;
        debug!("Sending response {} ({})", response, response.token);

        let token = response.token;
        match conn.write_frame(response.into_frame()).await {
            Err(CodecError::FrameTooLarge { size, max }) => {
                warn!("Response of {} bytes exceeds the limit of {} bytes", size, max);
                let response = Response::error(
                    Status::InternalError,
                    format!("response of {} bytes exceeds the limit of {} bytes", size, max),
                );
                conn.write_frame(response.with_token(token).into_frame()).await?;
            }
            res => res?,
        }
    }

    info!("Connection closed");
    Ok(())
}

/// Answers a message that couldn't be decoded, then closes the connection: after a framing
/// error the stream position is unknown.
async fn reject(conn: &mut Connection) -> Result<(), Error> {
    conn.write_frame(Response::malformed().into_frame()).await?;
    conn.close(CLOSE_GRACE).await?;
    Ok(())
}

/// Runs the handler on the blocking pool. The task is detached, so a client that disconnects
/// mid-request doesn't abort an admitted mutation, and a panic surfaces as a join error.
async fn dispatch(request: Request, store: &Store, registry: &Arc<Registry>) -> Response {
    let token = request.token;
    let command = request.command.clone();
    let store = store.clone();
    let registry = registry.clone();

    match task::spawn_blocking(move || registry.dispatch(request, &store)).await {
        Ok(response) => response,
        Err(e) => {
            error!("Command {} panicked: {}", command, e);
            Response::error(
                Status::InternalError,
                format!("command {} failed unexpectedly", command),
            )
            .with_token(token)
        }
    }
}

async fn flush_periodically(store: Store, path: PathBuf, period: Duration) {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        ticker.tick().await;
        flush(&store, &path).await;
    }
}

/// Writes the store if it changed. Failures are logged and retried on the next call.
async fn flush(store: &Store, path: &Path) {
    let store = store.clone();
    let path = path.to_path_buf();

    match task::spawn_blocking(move || store.flush(&path).map(|written| (written, path))).await {
        Ok(Ok((true, path))) => debug!("Saved collection to {}", path.display()),
        Ok(Ok((false, _))) => {}
        Ok(Err(e)) => error!("Failed to save collection: {}", e),
        Err(e) => error!("Save task failed: {}", e),
    }
}
