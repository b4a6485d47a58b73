use std::io;
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::codec::{CodecError, FrameCodec};
use crate::connection::Connection;
use crate::frame::Frame;
use crate::message::{MessageError, Request, Response, Status, UNCORRELATED};

#[derive(Debug, ThisError)]
pub enum ClientError {
    /// Nothing came back in time. The request may or may not have been applied.
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("connection closed by the server")]
    Disconnected,
    #[error("failed to connect: {0}")]
    Connect(#[source] io::Error),
    #[error("invalid response: {0}")]
    InvalidResponse(#[from] MessageError),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sending,
    AwaitingResponse { token: u64 },
    Closed,
}

/// One connection to a server with at most one request in flight.
///
/// Every request carries a fresh correlation token. A response with another token belongs to a
/// request that already timed out and is dropped. Nothing is ever resent: after a timeout the
/// caller decides whether to issue the command again.
pub struct Session {
    conn: Connection,
    state: SessionState,
    last_token: u64,
    timeout: Duration,
}

impl Session {
    pub async fn connect(addr: impl ToSocketAddrs, timeout: Duration) -> Result<Session, ClientError> {
        let stream = match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(stream) => stream.map_err(ClientError::Connect)?,
            Err(_) => return Err(ClientError::Timeout(timeout)),
        };
        let peer = stream.peer_addr().map_err(ClientError::Connect)?;
        debug!("Connected to {}", peer);

        Ok(Session {
            conn: Connection::new(stream, peer, FrameCodec::default()),
            state: SessionState::Idle,
            last_token: UNCORRELATED,
            timeout,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Sends one command and waits for its response.
    pub async fn execute(&mut self, command: &str, args: Vec<Frame>) -> Result<Response, ClientError> {
        if self.state == SessionState::Closed {
            return Err(ClientError::Disconnected);
        }

        let token = self.next_token();
        self.state = SessionState::Sending;
        let request = Request::new(token, command, args).into_frame();
        if let Err(e) = self.conn.write_frame(request).await {
            return Err(self.fail(e.into()));
        }

        self.state = SessionState::AwaitingResponse { token };
        let deadline = Instant::now() + self.timeout;

        loop {
            let frame = match time::timeout_at(deadline, self.conn.read_frame()).await {
                Err(_) => {
                    self.state = SessionState::Idle;
                    return Err(ClientError::Timeout(self.timeout));
                }
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => return Err(self.fail(ClientError::Disconnected)),
                Ok(Err(e)) => return Err(self.fail(e.into())),
            };

            let response = match Response::try_from(frame) {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e.into())),
            };

            if response.status == Status::MalformedMessage {
                // The server hangs up after answering a message it couldn't read.
                self.state = SessionState::Closed;
                return Ok(response);
            }

            if response.token == token {
                self.state = SessionState::Idle;
                return Ok(response);
            }

            debug!(
                "Discarding stale response {} while waiting for {}",
                response.token, token
            );
        }
    }

    fn next_token(&mut self) -> u64 {
        self.last_token = self.last_token.wrapping_add(1);
        if self.last_token == UNCORRELATED {
            self.last_token += 1;
        }
        self.last_token
    }

    fn fail(&mut self, err: ClientError) -> ClientError {
        warn!("Session closed: {}", err);
        self.state = SessionState::Closed;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use tokio::net::TcpListener;

    /// Accepts one connection and hands it to `script`.
    async fn fake_server<F, Fut>(script: F) -> SocketAddr
    where
        F: FnOnce(Connection) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, peer) = listener.accept().await.unwrap();
            script(Connection::new(stream, peer, FrameCodec::default())).await;
        });
        addr
    }

    async fn next_request(conn: &mut Connection) -> Request {
        Request::try_from(conn.read_frame().await.unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn times_out_against_a_silent_server() {
        let addr = fake_server(|mut conn| async move {
            // Read and never answer.
            while let Ok(Some(_)) = conn.read_frame().await {}
        })
        .await;
        let mut session = Session::connect(addr, Duration::from_millis(100)).await.unwrap();

        let res = session.execute("count", vec![]).await;

        assert!(matches!(res, Err(ClientError::Timeout(_))));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn late_answer_to_a_timed_out_request_is_discarded() {
        let addr = fake_server(|mut conn| async move {
            let first = next_request(&mut conn).await;
            let second = next_request(&mut conn).await;
            for (request, count) in [(first, 1), (second, 2)] {
                let response = Response::ok("counted", Some(Frame::Integer(count)))
                    .with_token(request.token);
                conn.write_frame(response.into_frame()).await.unwrap();
            }
        })
        .await;
        let mut session = Session::connect(addr, Duration::from_millis(100)).await.unwrap();

        let first = session.execute("count", vec![]).await;
        let second = session.execute("count", vec![]).await.unwrap();

        assert!(matches!(first, Err(ClientError::Timeout(_))));
        assert_eq!(second.payload, Some(Frame::Integer(2)));
    }

    #[tokio::test]
    async fn malformed_answer_closes_the_session() {
        let addr = fake_server(|mut conn| async move {
            next_request(&mut conn).await;
            conn.write_frame(Response::malformed().into_frame()).await.unwrap();
        })
        .await;
        let mut session = Session::connect(addr, Duration::from_secs(5)).await.unwrap();

        let res = session.execute("count", vec![]).await.unwrap();

        assert_eq!(res.status, Status::MalformedMessage);
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.execute("count", vec![]).await,
            Err(ClientError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn server_hanging_up() {
        let addr = fake_server(|mut conn| async move {
            next_request(&mut conn).await;
        })
        .await;
        let mut session = Session::connect(addr, Duration::from_secs(5)).await.unwrap();

        let res = session.execute("count", vec![]).await;

        assert!(matches!(res, Err(ClientError::Disconnected)));
        assert_eq!(session.state(), SessionState::Closed);
    }
}
