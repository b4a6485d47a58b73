use futures::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::codec::Framed;
use tracing::debug;
use uuid::Uuid;

use crate::codec::{CodecError, FrameCodec};
use crate::frame::Frame;

/// A TCP stream that reads and writes whole frames. Used on both ends of the protocol.
pub struct Connection {
    pub id: Uuid,
    pub peer: SocketAddr,
    // Bytes are read from the socket into the codec's buffer; a frame is removed from it once it
    // is complete, so a cancelled read never loses data.
    framed: Framed<TcpStream, FrameCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr, codec: FrameCodec) -> Connection {
        Connection {
            id: Uuid::new_v4(),
            peer,
            framed: Framed::new(stream, codec),
        }
    }

    /// Waits for the next frame. `None` means the peer closed the connection between frames.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, CodecError> {
        self.framed.next().await.transpose()
    }

    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), CodecError> {
        self.framed.send(frame).await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.framed.get_mut().shutdown().await
    }

    /// Shuts down the write half, then discards whatever the peer still sends until it hangs up
    /// or `grace` elapses. Dropping a socket with unread input resets it, and a reset can
    /// destroy the last frame before the peer reads it.
    pub async fn close(&mut self, grace: Duration) -> io::Result<()> {
        let stream = self.framed.get_mut();
        stream.shutdown().await?;

        let mut buf = [0u8; 4096];
        let drain = async {
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        };
        if time::timeout(grace, drain).await.is_err() {
            debug!("Peer {} still sending after {:?}, dropping it", self.peer, grace);
        }

        Ok(())
    }
}
