//! Transport Layer Abstraction
//!
//! The pool and executor only see [`Transport`] and [`Connection`], so the
//! same code runs against a real editor host over TCP and against in-memory
//! transports in tests.

use async_trait::async_trait;
use std::fmt::Debug;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::RemoteConfig;
use crate::constants::defaults;

/// Opens connections to one remote host
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Open a new exclusively-owned connection
    async fn connect(&self) -> io::Result<Box<dyn Connection>>;

    /// Human readable endpoint, used in logs and error text
    fn describe(&self) -> String;
}

/// One open, exclusively-owned transport handle
#[async_trait]
pub trait Connection: Send + Debug {
    /// Write the full buffer
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Append whatever is available to `buf`; `Ok(0)` means the peer closed
    async fn receive(&mut self, buf: &mut Vec<u8>) -> io::Result<usize>;
}

/// TCP transport to the editor host
#[derive(Debug, Clone)]
pub struct TcpTransport {
    address: String,
    connect_timeout: Duration,
}

impl TcpTransport {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    pub fn from_config(config: &RemoteConfig) -> Self {
        Self::new(config.address(), config.connection_timeout())
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self) -> io::Result<Box<dyn Connection>> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "connect to {} timed out after {}ms",
                        self.address,
                        self.connect_timeout.as_millis()
                    ),
                )
            })??;
        stream.set_nodelay(true)?;

        Ok(Box::new(TcpConnection {
            stream,
            peer: self.address.clone(),
        }))
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.address)
    }
}

/// TCP connection wrapper
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: String,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await
    }

    async fn receive(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        let mut chunk = [0u8; defaults::READ_CHUNK_BYTES];
        let read = self.stream.read(&mut chunk).await?;
        buf.extend_from_slice(&chunk[..read]);
        tracing::trace!(peer = %self.peer, bytes = read, "Received response chunk");
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = socket.into_split();
            let mut line = String::new();
            BufReader::new(reader).read_line(&mut line).await.unwrap();
            writer.write_all(line.trim_end().as_bytes()).await.unwrap();
        });

        let transport = TcpTransport::new(address, Duration::from_secs(2));
        let mut connection = transport.connect().await.unwrap();
        connection.send(b"{\"type\":\"ping\"}\n").await.unwrap();

        let mut buf = Vec::new();
        while connection.receive(&mut buf).await.unwrap() > 0 {}
        assert_eq!(buf, b"{\"type\":\"ping\"}");
    }

    #[tokio::test]
    async fn test_connect_refused_is_io_error() {
        // Bind then drop to obtain a port with no listener
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let transport = TcpTransport::new(address.clone(), Duration::from_secs(2));
        assert!(transport.connect().await.is_err());
        assert_eq!(transport.describe(), format!("tcp://{address}"));
    }
}
