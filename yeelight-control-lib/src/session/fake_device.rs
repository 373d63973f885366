//! An in-process stand-in for a light, listening on loopback.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use super::Endpoint;

const WAIT: Duration = Duration::from_secs(5);

pub(crate) struct FakeDevice {
    listener: TcpListener,
}

impl FakeDevice {
    pub(crate) async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        FakeDevice { listener }
    }

    /// A loopback endpoint nobody listens on.
    pub(crate) async fn unused_endpoint() -> Endpoint {
        let device = FakeDevice::start().await;
        device.endpoint()
    }

    pub(crate) fn endpoint(&self) -> Endpoint {
        self.listener.local_addr().unwrap().into()
    }

    pub(crate) async fn accept(&self) -> Peer {
        let (stream, _) = timeout(WAIT, self.listener.accept())
            .await
            .expect("session never connected")
            .unwrap();
        Peer::new(stream)
    }
}

/// The light's side of one connection.
pub(crate) struct Peer {
    reader: BufReader<TcpStream>,
}

impl Peer {
    fn new(stream: TcpStream) -> Self {
        Peer {
            reader: BufReader::new(stream),
        }
    }

    /// Opens a connection the way a light does when it enters music mode.
    pub(crate) async fn connect(addr: SocketAddr) -> Self {
        Peer::new(TcpStream::connect(addr).await.unwrap())
    }

    pub(crate) async fn read_line(&mut self) -> String {
        let mut line = String::new();
        timeout(WAIT, self.reader.read_line(&mut line))
            .await
            .expect("session sent nothing")
            .unwrap();
        line
    }

    /// True if no line arrives within `wait`.
    pub(crate) async fn is_silent_for(&mut self, wait: Duration) -> bool {
        let mut line = String::new();
        timeout(wait, self.reader.read_line(&mut line)).await.is_err()
    }

    pub(crate) async fn write(&mut self, bytes: &[u8]) {
        self.reader.get_mut().write_all(bytes).await.unwrap();
    }
}

pub(crate) fn parse_command(line: &str) -> Value {
    serde_json::from_str(line.trim_end()).unwrap()
}
