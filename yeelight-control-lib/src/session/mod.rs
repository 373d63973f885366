use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use bytes::BytesMut;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Instant};

use crate::error::{Error, ProtocolError, Result};
use crate::util::command::{value_to_string, Command, Response};
use crate::util::constants::{
    DEFAULT_COMMAND_PORT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RESPONSE_TIMEOUT, MAX_BRIGHTNESS,
    MIN_BRIGHTNESS, MIN_DURATION_MS,
};
use crate::util::params::{quoted, Effect, PowerState};

#[cfg(test)]
mod fake_device;
mod streaming;

/// Replies longer than this without a line break are treated as garbage.
const MAX_RESPONSE_LEN: usize = 64 * 1024;

/// Where a light accepts commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: IpAddr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Endpoint { address, port }
    }

    /// An endpoint on the standard command port.
    pub fn with_default_port(address: IpAddr) -> Self {
        Endpoint::new(address, DEFAULT_COMMAND_PORT)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", SocketAddr::from(*self))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Endpoint::new(addr.ip(), addr.port())
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        SocketAddr::new(endpoint.address, endpoint.port)
    }
}

/// Bounds for the waits a session does on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long [`Session::connect`] waits for the TCP handshake.
    pub connect_timeout: Duration,
    /// How long [`Session::get_properties`] waits for the reply.
    pub response_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// What the owned connection is currently used for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Request/response commands on a connection we opened.
    #[default]
    Normal,
    /// `set_music` was sent, waiting for the light to connect back.
    AwaitingHandoff,
    /// Music mode: the light opened the connection and commands are not rate limited.
    Streaming,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode_str = match self {
            ConnectionMode::Normal => "normal",
            ConnectionMode::AwaitingHandoff => "awaiting handoff",
            ConnectionMode::Streaming => "music",
        };
        write!(f, "{}", mode_str)
    }
}

/// A connection to one light.
///
/// A session starts disconnected. It owns at most one socket at a time, and
/// [`ConnectionMode::Streaming`] is only ever reported while that socket is open.
#[derive(Debug)]
pub struct Session {
    endpoint: Endpoint,
    options: SessionOptions,
    connection: Option<TcpStream>,
    mode: ConnectionMode,
    next_id: u32,
}

impl Session {
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_options(endpoint, SessionOptions::default())
    }

    pub fn with_options(endpoint: Endpoint, options: SessionOptions) -> Self {
        Session {
            endpoint,
            options,
            connection: None,
            mode: ConnectionMode::Normal,
            next_id: 1,
        }
    }

    /// Creates a session for a host name or an IP literal.
    pub async fn resolve(host: &str, port: u16) -> Result<Self> {
        if let Ok(address) = host.parse::<IpAddr>() {
            return Ok(Session::new(Endpoint::new(address, port)));
        }
        let address = lookup_host((host, port))
            .await
            .map_err(|e| {
                debug!("Lookup of {} failed: {}", host, e);
                Error::InvalidHostname(host.to_string())
            })?
            .next()
            .ok_or_else(|| Error::InvalidHostname(host.to_string()))?;
        Ok(Session::new(address.into()))
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Changes where the next [`Session::connect`] goes. An open connection is left alone.
    pub fn set_endpoint(&mut self, endpoint: Endpoint) {
        self.endpoint = endpoint;
    }

    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Opens the command connection, replacing any connection held so far.
    pub async fn connect(&mut self) -> Result<()> {
        self.release_connection();

        let addr = SocketAddr::from(self.endpoint);
        let stream = match timeout(self.options.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::Connection(format!(
                    "Failed to connect to {}: {}",
                    addr, e
                )))
            }
            Err(_) => {
                return Err(Error::Connection(format!(
                    "Failed to connect to {}: no answer within {:?}",
                    addr, self.options.connect_timeout
                )))
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Could not disable Nagle's algorithm for {}: {}", addr, e);
        }

        info!("Connected to {}", addr);
        self.connection = Some(stream);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn is_streaming_mode(&self) -> bool {
        self.mode == ConnectionMode::Streaming && self.is_connected()
    }

    /// Closes the connection. Fails if there is none, closing twice is an error.
    pub fn close_connection(&mut self) -> Result<()> {
        self.ensure_connected()?;
        self.release_connection();
        info!("Closed connection to {}", self.endpoint);
        Ok(())
    }

    /// Sets the brightness in percent.
    ///
    /// # Arguments
    /// - `brightness`: Range is 0..100.
    /// - `duration`: Length of a smooth effect, at least 30ms.
    ///
    /// Returns whether the whole command was written.
    pub async fn set_brightness(
        &mut self,
        brightness: i32,
        duration: Duration,
        effect: Effect,
    ) -> Result<bool> {
        let duration_ms = validate_duration(duration)?;
        if !(MIN_BRIGHTNESS..=MAX_BRIGHTNESS).contains(&brightness) {
            return Err(Error::out_of_range(
                "brightness",
                i64::from(brightness),
                i64::from(MIN_BRIGHTNESS),
                i64::from(MAX_BRIGHTNESS),
            ));
        }
        self.ensure_connected()?;
        self.send_command(
            "set_bright",
            vec![
                brightness.to_string(),
                effect.wire_token(),
                duration_ms.to_string(),
            ],
        )
        .await
    }

    pub async fn set_power(
        &mut self,
        state: PowerState,
        duration: Duration,
        effect: Effect,
    ) -> Result<bool> {
        let duration_ms = validate_duration(duration)?;
        self.ensure_connected()?;
        self.send_command(
            "set_power",
            vec![
                state.wire_token(),
                effect.wire_token(),
                duration_ms.to_string(),
            ],
        )
        .await
    }

    /// Sets the color. The light takes the channels packed into one integer, `0xRRGGBB`.
    pub async fn set_color(
        &mut self,
        red: u8,
        green: u8,
        blue: u8,
        duration: Duration,
        effect: Effect,
    ) -> Result<bool> {
        let duration_ms = validate_duration(duration)?;
        self.ensure_connected()?;
        self.send_command(
            "set_rgb",
            vec![
                pack_rgb(red, green, blue).to_string(),
                effect.wire_token(),
                duration_ms.to_string(),
            ],
        )
        .await
    }

    /// Reads properties like `power` or `bright`, in the order they were asked for.
    pub async fn get_properties<S: AsRef<str>>(&mut self, names: &[S]) -> Result<Vec<String>> {
        self.ensure_connected()?;
        self.discard_pending_input()?;

        let params = names.iter().map(|name| quoted(name.as_ref())).collect();
        let command = Command::new(self.next_command_id(), "get_prop", params);
        if !self.send(&command).await? {
            // A torn line would be glued to whatever we send next.
            self.release_connection();
            return Err(Error::Connection(format!(
                "get_prop was not fully written to {}",
                self.endpoint
            )));
        }

        let response = self.read_response(command.id).await?;
        let values = response.into_result()?;
        Ok(values.into_iter().map(value_to_string).collect())
    }

    /// Sends any method without waiting for a reply. Parameters must already be
    /// rendered, see [`quoted`].
    ///
    /// Returns whether the whole command was written.
    pub async fn send_command(&mut self, method: &str, params: Vec<String>) -> Result<bool> {
        let command = Command::new(self.next_command_id(), method, params);
        self.send(&command).await
    }

    async fn send(&mut self, command: &Command) -> Result<bool> {
        let stream = self.connection.as_mut().ok_or(Error::NotConnected)?;
        let payload = command.encode();
        debug!("Sending to {}: {}", self.endpoint, payload.trim_end());

        // One write, like a datagram: a short write is reported, not completed.
        let written = match stream.write(payload.as_bytes()).await {
            Ok(written) => written,
            Err(e) => {
                self.release_connection();
                return Err(e.into());
            }
        };
        if written != payload.len() {
            warn!(
                "Only {} of {} bytes of {} were written to {}",
                written,
                payload.len(),
                command.method,
                self.endpoint
            );
        }
        Ok(written == payload.len())
    }

    /// Drops whatever the light sent since the last exchange.
    fn discard_pending_input(&mut self) -> Result<()> {
        let stream = self.connection.as_ref().ok_or(Error::NotConnected)?;
        let mut scratch = [0u8; 1024];
        let mut discarded = 0;
        loop {
            match stream.try_read(&mut scratch) {
                Ok(0) => {
                    self.release_connection();
                    return Err(Error::Connection(format!(
                        "{} closed the connection",
                        self.endpoint
                    )));
                }
                Ok(read) => discarded += read,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.release_connection();
                    return Err(e.into());
                }
            }
        }
        if discarded > 0 {
            debug!("Discarded {} stale bytes from {}", discarded, self.endpoint);
        }
        Ok(())
    }

    /// Reads lines until the reply to `id` shows up.
    async fn read_response(&mut self, id: u32) -> Result<Response> {
        let deadline = Instant::now() + self.options.response_timeout;
        let mut buffer = BytesMut::with_capacity(1024);

        loop {
            while let Some(end) = buffer.iter().position(|byte| *byte == b'\n') {
                let line = buffer.split_to(end + 1);
                let line = String::from_utf8_lossy(&line);
                if let Some(response) = Response::match_line(&line, id)? {
                    return Ok(response);
                }
                if !line.trim().is_empty() {
                    debug!("Skipping message from {}: {}", self.endpoint, line.trim());
                }
            }
            if buffer.len() > MAX_RESPONSE_LEN {
                return Err(ProtocolError::Malformed(format!(
                    "no line break in {} bytes",
                    buffer.len()
                ))
                .into());
            }

            let stream = self.connection.as_mut().ok_or(Error::NotConnected)?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            let read = match timeout(remaining, stream.read_buf(&mut buffer)).await {
                Ok(Ok(read)) => read,
                Ok(Err(e)) => {
                    self.release_connection();
                    return Err(e.into());
                }
                Err(_) => {
                    return Err(Error::Timeout {
                        what: "waiting for a response",
                        elapsed: self.options.response_timeout,
                    })
                }
            };

            if read == 0 {
                // The light hung up, an unterminated tail is the last chance for the reply.
                self.release_connection();
                let tail = String::from_utf8_lossy(&buffer);
                if let Some(response) = Response::match_line(&tail, id)? {
                    return Ok(response);
                }
                return Err(Error::Connection(format!(
                    "{} closed the connection before replying",
                    self.endpoint
                )));
            }
        }
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Drops the socket, if any, and falls back to normal mode.
    fn release_connection(&mut self) {
        if self.connection.take().is_some() {
            debug!("Released connection to {}", self.endpoint);
        }
        self.mode = ConnectionMode::Normal;
    }

    fn next_command_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.checked_add(1).unwrap_or(1);
        id
    }
}

/// Packs three channels into the `0xRRGGBB` integer the light expects.
pub fn pack_rgb(red: u8, green: u8, blue: u8) -> u32 {
    (u32::from(red) << 16) | (u32::from(green) << 8) | u32::from(blue)
}

fn validate_duration(duration: Duration) -> Result<u64> {
    let duration_ms = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
    if duration_ms < MIN_DURATION_MS {
        return Err(Error::out_of_range(
            "duration",
            duration_ms as i64,
            MIN_DURATION_MS as i64,
            i64::MAX,
        ));
    }
    Ok(duration_ms)
}
