//! Music mode, where the light connects back to us.
//!
//! Enabling it is a role reversal: we listen, send `set_music` with our address
//! over the command connection, drop that connection and wait for the light to
//! dial in. The accepted socket then replaces the command connection. Commands
//! sent over it are not rate limited by the light.

use std::net::{IpAddr, SocketAddr};

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use super::{ConnectionMode, Session};
use crate::error::{Error, Result};
use crate::util::constants::{HANDOFF_POLL_ATTEMPTS, HANDOFF_POLL_INTERVAL};
use crate::util::params::quoted;

impl Session {
    /// Switches between normal and music mode.
    ///
    /// Enabling needs an open command connection and listens on
    /// `local_address:local_port` for the light (port 0 picks a free port). If the
    /// light does not connect back within about a second the session is left
    /// disconnected and [`Error::Timeout`] is returned.
    ///
    /// Disabling tells the light to stop, if connected, then reconnects to the
    /// command endpoint.
    pub async fn set_streaming_mode(
        &mut self,
        local_address: IpAddr,
        local_port: u16,
        enable: bool,
    ) -> Result<()> {
        if enable {
            self.enable_streaming_mode(local_address, local_port).await
        } else {
            self.disable_streaming_mode().await
        }
    }

    async fn enable_streaming_mode(&mut self, local_address: IpAddr, local_port: u16) -> Result<()> {
        self.ensure_connected()?;
        if self.is_streaming_mode() {
            return Err(Error::AlreadyInMode("music"));
        }

        let listener = TcpListener::bind((local_address, local_port))
            .await
            .map_err(|e| {
                Error::Connection(format!(
                    "Failed to listen on {}:{}: {}",
                    local_address, local_port, e
                ))
            })?;
        let listen_port = listener.local_addr()?.port();

        let written = self
            .send_command(
                "set_music",
                vec![
                    "1".to_string(),
                    quoted(&local_address.to_string()),
                    listen_port.to_string(),
                ],
            )
            .await;
        // The light dials a new connection, the command connection is done either way.
        self.release_connection();
        match written {
            Ok(true) => {}
            Ok(false) => {
                return Err(Error::Connection(format!(
                    "set_music was not fully written to {}",
                    self.endpoint
                )))
            }
            Err(e) => {
                return Err(Error::Connection(format!(
                    "Failed to send set_music to {}: {}",
                    self.endpoint, e
                )))
            }
        }

        self.mode = ConnectionMode::AwaitingHandoff;
        info!(
            "Waiting for {} to connect to {}:{}",
            self.endpoint, local_address, listen_port
        );
        let accepted = accept_handoff(&listener).await;
        drop(listener);

        match accepted {
            Ok((stream, peer)) => {
                if peer.ip() != self.endpoint.address {
                    warn!(
                        "Music mode connection came from {}, expected {}",
                        peer, self.endpoint.address
                    );
                }
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Could not disable Nagle's algorithm for {}: {}", peer, e);
                }
                self.connection = Some(stream);
                self.mode = ConnectionMode::Streaming;
                info!("{} is in music mode, connected from {}", self.endpoint, peer);
                Ok(())
            }
            Err(e) => {
                self.mode = ConnectionMode::Normal;
                Err(e)
            }
        }
    }

    async fn disable_streaming_mode(&mut self) -> Result<()> {
        if self.is_connected() {
            match self.send_command("set_music", vec!["0".to_string()]).await {
                Ok(true) => {}
                Ok(false) => warn!("set_music was not fully written to {}", self.endpoint),
                Err(e) => warn!("Failed to tell {} to leave music mode: {}", self.endpoint, e),
            }
        }
        self.release_connection();
        self.connect().await?;
        info!("{} is back in normal mode", self.endpoint);
        Ok(())
    }
}

/// Checks the listener every poll interval until the light connects or the attempts run out.
async fn accept_handoff(listener: &TcpListener) -> Result<(TcpStream, SocketAddr)> {
    for attempt in 1..=HANDOFF_POLL_ATTEMPTS {
        match timeout(HANDOFF_POLL_INTERVAL, listener.accept()).await {
            Ok(accepted) => return Ok(accepted?),
            Err(_) => debug!(
                "No music mode connection yet ({}/{})",
                attempt, HANDOFF_POLL_ATTEMPTS
            ),
        }
    }
    Err(Error::Timeout {
        what: "waiting for the light to open the music mode connection",
        elapsed: HANDOFF_POLL_INTERVAL * HANDOFF_POLL_ATTEMPTS,
    })
}
