//! # Yeelight Control Library
//!
//! `yeelight-control-lib` is a Rust library for controlling smart lights on the local
//! network that speak a line based JSON protocol over TCP and announce themselves
//! over multicast.
//!
//! This library is designed to be used by command-line tools or other client applications
//! that require control over LAN lights.
//!
//! ## Features
//!
//! - Device discovery on local networks
//! - Sessions with typed commands for power, brightness and color
//! - Property queries with reply correlation
//! - Music mode, where the light connects back and commands are not rate limited
//!
//! ## Example
//!
//! Here is a simple example of how to use the library to discover lights on your network
//! and switch them on:
//!
//! ```no_run
//! use std::time::Duration;
//! use yeelight_control_lib::util::constants::MIN_DURATION;
//! use yeelight_control_lib::util::discovery::Discovery;
//! use yeelight_control_lib::util::params::{Effect, PowerState};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Discover devices with a 5-second timeout
//!     let devices = Discovery::find_devices(Duration::from_secs(5)).await?;
//!
//!     for device in devices {
//!         println!("Found device: {}", device);
//!         let mut session = device.into_session();
//!         session.connect().await?;
//!         session
//!             .set_power(PowerState::On, MIN_DURATION, Effect::Sudden)
//!             .await?;
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Disclaimer
//!
//! This project is not affiliated with, authorized by, endorsed by, or in any way officially connected
//! with Yeelight or its affiliates.
//!
//! ## License
//!
//! This project is dual-licensed under the MIT License and the Apache License, Version 2.0.
//! You may choose to use either license, depending on your project needs.

// The `error` module holds the error type every fallible operation returns.
pub mod error;

// The `session` module provides the connection to one light. It encodes commands,
// correlates replies and switches the connection into music mode.
//
// Example usage:
//
// ```
// use yeelight_control_lib::session::{Endpoint, Session};
//
// #[tokio::main]
// async fn main() {
//     let mut session = Session::new(Endpoint::with_default_port("192.168.1.100".parse().unwrap()));
//     session.connect().await.unwrap();
//     let power = session.get_properties(&["power"]).await.unwrap();
// }
// ```
pub mod session;

// The `util` module provides the pieces the session is built from and device
// discovery: the command envelope, parameter tokens and protocol constants.
//
// Example usage:
//
// ```
// use yeelight_control_lib::util::discovery::{Discovery, DiscoveryOptions};
//
// #[tokio::main]
// async fn main() {
//     let devices = Discovery::discover_devices(&DiscoveryOptions::default()).await.unwrap();
//     for device in devices {
//         println!("Found device: {}", device);
//     }
// }
// ```
pub mod util;

pub use error::{Error, ProtocolError, Result};
pub use session::{ConnectionMode, Endpoint, Session, SessionOptions};
