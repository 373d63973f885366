use std::net::Ipv4Addr;
use std::time::Duration;

/// TCP port the lights accept commands on.
pub const DEFAULT_COMMAND_PORT: u16 = 55443;

/// Shortest effect duration the lights accept, in milliseconds.
pub const MIN_DURATION_MS: u64 = 30;

/// Shortest effect duration the lights accept.
pub const MIN_DURATION: Duration = Duration::from_millis(MIN_DURATION_MS);

pub const MIN_BRIGHTNESS: i32 = 0;
pub const MAX_BRIGHTNESS: i32 = 100;

/// Multicast group the lights listen on for search requests and send advertisements to.
pub const DISCOVERY_MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const DISCOVERY_PORT: u16 = 1982;

/// The search request. The lights only answer to `ST: wifi_bulb`.
pub const DISCOVERY_SEARCH_MESSAGE: &[u8] =
    b"M-SEARCH * HTTP/1.1\r\nMAN: \"ssdp:discover\"\r\nST: wifi_bulb\r\n";

/// How long to wait for the next discovery reply before a probe's window closes.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between checks for the light's inbound music mode connection.
pub const HANDOFF_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of checks before the music mode handoff is given up.
pub const HANDOFF_POLL_ATTEMPTS: u32 = 10;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
