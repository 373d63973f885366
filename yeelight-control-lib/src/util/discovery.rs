use std::cmp::max;
use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use derivative::Derivative;
use log::{debug, info, warn};
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use url::{Host, Url};

use crate::error::{Error, Result};
use crate::session::{Endpoint, Session};
use crate::util::constants::{
    DEFAULT_COMMAND_PORT, DEFAULT_DISCOVERY_TIMEOUT, DISCOVERY_MULTICAST_ADDRESS, DISCOVERY_PORT,
    DISCOVERY_SEARCH_MESSAGE,
};

/// A light that answered a search, not connected yet.
#[derive(Derivative)]
#[derivative(Hash, PartialEq, Eq)]
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    pub endpoint: Endpoint,

    /// The raw `Location` header value.
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub location: String,

    /// Where the reply came from.
    #[derivative(Hash = "ignore", PartialEq = "ignore")]
    pub source: IpAddr,
}

impl DiscoveredDevice {
    pub fn into_session(self) -> Session {
        Session::new(self.endpoint)
    }
}

impl Display for DiscoveredDevice {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.endpoint, self.location)
    }
}

/// How to search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// How long to wait for the next reply before a probe's window closes.
    pub receive_timeout: Duration,
    /// How many search requests to send, one after the other's window closed.
    pub probe_count: u32,
    /// Name of the interface to search on. Without one the first interface
    /// that can join the multicast group is used.
    pub interface: Option<String>,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        DiscoveryOptions {
            receive_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            probe_count: 1,
            interface: None,
        }
    }
}

/// Collects the replies of one discovery run, one device per source address.
#[derive(Debug, Default)]
pub struct ReplyCollector {
    devices: HashMap<IpAddr, DiscoveredDevice>,
}

impl ReplyCollector {
    /// Records a reply. Returns true if it named a device from a new source.
    pub fn record(&mut self, source: IpAddr, datagram: &[u8]) -> bool {
        if self.devices.contains_key(&source) {
            debug!("Found {} again, skipping", source);
            return false;
        }
        match Discovery::decode_discovery_response(datagram, source) {
            Some(device) => {
                info!("Found device: {}", device);
                self.devices.insert(source, device);
                true
            }
            None => {
                debug!("Ignoring datagram without a usable location from {}", source);
                false
            }
        }
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn into_devices(self) -> HashSet<DiscoveredDevice> {
        self.devices.into_values().collect()
    }
}

pub struct Discovery;

impl Discovery {
    /// Searches with default options and the given per-reply timeout.
    pub async fn find_devices(given_timeout: Duration) -> Result<HashSet<DiscoveredDevice>> {
        Self::discover_devices(&DiscoveryOptions {
            receive_timeout: given_timeout,
            ..DiscoveryOptions::default()
        })
        .await
    }

    /**
    Sends search requests to the multicast group and collects the lights that answer.

    Every probe waits for replies until none arrived for `receive_timeout`. Replies
    from a source address already seen are skipped, replies without a usable
    `Location` header are ignored.

    Fails with [`Error::DiscoveryUnavailable`] if no interface can join the group.
     */
    pub async fn discover_devices(options: &DiscoveryOptions) -> Result<HashSet<DiscoveredDevice>> {
        if options.probe_count == 0 {
            debug!("No probes requested, skipping discovery");
            return Ok(HashSet::new());
        }

        let socket = Self::open_multicast_socket(options.interface.as_deref())?;
        let group = SocketAddr::from((DISCOVERY_MULTICAST_ADDRESS, DISCOVERY_PORT));
        let mut collector = ReplyCollector::default();
        let mut buffer = [0; 2048];

        for probe in 1..=options.probe_count {
            socket.send_to(DISCOVERY_SEARCH_MESSAGE, group).await?;
            debug!("Sent search request {}/{}", probe, options.probe_count);

            loop {
                match timeout(options.receive_timeout, socket.recv_from(&mut buffer)).await {
                    Ok(Ok((number_of_bytes, src_addr))) => {
                        collector.record(src_addr.ip(), &buffer[..number_of_bytes]);
                    }
                    Ok(Err(e)) => {
                        warn!("Failed to receive discovery reply: {}", e);
                        break;
                    }
                    Err(_) => {
                        debug!(
                            "Search request {}/{} complete, {} device(s) so far",
                            probe,
                            options.probe_count,
                            collector.len()
                        );
                        break;
                    }
                }
            }
        }

        if collector.is_empty() {
            info!("Discovery complete without results. If devices are missing, try increasing the search timeout.");
        }
        Ok(collector.into_devices())
    }

    /// Reads the device endpoint from a reply's `Location` header.
    pub fn decode_discovery_response(data: &[u8], source: IpAddr) -> Option<DiscoveredDevice> {
        let text = String::from_utf8_lossy(data);
        let location = text.lines().find_map(location_value)?;
        let endpoint = endpoint_from_location(location, source)?;
        Some(DiscoveredDevice {
            endpoint,
            location: location.to_string(),
            source,
        })
    }

    fn open_multicast_socket(interface: Option<&str>) -> Result<UdpSocket> {
        let candidates = multicast_candidates(interface);
        if candidates.is_empty() {
            return Err(Error::DiscoveryUnavailable(match interface {
                Some(name) => format!("interface {} is not up with multicast and IPv4", name),
                None => "no multicast capable interface with an IPv4 address is up".to_string(),
            }));
        }

        let socket = bind_discovery_socket()?;
        let (name, address) = join_group(&socket, &candidates).ok_or_else(|| {
            Error::DiscoveryUnavailable(format!(
                "no interface could join {}",
                DISCOVERY_MULTICAST_ADDRESS
            ))
        })?;
        info!("Searching on {} ({})", name, address);

        socket.set_multicast_loop_v4(false)?;
        socket.set_nonblocking(true)?;
        Ok(UdpSocket::from_std(socket.into())?)
    }

    pub fn pretty_print_devices(devices: &HashSet<DiscoveredDevice>) {
        // Determine the maximum width for each column
        let max_address_width = devices
            .iter()
            .map(|d| d.endpoint.address.to_string().len())
            .max()
            .unwrap_or(0)
            .max("Address".len());
        let max_port_width = "Port".len();
        let max_location_width = devices
            .iter()
            .map(|d| max(d.location.len(), 20))
            .max()
            .unwrap_or(0);

        println!(
            "{:<address_width$} {:<port_width$} {:<location_width$}",
            "Address",
            "Port",
            "Location",
            address_width = max_address_width + 2,
            port_width = max_port_width + 2,
            location_width = max_location_width + 2,
        );
        println!(
            "{:<address_width$} {:<port_width$} {:<location_width$}",
            "-".repeat(max_address_width),
            "-".repeat(max_port_width),
            "-".repeat(max_location_width),
            address_width = max_address_width + 2,
            port_width = max_port_width + 2,
            location_width = max_location_width + 2,
        );

        let mut devices: Vec<&DiscoveredDevice> = devices.iter().collect();
        devices.sort_by_key(|d| d.endpoint);
        for device in devices {
            println!(
                "{:<address_width$} {:<port_width$} {:<location_width$}",
                device.endpoint.address,
                device.endpoint.port,
                device.location,
                address_width = max_address_width + 2,
                port_width = max_port_width + 2,
                location_width = max_location_width + 2,
            );
        }
    }
}

/// The value of a `Location:` header line, the name is matched case-insensitively.
fn location_value(line: &str) -> Option<&str> {
    let (name, value) = line.split_once(':')?;
    if name.trim().eq_ignore_ascii_case("location") {
        Some(value.trim())
    } else {
        None
    }
}

/// Host and port of a location URI like `yeelight://192.168.1.239:55443`.
///
/// Without an explicit port the command port is used. Host names are not
/// resolved, the reply's source address stands in for them.
fn endpoint_from_location(location: &str, source: IpAddr) -> Option<Endpoint> {
    let url = Url::parse(location).ok()?;
    let address = match url.host()? {
        Host::Ipv4(address) => IpAddr::V4(address),
        Host::Ipv6(address) => IpAddr::V6(address),
        Host::Domain(domain) => domain.parse().unwrap_or_else(|_| {
            debug!("Location host {} is not an address, using {}", domain, source);
            source
        }),
    };
    let port = url.port().unwrap_or(DEFAULT_COMMAND_PORT);
    Some(Endpoint::new(address, port))
}

/// What discovery needs to know about a network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
struct InterfaceInfo {
    name: String,
    index: u32,
    up: bool,
    multicast: bool,
    loopback: bool,
    ipv4: Vec<Ipv4Addr>,
}

impl From<pnet_datalink::NetworkInterface> for InterfaceInfo {
    fn from(iface: pnet_datalink::NetworkInterface) -> Self {
        InterfaceInfo {
            up: iface.is_up(),
            multicast: iface.is_multicast(),
            loopback: iface.is_loopback(),
            ipv4: iface
                .ips
                .iter()
                .filter_map(|network| match network.ip() {
                    IpAddr::V4(address) => Some(address),
                    IpAddr::V6(_) => None,
                })
                .collect(),
            name: iface.name,
            index: iface.index,
        }
    }
}

/// An interface may join the group if it is up, multicast capable and has an
/// IPv4 address. Without a name, loopback is skipped; a named interface may be
/// loopback.
fn is_multicast_candidate(iface: &InterfaceInfo, name: Option<&str>) -> bool {
    let selected = match name {
        Some(name) => iface.name == name,
        None => !iface.loopback,
    };
    selected && iface.up && iface.multicast && iface.index != 0 && !iface.ipv4.is_empty()
}

/// IPv4 addresses of the interfaces that may join the group, in interface order.
fn multicast_candidates(interface: Option<&str>) -> Vec<(String, Ipv4Addr)> {
    pnet_datalink::interfaces()
        .into_iter()
        .map(InterfaceInfo::from)
        .filter(|iface| {
            let usable = is_multicast_candidate(iface, interface);
            if !usable && interface.map_or(false, |name| iface.name == name) {
                debug!(
                    "{} is not usable (up: {}, multicast: {}, IPv4: {:?})",
                    iface.name, iface.up, iface.multicast, iface.ipv4
                );
            }
            usable
        })
        .flat_map(|iface| {
            let name = iface.name;
            iface
                .ipv4
                .into_iter()
                .map(move |address| (name.clone(), address))
        })
        .collect()
}

/// Binds the discovery port so advertisements sent to the group arrive too. If
/// another process holds it exclusively, a free port still gets the replies.
fn bind_discovery_socket() -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    let discovery_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DISCOVERY_PORT);
    if let Err(e) = socket.bind(&discovery_addr.into()) {
        warn!(
            "Cannot bind {}, advertisements will be missed: {}",
            discovery_addr, e
        );
        socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0).into())?;
    }
    Ok(socket)
}

/// Joins the group on the first candidate that accepts and sends through it.
fn join_group(socket: &Socket, candidates: &[(String, Ipv4Addr)]) -> Option<(String, Ipv4Addr)> {
    for (name, address) in candidates {
        if let Err(e) = socket.join_multicast_v4(&DISCOVERY_MULTICAST_ADDRESS, address) {
            debug!("{} ({}) cannot join the group: {}", name, address, e);
            continue;
        }
        if let Err(e) = socket.set_multicast_if_v4(address) {
            debug!("{} ({}) cannot send to the group: {}", name, address, e);
            let _ = socket.leave_multicast_v4(&DISCOVERY_MULTICAST_ADDRESS, address);
            continue;
        }
        return Some((name.clone(), *address));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &[u8] = b"HTTP/1.1 200 OK\r\n\
        Cache-Control: max-age=3600\r\n\
        Date: \r\n\
        Ext: \r\n\
        Location: yeelight://192.168.1.239:55443\r\n\
        Server: POSIX UPnP/1.0 YGLC/1\r\n\
        id: 0x000000000015243f\r\n\
        model: color\r\n\
        power: on\r\n\
        bright: 100\r\n";

    fn source(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(192, 168, 1, last))
    }

    #[test]
    fn test_decode_reply() {
        let device = Discovery::decode_discovery_response(REPLY, source(239)).unwrap();
        assert_eq!(
            device.endpoint,
            Endpoint::new("192.168.1.239".parse().unwrap(), 55443)
        );
        assert_eq!(device.location, "yeelight://192.168.1.239:55443");
        assert_eq!(device.source, source(239));
    }

    #[test]
    fn test_location_without_port_uses_command_port() {
        let reply = b"HTTP/1.1 200 OK\r\nLocation: yeelight://192.168.1.20\r\n";
        let device = Discovery::decode_discovery_response(reply, source(20)).unwrap();
        assert_eq!(device.endpoint.port, DEFAULT_COMMAND_PORT);

        let reply = b"HTTP/1.1 200 OK\r\nLocation: http://192.168.1.20:80/desc.xml\r\n";
        let device = Discovery::decode_discovery_response(reply, source(20)).unwrap();
        assert_eq!(device.endpoint.port, DEFAULT_COMMAND_PORT);
    }

    #[test]
    fn test_location_header_is_case_insensitive() {
        let reply = b"NOTIFY * HTTP/1.1\r\nLOCATION:yeelight://192.168.1.21:1234\r\n";
        let device = Discovery::decode_discovery_response(reply, source(21)).unwrap();
        assert_eq!(
            device.endpoint,
            Endpoint::new("192.168.1.21".parse().unwrap(), 1234)
        );
    }

    #[test]
    fn test_location_with_ipv6_and_host_name() {
        let reply = b"HTTP/1.1 200 OK\r\nLocation: yeelight://[fe80::1]:55443\r\n";
        let device = Discovery::decode_discovery_response(reply, source(1)).unwrap();
        assert_eq!(device.endpoint.address, "fe80::1".parse::<IpAddr>().unwrap());

        let reply = b"HTTP/1.1 200 OK\r\nLocation: yeelight://bulb.local:55443\r\n";
        let device = Discovery::decode_discovery_response(reply, source(30)).unwrap();
        assert_eq!(device.endpoint.address, source(30));
    }

    #[test]
    fn test_noise_is_ignored() {
        let search = DISCOVERY_SEARCH_MESSAGE;
        assert!(Discovery::decode_discovery_response(search, source(2)).is_none());
        assert!(Discovery::decode_discovery_response(b"\x00\x01\xff", source(2)).is_none());
        let bad_uri = b"HTTP/1.1 200 OK\r\nLocation: not a uri\r\n";
        assert!(Discovery::decode_discovery_response(bad_uri, source(2)).is_none());
    }

    #[test]
    fn test_collector_dedups_by_source() {
        let mut collector = ReplyCollector::default();
        assert!(collector.record(source(239), REPLY));
        let moved = b"HTTP/1.1 200 OK\r\nLocation: yeelight://192.168.1.240:55443\r\n";
        assert!(!collector.record(source(239), moved));
        assert!(!collector.record(source(239), REPLY));

        let devices = collector.into_devices();
        assert_eq!(devices.len(), 1);
        let device = devices.into_iter().next().unwrap();
        assert_eq!(device.endpoint.address, source(239));
    }

    #[test]
    fn test_collector_noise_does_not_claim_source() {
        let mut collector = ReplyCollector::default();
        assert!(!collector.record(source(239), b"HTTP/1.1 200 OK\r\nServer: x\r\n"));
        assert!(collector.is_empty());
        assert!(collector.record(source(239), REPLY));

        let other = b"HTTP/1.1 200 OK\r\nLocation: yeelight://192.168.1.50:55443\r\n";
        assert!(collector.record(source(50), other));
        assert_eq!(collector.len(), 2);
    }

    #[test]
    fn test_discovered_device_identity_is_endpoint() {
        let a = Discovery::decode_discovery_response(REPLY, source(239)).unwrap();
        let mut b = a.clone();
        b.location = "yeelight://192.168.1.239".to_string();
        b.source = source(1);
        assert_eq!(a, b);

        let session = a.into_session();
        assert_eq!(session.endpoint().port, 55443);
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn test_zero_probes_finds_nothing() {
        let options = DiscoveryOptions {
            probe_count: 0,
            ..DiscoveryOptions::default()
        };
        assert!(Discovery::discover_devices(&options).await.unwrap().is_empty());
    }

    fn interface(name: &str) -> InterfaceInfo {
        InterfaceInfo {
            name: name.to_string(),
            index: 2,
            up: true,
            multicast: true,
            loopback: false,
            ipv4: vec![Ipv4Addr::new(192, 168, 1, 10)],
        }
    }

    #[test]
    fn test_multicast_candidate_accepts_usable_interface() {
        let eth = interface("eth0");
        assert!(is_multicast_candidate(&eth, None));
        assert!(is_multicast_candidate(&eth, Some("eth0")));
        assert!(!is_multicast_candidate(&eth, Some("wlan0")));
    }

    #[test]
    fn test_multicast_candidate_rejects_down_interface() {
        let down = InterfaceInfo {
            up: false,
            ..interface("eth0")
        };
        assert!(!is_multicast_candidate(&down, None));
        assert!(!is_multicast_candidate(&down, Some("eth0")));
    }

    #[test]
    fn test_multicast_candidate_rejects_interface_without_multicast() {
        let tunnel = InterfaceInfo {
            multicast: false,
            ..interface("tun0")
        };
        assert!(!is_multicast_candidate(&tunnel, None));
        assert!(!is_multicast_candidate(&tunnel, Some("tun0")));
    }

    #[test]
    fn test_multicast_candidate_needs_ipv4_and_index() {
        let v6_only = InterfaceInfo {
            ipv4: Vec::new(),
            ..interface("eth0")
        };
        assert!(!is_multicast_candidate(&v6_only, None));
        let no_index = InterfaceInfo {
            index: 0,
            ..interface("eth0")
        };
        assert!(!is_multicast_candidate(&no_index, None));
    }

    #[test]
    fn test_loopback_only_when_named() {
        let lo = InterfaceInfo {
            loopback: true,
            ipv4: vec![Ipv4Addr::LOCALHOST],
            ..interface("lo")
        };
        assert!(!is_multicast_candidate(&lo, None));
        assert!(is_multicast_candidate(&lo, Some("lo")));
    }

    #[tokio::test]
    async fn test_unknown_interface_is_unavailable() {
        let options = DiscoveryOptions {
            receive_timeout: Duration::from_millis(10),
            probe_count: 1,
            interface: Some("no-such-interface-0".to_string()),
        };
        assert!(matches!(
            Discovery::discover_devices(&options).await,
            Err(Error::DiscoveryUnavailable(_))
        ));
    }
}
