//! Peer connection state
//!
//! A `Peer` holds the protocol-visible state for one remote node: the
//! negotiated version, advertised services, handshake progress, ban score,
//! and the currently installed Bloom filter.  The transport socket itself is
//! owned by the embedding I/O layer; outbound messages are queued here for
//! that layer to drain.
//!
//! The Bloom-filter slot is the only field with cross-thread write
//! visibility ('filterload' handlers mutate it while outgoing message
//! construction may read it), so it sits behind a lock.  Every other field
//! is written and read from the peer's owning execution context.

use crate::bloom::BloomFilter;
use crate::buffer::SerializedBuffer;
use crate::error::{CoreError, Result};
use crate::message::Message;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Ban score at which a peer is marked for disconnect
pub const MAX_BAN_SCORE: u32 = 100;

/// Prefix mapping an IPv4 address into the IPv6 space on the wire
const IPV6_PREFIX: [u8; 12] = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xff, 0xff];

fn now_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The network location of a peer along with relay bookkeeping
#[derive(Debug, Clone)]
pub struct PeerAddress {
    address: IpAddr,
    port: u16,
    time_seen: u64,
    services: u64,
    connected: bool,
    static_address: bool,
}

impl PeerAddress {
    pub fn new(address: IpAddr, port: u16) -> PeerAddress {
        PeerAddress::with_time(address, port, now_seconds())
    }

    pub fn with_time(address: IpAddr, port: u16, time_seen: u64) -> PeerAddress {
        PeerAddress {
            address,
            port,
            time_seen,
            services: 0,
            connected: false,
            static_address: false,
        }
    }

    /// Parses the text form `[address]:port` for IPv4 and IPv6 addresses
    pub fn from_text(text: &str) -> Result<PeerAddress> {
        let rest = text
            .strip_prefix('[')
            .ok_or_else(|| CoreError::malformed("peer address must use the [address]:port form"))?;
        let (address_part, port_part) = rest
            .split_once(']')
            .ok_or_else(|| CoreError::malformed("peer address is missing the closing bracket"))?;
        let port_part = port_part
            .strip_prefix(':')
            .ok_or_else(|| CoreError::malformed("peer address is missing the port"))?;
        let address: IpAddr = address_part
            .parse()
            .map_err(|_| CoreError::malformed("peer address is not a valid IP address"))?;
        let port: u16 = port_part
            .parse()
            .map_err(|_| CoreError::malformed("peer port is not valid"))?;
        Ok(PeerAddress::new(address, port))
    }

    /// Reads the 26-byte wire form: services, 16-byte address, port
    pub fn read(buffer: &mut SerializedBuffer) -> Result<PeerAddress> {
        let services = buffer.get_u64()?;
        let mut raw = [0u8; 16];
        buffer.get_into(&mut raw)?;
        let address = decode_address(&raw);
        // Port is in network byte order
        let port = ((buffer.get_u8()? as u16) << 8) | buffer.get_u8()? as u16;
        let mut peer_address = PeerAddress::new(address, port);
        peer_address.services = services;
        Ok(peer_address)
    }

    /// Writes the 26-byte wire form
    pub fn write(&self, buffer: &mut SerializedBuffer) {
        buffer.put_u64(self.services);
        buffer.put_bytes(&encode_address(&self.address));
        buffer.put_u8((self.port >> 8) as u8).put_u8(self.port as u8);
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn time_seen(&self) -> u64 {
        self.time_seen
    }

    pub fn set_time_seen(&mut self, time_seen: u64) {
        self.time_seen = time_seen;
    }

    pub fn services(&self) -> u64 {
        self.services
    }

    pub fn set_services(&mut self, services: u64) {
        self.services = services;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Static addresses are excluded from relayed address lists
    pub fn is_static(&self) -> bool {
        self.static_address
    }

    pub fn set_static(&mut self, static_address: bool) {
        self.static_address = static_address;
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]:{}", self.address, self.port)
    }
}

impl PartialEq for PeerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.port == other.port
    }
}

impl Eq for PeerAddress {}

impl std::hash::Hash for PeerAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.port.hash(state);
    }
}

/// Encodes an address as 16 bytes, mapping IPv4 into the IPv6 space
pub fn encode_address(address: &IpAddr) -> [u8; 16] {
    match address {
        IpAddr::V4(v4) => {
            let mut raw = [0u8; 16];
            raw[..12].copy_from_slice(&IPV6_PREFIX);
            raw[12..].copy_from_slice(&v4.octets());
            raw
        }
        IpAddr::V6(v6) => v6.octets(),
    }
}

/// Decodes a 16-byte wire address, unmapping IPv4-mapped addresses
pub fn decode_address(raw: &[u8; 16]) -> IpAddr {
    if raw[..12] == IPV6_PREFIX {
        IpAddr::V4(Ipv4Addr::new(raw[12], raw[13], raw[14], raw[15]))
    } else {
        IpAddr::V6(Ipv6Addr::from(*raw))
    }
}

/// Version handshake progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    New,
    VersionSent,
    VersionReceived,
    Ready,
    Disconnected,
}

/// Per-connection peer state
#[derive(Debug)]
pub struct Peer {
    address: PeerAddress,
    output_queue: Vec<Message>,
    version: u32,
    services: u64,
    user_agent: String,
    chain_height: u32,
    handshake: HandshakeState,
    version_count: u8,
    disconnect: bool,
    ban_score: u32,
    ping_sent: bool,
    filter: Mutex<Option<BloomFilter>>,
}

impl Peer {
    /// Creates peer state for a newly established connection
    pub fn new(address: PeerAddress) -> Peer {
        Peer {
            address,
            output_queue: Vec::new(),
            version: 0,
            services: 0,
            user_agent: String::new(),
            chain_height: 0,
            handshake: HandshakeState::New,
            version_count: 0,
            disconnect: false,
            ban_score: 0,
            ping_sent: false,
            filter: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &PeerAddress {
        &self.address
    }

    pub fn address_mut(&mut self) -> &mut PeerAddress {
        &mut self.address
    }

    /// Queues a message for the I/O layer to send
    pub fn queue_message(&mut self, message: Message) {
        self.output_queue.push(message);
    }

    /// Drains the queued outbound messages
    pub fn drain_output(&mut self) -> Vec<Message> {
        std::mem::take(&mut self.output_queue)
    }

    pub fn output_queue(&self) -> &[Message] {
        &self.output_queue
    }

    pub fn handshake(&self) -> HandshakeState {
        self.handshake
    }

    /// Records that our 'version' message has been sent
    pub fn record_version_sent(&mut self) {
        if self.handshake == HandshakeState::New {
            self.handshake = HandshakeState::VersionSent;
            debug!(peer = %self.address, "version sent");
        }
    }

    /// Records the peer's 'version' message.  A subsequent 'verack' is
    /// required to complete the handshake.
    pub fn record_version_received(&mut self) {
        if matches!(
            self.handshake,
            HandshakeState::New | HandshakeState::VersionSent
        ) {
            self.handshake = HandshakeState::VersionReceived;
        }
        self.version_count = self.version_count.saturating_add(1).min(2);
        debug!(peer = %self.address, "version received");
    }

    /// Records the peer's 'verack'.  The peer must have already sent its
    /// 'version'.
    pub fn record_verack_received(&mut self) -> Result<()> {
        if self.handshake != HandshakeState::VersionReceived {
            return Err(CoreError::invalid(
                "'verack' received before the version handshake",
            ));
        }
        self.handshake = HandshakeState::Ready;
        self.version_count = 2;
        debug!(peer = %self.address, "handshake complete");
        Ok(())
    }

    pub fn version_count(&self) -> u8 {
        self.version_count
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn set_version(&mut self, version: u32) {
        self.version = version;
    }

    pub fn services(&self) -> u64 {
        self.services
    }

    pub fn set_services(&mut self, services: u64) {
        self.services = services;
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn set_user_agent(&mut self, user_agent: String) {
        self.user_agent = user_agent;
    }

    pub fn height(&self) -> u32 {
        self.chain_height
    }

    pub fn set_height(&mut self, height: u32) {
        self.chain_height = height;
    }

    pub fn should_disconnect(&self) -> bool {
        self.disconnect
    }

    pub fn set_disconnect(&mut self, disconnect: bool) {
        self.disconnect = disconnect;
        if disconnect {
            self.handshake = HandshakeState::Disconnected;
        }
    }

    pub fn ban_score(&self) -> u32 {
        self.ban_score
    }

    /// Adds to the ban score; a peer reaching the limit is marked for
    /// disconnect
    pub fn add_ban_score(&mut self, points: u32) -> u32 {
        self.ban_score = self.ban_score.saturating_add(points);
        if self.ban_score >= MAX_BAN_SCORE && !self.disconnect {
            warn!(peer = %self.address, score = self.ban_score, "ban score limit reached");
            self.set_disconnect(true);
        }
        self.ban_score
    }

    /// TRUE while a 'ping' is outstanding
    pub fn was_ping_sent(&self) -> bool {
        self.ping_sent
    }

    pub fn set_ping_sent(&mut self, ping_sent: bool) {
        self.ping_sent = ping_sent;
    }

    fn filter_slot(&self) -> std::sync::MutexGuard<'_, Option<BloomFilter>> {
        self.filter.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Installs a Bloom filter, returning the previous one
    pub fn install_filter(&self, filter: BloomFilter) -> Option<BloomFilter> {
        self.filter_slot().replace(filter)
    }

    /// Uninstalls the Bloom filter
    pub fn clear_filter(&self) -> Option<BloomFilter> {
        self.filter_slot().take()
    }

    pub fn has_filter(&self) -> bool {
        self.filter_slot().is_some()
    }

    /// A snapshot of the currently installed filter
    pub fn filter(&self) -> Option<BloomFilter> {
        self.filter_slot().clone()
    }

    /// Adds an element to the installed filter.  Returns FALSE when no
    /// filter is installed (the request is silently ignored).
    pub fn add_filter_element(&self, element: &[u8]) -> bool {
        match self.filter_slot().as_mut() {
            Some(filter) => {
                filter.insert(element);
                true
            }
            None => false,
        }
    }

    /// Checks the installed filter for an element
    pub fn filter_contains(&self, element: &[u8]) -> bool {
        self.filter_slot()
            .as_ref()
            .map(|filter| filter.contains(element))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::UpdateMode;

    fn test_address() -> PeerAddress {
        PeerAddress::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8333)
    }

    #[test]
    fn test_address_text_forms() {
        let v4 = PeerAddress::from_text("[127.0.0.1]:8333").unwrap();
        assert_eq!(v4.port(), 8333);
        assert_eq!(v4.to_string(), "[127.0.0.1]:8333");
        let v6 = PeerAddress::from_text("[2001:db8::1]:18333").unwrap();
        assert_eq!(v6.port(), 18333);
        assert!(matches!(v6.address(), IpAddr::V6(_)));
        assert!(PeerAddress::from_text("127.0.0.1:8333").is_err());
        assert!(PeerAddress::from_text("[127.0.0.1]").is_err());
        assert!(PeerAddress::from_text("[127.0.0.1]:notaport").is_err());
    }

    #[test]
    fn test_address_wire_round_trip_ipv4() {
        let mut address = test_address();
        address.set_services(1);
        let mut buffer = SerializedBuffer::new();
        address.write(&mut buffer);
        assert_eq!(buffer.as_slice().len(), 26);
        // IPv4 is mapped into the IPv6 space
        assert_eq!(&buffer.as_slice()[8..20], &IPV6_PREFIX);
        // Port is big-endian
        assert_eq!(&buffer.as_slice()[24..26], &[0x20, 0x8d]);
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        let decoded = PeerAddress::read(&mut buffer).unwrap();
        assert_eq!(decoded, address);
        assert_eq!(decoded.services(), 1);
    }

    #[test]
    fn test_address_wire_round_trip_ipv6() {
        let address = PeerAddress::new("2001:db8::7".parse().unwrap(), 8333);
        let mut buffer = SerializedBuffer::new();
        address.write(&mut buffer);
        let mut buffer = SerializedBuffer::from_bytes(buffer.into_bytes());
        let decoded = PeerAddress::read(&mut buffer).unwrap();
        assert_eq!(decoded.address(), address.address());
    }

    #[test]
    fn test_handshake_sequence() {
        let mut peer = Peer::new(test_address());
        assert_eq!(peer.handshake(), HandshakeState::New);
        peer.record_version_sent();
        assert_eq!(peer.handshake(), HandshakeState::VersionSent);
        peer.record_version_received();
        assert_eq!(peer.handshake(), HandshakeState::VersionReceived);
        assert_eq!(peer.version_count(), 1);
        peer.record_verack_received().unwrap();
        assert_eq!(peer.handshake(), HandshakeState::Ready);
        assert_eq!(peer.version_count(), 2);
    }

    #[test]
    fn test_verack_before_version_is_rejected() {
        let mut peer = Peer::new(test_address());
        assert!(peer.record_verack_received().is_err());
        peer.record_version_sent();
        assert!(peer.record_verack_received().is_err());
    }

    #[test]
    fn test_ban_score_disconnect() {
        let mut peer = Peer::new(test_address());
        assert_eq!(peer.add_ban_score(50), 50);
        assert!(!peer.should_disconnect());
        assert_eq!(peer.add_ban_score(50), 100);
        assert!(peer.should_disconnect());
        assert_eq!(peer.handshake(), HandshakeState::Disconnected);
    }

    #[test]
    fn test_filter_lifecycle() {
        let peer = Peer::new(test_address());
        assert!(!peer.has_filter());
        // 'filteradd' with no filter installed is ignored
        assert!(!peer.add_filter_element(b"element"));
        let mut filter = BloomFilter::with_rate(2, 0.0005, 0, UpdateMode::None);
        filter.insert(b"first");
        let old = peer.install_filter(filter);
        assert!(old.is_none());
        assert!(peer.has_filter());
        assert!(peer.filter_contains(b"first"));
        assert!(peer.add_filter_element(b"second"));
        assert!(peer.filter_contains(b"second"));
        let replaced = peer.install_filter(BloomFilter::with_rate(2, 0.0005, 1, UpdateMode::None));
        assert!(replaced.is_some());
        assert!(peer.clear_filter().is_some());
        assert!(!peer.has_filter());
    }

    #[test]
    fn test_output_queue() {
        use crate::message::{Message, MessageCommand};
        let mut peer = Peer::new(test_address());
        peer.queue_message(Message::new(vec![1, 2, 3], MessageCommand::Ping));
        assert_eq!(peer.output_queue().len(), 1);
        let drained = peer.drain_output();
        assert_eq!(drained.len(), 1);
        assert!(peer.output_queue().is_empty());
    }
}
