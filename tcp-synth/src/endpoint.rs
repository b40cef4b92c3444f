//! Connection endpoints and traffic direction.
//!
//! An [`Endpoint`] is everything the frame builder needs to address one side
//! of the connection on the wire: a MAC address, an IPv4 address and a TCP
//! port.  [`EndpointPair`] binds the client and server together and resolves
//! source/destination for a [`Direction`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;

use crate::error::{Result, SynthError};

/// Which side originates a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    /// The direction a reply to this segment travels in.
    pub fn reverse(self) -> Self {
        match self {
            Self::ClientToServer => Self::ServerToClient,
            Self::ServerToClient => Self::ClientToServer,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToServer => write!(f, "c->s"),
            Self::ServerToClient => write!(f, "s->c"),
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub mac: [u8; 6],
    pub addr: SocketAddrV4,
}

impl Endpoint {
    pub fn new(mac: [u8; 6], addr: SocketAddrV4) -> Self {
        Self { mac, addr }
    }

    pub fn ip(&self) -> Ipv4Addr {
        *self.addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Reject addresses no real TCP peer could use as its own.
    pub fn validate(&self) -> Result<()> {
        let ip = self.ip();
        if ip.is_unspecified() || ip.is_broadcast() || ip.is_multicast() {
            return Err(SynthError::InvalidEndpoint(format!(
                "{ip} cannot terminate a TCP connection"
            )));
        }
        if self.port() == 0 {
            return Err(SynthError::InvalidEndpoint(format!("{} has port 0", self.addr)));
        }
        // Group bit set means a multicast MAC, never a unicast source.
        if self.mac[0] & 0x01 != 0 {
            return Err(SynthError::InvalidEndpoint(format!(
                "{} is not a unicast MAC",
                format_mac(&self.mac)
            )));
        }
        Ok(())
    }
}

impl FromStr for Endpoint {
    type Err = SynthError;

    /// Parses `ip:port`, assigning a locally administered MAC derived from
    /// the IPv4 address.
    fn from_str(s: &str) -> Result<Self> {
        let addr: SocketAddrV4 = s
            .parse()
            .map_err(|e| SynthError::InvalidEndpoint(format!("{s:?}: {e}")))?;
        let o = addr.ip().octets();
        let endpoint = Endpoint::new([0x02, 0x00, o[0], o[1], o[2], o[3]], addr);
        endpoint.validate()?;
        Ok(endpoint)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

pub fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

// ---------------------------------------------------------------------------
// EndpointPair
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPair {
    pub client: Endpoint,
    pub server: Endpoint,
}

impl EndpointPair {
    pub fn new(client: Endpoint, server: Endpoint) -> Self {
        Self { client, server }
    }

    /// Parse a pair from `ip:port` strings.
    pub fn parse(client: &str, server: &str) -> Result<Self> {
        let pair = Self::new(client.parse()?, server.parse()?);
        pair.validate()?;
        Ok(pair)
    }

    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.server.validate()?;
        if self.client.addr == self.server.addr {
            return Err(SynthError::InvalidEndpoint(format!(
                "client and server are both {}",
                self.client.addr
            )));
        }
        Ok(())
    }

    /// `(source, destination)` for a segment travelling in `direction`.
    pub fn resolve(&self, direction: Direction) -> (&Endpoint, &Endpoint) {
        match direction {
            Direction::ClientToServer => (&self.client, &self.server),
            Direction::ServerToClient => (&self.server, &self.client),
        }
    }
}

impl fmt::Display for EndpointPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.client, self.server)
    }
}
