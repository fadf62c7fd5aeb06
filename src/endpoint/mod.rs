//! Endpoint model.
//!
//! A [`SocketEndpoint`] names one transport address. A [`DualEndpoint`]
//! names the two addresses of a relay: frames enter through `incoming` and
//! leave through `outgoing`.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::Deserialize;

/// Errors produced while building or parsing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointError {
    #[error("Incoming and outgoing endpoints must differ (both are '{0}')")]
    SameAddress(String),

    #[error("Unsupported endpoint scheme in '{0}'")]
    UnsupportedScheme(String),

    #[error("Invalid address in '{0}'")]
    InvalidAddress(String),

    #[error("Invalid port in '{0}'")]
    InvalidPort(String),

    #[error("In-process identity must not be empty")]
    EmptyIdentity,
}

/// Transport family of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Tcp,
    InProc,
    Pgm,
}

impl Protocol {
    /// URI scheme used in address strings.
    pub fn scheme(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::InProc => "inproc",
            Protocol::Pgm => "pgm",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scheme())
    }
}

/// Network port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port(u16);

impl Port {
    /// Upper bound (exclusive) of the well-known range.
    pub const WELL_KNOWN_END: u16 = 1024;
    /// First port of the dynamic/private range.
    pub const DYNAMIC_START: u16 = 49152;

    pub const fn new(port: u16) -> Self {
        Self(port)
    }

    pub const fn get(&self) -> u16 {
        self.0
    }

    pub fn is_well_known(&self) -> bool {
        self.0 < Self::WELL_KNOWN_END
    }

    pub fn is_registered(&self) -> bool {
        (Self::WELL_KNOWN_END..Self::DYNAMIC_START).contains(&self.0)
    }

    pub fn is_dynamic(&self) -> bool {
        self.0 >= Self::DYNAMIC_START
    }
}

impl From<u16> for Port {
    fn from(port: u16) -> Self {
        Self(port)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One transport address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum SocketEndpoint {
    /// `tcp://a.b.c.d:port`
    Tcp { address: Ipv4Addr, port: Port },
    /// `inproc://identity`
    InProcess { identity: String },
    /// `pgm://a.b.c.d:port`, carried over UDP datagrams.
    Multicast { address: Ipv4Addr, port: Port },
}

impl SocketEndpoint {
    pub fn tcp(address: Ipv4Addr, port: impl Into<Port>) -> Self {
        SocketEndpoint::Tcp {
            address,
            port: port.into(),
        }
    }

    pub fn tcp_localhost(port: impl Into<Port>) -> Self {
        Self::tcp(Ipv4Addr::LOCALHOST, port)
    }

    pub fn in_process(identity: impl Into<String>) -> Result<Self, EndpointError> {
        let identity = identity.into();
        if identity.is_empty() {
            return Err(EndpointError::EmptyIdentity);
        }
        Ok(SocketEndpoint::InProcess { identity })
    }

    pub fn multicast(address: Ipv4Addr, port: impl Into<Port>) -> Self {
        SocketEndpoint::Multicast {
            address,
            port: port.into(),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            SocketEndpoint::Tcp { .. } => Protocol::Tcp,
            SocketEndpoint::InProcess { .. } => Protocol::InProc,
            SocketEndpoint::Multicast { .. } => Protocol::Pgm,
        }
    }
}

impl fmt::Display for SocketEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketEndpoint::Tcp { address, port } => write!(f, "tcp://{}:{}", address, port),
            SocketEndpoint::InProcess { identity } => write!(f, "inproc://{}", identity),
            SocketEndpoint::Multicast { address, port } => write!(f, "pgm://{}:{}", address, port),
        }
    }
}

fn parse_host_port(input: &str, rest: &str) -> Result<(Ipv4Addr, Port), EndpointError> {
    let (host, port) = rest
        .rsplit_once(':')
        .ok_or_else(|| EndpointError::InvalidPort(input.to_string()))?;
    let address = if host == "localhost" {
        Ipv4Addr::LOCALHOST
    } else {
        host.parse()
            .map_err(|_| EndpointError::InvalidAddress(input.to_string()))?
    };
    let port = port
        .parse::<u16>()
        .map_err(|_| EndpointError::InvalidPort(input.to_string()))?;
    Ok((address, Port(port)))
}

impl FromStr for SocketEndpoint {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| EndpointError::UnsupportedScheme(s.to_string()))?;
        match scheme {
            "tcp" => {
                let (address, port) = parse_host_port(s, rest)?;
                Ok(SocketEndpoint::Tcp { address, port })
            }
            "pgm" => {
                let (address, port) = parse_host_port(s, rest)?;
                Ok(SocketEndpoint::Multicast { address, port })
            }
            "inproc" => SocketEndpoint::in_process(rest),
            _ => Err(EndpointError::UnsupportedScheme(s.to_string())),
        }
    }
}

impl TryFrom<String> for SocketEndpoint {
    type Error = EndpointError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// The incoming/outgoing address pair of a relay.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DualEndpoint {
    incoming: SocketEndpoint,
    outgoing: SocketEndpoint,
}

impl DualEndpoint {
    /// Pair two endpoints. Fails if they are the same address.
    pub fn new(incoming: SocketEndpoint, outgoing: SocketEndpoint) -> Result<Self, EndpointError> {
        if incoming == outgoing {
            return Err(EndpointError::SameAddress(incoming.to_string()));
        }
        Ok(Self { incoming, outgoing })
    }

    pub fn tcp(
        address: Ipv4Addr,
        incoming_port: impl Into<Port>,
        outgoing_port: impl Into<Port>,
    ) -> Result<Self, EndpointError> {
        Self::new(
            SocketEndpoint::tcp(address, incoming_port),
            SocketEndpoint::tcp(address, outgoing_port),
        )
    }

    pub fn tcp_localhost(
        incoming_port: impl Into<Port>,
        outgoing_port: impl Into<Port>,
    ) -> Result<Self, EndpointError> {
        Self::tcp(Ipv4Addr::LOCALHOST, incoming_port, outgoing_port)
    }

    /// In-process pair `<identity>-in` / `<identity>-out`.
    pub fn in_process(identity: &str) -> Result<Self, EndpointError> {
        Self::new(
            SocketEndpoint::in_process(format!("{}-in", identity))?,
            SocketEndpoint::in_process(format!("{}-out", identity))?,
        )
    }

    pub fn multicast(
        address: Ipv4Addr,
        incoming_port: impl Into<Port>,
        outgoing_port: impl Into<Port>,
    ) -> Result<Self, EndpointError> {
        Self::new(
            SocketEndpoint::multicast(address, incoming_port),
            SocketEndpoint::multicast(address, outgoing_port),
        )
    }

    pub fn incoming(&self) -> &SocketEndpoint {
        &self.incoming
    }

    pub fn outgoing(&self) -> &SocketEndpoint {
        &self.outgoing
    }
}

impl fmt::Display for DualEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.incoming, self.outgoing)
    }
}

#[cfg(test)]
mod tests;
