//! Connection endpoints and direction detection
//!
//! A TCP connection is identified by its endpoint 4-tuple. Each connection
//! carries two independent byte streams, one per direction.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{MaskError, Result};

/// Direction of a byte stream relative to a connection's orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Same orientation as the connection's tuple
    Forward,
    /// Endpoints swapped relative to the connection's tuple
    Reverse,
}

impl Direction {
    /// The opposite direction
    pub fn flip(self) -> Self {
        match self {
            Direction::Forward => Direction::Reverse,
            Direction::Reverse => Direction::Forward,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Forward => "fwd",
            Direction::Reverse => "rev",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = MaskError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fwd" | "forward" => Ok(Direction::Forward),
            "rev" | "reverse" => Ok(Direction::Reverse),
            other => Err(MaskError::validation(format!("unknown direction '{}'", other))),
        }
    }
}

/// Source/destination endpoint pair of a packet or connection
///
/// Ports are always in `1..=65535` and both addresses belong to the same
/// family; violations are rejected when the tuple is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RawTuple", into = "RawTuple")]
pub struct FlowEndpoint4Tuple {
    src_ip: IpAddr,
    src_port: u16,
    dst_ip: IpAddr,
    dst_port: u16,
}

impl FlowEndpoint4Tuple {
    /// Create a tuple from typed addresses
    pub fn new(src_ip: IpAddr, src_port: u16, dst_ip: IpAddr, dst_port: u16) -> Result<Self> {
        if src_port == 0 {
            return Err(MaskError::validation("source port must be in 1..=65535, got 0"));
        }
        if dst_port == 0 {
            return Err(MaskError::validation("destination port must be in 1..=65535, got 0"));
        }
        if src_ip.is_ipv4() != dst_ip.is_ipv4() {
            return Err(MaskError::validation(format!(
                "address family mismatch: {} -> {}",
                src_ip, dst_ip
            )));
        }
        Ok(Self {
            src_ip,
            src_port,
            dst_ip,
            dst_port,
        })
    }

    /// Create a tuple from textual addresses and wide port numbers
    pub fn parse(src_ip: &str, src_port: u32, dst_ip: &str, dst_port: u32) -> Result<Self> {
        let src: IpAddr = src_ip
            .trim()
            .parse()
            .map_err(|_| MaskError::validation(format!("invalid source address '{}'", src_ip)))?;
        let dst: IpAddr = dst_ip
            .trim()
            .parse()
            .map_err(|_| MaskError::validation(format!("invalid destination address '{}'", dst_ip)))?;
        Self::new(src, checked_port(src_port)?, dst, checked_port(dst_port)?)
    }

    pub fn src_ip(&self) -> IpAddr {
        self.src_ip
    }

    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    pub fn dst_ip(&self) -> IpAddr {
        self.dst_ip
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    /// Same endpoints with source and destination swapped
    pub fn swapped(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            src_port: self.dst_port,
            dst_ip: self.src_ip,
            dst_port: self.src_port,
        }
    }

    /// True when the source endpoint sorts before (or equals) the destination
    pub fn is_ordered(&self) -> bool {
        (self.src_ip, self.src_port) <= (self.dst_ip, self.dst_port)
    }
}

impl fmt::Display for FlowEndpoint4Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}",
            fmt_endpoint(self.src_ip, self.src_port),
            fmt_endpoint(self.dst_ip, self.dst_port)
        )
    }
}

fn checked_port(port: u32) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(MaskError::validation(format!("port must be in 1..=65535, got {}", port))),
    }
}

pub(crate) fn fmt_endpoint(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}:{}", v4, port),
        IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
    }
}

/// Serde shape of a tuple; validated on the way in
#[derive(Serialize, Deserialize)]
struct RawTuple {
    src_ip: String,
    src_port: u32,
    dst_ip: String,
    dst_port: u32,
}

impl TryFrom<RawTuple> for FlowEndpoint4Tuple {
    type Error = MaskError;

    fn try_from(raw: RawTuple) -> Result<Self> {
        Self::parse(&raw.src_ip, raw.src_port, &raw.dst_ip, raw.dst_port)
    }
}

impl From<FlowEndpoint4Tuple> for RawTuple {
    fn from(t: FlowEndpoint4Tuple) -> Self {
        RawTuple {
            src_ip: t.src_ip.to_string(),
            src_port: u32::from(t.src_port),
            dst_ip: t.dst_ip.to_string(),
            dst_port: u32::from(t.dst_port),
        }
    }
}

/// Direction-agnostic connection key (smaller endpoint first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey(FlowEndpoint4Tuple);

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A TCP connection, oriented by the tuple it was created from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Connection {
    tuple: FlowEndpoint4Tuple,
}

impl Connection {
    /// Build a connection from textual endpoints
    pub fn new(src_ip: &str, src_port: u32, dst_ip: &str, dst_port: u32) -> Result<Self> {
        Ok(Self {
            tuple: FlowEndpoint4Tuple::parse(src_ip, src_port, dst_ip, dst_port)?,
        })
    }

    pub fn from_tuple(tuple: FlowEndpoint4Tuple) -> Self {
        Self { tuple }
    }

    /// Connection oriented with the numerically smaller endpoint first
    ///
    /// This is the single normalization rule used to derive stream ids, so
    /// both packets of a connection map to the same orientation.
    pub fn canonical(tuple: FlowEndpoint4Tuple) -> Self {
        if tuple.is_ordered() {
            Self { tuple }
        } else {
            Self {
                tuple: tuple.swapped(),
            }
        }
    }

    pub fn tuple(&self) -> &FlowEndpoint4Tuple {
        &self.tuple
    }

    /// Copy of this connection with endpoints swapped
    pub fn reversed(&self) -> Self {
        Self {
            tuple: self.tuple.swapped(),
        }
    }

    /// Direction-agnostic identifier shared by both orientations
    pub fn base_id(&self) -> ConnectionKey {
        ConnectionKey(Self::canonical(self.tuple).tuple)
    }

    /// Tuple a packet travelling in `direction` carries
    pub fn tuple_for(&self, direction: Direction) -> FlowEndpoint4Tuple {
        match direction {
            Direction::Forward => self.tuple,
            Direction::Reverse => self.tuple.swapped(),
        }
    }

    /// Direction of a packet on this connection
    pub fn direction_of(&self, packet: &FlowEndpoint4Tuple) -> Result<Direction> {
        detect_direction(packet, &self.tuple)
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.tuple.fmt(f)
    }
}

/// Direction of `packet` relative to `reference`
///
/// Returns `Forward` on an exact match, `Reverse` when the endpoints are
/// swapped, and a state error when the packet belongs to another connection.
pub fn detect_direction(
    packet: &FlowEndpoint4Tuple,
    reference: &FlowEndpoint4Tuple,
) -> Result<Direction> {
    if packet == reference {
        Ok(Direction::Forward)
    } else if *packet == reference.swapped() {
        Ok(Direction::Reverse)
    } else {
        Err(MaskError::state(format!(
            "packet does not belong to this connection: {} vs {}",
            packet, reference
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple(src: &str, sp: u32, dst: &str, dp: u32) -> FlowEndpoint4Tuple {
        FlowEndpoint4Tuple::parse(src, sp, dst, dp).unwrap()
    }

    #[test]
    fn test_tuple_validation() {
        assert!(FlowEndpoint4Tuple::parse("10.0.0.1", 443, "10.0.0.2", 51000).is_ok());
        assert!(FlowEndpoint4Tuple::parse("10.0.0.300", 443, "10.0.0.2", 51000).is_err());
        assert!(FlowEndpoint4Tuple::parse("10.0.0.1", 0, "10.0.0.2", 51000).is_err());
        assert!(FlowEndpoint4Tuple::parse("10.0.0.1", 443, "10.0.0.2", 65536).is_err());
        assert!(FlowEndpoint4Tuple::parse("10.0.0.1", 443, "::1", 80).is_err());
        assert!(FlowEndpoint4Tuple::parse("::1", 443, "fe80::2", 65535).is_ok());
    }

    #[test]
    fn test_connection_reversed_and_base_id() {
        let conn = Connection::new("192.168.1.10", 51000, "10.0.0.1", 443).unwrap();
        let rev = conn.reversed();

        assert_eq!(rev.tuple().src_port(), 443);
        assert_eq!(rev.tuple().dst_port(), 51000);
        assert_eq!(conn.base_id(), rev.base_id());
        assert_eq!(rev.reversed(), conn);
    }

    #[test]
    fn test_canonical_orders_smaller_endpoint_first() {
        let a = tuple("192.168.1.10", 51000, "10.0.0.1", 443);
        let canon = Connection::canonical(a);
        assert_eq!(canon.tuple().src_ip().to_string(), "10.0.0.1");
        assert_eq!(Connection::canonical(a.swapped()), canon);
    }

    #[test]
    fn test_direction_symmetry() {
        let a = tuple("10.0.0.1", 1234, "10.0.0.2", 80);
        let b = a.swapped();

        assert_eq!(detect_direction(&a, &a).unwrap(), Direction::Forward);
        assert_eq!(detect_direction(&a, &b).unwrap(), Direction::Reverse);
        assert_eq!(detect_direction(&b, &a).unwrap(), Direction::Reverse);
        assert_eq!(detect_direction(&b, &b).unwrap(), Direction::Forward);
    }

    #[test]
    fn test_unrelated_packet_rejected() {
        let a = tuple("10.0.0.1", 1234, "10.0.0.2", 80);
        let other = tuple("10.0.0.3", 1234, "10.0.0.2", 80);
        let err = detect_direction(&other, &a).unwrap_err();
        assert!(matches!(err, MaskError::State(_)));
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("fwd".parse::<Direction>().unwrap(), Direction::Forward);
        assert_eq!("REVERSE".parse::<Direction>().unwrap(), Direction::Reverse);
        assert!("sideways".parse::<Direction>().is_err());
        assert_eq!(Direction::Forward.flip(), Direction::Reverse);
    }

    #[test]
    fn test_tuple_serde_validates() {
        let json = r#"{"src_ip":"10.0.0.1","src_port":443,"dst_ip":"10.0.0.2","dst_port":0}"#;
        assert!(serde_json::from_str::<FlowEndpoint4Tuple>(json).is_err());

        let t = tuple("10.0.0.1", 443, "10.0.0.2", 8443);
        let back: FlowEndpoint4Tuple =
            serde_json::from_str(&serde_json::to_string(&t).unwrap()).unwrap();
        assert_eq!(back, t);
    }
}
