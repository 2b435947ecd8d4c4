//! Endpoint grammar and role resolution.
//!
//! The connection direction alone determines each side's role: a target that
//! is the wildcard address or one of this machine's own interface addresses
//! means we listen (Callee); anything else means we connect (Caller). Role
//! resolution is a pure function of the target and the local interface set so
//! it can be tested without sockets.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use lancall_common::{Error, Result};

use crate::DEFAULT_SIGNALING_PORT;

/// Which side of the call this process plays, fixed at connection
/// establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Actively connected; initiates the offer.
    Caller,
    /// Passively accepted; awaits the offer.
    Callee,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller => write!(f, "caller"),
            Self::Callee => write!(f, "callee"),
        }
    }
}

/// How the transport opens its socket, derived once from the target address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketMode {
    /// Wildcard target: accept on all interfaces, process-scoped listener.
    GlobalListen,
    /// Target is one of our own addresses: listen for the peer to dial us.
    Listen,
    /// Target is remote: dial it.
    Connect,
}

/// A parsed signaling endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    /// Parse a user-supplied endpoint string.
    ///
    /// Accepts an IPv4 dotted quad, a bracketed IPv6 address, or a hostname,
    /// each with an optional `:port` suffix. A missing port defaults to
    /// [`DEFAULT_SIGNALING_PORT`]; a port outside 1-65535 is rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::address_format("empty endpoint"));
        }

        let (host, port_str) = split_host_port(input)?;

        let port = match port_str {
            None => DEFAULT_SIGNALING_PORT,
            Some(text) => {
                let value: u32 = text
                    .parse()
                    .map_err(|_| Error::address_format(format!("invalid port {text:?}")))?;
                if value == 0 || value > u16::MAX as u32 {
                    return Err(Error::port_range(format!(
                        "port {value} outside 1-65535"
                    )));
                }
                value as u16
            }
        };

        if !valid_host(&host) {
            return Err(Error::address_format(format!("invalid address {host:?}")));
        }

        Ok(Self {
            address: host,
            port,
        })
    }

    /// True when the address is the wildcard (`0.0.0.0` or `::`).
    pub fn is_wildcard(&self) -> bool {
        matches!(self.address.parse::<IpAddr>(), Ok(ip) if ip.is_unspecified())
    }

    /// Dialable `host:port` form, bracketing IPv6 addresses.
    pub fn authority(&self) -> String {
        match self.address.parse::<IpAddr>() {
            Ok(IpAddr::V6(_)) => format!("[{}]:{}", self.address, self.port),
            _ => format!("{}:{}", self.address, self.port),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.authority())
    }
}

fn split_host_port(input: &str) -> Result<(String, Option<String>)> {
    // Bracketed IPv6: [addr] or [addr]:port
    if let Some(rest) = input.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| Error::address_format("unterminated '['"))?;
        let host = &rest[..close];
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(Error::address_format(format!("invalid IPv6 {host:?}")));
        }
        let tail = &rest[close + 1..];
        return match tail.strip_prefix(':') {
            None if tail.is_empty() => Ok((host.to_string(), None)),
            Some(port) => Ok((host.to_string(), Some(port.to_string()))),
            None => Err(Error::address_format(format!(
                "trailing garbage after ']': {tail:?}"
            ))),
        };
    }

    // A bare IPv6 address contains multiple colons and carries no port.
    if input.matches(':').count() > 1 {
        if input.parse::<Ipv6Addr>().is_ok() {
            return Ok((input.to_string(), None));
        }
        return Err(Error::address_format(format!("invalid address {input:?}")));
    }

    match input.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), Some(port.to_string()))),
        None => Ok((input.to_string(), None)),
    }
}

fn valid_host(host: &str) -> bool {
    if host.is_empty() {
        return false;
    }
    if host.parse::<IpAddr>().is_ok() {
        return true;
    }
    // Hostname: dot-separated labels of alphanumerics and hyphens.
    host.split('.').all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Resolve the socket mode from the target and the local interface set.
///
/// Wildcard targets listen globally; a target matching any local interface
/// address listens as Callee; everything else connects as Caller. Hostnames
/// never match an interface address and always dial out.
pub fn resolve_mode(endpoint: &Endpoint, local_addrs: &[IpAddr]) -> SocketMode {
    if endpoint.is_wildcard() {
        return SocketMode::GlobalListen;
    }
    match endpoint.address.parse::<IpAddr>() {
        Ok(ip) if local_addrs.contains(&ip) => SocketMode::Listen,
        _ => SocketMode::Connect,
    }
}

/// The role a socket mode implies.
pub fn mode_role(mode: SocketMode) -> Role {
    match mode {
        SocketMode::GlobalListen | SocketMode::Listen => Role::Callee,
        SocketMode::Connect => Role::Caller,
    }
}

/// Addresses of this machine's non-loopback network interfaces.
///
/// This is what a peer on the LAN can dial; also the set role resolution
/// matches the target against.
pub fn local_interface_addrs() -> Vec<IpAddr> {
    match get_if_addrs::get_if_addrs() {
        Ok(interfaces) => interfaces
            .into_iter()
            .map(|iface| iface.ip())
            .filter(|ip| !ip.is_loopback() && !ip.is_multicast())
            .collect(),
        Err(err) => {
            tracing::warn!("failed to enumerate network interfaces: {err}");
            Vec::new()
        }
    }
}
