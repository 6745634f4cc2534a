//! Channel descriptors — which connection a packet travelled on.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// The part a connection plays in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Connection to the well-known main server: login and session control.
    Main,
    /// Connection to an auxiliary relay, linked to a session after the fact.
    Bulle,
}

impl Role {
    /// Main if `remote` is the main server, bulle otherwise.
    pub fn for_remote(remote: IpAddr, main_server: IpAddr) -> Self {
        if remote == main_server {
            Role::Main
        } else {
            Role::Bulle
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Main => f.write_str("main"),
            Role::Bulle => f.write_str("bulle"),
        }
    }
}

/// Immutable description of one captured connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelInfo {
    pub local: SocketAddr,
    pub remote: SocketAddr,
    pub role: Role,
}

impl ChannelInfo {
    pub fn new(local: SocketAddr, remote: SocketAddr, main_server: IpAddr) -> Self {
        Self {
            local,
            remote,
            role: Role::for_remote(remote.ip(), main_server),
        }
    }
}

impl fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.role, self.local, self.remote)
    }
}
