//! Connections and the per-driver connection table.
//!
//! A connection is keyed by its local (client-side) address. After a FIN it
//! lingers for a grace period: traffic still routes to it but is no longer
//! parsed. The first lookup after the deadline replaces it, modelling the
//! local port being reused by a new flow. Stale lingering entries are only
//! replaced on lookup; nothing sweeps them.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tap_core::Direction;
use tap_services::ChannelInfo;

/// Result of handing a payload to a connection's parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Keep parsing this connection.
    Continue,
    /// Not our protocol, or a flow we cannot place. Stop parsing it.
    Ignore,
    /// The byte stream lost framing and cannot be resynchronised.
    FatalFraming,
}

/// Protocol hook attached to every connection.
pub trait PacketParser: Send {
    fn parse(&mut self, direction: Direction, payload: &[u8]) -> ParseOutcome;
}

/// Builds the parser for a newly seen connection.
pub trait ParserFactory: Send + Sync {
    fn create(&self, channel: ChannelInfo) -> Box<dyn PacketParser>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Active,
    Ignored,
    /// Closing; replaced by the first lookup at or after the deadline.
    Lingering(Instant),
}

pub struct Connection {
    channel: ChannelInfo,
    state: ConnectionState,
    parser: Box<dyn PacketParser>,
}

impl Connection {
    pub fn new(channel: ChannelInfo, parser: Box<dyn PacketParser>) -> Self {
        Self {
            channel,
            state: ConnectionState::Active,
            parser,
        }
    }

    pub fn channel(&self) -> ChannelInfo {
        self.channel
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Ignored and lingering connections are forwarded without parsing.
    pub fn is_ignored(&self) -> bool {
        self.state != ConnectionState::Active
    }

    pub fn is_lingering(&self) -> bool {
        matches!(self.state, ConnectionState::Lingering(_))
    }

    pub fn ignore(&mut self) {
        if self.state == ConnectionState::Active {
            self.state = ConnectionState::Ignored;
        }
    }

    /// Start lingering. A repeated close pushes the deadline out.
    pub fn close(&mut self, now: Instant, linger: Duration) {
        self.state = ConnectionState::Lingering(now + linger);
    }

    fn expired(&self, now: Instant) -> bool {
        matches!(self.state, ConnectionState::Lingering(deadline) if now >= deadline)
    }

    /// Run the parser over one payload and apply its outcome. A panicking
    /// parser is treated like an unrecognised flow.
    pub fn parse(&mut self, direction: Direction, payload: &[u8]) -> ParseOutcome {
        if self.is_ignored() {
            return ParseOutcome::Ignore;
        }

        let parser = &mut self.parser;
        let outcome = match catch_unwind(AssertUnwindSafe(|| parser.parse(direction, payload))) {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::error!(channel = %self.channel, "parser panicked, ignoring connection");
                ParseOutcome::Ignore
            }
        };

        match outcome {
            ParseOutcome::Continue => {}
            ParseOutcome::Ignore => {
                tracing::debug!(channel = %self.channel, "connection ignored");
                self.ignore();
            }
            ParseOutcome::FatalFraming => {
                tracing::warn!(channel = %self.channel, %direction, "malformed framing, ignoring connection");
                self.ignore();
            }
        }
        outcome
    }
}

/// Connections of one capture driver, by local address.
pub struct ConnectionTable {
    connections: HashMap<SocketAddr, Connection>,
    main_server: IpAddr,
    linger: Duration,
    parsers: Arc<dyn ParserFactory>,
}

impl ConnectionTable {
    pub fn new(main_server: IpAddr, linger: Duration, parsers: Arc<dyn ParserFactory>) -> Self {
        Self {
            connections: HashMap::new(),
            main_server,
            linger,
            parsers,
        }
    }

    pub fn linger(&self) -> Duration {
        self.linger
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Resolve the connection keyed by its local endpoint, creating it if
    /// needed and replacing it if its linger deadline has passed.
    pub fn get(&mut self, local: SocketAddr, remote: SocketAddr, now: Instant) -> &mut Connection {
        if self
            .connections
            .get(&local)
            .is_some_and(|conn| conn.expired(now))
        {
            tracing::debug!(%local, "lingering connection replaced");
            self.connections.remove(&local);
        }

        let main_server = self.main_server;
        let parsers = &self.parsers;
        self.connections.entry(local).or_insert_with(|| {
            let channel = ChannelInfo::new(local, remote, main_server);
            tracing::debug!(%channel, "new connection");
            Connection::new(channel, parsers.create(channel))
        })
    }

    /// Close every connection, e.g. when the capture loop ends.
    pub fn close_all(&mut self, now: Instant) {
        for conn in self.connections.values_mut() {
            conn.close(now, self.linger);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }
}
