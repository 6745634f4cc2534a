//! Session linking — the per-connection protocol state machine.
//!
//! A connection starts in `AwaitingHandshake`. Its first outbound packet
//! must carry the handshake code for its role: a main connection then
//! creates a session, a bulle connection claims the session registered
//! under the correlation key it presents. Anything else is ignored for
//! good. Once linked, every framed packet goes to the session and on to
//! the event sink; inbound main traffic is also watched for bulle switches.

use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tap_core::wire::CORRELATION_KEY_LEN;
use tap_core::{CommandCode, CorrelationKey, Direction, FrameReader, Packet, PacketError};
use tap_services::{ChannelInfo, EventSink, PendingRegistry, Role, Session};

use crate::connection::{PacketParser, ParseOutcome, ParserFactory};

/// Asks the orchestrator to monitor another address.
pub trait AddressWatch: Send + Sync {
    fn watch(&self, ip: IpAddr);
}

/// Counters shared by every linker, for status logging.
#[derive(Debug, Default)]
pub struct LinkStats {
    sessions: AtomicU64,
    linked: AtomicU64,
    ignored: AtomicU64,
}

impl LinkStats {
    /// Sessions created by main handshakes.
    pub fn sessions(&self) -> u64 {
        self.sessions.load(Ordering::Relaxed)
    }

    /// Bulle connections attached to a session.
    pub fn linked(&self) -> u64 {
        self.linked.load(Ordering::Relaxed)
    }

    /// Connections that failed their handshake.
    pub fn ignored(&self) -> u64 {
        self.ignored.load(Ordering::Relaxed)
    }
}

struct LinkContext {
    registry: PendingRegistry,
    watch: Arc<dyn AddressWatch>,
    sink: Arc<dyn EventSink>,
    stats: Arc<LinkStats>,
}

/// Builds a [`SessionLinker`] for every new connection.
pub struct LinkerFactory {
    ctx: Arc<LinkContext>,
}

impl LinkerFactory {
    pub fn new(
        registry: PendingRegistry,
        watch: Arc<dyn AddressWatch>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            ctx: Arc::new(LinkContext {
                registry,
                watch,
                sink,
                stats: Arc::new(LinkStats::default()),
            }),
        }
    }

    pub fn stats(&self) -> Arc<LinkStats> {
        self.ctx.stats.clone()
    }
}

impl ParserFactory for LinkerFactory {
    fn create(&self, channel: ChannelInfo) -> Box<dyn PacketParser> {
        Box::new(SessionLinker::new(channel, self.ctx.clone()))
    }
}

enum LinkState {
    AwaitingHandshake,
    Linked(Arc<Session>),
}

pub struct SessionLinker {
    channel: ChannelInfo,
    outbound: FrameReader,
    inbound: FrameReader,
    state: LinkState,
    ctx: Arc<LinkContext>,
}

impl SessionLinker {
    fn new(channel: ChannelInfo, ctx: Arc<LinkContext>) -> Self {
        Self {
            channel,
            outbound: FrameReader::for_direction(Direction::Outbound),
            inbound: FrameReader::for_direction(Direction::Inbound),
            state: LinkState::AwaitingHandshake,
            ctx,
        }
    }

    fn reader(&mut self, direction: Direction) -> &mut FrameReader {
        match direction {
            Direction::Outbound => &mut self.outbound,
            Direction::Inbound => &mut self.inbound,
        }
    }

    fn handle(&mut self, direction: Direction, mut packet: Packet) -> ParseOutcome {
        let linked = match &self.state {
            LinkState::Linked(session) => Some(session.clone()),
            LinkState::AwaitingHandshake => None,
        };
        let session = match linked {
            Some(session) => session,
            None => match self.handshake(direction, &mut packet) {
                Some(session) => {
                    self.state = LinkState::Linked(session.clone());
                    session
                }
                None => {
                    self.ctx.stats.ignored.fetch_add(1, Ordering::Relaxed);
                    return ParseOutcome::Ignore;
                }
            },
        };

        if direction == Direction::Inbound && self.channel.role == Role::Main {
            if let Err(e) = self.inspect_switch(&session, &mut packet) {
                tracing::debug!(channel = %self.channel, error = %e, "short main packet");
            }
        }

        packet.rewind();
        let event = session.packet_received(direction, self.channel, packet);
        self.ctx.sink.emit(event);
        ParseOutcome::Continue
    }

    fn handshake(&self, direction: Direction, packet: &mut Packet) -> Option<Arc<Session>> {
        if direction == Direction::Inbound {
            tracing::debug!(channel = %self.channel, "inbound traffic before handshake");
            return None;
        }

        let expected = match self.channel.role {
            Role::Main => CommandCode::MAIN_HANDSHAKE,
            Role::Bulle => CommandCode::BULLE_HANDSHAKE,
        };
        let code = packet.read_u8().and_then(|_| packet.read_code()).ok();
        if code != Some(expected) {
            tracing::debug!(channel = %self.channel, ?code, %expected, "handshake mismatch");
            return None;
        }

        let session = match self.channel.role {
            Role::Main => {
                let session = Session::new(self.channel);
                self.ctx.stats.sessions.fetch_add(1, Ordering::Relaxed);
                tracing::info!(session = session.id(), channel = %self.channel, "session created");
                session
            }
            Role::Bulle => {
                let key: CorrelationKey = packet.read_array::<CORRELATION_KEY_LEN>().ok()?;
                let Some(session) = self.ctx.registry.claim(&key) else {
                    tracing::debug!(channel = %self.channel, key = hex::encode(key), "no session for bulle key");
                    return None;
                };
                match session.attach_bulle(self.channel) {
                    Some(previous) => tracing::info!(
                        session = session.id(),
                        channel = %self.channel,
                        %previous,
                        "bulle switched"
                    ),
                    None => tracing::info!(session = session.id(), channel = %self.channel, "bulle linked"),
                }
                self.ctx.stats.linked.fetch_add(1, Ordering::Relaxed);
                session
            }
        };

        packet.rewind();
        Some(session)
    }

    fn inspect_switch(&self, session: &Arc<Session>, packet: &mut Packet) -> Result<(), PacketError> {
        if packet.read_code()? != CommandCode::BULLE_SWITCH {
            return Ok(());
        }

        let key = packet.read_array::<CORRELATION_KEY_LEN>()?;
        self.ctx.registry.insert(key, session.clone());

        let address = packet.read_utf()?;
        match parse_address(&address) {
            Some(ip) => {
                tracing::info!(session = session.id(), %ip, "bulle switch");
                self.ctx.watch.watch(ip);
            }
            None => tracing::warn!(session = session.id(), %address, "unparseable bulle address"),
        }
        Ok(())
    }
}

impl PacketParser for SessionLinker {
    fn parse(&mut self, direction: Direction, payload: &[u8]) -> ParseOutcome {
        self.reader(direction).push(payload);
        loop {
            let packet = match self.reader(direction).next_frame() {
                Ok(Some(packet)) => packet,
                Ok(None) => return ParseOutcome::Continue,
                Err(e) => {
                    tracing::warn!(channel = %self.channel, %direction, error = %e, "stream desynchronised");
                    return ParseOutcome::FatalFraming;
                }
            };
            if self.handle(direction, packet) == ParseOutcome::Ignore {
                return ParseOutcome::Ignore;
            }
        }
    }
}

/// A bare IP, or an IP with a port.
fn parse_address(address: &str) -> Option<IpAddr> {
    let address = address.trim();
    address
        .parse::<IpAddr>()
        .ok()
        .or_else(|| address.parse::<SocketAddr>().ok().map(|a| a.ip()))
}
