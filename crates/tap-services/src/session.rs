//! Sessions — one logged-in game client seen across its main and bulle
//! connections.
//!
//! A session is created by the main connection's handshake and shared
//! (`Arc<Session>`) with the bulle connection that later presents the
//! matching correlation key. The two connections live on different capture
//! threads, so the mutable part sits behind a mutex.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tap_core::wire::CIPHER_KEY_LEN;
use tap_core::{CommandCode, Direction, KeyRecovery, MessageKey, Packet, PacketError};

use crate::channel::ChannelInfo;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Account identity, read once from the login packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Account id. 0 for anonymous players.
    pub id: u32,
    pub name: String,
    /// Per-login id; unique per connection even for the same account.
    pub login_id: u32,
    pub is_anonymous: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    bulle: Option<ChannelInfo>,
    identity: Option<Identity>,
    recovery: KeyRecovery,
}

pub struct Session {
    id: u64,
    main: ChannelInfo,
    state: Mutex<SessionState>,
}

/// A framed packet delivered to a session, ready for observers.
#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session: Arc<Session>,
    pub channel: ChannelInfo,
    pub direction: Direction,
    /// Outbound only: the fingerprint byte, already consumed from `packet`.
    pub fingerprint: Option<u8>,
    pub packet: Packet,
}

impl Session {
    pub fn new(main: ChannelInfo) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            main,
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Process-unique id, for logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn main(&self) -> ChannelInfo {
        self.main
    }

    pub fn bulle(&self) -> Option<ChannelInfo> {
        self.state().bulle
    }

    /// Point the session at its current bulle channel. The server moves a
    /// client to a new bulle on every room change, so a later channel
    /// replaces the earlier one. Returns the channel it replaced.
    pub fn attach_bulle(&self, channel: ChannelInfo) -> Option<ChannelInfo> {
        self.state().bulle.replace(channel)
    }

    pub fn is_logged(&self) -> bool {
        self.state().identity.is_some()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state().identity.clone()
    }

    pub fn message_key(&self) -> Option<MessageKey> {
        self.state().recovery.key().cloned()
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inspect one framed packet and wrap it for observers.
    ///
    /// Reads the fingerprint of outbound packets, picks up the login
    /// identity and drives key recovery. Interpretation failures are
    /// logged and never stop the packet from being delivered.
    pub fn packet_received(
        self: &Arc<Self>,
        direction: Direction,
        channel: ChannelInfo,
        mut packet: Packet,
    ) -> SessionEvent {
        packet.rewind();
        let fingerprint = match direction {
            Direction::Outbound => {
                let fp = packet.read_u8().ok();
                if let Some(fp) = fp {
                    if let Err(e) = self.inspect_outbound(fp, &mut packet) {
                        tracing::debug!(session = self.id, error = %e, "outbound inspection failed");
                    }
                }
                packet.set_pos(1);
                fp
            }
            Direction::Inbound => {
                if let Err(e) = self.inspect_inbound(&mut packet) {
                    tracing::debug!(session = self.id, error = %e, "inbound inspection failed");
                }
                packet.rewind();
                None
            }
        };

        SessionEvent {
            session: Arc::clone(self),
            channel,
            direction,
            fingerprint,
            packet,
        }
    }

    fn inspect_outbound(&self, fp: u8, packet: &mut Packet) -> Result<(), PacketError> {
        let mut state = self.state();
        if state.identity.is_none() || !state.recovery.wants_capture() {
            return Ok(());
        }

        // fingerprint + code + one full key length of ciphertext
        if packet.len() <= 2 + CIPHER_KEY_LEN {
            return Ok(());
        }
        if packet.read_code()? == CommandCode::CHAT {
            let ciphertext = packet.read_array::<CIPHER_KEY_LEN>()?;
            state.recovery.capture(fp, ciphertext);
            tracing::trace!(session = self.id, fp, "captured ciphered chat segment");
        }
        Ok(())
    }

    fn inspect_inbound(&self, packet: &mut Packet) -> Result<(), PacketError> {
        let mut state = self.state();

        if state.identity.is_none() {
            if packet.read_code()? == CommandCode::LOGIN {
                let identity = read_identity(packet)?;
                tracing::info!(
                    session = self.id,
                    name = %identity.name,
                    account = identity.id,
                    login_id = identity.login_id,
                    anonymous = identity.is_anonymous,
                    "session logged in"
                );
                state.identity = Some(identity);
            }
            return Ok(());
        }

        if !state.recovery.awaiting_echo() || packet.read_code()? != CommandCode::CHAT {
            return Ok(());
        }

        let sender = packet.read_utf()?;
        let own_name = state.identity.as_ref().is_some_and(|i| i.name == sender);
        if !own_name {
            return Ok(());
        }

        match packet.read_array::<CIPHER_KEY_LEN>() {
            Ok(plaintext) => {
                if let Some(key) = state.recovery.resolve(&plaintext) {
                    tracing::info!(session = self.id, key = ?key, "message key recovered");
                }
                Ok(())
            }
            Err(e) => {
                state.recovery.discard();
                Err(e)
            }
        }
    }
}

fn read_identity(packet: &mut Packet) -> Result<Identity, PacketError> {
    let id = packet.read_u32()?;
    let name = packet.read_utf()?;
    packet.read_u32()?; // played time
    packet.read_u8()?; // community
    let login_id = packet.read_u32()?;
    Ok(Identity {
        id,
        name,
        login_id,
        is_anonymous: id == 0,
    })
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("main", &self.main)
            .finish_non_exhaustive()
    }
}
