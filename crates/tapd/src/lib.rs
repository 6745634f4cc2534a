//! tapd — intercepts game traffic, links main and bulle connections into
//! sessions and hands every packet to observers.

pub mod capture;
pub mod connection;
pub mod dispatch;
pub mod driver;
pub mod linker;
pub mod scanner;
pub mod trace;

pub use capture::{BackendFactory, CaptureBackend, CaptureError, CapturedPacket};
pub use connection::{Connection, ConnectionState, ConnectionTable, PacketParser, ParseOutcome, ParserFactory};
pub use dispatch::{ChannelSink, ObserverDispatcher};
pub use driver::CaptureDriver;
pub use linker::{AddressWatch, LinkStats, LinkerFactory};
pub use scanner::Scanner;
