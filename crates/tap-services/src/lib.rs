//! tap-services — session state shared between capture threads, and the
//! contract observers implement.

pub mod channel;
pub mod observer;
pub mod registry;
pub mod session;

pub use channel::{ChannelInfo, Role};
pub use observer::{EventSink, Observer};
pub use registry::PendingRegistry;
pub use session::{Identity, Session, SessionEvent};
