//! MITM relay engine for a JSON-over-WebSocket request/response protocol.
//!
//! The relay sits between a client and an upstream server, forwarding
//! traffic transparently by default with two injection points:
//!
//! * a [`CommandDispatcher`] on the client→upstream direction that answers
//!   selected requests locally, short-circuiting traffic that should never
//!   reach upstream, and
//! * an [`UpstreamInterceptor`] on the upstream→client direction that
//!   rewrites matched responses before the client sees them.
//!
//! # Architecture
//!
//! ```text
//! Client  <--WS-->  relay  <--WS-->  Upstream
//!                    |  \
//!          [dispatcher]  [interceptor]
//!                    |
//!              [rate-guard]
//! ```
//!
//! Each accepted client is coupled to one asynchronously dialed upstream
//! connection in a [`ConnectionPair`]; messages that arrive while the dial
//! is in flight are buffered in a strict-FIFO pending queue and flushed
//! before any live traffic. Closing or erroring either leg actively closes
//! the other.

pub mod client_ip;
pub mod dispatch;
pub mod intercept;
pub mod listener;
pub mod message;
pub mod pair;
pub mod queue;
pub mod session;
pub mod upstream;

// Re-export the primary public types at the crate root for convenience.
pub use dispatch::{CommandDispatcher, CommandHandler};
pub use intercept::{InterceptRule, UpstreamInterceptor};
pub use listener::{Relay, RelayConfig};
pub use message::RelayMessage;
pub use pair::{ClientHandle, ConnectionPair, LinkError, PairState, SendOutcome, UpstreamLink};
pub use queue::PendingQueue;
pub use session::{SessionChannels, SessionRef};
