//! Append-only JSON-lines logging of relay routing decisions.
//!
//! Every notable decision the relay makes (admitting or refusing a
//! connection, dispatching a command locally, intercepting an upstream
//! response, dropping a rate-limited or malformed message, tearing a pair
//! down) is recorded as one newline-terminated JSON object, giving an
//! auditable stream that is easy to ship, grep, and replay.
//!
//! Producers hold a cheap [`EventSink`] clone and never block on disk: a
//! background task batches writes and flushes on idle.

pub mod event;
pub mod sink;
pub mod writer;

pub use event::{EventKind, RelayEvent};
pub use sink::EventSink;
pub use writer::{EventWriteError, EventWriter};
