//! # sealpost-outbox: Durable outgoing message queue
//!
//! Messages the application wants sent are persisted here before any network
//! activity. A record stays in the outbox until the ordering server has
//! confirmed it, so a crash or a lost connection never drops a message.
//!
//! # Stores
//!
//! - [`MemoryOutbox`]: process-local, for tests and ephemeral sessions
//! - [`FileOutbox`]: a single file of CRC-framed records, rewritten through a
//!   temp file and an atomic rename on every mutation
//!
//! Both implement [`OutboxStore`] and share the ordering rules in
//! [`RecordSet`]: records drain by compose time, ties broken by a
//! per-outbox ordinal.

mod error;
mod file;
mod frame;
mod memory;
mod record;
mod set;
mod store;

pub use error::{OutboxError, OutboxResult};
pub use file::FileOutbox;
pub use memory::MemoryOutbox;
pub use record::{FIRST_ORDINAL, FailureKind, OutboxRecord, RecordState};
pub use set::RecordSet;
pub use store::OutboxStore;
