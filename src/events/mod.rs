//! Typed events, envelopes, and the ledger persistence seam.

pub mod envelope;
pub mod ledger;
pub mod types;

pub use envelope::Envelope;
pub use ledger::{
    JsonlLedger, LedgerError, LedgerWriter, MemoryLedger, RetryingLedger, SharedLedger,
};
pub use types::{EventPayload, EventRecord};
