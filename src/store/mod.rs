//! Persistent stores (§4.3, §4.4, §4.6): FileLedger, QuoteStore, EventStore.
//! Each owns its own `Connection` borrow over the shared store file, per
//! §5's per-component connection-ownership policy.

pub mod events;
pub mod ledger;
pub mod quotes;

pub use events::{ActionKind, CorporateAction, EventImportRow, EventStore, ImportOutcome};
pub use ledger::{ArchiveKindTag, FileLedger, FileLedgerEntry, ProcessedVerdict};
pub use quotes::{QuoteStore, QuoteStoreStats};
