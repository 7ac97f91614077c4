//! SQLite ledger and artifact store.
//!
//! Every corpus is a namespace keyed by its identity (a digest of its
//! definition). Within it the database records:
//!
//! - **Ledger entries**: one per attempted input relpath, whatever the
//!   outcome. Presence alone is what lets a later pass skip the input.
//! - **Artifacts**: preprocessing outputs keyed by the hex BLAKE3 digest of
//!   their text. Storing the same hash twice is a no-op.
//! - **Done marker**: set once per corpus lifetime, after a pass leaves no
//!   unattempted input behind.
//!
//! Entries and artifacts are written together in [`Batch`] commits so one is
//! never visible without the other.

mod db;
pub mod error;
mod models;
mod repo;

pub use crate::db::Database;
pub use crate::models::{
    Artifact, Attempt, Batch, CommitSummary, CorpusRecord, CorpusState, CorpusSummary, EntryOutcome, LedgerEntry,
};
pub use crate::repo::Ledger;
