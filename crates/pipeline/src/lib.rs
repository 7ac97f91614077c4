//! Incremental preprocessing of corpora.
//!
//! A pass over a corpus:
//!
//! 1. registers the corpus identity with the [`Ledger`](grist_ledger::Ledger)
//!    and stops early if the corpus is already done;
//! 2. materializes the source (a directory, or an archive unpacked into a
//!    temporary directory) and [enumerates](enumerate::enumerate) it;
//! 3. dispatches every input without a ledger entry to a bounded pool of
//!    workers, each of which reads, decodes and runs the preprocessing chain;
//! 4. commits finished attempts in periodic [checkpoints](Checkpointer);
//! 5. marks the corpus done once no enumerated input is left unattempted.
//!
//! Interrupting a pass at any point loses at most the work since the last
//! checkpoint. The next pass picks up from there.

mod checkpoint;
mod dispatch;
pub mod enumerate;
pub mod error;
mod export;
mod report;
mod run;
mod worker;

pub use crate::checkpoint::Checkpointer;
pub use crate::dispatch::plan;
pub use crate::export::{DONE_MARKER, ExportOptions, export, exported};
pub use crate::report::Report;
pub use crate::run::{Corpus, Event, Pipeline, Processed, Settings};
pub use crate::worker::INTERNAL_ERROR_PREFIX;
