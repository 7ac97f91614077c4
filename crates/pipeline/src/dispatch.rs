use crate::worker::process;
use async_stream::stream;
use futures::stream::FuturesUnordered;
use futures::{Stream, StreamExt};
use grist_ledger::Attempt;
use grist_preprocess::Chain;
use grist_storage::BackendHandle;
use std::collections::{HashSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Enumerated inputs that have no ledger entry yet, in enumeration order.
pub fn plan(enumerated: &[String], attempted: &HashSet<String>) -> Vec<String> {
    enumerated.iter().filter(|relpath| !attempted.contains(*relpath)).cloned().collect()
}

/// Run every job through a worker, at most `workers` at a time.
///
/// Each job is started exactly once, in submission order, and a new one is
/// started whenever one finishes. Results are yielded as they complete, so
/// their order is unrelated to the order of `jobs`.
pub(crate) fn dispatch<'a>(
    backend: &'a BackendHandle,
    chain: &'a Chain,
    siblings: Arc<[String]>,
    jobs: Vec<String>,
    workers: NonZeroUsize,
) -> impl Stream<Item = Attempt> + 'a {
    stream!({
        let mut queue: VecDeque<_> = jobs.into_iter().map(|relpath| process(backend, chain, &siblings, relpath)).collect();
        let mut running = FuturesUnordered::new();
        running.extend(queue.drain(..workers.get().min(queue.len())));
        while let Some(attempt) = running.next().await {
            if let Some(next) = queue.pop_front() {
                running.push(next);
            }
            yield attempt;
        }
    })
}
