use std::sync::Arc;

use archive::{entry::ArchiveEntry, EntrySink, OrderedWriter};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::BuildError;

const MAX_PRODUCERS: usize = 4096;

/// Blocking producers admitted through a counting gate, each committing one
/// entry through an [`OrderedWriter`].
pub(crate) struct Producers {
    gate: Arc<Semaphore>,
    permits: u32,
    tasks: JoinSet<Result<(), BuildError>>,
}

impl Producers {
    pub(crate) fn new(permits: usize) -> Self {
        let permits = permits.clamp(1, MAX_PRODUCERS) as u32;
        Producers {
            gate: Arc::new(Semaphore::new(permits as usize)),
            permits,
            tasks: JoinSet::new(),
        }
    }

    /// Waits for a free slot, takes the writer's next sequence number and
    /// runs `work` on the blocking pool. A failed producer aborts the writer.
    pub(crate) async fn spawn<S, F>(
        &mut self,
        writer: &Arc<OrderedWriter<S>>,
        work: F,
    ) -> Result<(), BuildError>
    where
        S: EntrySink<Entry = ArchiveEntry> + Send + 'static,
        F: FnOnce() -> Result<ArchiveEntry, BuildError> + Send + 'static,
    {
        let permit = Arc::clone(&self.gate).acquire_owned().await?;
        let sequence = writer.next_sequence();
        let writer = Arc::clone(writer);
        self.tasks.spawn_blocking(move || {
            let result =
                work().and_then(|entry| writer.add(sequence, entry).map_err(BuildError::from));
            if let Err(err) = &result {
                writer.abort(err.to_string());
            }
            drop(permit);
            result
        });
        Ok(())
    }

    /// Waits until every admitted producer has finished and returns the
    /// first root-cause failure among them.
    pub(crate) async fn drain(&mut self) -> Result<(), BuildError> {
        let all = self.gate.acquire_many(self.permits).await?;
        let mut root = None;
        let mut secondary = None;
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined? {
                if err.is_secondary() {
                    secondary.get_or_insert(err);
                } else {
                    root.get_or_insert(err);
                }
            }
        }
        drop(all);
        match root.or(secondary) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Takes sole ownership of a drained writer's sink.
pub(crate) fn into_sink<S: EntrySink>(writer: Arc<OrderedWriter<S>>) -> Result<S, BuildError> {
    let writer = Arc::try_unwrap(writer).map_err(|_| BuildError::WriterShared)?;
    Ok(writer.into_inner()?)
}
