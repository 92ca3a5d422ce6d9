//! Resumable garbage collection of deleted memories.
//!
//! The driver owns the deletion queue and the polling thread; a [`Reclaimer`]
//! knows how to remove one batch of a memory's index entries and persists its
//! resume position in the same commit.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::polling::{PollingThread, Wakeup};
use crate::types::{Generation, MemoryId};
use crate::{Error, Result};

/// Records inspected between two checks of the running flag.
pub const INTERRUPT_CHECK_INTERVAL: usize = 1000;

/// Deletion in progress: the next position to reclaim for a memory generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub memory: MemoryId,
    pub generation: Generation,
    pub position: u64,
}

impl Checkpoint {
    pub fn start(memory: MemoryId, generation: Generation) -> Self {
        Self {
            memory,
            generation,
            position: 0,
        }
    }
}

pub trait Reclaimer: Send + Sync + 'static {
    /// Deletion interrupted by a previous run, if any.
    fn pending(&self) -> Result<Option<Checkpoint>>;

    /// Deleted generations that still hold data, in key order.
    fn queued(&self) -> Result<Vec<(MemoryId, Generation)>>;

    /// Removes up to `batch_size` records starting at `checkpoint.position` and
    /// persists the next position. Returns `None` once the generation is exhausted.
    /// Implementations return [`Error::Interrupted`] when `wakeup` stops mid-batch.
    fn reclaim_batch(&self, checkpoint: &Checkpoint, batch_size: usize, wakeup: &Wakeup) -> Result<Option<u64>>;

    /// Drops the generation's storage and its deletion markers.
    fn finish(&self, memory: MemoryId, generation: Generation) -> Result<()>;
}

/// Outcome of a bounded collection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    Idle,
    Pending,
}

struct Driver<R> {
    name: String,
    reclaimer: Arc<R>,
    queue: Mutex<VecDeque<(MemoryId, Generation)>>,
    current: Mutex<Option<Checkpoint>>,
    batch_size: usize,
}

impl<R: Reclaimer> Driver<R> {
    fn enqueue(&self, deletions: &[(MemoryId, Generation)]) {
        let mut queue = self.queue.lock();
        for deletion in deletions {
            if !queue.contains(deletion) {
                queue.push_back(*deletion);
            }
        }
    }

    /// Runs at most `budget` batches (all when `None`).
    fn collect(&self, budget: Option<usize>, wakeup: &Wakeup) -> Result<Progress> {
        // Holding `current` makes concurrent passes take turns.
        let mut current = self.current.lock();
        let mut batches = 0usize;

        loop {
            if current.is_none() {
                let next = self.queue.lock().pop_front();
                match next {
                    Some((memory, generation)) => {
                        info!(gc = %self.name, memory, generation, "deleting memory");
                        *current = Some(Checkpoint::start(memory, generation));
                    }
                    None => return Ok(Progress::Idle),
                }
            }
            let Some(mut checkpoint) = *current else {
                continue;
            };

            let started = Instant::now();
            loop {
                if budget.is_some_and(|b| batches >= b) {
                    return Ok(Progress::Pending);
                }
                if !wakeup.is_running() {
                    return Err(Error::Interrupted);
                }
                let next = self.reclaimer.reclaim_batch(&checkpoint, self.batch_size, wakeup)?;
                batches += 1;
                match next {
                    Some(position) => {
                        debug!(gc = %self.name, memory = checkpoint.memory, position, "batch reclaimed");
                        checkpoint.position = position;
                        *current = Some(checkpoint);
                    }
                    None => break,
                }
            }

            self.reclaimer.finish(checkpoint.memory, checkpoint.generation)?;
            *current = None;
            info!(
                gc = %self.name,
                memory = checkpoint.memory,
                generation = checkpoint.generation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "memory deleted"
            );
        }
    }
}

/// Background collector of deleted memories, resumable across restarts.
pub struct GarbageCollector<R: Reclaimer> {
    driver: Arc<Driver<R>>,
    thread: PollingThread,
}

impl<R: Reclaimer> GarbageCollector<R> {
    /// Restores the interrupted pass and the persisted queue, then starts polling.
    pub fn start(name: &str, reclaimer: Arc<R>, batch_size: usize, interval: Duration) -> Result<Self> {
        let pending = reclaimer.pending()?;
        let mut queue: VecDeque<(MemoryId, Generation)> = reclaimer.queued()?.into();
        if let Some(checkpoint) = &pending {
            queue.retain(|d| *d != (checkpoint.memory, checkpoint.generation));
            info!(
                gc = name,
                memory = checkpoint.memory,
                generation = checkpoint.generation,
                position = checkpoint.position,
                "resuming interrupted deletion"
            );
        }

        let driver = Arc::new(Driver {
            name: name.to_string(),
            reclaimer,
            queue: Mutex::new(queue),
            current: Mutex::new(pending),
            batch_size,
        });

        let worker = driver.clone();
        let thread = PollingThread::spawn(name, interval, Wakeup::new(), move |wakeup| {
            worker.collect(None, wakeup).map(|_| ())
        })?;
        Ok(Self { driver, thread })
    }

    /// Queues deleted generations for the next poll. Idempotent.
    pub fn mark_for_deletion(&self, deletions: &[(MemoryId, Generation)]) {
        self.driver.enqueue(deletions);
    }

    /// Runs a collection pass on the calling thread, limited to `budget` batches.
    pub fn collect(&self, budget: Option<usize>) -> Result<Progress> {
        self.driver.collect(budget, self.thread.wakeup())
    }

    /// Generations waiting for collection, the one in progress first.
    pub fn backlog(&self) -> Vec<(MemoryId, Generation)> {
        let current = *self.driver.current.lock();
        current
            .map(|c| (c.memory, c.generation))
            .into_iter()
            .chain(self.driver.queue.lock().iter().copied())
            .collect()
    }

    /// Runs collection on the calling thread until `(memory, generation)` is
    /// gone, when it is still waiting. Generation numbers wrap around; a retired
    /// one must be collected before the number is handed out again.
    pub fn reclaim_before_reuse(&self, memory: MemoryId, generation: Generation) -> Result<()> {
        if !self.backlog().contains(&(memory, generation)) {
            return Ok(());
        }
        warn!(memory, generation, "generation reused before collection, collecting now");
        self.collect(None)?;
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        self.thread.stop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// In-memory reclaimer: each generation holds `records` numbered positions.
    #[derive(Default)]
    struct Fake {
        records: Mutex<HashMap<(MemoryId, Generation), Vec<u64>>>,
        checkpoint: Mutex<Option<Checkpoint>>,
        finished: Mutex<Vec<(MemoryId, Generation)>>,
    }

    impl Reclaimer for Fake {
        fn pending(&self) -> Result<Option<Checkpoint>> {
            Ok(*self.checkpoint.lock())
        }

        fn queued(&self) -> Result<Vec<(MemoryId, Generation)>> {
            Ok(Vec::new())
        }

        fn reclaim_batch(&self, cp: &Checkpoint, batch_size: usize, _wakeup: &Wakeup) -> Result<Option<u64>> {
            let mut records = self.records.lock();
            let list = records.entry((cp.memory, cp.generation)).or_default();
            let remaining: Vec<u64> = list.iter().copied().filter(|p| *p >= cp.position).collect();
            if remaining.is_empty() {
                return Ok(None);
            }
            let taken: Vec<u64> = remaining.into_iter().take(batch_size).collect();
            list.retain(|p| !taken.contains(p));
            let next = taken.last().copied().unwrap_or(cp.position) + 1;
            *self.checkpoint.lock() = Some(Checkpoint { position: next, ..*cp });
            Ok(Some(next))
        }

        fn finish(&self, memory: MemoryId, generation: Generation) -> Result<()> {
            *self.checkpoint.lock() = None;
            self.finished.lock().push((memory, generation));
            Ok(())
        }
    }

    fn fake_with(memory: MemoryId, n: u64) -> Arc<Fake> {
        let fake = Fake::default();
        fake.records.lock().insert((memory, 0), (0..n).collect());
        Arc::new(fake)
    }

    #[test]
    fn collects_queued_memory_in_batches() {
        let fake = fake_with(3, 10);
        let gc = GarbageCollector::start("gc-test", fake.clone(), 4, Duration::from_secs(60)).unwrap();
        gc.mark_for_deletion(&[(3, 0), (3, 0)]);
        assert_eq!(gc.collect(None).unwrap(), Progress::Idle);
        assert_eq!(*fake.finished.lock(), vec![(3, 0)]);
        assert!(fake.records.lock()[&(3, 0)].is_empty());
        gc.stop().unwrap();
    }

    #[test]
    fn bounded_pass_resumes_from_checkpoint() {
        let fake = fake_with(5, 10);
        {
            let gc = GarbageCollector::start("gc-first", fake.clone(), 3, Duration::from_secs(60)).unwrap();
            gc.stop().unwrap();
            gc.mark_for_deletion(&[(5, 0)]);
            assert!(gc.collect(Some(2)).unwrap_err().is_interrupted());
        }

        let gc = GarbageCollector::start("gc-second", fake.clone(), 3, Duration::from_secs(60)).unwrap();
        gc.mark_for_deletion(&[(5, 0)]);
        assert_eq!(gc.collect(Some(2)).unwrap(), Progress::Pending);
        assert_eq!(*fake.checkpoint.lock(), Some(Checkpoint { memory: 5, generation: 0, position: 6 }));
        drop(gc);

        let gc = GarbageCollector::start("gc-third", fake.clone(), 3, Duration::from_secs(60)).unwrap();
        assert_eq!(gc.backlog(), vec![(5, 0)]);
        assert_eq!(gc.collect(None).unwrap(), Progress::Idle);
        assert!(fake.records.lock()[&(5, 0)].is_empty());
        assert_eq!(*fake.finished.lock(), vec![(5, 0)]);
    }

    #[test]
    fn reused_generation_is_collected_first() {
        let fake = fake_with(2, 5);
        let gc = GarbageCollector::start("gc-reuse", fake.clone(), 2, Duration::from_secs(60)).unwrap();
        gc.reclaim_before_reuse(2, 0).unwrap();
        assert!(fake.finished.lock().is_empty());

        gc.mark_for_deletion(&[(2, 0)]);
        gc.reclaim_before_reuse(2, 1).unwrap();
        assert_eq!(gc.backlog(), vec![(2, 0)]);

        gc.reclaim_before_reuse(2, 0).unwrap();
        assert!(gc.backlog().is_empty());
        assert_eq!(*fake.finished.lock(), vec![(2, 0)]);
        assert!(fake.records.lock()[&(2, 0)].is_empty());
        gc.stop().unwrap();
    }
}
