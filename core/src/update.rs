//! Double-buffered update batching.
//!
//! Producers fill the foreground [`UpdateBatch`]; a dedicated thread swaps it
//! with the background batch on timeout or when the foreground is full, then
//! persists the background batch through a [`BatchWriter`] outside the lock.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::config::UpdateOptions;
use crate::polling::{PollingThread, Wakeup};
use crate::streams::StreamWatermarks;
use crate::types::{MemoryId, UpdateId};
use crate::{Error, Result};

/// Model-specific payload of an update batch.
pub trait BatchContent: Default + Send + 'static {
    type Entry: Send;

    fn add(&mut self, memory: MemoryId, entry: Self::Entry);

    /// Deletes `memory`; entries of `memory` added earlier in this batch are dropped.
    fn delete(&mut self, memory: MemoryId);

    /// Number of buffered operations, deletions included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);
}

/// Persists a batch: storage first, then index and watermarks in one commit.
pub trait BatchWriter<C: BatchContent>: Send + Sync + 'static {
    fn put_batch(&self, batch: &UpdateBatch<C>) -> Result<()>;
}

#[derive(Debug)]
pub struct UpdateBatch<C> {
    content: C,
    watermarks: StreamWatermarks,
    max_size: usize,
}

impl<C: BatchContent> UpdateBatch<C> {
    pub fn new(max_size: usize, watermarks: StreamWatermarks) -> Self {
        Self {
            content: C::default(),
            watermarks,
            max_size,
        }
    }

    /// Buffers `entry`. Returns `false` if the batch is full; a stale `id` is a
    /// no-op that still returns `true`.
    pub fn add(&mut self, id: UpdateId, memory: MemoryId, entry: C::Entry) -> bool {
        if self.is_full() {
            return false;
        }
        if self.watermarks.advance(&id) {
            self.content.add(memory, entry);
        }
        true
    }

    pub fn delete(&mut self, id: UpdateId, memory: MemoryId) -> bool {
        if self.is_full() {
            return false;
        }
        if self.watermarks.advance(&id) {
            self.content.delete(memory);
        }
        true
    }

    pub fn is_full(&self) -> bool {
        self.content.len() >= self.max_size
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    /// Watermarks including every update accepted by this batch.
    pub fn watermarks(&self) -> &StreamWatermarks {
        &self.watermarks
    }

    pub fn clear(&mut self) {
        self.content.clear();
    }

    /// Empties the batch and restarts it from `watermarks`.
    pub fn reset(&mut self, watermarks: StreamWatermarks) {
        self.content.clear();
        self.watermarks = watermarks;
    }
}

struct Foreground<C> {
    batch: UpdateBatch<C>,
    failure: Option<String>,
    closed: bool,
}

struct Shared<C: BatchContent, W> {
    writer: Arc<W>,
    foreground: Mutex<Foreground<C>>,
    // Held for the whole swap-and-write cycle; serializes writers.
    background: Mutex<UpdateBatch<C>>,
    swapped: Condvar,
    wakeup: Wakeup,
}

impl<C: BatchContent, W: BatchWriter<C>> Shared<C, W> {
    fn cycle(&self) -> Result<()> {
        let mut background = self.background.lock();
        {
            let mut fg = self.foreground.lock();
            if fg.batch.is_empty() {
                return Ok(());
            }
            std::mem::swap(&mut fg.batch, &mut *background);
            fg.batch.reset(background.watermarks().clone());
            self.swapped.notify_all();
        }

        let started = Instant::now();
        let entries = background.len();
        let result = self.writer.put_batch(&background);
        background.clear();
        match result {
            Ok(()) => {
                debug!(entries, elapsed_ms = started.elapsed().as_millis() as u64, "batch flushed");
                Ok(())
            }
            Err(e) => {
                let mut fg = self.foreground.lock();
                fg.failure = Some(e.to_string());
                self.swapped.notify_all();
                Err(e)
            }
        }
    }

    fn submit<F>(&self, mut op: F) -> Result<()>
    where
        F: FnMut(&mut UpdateBatch<C>) -> bool,
    {
        let mut fg = self.foreground.lock();
        loop {
            if let Some(reason) = &fg.failure {
                return Err(Error::storage(format!("update pipeline stopped: {reason}")));
            }
            if fg.closed {
                return Err(Error::storage("update pipeline is shut down"));
            }
            if !fg.batch.is_full() && op(&mut fg.batch) {
                return Ok(());
            }
            self.wakeup.wake();
            self.swapped.wait(&mut fg);
        }
    }
}

/// Owns the foreground/background batches and the flushing thread.
pub struct UpdateManager<C: BatchContent, W: BatchWriter<C>> {
    shared: Arc<Shared<C, W>>,
    thread: PollingThread,
}

impl<C: BatchContent, W: BatchWriter<C>> UpdateManager<C, W> {
    /// Starts the pipeline from the committed `watermarks` of `writer`.
    pub fn new(
        name: &str,
        writer: Arc<W>,
        options: &UpdateOptions,
        watermarks: StreamWatermarks,
    ) -> Result<Self> {
        let wakeup = Wakeup::new();
        let shared = Arc::new(Shared {
            writer,
            foreground: Mutex::new(Foreground {
                batch: UpdateBatch::new(options.buffer_size, watermarks.clone()),
                failure: None,
                closed: false,
            }),
            background: Mutex::new(UpdateBatch::new(options.buffer_size, watermarks)),
            swapped: Condvar::new(),
            wakeup: wakeup.clone(),
        });

        let worker = shared.clone();
        let thread = PollingThread::spawn(name, options.max_delay(), wakeup, move |_| worker.cycle())?;
        info!(name, buffer_size = options.buffer_size, "update manager started");
        Ok(Self { shared, thread })
    }

    /// Queues `entry` for `memory`. Blocks while the foreground batch is full.
    pub fn add(&self, id: UpdateId, memory: MemoryId, entry: C::Entry) -> Result<()> {
        let mut entry = Some(entry);
        self.shared.submit(|batch| match entry.take() {
            Some(e) => batch.add(id, memory, e),
            None => true,
        })
    }

    pub fn delete(&self, id: UpdateId, memory: MemoryId) -> Result<()> {
        self.shared.submit(|batch| batch.delete(id, memory))
    }

    /// Persists everything buffered so far on the calling thread.
    pub fn flush(&self) -> Result<()> {
        self.shared.cycle()
    }

    /// Watermarks of every accepted update, committed or not.
    pub fn watermarks(&self) -> StreamWatermarks {
        self.shared.foreground.lock().batch.watermarks().clone()
    }

    /// Stops the thread, then flushes what is left. Returns the first error
    /// met by the background thread or the final flush.
    pub fn shutdown(&self) -> Result<()> {
        let thread_result = self.thread.stop();
        let failed = {
            let mut fg = self.shared.foreground.lock();
            fg.closed = true;
            self.shared.swapped.notify_all();
            fg.failure.is_some()
        };
        thread_result?;
        if !failed {
            self.shared.cycle()?;
        }
        Ok(())
    }
}

impl<C: BatchContent, W: BatchWriter<C>> Drop for UpdateManager<C, W> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            tracing::error!(error = %e, "update manager shutdown failed");
        }
    }
}
