//! Dedicated background thread that runs a task on a fixed interval or when
//! woken explicitly.
//!
//! Shutdown sets a stop flag and wakes the thread once. The task observes the
//! flag through [`Wakeup::is_running`] so long passes can bail out early.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error};

use crate::{Error, Result};

#[derive(Debug)]
struct SignalState {
    woken: bool,
    running: bool,
}

#[derive(Debug)]
struct Signal {
    state: Mutex<SignalState>,
    cv: Condvar,
}

/// Shared stop flag and wake signal of one background thread.
#[derive(Debug, Clone)]
pub struct Wakeup {
    signal: Arc<Signal>,
}

impl Default for Wakeup {
    fn default() -> Self {
        Self::new()
    }
}

impl Wakeup {
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal {
                state: Mutex::new(SignalState {
                    woken: false,
                    running: true,
                }),
                cv: Condvar::new(),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.signal.state.lock().running
    }

    pub fn wake(&self) {
        let mut state = self.signal.state.lock();
        state.woken = true;
        self.signal.cv.notify_all();
    }

    /// Clears the running flag and wakes the thread. Idempotent.
    pub fn stop(&self) {
        let mut state = self.signal.state.lock();
        state.running = false;
        self.signal.cv.notify_all();
    }

    /// Waits for a wake-up or `interval`. Returns `false` once stopped.
    fn wait(&self, interval: Duration) -> bool {
        let mut state = self.signal.state.lock();
        if !state.woken && state.running {
            self.signal.cv.wait_for(&mut state, interval);
        }
        state.woken = false;
        state.running
    }
}

pub struct PollingThread {
    name: String,
    wakeup: Wakeup,
    handle: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl PollingThread {
    /// Spawns `task`, invoked after every wake-up or elapsed `interval` until
    /// stopped. A task error ends the thread; it is returned by [`stop`].
    ///
    /// [`stop`]: PollingThread::stop
    pub fn spawn<F>(name: &str, interval: Duration, wakeup: Wakeup, mut task: F) -> Result<Self>
    where
        F: FnMut(&Wakeup) -> Result<()> + Send + 'static,
    {
        let thread_wakeup = wakeup.clone();
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while thread_wakeup.wait(interval) {
                    match task(&thread_wakeup) {
                        Ok(()) => {}
                        Err(Error::Interrupted) => {
                            debug!(thread = %thread_name, "background pass interrupted");
                            break;
                        }
                        Err(e) => {
                            error!(thread = %thread_name, error = %e, "background thread stopped");
                            thread_wakeup.stop();
                            return Err(e);
                        }
                    }
                }
                Ok(())
            })
            .map_err(|e| Error::storage_io(format!("unable to spawn thread {name}"), e))?;

        Ok(Self {
            name: name.to_string(),
            wakeup,
            handle: Mutex::new(Some(handle)),
        })
    }

    pub fn wake(&self) {
        self.wakeup.wake();
    }

    pub fn wakeup(&self) -> &Wakeup {
        &self.wakeup
    }

    /// Stops and joins the thread, returning the error that ended it, if any.
    /// Subsequent calls return `Ok(())`.
    pub fn stop(&self) -> Result<()> {
        self.wakeup.stop();
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => handle
                .join()
                .map_err(|_| Error::storage(format!("thread {} panicked", self.name)))?,
            None => Ok(()),
        }
    }
}

impl Drop for PollingThread {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!(thread = %self.name, error = %e, "background thread failed");
        }
    }
}
