//! Ordered progress delivery on a dedicated thread.
//!
//! ```text
//! ┌──────────────────┐   unbounded channel   ┌──────────────────┐
//! │ Acquisition loop │ ──(index, point)───▶  │ Notifier thread  │
//! │  (owns the bus)  │                       │ (user callback)  │
//! └──────────────────┘                       └──────────────────┘
//! ```
//!
//! The acquisition loop never waits on the callback. Points arrive at the
//! callback in the order they were sent, each exactly once. Errors and panics
//! raised by the callback are logged on the notifier thread and go no further.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};

/// Error type a progress callback may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Called with `(step index, point)` for every completed step.
pub type ProgressCallback<T> = Box<dyn FnMut(usize, &T) -> Result<(), CallbackError> + Send>;

/// Background deliverer of per-step progress events.
///
/// Dropping the notifier behaves like [`ProgressNotifier::end`]: pending events
/// are still delivered and the thread is joined.
pub struct ProgressNotifier<T: Send + 'static> {
    sender: Option<Sender<(usize, T)>>,
    handle: Option<JoinHandle<usize>>,
    next_index: usize,
}

impl<T: Send + 'static> ProgressNotifier<T> {
    /// Spawn the notifier thread.
    pub fn start<F>(mut callback: F) -> std::io::Result<Self>
    where
        F: FnMut(usize, &T) -> Result<(), CallbackError> + Send + 'static,
    {
        let (sender, receiver) = unbounded::<(usize, T)>();

        let handle = thread::Builder::new()
            .name("ivsweep-progress".to_string())
            .spawn(move || {
                let mut delivered = 0;
                for (index, point) in receiver {
                    match panic::catch_unwind(AssertUnwindSafe(|| callback(index, &point))) {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => log::warn!("Progress callback failed at step {}: {}", index, e),
                        Err(_) => log::error!("Progress callback panicked at step {}", index),
                    }
                    delivered += 1;
                }
                delivered
            })?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            next_index: 0,
        })
    }

    /// Notifier whose events go nowhere.
    pub fn discard() -> std::io::Result<Self> {
        Self::start(|_, _: &T| Ok(()))
    }

    /// Queue the next completed step and return its index.
    pub fn notify(&mut self, point: T) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        if let Some(sender) = &self.sender {
            // The receiver only goes away together with the thread, which lives
            // until the sender is dropped.
            if sender.send((index, point)).is_err() {
                log::error!("Progress notifier thread is gone, dropping step {}", index);
            }
        }
        index
    }

    /// Number of events queued so far.
    pub fn sent(&self) -> usize {
        self.next_index
    }

    /// Stop accepting events, wait for the queued ones to be delivered and
    /// return how many callbacks ran.
    pub fn end(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        self.sender.take();
        match self.handle.take().map(JoinHandle::join) {
            Some(Ok(delivered)) => delivered,
            Some(Err(_)) => {
                log::error!("Progress notifier thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl<T: Send + 'static> Drop for ProgressNotifier<T> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            log::debug!("Progress notifier dropped, draining {} queued events", self.next_index);
            self.shutdown();
        }
    }
}
