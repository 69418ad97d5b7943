//! Launch completion.
//!
//! The worker that runs a launch sends its outcome through a oneshot channel;
//! [`CompletionSignal::wait`] blocks on the receiving end and caches what it
//! gets, so every later wait returns the same outcome immediately.

use std::{
    sync::{Mutex, OnceLock, PoisonError},
    time::Duration,
};

use futures::channel::oneshot;

use crate::error::{GridError, Result};

/// Summary of a finished launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchReport {
    pub tiles: usize,
    pub work_items: usize,
    /// Barriers reached per work-item. Zero when barrier checking is disabled.
    pub barriers_per_item: usize,
    pub elapsed: Duration,
}

pub(crate) type Outcome = Result<LaunchReport>;

/// Handle to a pending or completed launch.
#[derive(Debug)]
pub struct CompletionSignal {
    outcome: OnceLock<Outcome>,
    receiver: Mutex<Option<oneshot::Receiver<Outcome>>>,
}

impl CompletionSignal {
    pub(crate) fn pending() -> (oneshot::Sender<Outcome>, Self) {
        let (tx, rx) = oneshot::channel();
        let signal = Self {
            outcome: OnceLock::new(),
            receiver: Mutex::new(Some(rx)),
        };
        (tx, signal)
    }

    /// A signal that is already complete, for work that needed no launch.
    pub fn ready(report: LaunchReport) -> Self {
        Self {
            outcome: OnceLock::from(Ok(report)),
            receiver: Mutex::new(None),
        }
    }

    /// Blocks until the launch completes and returns its outcome.
    pub fn wait(&self) -> Result<LaunchReport> {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }

        let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        // Another waiter may have finished while we queued on the lock
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }
        let outcome = match receiver.take() {
            Some(rx) => pollster::block_on(rx).unwrap_or(Err(GridError::LaunchDropped)),
            None => Err(GridError::LaunchDropped),
        };
        self.outcome.get_or_init(|| outcome).clone()
    }

    /// Whether the launch has finished, without blocking.
    pub fn is_complete(&self) -> bool {
        if self.outcome.get().is_some() {
            return true;
        }

        let mut receiver = self.receiver.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(rx) = receiver.as_mut() else {
            return self.outcome.get().is_some();
        };
        let outcome = match rx.try_recv() {
            Ok(None) => return false,
            Ok(Some(outcome)) => outcome,
            Err(oneshot::Canceled) => Err(GridError::LaunchDropped),
        };
        receiver.take();
        let _ = self.outcome.set(outcome);
        true
    }
}
