//! Debounced, cancellable background task used for persisting the cache.

use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Runs at most one delayed task at a time.
///
/// Scheduling again before the delay has elapsed cancels the pending task and
/// restarts the delay, so a burst of requests collapses into one run that
/// happens `delay` after the last request.
pub struct PersistScheduler {
  delay: Duration,
  pending: Mutex<Option<JoinHandle<()>>>,
}

impl PersistScheduler {
  pub fn new(delay: Duration) -> Self {
    Self {
      delay,
      pending: Mutex::new(None),
    }
  }

  /// Schedule `task` to run after the debounce delay.
  ///
  /// Returns `false` without running anything when called outside a tokio
  /// runtime; the caller is expected to run the task itself.
  pub fn schedule<F>(&self, task: F) -> bool
  where
    F: FnOnce() + Send + 'static,
  {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
      return false;
    };

    let delay = self.delay;
    let join = handle.spawn(async move {
      tokio::time::sleep(delay).await;
      task();
    });

    let previous = match self.pending.lock() {
      Ok(mut pending) => pending.replace(join),
      Err(poisoned) => poisoned.into_inner().replace(join),
    };
    if let Some(previous) = previous {
      previous.abort();
    }
    true
  }

  /// Cancel the pending task. Returns whether one was still waiting.
  pub fn cancel(&self) -> bool {
    let pending = match self.pending.lock() {
      Ok(mut pending) => pending.take(),
      Err(poisoned) => poisoned.into_inner().take(),
    };
    match pending {
      Some(join) if !join.is_finished() => {
        join.abort();
        true
      }
      _ => false,
    }
  }

  /// Whether a scheduled task has not run yet.
  pub fn is_pending(&self) -> bool {
    match self.pending.lock() {
      Ok(pending) => pending.as_ref().is_some_and(|join| !join.is_finished()),
      Err(_) => false,
    }
  }
}

impl Drop for PersistScheduler {
  fn drop(&mut self) {
    self.cancel();
  }
}
