use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::BoxError;

enum State {
    Pending,
    Succeeded,
    Failed(Arc<BoxError>),
}

struct Inner {
    state: Mutex<State>,
    done: Condvar,
}

/// Completion handle for an outbound operation.
///
/// Cloning is cheap and every clone observes the same completion. The
/// transport (or the head sentinel, for failures the transport never sees)
/// completes the future exactly once; later completions are ignored.
///
/// # Example
///
/// ```rust
/// use pipeway::ChannelFuture;
///
/// let future = ChannelFuture::new();
/// assert!(!future.is_done());
/// future.succeed();
/// assert!(future.is_success());
/// ```
#[derive(Clone)]
pub struct ChannelFuture {
    inner: Arc<Inner>,
}

impl Default for ChannelFuture {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelFuture {
    /// Creates a pending future.
    pub fn new() -> Self {
        ChannelFuture {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending),
                done: Condvar::new(),
            }),
        }
    }

    /// Marks the operation successful. Returns `false` if the future was
    /// already completed.
    pub fn succeed(&self) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(*state, State::Pending) {
            return false;
        }
        *state = State::Succeeded;
        self.inner.done.notify_all();
        true
    }

    /// Marks the operation failed with `cause`. Returns `false` if the
    /// future was already completed.
    pub fn fail(&self, cause: impl Into<BoxError>) -> bool {
        let mut state = self.inner.state.lock();
        if !matches!(*state, State::Pending) {
            return false;
        }
        *state = State::Failed(Arc::new(cause.into()));
        self.inner.done.notify_all();
        true
    }

    /// `true` once the future has been completed either way.
    pub fn is_done(&self) -> bool {
        !matches!(*self.inner.state.lock(), State::Pending)
    }

    /// `true` once the future has been completed successfully.
    pub fn is_success(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Succeeded)
    }

    /// `true` once the future has been completed with a failure.
    pub fn is_failed(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Failed(_))
    }

    /// The failure cause, once failed.
    pub fn cause(&self) -> Option<Arc<BoxError>> {
        match &*self.inner.state.lock() {
            State::Failed(cause) => Some(cause.clone()),
            _ => None,
        }
    }

    /// Blocks until the future completes.
    pub fn wait(&self) -> Result<(), Arc<BoxError>> {
        let mut state = self.inner.state.lock();
        while matches!(*state, State::Pending) {
            self.inner.done.wait(&mut state);
        }
        match &*state {
            State::Succeeded => Ok(()),
            State::Failed(cause) => Err(cause.clone()),
            State::Pending => unreachable!(),
        }
    }

    /// Blocks until the future completes or `timeout` elapses. Returns
    /// `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), Arc<BoxError>>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while matches!(*state, State::Pending) {
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        match &*state {
            State::Succeeded => Some(Ok(())),
            State::Failed(cause) => Some(Err(cause.clone())),
            State::Pending => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn completes_once() {
        let future = ChannelFuture::new();
        assert!(future.succeed());
        assert!(!future.fail("too late"));
        assert!(future.is_success());
        assert!(future.cause().is_none());
    }

    #[test]
    fn failure_keeps_its_cause() {
        let future = ChannelFuture::new();
        assert!(future.fail("boom"));
        assert!(future.is_failed());
        assert_eq!(future.cause().unwrap().to_string(), "boom");
        assert!(future.wait().is_err());
    }

    #[test]
    fn wait_blocks_until_completed_from_another_thread() {
        let future = ChannelFuture::new();
        let remote = future.clone();
        let completer = thread::spawn(move || {
            remote.succeed();
        });
        assert!(future.wait().is_ok());
        completer.join().unwrap();
    }

    #[test]
    fn wait_timeout_reports_pending() {
        let future = ChannelFuture::new();
        assert!(future.wait_timeout(Duration::from_millis(10)).is_none());
        future.succeed();
        assert!(matches!(
            future.wait_timeout(Duration::from_millis(10)),
            Some(Ok(()))
        ));
    }
}
