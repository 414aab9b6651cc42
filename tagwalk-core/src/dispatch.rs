//! Delivery of completion callbacks to the thread that issued the commands

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::marker::PhantomData;
use std::time::{Duration, Instant};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Queue of callbacks owned by the issuing thread.
///
/// Worker threads post through a [`DispatchHandle`]; the owner runs them by
/// pumping [`run_pending`](Self::run_pending) or [`run_next`](Self::run_next).
/// Callbacks therefore never run concurrently with each other. The
/// dispatcher itself cannot leave the thread that created it.
pub struct Dispatcher {
    tx: Sender<Job>,
    rx: Receiver<Job>,
    _not_send: PhantomData<*const ()>,
}

impl Dispatcher {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            _not_send: PhantomData,
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run every callback already queued. Returns how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Wait up to `timeout` for one callback and run it
    pub fn run_next(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(job) => {
                job();
                true
            }
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    /// Pump callbacks until `done` returns true or `timeout` elapses.
    ///
    /// Returns the final value of `done`.
    pub fn run_until(&self, mut done: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !done() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.run_next(deadline - now);
        }
        true
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Sending side of a [`Dispatcher`], usable from any thread
#[derive(Clone)]
pub struct DispatchHandle {
    tx: Sender<Job>,
}

impl DispatchHandle {
    /// Queue `job` for the owning thread.
    ///
    /// Returns false (and drops the job) if the dispatcher is gone.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.tx.send(Box::new(job)).is_err() {
            tracing::warn!("dispatcher dropped, discarding completion");
            return false;
        }
        true
    }
}

impl std::fmt::Debug for DispatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHandle")
            .field("queued", &self.tx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_callbacks_run_on_owner_thread() {
        let dispatcher = Dispatcher::new();
        let owner = std::thread::current().id();
        let seen = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let handle = dispatcher.handle();
                let seen = Arc::clone(&seen);
                std::thread::spawn(move || {
                    handle.post(move || {
                        assert_eq!(std::thread::current().id(), owner);
                        seen.fetch_add(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for w in workers {
            assert!(w.join().unwrap());
        }

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.run_pending(), 4);
        assert_eq!(seen.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_run_until_times_out() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.run_until(|| false, Duration::from_millis(20)));
        assert!(!dispatcher.run_next(Duration::from_millis(1)));
    }

    #[test]
    fn test_run_until_stops_when_done() {
        let dispatcher = Dispatcher::new();
        let done = Rc::new(RefCell::new(false));
        let handle = dispatcher.handle();
        std::thread::spawn(move || handle.post(|| {}));

        let flag = Rc::clone(&done);
        let count = RefCell::new(0);
        let finished = dispatcher.run_until(
            || {
                *count.borrow_mut() += 1;
                if *count.borrow() > 1 {
                    *flag.borrow_mut() = true;
                }
                *flag.borrow()
            },
            Duration::from_secs(5),
        );
        assert!(finished);
        assert!(*done.borrow());
    }

    #[test]
    fn test_post_after_drop_is_discarded() {
        let dispatcher = Dispatcher::new();
        let handle = dispatcher.handle();
        drop(dispatcher);
        assert!(!handle.post(|| panic!("must not run")));
    }
}
