//! Repaint scheduling
//!
//! The renderer never paints on its own. It calls a [`RepaintTrigger`] and
//! the host paint loop eventually calls `paint` again. [`RepaintSignal`] and
//! [`PainterThread`] are that loop: requests made while a paint is running
//! collapse into one follow-up paint.

use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Fire-and-forget request for a paint soon
pub trait RepaintTrigger: Send + Sync {
    fn request_repaint(&self);
}

#[derive(Debug, Default)]
struct SignalState {
    pending: bool,
    shutdown: bool,
    requests: u64,
}

/// Clonable repaint flag with blocking wait
#[derive(Debug, Clone, Default)]
pub struct RepaintSignal {
    inner: Arc<(Mutex<SignalState>, Condvar)>,
}

impl RepaintSignal {
    /// Creates a signal with no pending request
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until a repaint is requested, then clears the request
    ///
    /// Returns `false` once the signal was shut down.
    pub fn wait(&self) -> bool {
        let (lock, condvar) = &*self.inner;
        let mut state = lock.lock();
        while !state.pending && !state.shutdown {
            condvar.wait(&mut state);
        }
        state.pending = false;
        !state.shutdown
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`
    ///
    /// Returns whether a request was taken.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, condvar) = &*self.inner;
        let mut state = lock.lock();
        if !state.pending && !state.shutdown {
            condvar.wait_for(&mut state, timeout);
        }
        let taken = state.pending && !state.shutdown;
        state.pending = false;
        taken
    }

    /// Whether a request is waiting
    pub fn is_pending(&self) -> bool {
        self.inner.0.lock().pending
    }

    /// Total number of requests made
    pub fn request_count(&self) -> u64 {
        self.inner.0.lock().requests
    }

    /// Wakes every waiter and makes further waits return immediately
    pub fn shutdown(&self) {
        let (lock, condvar) = &*self.inner;
        lock.lock().shutdown = true;
        condvar.notify_all();
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.inner.0.lock().shutdown
    }
}

impl RepaintTrigger for RepaintSignal {
    fn request_repaint(&self) {
        let (lock, condvar) = &*self.inner;
        let mut state = lock.lock();
        state.pending = true;
        state.requests += 1;
        condvar.notify_one();
    }
}

/// Dedicated thread calling a paint closure whenever a repaint is requested
pub struct PainterThread {
    signal: RepaintSignal,
    join_handle: Option<JoinHandle<()>>,
}

impl PainterThread {
    /// Spawns the thread; `paint` runs once per collapsed request
    pub fn spawn<F>(signal: RepaintSignal, mut paint: F) -> std::io::Result<Self>
    where
        F: FnMut() + Send + 'static,
    {
        let worker_signal = signal.clone();
        let join_handle = std::thread::Builder::new()
            .name("mipview-painter".to_owned())
            .spawn(move || {
                info!("🎨 Painter thread started");
                let mut paints = 0u64;
                while worker_signal.wait() {
                    paint();
                    paints += 1;
                }
                info!("🎨 Painter thread stopped after {} paints", paints);
            })?;
        Ok(Self {
            signal,
            join_handle: Some(join_handle),
        })
    }

    /// The signal driving this thread
    pub fn signal(&self) -> &RepaintSignal {
        &self.signal
    }

    /// Stops the thread and waits for the running paint to finish
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.signal.shutdown();
        if let Some(handle) = self.join_handle.take() {
            if handle.join().is_err() {
                debug!("painter thread panicked");
            }
        }
    }
}

impl Drop for PainterThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_requests_collapse() {
        let signal = RepaintSignal::new();
        signal.request_repaint();
        signal.request_repaint();
        assert_eq!(signal.request_count(), 2);
        assert!(signal.wait_timeout(Duration::from_millis(1)));
        assert!(!signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_shutdown_releases_waiter() {
        let signal = RepaintSignal::new();
        signal.shutdown();
        assert!(!signal.wait());
        assert!(signal.is_shut_down());
    }

    #[test]
    fn test_painter_thread_paints_on_request() {
        let signal = RepaintSignal::new();
        let count = Arc::new(AtomicUsize::new(0));
        let painted = Arc::clone(&count);
        let painter = PainterThread::spawn(signal.clone(), move || {
            painted.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        signal.request_repaint();
        for _ in 0..200 {
            if count.load(Ordering::SeqCst) > 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        painter.shutdown();
        assert!(count.load(Ordering::SeqCst) >= 1);
    }
}
