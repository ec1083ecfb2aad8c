// SPDX-License-Identifier: GPL-3.0-only

//! Thread lifecycle management for relay loops
//!
//! Workers and the telemetry ticker all run the same shape of thread: an
//! optional init step on the new thread, then a loop body called until it
//! asks to stop or a stop signal is raised. The signal may be shared, so one
//! flag stops a whole pool.

use crate::errors::{StartupError, StartupResult};
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a loop running on its own named thread
///
/// # Example
///
/// ```ignore
/// let stop = Arc::new(AtomicBool::new(false));
/// let controller = LoopController::start("ticker", stop, || {
///     tick();
///     LoopAction::Continue
/// })?;
///
/// // Later, stop the loop
/// controller.stop();
/// ```
pub struct LoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_signal: Arc<AtomicBool>,
    /// Thread name, also used in logs
    name: String,
}

impl LoopController {
    /// Start a loop on a new thread
    ///
    /// The closure is called repeatedly until it returns `LoopAction::Stop`
    /// or `stop_signal` is raised.
    pub fn start<F>(name: &str, stop_signal: Arc<AtomicBool>, mut loop_fn: F) -> StartupResult<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::start_with_init(name, stop_signal, || Ok::<(), String>(()), move |_| loop_fn())
    }

    /// Start a loop with initialization
    ///
    /// `init_fn` runs once on the new thread and builds the loop state. If it
    /// fails the thread exits without ever calling `loop_fn`. The state is
    /// dropped on the loop's own thread when the loop ends.
    pub fn start_with_init<S, E, I, F>(
        name: &str,
        stop_signal: Arc<AtomicBool>,
        init_fn: I,
        mut loop_fn: F,
    ) -> StartupResult<Self>
    where
        S: 'static,
        E: Display,
        I: FnOnce() -> Result<S, E> + Send + 'static,
        F: FnMut(&mut S) -> LoopAction + Send + 'static,
    {
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        debug!(name = %name, "Starting loop thread");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut state = match init_fn() {
                    Ok(s) => {
                        debug!(name = %name_clone, "Initialization successful");
                        s
                    }
                    Err(e) => {
                        warn!(name = %name_clone, error = %e, "Initialization failed");
                        return;
                    }
                };

                loop {
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    match loop_fn(&mut state) {
                        LoopAction::Continue => {}
                        LoopAction::Stop => {
                            debug!(name = %name_clone, "Loop requested stop");
                            break;
                        }
                    }
                }

                drop(state);
                info!(name = %name_clone, "Loop thread exiting");
            })
            .map_err(|source| StartupError::Spawn {
                name: name.to_string(),
                source,
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Loop thread panicked: {:?}", e);
            } else {
                debug!(name = %self.name, "Loop thread finished");
            }
        }
    }
}

impl Drop for LoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "LoopController dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn signal() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = LoopController::start("test-loop", signal(), move || {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        })
        .unwrap();

        controller.join();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_shared_stop_signal_stops_all() {
        let stop = signal();
        let mut controllers: Vec<_> = (0..3)
            .map(|i| {
                LoopController::start(&format!("shared-{}", i), Arc::clone(&stop), || {
                    thread::sleep(Duration::from_millis(5));
                    LoopAction::Continue
                })
                .unwrap()
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        stop.store(true, Ordering::SeqCst);
        for controller in &mut controllers {
            controller.join();
            assert!(!controller.is_running());
        }
    }

    #[test]
    fn test_with_init() {
        let result = Arc::new(AtomicU32::new(0));
        let result_clone = Arc::clone(&result);

        let mut controller = LoopController::start_with_init(
            "test-init-loop",
            signal(),
            || Ok::<_, String>(42u32),
            move |state| {
                result_clone.store(*state, Ordering::SeqCst);
                LoopAction::Stop
            },
        )
        .unwrap();

        controller.join();
        assert_eq!(result.load(Ordering::SeqCst), 42);
    }

    #[test]
    fn test_init_failure() {
        let ran = Arc::new(AtomicBool::new(false));
        let ran_clone = Arc::clone(&ran);

        let mut controller = LoopController::start_with_init(
            "test-fail-init",
            signal(),
            || Err::<(), _>("Init failed".to_string()),
            move |_: &mut ()| {
                ran_clone.store(true, Ordering::SeqCst);
                LoopAction::Stop
            },
        )
        .unwrap();

        controller.join();
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn test_state_dropped_on_loop_thread() {
        struct Probe(Arc<std::sync::Mutex<Option<thread::ThreadId>>>);
        impl Drop for Probe {
            fn drop(&mut self) {
                *self.0.lock().unwrap() = Some(thread::current().id());
            }
        }

        let dropped_on = Arc::new(std::sync::Mutex::new(None));
        let slot = Arc::clone(&dropped_on);
        let mut controller = LoopController::start_with_init(
            "test-drop-thread",
            signal(),
            move || Ok::<_, String>(Probe(slot)),
            |_| LoopAction::Stop,
        )
        .unwrap();
        controller.join();

        let id = dropped_on.lock().unwrap().expect("state dropped");
        assert_ne!(id, thread::current().id());
    }
}
