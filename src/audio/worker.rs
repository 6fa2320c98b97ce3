//! Paced worker thread shared by the sources
//!
//! OS handles such as `cpal::Stream` or a MIDI connection are not `Send`, so
//! they are opened *on* the worker thread. `spawn` waits for that setup to
//! finish before returning, which makes `start()` synchronous. The wait is
//! bounded by the start timeout: a setup still running then is detached and
//! its thread exits without ticking once the setup returns.
//! After setup the worker calls `tick` once per period until stopped or until
//! `tick` breaks.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TryRecvError};

pub(crate) struct Worker {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

impl Worker {
    pub(crate) fn spawn<S, T>(
        name: &str,
        period: Duration,
        start_timeout: Duration,
        setup: S,
    ) -> Result<Self, String>
    where
        S: FnOnce() -> Result<T, String> + Send + 'static,
        T: FnMut() -> ControlFlow<()> + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (init_tx, init_rx) = bounded::<Result<(), String>>(1);
        let running = Arc::new(AtomicBool::new(false));
        let running_flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut tick = match setup() {
                    Ok(tick) => tick,
                    Err(error) => {
                        let _ = init_tx.send(Err(error));
                        return;
                    }
                };
                // abandoned after a start timeout: release without ticking
                if !matches!(stop_rx.try_recv(), Err(TryRecvError::Empty)) {
                    return;
                }
                running_flag.store(true, Ordering::Release);
                let _ = init_tx.send(Ok(()));

                let mut next = Instant::now();
                loop {
                    if tick().is_break() {
                        break;
                    }
                    next += period;
                    let wait = next.saturating_duration_since(Instant::now());
                    match stop_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        // stop requested or the handle is gone
                        _ => break,
                    }
                }
                running_flag.store(false, Ordering::Release);
                // the OS resource owned by `tick` is released here
            })
            .map_err(|e| format!("failed to spawn worker thread: {e}"))?;

        let mut worker = Self {
            stop_tx,
            thread: Some(thread),
            running,
        };

        match init_rx.recv_timeout(start_timeout) {
            Ok(Ok(())) => Ok(worker),
            Ok(Err(error)) => {
                worker.shutdown();
                Err(error)
            }
            Err(_) => {
                worker.abandon();
                Err("timed out waiting for the device to open".to_string())
            }
        }
    }

    /// False once the worker ended on its own (end of stream) or was stopped
    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Detaches a thread still stuck in setup; it exits as soon as setup returns
    fn abandon(&mut self) {
        let _ = self.stop_tx.try_send(());
        self.thread = None;
    }

    /// Stops the loop and joins the thread (blocking while the OS resource closes)
    pub(crate) fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("sound worker thread panicked");
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Duration of `frames` at `sample_rate`
pub(crate) fn block_period(frames: usize, sample_rate: u32) -> Duration {
    Duration::from_secs_f64(frames as f64 / sample_rate.max(1) as f64)
}
