//! Anchored periodic timer.
//!
//! Drives the message ID cache eviction, subscription renewal and periodic
//! time sync, but has no Kvik-specific behavior and is reusable as-is.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};

enum TimerCmd {
    Reschedule(Instant),
    Quit,
}

/// Periodic timer backed by a worker task.
///
/// The callback first runs one `interval` after spawn, then repeats on the
/// interval. Execution points advance by whole intervals from the anchor, so
/// the schedule doesn't drift with callback duration. The worker never
/// re-enters the callback.
///
/// [`Timer::set_next_exec`] moves the upcoming execution (callable from
/// outside or from within the callback); the rescheduled point becomes the
/// new anchor from which subsequent intervals are measured.
///
/// Dropping the timer stops the worker without waiting for it; use
/// [`Timer::quit`] to wait until any in-progress callback has finished.
pub struct Timer {
    cmd_tx: mpsc::UnboundedSender<TimerCmd>,
    worker: Option<JoinHandle<()>>,
}

impl Timer {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn<F, Fut>(interval: Duration, mut cb: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel();

        let worker = tokio::spawn(async move {
            let mut next = Instant::now() + interval;
            loop {
                tokio::select! {
                    _ = time::sleep_until(next) => {
                        cb().await;

                        // A reschedule issued during the callback becomes
                        // the new anchor; otherwise advance by one interval.
                        let mut rescheduled = false;
                        while let Ok(cmd) = cmd_rx.try_recv() {
                            match cmd {
                                TimerCmd::Reschedule(at) => {
                                    next = at;
                                    rescheduled = true;
                                }
                                TimerCmd::Quit => return,
                            }
                        }
                        if !rescheduled {
                            next += interval;
                        }
                    }
                    cmd = cmd_rx.recv() => match cmd {
                        Some(TimerCmd::Reschedule(at)) => next = at,
                        Some(TimerCmd::Quit) | None => return,
                    }
                }
            }
        });

        Self {
            cmd_tx,
            worker: Some(worker),
        }
    }

    /// Reschedules the upcoming execution to `at`.
    pub fn set_next_exec(&self, at: Instant) {
        let _ = self.cmd_tx.send(TimerCmd::Reschedule(at));
    }

    /// Stops the worker and waits for it to finish; an in-progress callback
    /// completes first.
    pub async fn quit(mut self) {
        let _ = self.cmd_tx.send(TimerCmd::Quit);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(TimerCmd::Quit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_without_drift() {
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();

        let start = Instant::now();
        let timer = Timer::spawn(Duration::from_millis(10), move || {
            let tick_tx = tick_tx.clone();
            async move {
                let _ = tick_tx.send(Instant::now());
            }
        });

        for i in 1..=10u32 {
            let at = tick_rx.recv().await.expect("tick");
            assert_eq!(at.duration_since(start), Duration::from_millis(10) * i);
        }

        timer.quit().await;
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_moves_the_anchor() {
        let (tick_tx, mut tick_rx) = mpsc::unbounded_channel();

        let start = Instant::now();
        let timer = Timer::spawn(Duration::from_millis(100), move || {
            let tick_tx = tick_tx.clone();
            async move {
                let _ = tick_tx.send(Instant::now());
            }
        });

        // Pull the first execution forward; later executions follow from it.
        timer.set_next_exec(start + Duration::from_millis(30));

        let first = tick_rx.recv().await.expect("tick");
        assert_eq!(first.duration_since(start), Duration::from_millis(30));

        let second = tick_rx.recv().await.expect("tick");
        assert_eq!(second.duration_since(start), Duration::from_millis(130));

        timer.quit().await;
    }

    #[tokio::test(start_paused = true)]
    async fn quit_waits_for_running_callback() {
        let done = Arc::new(AtomicUsize::new(0));
        let done_cb = Arc::clone(&done);

        let timer = Timer::spawn(Duration::from_millis(5), move || {
            let done = Arc::clone(&done_cb);
            async move {
                time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Let the first callback start, then quit mid-callback.
        time::sleep(Duration::from_millis(10)).await;
        timer.quit().await;

        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_stops_the_worker() {
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_cb = Arc::clone(&fired);

        let timer = Timer::spawn(Duration::from_millis(10), move || {
            let fired = Arc::clone(&fired_cb);
            async move {
                fired.fetch_add(1, Ordering::SeqCst);
            }
        });
        drop(timer);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
