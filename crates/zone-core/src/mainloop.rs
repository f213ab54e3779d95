//! The mainloop (C6): a single-threaded cooperative loop running timers
//! and a posted work queue, with shutdown/recycle handling.

use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};
use tracing::{debug, info};

use zone_proto::ExitCode;

type TimerFn = Box<dyn FnMut() -> bool + Send>;
type WorkFn = Box<dyn FnOnce() + Send>;

struct Timer {
    f: TimerFn,
    period: Duration,
    next_fire: Instant,
}

/// Handle used by any task to post one-shot work onto the mainloop thread.
#[derive(Clone)]
pub struct WorkPoster {
    tx: Sender<WorkFn>,
}

impl WorkPoster {
    pub fn post(&self, f: impl FnOnce() + Send + 'static) {
        let _ = self.tx.send(Box::new(f));
    }
}

/// The cooperative single-threaded scheduler. Owns its timers and work
/// queue; `run_loop` blocks the calling thread until `quit` is called.
pub struct Mainloop {
    timers: Vec<Timer>,
    work_tx: Sender<WorkFn>,
    work_rx: Receiver<WorkFn>,
    quit_rx: Receiver<ExitCode>,
    quit_tx: Sender<ExitCode>,
}

impl Default for Mainloop {
    fn default() -> Self {
        Self::new()
    }
}

impl Mainloop {
    pub fn new() -> Self {
        let (work_tx, work_rx) = channel::unbounded();
        let (quit_tx, quit_rx) = channel::bounded(1);
        Self { timers: Vec::new(), work_tx, work_rx, quit_rx, quit_tx }
    }

    pub fn work_poster(&self) -> WorkPoster {
        WorkPoster { tx: self.work_tx.clone() }
    }

    /// Register a periodic timer. `f` is polled no more often than
    /// `period` and is removed automatically the first time it returns
    /// `false`.
    pub fn add_timer(&mut self, initial_delay: Duration, period: Duration, f: impl FnMut() -> bool + Send + 'static) {
        self.timers.push(Timer { f: Box::new(f), period, next_fire: Instant::now() + initial_delay });
    }

    /// Request shutdown. The loop finishes its current iteration, drains
    /// any work posted before the request, then returns `code` from
    /// `run_loop`.
    pub fn quitter(&self) -> Sender<ExitCode> {
        self.quit_tx.clone()
    }

    /// Run until `quit` is invoked (via the sender from [`Mainloop::quitter`]).
    /// Returns the exit code the caller should act on — `Recycle` tears
    /// down modules and restarts the process; other codes terminate it.
    pub fn run_loop(&mut self) -> ExitCode {
        loop {
            match self.quit_rx.try_recv() {
                Ok(code) => {
                    self.wait_for_work_drain();
                    info!(?code, "mainloop exiting");
                    return code;
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return ExitCode::General,
            }

            let now = Instant::now();
            for timer in &mut self.timers {
                if now >= timer.next_fire {
                    let keep = (timer.f)();
                    timer.next_fire = now + timer.period;
                    if !keep {
                        timer.next_fire = now + Duration::from_secs(u64::MAX / 2);
                    }
                }
            }
            self.timers.retain(|t| t.next_fire < Instant::now() + Duration::from_secs(3600));

            while let Ok(work) = self.work_rx.try_recv() {
                work();
            }

            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn wait_for_work_drain(&mut self) {
        while let Ok(work) = self.work_rx.try_recv() {
            debug!("draining posted work before shutdown");
            work();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn timer_fires_and_then_self_removes_on_false() {
        let mut mainloop = Mainloop::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        let quitter = mainloop.quitter();
        mainloop.add_timer(Duration::from_millis(0), Duration::from_millis(0), move || {
            let n = c.fetch_add(1, Ordering::SeqCst);
            if n >= 2 {
                let _ = quitter.send(ExitCode::None);
                return false;
            }
            true
        });
        let code = mainloop.run_loop();
        assert_eq!(code, ExitCode::None);
        assert!(calls.load(Ordering::SeqCst) >= 3);
    }

    #[test]
    fn posted_work_runs_before_shutdown_completes() {
        let mut mainloop = Mainloop::new();
        let poster = mainloop.work_poster();
        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();
        let quitter = mainloop.quitter();
        poster.post(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let _ = quitter.send(ExitCode::Recycle);
        let code = mainloop.run_loop();
        assert_eq!(code, ExitCode::Recycle);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }
}
