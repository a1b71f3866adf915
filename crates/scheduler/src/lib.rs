//! # Meshwork Scheduler
//!
//! Named one-shot timers. Every periodic worker in the runtime is a
//! one-shot timer that re-registers itself at the tail of each run:
//!
//! ```ignore
//! fn start_sweep(rt: Arc<Runtime>) {
//!     let Some(timer) = rt.scheduler.register("sweep", Duration::from_secs(60), {
//!         let rt = rt.clone();
//!         async move {
//!             sweep(&rt);
//!             start_sweep(rt); // tail re-registration
//!         }
//!     }) else {
//!         return; // scheduler shut down, the loop ends here
//!     };
//!     timer.start();
//! }
//! ```
//!
//! Registering under an existing name cancels the previous timer, so a
//! slow re-registration can never accumulate overlapping timers. After
//! [`Scheduler::shutdown`] every live timer is cancelled and `register`
//! returns `None`, which is the stop signal the workers key off.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// The timer registry. Create once per runtime, share via `Arc`.
pub struct Scheduler {
    timers: Mutex<HashMap<String, JoinHandle<()>>>,
    stopped: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Arc<Scheduler> {
        Arc::new(Scheduler {
            timers: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Register a named one-shot timer. Any existing timer under the
    /// same name is cancelled immediately. Returns `None` once the
    /// scheduler has been shut down; the returned handle does nothing
    /// until [`NamedTimer::start`] arms it.
    pub fn register(
        self: &Arc<Self>,
        name: &str,
        delay: Duration,
        task: impl Future<Output = ()> + Send + 'static,
    ) -> Option<NamedTimer> {
        if self.stopped.load(Ordering::SeqCst) {
            return None;
        }

        let mut timers = self.lock();
        if let Some(previous) = timers.remove(name) {
            previous.abort();
        }
        drop(timers);

        Some(NamedTimer {
            scheduler: self.clone(),
            name: name.to_string(),
            delay,
            task: Box::pin(task),
        })
    }

    /// Cancel a timer by name. Returns whether one was live.
    pub fn cancel(&self, name: &str) -> bool {
        match self.lock().remove(name) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Set the stop flag and cancel every live timer. Idempotent.
    pub fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut timers = self.lock();
        for (name, handle) in timers.drain() {
            handle.abort();
            debug!(timer = %name, "cancelled");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Number of registered timers that have not yet fired or been
    /// cancelled.
    pub fn live_timers(&self) -> usize {
        self.lock().values().filter(|h| !h.is_finished()).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// An unarmed timer returned by [`Scheduler::register`].
pub struct NamedTimer {
    scheduler: Arc<Scheduler>,
    name: String,
    delay: Duration,
    task: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl NamedTimer {
    /// Arm the timer: after `delay` the task runs once.
    pub fn start(self) {
        if self.scheduler.stopped.load(Ordering::SeqCst) {
            return;
        }

        let NamedTimer {
            scheduler,
            name,
            delay,
            task,
        } = self;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        let mut timers = scheduler.lock();
        if scheduler.stopped.load(Ordering::SeqCst) {
            // Shutdown raced with arming; never let the task run.
            handle.abort();
            return;
        }
        if let Some(previous) = timers.insert(name, handle) {
            previous.abort();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter_task(counter: &Arc<AtomicUsize>) -> impl Future<Output = ()> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timer_fires_after_delay() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler
            .register("t", Duration::from_secs(5), counter_task(&fired))
            .unwrap()
            .start();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn register_replaces_existing_timer() {
        let scheduler = Scheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        scheduler
            .register("t", Duration::from_secs(5), counter_task(&first))
            .unwrap()
            .start();
        scheduler
            .register("t", Duration::from_secs(5), counter_task(&second))
            .unwrap()
            .start();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0, "replaced timer must not fire");
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_firing() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler
            .register("t", Duration::from_secs(5), counter_task(&fired))
            .unwrap()
            .start();
        assert!(scheduler.cancel("t"));
        assert!(!scheduler.cancel("t"));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_and_blocks_registration() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        scheduler
            .register("t", Duration::from_secs(5), counter_task(&fired))
            .unwrap()
            .start();
        scheduler.shutdown();

        assert!(scheduler.is_shutdown());
        assert!(scheduler
            .register("u", Duration::from_secs(1), async {})
            .is_none());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.live_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tail_re_registration_forms_a_loop() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        fn arm(scheduler: Arc<Scheduler>, fired: Arc<AtomicUsize>) {
            let Some(timer) = scheduler.register("loop", Duration::from_secs(1), {
                let scheduler = scheduler.clone();
                let fired = fired.clone();
                async move {
                    fired.fetch_add(1, Ordering::SeqCst);
                    arm(scheduler, fired);
                }
            }) else {
                return;
            };
            timer.start();
        }

        arm(scheduler.clone(), fired.clone());
        tokio::time::sleep(Duration::from_millis(3500)).await;
        scheduler.shutdown();

        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unstarted_timer_never_fires() {
        let scheduler = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));

        let _unarmed = scheduler
            .register("t", Duration::from_secs(1), counter_task(&fired))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
