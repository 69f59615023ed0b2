//! Wait/notify channel behind admission.
//!
//! The gate holds no state of its own: the predicate it waits on lives under the
//! tracker's lock, and the gate only carries wakeups.

use tokio::sync::Notify;

/// Which completion event a waiter is interested in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// One slot was freed.
    SlotFreed,
    /// The in-flight count reached zero.
    Drained,
}

#[derive(Debug, Default)]
pub struct AdmissionGate {
    slot_freed: Notify,
    drained: Notify,
}

impl AdmissionGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, wake: Wake) -> &Notify {
        match wake {
            Wake::SlotFreed => &self.slot_freed,
            Wake::Drained => &self.drained,
        }
    }

    /// Wakes a single dispatcher waiting for a slot.
    #[inline]
    pub fn signal_slot(&self) {
        self.slot_freed.notify_one();
    }

    /// Wakes everyone waiting for the pool to go idle.
    #[inline]
    pub fn signal_drained(&self) {
        self.drained.notify_waiters();
    }

    /// Wakes every waiter on both channels so they re-check their predicate.
    pub fn wake_all(&self) {
        self.slot_freed.notify_waiters();
        self.drained.notify_waiters();
    }

    /// Runs `attempt` until it yields a value, sleeping on `wake` between tries.
    ///
    /// The waiter is registered before each attempt, so a signal sent between a
    /// failed attempt and the sleep is not lost. Every wakeup re-runs `attempt`.
    pub async fn wait_for<R, F>(&self, wake: Wake, mut attempt: F) -> R
    where
        F: FnMut() -> Option<R>,
    {
        let notify = self.channel(wake);
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(out) = attempt() {
                return out;
            }
            notified.await;
        }
    }
}
