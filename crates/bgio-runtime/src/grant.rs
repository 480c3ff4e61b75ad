//! Background Task Grants
//!
//! Wraps the OS begin/end background task pairing in a move-only handle so
//! every grant is ended exactly once: on explicit release, on the OS
//! expiration callback, or when the handle is dropped.
//!
//! Holders that finish while the app may still be in the background hand the
//! grant back to the coordinator through [`GrantReturn`] instead of ending it,
//! so that the I/O it was covering is never left running without a grant.

use crate::stats::CoordinatorStats;
use bgio_core::{
    BackgroundScheduler, LifecycleError, LifecycleResult, TaskToken, TimeSource, Timestamp,
};
use core::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// Component a grant was acquired for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOwner {
    Fetch,
    Watchdog,
}

impl fmt::Display for HandleOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandleOwner::Fetch => write!(f, "background fetch"),
            HandleOwner::Watchdog => write!(f, "budget watchdog"),
        }
    }
}

// ----------------------------------------------------------------------------
// Broker Slot
// ----------------------------------------------------------------------------

/// The single grant slot shared between the broker and the live handle
#[derive(Debug, Default)]
struct GrantSlot {
    holder: Mutex<Option<HandleOwner>>,
}

impl GrantSlot {
    fn try_claim(&self, owner: HandleOwner) -> Result<(), HandleOwner> {
        let mut holder = self.holder.lock().unwrap_or_else(|e| e.into_inner());
        match *holder {
            Some(current) => Err(current),
            None => {
                *holder = Some(owner);
                Ok(())
            }
        }
    }

    fn free(&self) {
        *self.holder.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn holder(&self) -> Option<HandleOwner> {
        *self.holder.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ----------------------------------------------------------------------------
// Grant State
// ----------------------------------------------------------------------------

struct GrantInner {
    token: TaskToken,
    owner: HandleOwner,
    scheduler: Arc<dyn BackgroundScheduler>,
    slot: Arc<GrantSlot>,
    stats: Arc<CoordinatorStats>,
    released: AtomicBool,
    expired: watch::Sender<bool>,
}

impl GrantInner {
    /// End the OS task if nobody has yet; returns whether this call did
    fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.scheduler.end_background_task(self.token);
        self.slot.free();
        CoordinatorStats::bump(&self.stats.handles_released);
        debug!(token = %self.token, owner = %self.owner, "Background task ended");
        true
    }

    fn on_expired(&self) {
        self.expired.send_replace(true);
        if self.release() {
            warn!(token = %self.token, owner = %self.owner, "Background grant expired, force-released");
        }
    }
}

// ----------------------------------------------------------------------------
// Background Task Handle
// ----------------------------------------------------------------------------

/// Move-only claim on OS background execution time
pub struct BackgroundTaskHandle {
    inner: Arc<GrantInner>,
    deadline: Timestamp,
}

impl BackgroundTaskHandle {
    pub fn token(&self) -> TaskToken {
        self.inner.token
    }

    pub fn owner(&self) -> HandleOwner {
        self.inner.owner
    }

    /// Point at which the OS said it would stop granting time
    pub fn expiration_deadline(&self) -> Timestamp {
        self.deadline
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub fn is_expired(&self) -> bool {
        *self.inner.expired.borrow()
    }

    /// Resolves once the OS expiration callback has fired
    pub async fn expired(&self) {
        let mut rx = self.inner.expired.subscribe();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// End the grant; false if expiration already ended it
    pub fn release(self) -> bool {
        self.inner.release()
    }
}

impl Drop for BackgroundTaskHandle {
    fn drop(&mut self) {
        if self.inner.release() {
            warn!(token = %self.inner.token, owner = %self.inner.owner, "Background grant released on drop");
        }
    }
}

impl fmt::Debug for BackgroundTaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundTaskHandle")
            .field("token", &self.inner.token)
            .field("owner", &self.inner.owner)
            .field("deadline", &self.deadline)
            .field("released", &self.is_released())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Grant Return
// ----------------------------------------------------------------------------

/// Completion hook carried by a [`ReturnedGrant`]
pub type SettledHook = Box<dyn FnOnce() + Send>;

/// A grant whose holder has finished with it
pub struct ReturnedGrant {
    handle: BackgroundTaskHandle,
    on_settled: Option<SettledHook>,
}

impl ReturnedGrant {
    pub fn handle(&self) -> &BackgroundTaskHandle {
        &self.handle
    }

    /// Split into the grant and the hook to run once it has been settled
    pub fn into_parts(self) -> (BackgroundTaskHandle, Option<SettledHook>) {
        (self.handle, self.on_settled)
    }

    /// End the grant, then run the holder's hook
    pub fn release(self) {
        let (handle, on_settled) = self.into_parts();
        handle.release();
        if let Some(on_settled) = on_settled {
            on_settled();
        }
    }
}

impl fmt::Debug for ReturnedGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReturnedGrant")
            .field("handle", &self.handle)
            .field("has_hook", &self.on_settled.is_some())
            .finish()
    }
}

/// Route from grant holders back to the coordinator
#[derive(Clone)]
pub struct GrantReturn {
    tx: mpsc::UnboundedSender<ReturnedGrant>,
}

impl GrantReturn {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ReturnedGrant>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn give_back(&self, handle: BackgroundTaskHandle) {
        self.send(ReturnedGrant {
            handle,
            on_settled: None,
        });
    }

    /// Hand `handle` back and run `on_settled` once the coordinator has
    /// released it or passed it on
    pub fn give_back_then<F>(&self, handle: BackgroundTaskHandle, on_settled: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(ReturnedGrant {
            handle,
            on_settled: Some(Box::new(on_settled)),
        });
    }

    fn send(&self, returned: ReturnedGrant) {
        if let Err(mpsc::error::SendError(returned)) = self.tx.send(returned) {
            debug!(token = %returned.handle.token(), "Coordinator gone, releasing returned grant");
            returned.release();
        }
    }
}

// ----------------------------------------------------------------------------
// Task Broker
// ----------------------------------------------------------------------------

/// Hands out at most one [`BackgroundTaskHandle`] at a time
pub struct TaskBroker {
    scheduler: Arc<dyn BackgroundScheduler>,
    time_source: Arc<dyn TimeSource>,
    stats: Arc<CoordinatorStats>,
    slot: Arc<GrantSlot>,
}

impl TaskBroker {
    pub fn new(
        scheduler: Arc<dyn BackgroundScheduler>,
        time_source: Arc<dyn TimeSource>,
        stats: Arc<CoordinatorStats>,
    ) -> Self {
        Self {
            scheduler,
            time_source,
            stats,
            slot: Arc::new(GrantSlot::default()),
        }
    }

    /// Begin an OS background task for `owner`.
    ///
    /// Fails with [`LifecycleError::HandleHeld`] while another handle is live.
    pub fn acquire(&self, owner: HandleOwner) -> LifecycleResult<BackgroundTaskHandle> {
        if let Err(current) = self.slot.try_claim(owner) {
            return Err(LifecycleError::handle_held(current.to_string()));
        }

        let (expired, _) = watch::channel(false);
        let inner = Arc::new_cyclic(|weak: &std::sync::Weak<GrantInner>| {
            let on_expire = weak.clone();
            let token = self.scheduler.begin_background_task(Box::new(move || {
                if let Some(inner) = on_expire.upgrade() {
                    inner.on_expired();
                }
            }));
            GrantInner {
                token,
                owner,
                scheduler: Arc::clone(&self.scheduler),
                slot: Arc::clone(&self.slot),
                stats: Arc::clone(&self.stats),
                released: AtomicBool::new(false),
                expired,
            }
        });

        let deadline = self.time_source.now() + self.scheduler.background_time_remaining();
        debug!(token = %inner.token, %owner, %deadline, "Background task begun");
        Ok(BackgroundTaskHandle { inner, deadline })
    }

    pub fn is_held(&self) -> bool {
        self.slot.holder().is_some()
    }

    pub fn holder(&self) -> Option<HandleOwner> {
        self.slot.holder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bgio_core::SystemTimeSource;
    use bgio_harness::MockScheduler;
    use core::time::Duration;

    fn broker(scheduler: &Arc<MockScheduler>) -> TaskBroker {
        TaskBroker::new(
            scheduler.clone(),
            Arc::new(SystemTimeSource),
            Arc::new(CoordinatorStats::new()),
        )
    }

    #[test]
    fn test_release_ends_task_once() {
        let scheduler = Arc::new(MockScheduler::default());
        let broker = broker(&scheduler);

        let handle = broker.acquire(HandleOwner::Fetch).unwrap();
        let token = handle.token();
        assert!(broker.is_held());
        assert!(handle.release());

        assert_eq!(scheduler.end_count_for(token), 1);
        assert!(!broker.is_held());
        assert!(scheduler.is_balanced());
    }

    #[test]
    fn test_second_acquire_is_rejected() {
        let scheduler = Arc::new(MockScheduler::default());
        let broker = broker(&scheduler);

        let _held = broker.acquire(HandleOwner::Watchdog).unwrap();
        let err = broker.acquire(HandleOwner::Fetch).unwrap_err();
        assert!(matches!(err, LifecycleError::HandleHeld { .. }));
        assert_eq!(broker.holder(), Some(HandleOwner::Watchdog));
        assert_eq!(scheduler.begin_count(), 1);
    }

    #[test]
    fn test_drop_releases_unreleased_handle() {
        let scheduler = Arc::new(MockScheduler::default());
        let broker = broker(&scheduler);

        {
            let _handle = broker.acquire(HandleOwner::Fetch).unwrap();
        }
        assert!(scheduler.is_balanced());
        assert!(broker.acquire(HandleOwner::Fetch).is_ok());
    }

    #[test]
    fn test_expiration_force_releases() {
        let scheduler = Arc::new(MockScheduler::default());
        let broker = broker(&scheduler);

        let handle = broker.acquire(HandleOwner::Fetch).unwrap();
        let token = handle.token();
        assert!(scheduler.expire(token));

        assert!(handle.is_expired());
        assert!(handle.is_released());
        assert!(!broker.is_held());
        assert!(!handle.release());
        assert_eq!(scheduler.end_count_for(token), 1);
    }

    #[tokio::test]
    async fn test_expired_future_resolves() {
        let scheduler = Arc::new(MockScheduler::default());
        let broker = broker(&scheduler);
        let handle = broker.acquire(HandleOwner::Watchdog).unwrap();
        let token = handle.token();

        let expirer = scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            expirer.expire(token);
        });

        tokio::time::timeout(Duration::from_secs(5), handle.expired())
            .await
            .unwrap();
        assert!(scheduler.is_balanced());
    }

    #[tokio::test]
    async fn test_returned_grant_stays_held_until_settled() {
        let scheduler = Arc::new(MockScheduler::default());
        let broker = broker(&scheduler);
        let (returns, mut returned) = GrantReturn::channel();

        let handle = broker.acquire(HandleOwner::Fetch).unwrap();
        let settled = Arc::new(AtomicBool::new(false));
        let flag = settled.clone();
        returns.give_back_then(handle, move || flag.store(true, Ordering::SeqCst));

        let grant = returned.recv().await.unwrap();
        assert!(!grant.handle().is_released());
        assert!(broker.is_held());
        assert!(!settled.load(Ordering::SeqCst));

        grant.release();
        assert!(settled.load(Ordering::SeqCst));
        assert!(scheduler.is_balanced());
    }

    #[test]
    fn test_give_back_without_receiver_releases() {
        let scheduler = Arc::new(MockScheduler::default());
        let broker = broker(&scheduler);
        let (returns, returned) = GrantReturn::channel();
        drop(returned);

        returns.give_back(broker.acquire(HandleOwner::Watchdog).unwrap());
        assert!(scheduler.is_balanced());
        assert!(!broker.is_held());
    }

    #[test]
    fn test_deadline_uses_remaining_time() {
        let scheduler = Arc::new(MockScheduler::with_fixed_remaining(Duration::from_secs(30)));
        let before = Timestamp::now();
        let handle = broker(&scheduler).acquire(HandleOwner::Fetch).unwrap();
        assert!(handle.expiration_deadline() >= before.add_seconds(30));
    }
}
