use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use fleet_queue::ApprovalGate;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adaptive_lead::{AdaptiveLead, WorkloadSample};

/// Invoked with a non-zero recommended delta. The phase executor is the
/// only component that registers one of these: it clamps the delta to the
/// team's [MinInstances, MaxInstances], suppresses it if the team's budget
/// is exhausted, and publishes `team.scaled` on any resulting change.
pub trait ScalingCallback: Send + Sync {
    fn on_delta(&self, delta: i32);
}

impl<F> ScalingCallback for F
where
    F: Fn(i32) + Send + Sync,
{
    fn on_delta(&self, delta: i32) {
        self(delta)
    }
}

/// Periodically samples the team's queue through the `AdaptiveLead` and
/// forwards any non-zero recommendation to a registered `ScalingCallback`.
/// Owns no semaphore itself — it only recommends.
pub struct ScalingMonitor {
    gate: Arc<ApprovalGate>,
    lead: Arc<AdaptiveLead>,
    callback: StdMutex<Option<Arc<dyn ScalingCallback>>>,
    poll_interval: Duration,
    cancel: CancellationToken,
    handle: StdMutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ScalingMonitor {
    pub fn new(gate: Arc<ApprovalGate>, lead: Arc<AdaptiveLead>, poll_interval: Duration) -> Self {
        Self {
            gate,
            lead,
            callback: StdMutex::new(None),
            poll_interval,
            cancel: CancellationToken::new(),
            handle: StdMutex::new(None),
            started: AtomicBool::new(false),
        }
    }

    pub fn set_callback(&self, callback: Arc<dyn ScalingCallback>) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.cancel.cancelled() => return,
                    _ = tokio::time::sleep(this.poll_interval) => {}
                }
                let sample = WorkloadSample::from(this.gate.status().await);
                let delta = this.lead.recommended_delta(sample);
                if delta != 0 {
                    if let Some(cb) = this.callback.lock().unwrap().clone() {
                        cb.on_delta(delta);
                    }
                }
            }
        });
        *self.handle.lock().unwrap() = Some(handle);
    }

    pub async fn stop(&self) {
        if !self.started.load(Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.started.store(false, Ordering::SeqCst);
    }
}
