//! Liveness anchor.
//!
//! A supervised child with no work of its own. It keeps the supervision root from
//! ever being childless while the service runs, and gives other components a stable
//! handle to address. Anything sent to it is discarded.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::lifecycle::sequencer::SubsystemError;
use crate::lifecycle::supervisor::{ChildContext, ChildSpec, RestartPolicy, SupervisionRoot, SupervisorError};

/// Name the anchor is supervised under.
pub const ANCHOR_NAME: &str = "liveness_anchor";

type Signal = Box<dyn Any + Send>;

/// Handle to the running anchor. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LivenessAnchor {
    inbox: mpsc::UnboundedSender<Signal>,
    discarded: Arc<AtomicU64>,
}

impl LivenessAnchor {
    /// Start the anchor under `root`.
    pub fn spawn(root: &SupervisionRoot) -> Result<Self, SupervisorError> {
        let (inbox, rx) = mpsc::unbounded_channel::<Signal>();
        // Shared so a restarted anchor keeps draining the same inbox.
        let rx = Arc::new(Mutex::new(rx));
        let discarded = Arc::new(AtomicU64::new(0));

        let counter = discarded.clone();
        root.start_child(ChildSpec::new(ANCHOR_NAME, RestartPolicy::Permanent, move |ctx| {
            idle(ctx, rx.clone(), counter.clone())
        }))?;
        tracing::debug!(name = ANCHOR_NAME, "Liveness anchor registered");

        Ok(Self { inbox, discarded })
    }

    pub fn name(&self) -> &'static str {
        ANCHOR_NAME
    }

    /// Hand the anchor a signal. The content is ignored.
    ///
    /// Returns false once the anchor's inbox is gone.
    pub fn send<T: Any + Send>(&self, signal: T) -> bool {
        self.inbox.send(Box::new(signal)).is_ok()
    }

    /// How many signals the anchor has thrown away.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

async fn idle(
    mut ctx: ChildContext,
    inbox: Arc<Mutex<mpsc::UnboundedReceiver<Signal>>>,
    discarded: Arc<AtomicU64>,
) -> Result<(), SubsystemError> {
    let mut inbox = inbox.lock().await;
    loop {
        tokio::select! {
            _ = ctx.stopped() => return Ok(()),
            signal = inbox.recv() => match signal {
                Some(_) => {
                    discarded.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    ctx.stopped().await;
                    return Ok(());
                }
            },
        }
    }
}
