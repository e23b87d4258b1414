use crate::history::SessionHistory;
use crate::moonraker::StatusAcquirer;
use crate::status::PrinterStatus;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

/// Fan-out of status snapshots to every connected observer.
///
/// A periodic tick performs one acquisition and pushes the identical frame
/// to all observers. With no observers connected the tick does nothing at
/// all, so an idle daemon places no load on Moonraker. Each new observer
/// receives one immediate snapshot at connect so the UI is never blank
/// until the next tick.
pub struct Broadcaster {
    acquirer: Arc<StatusAcquirer>,
    history: Arc<Mutex<SessionHistory>>,
    observers: Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl Broadcaster {
    pub fn new(acquirer: Arc<StatusAcquirer>, history: Arc<Mutex<SessionHistory>>) -> Self {
        Self {
            acquirer,
            history,
            observers: Mutex::new(HashMap::new()),
        }
    }

    /// Register an observer and hand it an out-of-band first snapshot.
    pub async fn subscribe(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let status = self.acquire().await;
        let _ = tx.send(Self::frame(&status));

        self.observers.lock().await.insert(id, tx);
        info!("Observer {} connected", id);

        (id, rx)
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        if self.observers.lock().await.remove(&id).is_some() {
            info!("Observer {} disconnected", id);
        }
    }

    pub async fn observer_count(&self) -> usize {
        self.observers.lock().await.len()
    }

    /// One broadcast cycle: skip entirely when nobody is listening,
    /// otherwise acquire once and deliver to everyone. A failed send drops
    /// only that observer and never aborts delivery to the rest.
    pub async fn tick(&self) {
        if self.observers.lock().await.is_empty() {
            return;
        }

        let status = self.acquire().await;
        let frame = Self::frame(&status);

        let mut observers = self.observers.lock().await;
        let before = observers.len();
        observers.retain(|id, tx| {
            let alive = tx.send(frame.clone()).is_ok();
            if !alive {
                debug!("Observer {} dropped (send failed)", id);
            }
            alive
        });

        if observers.len() < before {
            info!("{} observer(s) removed during broadcast", before - observers.len());
        }
    }

    /// Run the broadcast loop on a fixed period until aborted.
    pub fn spawn(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                self.tick().await;
            }
        })
    }

    async fn acquire(&self) -> PrinterStatus {
        let status = self.acquirer.fetch().await;
        // The server-held history session consumes the push stream the
        // same way a display client would.
        self.history.lock().await.observe(&status);
        status
    }

    fn frame(status: &PrinterStatus) -> String {
        json!({ "type": "status", "data": status }).to_string()
    }
}
