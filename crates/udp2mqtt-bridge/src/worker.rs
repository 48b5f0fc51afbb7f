//! Queue consumers.
//!
//! One task per direction drains its queue in arrival order, so messages in
//! the same direction are routed one at a time. The two directions run
//! concurrently and meet only at the registry lock.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::router::{InboundRouter, OutboundRouter};
use crate::transport::{BrokerPublisher, DatagramSink};

/// Route every queued multicast report until the queue closes.
pub fn spawn_inbound_worker<P>(
    router: Arc<InboundRouter<P>>,
    mut reports: mpsc::Receiver<String>,
) -> JoinHandle<()>
where
    P: BrokerPublisher + 'static,
{
    tokio::spawn(async move {
        while let Some(raw) = reports.recv().await {
            let outcome = router.handle(&raw).await;
            debug!(?outcome, "Inbound message routed");
        }
        info!("Inbound queue closed, worker exiting");
    })
}

/// Route every queued broker command until the queue closes.
pub fn spawn_outbound_worker<S>(
    router: Arc<OutboundRouter<S>>,
    mut commands: mpsc::Receiver<String>,
) -> JoinHandle<()>
where
    S: DatagramSink + 'static,
{
    tokio::spawn(async move {
        while let Some(raw) = commands.recv().await {
            let outcome = router.handle(&raw).await;
            debug!(?outcome, "Outbound command routed");
        }
        info!("Outbound queue closed, worker exiting");
    })
}
