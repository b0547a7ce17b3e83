use std::sync::Arc;

use tokio::{runtime::Runtime, sync::broadcast::error::RecvError};

use crate::{
    common::Shutdown,
    runtime::Channel,
    store::{Store, data},
    utils,
};

/// Persists node log lines published on the channel.
pub struct Monitor {
    store: Arc<Store>,
    channel: Arc<Channel>,

    runtime: Arc<Runtime>,
}

impl Monitor {
    pub fn new(
        store: Arc<Store>,
        channel: Arc<Channel>,
        runtime: Arc<Runtime>,
    ) -> Self {
        Self {
            store,
            channel,
            runtime,
        }
    }

    pub fn monitor(
        &self,
        shutdown: Arc<Shutdown>,
    ) {
        let store = self.store.clone();
        let mut log_queue = self.channel.subscribe_logs();

        self.runtime.spawn(async move {
            let logs = match store.logs() {
                Ok(logs) => logs,
                Err(err) => {
                    tracing::error!(error = %err, "log collection unavailable, node logs will not be persisted");
                    return;
                }
            };

            loop {
                let log = tokio::select! {
                    _ = shutdown.wait() => break,
                    log = log_queue.recv() => log,
                };
                match log {
                    Ok(log) => {
                        let record = data::Log {
                            id: utils::longid(),
                            eid: log.eid.clone(),
                            nid: log.nid.clone(),
                            level: log.level,
                            content: log.content.clone(),
                            timestamp: log.timestamp,
                        };
                        if let Err(err) = logs.create(&record) {
                            tracing::warn!(eid = %log.eid, nid = %log.nid, error = %err, "failed to persist node log");
                        }
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "log monitor lagged behind, lines dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}
