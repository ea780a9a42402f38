// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Publish loop.
//!
//! ```text
//! worker 1 ─┐  Publish(acks) ──► server
//! worker 2 ─┼─► mpsc ──► router ──► Subscription::deliver ──► dispatcher
//! worker N ─┘
//! ```
//!
//! Workers keep `max_inflight_publish` Publish requests outstanding. A
//! single router consumes their responses in arrival order and finishes
//! dispatching one before taking the next.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::UaResult;
use crate::messages::{
    PublishRequest, PublishResponse, RequestHeader, SubscriptionAcknowledgement,
};
use crate::transport::UaConnection;
use crate::types::StatusCode;

use super::Subscription;

struct RunningLoop {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    router: JoinHandle<()>,
}

impl RunningLoop {
    fn is_finished(&self) -> bool {
        self.router.is_finished()
    }
}

/// Keeps Publish requests outstanding and routes their responses.
pub struct PublishEngine {
    connection: Arc<dyn UaConnection>,
    max_inflight: usize,
    subscriptions: RwLock<HashMap<u32, Arc<Subscription>>>,
    acknowledgements: Mutex<Vec<SubscriptionAcknowledgement>>,
    running: Mutex<Option<RunningLoop>>,
}

impl PublishEngine {
    /// Creates an idle engine.
    pub fn new(connection: Arc<dyn UaConnection>, max_inflight: usize) -> Self {
        Self {
            connection,
            max_inflight: max_inflight.max(1),
            subscriptions: RwLock::new(HashMap::new()),
            acknowledgements: Mutex::new(Vec::new()),
            running: Mutex::new(None),
        }
    }

    /// Routes responses for `subscription` and starts the loop if idle.
    pub fn register(self: &Arc<Self>, subscription: Arc<Subscription>) {
        self.subscriptions
            .write()
            .insert(subscription.id(), subscription);
        self.ensure_running();
    }

    /// Stops routing responses for a subscription.
    pub fn unregister(&self, subscription_id: u32) {
        self.subscriptions.write().remove(&subscription_id);
    }

    /// Stops routing responses for every subscription.
    pub fn clear(&self) {
        self.subscriptions.write().clear();
    }

    /// Returns the ids of routed subscriptions.
    pub fn subscription_ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.subscriptions.read().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Returns `true` while the loop runs.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.is_finished())
    }

    fn ensure_running(self: &Arc<Self>) {
        let mut running = self.running.lock();
        if running.as_ref().is_some_and(|r| !r.is_finished()) {
            return;
        }

        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(self.max_inflight * 4);
        let workers = (0..self.max_inflight)
            .map(|worker| {
                tokio::spawn(publish_worker(
                    Arc::clone(self),
                    worker,
                    tx.clone(),
                    cancel.clone(),
                ))
            })
            .collect();
        let router = tokio::spawn(route_responses(Arc::clone(self), rx));

        debug!(inflight = self.max_inflight, "Publish loop started");
        *running = Some(RunningLoop {
            cancel,
            workers,
            router,
        });
    }

    /// Stops the loop and waits for it to finish.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();
        for worker in running.workers {
            let _ = worker.await;
        }
        let _ = running.router.await;
        debug!("Publish loop stopped");
    }

    fn take_acknowledgements(&self) -> Vec<SubscriptionAcknowledgement> {
        std::mem::take(&mut *self.acknowledgements.lock())
    }

    fn acknowledge(&self, acknowledgement: SubscriptionAcknowledgement) {
        self.acknowledgements.lock().push(acknowledgement);
    }

    async fn publish(&self, acknowledgements: Vec<SubscriptionAcknowledgement>) -> UaResult<PublishResponse> {
        let request = PublishRequest {
            request_header: RequestHeader::default(),
            subscription_acknowledgements: acknowledgements,
        };
        self.connection
            .send_request(request.into())
            .await
            .and_then(TryInto::try_into)
    }

    async fn route(&self, response: PublishResponse) {
        let subscription = self
            .subscriptions
            .read()
            .get(&response.subscription_id)
            .cloned();
        match subscription {
            Some(subscription) => subscription.deliver(response.notification_message).await,
            None => warn!(
                subscription_id = response.subscription_id,
                "Publish response for unknown subscription skipped"
            ),
        }
    }
}

impl std::fmt::Debug for PublishEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishEngine")
            .field("max_inflight", &self.max_inflight)
            .field("subscriptions", &self.subscription_ids())
            .finish()
    }
}

async fn publish_worker(
    engine: Arc<PublishEngine>,
    worker: usize,
    responses: mpsc::Sender<PublishResponse>,
    cancel: CancellationToken,
) {
    loop {
        let acknowledgements = engine.take_acknowledgements();
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = engine.publish(acknowledgements) => result,
        };

        match result {
            Ok(response) if response.subscription_id == 0 => {
                debug!(worker, "Publish response without subscription, stopping");
                break;
            }
            Ok(response) => {
                trace!(
                    worker,
                    subscription_id = response.subscription_id,
                    sequence_number = response.notification_message.sequence_number,
                    "Publish response"
                );
                let acknowledgement = acknowledgement_for(&response);
                if responses.send(response).await.is_err() {
                    break;
                }
                // Only what reached the router is acknowledged.
                if let Some(acknowledgement) = acknowledgement {
                    engine.acknowledge(acknowledgement);
                }
            }
            Err(e) if e.is_status(StatusCode::BAD_TIMEOUT) => {
                debug!(worker, "Publish timed out on the server, retrying");
            }
            Err(e)
                if e.is_status(StatusCode::BAD_NO_SUBSCRIPTION)
                    || e.is_status(StatusCode::BAD_SESSION_CLOSED) =>
            {
                debug!(worker, error = %e, "Publish loop finished");
                break;
            }
            Err(e) => {
                e.log("publish");
                break;
            }
        }
    }
}

fn acknowledgement_for(response: &PublishResponse) -> Option<SubscriptionAcknowledgement> {
    if response.notification_message.notification_data.is_empty() {
        return None;
    }
    Some(SubscriptionAcknowledgement {
        subscription_id: response.subscription_id,
        sequence_number: response.notification_message.sequence_number,
    })
}

async fn route_responses(engine: Arc<PublishEngine>, mut responses: mpsc::Receiver<PublishResponse>) {
    while let Some(response) = responses.recv().await {
        engine.route(response).await;
    }
}
