// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Notification handlers.
//!
//! Implement [`SubscriptionHandler`] to receive data changes and events of
//! one subscription, and [`StatusChangeHandler`] to receive subscription
//! status changes for the whole client. [`ChannelHandler`] and
//! [`BroadcastHandler`] forward notifications to tokio channels.
//!
//! A handler error or panic is logged by the dispatcher and never stops
//! delivery of later notifications.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::messages::{EventFieldList, MonitoredItemNotification, ReadValueId};
use crate::registry::DecodedObject;
use crate::types::{DataValue, StatusCode};

use super::event::EventFields;
use super::handles::MonitoredItemId;

/// Error returned by a handler.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result returned by a handler.
pub type HandlerResult = Result<(), HandlerError>;

// =============================================================================
// Notifications
// =============================================================================

/// A data change delivered to a handler.
#[derive(Debug, Clone)]
pub struct DataChange {
    /// Subscription that produced it.
    pub subscription_id: u32,
    /// Client handle of the item.
    pub client_handle: u32,
    /// Server handle, absent while creation is still unconfirmed.
    pub server_handle: Option<MonitoredItemId>,
    /// Node and attribute.
    pub target: ReadValueId,
    /// New value.
    pub value: DataValue,
    /// Structure decoded through the type registry, if registered.
    pub decoded: Option<DecodedObject>,
    /// Notification as received.
    pub raw: MonitoredItemNotification,
}

/// An event delivered to a handler.
#[derive(Debug, Clone)]
pub struct Event {
    /// Subscription that produced it.
    pub subscription_id: u32,
    /// Client handle of the item.
    pub client_handle: u32,
    /// Server handle, absent while creation is still unconfirmed.
    pub server_handle: Option<MonitoredItemId>,
    /// Event source node.
    pub target: ReadValueId,
    /// Fields named after the select clauses of the item.
    pub fields: EventFields,
    /// Notification as received.
    pub raw: EventFieldList,
}

/// A subscription status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    /// Subscription whose status changed.
    pub subscription_id: u32,
    /// New status.
    pub status: StatusCode,
    /// Diagnostic text, if any.
    pub diagnostic_info: Option<String>,
}

// =============================================================================
// Handler traits
// =============================================================================

/// Receives the notifications of one subscription.
#[async_trait]
pub trait SubscriptionHandler: Send + Sync {
    /// Called for every data change.
    async fn on_data_change(&self, notification: DataChange) -> HandlerResult {
        let _ = notification;
        Ok(())
    }

    /// Called for every event.
    async fn on_event(&self, event: Event) -> HandlerResult {
        let _ = event;
        Ok(())
    }
}

/// Receives status changes of every subscription of a client.
#[async_trait]
pub trait StatusChangeHandler: Send + Sync {
    /// Called for every status change.
    async fn on_status_change(&self, change: StatusChange) -> HandlerResult;
}

// =============================================================================
// Channel adapters
// =============================================================================

/// A data change or an event.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Data change.
    DataChange(DataChange),
    /// Event.
    Event(Event),
}

impl Notification {
    /// Returns the client handle of the item.
    pub fn client_handle(&self) -> u32 {
        match self {
            Self::DataChange(n) => n.client_handle,
            Self::Event(e) => e.client_handle,
        }
    }

    /// Returns the data change, if this is one.
    pub fn as_data_change(&self) -> Option<&DataChange> {
        match self {
            Self::DataChange(n) => Some(n),
            Self::Event(_) => None,
        }
    }

    /// Returns the event, if this is one.
    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Self::Event(e) => Some(e),
            Self::DataChange(_) => None,
        }
    }
}

/// Forwards notifications to an mpsc channel.
///
/// Waits for capacity, so a slow receiver slows dispatch down. A closed
/// receiver is reported as a handler error.
pub struct ChannelHandler {
    sender: mpsc::Sender<Notification>,
}

impl ChannelHandler {
    /// Creates a handler sending to `sender`.
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self { sender }
    }

    /// Creates a handler together with its receiver.
    pub fn with_channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl SubscriptionHandler for ChannelHandler {
    async fn on_data_change(&self, notification: DataChange) -> HandlerResult {
        self.sender
            .send(Notification::DataChange(notification))
            .await
            .map_err(|_| "notification receiver closed".into())
    }

    async fn on_event(&self, event: Event) -> HandlerResult {
        self.sender
            .send(Notification::Event(event))
            .await
            .map_err(|_| "notification receiver closed".into())
    }
}

/// Fans notifications out to any number of receivers.
pub struct BroadcastHandler {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastHandler {
    /// Creates a handler with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns a new receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl SubscriptionHandler for BroadcastHandler {
    async fn on_data_change(&self, notification: DataChange) -> HandlerResult {
        // no receivers is fine
        let _ = self.sender.send(Notification::DataChange(notification));
        Ok(())
    }

    async fn on_event(&self, event: Event) -> HandlerResult {
        let _ = self.sender.send(Notification::Event(event));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NodeId, Variant};

    fn data_change(handle: u32, value: i32) -> DataChange {
        let value = DataValue::new(value);
        DataChange {
            subscription_id: 1,
            client_handle: handle,
            server_handle: Some(MonitoredItemId(9)),
            target: ReadValueId::value(NodeId::numeric(2, 1)),
            value: value.clone(),
            decoded: None,
            raw: MonitoredItemNotification {
                client_handle: handle,
                value,
            },
        }
    }

    #[tokio::test]
    async fn test_channel_handler_forwards() {
        let (handler, mut rx) = ChannelHandler::with_channel(4);
        handler.on_data_change(data_change(200, 5)).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received.client_handle(), 200);
        assert_eq!(
            received.as_data_change().unwrap().value.value(),
            &Variant::Int32(5)
        );
    }

    #[tokio::test]
    async fn test_channel_handler_reports_closed_receiver() {
        let (handler, rx) = ChannelHandler::with_channel(1);
        drop(rx);
        assert!(handler.on_data_change(data_change(200, 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_broadcast_handler_without_receivers() {
        let handler = BroadcastHandler::new(8);
        assert!(handler.on_data_change(data_change(200, 1)).await.is_ok());

        let mut rx = handler.subscribe();
        handler.on_data_change(data_change(201, 2)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().client_handle(), 201);
    }
}
