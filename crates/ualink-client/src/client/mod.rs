// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client state machine.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Client                               │
//! │            (handshake, teardown, read/write/browse)             │
//! └─────────────────────────────────────────────────────────────────┘
//!          │                    │                        │
//!          ▼                    ▼                        ▼
//! ┌─────────────────┐  ┌──────────────────┐   ┌─────────────────────┐
//! │ SessionManager  │  │ SecureChannel-   │   │   PublishEngine     │
//! │ (create/activate│  │ Manager          │   │   (Publish workers, │
//! │  close, renewal)│  │ (issue/renew)    │   │    router)          │
//! └─────────────────┘  └──────────────────┘   └─────────────────────┘
//!          │                    │                        │
//!          └────────────────────┼────────────────────────┘
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     dyn UaConnection                            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod channel;
pub mod connection;
pub mod renewal;
pub mod session;
pub mod subscription;

pub use channel::{SecureChannel, SecureChannelManager};
pub use connection::{Client, ClientBuilder, ConnectionState};
pub use renewal::{renewal_interval, RenewalHandle, RenewalLoop, RenewalStatus, RENEWAL_FACTOR};
pub use session::{SessionInfo, SessionManager, SessionSettings, UserIdentity};
pub use subscription::{
    ActiveFilter, BroadcastHandler, ChannelHandler, CreateResult, DataChange, Event, EventFields,
    FilterOverride, HandlerError, HandlerResult, MonitorRequest, MonitoredItemId,
    MonitoredItemRegistration, Notification, PublishEngine, RevisedParameters, StatusChange,
    StatusChangeHandler, Subscription, SubscriptionHandler, SubscriptionState,
    SubscriptionStatsSnapshot,
};
