// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Secure channel renewal loop.
//!
//! Started once the session is created. Every cycle it waits until
//! `min(channel lifetime, session timeout) * 0.7` has passed since the
//! current token was issued, renews the channel token and reads the server
//! state variable to notice a dead server early.
//!
//! ```text
//!   ┌──────────► Waiting ──cancel──► Stopped (Ok)
//!   │               │
//!   │        OpenSecureChannel(Renew)
//!   │               │
//!   │       Read(Server_ServerStatus_State)
//!   │               │ error
//!   └───── ok ◄─────┴─────────► Failed (Err, logged)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::error::{ChannelError, UaError, UaResult};
use crate::messages::{ReadRequest, ReadResponse, ReadValueId, RequestHeader};
use crate::transport::UaConnection;
use crate::types::{NodeId, TimestampsToReturn};

use super::channel::SecureChannelManager;

/// Share of the shorter lifetime after which the channel is renewed.
pub const RENEWAL_FACTOR: f64 = 0.7;

/// Progress of the renewal loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RenewalStatus {
    /// Not started.
    #[default]
    Idle,
    /// Sleeping until the next renewal.
    Waiting {
        /// Renewal interval of this cycle, counted from token issue.
        #[serde(with = "humantime_serde")]
        interval: Duration,
        /// Successful renewals so far.
        renewals: u64,
    },
    /// The loop ended with an error.
    Failed(String),
    /// The loop was cancelled.
    Stopped,
}

impl RenewalStatus {
    /// Returns `true` once the loop has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Stopped)
    }

    /// Successful renewals, while the loop is waiting for the next one.
    pub fn renewals(&self) -> Option<u64> {
        match self {
            Self::Waiting { renewals, .. } => Some(*renewals),
            _ => None,
        }
    }
}

/// Computes the sleep before the next renewal.
pub fn renewal_interval(channel_lifetime: Duration, session_timeout: Duration) -> Duration {
    channel_lifetime
        .min(session_timeout)
        .mul_f64(RENEWAL_FACTOR)
        .max(Duration::from_millis(1))
}

/// Handle to a running renewal loop.
#[derive(Debug)]
pub struct RenewalHandle {
    cancel: CancellationToken,
    task: JoinHandle<UaResult<()>>,
    status: watch::Receiver<RenewalStatus>,
}

impl RenewalHandle {
    /// Returns a receiver of status updates.
    pub fn status(&self) -> watch::Receiver<RenewalStatus> {
        self.status.clone()
    }

    /// Returns `true` once the task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancels the loop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the loop and waits for it.
    ///
    /// Returns the error the loop ended with, if it ended on its own.
    pub async fn stop(self) -> UaResult<()> {
        self.cancel.cancel();
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(UaError::connection_closed(format!("renewal task aborted: {e}"))),
        }
    }
}

/// Spawns renewal loops.
pub struct RenewalLoop;

impl RenewalLoop {
    /// Starts renewing the channel of `channel`.
    ///
    /// `session_timeout` carries the revised session timeout; it is read
    /// again every cycle.
    pub fn spawn(
        channel: Arc<SecureChannelManager>,
        connection: Arc<dyn UaConnection>,
        session_timeout: watch::Receiver<Duration>,
    ) -> RenewalHandle {
        let cancel = CancellationToken::new();
        let (status_tx, status) = watch::channel(RenewalStatus::Idle);
        let task = tokio::spawn(run(
            channel,
            connection,
            session_timeout,
            cancel.clone(),
            status_tx,
        ));

        RenewalHandle {
            cancel,
            task,
            status,
        }
    }
}

async fn run(
    channel: Arc<SecureChannelManager>,
    connection: Arc<dyn UaConnection>,
    session_timeout: watch::Receiver<Duration>,
    cancel: CancellationToken,
    status: watch::Sender<RenewalStatus>,
) -> UaResult<()> {
    let mut renewals = 0u64;
    loop {
        let Some(current) = channel.current() else {
            return fail(&status, ChannelError::NotOpen.into(), renewals);
        };
        let interval = renewal_interval(current.token_lifetime, *session_timeout.borrow());
        let delay = interval.saturating_sub(current.token_age());

        status.send_replace(RenewalStatus::Waiting { interval, renewals });
        trace!(
            interval_ms = interval.as_millis() as u64,
            delay_ms = delay.as_millis() as u64,
            "Next channel renewal scheduled"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                status.send_replace(RenewalStatus::Stopped);
                debug!(renewals, "Renewal loop stopped");
                return Ok(());
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let cycle = async {
            channel.open(true).await?;
            check_liveness(connection.as_ref()).await
        };
        if let Err(e) = cycle.await {
            return fail(&status, e, renewals);
        }

        renewals += 1;
        debug!(renewals, "Channel renewed and server alive");
    }
}

fn fail(status: &watch::Sender<RenewalStatus>, e: UaError, renewals: u64) -> UaResult<()> {
    error!(error = %e, error_code = %e.error_code(), renewals, "Channel renewal failed");
    status.send_replace(RenewalStatus::Failed(e.to_string()));
    Err(e)
}

/// Reads `Server_ServerStatus_State`; a bad status is an error.
pub async fn check_liveness(connection: &dyn UaConnection) -> UaResult<()> {
    let request = ReadRequest {
        request_header: RequestHeader::default(),
        max_age: 0.0,
        timestamps_to_return: TimestampsToReturn::Neither,
        nodes_to_read: vec![ReadValueId::value(NodeId::SERVER_STATUS_STATE)],
    };
    let response: ReadResponse = connection
        .send_request(request.into())
        .await
        .and_then(TryInto::try_into)?;

    let value = response
        .results
        .into_iter()
        .next()
        .ok_or_else(|| UaError::malformed("liveness read returned no value"))?;
    value.status().check()
}
