// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Client handle bookkeeping for monitored items.
//!
//! Notifications name items by client handle while delete and modify
//! requests name them by server handle, so the table keeps two indices:
//!
//! ```text
//! by_client:  client_handle ──► MonitoredItemRegistration
//! by_server:  server_handle ──► client_handle
//! ```
//!
//! A handle is registered before the CreateMonitoredItems request is sent.
//! A notification that overtakes the creation response still resolves.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::messages::{MonitoringFilter, MonitoringFilterResult, ReadValueId};

/// First client handle handed out. Lower values are reserved.
pub const FIRST_CLIENT_HANDLE: u32 = 200;

/// Server-assigned monitored item id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonitoredItemId(pub u32);

impl MonitoredItemId {
    /// Returns the raw id.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for MonitoredItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mi-{}", self.0)
    }
}

impl From<u32> for MonitoredItemId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Filter currently in force for an item.
#[derive(Debug, Clone, PartialEq)]
pub enum ActiveFilter {
    /// The filter sent with CreateMonitoredItems.
    Requested(Option<MonitoringFilter>),
    /// The filter result returned by the last successful modify.
    Revised(Option<MonitoringFilterResult>),
}

/// One monitored item as known to the client.
#[derive(Debug, Clone)]
pub struct MonitoredItemRegistration {
    /// Client handle.
    pub client_handle: u32,
    /// Server handle, set once creation succeeded.
    pub server_handle: Option<MonitoredItemId>,
    /// Node and attribute being monitored.
    pub target: ReadValueId,
    /// Filter the item was created with.
    pub requested_filter: Option<MonitoringFilter>,
    /// Filter in force.
    pub active_filter: ActiveFilter,
    /// Sampling interval in milliseconds, revised by the server.
    pub sampling_interval: f64,
    /// Queue size, revised by the server.
    pub queue_size: u32,
}

impl MonitoredItemRegistration {
    /// Creates an unconfirmed registration.
    pub fn new(
        client_handle: u32,
        target: ReadValueId,
        filter: Option<MonitoringFilter>,
        sampling_interval: f64,
        queue_size: u32,
    ) -> Self {
        Self {
            client_handle,
            server_handle: None,
            target,
            active_filter: ActiveFilter::Requested(filter.clone()),
            requested_filter: filter,
            sampling_interval,
            queue_size,
        }
    }

    /// Returns `true` once the server confirmed the item.
    #[inline]
    pub fn is_confirmed(&self) -> bool {
        self.server_handle.is_some()
    }
}

/// Forward and reverse handle index of one subscription.
#[derive(Debug)]
pub struct HandleTable {
    next_handle: u32,
    by_client: HashMap<u32, MonitoredItemRegistration>,
    by_server: HashMap<MonitoredItemId, u32>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            next_handle: FIRST_CLIENT_HANDLE,
            by_client: HashMap::new(),
            by_server: HashMap::new(),
        }
    }

    /// Returns the next free client handle.
    ///
    /// Handles increase until `u32::MAX`, then wrap to
    /// [`FIRST_CLIENT_HANDLE`]; handles still registered are skipped.
    pub fn allocate(&mut self) -> u32 {
        loop {
            let handle = self.next_handle;
            self.next_handle = handle.checked_add(1).unwrap_or(FIRST_CLIENT_HANDLE);
            if !self.by_client.contains_key(&handle) {
                return handle;
            }
        }
    }

    /// Enters a registration under its client handle.
    pub fn register(&mut self, registration: MonitoredItemRegistration) {
        self.by_client
            .insert(registration.client_handle, registration);
    }

    /// Records the server handle of a created item.
    ///
    /// Returns `false` if the client handle is no longer registered.
    pub fn confirm(&mut self, client_handle: u32, server_handle: MonitoredItemId) -> bool {
        match self.by_client.get_mut(&client_handle) {
            Some(registration) => {
                registration.server_handle = Some(server_handle);
                self.by_server.insert(server_handle, client_handle);
                true
            }
            None => false,
        }
    }

    /// Removes a registration by client handle.
    pub fn remove(&mut self, client_handle: u32) -> Option<MonitoredItemRegistration> {
        let registration = self.by_client.remove(&client_handle)?;
        if let Some(server_handle) = registration.server_handle {
            self.by_server.remove(&server_handle);
        }
        Some(registration)
    }

    /// Removes a registration by server handle.
    pub fn remove_by_server(&mut self, server_handle: MonitoredItemId) -> Option<MonitoredItemRegistration> {
        let client_handle = self.by_server.remove(&server_handle)?;
        self.by_client.remove(&client_handle)
    }

    /// Looks up the client handle for a server handle.
    pub fn client_handle(&self, server_handle: MonitoredItemId) -> Option<u32> {
        self.by_server.get(&server_handle).copied()
    }

    /// Looks up a registration by client handle.
    pub fn get(&self, client_handle: u32) -> Option<&MonitoredItemRegistration> {
        self.by_client.get(&client_handle)
    }

    /// Looks up a registration by client handle for update.
    pub fn get_mut(&mut self, client_handle: u32) -> Option<&mut MonitoredItemRegistration> {
        self.by_client.get_mut(&client_handle)
    }

    /// Looks up a registration by server handle.
    pub fn get_by_server(&self, server_handle: MonitoredItemId) -> Option<&MonitoredItemRegistration> {
        self.client_handle(server_handle)
            .and_then(|client| self.by_client.get(&client))
    }

    /// Returns the server handles of every confirmed item, in ascending order.
    pub fn server_handles(&self) -> Vec<MonitoredItemId> {
        let mut handles: Vec<_> = self.by_server.keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Returns every registration, ordered by client handle.
    pub fn registrations(&self) -> Vec<MonitoredItemRegistration> {
        let mut all: Vec<_> = self.by_client.values().cloned().collect();
        all.sort_by_key(|r| r.client_handle);
        all
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.by_client.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.by_client.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeId;

    fn registration(table: &mut HandleTable, node: u32) -> u32 {
        let handle = table.allocate();
        table.register(MonitoredItemRegistration::new(
            handle,
            ReadValueId::value(NodeId::numeric(2, node)),
            None,
            0.0,
            0,
        ));
        handle
    }

    #[test]
    fn test_handles_start_above_reserved_range_and_increase() {
        let mut table = HandleTable::new();
        let handles: Vec<u32> = (0..50).map(|_| table.allocate()).collect();
        assert_eq!(handles[0], FIRST_CLIENT_HANDLE);
        assert!(handles.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_registration_resolves_before_confirmation() {
        let mut table = HandleTable::new();
        let handle = registration(&mut table, 1);
        let entry = table.get(handle).unwrap();
        assert!(!entry.is_confirmed());
        assert!(table.server_handles().is_empty());
    }

    #[test]
    fn test_confirm_and_reverse_lookup() {
        let mut table = HandleTable::new();
        let handle = registration(&mut table, 1);
        assert!(table.confirm(handle, MonitoredItemId(17)));
        assert_eq!(table.client_handle(MonitoredItemId(17)), Some(handle));
        assert_eq!(table.server_handles(), vec![MonitoredItemId(17)]);

        let removed = table.remove_by_server(MonitoredItemId(17)).unwrap();
        assert_eq!(removed.client_handle, handle);
        assert!(table.is_empty());
        assert!(table.client_handle(MonitoredItemId(17)).is_none());
    }

    #[test]
    fn test_confirm_after_removal_is_rejected() {
        let mut table = HandleTable::new();
        let handle = registration(&mut table, 1);
        table.remove(handle);
        assert!(!table.confirm(handle, MonitoredItemId(3)));
        assert!(table.server_handles().is_empty());
    }

    #[test]
    fn test_allocation_wraps_past_live_handles() {
        let mut table = HandleTable::new();
        let first = registration(&mut table, 1);
        assert_eq!(first, FIRST_CLIENT_HANDLE);

        table.next_handle = u32::MAX;
        assert_eq!(registration(&mut table, 2), u32::MAX);
        // FIRST_CLIENT_HANDLE is still registered.
        assert_eq!(table.allocate(), FIRST_CLIENT_HANDLE + 1);
    }
}
