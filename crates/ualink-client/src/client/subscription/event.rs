// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Event field decoding.
//!
//! An event notification carries bare values, one per select clause of the
//! filter the item was created with. They are named by zipping them against
//! that stored clause list.

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::messages::SimpleAttributeOperand;
use crate::types::{LocalizedText, NodeId, Variant};

/// Named event fields, in select clause order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFields {
    fields: Vec<(String, Variant)>,
}

impl EventFields {
    /// Returns the field called `name`.
    pub fn get(&self, name: &str) -> Option<&Variant> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, value)| value)
    }

    /// Iterates over the fields in select clause order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Returns the field names in select clause order.
    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if there are no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// `EventType` field.
    pub fn event_type(&self) -> Option<&NodeId> {
        match self.get("EventType")? {
            Variant::NodeId(id) => Some(id),
            _ => None,
        }
    }

    /// `SourceName` field.
    pub fn source_name(&self) -> Option<&str> {
        self.get("SourceName")?.as_str()
    }

    /// `Message` field.
    pub fn message(&self) -> Option<&LocalizedText> {
        match self.get("Message")? {
            Variant::LocalizedText(text) => Some(text),
            _ => None,
        }
    }

    /// `Severity` field.
    pub fn severity(&self) -> Option<u16> {
        self.get("Severity")?
            .as_i64()
            .and_then(|v| u16::try_from(v).ok())
    }

    /// `Time` field.
    pub fn time(&self) -> Option<DateTime<Utc>> {
        match self.get("Time")? {
            Variant::DateTime(t) => Some(*t),
            _ => None,
        }
    }
}

/// Names `values` after `select_clauses`, position by position.
///
/// Extra values are dropped and missing ones are left out; both are logged.
pub fn decode_event(select_clauses: &[SimpleAttributeOperand], values: Vec<Variant>) -> EventFields {
    if values.len() != select_clauses.len() {
        warn!(
            expected = select_clauses.len(),
            actual = values.len(),
            "Event field count does not match select clauses"
        );
    }
    EventFields {
        fields: select_clauses
            .iter()
            .map(SimpleAttributeOperand::field_name)
            .zip(values)
            .collect(),
    }
}
