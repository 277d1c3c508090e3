//! # Domain Entities
//!
//! Logical xCall events, the predicate used to correlate them, and the
//! results handed back to callers.

use super::value_objects::{Nid, Payload, RequestId, ResponseCode, SerialNo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical xCall event names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Emitted by the source xCall contract when a message is sent.
    CallMessageSent,
    /// Emitted by the destination xCall contract when it admits a message.
    CallMessage,
    /// Return-trip acknowledgement on the source.
    ResponseMessage,
    /// Rollback became executable on the source.
    RollbackMessage,
    /// Rollback was executed on the source.
    RollbackExecuted,
    /// Destination dapp call was executed.
    CallExecuted,
}

impl EventKind {
    /// All kinds.
    pub const ALL: [EventKind; 6] = [
        EventKind::CallMessageSent,
        EventKind::CallMessage,
        EventKind::ResponseMessage,
        EventKind::RollbackMessage,
        EventKind::RollbackExecuted,
        EventKind::CallExecuted,
    ];

    /// Event name as it appears on every ledger.
    pub fn signature(&self) -> &'static str {
        match self {
            EventKind::CallMessageSent => "CallMessageSent",
            EventKind::CallMessage => "CallMessage",
            EventKind::ResponseMessage => "ResponseMessage",
            EventKind::RollbackMessage => "RollbackMessage",
            EventKind::RollbackExecuted => "RollbackExecuted",
            EventKind::CallExecuted => "CallExecuted",
        }
    }

    /// Reverse of [`EventKind::signature`].
    pub fn from_signature(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.signature() == name)
    }

    /// `CallExecuted` is keyed by request id, everything else by `sn`.
    pub fn keyed_by_request_id(&self) -> bool {
        matches!(self, EventKind::CallExecuted)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signature())
    }
}

/// A decoded xCall event. Adapters translate their native representation
/// into this shape; fields a ledger does not expose in clear text (EVM
/// indexed strings) are `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XCallEvent {
    /// Message sent on the source.
    CallMessageSent {
        /// Sending dapp
        from: Option<String>,
        /// Destination network address
        to: Option<String>,
        /// Assigned serial number
        sn: SerialNo,
    },
    /// Message admitted on the destination.
    CallMessage {
        /// Source network address `<nid>/<dapp>`
        from: Option<String>,
        /// Destination dapp
        to: Option<String>,
        /// Source serial number
        sn: SerialNo,
        /// Destination request id
        req_id: RequestId,
        /// Message payload
        data: Payload,
    },
    /// Return-trip acknowledgement.
    ResponseMessage {
        /// Source serial number
        sn: SerialNo,
        /// Execution result on the destination
        code: ResponseCode,
    },
    /// Rollback executable.
    RollbackMessage {
        /// Source serial number
        sn: SerialNo,
    },
    /// Rollback executed.
    RollbackExecuted {
        /// Source serial number
        sn: SerialNo,
    },
    /// Destination execution result.
    CallExecuted {
        /// Destination request id
        req_id: RequestId,
        /// Result code
        code: ResponseCode,
        /// Failure message, empty on success
        msg: String,
    },
}

impl XCallEvent {
    /// Logical kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            XCallEvent::CallMessageSent { .. } => EventKind::CallMessageSent,
            XCallEvent::CallMessage { .. } => EventKind::CallMessage,
            XCallEvent::ResponseMessage { .. } => EventKind::ResponseMessage,
            XCallEvent::RollbackMessage { .. } => EventKind::RollbackMessage,
            XCallEvent::RollbackExecuted { .. } => EventKind::RollbackExecuted,
            XCallEvent::CallExecuted { .. } => EventKind::CallExecuted,
        }
    }

    /// Serial number carried by the event, if any.
    pub fn sn(&self) -> Option<SerialNo> {
        match self {
            XCallEvent::CallMessageSent { sn, .. }
            | XCallEvent::CallMessage { sn, .. }
            | XCallEvent::ResponseMessage { sn, .. }
            | XCallEvent::RollbackMessage { sn }
            | XCallEvent::RollbackExecuted { sn } => Some(*sn),
            XCallEvent::CallExecuted { .. } => None,
        }
    }

    /// Request id carried by the event, if any.
    pub fn req_id(&self) -> Option<RequestId> {
        match self {
            XCallEvent::CallMessage { req_id, .. } | XCallEvent::CallExecuted { req_id, .. } => {
                Some(*req_id)
            }
            _ => None,
        }
    }

    fn from_field(&self) -> Option<&str> {
        match self {
            XCallEvent::CallMessageSent { from, .. } | XCallEvent::CallMessage { from, .. } => {
                from.as_deref()
            }
            _ => None,
        }
    }

    fn to_field(&self) -> Option<&str> {
        match self {
            XCallEvent::CallMessageSent { to, .. } | XCallEvent::CallMessage { to, .. } => {
                to.as_deref()
            }
            _ => None,
        }
    }
}

/// An event together with where it was observed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedEvent {
    /// Block / ledger / checkpoint height
    pub height: u64,
    /// Transaction id, hash or digest
    pub tx_id: String,
    /// Decoded event
    pub event: XCallEvent,
}

/// Predicate a decoded event must satisfy.
///
/// `sn` and `req_id` match exactly. `from` and `to` are substring checks,
/// applied only when the decoded event carries the field.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventMatcher {
    /// Exact serial number
    pub sn: Option<SerialNo>,
    /// Exact request id
    pub req_id: Option<RequestId>,
    /// Substring of the event's `from`
    pub from: Option<String>,
    /// Substring of the event's `to`
    pub to: Option<String>,
}

impl EventMatcher {
    /// Match on serial number.
    pub fn by_sn(sn: SerialNo) -> Self {
        Self {
            sn: Some(sn),
            ..Default::default()
        }
    }

    /// Match on request id.
    pub fn by_req_id(req_id: RequestId) -> Self {
        Self {
            req_id: Some(req_id),
            ..Default::default()
        }
    }

    /// Also require `from` to contain `from`.
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = Some(from.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// Also require `to` to contain `to`.
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into()).filter(|s: &String| !s.is_empty());
        self
    }

    /// Evaluate against a decoded event.
    pub fn matches(&self, event: &XCallEvent) -> bool {
        if let Some(sn) = self.sn {
            if event.sn() != Some(sn) {
                return false;
            }
        }
        if let Some(req_id) = self.req_id {
            if event.req_id() != Some(req_id) {
                return false;
            }
        }
        if let (Some(want), Some(have)) = (self.from.as_deref(), event.from_field()) {
            if !have.contains(want) {
                return false;
            }
        }
        if let (Some(want), Some(have)) = (self.to.as_deref(), event.to_field()) {
            if !have.contains(want) {
                return false;
            }
        }
        true
    }

    /// Correlation key for logs and errors.
    pub fn key(&self) -> String {
        match (self.sn, self.req_id) {
            (Some(sn), _) => sn.to_string(),
            (None, Some(req_id)) => req_id.to_string(),
            (None, None) => "*".to_string(),
        }
    }
}

/// One correlation request against one chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventQuery {
    /// Event to look for
    pub kind: EventKind,
    /// Emitting contract (xCall)
    pub contract: String,
    /// Inclusive lower bound (watermark)
    pub start_height: u64,
    /// Predicate
    pub matcher: EventMatcher,
}

impl EventQuery {
    /// Build a query.
    pub fn new(
        kind: EventKind,
        contract: impl Into<String>,
        start_height: u64,
        matcher: EventMatcher,
    ) -> Self {
        Self {
            kind,
            contract: contract.into(),
            start_height,
            matcher,
        }
    }

    /// Full predicate: kind, watermark and matcher.
    pub fn accepts(&self, observed: &ObservedEvent) -> bool {
        observed.event.kind() == self.kind
            && observed.height >= self.start_height
            && self.matcher.matches(&observed.event)
    }
}

/// Result of a successful send on the source chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendReceipt {
    /// Serial number extracted from `CallMessageSent`
    pub sn: SerialNo,
    /// Submitted transaction id
    pub tx_id: String,
    /// Inclusion height
    pub height: u64,
    /// Source chain
    pub source: Nid,
}

/// Correlated `CallMessage` on the destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallMessage {
    /// Destination request id
    pub req_id: RequestId,
    /// Source serial number
    pub sn: SerialNo,
    /// Delivered payload
    pub data: Payload,
    /// Source address, when the ledger exposes it
    pub from: Option<String>,
    /// Destination dapp, when the ledger exposes it
    pub to: Option<String>,
    /// Height the event was observed at
    pub height: u64,
    /// Delivering transaction
    pub tx_id: String,
}

/// Correlated `CallExecuted` on the destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallExecuted {
    /// Request id
    pub req_id: RequestId,
    /// Result code
    pub code: ResponseCode,
    /// Failure message
    pub msg: String,
    /// Height the event was observed at
    pub height: u64,
}

/// Outcome of a non-send transaction (execute call, execute rollback).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOutcome {
    /// Transaction id
    pub tx_id: String,
    /// Inclusion height
    pub height: u64,
}

/// Result of a correlated round trip.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct XCallResponse {
    /// Source serial number
    #[serde(rename = "SerialNo")]
    pub serial_no: SerialNo,
    /// Destination request id
    #[serde(rename = "RequestID")]
    pub request_id: RequestId,
    /// Delivered payload
    #[serde(rename = "Data")]
    pub data: Payload,
}
