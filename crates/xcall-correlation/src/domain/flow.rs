//! # Send-Then-Correlate Flow
//!
//! State machine tracked by the orchestrator for one logical round trip.

use super::errors::{Result, XCallError};
use super::value_objects::SerialNo;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Orchestration phase.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowPhase {
    /// Nothing done yet.
    #[default]
    Idle,
    /// Destination watermark captured.
    HeightCaptured,
    /// Source transaction included, `sn` known.
    Sent,
    /// Waiting for the destination event.
    Correlating,
    /// Correlated successfully.
    Done,
    /// Send or correlation failed.
    Failed,
}

impl FlowPhase {
    /// Check if transition is valid.
    pub fn can_transition_to(&self, next: FlowPhase) -> bool {
        match (self, next) {
            (Self::Idle, Self::HeightCaptured) => true,
            (Self::HeightCaptured, Self::Sent) => true,
            (Self::Sent, Self::Correlating) => true,
            (Self::Correlating, Self::Done) => true,
            (from, Self::Failed) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Check if terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for FlowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One round trip in flight.
#[derive(Clone, Debug)]
pub struct XCallFlow {
    /// Correlation id for logs
    pub id: Uuid,
    /// Current phase
    pub phase: FlowPhase,
    /// Destination watermark
    pub watermark: Option<u64>,
    /// Serial number once sent
    pub sn: Option<SerialNo>,
}

impl Default for XCallFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl XCallFlow {
    /// Fresh flow in `Idle`.
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            phase: FlowPhase::Idle,
            watermark: None,
            sn: None,
        }
    }

    /// Move to `next`, rejecting illegal transitions.
    pub fn advance(&mut self, next: FlowPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(XCallError::InvalidFlowTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        self.phase = next;
        Ok(())
    }

    /// Record the watermark.
    pub fn height_captured(&mut self, height: u64) -> Result<()> {
        self.advance(FlowPhase::HeightCaptured)?;
        self.watermark = Some(height);
        Ok(())
    }

    /// Record the serial number.
    pub fn sent(&mut self, sn: SerialNo) -> Result<()> {
        self.advance(FlowPhase::Sent)?;
        self.sn = Some(sn);
        Ok(())
    }

    /// Mark failed unless already terminal.
    pub fn fail(&mut self) {
        if !self.phase.is_terminal() {
            self.phase = FlowPhase::Failed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut flow = XCallFlow::new();
        flow.height_captured(5).unwrap();
        flow.sent(SerialNo::from_u64(1)).unwrap();
        flow.advance(FlowPhase::Correlating).unwrap();
        flow.advance(FlowPhase::Done).unwrap();
        assert!(flow.phase.is_terminal());
        assert_eq!(flow.watermark, Some(5));
    }

    #[test]
    fn test_cannot_send_before_watermark() {
        let mut flow = XCallFlow::new();
        let err = flow.sent(SerialNo::from_u64(1)).unwrap_err();
        assert!(matches!(err, XCallError::InvalidFlowTransition { .. }));
    }

    #[test]
    fn test_terminal_states_are_sticky() {
        assert!(!FlowPhase::Done.can_transition_to(FlowPhase::Failed));
        assert!(!FlowPhase::Failed.can_transition_to(FlowPhase::Correlating));
        let mut flow = XCallFlow::new();
        flow.fail();
        assert_eq!(flow.phase, FlowPhase::Failed);
        assert!(flow.advance(FlowPhase::HeightCaptured).is_err());
    }
}
