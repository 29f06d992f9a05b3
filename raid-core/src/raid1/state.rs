// vim: tw=80
//! The degraded-mode state machine.

use crate::types::ChildId;

/// `Healthy -> Degraded(X) -> Broken` is the only path; `Degraded(X) ->
/// Healthy` requires an explicit (out-of-scope) resync and is not modeled
/// here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradedState {
    Healthy,
    Degraded(ChildId),
    Broken,
}

impl DegradedState {
    pub fn is_healthy(self) -> bool {
        matches!(self, DegradedState::Healthy)
    }

    pub fn is_broken(self) -> bool {
        matches!(self, DegradedState::Broken)
    }

    /// The child believed to still be good, if any.
    pub fn survivor(self, a: ChildId, b: ChildId) -> Option<ChildId> {
        match self {
            DegradedState::Healthy => None,
            DegradedState::Degraded(bad) => Some(if bad == a { b } else { a }),
            DegradedState::Broken => None,
        }
    }

    /// Record a confirmed failure of `child`. `Healthy -> Degraded(child)`,
    /// `Degraded(other) -> Broken` if `child` is the surviving one,
    /// `Degraded(child) -> Degraded(child)` (idempotent), `Broken` stays
    /// `Broken` (terminal).
    pub fn on_failure(self, child: ChildId) -> DegradedState {
        match self {
            DegradedState::Healthy => DegradedState::Degraded(child),
            DegradedState::Degraded(bad) if bad == child => DegradedState::Degraded(bad),
            DegradedState::Degraded(_) => DegradedState::Broken,
            DegradedState::Broken => DegradedState::Broken,
        }
    }

    pub fn degraded_child(self) -> Option<ChildId> {
        match self {
            DegradedState::Degraded(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn healthy_to_degraded() {
        let s = DegradedState::Healthy.on_failure(ChildId::A);
        assert_eq!(s, DegradedState::Degraded(ChildId::A));
    }

    #[test]
    fn degraded_survivor_failure_breaks_array() {
        let s = DegradedState::Degraded(ChildId::A).on_failure(ChildId::B);
        assert_eq!(s, DegradedState::Broken);
    }

    #[test]
    fn degraded_same_child_failing_again_is_idempotent() {
        let s = DegradedState::Degraded(ChildId::A).on_failure(ChildId::A);
        assert_eq!(s, DegradedState::Degraded(ChildId::A));
    }

    #[test]
    fn broken_is_terminal() {
        let s = DegradedState::Broken.on_failure(ChildId::A);
        assert_eq!(s, DegradedState::Broken);
    }

    #[test]
    fn survivor_of_degraded_a_is_b() {
        assert_eq!(
            DegradedState::Degraded(ChildId::A).survivor(ChildId::A, ChildId::B),
            Some(ChildId::B)
        );
    }
}
