use crate::error::PreconditionViolation;
use serde::Serialize;

/// Per-widget lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WidgetPhase {
    /// Gate off, nothing rendered
    Inactive,
    /// Script loading or map initialising
    Activating,
    /// Live session with synchronized markers
    Ready,
    /// Activation or sync failed; waits for a manual off/on cycle
    Error,
}

/// Validates a phase transition.
///
/// Errors never lead back to `Activating` directly: the gate has to be
/// switched off first.
pub fn validate_transition(from: WidgetPhase, to: WidgetPhase) -> Result<(), PreconditionViolation> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(PreconditionViolation::IllegalTransition { from, to })
    }
}

/// Phases reachable from `from` in one step
pub fn allowed_transitions(from: WidgetPhase) -> &'static [WidgetPhase] {
    use WidgetPhase::*;
    match from {
        Inactive => &[Activating],
        Activating => &[Ready, Error, Inactive],
        Ready => &[Inactive, Error],
        Error => &[Inactive],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use WidgetPhase::*;

    #[test]
    fn activation_path() {
        assert!(validate_transition(Inactive, Activating).is_ok());
        assert!(validate_transition(Activating, Ready).is_ok());
        assert!(validate_transition(Ready, Inactive).is_ok());
    }

    #[test]
    fn error_requires_deactivation() {
        assert!(validate_transition(Error, Activating).is_err());
        assert!(validate_transition(Error, Ready).is_err());
        assert!(validate_transition(Error, Inactive).is_ok());
        assert!(validate_transition(Inactive, Ready).is_err());
    }

    fn phase() -> impl Strategy<Value = WidgetPhase> {
        prop_oneof![Just(Inactive), Just(Activating), Just(Ready), Just(Error)]
    }

    proptest! {
        #[test]
        fn prop_validation_matches_table(from in phase(), to in phase()) {
            let allowed = allowed_transitions(from).contains(&to);
            prop_assert_eq!(validate_transition(from, to).is_ok(), allowed);
            prop_assert!(!allowed_transitions(from).contains(&from));
        }
    }
}
