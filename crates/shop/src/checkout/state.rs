//! Checkout state machine.

/// The state of a checkout in progress.
///
/// State transitions:
/// ```text
/// Validating ──► Reserving ──► Committing ──► Completed
///     │              │              │
///     └──────────────┴──────────────┴──► Aborted
/// ```
///
/// `Reserving` creates one order per cart line and decrements stock.
/// `Committing` clears the cart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CheckoutState {
    #[default]
    Validating,
    Reserving,
    Committing,
    /// Terminal.
    Completed,
    /// Terminal.
    Aborted,
}

impl CheckoutState {
    pub fn can_transition_to(&self, next: CheckoutState) -> bool {
        match (self, next) {
            (CheckoutState::Validating, CheckoutState::Reserving)
            | (CheckoutState::Reserving, CheckoutState::Committing)
            | (CheckoutState::Committing, CheckoutState::Completed) => true,
            (current, CheckoutState::Aborted) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, CheckoutState::Completed | CheckoutState::Aborted)
    }

    /// Returns true if nothing has been written yet.
    pub fn is_side_effect_free(&self) -> bool {
        matches!(self, CheckoutState::Validating)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutState::Validating => "Validating",
            CheckoutState::Reserving => "Reserving",
            CheckoutState::Committing => "Committing",
            CheckoutState::Completed => "Completed",
            CheckoutState::Aborted => "Aborted",
        }
    }
}

impl std::fmt::Display for CheckoutState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_validating() {
        assert_eq!(CheckoutState::default(), CheckoutState::Validating);
        assert!(CheckoutState::default().is_side_effect_free());
    }

    #[test]
    fn test_forward_path() {
        assert!(CheckoutState::Validating.can_transition_to(CheckoutState::Reserving));
        assert!(CheckoutState::Reserving.can_transition_to(CheckoutState::Committing));
        assert!(CheckoutState::Committing.can_transition_to(CheckoutState::Completed));

        assert!(!CheckoutState::Validating.can_transition_to(CheckoutState::Committing));
        assert!(!CheckoutState::Reserving.can_transition_to(CheckoutState::Completed));
        assert!(!CheckoutState::Committing.can_transition_to(CheckoutState::Reserving));
    }

    #[test]
    fn test_abort_from_any_non_terminal_state() {
        assert!(CheckoutState::Validating.can_transition_to(CheckoutState::Aborted));
        assert!(CheckoutState::Reserving.can_transition_to(CheckoutState::Aborted));
        assert!(CheckoutState::Committing.can_transition_to(CheckoutState::Aborted));
        assert!(!CheckoutState::Completed.can_transition_to(CheckoutState::Aborted));
        assert!(!CheckoutState::Aborted.can_transition_to(CheckoutState::Aborted));
    }

    #[test]
    fn test_display() {
        assert_eq!(CheckoutState::Validating.to_string(), "Validating");
        assert_eq!(CheckoutState::Completed.to_string(), "Completed");
    }
}
