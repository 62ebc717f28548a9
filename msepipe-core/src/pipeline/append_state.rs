//! Append state machine states and the transition table.

use std::fmt;

use serde::{Deserialize, Serialize};

/// State of the current append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppendState {
    /// Terminal; entered on disposal or when the client went away.
    Invalid,
    /// Idle, accepting new chunks.
    NotStarted,
    /// Chunk pushed, awaiting samples or end of append.
    Ongoing,
    /// Decryption context requested; always returns to `Ongoing`.
    KeyNegotiation,
    /// End of append reached without any sample.
    DataStarve,
    /// At least one sample produced for this append.
    Sampling,
    /// End of append reached after producing samples.
    LastSample,
    /// Resetting elements; always returns to `NotStarted`.
    Aborting,
}

impl AppendState {
    /// Whether `self → next` is in the transition table.
    ///
    /// Any state may move to `Invalid`.
    pub fn can_transition_to(self, next: AppendState) -> bool {
        use AppendState::*;

        if next == Invalid {
            return true;
        }

        matches!(
            (self, next),
            (NotStarted, Ongoing)
                | (NotStarted, NotStarted)
                | (NotStarted, Aborting)
                | (KeyNegotiation, Ongoing)
                | (Ongoing, KeyNegotiation)
                | (Ongoing, Sampling)
                | (Ongoing, DataStarve)
                | (Sampling, Sampling)
                | (Sampling, LastSample)
                | (DataStarve, Aborting)
                | (DataStarve, NotStarted)
                | (LastSample, Aborting)
                | (LastSample, NotStarted)
                | (Aborting, NotStarted)
        )
    }

    /// States that end an append and notify "all pending samples received".
    pub fn is_end_of_append(self) -> bool {
        matches!(self, AppendState::DataStarve | AppendState::LastSample)
    }

    /// States in which an end-of-append may be detected.
    pub fn accepts_end_of_append(self) -> bool {
        matches!(self, AppendState::Ongoing | AppendState::Sampling)
    }

    pub fn is_transient(self) -> bool {
        matches!(
            self,
            AppendState::KeyNegotiation
                | AppendState::DataStarve
                | AppendState::LastSample
                | AppendState::Aborting
        )
    }
}

impl fmt::Display for AppendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppendState::Invalid => "Invalid",
            AppendState::NotStarted => "NotStarted",
            AppendState::Ongoing => "Ongoing",
            AppendState::KeyNegotiation => "KeyNegotiation",
            AppendState::DataStarve => "DataStarve",
            AppendState::Sampling => "Sampling",
            AppendState::LastSample => "LastSample",
            AppendState::Aborting => "Aborting",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    const ALL: [AppendState; 8] = [
        AppendState::Invalid,
        AppendState::NotStarted,
        AppendState::Ongoing,
        AppendState::KeyNegotiation,
        AppendState::DataStarve,
        AppendState::Sampling,
        AppendState::LastSample,
        AppendState::Aborting,
    ];

    #[test]
    fn test_happy_path_transitions() {
        use AppendState::*;
        let path = [NotStarted, Ongoing, Sampling, Sampling, LastSample, NotStarted];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_abort_paths() {
        use AppendState::*;
        assert!(NotStarted.can_transition_to(Aborting));
        assert!(DataStarve.can_transition_to(Aborting));
        assert!(LastSample.can_transition_to(Aborting));
        assert!(Aborting.can_transition_to(NotStarted));
        assert!(!Ongoing.can_transition_to(Aborting));
        assert!(!Sampling.can_transition_to(Aborting));
        assert!(!Aborting.can_transition_to(Ongoing));
    }

    #[test]
    fn test_invalid_is_terminal() {
        for state in ALL {
            assert!(state.can_transition_to(AppendState::Invalid));
            if state != AppendState::Invalid {
                assert!(!AppendState::Invalid.can_transition_to(state));
            }
        }
    }

    #[test]
    fn test_key_negotiation_only_returns_to_ongoing() {
        for state in ALL {
            let allowed = AppendState::KeyNegotiation.can_transition_to(state);
            assert_eq!(
                allowed,
                matches!(state, AppendState::Ongoing | AppendState::Invalid)
            );
        }
    }

    #[test]
    fn test_end_of_append_detected_only_while_active() {
        for state in ALL {
            let reaches_end = state.can_transition_to(AppendState::DataStarve)
                || state.can_transition_to(AppendState::LastSample);
            assert_eq!(state.accepts_end_of_append(), reaches_end, "{state}");
        }
    }

    fn any_state() -> impl Strategy<Value = AppendState> {
        (0..ALL.len()).prop_map(|i| ALL[i])
    }

    proptest! {
        #[test]
        fn test_transient_states_never_loop(state in any_state()) {
            if state.is_transient() {
                prop_assert!(!state.can_transition_to(state));
            }
        }

        #[test]
        fn test_end_of_append_states_leave_only_to_idle(from in any_state(), to in any_state()) {
            if from.is_end_of_append() && from.can_transition_to(to) {
                prop_assert!(matches!(
                    to,
                    AppendState::Aborting | AppendState::NotStarted | AppendState::Invalid
                ));
            }
        }
    }
}
