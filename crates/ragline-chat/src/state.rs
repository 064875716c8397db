//! Request state machine with validated transitions.
//!
//! Received -> SafetyCheck -> Refused
//! Received -> SafetyCheck -> Retrieving -> Generating -> Complete
//! Generating -> AudioPending -> Complete
//! Generating -> Failed
//! Received -> Failed (rejected by validation)

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Lifecycle of one chat request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatState {
    Received,
    SafetyCheck,
    Refused,
    Retrieving,
    Generating,
    AudioPending,
    Complete,
    Failed,
}

impl ChatState {
    /// Whether the request has reached an end state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChatState::Refused | ChatState::Complete | ChatState::Failed
        )
    }
}

impl fmt::Display for ChatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatState::Received => write!(f, "received"),
            ChatState::SafetyCheck => write!(f, "safety_check"),
            ChatState::Refused => write!(f, "refused"),
            ChatState::Retrieving => write!(f, "retrieving"),
            ChatState::Generating => write!(f, "generating"),
            ChatState::AudioPending => write!(f, "audio_pending"),
            ChatState::Complete => write!(f, "complete"),
            ChatState::Failed => write!(f, "failed"),
        }
    }
}

/// Validate that a state transition is allowed.
pub fn validate_transition(from: ChatState, to: ChatState) -> Result<(), ChatError> {
    let valid = matches!(
        (from, to),
        (ChatState::Received, ChatState::SafetyCheck)
            | (ChatState::Received, ChatState::Failed)
            | (ChatState::SafetyCheck, ChatState::Refused)
            | (ChatState::SafetyCheck, ChatState::Retrieving)
            | (ChatState::Retrieving, ChatState::Generating)
            | (ChatState::Generating, ChatState::AudioPending)
            | (ChatState::Generating, ChatState::Complete)
            | (ChatState::Generating, ChatState::Failed)
            | (ChatState::AudioPending, ChatState::Complete)
    );

    if valid {
        Ok(())
    } else {
        Err(ChatError::InvalidTransition(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ChatState; 8] = [
        ChatState::Received,
        ChatState::SafetyCheck,
        ChatState::Refused,
        ChatState::Retrieving,
        ChatState::Generating,
        ChatState::AudioPending,
        ChatState::Complete,
        ChatState::Failed,
    ];

    // =====================================================================
    // Valid transitions
    // =====================================================================

    #[test]
    fn test_happy_path_with_audio() {
        let path = [
            ChatState::Received,
            ChatState::SafetyCheck,
            ChatState::Retrieving,
            ChatState::Generating,
            ChatState::AudioPending,
            ChatState::Complete,
        ];
        for pair in path.windows(2) {
            assert!(validate_transition(pair[0], pair[1]).is_ok(), "{pair:?}");
        }
    }

    #[test]
    fn test_generating_to_complete() {
        assert!(validate_transition(ChatState::Generating, ChatState::Complete).is_ok());
    }

    #[test]
    fn test_safety_check_to_refused() {
        assert!(validate_transition(ChatState::SafetyCheck, ChatState::Refused).is_ok());
    }

    #[test]
    fn test_generating_to_failed() {
        assert!(validate_transition(ChatState::Generating, ChatState::Failed).is_ok());
    }

    // =====================================================================
    // Invalid transitions
    // =====================================================================

    #[test]
    fn test_refused_skips_retrieval_and_generation() {
        assert!(validate_transition(ChatState::Refused, ChatState::Retrieving).is_err());
        assert!(validate_transition(ChatState::Refused, ChatState::Generating).is_err());
    }

    #[test]
    fn test_safety_check_cannot_be_skipped() {
        assert!(validate_transition(ChatState::Received, ChatState::Retrieving).is_err());
        assert!(validate_transition(ChatState::Received, ChatState::Generating).is_err());
    }

    #[test]
    fn test_retrieving_always_generates() {
        assert!(validate_transition(ChatState::Retrieving, ChatState::Failed).is_err());
        assert!(validate_transition(ChatState::Retrieving, ChatState::Complete).is_err());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(
                    validate_transition(from, to).is_err(),
                    "{from} -> {to} should be rejected"
                );
            }
        }
    }

    #[test]
    fn test_self_transitions_invalid() {
        for state in ALL {
            assert!(validate_transition(state, state).is_err());
        }
    }

    // =====================================================================
    // Display
    // =====================================================================

    #[test]
    fn test_display_and_error_message() {
        assert_eq!(ChatState::AudioPending.to_string(), "audio_pending");
        let err = validate_transition(ChatState::Complete, ChatState::Generating).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid state transition: complete -> generating"
        );
    }

    #[test]
    fn test_serde_matches_display() {
        for state in ALL {
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(json, format!("\"{state}\""));
        }
    }
}
