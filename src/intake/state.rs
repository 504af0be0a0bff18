//! Intake state machine — tracks which phase the conversation is in.

use serde::{Deserialize, Serialize};

/// The question phases of the intake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PersonalInfo,
    Symptoms,
    MedicalHistory,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PersonalInfo => "personal_info",
            Self::Symptoms => "symptoms",
            Self::MedicalHistory => "medical_history",
        };
        write!(f, "{s}")
    }
}

/// The states of the intake conversation.
///
/// Progresses linearly: Initial → CollectingPersonalInfo → CollectingSymptoms →
/// CollectingMedicalHistory → AwaitingRecommendations → Completed.
/// `AwaitingRecommendations` is held only while the recommendation call is in
/// flight and falls back to `CollectingMedicalHistory` if that call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Initial,
    CollectingPersonalInfo,
    CollectingSymptoms,
    CollectingMedicalHistory,
    AwaitingRecommendations,
    Completed,
}

impl ConversationState {
    /// Check if a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: ConversationState) -> bool {
        use ConversationState::*;
        matches!(
            (self, target),
            (Initial, CollectingPersonalInfo)
                | (CollectingPersonalInfo, CollectingSymptoms)
                | (CollectingSymptoms, CollectingMedicalHistory)
                | (CollectingMedicalHistory, AwaitingRecommendations)
                | (AwaitingRecommendations, Completed)
                | (AwaitingRecommendations, CollectingMedicalHistory)
        )
    }

    /// Whether this state is terminal (intake is done).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// The question phase answered in this state, if answers are accepted.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::CollectingPersonalInfo => Some(Phase::PersonalInfo),
            Self::CollectingSymptoms => Some(Phase::Symptoms),
            Self::CollectingMedicalHistory => Some(Phase::MedicalHistory),
            Self::Initial | Self::AwaitingRecommendations | Self::Completed => None,
        }
    }
}

impl std::fmt::Display for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Initial => "initial",
            Self::CollectingPersonalInfo => "collecting_personal_info",
            Self::CollectingSymptoms => "collecting_symptoms",
            Self::CollectingMedicalHistory => "collecting_medical_history",
            Self::AwaitingRecommendations => "awaiting_recommendations",
            Self::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ConversationState; 6] = [
        ConversationState::Initial,
        ConversationState::CollectingPersonalInfo,
        ConversationState::CollectingSymptoms,
        ConversationState::CollectingMedicalHistory,
        ConversationState::AwaitingRecommendations,
        ConversationState::Completed,
    ];

    #[test]
    fn valid_transitions() {
        use ConversationState::*;
        let transitions = [
            (Initial, CollectingPersonalInfo),
            (CollectingPersonalInfo, CollectingSymptoms),
            (CollectingSymptoms, CollectingMedicalHistory),
            (CollectingMedicalHistory, AwaitingRecommendations),
            (AwaitingRecommendations, Completed),
            (AwaitingRecommendations, CollectingMedicalHistory),
        ];
        for (from, to) in transitions {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use ConversationState::*;
        // Skip phases
        assert!(!Initial.can_transition_to(CollectingSymptoms));
        assert!(!CollectingPersonalInfo.can_transition_to(Completed));
        // Go backward
        assert!(!CollectingSymptoms.can_transition_to(CollectingPersonalInfo));
        // Terminal
        assert!(!Completed.can_transition_to(Initial));
        // Self-transition
        assert!(!CollectingSymptoms.can_transition_to(CollectingSymptoms));
    }

    #[test]
    fn only_collecting_states_have_a_phase() {
        let with_phase: Vec<_> = ALL.iter().filter(|s| s.phase().is_some()).collect();
        assert_eq!(with_phase.len(), 3);
        assert_eq!(
            ConversationState::CollectingSymptoms.phase(),
            Some(Phase::Symptoms)
        );
        assert!(ConversationState::AwaitingRecommendations.phase().is_none());
    }

    #[test]
    fn is_terminal() {
        assert!(ConversationState::Completed.is_terminal());
        assert!(!ConversationState::Initial.is_terminal());
        assert!(!ConversationState::AwaitingRecommendations.is_terminal());
    }

    #[test]
    fn display_matches_serde() {
        for state in ALL {
            let display = format!("{state}");
            let json = serde_json::to_string(&state).unwrap();
            assert_eq!(format!("\"{display}\""), json, "mismatch for {state:?}");
        }
    }
}
