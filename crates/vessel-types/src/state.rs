use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an artifact.
///
/// ```text
/// Draft ──commit──▶ Committed ──delete──▶ Deleted
/// ```
///
/// `Draft` is the only state in which the manifest may change. `Deleted` is
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArtifactState {
    Draft,
    Committed,
    Deleted,
}

impl ArtifactState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ArtifactState) -> bool {
        matches!(
            (self, next),
            (Self::Draft, Self::Committed) | (Self::Committed, Self::Deleted)
        )
    }

    pub fn is_draft(self) -> bool {
        self == Self::Draft
    }

    pub fn is_committed(self) -> bool {
        self == Self::Committed
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Committed => write!(f, "committed"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_transitions() {
        assert!(ArtifactState::Draft.can_transition_to(ArtifactState::Committed));
        assert!(ArtifactState::Committed.can_transition_to(ArtifactState::Deleted));
    }

    #[test]
    fn illegal_transitions() {
        use ArtifactState::*;
        for (from, to) in [
            (Draft, Deleted),
            (Draft, Draft),
            (Committed, Draft),
            (Committed, Committed),
            (Deleted, Draft),
            (Deleted, Committed),
        ] {
            assert!(!from.can_transition_to(to), "{from} -> {to}");
        }
    }

    #[test]
    fn serde_uses_upper_case() {
        let json = serde_json::to_string(&ArtifactState::Committed).unwrap();
        assert_eq!(json, "\"COMMITTED\"");
        let state: ArtifactState = serde_json::from_str("\"DELETED\"").unwrap();
        assert_eq!(state, ArtifactState::Deleted);
    }
}
