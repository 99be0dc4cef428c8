//! Transcript and conversation turn types
//!
//! A [`TranscriptResult`] is the STT service's answer for one utterance
//! (partial or final). A [`Turn`] is what actually enters conversation
//! history — only finals with non-empty text become turns (spec open
//! question: control-plane reporting is finals-only; see DESIGN.md).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WordTimestamp {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// Result of an STT call: either a speculative partial or an utterance-final.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub text: String,
    pub confidence: f32,
    pub is_final: bool,
    #[serde(default)]
    pub words: Vec<WordTimestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Turn {
    pub fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Emitted once at teardown; reported to the control plane and never
/// persists audio, only the ordered turn sequence (spec §3 Non-goals).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptArtifact {
    pub tenant_id: String,
    pub call_id: String,
    pub caller_id: String,
    pub duration_ms: u64,
    pub turns: Vec<Turn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_roundtrips_through_json() {
        let artifact = TranscriptArtifact {
            tenant_id: "t1".into(),
            call_id: "c1".into(),
            caller_id: "+15551234567".into(),
            duration_ms: 4200,
            turns: vec![
                Turn::new(TurnRole::Assistant, "Hello, how can I help?"),
                Turn::new(TurnRole::User, "What time do you close?"),
            ],
        };

        let json = serde_json::to_string(&artifact).unwrap();
        let back: TranscriptArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(back.turns.len(), artifact.turns.len());
        assert_eq!(back.call_id, artifact.call_id);
    }
}
