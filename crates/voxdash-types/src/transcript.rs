//! Transcript entry definitions.

use serde::{Deserialize, Serialize};

/// One ordered fragment of live transcript text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    /// Strictly increasing within one session, starting at 1.
    pub sequence: u64,
    /// Utterance content exactly as delivered by the RTC client.
    pub text: String,
}
