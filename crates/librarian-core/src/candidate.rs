use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// 256-bit BLAKE3 digest of a file's bytes. The only identity used for dedup.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Leading hex digits, used for fallback file names.
    pub fn short(&self) -> String {
        self.to_hex()[..16].to_string()
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(hash: blake3::Hash) -> Self {
        Self(*hash.as_bytes())
    }
}

impl FromStr for ContentHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        blake3::Hash::from_hex(s)
            .map(Self::from)
            .map_err(|e| format!("invalid content hash '{}': {}", s, e))
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.to_hex()
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

/// Fitness of a candidate to represent its hash group. Higher is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityScore(pub i32);

impl QualityScore {
    pub const MIN: QualityScore = QualityScore(0);
    pub const NEUTRAL: QualityScore = QualityScore(1);
}

impl fmt::Display for QualityScore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FormatFlags {
    pub is_document: bool,
    pub is_valid_document: bool,
    pub has_text_layer: bool,
    pub is_empty: bool,
}

/// One scanned source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCandidate {
    /// Position in scan order; keeps group membership order deterministic.
    pub seq: u64,
    pub path: PathBuf,
    pub size: u64,
    pub modified_ns: u64,
    pub content_hash: Option<ContentHash>,
    pub quality_score: QualityScore,
    pub format_flags: FormatFlags,
    pub state: CandidateState,
}

impl FileCandidate {
    pub fn discovered(seq: u64, path: PathBuf, size: u64, modified: Option<SystemTime>) -> Self {
        Self {
            seq,
            path,
            size,
            modified_ns: modified.map(system_time_to_ns).unwrap_or(0),
            content_hash: None,
            quality_score: QualityScore::MIN,
            format_flags: FormatFlags::default(),
            state: CandidateState::Discovered,
        }
    }

    /// A redundant member takes over the selection when every better copy of
    /// its content failed to read.
    pub fn reselect(&mut self) -> bool {
        if self.state == CandidateState::Redundant {
            self.state = CandidateState::Selected;
            true
        } else {
            false
        }
    }

    /// Move to `next` if the transition is legal. Illegal moves leave the state unchanged.
    pub fn advance(&mut self, next: CandidateState) -> bool {
        if self.state.can_advance_to(next) {
            self.state = next;
            true
        } else {
            warn!(
                "Ignoring illegal state change {:?} -> {:?} for {}",
                self.state,
                next,
                self.path.display()
            );
            false
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Nanoseconds since the Unix epoch, saturating at zero for older timestamps.
pub fn system_time_to_ns(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos().min(u64::MAX as u128) as u64)
        .unwrap_or(0)
}

/// Per-candidate pipeline state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateState {
    Discovered,
    Fingerprinted,
    Scored,
    Selected,
    Redundant,
    Copied,
    Indexed,
    Failed,
}

impl CandidateState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CandidateState::Redundant | CandidateState::Indexed | CandidateState::Failed
        )
    }

    /// Legal forward transitions. `Failed` is reachable from any non-terminal state.
    pub fn can_advance_to(self, next: CandidateState) -> bool {
        use CandidateState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Discovered, Fingerprinted) => true,
            (Fingerprinted, Scored) => true,
            (Scored, Selected) | (Scored, Redundant) => true,
            (Selected, Copied) => true,
            (Copied, Indexed) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_hex_round_trip() {
        let hash = ContentHash::from(blake3::hash(b"hello"));
        let parsed: ContentHash = hash.to_hex().parse().unwrap();
        assert_eq!(parsed, hash);
        assert_eq!(hash.short().len(), 16);
        assert!("not-hex".parse::<ContentHash>().is_err());
    }

    #[test]
    fn test_content_hash_serializes_as_hex_string() {
        let hash = ContentHash::from(blake3::hash(b"abc"));
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", hash.to_hex()));
    }

    #[test]
    fn test_state_machine_transitions() {
        use CandidateState::*;
        assert!(Discovered.can_advance_to(Fingerprinted));
        assert!(Scored.can_advance_to(Redundant));
        assert!(Copied.can_advance_to(Indexed));
        assert!(Discovered.can_advance_to(Failed));
        assert!(!Redundant.can_advance_to(Copied));
        assert!(!Indexed.can_advance_to(Failed));
        assert!(!Discovered.can_advance_to(Copied));
    }

    #[test]
    fn test_candidate_ignores_illegal_advance() {
        let mut candidate = FileCandidate::discovered(0, PathBuf::from("/src/a"), 1, None);
        assert!(!candidate.advance(CandidateState::Selected));
        assert_eq!(candidate.state, CandidateState::Discovered);
        assert!(candidate.advance(CandidateState::Fingerprinted));
        assert!(candidate.advance(CandidateState::Scored));
        assert_eq!(candidate.state, CandidateState::Scored);
    }

    #[test]
    fn test_full_lifecycle_and_reselection() {
        use CandidateState::*;
        let mut candidate = FileCandidate::discovered(0, PathBuf::from("/src/a"), 1, None);
        for next in [Fingerprinted, Scored, Redundant] {
            assert!(candidate.advance(next));
        }
        assert!(!candidate.advance(Copied));
        assert!(candidate.reselect());
        assert!(candidate.advance(Copied));
        assert!(candidate.advance(Indexed));
        assert!(!candidate.advance(Failed));
        assert!(!candidate.reselect());
    }
}
