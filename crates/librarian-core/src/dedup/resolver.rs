use dashmap::DashMap;
use std::cmp::Ordering;
use tracing::debug;

use crate::candidate::{CandidateState, ContentHash, FileCandidate};

/// All candidates sharing one content hash, in scan order.
#[derive(Debug, Clone)]
pub struct HashGroup {
    pub hash: ContentHash,
    pub members: Vec<FileCandidate>,
}

/// Outcome for one hash group: exactly one selected member, the rest redundant.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub hash: ContentHash,
    pub selected: FileCandidate,
    pub redundant: Vec<FileCandidate>,
}

impl Resolution {
    pub fn member_count(&self) -> usize {
        1 + self.redundant.len()
    }

    /// Member at `index` in preference order; 0 is the selected one.
    pub fn member(&self, index: usize) -> Option<&FileCandidate> {
        match index {
            0 => Some(&self.selected),
            n => self.redundant.get(n - 1),
        }
    }
}

/// Candidates accumulated by content hash, filled concurrently by the fingerprint workers.
pub type GroupMap = DashMap<ContentHash, Vec<FileCandidate>>;

/// Partition fingerprinted candidates by hash. Unhashed candidates are skipped.
pub fn group_by_hash(candidates: impl IntoIterator<Item = FileCandidate>) -> Vec<HashGroup> {
    let map = GroupMap::new();
    for candidate in candidates {
        if let Some(hash) = candidate.content_hash {
            map.entry(hash).or_default().push(candidate);
        }
    }
    collect_groups(map)
}

/// Turn the accumulated map into groups. Members keep scan order and groups
/// are ordered by their first member, whatever order the workers finished in.
pub fn collect_groups(map: GroupMap) -> Vec<HashGroup> {
    let mut groups: Vec<HashGroup> = map
        .into_iter()
        .map(|(hash, mut members)| {
            members.sort_by_key(|c| c.seq);
            HashGroup { hash, members }
        })
        .collect();
    groups.sort_by_key(|g| g.members.first().map(|c| c.seq).unwrap_or(u64::MAX));
    groups
}

/// Preference order between two members of one group; `Less` means `a` wins.
///
/// 1. higher quality score
/// 2. shorter source path
/// 3. earlier modification time
/// 4. lexicographically smaller path
pub fn preference(a: &FileCandidate, b: &FileCandidate) -> Ordering {
    b.quality_score
        .cmp(&a.quality_score)
        .then_with(|| {
            a.path
                .as_os_str()
                .len()
                .cmp(&b.path.as_os_str().len())
        })
        .then_with(|| a.modified_ns.cmp(&b.modified_ns))
        .then_with(|| a.path.cmp(&b.path))
}

/// Select the representative of a complete hash group. `None` for an empty group.
pub fn resolve_group(group: HashGroup) -> Option<Resolution> {
    let HashGroup { hash, mut members } = group;
    members.sort_by(preference);
    let mut members = members.into_iter();
    let mut selected = members.next()?;
    selected.advance(CandidateState::Selected);
    let redundant: Vec<FileCandidate> = members
        .map(|mut c| {
            c.advance(CandidateState::Redundant);
            c
        })
        .collect();

    for r in &redundant {
        debug!(
            "Redundant {} (score {}) duplicates {} (score {})",
            r.path.display(),
            r.quality_score,
            selected.path.display(),
            selected.quality_score
        );
    }

    Some(Resolution {
        hash,
        selected,
        redundant,
    })
}

/// Resolve every group, ordered by selected path so downstream naming is reproducible.
pub fn resolve_all(groups: Vec<HashGroup>) -> Vec<Resolution> {
    let mut resolutions: Vec<Resolution> = groups.into_iter().filter_map(resolve_group).collect();
    resolutions.sort_by(|a, b| a.selected.path.cmp(&b.selected.path));
    resolutions
}
