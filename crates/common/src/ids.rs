use serde::{Deserialize, Serialize};
use std::fmt;

const ORIGINAL_PREFIX: &str = "ori";
const SIMPLIFIED_PREFIX: &str = "lpoly";

/// Identifier of one source mesh, e.g. `ori0000042`.
///
/// Ordering is lexicographic, which matches allocation order because the
/// numeric part is zero padded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub String);

impl MeshId {
    /// Id of the `n`th original mesh of a build session.
    pub fn original(n: u64) -> Self {
        Self(format!("{ORIGINAL_PREFIX}{n:07}"))
    }

    /// Cache key of the simplified record derived from this mesh.
    pub fn simplified_key(&self) -> String {
        format!("{SIMPLIFIED_PREFIX}{}", self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MeshId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of an imported file: its stem with non-alphanumerics replaced by `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub String);

impl FileId {
    pub fn from_file_name(name: &str) -> Self {
        Self(
            name.chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Monotonic mesh id counter owned by one build session.
#[derive(Debug, Clone)]
pub struct MeshIdAllocator {
    next: u64,
}

impl Default for MeshIdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl MeshIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> MeshId {
        let id = MeshId::original(self.next);
        self.next += 1;
        id
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_padded_and_monotonic() {
        let mut alloc = MeshIdAllocator::new();
        let a = alloc.next_id();
        let b = alloc.next_id();
        assert_eq!(a.as_str(), "ori0000001");
        assert_eq!(b.as_str(), "ori0000002");
        assert!(a < b);
        assert_eq!(alloc.allocated(), 2);
    }

    #[test]
    fn simplified_key_prefixes_original() {
        assert_eq!(MeshId::original(7).simplified_key(), "lpolyori0000007");
    }

    #[test]
    fn file_id_sanitizes_name() {
        assert_eq!(FileId::from_file_name("deck-3 (v2).glb").as_str(), "deck_3__v2__glb");
    }
}
