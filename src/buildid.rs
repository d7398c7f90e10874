// Content-addressed block-processing engine.

//! Identifiers for a single build: a project, a branch, a commit, and a
//! target platform, packed into a fixed 16-byte big-endian key.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Byte length of the encoded form of a [BuildId].
pub const BUILD_ID_ENCODED_LEN: usize = 16;

/// Identifies one build: `project_id (u64) | branch (u16) | commit ([u8; 4])
/// | platform (u16)`, 16 bytes total, big-endian.
///
/// The encoded form is used directly as a `redb` table key, so its byte
/// order also defines the build iteration order within a project.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct BuildId {
    pub project_id: u64,
    pub branch: u16,
    pub commit: [u8; 4],
    pub platform: u16,
}

impl BuildId {
    pub fn new(project_id: u64, branch: u16, commit: [u8; 4], platform: u16) -> Self {
        BuildId {
            project_id,
            branch,
            commit,
            platform,
        }
    }

    /// Encode to the fixed 16-byte big-endian wire form.
    pub fn to_bytes(self) -> [u8; BUILD_ID_ENCODED_LEN] {
        let mut out = [0u8; BUILD_ID_ENCODED_LEN];
        out[0..8].copy_from_slice(&self.project_id.to_be_bytes());
        out[8..10].copy_from_slice(&self.branch.to_be_bytes());
        out[10..14].copy_from_slice(&self.commit);
        out[14..16].copy_from_slice(&self.platform.to_be_bytes());
        out
    }

    /// Decode from a 16-byte big-endian slice.
    ///
    /// Panics if `bytes.len() != 16`; callers within the crate always pass a
    /// slice taken from a `redb` key of the known fixed width, so this is a
    /// programming-error assertion rather than a recoverable condition.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert_eq!(bytes.len(), BUILD_ID_ENCODED_LEN, "BuildId is 16 bytes");
        let project_id = u64::from_be_bytes(bytes[0..8].try_into().unwrap());
        let branch = u16::from_be_bytes(bytes[8..10].try_into().unwrap());
        let commit = bytes[10..14].try_into().unwrap();
        let platform = u16::from_be_bytes(bytes[14..16].try_into().unwrap());
        BuildId {
            project_id,
            branch,
            commit,
            platform,
        }
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}/{:04x}/{:02x}{:02x}{:02x}{:02x}/{:04x}",
            self.project_id,
            self.branch,
            self.commit[0],
            self.commit[1],
            self.commit[2],
            self.commit[3],
            self.platform
        )
    }
}

impl fmt::Debug for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildId({self})")
    }
}
