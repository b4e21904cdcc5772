use std::fmt;

use serde::{Deserialize, Serialize};

/// Length of a content-addressed tag, in hex characters.
pub const TAG_LEN: usize = 12;

/// Content-addressed image tag: a short hex prefix of the context digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageTag(String);

impl ImageTag {
    /// Build a tag from a full hex digest, keeping the first `TAG_LEN` chars.
    pub fn from_digest(hex_digest: &str) -> Self {
        Self(hex_digest.chars().take(TAG_LEN).collect())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ImageTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully-qualified address of a built image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub registry_host: String,
    pub project_id: String,
    pub repository: String,
    pub resource_name: String,
    pub tag: ImageTag,
}

impl ImageReference {
    /// Reference without the tag, e.g. `host/project/repo/name`.
    pub fn repository_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.registry_host, self.project_id, self.repository, self.resource_name
        )
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository_path(), self.tag)
    }
}
