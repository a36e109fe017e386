//! Normalized containers and the files inside them.

use super::source::Source;

/// A single downloadable file inside a container.
///
/// Built once during normalization and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct File {
    /// Category of the container this file belongs to.
    pub source: Source,

    /// Id of the parent container.
    pub container_id: u64,

    /// Upstream file id, unique within the container.
    pub file_id: u64,

    /// Full path/name as reported upstream; filters match against this.
    pub full_name: String,

    /// Short human-facing name shown in listings.
    pub display_name: String,

    /// Size in bytes; unknown sizes are 0.
    pub size: u64,
}

/// A provider item (torrent, web download, usenet post) grouping files.
///
/// Containers without files never leave normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub source: Source,
    pub container_id: u64,
    pub container_name: String,
    pub files: Vec<File>,
}

impl Container {
    /// Sum of the sizes of every file in the container.
    pub fn total_size(&self) -> u64 {
        self.files
            .iter()
            .fold(0u64, |acc, file| acc.saturating_add(file.size))
    }

    pub fn file(&self, file_id: u64) -> Option<&File> {
        self.files.iter().find(|file| file.file_id == file_id)
    }
}
