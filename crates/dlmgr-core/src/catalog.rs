//! Interface to the read-only catalog store.
//!
//! The catalog (a separate, `.7z`-extracted database of the content tree) is
//! owned by the host application. The engine only ever reads two projections
//! of it: the URL/title for a node, and the chain of ancestor titles used to
//! mirror directory structure when `preserve_structure` is set. Both are
//! injected through this trait so the engine has no build-time dependency on
//! the catalog's schema.

use crate::store::types::DownloadId;

/// Info resolved for a single catalog node.
#[derive(Debug, Clone)]
pub struct FileDownloadInfo {
    pub url: Option<String>,
    pub title: String,
}

/// Read-only accessor for catalog data, implemented by the host application.
pub trait CatalogStore: Send + Sync + 'static {
    /// Resolves `(url?, title)` for a node id. `None` if the id is unknown.
    fn get_file_download_info(&self, id: DownloadId) -> Option<FileDownloadInfo>;

    /// Returns the ancestor chain of directory titles from the catalog root
    /// to this node's parent (root first), used to mirror remote structure.
    fn get_file_ancestor_path(&self, id: DownloadId) -> Vec<String>;
}

/// In-memory catalog used for tests and for callers that resolve everything
/// up front (e.g. the CLI, which has no separate catalog process).
#[derive(Default, Clone)]
pub struct StaticCatalog {
    entries: std::collections::HashMap<DownloadId, (FileDownloadInfo, Vec<String>)>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: DownloadId, url: Option<String>, title: impl Into<String>, ancestors: Vec<String>) {
        self.entries.insert(
            id,
            (
                FileDownloadInfo {
                    url,
                    title: title.into(),
                },
                ancestors,
            ),
        );
    }
}

impl CatalogStore for StaticCatalog {
    fn get_file_download_info(&self, id: DownloadId) -> Option<FileDownloadInfo> {
        self.entries.get(&id).map(|(info, _)| info.clone())
    }

    fn get_file_ancestor_path(&self, id: DownloadId) -> Vec<String> {
        self.entries
            .get(&id)
            .map(|(_, anc)| anc.clone())
            .unwrap_or_default()
    }
}
