//! Project bundle model
//!
//! A bundle is the set of entries read from one uploaded zip archive. It is
//! deployable by appjail-director once both manifest files are present.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Manifest files every bundle must carry at its root
pub const MANIFEST_FILES: [&str; 2] = ["appjail-director.yml", "info.json"];

/// An uploaded archive as received from the client
#[derive(Debug, Clone)]
pub struct UploadPayload {
    pub original_filename: String,
    pub raw_bytes: Vec<u8>,
}

impl UploadPayload {
    pub fn new(original_filename: impl Into<String>, raw_bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            original_filename: original_filename.into(),
            raw_bytes: raw_bytes.into(),
        }
    }
}

/// One entry of an archive
///
/// Content is not held here; it is streamed from the archive by index when the
/// bundle is materialized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Archive-internal path, '/'-separated
    pub path: String,
    /// Position of the entry in the archive's central directory
    pub index: usize,
    pub is_directory: bool,
    /// Uncompressed size (zero for directories)
    pub size: u64,
}

/// Entries of one archive keyed by path, with the project they belong to
#[derive(Debug, Clone)]
pub struct ProjectBundle {
    project_name: String,
    entries: BTreeMap<String, ArchiveEntry>,
}

impl ProjectBundle {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            entries: BTreeMap::new(),
        }
    }

    /// Record an entry; a later entry with the same path replaces the earlier one
    pub fn insert(&mut self, entry: ArchiveEntry) {
        self.entries.insert(entry.path.clone(), entry);
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    pub fn get(&self, path: &str) -> Option<&ArchiveEntry> {
        self.entries.get(path)
    }

    pub fn entries(&self) -> impl Iterator<Item = &ArchiveEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Manifest files that are absent, or present only as directories
    pub fn missing_manifests(&self) -> Vec<String> {
        MANIFEST_FILES
            .iter()
            .filter(|name| !matches!(self.get(name), Some(entry) if !entry.is_directory))
            .map(|name| name.to_string())
            .collect()
    }

    /// Whether both manifest files are present as file entries
    pub fn is_complete(&self) -> bool {
        self.missing_manifests().is_empty()
    }
}

/// Derive a project name from an uploaded archive's filename
///
/// The final extension is stripped and the result lower-cased, so
/// `MyProject.zip` becomes `myproject`. Returns `None` when nothing usable is
/// left, or when the name would escape the projects root.
pub fn project_name_from_filename(filename: &str) -> Option<String> {
    let stem = match filename.rfind('.') {
        Some(0) | None => filename,
        Some(pos) => &filename[..pos],
    };

    let name = stem.to_lowercase();
    if is_valid_project_name(&name) {
        Some(name)
    } else {
        None
    }
}

/// Whether `name` can be used as a single directory under the projects root
pub fn is_valid_project_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

/// Convert an archive entry path into a relative filesystem path
///
/// Returns `None` for absolute paths and for paths with `..` components.
pub fn relative_entry_path(entry_path: &str) -> Option<PathBuf> {
    let trimmed = entry_path.trim_end_matches('/');
    if trimmed.is_empty() || trimmed.contains('\0') {
        return None;
    }

    let mut relative = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if relative.as_os_str().is_empty() {
        None
    } else {
        Some(relative)
    }
}
