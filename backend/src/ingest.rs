//! Bundle ingestion
//!
//! Turns uploaded zip archives into project directories under the projects
//! root. Each archive in a batch is handled on its own: a rejected archive is
//! reported and never stops its siblings.
//!
//! Archives are processed in two passes. The first pass lists every entry and
//! streams file entries into a sink so CRC failures surface before anything
//! touches the disk. The second pass streams entry bodies straight into their
//! target files.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;
use zip::ZipArchive;
use zip::result::ZipError;

use crate::bundle::{ArchiveEntry, ProjectBundle, UploadPayload, project_name_from_filename, relative_entry_path};

/// Chunk size used when streaming entry bodies to disk
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Ingestor settings
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Directory under which every project is materialized
    pub projects_root: PathBuf,
    /// Largest accepted archive, in bytes
    pub max_payload_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            projects_root: PathBuf::from("/usr/local/appjail-projects"),
            max_payload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Reasons an uploaded archive is rejected
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Bad ZIP file or invalid format: '{archive}' ({reason})")]
    MalformedArchive { archive: String, reason: String },

    #[error("ZIP file '{archive}' is {size} bytes, larger than the {limit} bytes allowed")]
    ArchiveTooLarge { archive: String, size: u64, limit: u64 },

    #[error("Bad ZIP file or invalid format: entry '{entry}' of '{archive}' is corrupt ({reason})")]
    CorruptEntry { archive: String, entry: String, reason: String },

    #[error("'appjail-director.yml' and 'info.json' are required but the ZIP file '{archive}' lacks {}", .missing.join(", "))]
    IncompleteBundle { archive: String, missing: Vec<String> },

    #[error("Bad ZIP file or invalid format: entry '{entry}' of '{archive}' points outside the project directory")]
    UnsafeEntryPath { archive: String, entry: String },

    #[error("Cannot derive a project name from '{archive}'")]
    InvalidProjectName { archive: String },

    #[error("Filesystem error at {}: {source}", .path.display())]
    Filesystem { path: PathBuf, source: io::Error },

    #[error("Ingestion worker failed: {0}")]
    TaskFailed(String),
}

impl IngestError {
    /// Whether the archive itself is unreadable, as opposed to readable but unusable
    pub fn is_bad_format(&self) -> bool {
        matches!(
            self,
            IngestError::MalformedArchive { .. }
                | IngestError::ArchiveTooLarge { .. }
                | IngestError::CorruptEntry { .. }
                | IngestError::UnsafeEntryPath { .. }
        )
    }

    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            IngestError::MalformedArchive { .. } => "MALFORMED_ARCHIVE",
            IngestError::ArchiveTooLarge { .. } => "ARCHIVE_TOO_LARGE",
            IngestError::CorruptEntry { .. } => "CORRUPT_ENTRY",
            IngestError::IncompleteBundle { .. } => "INCOMPLETE_BUNDLE",
            IngestError::UnsafeEntryPath { .. } => "UNSAFE_ENTRY_PATH",
            IngestError::InvalidProjectName { .. } => "INVALID_PROJECT_NAME",
            IngestError::Filesystem { .. } => "FILESYSTEM_ERROR",
            IngestError::TaskFailed(_) => "INTERNAL_ERROR",
        }
    }

    fn filesystem(path: &Path) -> impl FnOnce(io::Error) -> IngestError + '_ {
        move |source| IngestError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A project written to disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestedProject {
    pub archive_name: String,
    pub project_name: String,
    pub project_dir: PathBuf,
    pub files_written: usize,
    pub directories_created: usize,
    /// SHA-256 of the uploaded archive, hex encoded
    pub sha256: String,
}

/// Result of one archive in a batch
#[derive(Debug)]
pub struct PayloadOutcome {
    pub archive_name: String,
    pub result: Result<IngestedProject, IngestError>,
}

/// Result of a whole batch, one outcome per payload in input order
#[derive(Debug)]
pub struct IngestReport {
    pub batch_id: Uuid,
    pub outcomes: Vec<PayloadOutcome>,
}

impl IngestReport {
    /// At least one archive was materialized; callers refresh their view on this
    pub fn completed(&self) -> bool {
        self.outcomes.iter().any(|outcome| outcome.result.is_ok())
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &IngestedProject> {
        self.outcomes.iter().filter_map(|outcome| outcome.result.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &IngestError)> {
        self.outcomes.iter().filter_map(|outcome| {
            outcome
                .result
                .as_ref()
                .err()
                .map(|err| (outcome.archive_name.as_str(), err))
        })
    }
}

/// Archive that passed the integrity pass
struct ScannedArchive {
    archive: ZipArchive<Cursor<Vec<u8>>>,
    entries: Vec<ArchiveEntry>,
    sha256: String,
}

/// Validates uploaded archives and materializes them as projects
pub struct BundleIngestor {
    config: IngestConfig,
    /// Serializes writers of the same project (project name -> lock)
    project_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl BundleIngestor {
    pub fn new(config: IngestConfig) -> Self {
        Self {
            config,
            project_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Ingest a batch of uploaded archives
    ///
    /// Every payload is processed, in order, regardless of how earlier ones
    /// fared.
    pub async fn ingest(&self, payloads: Vec<UploadPayload>) -> IngestReport {
        let batch_id = Uuid::new_v4();
        let span = info_span!("ingest_batch", %batch_id, payloads = payloads.len());

        async move {
            let mut outcomes = Vec::with_capacity(payloads.len());

            for payload in payloads {
                let archive_name = payload.original_filename.clone();
                let result = self.ingest_one(payload).await;

                match &result {
                    Ok(project) => info!(
                        archive = %archive_name,
                        project = %project.project_name,
                        files = project.files_written,
                        directories = project.directories_created,
                        sha256 = %project.sha256,
                        "Project materialized"
                    ),
                    Err(e) => warn!(archive = %archive_name, code = e.code(), error = %e, "Archive rejected"),
                }

                outcomes.push(PayloadOutcome { archive_name, result });
            }

            IngestReport { batch_id, outcomes }
        }
        .instrument(span)
        .await
    }

    async fn ingest_one(&self, payload: UploadPayload) -> Result<IngestedProject, IngestError> {
        let UploadPayload { original_filename: archive_name, raw_bytes } = payload;

        let size = raw_bytes.len() as u64;
        if size > self.config.max_payload_bytes {
            return Err(IngestError::ArchiveTooLarge {
                archive: archive_name,
                size,
                limit: self.config.max_payload_bytes,
            });
        }

        let name = archive_name.clone();
        let scanned = tokio::task::spawn_blocking(move || scan_archive(&name, raw_bytes))
            .await
            .map_err(|e| IngestError::TaskFailed(format!("Join error: {}", e)))??;

        let project_name = project_name_from_filename(&archive_name).ok_or_else(|| {
            IngestError::InvalidProjectName { archive: archive_name.clone() }
        })?;

        let mut bundle = ProjectBundle::new(project_name.clone());
        for entry in scanned.entries {
            bundle.insert(entry);
        }

        let missing = bundle.missing_manifests();
        if !missing.is_empty() {
            return Err(IngestError::IncompleteBundle { archive: archive_name, missing });
        }

        let guard = self.project_lock(&project_name).await.lock_owned().await;

        let projects_root = self.config.projects_root.clone();
        let name = archive_name.clone();
        let mut archive = scanned.archive;
        let written = tokio::task::spawn_blocking(move || {
            materialize(&name, &mut archive, &bundle, &projects_root)
        })
        .await;

        drop(guard);
        self.release_project_lock(&project_name).await;

        let (project_dir, files_written, directories_created) =
            written.map_err(|e| IngestError::TaskFailed(format!("Join error: {}", e)))??;

        Ok(IngestedProject {
            archive_name,
            project_name,
            project_dir,
            files_written,
            directories_created,
            sha256: scanned.sha256,
        })
    }

    async fn project_lock(&self, project_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.project_locks.lock().await;
        locks.entry(project_name.to_string()).or_default().clone()
    }

    /// Forget a project's lock once no other upload holds or awaits it
    async fn release_project_lock(&self, project_name: &str) {
        let mut locks = self.project_locks.lock().await;
        if locks.get(project_name).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(project_name);
        }
    }
}

/// First pass: open the archive, list its entries and verify every file body
fn scan_archive(archive_name: &str, raw_bytes: Vec<u8>) -> Result<ScannedArchive, IngestError> {
    let sha256 = hex::encode(Sha256::digest(&raw_bytes));

    let mut archive = ZipArchive::new(Cursor::new(raw_bytes)).map_err(|e| IngestError::MalformedArchive {
        archive: archive_name.to_string(),
        reason: e.to_string(),
    })?;

    let mut entries = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut file = archive
            .by_index(index)
            .map_err(|e| entry_error(archive_name, &format!("#{}", index), e))?;

        let path = file.name().to_string();
        let is_directory = file.is_dir();

        if relative_entry_path(&path).is_none() {
            return Err(IngestError::UnsafeEntryPath {
                archive: archive_name.to_string(),
                entry: path,
            });
        }

        if !is_directory {
            io::copy(&mut file, &mut io::sink()).map_err(|e| IngestError::CorruptEntry {
                archive: archive_name.to_string(),
                entry: path.clone(),
                reason: e.to_string(),
            })?;
        }

        entries.push(ArchiveEntry {
            path,
            index,
            is_directory,
            size: if is_directory { 0 } else { file.size() },
        });
    }

    Ok(ScannedArchive { archive, entries, sha256 })
}

/// Second pass: write the bundle under `<projects_root>/<project_name>/`
///
/// Returns the project directory and the number of files and directory
/// entries written.
fn materialize(
    archive_name: &str,
    archive: &mut ZipArchive<Cursor<Vec<u8>>>,
    bundle: &ProjectBundle,
    projects_root: &Path,
) -> Result<(PathBuf, usize, usize), IngestError> {
    let project_dir = projects_root.join(bundle.project_name());
    fs::create_dir_all(&project_dir).map_err(IngestError::filesystem(&project_dir))?;

    let mut files_written = 0;
    let mut directories_created = 0;

    for entry in bundle.entries() {
        let relative = relative_entry_path(&entry.path).ok_or_else(|| IngestError::UnsafeEntryPath {
            archive: archive_name.to_string(),
            entry: entry.path.clone(),
        })?;
        let target = project_dir.join(relative);

        if entry.is_directory {
            fs::create_dir_all(&target).map_err(IngestError::filesystem(&target))?;
            directories_created += 1;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(IngestError::filesystem(parent))?;
        }

        let mut file = archive
            .by_index(entry.index)
            .map_err(|e| entry_error(archive_name, &entry.path, e))?;
        let mut output = File::create(&target).map_err(IngestError::filesystem(&target))?;
        let written = copy_entry(archive_name, &entry.path, &mut file, &mut output, &target)?;

        debug!(entry = %entry.path, bytes = written, "Wrote project file");
        files_written += 1;
    }

    Ok((project_dir, files_written, directories_created))
}

/// Stream an entry body into `output`, telling read failures from write failures apart
fn copy_entry(
    archive_name: &str,
    entry_path: &str,
    input: &mut impl Read,
    output: &mut File,
    target: &Path,
) -> Result<u64, IngestError> {
    let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let read = match input.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(IngestError::CorruptEntry {
                    archive: archive_name.to_string(),
                    entry: entry_path.to_string(),
                    reason: e.to_string(),
                });
            }
        };

        output
            .write_all(&buffer[..read])
            .map_err(IngestError::filesystem(target))?;
        total += read as u64;
    }

    output.flush().map_err(IngestError::filesystem(target))?;

    Ok(total)
}

fn entry_error(archive_name: &str, entry: &str, err: ZipError) -> IngestError {
    match err {
        ZipError::UnsupportedArchive(reason) => IngestError::MalformedArchive {
            archive: archive_name.to_string(),
            reason: reason.to_string(),
        },
        other => IngestError::CorruptEntry {
            archive: archive_name.to_string(),
            entry: entry.to_string(),
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use zip::write::SimpleFileOptions;
    use zip::{CompressionMethod, ZipWriter};

    fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
            for (name, content) in entries {
                match content {
                    Some(bytes) => {
                        writer.start_file(*name, options).unwrap();
                        writer.write_all(bytes).unwrap();
                    }
                    None => {
                        writer.add_directory(*name, options).unwrap();
                    }
                }
            }
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    fn valid_bundle() -> Vec<u8> {
        build_zip(&[
            ("appjail-director.yml", Some(b"options:\n  - virtualnet: ':<random> default'\n")),
            ("info.json", Some(b"{\"name\": \"web\"}")),
            ("files/", None),
            ("files/index.html", Some(b"<h1>hello</h1>")),
        ])
    }

    fn ingestor(root: &Path) -> BundleIngestor {
        BundleIngestor::new(IngestConfig {
            projects_root: root.to_path_buf(),
            max_payload_bytes: 1024 * 1024,
        })
    }

    #[test]
    fn test_default_config() {
        let config = IngestConfig::default();
        assert_eq!(config.max_payload_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn test_scan_lists_entries() {
        let scanned = scan_archive("web.zip", valid_bundle()).unwrap();

        assert_eq!(scanned.entries.len(), 4);
        assert_eq!(scanned.sha256.len(), 64);

        let dir = scanned.entries.iter().find(|e| e.path == "files/").unwrap();
        assert!(dir.is_directory);
        assert_eq!(dir.size, 0);

        let index = scanned.entries.iter().find(|e| e.path == "files/index.html").unwrap();
        assert!(!index.is_directory);
        assert_eq!(index.size, 14);
    }

    #[test]
    fn test_scan_rejects_garbage() {
        let result = scan_archive("junk.zip", b"definitely not a zip archive".to_vec());
        assert!(matches!(result, Err(IngestError::MalformedArchive { .. })));
    }

    #[test]
    fn test_scan_rejects_empty_payload() {
        let result = scan_archive("empty.zip", Vec::new());
        assert!(matches!(result, Err(IngestError::MalformedArchive { .. })));
    }

    #[test]
    fn test_scan_rejects_parent_traversal() {
        let bytes = build_zip(&[
            ("appjail-director.yml", Some(b"x")),
            ("info.json", Some(b"{}")),
            ("../outside.txt", Some(b"escape")),
        ]);

        match scan_archive("evil.zip", bytes) {
            Err(IngestError::UnsafeEntryPath { entry, .. }) => assert_eq!(entry, "../outside.txt"),
            other => panic!("Expected UnsafeEntryPath, got {:?}", other.map(|s| s.entries)),
        }
    }

    #[test]
    fn test_scan_detects_crc_mismatch() {
        let mut bytes = build_zip(&[
            ("appjail-director.yml", Some(b"x")),
            ("info.json", Some(b"{}")),
            ("payload.txt", Some(b"corrupt me please")),
        ]);

        let needle = b"corrupt me please";
        let pos = bytes.windows(needle.len()).position(|w| w == needle).unwrap();
        bytes[pos] ^= 0xff;

        match scan_archive("broken.zip", bytes) {
            Err(IngestError::CorruptEntry { entry, .. }) => assert_eq!(entry, "payload.txt"),
            other => panic!("Expected CorruptEntry, got {:?}", other.map(|s| s.entries)),
        }
    }

    #[test]
    fn test_error_classes() {
        let malformed = IngestError::MalformedArchive {
            archive: "a.zip".into(),
            reason: "bad".into(),
        };
        let incomplete = IngestError::IncompleteBundle {
            archive: "a.zip".into(),
            missing: vec!["info.json".into()],
        };

        assert!(malformed.is_bad_format());
        assert!(!incomplete.is_bad_format());
        assert_eq!(incomplete.code(), "INCOMPLETE_BUNDLE");
        assert!(incomplete.to_string().contains("info.json"));
        assert!(incomplete.to_string().contains("'a.zip'"));
    }

    #[tokio::test]
    async fn test_ingest_valid_bundle() {
        let root = tempfile::tempdir().unwrap();
        let ingestor = ingestor(root.path());

        let report = ingestor
            .ingest(vec![UploadPayload::new("Web.zip", valid_bundle())])
            .await;

        assert!(report.completed());
        let project = report.succeeded().next().unwrap();
        assert_eq!(project.project_name, "web");
        assert_eq!(project.files_written, 3);
        assert_eq!(project.directories_created, 1);

        let project_dir = root.path().join("web");
        assert_eq!(project.project_dir, project_dir);
        assert_eq!(fs::read(project_dir.join("info.json")).unwrap(), b"{\"name\": \"web\"}");
        assert_eq!(fs::read(project_dir.join("files/index.html")).unwrap(), b"<h1>hello</h1>");
    }

    #[tokio::test]
    async fn test_ingest_missing_manifest_writes_nothing() {
        let root = tempfile::tempdir().unwrap();
        let ingestor = ingestor(root.path());
        let bytes = build_zip(&[("info.json", Some(b"{}")), ("README", Some(b"hi"))]);

        let report = ingestor.ingest(vec![UploadPayload::new("partial.zip", bytes)]).await;

        assert!(!report.completed());
        let (archive, err) = report.failed().next().unwrap();
        assert_eq!(archive, "partial.zip");
        match err {
            IngestError::IncompleteBundle { missing, .. } => {
                assert_eq!(missing, &vec!["appjail-director.yml".to_string()]);
            }
            other => panic!("Expected IncompleteBundle, got {:?}", other),
        }
        assert!(!root.path().join("partial").exists());
    }

    #[tokio::test]
    async fn test_ingest_oversized_payload() {
        let root = tempfile::tempdir().unwrap();
        let bytes = valid_bundle();
        let ingestor = BundleIngestor::new(IngestConfig {
            projects_root: root.path().to_path_buf(),
            max_payload_bytes: bytes.len() as u64 - 1,
        });

        let report = ingestor.ingest(vec![UploadPayload::new("web.zip", bytes)]).await;

        let (_, err) = report.failed().next().unwrap();
        assert!(matches!(err, IngestError::ArchiveTooLarge { .. }));
        assert!(err.is_bad_format());
        assert!(!root.path().join("web").exists());
    }

    #[tokio::test]
    async fn test_concurrent_uploads_of_same_project() {
        let root = tempfile::tempdir().unwrap();
        let ingestor = Arc::new(ingestor(root.path()));

        let first = {
            let ingestor = ingestor.clone();
            tokio::spawn(async move { ingestor.ingest(vec![UploadPayload::new("web.zip", valid_bundle())]).await })
        };
        let second = {
            let ingestor = ingestor.clone();
            tokio::spawn(async move { ingestor.ingest(vec![UploadPayload::new("WEB.zip", valid_bundle())]).await })
        };

        assert!(first.await.unwrap().completed());
        assert!(second.await.unwrap().completed());
        assert_eq!(fs::read(root.path().join("web/files/index.html")).unwrap(), b"<h1>hello</h1>");
    }

    #[tokio::test]
    async fn test_project_locks_are_released() {
        let root = tempfile::tempdir().unwrap();
        let ingestor = Arc::new(ingestor(root.path()));

        let uploads: Vec<_> = ["alpha.zip", "beta.zip", "ALPHA.zip", "gamma.zip"]
            .into_iter()
            .map(|name| {
                let ingestor = ingestor.clone();
                tokio::spawn(async move { ingestor.ingest(vec![UploadPayload::new(name, valid_bundle())]).await })
            })
            .collect();

        for upload in uploads {
            assert!(upload.await.unwrap().completed());
        }

        assert!(ingestor.project_locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_held_project_lock_is_kept() {
        let root = tempfile::tempdir().unwrap();
        let ingestor = ingestor(root.path());

        let held = ingestor.project_lock("web").await;
        ingestor.release_project_lock("web").await;
        assert!(ingestor.project_locks.lock().await.contains_key("web"));

        drop(held);
        ingestor.release_project_lock("web").await;
        assert!(ingestor.project_locks.lock().await.is_empty());
    }
}
