//! Bundleyard backend - project bundle service
//!
//! This crate accepts zipped appjail-director projects, validates them and
//! unpacks them under a projects root, serving clients through a unix socket.

pub mod api;
pub mod bundle;
pub mod catalog;
pub mod config;
pub mod handler;
pub mod ingest;
pub mod server;

use crate::bundle::UploadPayload;
use crate::catalog::{ProjectCatalog, ProjectDetail, ProjectError, ProjectSummary};
use crate::config::BundleyardConfig;
use crate::ingest::{BundleIngestor, IngestReport};
use std::path::PathBuf;
use tracing::info;

/// Project manager - owns the ingestor and the catalog over one projects root
pub struct ProjectManager {
    socket_path: PathBuf,
    max_frame_bytes: usize,
    ingestor: BundleIngestor,
    catalog: ProjectCatalog,
}

impl ProjectManager {
    /// Create a project manager from configuration
    pub fn new(config: &BundleyardConfig) -> Self {
        let ingest_config = config.ingest_config();
        let catalog = ProjectCatalog::new(ingest_config.projects_root.clone());

        Self {
            socket_path: PathBuf::from(&config.server.socket_path),
            max_frame_bytes: usize::try_from(config.server.max_frame_bytes).unwrap_or(usize::MAX),
            ingestor: BundleIngestor::new(ingest_config),
            catalog,
        }
    }

    /// Create a project manager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(&BundleyardConfig::default())
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Largest request frame the server accepts
    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }

    /// Get the projects root
    pub fn projects_root(&self) -> &std::path::Path {
        self.catalog.root()
    }

    /// Ingest a batch of uploaded archives
    pub async fn ingest(&self, payloads: Vec<UploadPayload>) -> IngestReport {
        let report = self.ingestor.ingest(payloads).await;

        if report.completed() {
            info!(
                batch_id = %report.batch_id,
                ingested = report.succeeded().count(),
                rejected = report.failed().count(),
                "Upload batch completed"
            );
        }

        report
    }

    /// List all projects
    pub async fn list_projects(&self) -> Result<Vec<ProjectSummary>, ProjectError> {
        let catalog = self.catalog.clone();
        tokio::task::spawn_blocking(move || catalog.list())
            .await
            .map_err(|e| ProjectError::Io(std::io::Error::other(e)))?
    }

    /// Describe a project
    pub async fn project_detail(&self, name: &str) -> Result<ProjectDetail, ProjectError> {
        let catalog = self.catalog.clone();
        let name = name.to_string();
        tokio::task::spawn_blocking(move || catalog.detail(&name))
            .await
            .map_err(|e| ProjectError::Io(std::io::Error::other(e)))?
    }
}

impl Default for ProjectManager {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IngestSection, ServerSection};
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn test_config(root: &std::path::Path) -> BundleyardConfig {
        BundleyardConfig {
            ingest: IngestSection {
                projects_root: root.to_string_lossy().into_owned(),
                max_payload_bytes: 1024 * 1024,
            },
            server: ServerSection {
                socket_path: "/tmp/bundleyard-test.sock".to_string(),
                max_frame_bytes: 4 * 1024 * 1024,
            },
        }
    }

    fn bundle_zip() -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            let options = SimpleFileOptions::default();
            writer.start_file("appjail-director.yml", options).unwrap();
            writer.write_all(b"services: {}\n").unwrap();
            writer.start_file("info.json", options).unwrap();
            writer.write_all(b"{}").unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }

    #[tokio::test]
    async fn test_manager_default() {
        let manager = ProjectManager::default();
        assert_eq!(manager.socket_path().to_str().unwrap(), "/var/run/bundleyard.sock");
        assert_eq!(manager.projects_root().to_str().unwrap(), "/usr/local/appjail-projects");
        assert_eq!(manager.max_frame_bytes(), 64 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_manager_from_config() {
        let root = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(&test_config(root.path()));

        assert_eq!(manager.socket_path().to_str().unwrap(), "/tmp/bundleyard-test.sock");
        assert_eq!(manager.projects_root(), root.path());
    }

    #[tokio::test]
    async fn test_ingest_then_list() {
        let root = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(&test_config(root.path()));

        assert!(manager.list_projects().await.unwrap().is_empty());

        let report = manager
            .ingest(vec![UploadPayload::new("Api.zip", bundle_zip())])
            .await;
        assert!(report.completed());

        let projects = manager.list_projects().await.unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].name, "api");
        assert!(projects[0].complete);

        let detail = manager.project_detail("api").await.unwrap();
        assert_eq!(detail.files, vec!["appjail-director.yml".to_string(), "info.json".to_string()]);
    }

    #[tokio::test]
    async fn test_project_detail_not_found() {
        let root = tempfile::tempdir().unwrap();
        let manager = ProjectManager::new(&test_config(root.path()));

        let result = manager.project_detail("missing").await;
        assert!(matches!(result, Err(ProjectError::NotFound(_))));
    }
}
