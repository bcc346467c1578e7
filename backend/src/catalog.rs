//! Read-only view of the projects root
//!
//! Lists materialized projects and their files so a front end can refresh
//! after an upload.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use crate::bundle::{MANIFEST_FILES, is_valid_project_name};

/// Project lookup errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Project '{0}' not found")]
    NotFound(String),

    #[error("Invalid project name '{0}'")]
    InvalidName(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to walk project directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// One project directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub name: String,
    /// Both manifest files are present
    pub complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// A project directory and everything in it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectDetail {
    pub name: String,
    pub complete: bool,
    /// Paths relative to the project directory; directories end with '/'
    pub files: Vec<String>,
}

/// Projects stored under one root directory
#[derive(Debug, Clone)]
pub struct ProjectCatalog {
    root: PathBuf,
}

impl ProjectCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List every project, sorted by name
    ///
    /// A projects root that does not exist yet is an empty catalog.
    pub fn list(&self) -> Result<Vec<ProjectSummary>, ProjectError> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut projects = Vec::new();
        for entry in read_dir {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .ok()
                .map(DateTime::<Utc>::from);

            projects.push(ProjectSummary {
                complete: has_manifests(&entry.path()),
                name,
                modified,
            });
        }

        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    /// Describe a single project
    pub fn detail(&self, name: &str) -> Result<ProjectDetail, ProjectError> {
        if !is_valid_project_name(name) {
            return Err(ProjectError::InvalidName(name.to_string()));
        }

        let project_dir = self.root.join(name);
        if !project_dir.is_dir() {
            return Err(ProjectError::NotFound(name.to_string()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&project_dir).min_depth(1).sort_by_file_name() {
            let entry = entry?;
            let Ok(relative) = entry.path().strip_prefix(&project_dir) else {
                continue;
            };

            let mut path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if entry.file_type().is_dir() {
                path.push('/');
            }
            files.push(path);
        }

        Ok(ProjectDetail {
            name: name.to_string(),
            complete: has_manifests(&project_dir),
            files,
        })
    }
}

fn has_manifests(project_dir: &Path) -> bool {
    MANIFEST_FILES
        .iter()
        .all(|manifest| project_dir.join(manifest).is_file())
}
