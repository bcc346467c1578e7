//! API protocol types for Bundleyard socket communication
//!
//! This module defines the REST-like JSON-over-Unix-socket protocol used for
//! communicating with the Bundleyard backend.

use crate::bundle::UploadPayload;
use crate::catalog::ProjectError;
use crate::ingest::{IngestError, IngestReport, PayloadOutcome};
use serde::{Deserialize, Serialize};

/// HTTP-like methods for API requests
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Create a resource
    Post,
    /// Retrieve a resource
    Get,
}

/// API endpoints for project management
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Endpoint {
    /// List all projects: GET /projects
    Projects,
    /// Get specific project: GET /projects/{name}
    Project(String),
    /// Upload zipped projects: POST /projects/upload
    UploadProjects,
}

impl Endpoint {
    /// Get the endpoint path as a string
    pub fn path(&self) -> String {
        match self {
            Endpoint::Projects => "projects".to_string(),
            Endpoint::Project(name) => format!("projects/{}", name),
            Endpoint::UploadProjects => "projects/upload".to_string(),
        }
    }
}

/// HTTP-like status codes for API responses
pub type StatusCode = u16;

/// Common status codes
pub mod status {
    pub const OK: u16 = 200;
    pub const BAD_REQUEST: u16 = 400;
    pub const NOT_FOUND: u16 = 404;
    pub const INTERNAL_SERVER_ERROR: u16 = 500;
}

/// API request with REST-like method and endpoint
#[derive(Debug, Deserialize, Serialize)]
pub struct Request {
    /// HTTP-like method (GET, POST)
    pub method: Method,

    /// API endpoint path
    pub endpoint: String,

    /// Optional request body (as JSON value)
    #[serde(default)]
    pub body: serde_json::Value,
}

impl Request {
    /// Create a new request
    pub fn new(method: Method, endpoint: Endpoint, body: serde_json::Value) -> Self {
        Self {
            method,
            endpoint: endpoint.path(),
            body,
        }
    }

    /// Create a GET request
    pub fn get(endpoint: Endpoint) -> Self {
        Self::new(Method::Get, endpoint, serde_json::Value::Null)
    }

    /// Create a POST request with a body
    pub fn post(endpoint: Endpoint, body: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            Method::Post,
            endpoint,
            serde_json::to_value(&body)?,
        ))
    }

    /// Parse the endpoint string into an Endpoint enum
    pub fn parse_endpoint(&self) -> Result<Endpoint, ApiError> {
        let parts: Vec<&str> = self.endpoint.split('/').collect();

        match parts.as_slice() {
            ["projects"] => Ok(Endpoint::Projects),
            ["projects", "upload"] if self.method == Method::Post => Ok(Endpoint::UploadProjects),
            ["projects", name] if self.method == Method::Get => Ok(Endpoint::Project(name.to_string())),
            _ => Err(ApiError::BadRequest(format!("Unknown endpoint: {}", self.endpoint))),
        }
    }
}

/// API response
#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    /// HTTP-like status code
    pub status: StatusCode,

    /// Response data (on success)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error information (on failure)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl Response {
    /// Create a success response with data
    pub fn ok(status: StatusCode, data: impl Serialize) -> Result<Self, serde_json::Error> {
        Ok(Self {
            status,
            data: Some(serde_json::to_value(data)?),
            error: None,
        })
    }

    /// Create a 200 OK response with data
    pub fn success(data: impl Serialize) -> Result<Self, serde_json::Error> {
        Self::ok(status::OK, data)
    }

    /// Create an error response
    pub fn error(status: StatusCode, error: ApiError) -> Self {
        Self {
            status,
            data: None,
            error: Some(error),
        }
    }

    /// Create a 400 Bad Request error response
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::error(status::BAD_REQUEST, ApiError::BadRequest(message.into()))
    }

    /// Create a 404 Not Found error response
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::error(
            status::NOT_FOUND,
            ApiError::NotFound(resource.into()),
        )
    }

    /// Create a 500 Internal Server Error response
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::error(
            status::INTERNAL_SERVER_ERROR,
            ApiError::Internal(message.into()),
        )
    }

    /// Check if the response indicates success
    pub fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

/// API error information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code (e.g., "INCOMPLETE_BUNDLE")
    pub code: String,

    /// Human-readable error message
    pub message: String,
}

impl ApiError {
    /// Create a new API error
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Bad request error (400)
    #[allow(non_snake_case)]
    pub fn BadRequest(message: String) -> Self {
        Self::new("BAD_REQUEST", message)
    }

    /// Not found error (404)
    #[allow(non_snake_case)]
    pub fn NotFound(resource: String) -> Self {
        Self::new("NOT_FOUND", format!("Resource not found: {}", resource))
    }

    /// Internal server error (500)
    #[allow(non_snake_case)]
    pub fn Internal(message: String) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Convert IngestError to ApiError, keeping the ingestor's error code
impl From<&IngestError> for ApiError {
    fn from(err: &IngestError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// Convert ProjectError to a status code and ApiError
impl From<ProjectError> for Response {
    fn from(err: ProjectError) -> Self {
        match err {
            ProjectError::NotFound(name) => Response::not_found(format!("Project '{}'", name)),
            ProjectError::InvalidName(_) => Response::bad_request(err.to_string()),
            ProjectError::Io(_) | ProjectError::Walk(_) => Response::internal_error(err.to_string()),
        }
    }
}

/// One archive in an upload request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadFile {
    /// Original filename, used to derive the project name
    pub filename: String,

    /// Archive bytes, hex encoded
    pub content_hex: String,
}

impl UploadFile {
    /// Encode raw archive bytes for transport
    pub fn from_bytes(filename: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            filename: filename.into(),
            content_hex: hex::encode(bytes),
        }
    }
}

/// Request body for uploading projects
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UploadRequest {
    pub payloads: Vec<UploadFile>,
}

impl UploadRequest {
    /// Validate the request and decode it into ingestor payloads
    pub fn into_payloads(self) -> Result<Vec<UploadPayload>, ApiError> {
        if self.payloads.is_empty() {
            return Err(ApiError::BadRequest("No files to upload".into()));
        }

        self.payloads
            .into_iter()
            .map(|file| {
                if file.filename.is_empty() {
                    return Err(ApiError::BadRequest("Upload filename cannot be empty".into()));
                }

                let bytes = hex::decode(&file.content_hex).map_err(|e| {
                    ApiError::BadRequest(format!("Invalid content for '{}': {}", file.filename, e))
                })?;

                Ok(UploadPayload::new(file.filename, bytes))
            })
            .collect()
    }
}

/// Upload requests sized to fit the transport frame
#[derive(Debug, Default)]
pub struct UploadPlan {
    /// Requests to send, in order, each within the frame limit
    pub requests: Vec<UploadRequest>,

    /// Files that cannot fit a frame even when sent alone
    pub oversized: Vec<UploadFile>,
}

impl UploadRequest {
    /// Split the batch so every framed upload request stays within `max_frame_bytes`
    ///
    /// File order is kept. Each file lands in exactly one request unless it
    /// is too large to ever be sent.
    pub fn split_to_fit(self, max_frame_bytes: usize) -> Result<UploadPlan, serde_json::Error> {
        let empty = Request::post(Endpoint::UploadProjects, UploadRequest { payloads: Vec::new() })?;
        let envelope = serde_json::to_vec(&empty)?.len();

        let mut plan = UploadPlan::default();
        let mut current: Vec<UploadFile> = Vec::new();
        let mut current_size = envelope;

        for file in self.payloads {
            let size = serde_json::to_vec(&file)?.len();

            if envelope + size > max_frame_bytes {
                plan.oversized.push(file);
                continue;
            }

            // Files after the first are preceded by a comma
            let added = if current.is_empty() { size } else { size + 1 };
            if current_size + added > max_frame_bytes {
                plan.requests.push(UploadRequest { payloads: std::mem::take(&mut current) });
                current_size = envelope + size;
            } else {
                current_size += added;
            }
            current.push(file);
        }

        if !current.is_empty() {
            plan.requests.push(UploadRequest { payloads: current });
        }

        Ok(plan)
    }
}

/// Per-archive result in an upload response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Original archive filename
    pub archive: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_written: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub directories_created: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

impl From<&PayloadOutcome> for UploadOutcome {
    fn from(outcome: &PayloadOutcome) -> Self {
        match &outcome.result {
            Ok(project) => Self {
                archive: outcome.archive_name.clone(),
                project: Some(project.project_name.clone()),
                files_written: Some(project.files_written),
                directories_created: Some(project.directories_created),
                sha256: Some(project.sha256.clone()),
                error: None,
            },
            Err(err) => Self {
                archive: outcome.archive_name.clone(),
                project: None,
                files_written: None,
                directories_created: None,
                sha256: None,
                error: Some(err.into()),
            },
        }
    }
}

/// Response body for an upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    /// At least one archive was materialized
    pub completed: bool,

    /// One outcome per uploaded archive, in request order
    pub outcomes: Vec<UploadOutcome>,
}

impl From<&IngestReport> for UploadResponse {
    fn from(report: &IngestReport) -> Self {
        Self {
            completed: report.completed(),
            outcomes: report.outcomes.iter().map(UploadOutcome::from).collect(),
        }
    }
}
