//! Request handlers for the Bundleyard API
//!
//! This module contains handler functions that process API requests
//! and interact with the ProjectManager.

use std::sync::Arc;
use crate::api::{Endpoint, Method, Request, Response, UploadRequest, UploadResponse};
use crate::ProjectManager;

/// Handle an API request and return a response
pub async fn handle_request(
    request: Request,
    manager: Arc<ProjectManager>,
) -> Response {
    let endpoint = match request.parse_endpoint() {
        Ok(ep) => ep,
        Err(err) => return Response::bad_request(err.message),
    };

    match (&request.method, &endpoint) {
        (Method::Get, Endpoint::Projects) => list_projects(manager).await,
        (Method::Get, Endpoint::Project(name)) => get_project(manager, name).await,
        (Method::Post, Endpoint::UploadProjects) => {
            match serde_json::from_value::<UploadRequest>(request.body) {
                Ok(upload_req) => upload_projects(manager, upload_req).await,
                Err(err) => Response::bad_request(format!("Invalid request body: {}", err)),
            }
        }
        _ => Response::bad_request(format!(
            "Method {:?} not supported for endpoint {}",
            request.method, request.endpoint
        )),
    }
}

/// List all projects
async fn list_projects(manager: Arc<ProjectManager>) -> Response {
    match manager.list_projects().await {
        Ok(projects) => match Response::success(projects) {
            Ok(resp) => resp,
            Err(_) => Response::internal_error("Failed to serialize project list"),
        },
        Err(err) => err.into(),
    }
}

/// Get information about a specific project
async fn get_project(manager: Arc<ProjectManager>, name: &str) -> Response {
    match manager.project_detail(name).await {
        Ok(detail) => match Response::success(detail) {
            Ok(resp) => resp,
            Err(_) => Response::internal_error("Failed to serialize project detail"),
        },
        Err(err) => err.into(),
    }
}

/// Upload a batch of zipped projects
///
/// Rejected archives are reported per archive; the request itself succeeds
/// as long as the body was well formed.
async fn upload_projects(manager: Arc<ProjectManager>, request: UploadRequest) -> Response {
    let payloads = match request.into_payloads() {
        Ok(payloads) => payloads,
        Err(err) => return Response::bad_request(err.message),
    };

    let report = manager.ingest(payloads).await;

    match Response::success(UploadResponse::from(&report)) {
        Ok(resp) => resp,
        Err(_) => Response::internal_error("Failed to serialize upload result"),
    }
}
