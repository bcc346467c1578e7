use clap::{Parser, Subcommand};
use futures::{SinkExt, StreamExt};
use bundleyard_backend::api::{
    ApiError, Endpoint, Request, Response, UploadFile, UploadOutcome, UploadRequest, UploadResponse,
};
use bundleyard_backend::server::{DEFAULT_MAX_FRAME_BYTES, JsonCodec};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

const SOCKET_PATH: &str = "/var/run/bundleyard.sock";

#[derive(Parser)]
#[command(name = "bundleyard")]
#[command(about = "Bundleyard - upload appjail-director projects", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the backend socket
    #[arg(long, global = true, default_value = SOCKET_PATH)]
    socket: PathBuf,

    /// Largest request frame the backend accepts, in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    max_frame_bytes: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload zipped projects
    Upload {
        /// ZIP files, each holding appjail-director.yml and info.json
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// List projects
    Projects,

    /// Show the files of a project
    Project {
        /// Project name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let backend = Backend {
        socket: cli.socket,
        max_frame_bytes: cli.max_frame_bytes,
    };

    let result = match cli.command {
        Commands::Upload { files } => upload(&backend, files).await,
        Commands::Projects => list_projects(&backend).await,
        Commands::Project { name } => show_project(&backend, name).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Where the backend listens and how large its frames may be
struct Backend {
    socket: PathBuf,
    max_frame_bytes: usize,
}

/// Connect to the Unix socket
async fn connect_to_socket(backend: &Backend) -> Result<Framed<UnixStream, JsonCodec>, String> {
    let stream = UnixStream::connect(&backend.socket)
        .await
        .map_err(|e| format!("Failed to connect to backend: {}", e))?;

    Ok(Framed::new(stream, JsonCodec::new(backend.max_frame_bytes)))
}

/// Send a JSON request and get the response
async fn send_request(backend: &Backend, request: Request) -> Result<Value, String> {
    let mut framed = connect_to_socket(backend).await?;

    let request_json = serde_json::to_value(&request)
        .map_err(|e| format!("Failed to serialize request: {}", e))?;

    framed
        .send(request_json)
        .await
        .map_err(|e| format!("Failed to send request: {}", e))?;

    let response_json = framed
        .next()
        .await
        .ok_or("No response from backend")?
        .map_err(|e| format!("Failed to read response: {}", e))?;

    let response: Response = serde_json::from_value(response_json)
        .map_err(|e| format!("Failed to parse response: {}", e))?;

    if response.is_success() {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        let error = response.error.unwrap_or(ApiError {
            code: "UNKNOWN".to_string(),
            message: "Unknown error".to_string(),
        });
        Err(format!("{}: {}", error.code, error.message))
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Upload a batch of archives
///
/// Non-ZIP paths are skipped with a warning. The batch is split into as many
/// requests as the frame limit requires, and each archive's result is printed
/// whatever happened to the others.
async fn upload(backend: &Backend, files: Vec<PathBuf>) -> Result<(), String> {
    let files = select_zip_files(files);
    if files.is_empty() {
        return Err("No ZIP files to upload".to_string());
    }

    let mut payloads = Vec::with_capacity(files.len());

    for path in &files {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| format!("Invalid path: {}", path.display()))?;

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;

        payloads.push(UploadFile::from_bytes(filename, &bytes));
    }

    let plan = UploadRequest { payloads }
        .split_to_fit(backend.max_frame_bytes)
        .map_err(|e| format!("Failed to prepare upload: {}", e))?;

    println!("Uploading {} file(s)...", files.len());

    for file in &plan.oversized {
        println!("{}: too large to send to the backend", file.filename);
    }

    let mut completed = false;

    for batch in plan.requests {
        let archives: Vec<String> = batch.payloads.iter().map(|f| f.filename.clone()).collect();

        match send_upload(backend, batch).await {
            Ok(upload) => {
                completed |= upload.completed;
                upload.outcomes.iter().for_each(print_outcome);
            }
            Err(e) => {
                for archive in &archives {
                    println!("{}: {}", archive, e);
                }
            }
        }
    }

    if completed {
        Ok(())
    } else {
        Err("No project was uploaded".to_string())
    }
}

async fn send_upload(backend: &Backend, batch: UploadRequest) -> Result<UploadResponse, String> {
    let request = Request::post(Endpoint::UploadProjects, batch).map_err(|e| e.to_string())?;
    let response = send_request(backend, request).await?;

    serde_json::from_value(response).map_err(|e| format!("Failed to parse upload result: {}", e))
}

fn print_outcome(outcome: &UploadOutcome) {
    match (&outcome.project, &outcome.error) {
        (Some(project), _) => println!(
            "{}: ok -> {} ({} files, {} directories)",
            outcome.archive,
            project,
            outcome.files_written.unwrap_or(0),
            outcome.directories_created.unwrap_or(0)
        ),
        (None, Some(error)) => println!("{}: {}", outcome.archive, error.message),
        (None, None) => println!("{}: no result", outcome.archive),
    }
}

/// List projects
async fn list_projects(backend: &Backend) -> Result<(), String> {
    let response = send_request(backend, Request::get(Endpoint::Projects)).await?;

    let projects = response.as_array().cloned().unwrap_or_default();
    if projects.is_empty() {
        println!("There are currently no projects uploaded...");
        return Ok(());
    }

    println!("{:<30} {:<10} {}", "NAME", "COMPLETE", "MODIFIED");

    for project in projects {
        let name = project.get("name").and_then(|v| v.as_str()).unwrap_or("<unknown>");
        let complete = project.get("complete").and_then(|v| v.as_bool()).unwrap_or(false);
        let modified = project
            .get("modified")
            .and_then(|v| v.as_str())
            .map(format_timestamp)
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{:<30} {:<10} {}",
            name,
            if complete { "yes" } else { "no" },
            modified
        );
    }

    Ok(())
}

/// Show the files of a project
async fn show_project(backend: &Backend, name: String) -> Result<(), String> {
    let response = send_request(backend, Request::get(Endpoint::Project(name))).await?;

    let name = response.get("name").and_then(|v| v.as_str()).unwrap_or("<unknown>");
    let complete = response.get("complete").and_then(|v| v.as_bool()).unwrap_or(false);

    println!("Project:  {}", name);
    println!("Complete: {}", if complete { "yes" } else { "no" });

    if let Some(files) = response.get("files").and_then(|v| v.as_array()) {
        for file in files.iter().filter_map(|f| f.as_str()) {
            println!("  {}", file);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Keep the ZIP files, warning about every other path
fn select_zip_files(files: Vec<PathBuf>) -> Vec<PathBuf> {
    files
        .into_iter()
        .filter(|path| {
            let keep = is_zip_path(path);
            if !keep {
                eprintln!(
                    "Warning: can't upload '{}', please be sure to choose only ZIP files",
                    path.display()
                );
            }
            keep
        })
        .collect()
}

/// Only `.zip` files are accepted for upload
fn is_zip_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Format an RFC 3339 timestamp for display
fn format_timestamp(ts: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_zip_path() {
        assert!(is_zip_path(Path::new("project.zip")));
        assert!(is_zip_path(Path::new("/tmp/Project.ZIP")));
        assert!(!is_zip_path(Path::new("project.tar.gz")));
        assert!(!is_zip_path(Path::new("zip")));
    }

    #[test]
    fn test_format_timestamp() {
        let formatted = format_timestamp("2024-05-01T12:30:00Z");
        assert_eq!(formatted.len(), 19);
        assert_eq!(format_timestamp("not a date"), "not a date");
    }

    #[test]
    fn test_cli_parses_upload() {
        let cli = Cli::try_parse_from(["bundleyard", "upload", "a.zip", "b.zip"]).unwrap();
        assert_eq!(cli.socket, PathBuf::from(SOCKET_PATH));
        match cli.command {
            Commands::Upload { files } => assert_eq!(files.len(), 2),
            _ => panic!("Expected upload command"),
        }
    }

    #[test]
    fn test_cli_requires_files() {
        assert!(Cli::try_parse_from(["bundleyard", "upload"]).is_err());
    }

    fn backend(dir: &Path) -> Backend {
        Backend {
            socket: dir.join("missing.sock"),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    #[test]
    fn test_cli_max_frame_default() {
        let cli = Cli::try_parse_from(["bundleyard", "projects"]).unwrap();
        assert_eq!(cli.max_frame_bytes, DEFAULT_MAX_FRAME_BYTES);

        let cli = Cli::try_parse_from(["bundleyard", "upload", "--max-frame-bytes", "1024", "a.zip"]).unwrap();
        assert_eq!(cli.max_frame_bytes, 1024);
    }

    #[test]
    fn test_select_zip_files_skips_others() {
        let kept = select_zip_files(vec![
            PathBuf::from("web.zip"),
            PathBuf::from("notes.txt"),
            PathBuf::from("db.ZIP"),
        ]);

        assert_eq!(kept, vec![PathBuf::from("web.zip"), PathBuf::from("db.ZIP")]);
    }

    #[tokio::test]
    async fn test_upload_without_zip_files() {
        let dir = tempfile::tempdir().unwrap();

        let err = upload(&backend(dir.path()), vec![PathBuf::from("notes.txt")])
            .await
            .unwrap_err();
        assert_eq!(err, "No ZIP files to upload");
    }

    #[tokio::test]
    async fn test_upload_sends_remaining_zip_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("web.zip");
        std::fs::write(&archive, b"PK\x05\x06").unwrap();

        // The zip is still sent; the missing backend is what fails
        let err = upload(&backend(dir.path()), vec![PathBuf::from("notes.txt"), archive])
            .await
            .unwrap_err();
        assert_eq!(err, "No project was uploaded");
    }
}
