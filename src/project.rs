use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::session::{Session, SessionSnapshot};

/// Project file format version.
const PROJECT_VERSION: u32 = 1;

// ── Error type ──────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ProjectError {
    Io(std::io::Error),
    Json(serde_json::Error),
    InvalidProject(String),
}

impl fmt::Display for ProjectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProjectError::Io(e) => write!(f, "I/O error: {e}"),
            ProjectError::Json(e) => write!(f, "JSON error: {e}"),
            ProjectError::InvalidProject(msg) => write!(f, "Invalid project: {msg}"),
        }
    }
}

impl std::error::Error for ProjectError {}

impl From<std::io::Error> for ProjectError {
    fn from(e: std::io::Error) -> Self {
        ProjectError::Io(e)
    }
}

impl From<serde_json::Error> for ProjectError {
    fn from(e: serde_json::Error) -> Self {
        ProjectError::Json(e)
    }
}

// ── JSON envelope ───────────────────────────────────────────────────

#[derive(Serialize, Deserialize)]
struct ProjectFile {
    version: u32,
    name: String,
    session: SessionSnapshot,
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Atomically write bytes to a file using write-to-temp-then-rename.
///
/// 1. Writes data to a `.tmp` sibling file
/// 2. Calls `fsync` to flush to disk
/// 3. Renames the existing file to `.bak` (best-effort)
/// 4. Renames the `.tmp` file to the target path
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ProjectError> {
    // foo.json → foo.json.tmp, foo.json.bak
    let file_name = path.file_name().unwrap_or_default();

    let mut tmp_name = OsString::from(file_name);
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(&tmp_name);

    let mut bak_name = OsString::from(file_name);
    bak_name.push(".bak");
    let bak_path = path.with_file_name(&bak_name);

    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    // Best-effort backup
    if path.exists() {
        let _ = fs::rename(path, &bak_path);
    }

    fs::rename(&tmp_path, path)?;
    Ok(())
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ProjectError> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ProjectError> {
    let data = fs::read_to_string(path)?;
    let value = serde_json::from_str(&data)?;
    Ok(value)
}

// ── Save / Load ─────────────────────────────────────────────────────

/// Save the whole session to one JSON project file.
pub fn save_project(session: &Session, name: &str, path: &Path) -> Result<(), EngineError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    write_json(
        path,
        &ProjectFile {
            version: PROJECT_VERSION,
            name: name.to_string(),
            session: session.snapshot(),
        },
    )?;
    tracing::info!(path = %path.display(), fixtures = session.fixtures().len(), "project saved");
    Ok(())
}

/// Load a project file and rebuild its session. Returns the project name too.
pub fn load_project(path: &Path) -> Result<(String, Session), EngineError> {
    let file: ProjectFile = read_json(path)?;
    if file.version > PROJECT_VERSION {
        return Err(ProjectError::InvalidProject(format!(
            "Project version {} is newer than supported version {}",
            file.version, PROJECT_VERSION
        ))
        .into());
    }
    let session = Session::restore(file.session)?;
    tracing::info!(path = %path.display(), fixtures = session.fixtures().len(), "project loaded");
    Ok((file.name, session))
}
