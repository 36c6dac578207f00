//! Artifact persistence for one run.
//!
//! Constraints: every write is authorized through MCP before the file is
//! created; writes are atomic (temp file + rename); an artifact path is fully
//! determined by (run, category, module, filename) and collisions within a
//! run are rejected.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use firmforge_mcp::{ArtifactType, Mcp, McpError};

use crate::metadata::{canonical_json, ArtifactFormat, ArtifactMetadata};

/// Overwritten pointer to the newest quality report; the only non-append
/// path in a run tree.
pub const QUALITY_REPORT_LATEST: &str = "quality_report_latest.json";

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error(transparent)]
    Permission(#[from] McpError),
    #[error("artifact path collision: {0}")]
    PathCollision(PathBuf),
    #[error("artifact not found: {0}")]
    NotFound(PathBuf),
    #[error("invalid artifact path: {0}")]
    InvalidPath(String),
    #[error("artifact serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("artifact io at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ArtifactError {
    fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Write-time knobs; most callers only set one or two.
#[derive(Clone, Debug)]
pub struct WriteOptions {
    pub module_id: Option<String>,
    pub extension: String,
    pub prompt_version: String,
    /// Stable filename override; timestamped names are generated otherwise.
    pub filename: Option<String>,
    pub extra: Map<String, Value>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            module_id: None,
            extension: "txt".into(),
            prompt_version: "v1".into(),
            filename: None,
            extra: Map::new(),
        }
    }
}

impl WriteOptions {
    pub fn with_module(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

/// Outcome of a successful write.
#[derive(Clone, Debug)]
pub struct ArtifactHandle {
    pub artifact_id: String,
    pub path: PathBuf,
    pub sidecar: PathBuf,
    pub sub_paths: Vec<PathBuf>,
}

/// One row of the artifact listing exposed by the control plane.
#[derive(Clone, Debug, Serialize)]
pub struct ArtifactEntry {
    pub run_id: String,
    pub category: String,
    pub file_path: String,
    pub file_name: String,
    pub size: u64,
    pub updated_at: DateTime<Utc>,
}

/// Non-sidecar file counts per category.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCounts {
    pub architecture: usize,
    pub code: usize,
    pub tests: usize,
    pub reports: usize,
    pub build: usize,
}

/// Typed artifact storage rooted at `output/runs/<run_folder>/`.
pub struct RunStore {
    run_id: String,
    run_dir: PathBuf,
    mcp: Arc<Mcp>,
}

impl RunStore {
    pub fn create(
        output_root: &Path,
        run_id: impl Into<String>,
        run_folder: &str,
        mcp: Arc<Mcp>,
    ) -> Result<Self, ArtifactError> {
        let run_dir = output_root.join("runs").join(run_folder);
        std::fs::create_dir_all(&run_dir).map_err(|e| ArtifactError::io(&run_dir, e))?;
        Ok(Self {
            run_id: run_id.into(),
            run_dir,
            mcp,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn mcp(&self) -> &Arc<Mcp> {
        &self.mcp
    }

    /// Writes a single-file text artifact plus its sidecar and returns the
    /// stable path.
    pub fn write_artifact(
        &self,
        agent_id: &str,
        artifact_type: ArtifactType,
        content: &str,
        options: WriteOptions,
    ) -> Result<ArtifactHandle, ArtifactError> {
        self.write_with_format(agent_id, artifact_type, content, options, ArtifactFormat::Text)
    }

    /// Serializes `value` as canonical JSON before writing.
    pub fn write_json_artifact<T: Serialize>(
        &self,
        agent_id: &str,
        artifact_type: ArtifactType,
        value: &T,
        options: WriteOptions,
    ) -> Result<ArtifactHandle, ArtifactError> {
        let content = canonical_json(value)?;
        let options = WriteOptions {
            extension: "json".into(),
            ..options
        };
        self.write_with_format(agent_id, artifact_type, &content, options, ArtifactFormat::Json)
    }

    fn write_with_format(
        &self,
        agent_id: &str,
        artifact_type: ArtifactType,
        content: &str,
        options: WriteOptions,
        format: ArtifactFormat,
    ) -> Result<ArtifactHandle, ArtifactError> {
        match &options.module_id {
            Some(module_id) => self.mcp.check_write_scoped(agent_id, artifact_type, module_id)?,
            None => self.mcp.check_write(agent_id, artifact_type)?,
        }

        let artifact_id = new_artifact_id();
        let mut dir = self.run_dir.join(artifact_type.as_str());
        if let Some(module_id) = &options.module_id {
            dir = dir.join(module_id);
        }
        let filename = match &options.filename {
            Some(name) => name.clone(),
            None => timestamped_filename(agent_id, &artifact_id, &options.extension),
        };
        let path = dir.join(&filename);
        write_atomic(&path, content.as_bytes(), false)?;

        let metadata = ArtifactMetadata {
            artifact_id: artifact_id.clone(),
            agent_id: agent_id.to_string(),
            artifact_type,
            module_id: options.module_id.clone(),
            prompt_version: options.prompt_version.clone(),
            timestamp: Utc::now(),
            artifact_format: format,
            sub_artifacts: None,
            extra: options.extra.clone(),
        };
        let sidecar = dir.join(format!("{filename}.meta.json"));
        if let Err(err) = self.write_sidecar(&sidecar, &metadata) {
            // Never leave an orphan artifact behind.
            let _ = std::fs::remove_file(&path);
            return Err(err);
        }

        if artifact_type == ArtifactType::Reports {
            self.refresh_latest_pointer(content);
        }

        Ok(ArtifactHandle {
            artifact_id,
            path,
            sidecar,
            sub_paths: Vec::new(),
        })
    }

    /// Writes a module's `.h`/`.c` pair under `module_code/<module_id>/` with
    /// one shared sidecar listing both sub-artifacts.
    pub fn write_modular_code(
        &self,
        agent_id: &str,
        module_id: &str,
        header: &str,
        source: &str,
        options: WriteOptions,
    ) -> Result<ArtifactHandle, ArtifactError> {
        if module_id.is_empty() {
            return Err(ArtifactError::InvalidPath("empty module id".into()));
        }
        self.mcp
            .check_write_scoped(agent_id, ArtifactType::ModuleCode, module_id)?;

        let artifact_id = new_artifact_id();
        let dir = self
            .run_dir
            .join(ArtifactType::ModuleCode.as_str())
            .join(module_id);
        let header_name = format!("{module_id}.h");
        let source_name = format!("{module_id}.c");
        let header_path = dir.join(&header_name);
        let source_path = dir.join(&source_name);

        write_atomic(&header_path, header.as_bytes(), false)?;
        if let Err(err) = write_atomic(&source_path, source.as_bytes(), false) {
            let _ = std::fs::remove_file(&header_path);
            return Err(err);
        }

        let metadata = ArtifactMetadata {
            artifact_id: artifact_id.clone(),
            agent_id: agent_id.to_string(),
            artifact_type: ArtifactType::ModuleCode,
            module_id: Some(module_id.to_string()),
            prompt_version: options.prompt_version.clone(),
            timestamp: Utc::now(),
            artifact_format: ArtifactFormat::MultiFile,
            sub_artifacts: Some(vec![header_name, source_name]),
            extra: options.extra,
        };
        let sidecar = dir.join(format!("_artifact_{artifact_id}.meta.json"));
        if let Err(err) = self.write_sidecar(&sidecar, &metadata) {
            let _ = std::fs::remove_file(&header_path);
            let _ = std::fs::remove_file(&source_path);
            return Err(err);
        }

        Ok(ArtifactHandle {
            artifact_id,
            path: source_path.clone(),
            sidecar,
            sub_paths: vec![header_path, source_path],
        })
    }

    fn write_sidecar(&self, path: &Path, metadata: &ArtifactMetadata) -> Result<(), ArtifactError> {
        let rendered = canonical_json(metadata)?;
        write_atomic(path, rendered.as_bytes(), false)
    }

    /// Maintains `reports/quality_report_latest.json` for JSON report
    /// content. Pointer failure is logged and never fails the primary write.
    fn refresh_latest_pointer(&self, content: &str) {
        if serde_json::from_str::<Value>(content).is_err() {
            return;
        }
        let pointer = self
            .run_dir
            .join(ArtifactType::Reports.as_str())
            .join(QUALITY_REPORT_LATEST);
        if let Err(err) = write_atomic(&pointer, content.as_bytes(), true) {
            tracing::warn!(path = %pointer.display(), %err, "could not refresh quality report pointer");
        }
    }

    /// Authorizes and returns artifact bytes. `relative` is resolved under
    /// the category directory and must not escape it.
    pub fn read_bytes(
        &self,
        agent_id: &str,
        artifact_type: ArtifactType,
        relative: &str,
    ) -> Result<Vec<u8>, ArtifactError> {
        let rel = sanitize_relative(relative)?;
        match rel.components().next() {
            Some(first) if rel.components().count() > 1 => {
                let qualifier = first.as_os_str().to_string_lossy();
                self.mcp
                    .check_read_scoped(agent_id, artifact_type, &qualifier)?;
            }
            _ => self.mcp.check_read(agent_id, artifact_type)?,
        }
        let path = self.run_dir.join(artifact_type.as_str()).join(rel);
        std::fs::read(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ArtifactError::NotFound(path.clone()),
            _ => ArtifactError::io(path.clone(), e),
        })
    }

    pub fn read_text(
        &self,
        agent_id: &str,
        artifact_type: ArtifactType,
        relative: &str,
    ) -> Result<String, ArtifactError> {
        let bytes = self.read_bytes(agent_id, artifact_type, relative)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// The newest non-sidecar file in a category, optionally filtered by
    /// extension. Returns `None` when the category is empty.
    pub fn read_latest(
        &self,
        agent_id: &str,
        artifact_type: ArtifactType,
        extension: Option<&str>,
    ) -> Result<Option<(PathBuf, String)>, ArtifactError> {
        self.mcp.check_read(agent_id, artifact_type)?;
        let dir = self.run_dir.join(artifact_type.as_str());
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for path in walk_files(&dir) {
            if is_sidecar(&path) {
                continue;
            }
            if let Some(ext) = extension {
                if path.extension().and_then(|e| e.to_str()) != Some(ext) {
                    continue;
                }
            }
            let modified = std::fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            if newest.as_ref().map(|(t, _)| modified >= *t).unwrap_or(true) {
                newest = Some((modified, path));
            }
        }
        match newest {
            Some((_, path)) => {
                let content =
                    std::fs::read_to_string(&path).map_err(|e| ArtifactError::io(&path, e))?;
                Ok(Some((path, content)))
            }
            None => Ok(None),
        }
    }

    /// Enumerates stored artifacts newest-first, skipping sidecars.
    pub fn list_artifacts(&self) -> Vec<ArtifactEntry> {
        let mut entries = Vec::new();
        let categories = match std::fs::read_dir(&self.run_dir) {
            Ok(iter) => iter,
            Err(_) => return entries,
        };
        for category in categories.flatten() {
            if !category.path().is_dir() {
                continue;
            }
            let category_name = category.file_name().to_string_lossy().into_owned();
            for path in walk_files(&category.path()) {
                if is_sidecar(&path) {
                    continue;
                }
                let Ok(meta) = std::fs::metadata(&path) else {
                    continue;
                };
                let rel = path
                    .strip_prefix(&self.run_dir)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                entries.push(ArtifactEntry {
                    run_id: self.run_id.clone(),
                    category: category_name.clone(),
                    file_path: rel,
                    file_name: path
                        .file_name()
                        .map(|n| n.to_string_lossy().into_owned())
                        .unwrap_or_default(),
                    size: meta.len(),
                    updated_at: meta
                        .modified()
                        .map(DateTime::<Utc>::from)
                        .unwrap_or_else(|_| Utc::now()),
                });
            }
        }
        entries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        entries
    }

    pub fn category_counts(&self) -> CategoryCounts {
        let count = |artifact_type: ArtifactType| {
            walk_files(&self.run_dir.join(artifact_type.as_str()))
                .into_iter()
                .filter(|p| !is_sidecar(p))
                .count()
        };
        CategoryCounts {
            architecture: count(ArtifactType::Architecture),
            code: count(ArtifactType::ModuleCode),
            tests: count(ArtifactType::Tests),
            reports: count(ArtifactType::Reports),
            build: count(ArtifactType::BuildLog),
        }
    }

    /// Absolute path of a module's generated file, if present on disk.
    /// Callers still go through [`Self::read_bytes`] for content access.
    pub fn module_file(&self, module_id: &str, filename: &str) -> Option<PathBuf> {
        let path = self
            .run_dir
            .join(ArtifactType::ModuleCode.as_str())
            .join(module_id)
            .join(filename);
        path.is_file().then_some(path)
    }
}

fn new_artifact_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn timestamped_filename(agent_id: &str, artifact_id: &str, extension: &str) -> String {
    let ts = Utc::now().format("%Y%m%dT%H%M%SZ");
    let safe_agent = agent_id.replace(':', "_");
    format!("{ts}_{safe_agent}_{artifact_id}.{extension}")
}

fn is_sidecar(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.ends_with(".meta.json"))
        .unwrap_or(false)
}

fn sanitize_relative(relative: &str) -> Result<PathBuf, ArtifactError> {
    let path = Path::new(relative);
    if path.is_absolute()
        || path
            .components()
            .any(|c| matches!(c, std::path::Component::ParentDir))
    {
        return Err(ArtifactError::InvalidPath(relative.to_string()));
    }
    Ok(path.to_path_buf())
}

fn walk_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk_files(&path));
        } else if path.is_file() {
            files.push(path);
        }
    }
    files
}

/// Temp-file-plus-rename write; readers never see partial content and a
/// failed write leaves nothing behind.
fn write_atomic(path: &Path, bytes: &[u8], allow_overwrite: bool) -> Result<(), ArtifactError> {
    let parent = path
        .parent()
        .ok_or_else(|| ArtifactError::InvalidPath(path.display().to_string()))?;
    std::fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
    if !allow_overwrite && path.exists() {
        return Err(ArtifactError::PathCollision(path.to_path_buf()));
    }
    let tmp = parent.join(format!(".tmp-{}", new_artifact_id()));
    std::fs::write(&tmp, bytes).map_err(|e| ArtifactError::io(&tmp, e))?;
    match std::fs::rename(&tmp, path) {
        Ok(()) => Ok(()),
        Err(err) => {
            let _ = std::fs::remove_file(&tmp);
            Err(ArtifactError::io(path, err))
        }
    }
}
