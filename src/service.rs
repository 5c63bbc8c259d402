//! Conversion jobs and single-retrieval artifacts
//!
//! A [`ConversionService`] runs jobs (template + JSON data → workbook) and keeps
//! track of the artifacts they produce. Every job gets its own [`ArtifactId`] and
//! its own directory under the configured output root. Directory names carry a
//! per-service instance tag, so services in different processes can share a root.
//! Retrieving an artifact hands back its bytes and deletes it.
//!
//! # Example
//!
//! ```no_run
//! use json_excelstream::{ConversionService, ConvertConfig, JobRequest, UploadedFile};
//!
//! let service = ConversionService::new(ConvertConfig::new("public"));
//! let outcome = service.convert(JobRequest {
//!     template: UploadedFile::new("uploads/3f1c", "format.xlsx"),
//!     data: UploadedFile::new("uploads/9a2e", "applicants.json"),
//! })?;
//! println!("{} ready ({:.2}%)", outcome.file_name, outcome.progress);
//!
//! let artifact = service.retrieve(&outcome.artifact)?;
//! std::fs::write(&artifact.file_name, &artifact.bytes)?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::config::ConvertConfig;
use crate::error::{ConvertError, Result};
use crate::mapping::extract_mapping;
use crate::progress::{ProgressListener, TracingProgress};
use crate::transformer::StreamingTransformer;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Reference to a generated workbook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactId(u64);

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

impl FromStr for ArtifactId {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self> {
        s.strip_prefix("job-")
            .unwrap_or(s)
            .parse::<u64>()
            .map(ArtifactId)
            .map_err(|_| ConvertError::ArtifactNotFound(s.to_string()))
    }
}

/// An uploaded input file owned by a job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Where the upload was stored
    pub path: PathBuf,
    /// File name the client sent
    pub original_name: String,
}

impl UploadedFile {
    pub fn new<P: AsRef<Path>>(path: P, original_name: impl Into<String>) -> Self {
        UploadedFile {
            path: path.as_ref().to_path_buf(),
            original_name: original_name.into(),
        }
    }

    /// Use the stored file's own name as the original name
    pub fn from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(path, original_name)
    }
}

/// The two payloads a job needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Two-row template workbook
    pub template: UploadedFile,
    /// JSON array of records
    pub data: UploadedFile,
}

/// What a successful job returns
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    /// Retrieval reference
    pub artifact: ArtifactId,
    /// Name of the generated workbook
    pub file_name: String,
    /// Data rows written (header excluded)
    pub rows_written: u64,
    /// Elements counted in the source
    pub total_rows: u64,
    /// Elements skipped as non-records
    pub skipped: u64,
    /// Final progress percentage
    pub progress: f64,
}

/// A retrieved workbook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug)]
struct StoredArtifact {
    path: PathBuf,
    file_name: String,
}

/// Removes a job directory unless the job succeeded
struct JobDirGuard {
    path: PathBuf,
    keep: bool,
}

impl Drop for JobDirGuard {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove job directory");
            }
        }
    }
}

/// Output name for a data upload: base name with a `.xlsx` extension
///
/// Directory components in the client-supplied name are ignored.
pub fn output_file_name(data_name: &str) -> String {
    let base = Path::new(data_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "output".to_string());
    Path::new(&base)
        .with_extension("xlsx")
        .to_string_lossy()
        .into_owned()
}

// Services created by this process, for distinct instance tags
static INSTANCE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Runs conversion jobs and hands out their artifacts once
pub struct ConversionService {
    config: ConvertConfig,
    /// `<pid>-<start millis>-<seq>`, prefixed to every job directory this service creates
    instance: String,
    next_id: AtomicU64,
    artifacts: Mutex<BTreeMap<ArtifactId, StoredArtifact>>,
}

impl ConversionService {
    pub fn new(config: ConvertConfig) -> Self {
        let instance = format!(
            "{}-{}-{}",
            std::process::id(),
            chrono::Utc::now().timestamp_millis(),
            INSTANCE_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        ConversionService {
            config,
            instance,
            next_id: AtomicU64::new(1),
            artifacts: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// Directory holding the output of job `id`
    pub fn job_dir(&self, id: &ArtifactId) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}-{}", self.instance, id))
    }

    fn artifacts(&self) -> MutexGuard<'_, BTreeMap<ArtifactId, StoredArtifact>> {
        // Entries stay consistent even if a holder panicked
        self.artifacts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a job, reporting progress through `tracing`
    pub fn convert(&self, request: JobRequest) -> Result<JobOutcome> {
        self.convert_with(request, &mut TracingProgress)
    }

    /// Run a job with a caller-supplied progress listener
    pub fn convert_with<L: ProgressListener>(
        &self,
        request: JobRequest,
        listener: &mut L,
    ) -> Result<JobOutcome> {
        let id = ArtifactId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let span = tracing::info_span!("job", id = %id);
        let _enter = span.enter();

        tracing::info!(
            template = %request.template.original_name,
            data = %request.data.original_name,
            "🚀 Files received, processing started"
        );

        let result = self.run_job(id, &request, listener);
        match &result {
            Ok(outcome) => {
                tracing::info!(
                    file = %outcome.file_name,
                    rows = outcome.rows_written,
                    skipped = outcome.skipped,
                    "✅ Job finished"
                );
                if self.config.remove_inputs_on_success {
                    remove_inputs(&request);
                }
            }
            Err(e) => tracing::error!(category = ?e.category(), "❌ Job failed: {}", e),
        }
        result
    }

    fn run_job<L: ProgressListener>(
        &self,
        id: ArtifactId,
        request: &JobRequest,
        listener: &mut L,
    ) -> Result<JobOutcome> {
        // Mismatch aborts here, before any output exists
        let mapping = extract_mapping(&request.template.path)?;

        let file_name = output_file_name(&request.data.original_name);
        let job_dir = self.job_dir(&id);
        fs::create_dir_all(&job_dir)?;
        let mut guard = JobDirGuard {
            path: job_dir.clone(),
            keep: false,
        };

        let summary = StreamingTransformer::new(&mapping, &self.config).run(
            &request.data.path,
            &job_dir.join(&file_name),
            listener,
        )?;
        guard.keep = true;

        self.artifacts().insert(
            id,
            StoredArtifact {
                path: summary.output_path.clone(),
                file_name: file_name.clone(),
            },
        );

        Ok(JobOutcome {
            artifact: id,
            file_name,
            rows_written: summary.progress.rows_processed,
            total_rows: summary.progress.total_rows,
            skipped: summary.anomalies,
            progress: summary.final_percent,
        })
    }

    /// Most recent artifact that has not been retrieved yet
    pub fn latest(&self) -> Option<ArtifactId> {
        self.artifacts().keys().next_back().copied()
    }

    /// Take an artifact: returns its bytes and deletes it
    ///
    /// A second retrieval of the same id fails with
    /// [`ArtifactNotFound`](ConvertError::ArtifactNotFound).
    pub fn retrieve(&self, id: &ArtifactId) -> Result<Artifact> {
        // Taken out under the lock so two callers cannot both receive it
        let stored = self
            .artifacts()
            .remove(id)
            .ok_or_else(|| ConvertError::ArtifactNotFound(id.to_string()))?;

        let bytes = match fs::read(&stored.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConvertError::ArtifactNotFound(id.to_string()))
            }
            Err(e) => {
                // Still on disk: keep it retrievable
                self.artifacts().insert(*id, stored);
                return Err(e.into());
            }
        };

        // Removing the job directory removes the workbook with it
        let cleanup = match stored.path.parent() {
            Some(dir) => fs::remove_dir_all(dir),
            None => fs::remove_file(&stored.path),
        };
        if let Err(e) = cleanup {
            tracing::warn!(artifact = %id, error = %e, "failed to delete retrieved artifact");
        } else {
            tracing::info!(artifact = %id, "🗑️ Deleted {} after retrieval", stored.file_name);
        }

        Ok(Artifact {
            file_name: stored.file_name,
            bytes,
        })
    }

    /// Remove job directories left under the output root by other service instances
    ///
    /// Only directories older than `max_age` are removed; this service's own jobs
    /// are never touched. Returns the number of directories removed.
    pub fn purge_stale(&self, max_age: Duration) -> Result<usize> {
        let entries = match fs::read_dir(&self.config.output_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let own_prefix = format!("{}-job-", self.instance);
        let mut removed = 0;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_job_dir_name(&name) || name.starts_with(&own_prefix) {
                continue;
            }
            let metadata = entry.metadata()?;
            if !metadata.is_dir() {
                continue;
            }
            let age = metadata
                .modified()
                .ok()
                .and_then(|modified| modified.elapsed().ok())
                .unwrap_or_default();
            if age < max_age {
                continue;
            }
            match fs::remove_dir_all(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(dir = %name, error = %e, "failed to purge stale job"),
            }
        }

        if removed > 0 {
            tracing::info!("🗑️ Purged {} stale job directories", removed);
        }
        Ok(removed)
    }

    /// Take the most recent artifact
    pub fn retrieve_latest(&self) -> Result<Artifact> {
        let id = self
            .latest()
            .ok_or_else(|| ConvertError::ArtifactNotFound("no completed job".to_string()))?;
        self.retrieve(&id)
    }
}

#[cfg(feature = "tokio")]
impl ConversionService {
    /// Run a job on the blocking pool so the async runtime keeps serving
    pub async fn convert_async(self: &std::sync::Arc<Self>, request: JobRequest) -> Result<JobOutcome> {
        let service = std::sync::Arc::clone(self);
        tokio::task::spawn_blocking(move || service.convert(request))
            .await
            .map_err(|e| ConvertError::IoError(std::io::Error::other(e.to_string())))?
    }
}

// `<pid>-<millis>-<seq>-job-<n>`
fn is_job_dir_name(name: &str) -> bool {
    let mut parts = name.splitn(4, '-');
    let numeric = |part: Option<&str>| {
        part.is_some_and(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
    };
    if !(0..3).all(|_| numeric(parts.next())) {
        return false;
    }
    parts
        .next()
        .and_then(|rest| rest.strip_prefix("job-"))
        .is_some_and(|n| numeric(Some(n)))
}

fn remove_inputs(request: &JobRequest) {
    for input in [&request.template, &request.data] {
        match fs::remove_file(&input.path) {
            Ok(()) => tracing::debug!(path = %input.path.display(), "removed input"),
            Err(e) => tracing::warn!(
                path = %input.path.display(),
                error = %e,
                "failed to remove input"
            ),
        }
    }
    tracing::info!("🗑️ Deleted temporary JSON & Excel format files");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;
    use crate::fast_writer::FastWorkbook;
    use tempfile::tempdir;

    fn write_inputs(dir: &Path) -> JobRequest {
        let template = dir.join("format.xlsx");
        let mut workbook = FastWorkbook::new(&template).unwrap();
        workbook.add_worksheet("Format").unwrap();
        workbook.write_row(&["Header", "Name"]).unwrap();
        workbook.write_row(&["Field", "name"]).unwrap();
        workbook.close().unwrap();

        let data = dir.join("people.json");
        fs::write(&data, r#"[{"name":"Ann"}]"#).unwrap();

        JobRequest {
            template: UploadedFile::from_path(&template),
            data: UploadedFile::from_path(&data),
        }
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("applicants.json"), "applicants.xlsx");
        assert_eq!(output_file_name("export.v2.json"), "export.v2.xlsx");
        assert_eq!(output_file_name("noext"), "noext.xlsx");
        assert_eq!(output_file_name("../../etc/data.json"), "data.xlsx");
        assert_eq!(output_file_name(""), "output.xlsx");
    }

    #[test]
    fn test_artifact_id_roundtrip() {
        let id = ArtifactId(7);
        assert_eq!(id.to_string(), "job-7");
        assert_eq!("job-7".parse::<ArtifactId>().unwrap(), id);
        assert_eq!("7".parse::<ArtifactId>().unwrap(), id);
        assert!(matches!(
            "job-x".parse::<ArtifactId>(),
            Err(ConvertError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn test_retrieve_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let service = ConversionService::new(ConvertConfig::new(dir.path()));
        assert!(service.latest().is_none());
        assert!(matches!(
            service.retrieve(&ArtifactId(1)),
            Err(ConvertError::ArtifactNotFound(_))
        ));
        assert!(matches!(
            service.retrieve_latest(),
            Err(ConvertError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn test_finalization_failure_removes_job_dir() {
        let inputs = tempdir().unwrap();
        let out = tempdir().unwrap();
        let request = write_inputs(inputs.path());
        let service = ConversionService::new(ConvertConfig::new(out.path()));

        // First job gets id 1; occupy its destination with a directory
        let job_dir = service.job_dir(&ArtifactId(1));
        fs::create_dir_all(job_dir.join("people.xlsx")).unwrap();

        let err = service.convert(request.clone()).unwrap_err();
        assert!(matches!(err, ConvertError::SinkFinalization(_)));
        assert_eq!(err.category(), ErrorCategory::Finalization);
        assert!(!job_dir.exists());
        assert!(service.latest().is_none());
        assert!(request.template.path.exists());
        assert!(request.data.path.exists());
    }

    #[test]
    fn test_failed_read_keeps_artifact() {
        let out = tempdir().unwrap();
        let service = ConversionService::new(ConvertConfig::new(out.path()));

        // A directory cannot be read as a file
        let unreadable = out.path().join("unreadable");
        fs::create_dir_all(&unreadable).unwrap();
        let id = ArtifactId(9);
        service.artifacts().insert(
            id,
            StoredArtifact {
                path: unreadable.clone(),
                file_name: "unreadable.xlsx".to_string(),
            },
        );

        let err = service.retrieve(&id).unwrap_err();
        assert!(matches!(err, ConvertError::IoError(_)));
        assert_eq!(service.latest(), Some(id));
        assert!(unreadable.exists());
    }

    #[test]
    fn test_services_sharing_a_root_use_distinct_dirs() {
        let out = tempdir().unwrap();
        let first = ConversionService::new(ConvertConfig::new(out.path()));
        let second = ConversionService::new(ConvertConfig::new(out.path()));

        let id = ArtifactId(1);
        assert_ne!(first.job_dir(&id), second.job_dir(&id));
        let name = first.job_dir(&id);
        let name = name.file_name().unwrap().to_string_lossy();
        assert!(is_job_dir_name(&name));
        assert!(name.ends_with("-job-1"));
    }

    #[test]
    fn test_purge_stale_skips_own_and_foreign_dirs() {
        let out = tempdir().unwrap();
        let service = ConversionService::new(ConvertConfig::new(out.path()));

        let stale = out.path().join("1-1000-0-job-3");
        let own = service.job_dir(&ArtifactId(1));
        let unrelated = out.path().join("reports");
        for dir in [&stale, &own, &unrelated] {
            fs::create_dir_all(dir).unwrap();
        }

        assert_eq!(service.purge_stale(Duration::ZERO).unwrap(), 1);
        assert!(!stale.exists());
        assert!(own.exists());
        assert!(unrelated.exists());

        // Recent directories survive a non-zero age
        fs::create_dir_all(&stale).unwrap();
        assert_eq!(service.purge_stale(Duration::from_secs(3600)).unwrap(), 0);
        assert!(stale.exists());
    }

    #[test]
    fn test_job_dir_name_shape() {
        assert!(is_job_dir_name("4242-1700000000000-0-job-12"));
        assert!(!is_job_dir_name("job-12"));
        assert!(!is_job_dir_name("4242-1700000000000-job-12"));
        assert!(!is_job_dir_name("4242-abc-0-job-12"));
        assert!(!is_job_dir_name("4242-17-0-job-"));
        assert!(!is_job_dir_name("4242-17-0-jobs-1"));
    }
}
