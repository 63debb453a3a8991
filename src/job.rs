//! The conversion-and-merge orchestrator.
//!
//! A job moves through `Received → Converting(i) → Assembling → Done`, or
//! to `Failed` from any live state:
//!
//! ```text
//! Vec<SourceFile>
//!  │
//!  ├─ 1. Receive   reject an empty list
//!  ├─ 2. Stage     write each upload into a fresh per-job scratch directory
//!  ├─ 3. Convert   images → one-page PDFs (spawn_blocking, buffer_unordered);
//!  │               PDFs pass through untouched
//!  ├─ 4. Order     sort results back into submission order
//!  ├─ 5. Assemble  concatenate (spawn_blocking); one document is copied
//!  └─ 6. Store     atomically publish the output under a generated name
//! ```
//!
//! Steps 2 to 5 run under the job timeout and race the cancel token. The
//! first error from any step ends the job. Every scratch artifact is
//! registered with a [`CleanupList`] the moment it is created and the scratch
//! directory is a [`tempfile::TempDir`], so each exit path (success, error,
//! timeout, cancellation) leaves nothing behind but the published output.

use crate::cancel::CancelToken;
use crate::config::PipelineConfig;
use crate::error::StitchError;
use crate::geometry::A4_GEOMETRY;
use crate::output::{JobState, JobStats, OutputDocument};
use crate::pipeline::assemble::{assemble, AssembledDocument, DocumentInput};
use crate::pipeline::cleanup::CleanupList;
use crate::pipeline::image::image_to_pdf;
use crate::pipeline::input::{staged_name, SourceFile, SourceKind};
use crate::progress::{JobProgressCallback, NoopProgressCallback, ProgressCallback};
use crate::store::ArtifactStore;
use chrono::{DateTime, Local};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Where a document's bytes live until assembly.
#[derive(Debug)]
enum DocumentBody {
    /// A pass-through document, still at its staged path.
    Staged(PathBuf),
    /// A freshly converted single-page document.
    Converted(Vec<u8>),
}

/// One source file turned into a document, ready for assembly.
///
/// Owned by its [`MergeJob`] until the assembler consumes it; dropped with
/// the job on failure.
#[derive(Debug)]
pub struct ConvertedDocument {
    index: usize,
    name: String,
    kind: SourceKind,
    body: DocumentBody,
}

impl ConvertedDocument {
    /// Submission position of the source file.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Pages this document contributes, if known before assembly.
    pub fn pages(&self) -> Option<usize> {
        match self.kind {
            SourceKind::RasterImage => Some(1),
            SourceKind::Document => None,
        }
    }

    /// Load the document bytes. Blocking.
    fn into_bytes(self) -> Result<(String, Vec<u8>), StitchError> {
        match self.body {
            DocumentBody::Converted(bytes) => Ok((self.name, bytes)),
            DocumentBody::Staged(path) => {
                let bytes = std::fs::read(&path).map_err(|e| StitchError::io(&path, e))?;
                Ok((self.name, bytes))
            }
        }
    }
}

/// A staged upload waiting for conversion.
#[derive(Debug)]
struct StagedFile {
    index: usize,
    name: String,
    kind: SourceKind,
    path: PathBuf,
}

/// State of one job: its id, lifecycle state and the documents produced so
/// far. Lives only as long as the request that created it.
#[derive(Debug)]
pub struct MergeJob {
    id: String,
    state: JobState,
    documents: Vec<ConvertedDocument>,
}

impl MergeJob {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            state: JobState::Received,
            documents: Vec::new(),
        }
    }

    /// 32-hex-digit job identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// Documents produced so far, in submission order once conversion ends.
    pub fn documents(&self) -> &[ConvertedDocument] {
        &self.documents
    }

    fn advance(&mut self, next: JobState) -> Result<(), StitchError> {
        if !self.state.can_advance_to(next) {
            return Err(StitchError::Internal(format!(
                "illegal job transition {} → {}",
                self.state, next
            )));
        }
        debug!("Job state {} → {}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            debug!("Job state {} → {}", self.state, JobState::Failed);
            self.state = JobState::Failed;
        }
    }

    fn push_document(&mut self, document: ConvertedDocument) -> Result<(), StitchError> {
        let converted = match self.state {
            JobState::Converting(i) => i,
            other => {
                return Err(StitchError::Internal(format!(
                    "document produced while job is {other}"
                )))
            }
        };
        self.documents.push(document);
        self.advance(JobState::Converting(converted + 1))
    }

    /// Restore submission order; conversions complete in any order.
    fn take_ordered_documents(&mut self) -> Vec<ConvertedDocument> {
        let mut documents = std::mem::take(&mut self.documents);
        documents.sort_by_key(|d| d.index);
        documents
    }
}

/// Name of the output artifact of job `job_id` finished at `now`.
///
/// `{prefix}_{YYYYmmdd_HHMMSS}_{first 8 hex digits of the job id}.pdf`
pub fn output_name(prefix: &str, job_id: &str, now: DateTime<Local>) -> String {
    let short_id = job_id.get(..8).unwrap_or(job_id);
    format!("{}_{}_{}.pdf", prefix, now.format("%Y%m%d_%H%M%S"), short_id)
}

/// Turns an ordered list of uploads into one merged PDF.
///
/// Cheap to clone; clones share the configuration. Jobs are independent, so
/// one pipeline can run any number of them concurrently.
///
/// # Example
///
/// ```rust,no_run
/// use pdfstitch::{ConversionPipeline, PipelineConfig, SourceFile};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = ConversionPipeline::new(PipelineConfig::default());
/// let files = vec![
///     SourceFile::new("cover.png", std::fs::read("cover.png")?)?,
///     SourceFile::new("report.pdf", std::fs::read("report.pdf")?)?,
/// ];
/// let output = pipeline.run(files).await?;
/// println!("{} ({:?} pages)", output.name, output.page_count);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ConversionPipeline {
    config: Arc<PipelineConfig>,
}

impl ConversionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one job to completion.
    ///
    /// # Errors
    /// The first error encountered; see [`StitchError`]. On error nothing
    /// produced by the job remains on disk.
    pub async fn run(&self, files: Vec<SourceFile>) -> Result<OutputDocument, StitchError> {
        self.run_with_cancel(files, &CancelToken::new()).await
    }

    /// Run one job, stopping with [`StitchError::Cancelled`] as soon as
    /// `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        files: Vec<SourceFile>,
        cancel: &CancelToken,
    ) -> Result<OutputDocument, StitchError> {
        let mut job = MergeJob::new();
        let span = info_span!("job", id = %job.id());

        async {
            let result = self.execute(&mut job, files, cancel).await;
            if let Err(ref e) = result {
                job.fail();
                warn!("Job failed: {}", e);
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Read every path through the upload boundary (extension check and
    /// size ceiling), then run one job on the result.
    pub async fn run_paths<P: AsRef<Path>>(
        &self,
        paths: &[P],
        cancel: &CancelToken,
    ) -> Result<OutputDocument, StitchError> {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            files.push(SourceFile::from_path(path, self.config.max_file_bytes).await?);
        }
        self.run_with_cancel(files, cancel).await
    }

    /// Synchronous wrapper around [`ConversionPipeline::run`].
    ///
    /// Creates a temporary tokio runtime internally.
    pub fn run_sync(&self, files: Vec<SourceFile>) -> Result<OutputDocument, StitchError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| StitchError::Internal(format!("Failed to create tokio runtime: {}", e)))?
            .block_on(self.run(files))
    }

    /// Open the output store.
    pub async fn output_store(&self) -> Result<ArtifactStore, StitchError> {
        ArtifactStore::open(&self.config.output_dir).await
    }

    /// Retrieve a published output by name.
    ///
    /// # Errors
    /// [`StitchError::NotFound`] if no output with that name exists.
    pub async fn fetch(&self, name: &str) -> Result<Vec<u8>, StitchError> {
        self.output_store().await?.load(name).await
    }

    fn callback(&self) -> ProgressCallback {
        self.config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback))
    }

    async fn execute(
        &self,
        job: &mut MergeJob,
        files: Vec<SourceFile>,
        cancel: &CancelToken,
    ) -> Result<OutputDocument, StitchError> {
        let total_start = Instant::now();
        if files.is_empty() {
            return Err(StitchError::NoFiles);
        }
        info!("Received {} files", files.len());
        let callback = self.callback();
        callback.on_job_start(files.len());

        // Blocking tasks outlive a dropped job future; this token tells them
        // the job was abandoned, whatever the reason.
        let abandoned = CancelToken::new();
        let (assembled, mut stats) = self
            .guarded(
                cancel,
                self.prepare(job, files, cancel, &abandoned, callback.as_ref()),
            )
            .await
            .inspect_err(|_| abandoned.cancel())?;

        // Last point at which the job can still be abandoned without
        // publishing anything.
        if cancel.is_cancelled() {
            return Err(StitchError::Cancelled);
        }

        let store = self.output_store().await?;
        let name = output_name(&self.config.output_prefix, job.id(), Local::now());
        let size_bytes = assembled.bytes.len() as u64;
        let handle = store.store(&name, assembled.bytes).await?;
        job.advance(JobState::Done)?;

        stats.total_duration_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Job complete: {} ({} bytes, {} pages) in {}ms",
            handle.name,
            size_bytes,
            assembled
                .page_count
                .map(|n| n.to_string())
                .unwrap_or_else(|| "?".into()),
            stats.total_duration_ms
        );
        callback.on_job_complete(&handle.name, assembled.page_count);

        Ok(OutputDocument {
            name: handle.name,
            path: handle.path,
            job_id: job.id().to_string(),
            page_count: assembled.page_count,
            size_bytes,
            stats,
        })
    }

    /// Race `work` against the cancel token and the job timeout.
    async fn guarded<T>(
        &self,
        cancel: &CancelToken,
        work: impl Future<Output = Result<T, StitchError>>,
    ) -> Result<T, StitchError> {
        let raced = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(StitchError::Cancelled),
                result = work => result,
            }
        };
        match self.config.job_timeout_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), raced)
                .await
                .map_err(|_| StitchError::Timeout { secs })?,
            None => raced.await,
        }
    }

    /// Stage, convert and assemble. Scratch state lives only in this frame.
    ///
    /// `abandoned` is handed to the blocking tasks, which keep running after
    /// this future is dropped.
    async fn prepare(
        &self,
        job: &mut MergeJob,
        files: Vec<SourceFile>,
        cancel: &CancelToken,
        abandoned: &CancelToken,
        callback: &dyn JobProgressCallback,
    ) -> Result<(AssembledDocument, JobStats), StitchError> {
        let scratch_root = &self.config.scratch_dir;
        tokio::fs::create_dir_all(scratch_root)
            .await
            .map_err(|e| StitchError::io(scratch_root, e))?;
        // Declared before `cleanup` so the registered files go first and the
        // directory last.
        let scratch = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(scratch_root)
            .map_err(|e| StitchError::io(scratch_root, e))?;
        let cleanup = CleanupList::new();
        debug!("Scratch directory {}", scratch.path().display());

        let mut stats = JobStats {
            total_files: files.len(),
            copied_through: files.len() == 1,
            ..JobStats::default()
        };

        // ── Stage ────────────────────────────────────────────────────────
        let mut staged = Vec::with_capacity(files.len());
        for (index, file) in files.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(StitchError::Cancelled);
            }
            let (name, kind, content) = file.into_parts();
            let path = scratch.path().join(staged_name(index, &name));
            cleanup.register(&path);
            tokio::fs::write(&path, &content)
                .await
                .map_err(|e| StitchError::io(&path, e))?;
            match kind {
                SourceKind::RasterImage => stats.images_converted += 1,
                SourceKind::Document => stats.documents_passed += 1,
            }
            staged.push(StagedFile {
                index,
                name,
                kind,
                path,
            });
        }

        // ── Convert ──────────────────────────────────────────────────────
        job.advance(JobState::Converting(0))?;
        let convert_start = Instant::now();
        let mut converted = stream::iter(staged)
            .map(|file| convert_one(file, cancel, abandoned, callback))
            .buffer_unordered(self.config.concurrency.max(1));
        while let Some(document) = converted.try_next().await? {
            job.push_document(document)?;
        }
        drop(converted);
        stats.convert_duration_ms = convert_start.elapsed().as_millis() as u64;

        // ── Assemble ─────────────────────────────────────────────────────
        job.advance(JobState::Assembling)?;
        let documents = job.take_ordered_documents();
        info!(
            "Assembling {} documents ({} converted images)",
            documents.len(),
            stats.images_converted
        );
        let assemble_start = Instant::now();
        let token = abandoned.clone();
        let assembled = tokio::task::spawn_blocking(move || assemble_documents(documents, &token))
            .await
            .map_err(|e| StitchError::Internal(format!("Assembly task panicked: {}", e)))??;
        stats.assemble_duration_ms = assemble_start.elapsed().as_millis() as u64;

        let removed = cleanup.run();
        debug!("Removed {} staged files", removed);
        Ok((assembled, stats))
    }
}

/// Turn one staged upload into a document.
async fn convert_one(
    file: StagedFile,
    cancel: &CancelToken,
    abandoned: &CancelToken,
    callback: &dyn JobProgressCallback,
) -> Result<ConvertedDocument, StitchError> {
    if cancel.is_cancelled() {
        return Err(StitchError::Cancelled);
    }
    let (index, name) = (file.index, file.name.clone());
    callback.on_file_start(index, &name);

    let result = match file.kind {
        SourceKind::Document => Ok(ConvertedDocument {
            index,
            name: file.name,
            kind: SourceKind::Document,
            body: DocumentBody::Staged(file.path),
        }),
        SourceKind::RasterImage => convert_image(file, abandoned.clone()).await,
    };

    match &result {
        Ok(document) => {
            debug!("#{} '{}' ready", index, name);
            callback.on_file_complete(index, &name, document.pages());
        }
        Err(e) => callback.on_file_error(index, &name, &e.to_string()),
    }
    result
}

/// Decode a staged image and build its page. The staged original is removed
/// once the page exists.
///
/// A failed, timed-out or cancelled job stops awaiting this task but cannot
/// abort it, so the task checks `cancel` itself before and after the decode.
async fn convert_image(
    file: StagedFile,
    cancel: CancelToken,
) -> Result<ConvertedDocument, StitchError> {
    tokio::task::spawn_blocking(move || {
        if cancel.is_cancelled() {
            return Err(StitchError::Cancelled);
        }
        let bytes = std::fs::read(&file.path).map_err(|e| StitchError::io(&file.path, e))?;
        let converted = image_to_pdf(&file.name, &bytes, &A4_GEOMETRY)?;
        drop(bytes);
        if cancel.is_cancelled() {
            return Err(StitchError::Cancelled);
        }
        if let Err(e) = std::fs::remove_file(&file.path) {
            warn!(
                "Could not remove image original {}: {}",
                file.path.display(),
                e
            );
        }
        Ok(ConvertedDocument {
            index: file.index,
            name: file.name,
            kind: SourceKind::RasterImage,
            body: DocumentBody::Converted(converted.pdf),
        })
    })
    .await
    .map_err(|e| StitchError::Internal(format!("Image conversion task panicked: {}", e)))?
}

/// Load every document body and concatenate. Blocking.
///
/// Gives up with [`StitchError::Cancelled`] between loads once `cancel`
/// fires.
fn assemble_documents(
    documents: Vec<ConvertedDocument>,
    cancel: &CancelToken,
) -> Result<AssembledDocument, StitchError> {
    let mut bodies = Vec::with_capacity(documents.len());
    for document in documents {
        if cancel.is_cancelled() {
            return Err(StitchError::Cancelled);
        }
        bodies.push(document.into_bytes()?);
    }
    if cancel.is_cancelled() {
        return Err(StitchError::Cancelled);
    }
    let inputs: Vec<DocumentInput<'_>> = bodies
        .iter()
        .map(|(name, bytes)| DocumentInput { name, bytes })
        .collect();
    assemble(&inputs)
}
