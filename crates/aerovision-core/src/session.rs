//! Job Lifecycle Session
//!
//! The client-side state machine for detection jobs:
//! `Idle → Submitted → Polling → {Completed | Failed}`.
//!
//! One session owns the current file selection, the current job id, and the
//! poll timer - the mutable state the presentation layer threads through
//! instead of holding in ambient globals. Only one job may be active at a
//! time; concurrent submissions are rejected.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info};

use crate::error::{CoreError, CoreResult};
use crate::protocol::{FrameResult, HealthResponse, JobState, JobStatusResponse};
use crate::summary::DetectionSummary;
use crate::transport::DetectionTransport;
use crate::types::{FileKind, JobId, SessionId, UploadToken};
use crate::view::{ActionSet, LogLevel, SessionPhase, ViewState};

// =============================================================================
// Constants
// =============================================================================

/// Cadence of the job status poll
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Frame Skip Parsing
// =============================================================================

/// Parses a user-supplied frame-skip value.
///
/// Rejects non-numeric and non-positive input with a validation error
/// instead of forwarding garbage to the server.
pub fn parse_frame_skip(raw: &str) -> CoreResult<u32> {
    let value: u32 = raw.trim().parse().map_err(|_| {
        CoreError::Validation(format!(
            "Frame skip must be a positive integer, got '{}'",
            raw.trim()
        ))
    })?;
    if value == 0 {
        return Err(CoreError::Validation(
            "Frame skip must be at least 1".to_string(),
        ));
    }
    Ok(value)
}

// =============================================================================
// Session State
// =============================================================================

#[derive(Clone, Debug)]
struct SelectedFile {
    path: PathBuf,
    kind: FileKind,
}

#[derive(Default)]
struct SessionInner {
    selected: Option<SelectedFile>,
    cancel_tx: Option<oneshot::Sender<()>>,
    poll_task: Option<tokio::task::JoinHandle<()>>,
    frames: Vec<FrameResult>,
}

/// Result of a synchronous image detection
#[derive(Clone, Debug)]
pub struct ImageReport {
    /// Aggregate bucket counts
    pub summary: DetectionSummary,
    /// Total count as reported by the server
    pub count: u64,
    /// Server-side filename of the annotated output
    pub output_file: Option<String>,
    /// Decoded annotated image (JPEG bytes)
    pub annotated: Vec<u8>,
}

/// Client session driving the job lifecycle protocol
pub struct JobSession {
    id: SessionId,
    transport: Arc<dyn DetectionTransport>,
    poll_interval: Duration,
    inner: Arc<Mutex<SessionInner>>,
    view_tx: Arc<watch::Sender<ViewState>>,
}

impl JobSession {
    /// Creates a new idle session
    pub fn new(transport: Arc<dyn DetectionTransport>) -> Self {
        let (view_tx, _view_rx) = watch::channel(ViewState::default());
        let id = ulid::Ulid::new().to_string();
        debug!("Created detection session {}", id);

        Self {
            id,
            transport,
            poll_interval: DEFAULT_POLL_INTERVAL,
            inner: Arc::new(Mutex::new(SessionInner::default())),
            view_tx: Arc::new(view_tx),
        }
    }

    /// Set the poll cadence
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Session identifier (client-side, diagnostic only)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Subscribes to view state changes
    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view_tx.subscribe()
    }

    /// Current view state snapshot
    pub fn view(&self) -> ViewState {
        self.view_tx.borrow().clone()
    }

    /// All frame results received so far, for detail rendering
    pub fn frame_results(&self) -> Vec<FrameResult> {
        self.inner.lock().unwrap().frames.clone()
    }

    /// Returns true while a job is submitted or polling
    pub fn is_active(&self) -> bool {
        matches!(
            self.view_tx.borrow().phase,
            SessionPhase::Submitted | SessionPhase::Polling
        )
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.view_tx.send_modify(|v| v.push_log(level, message));
    }

    // =========================================================================
    // File Selection
    // =========================================================================

    /// Selects the file for the next detection run.
    ///
    /// Validates existence and that the extension matches the declared kind.
    pub fn select_file(&self, path: impl Into<PathBuf>, kind: FileKind) -> CoreResult<()> {
        let path = path.into();

        if !path.is_file() {
            let msg = format!("File not found: {}", path.display());
            self.log(LogLevel::Error, msg.clone());
            return Err(CoreError::Validation(msg));
        }

        if !kind.accepts(&path) {
            let msg = format!(
                "Please select a valid {} file (allowed: {})",
                kind,
                kind.allowed_extensions().join(", ")
            );
            self.log(LogLevel::Error, msg.clone());
            return Err(CoreError::Validation(msg));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.log(LogLevel::Info, format!("{} selected: {}", kind, name));

        self.inner.lock().unwrap().selected = Some(SelectedFile { path, kind });
        Ok(())
    }

    fn selected(&self, kind: FileKind) -> CoreResult<PathBuf> {
        let inner = self.inner.lock().unwrap();
        match &inner.selected {
            None => Err(CoreError::NoFileSelected),
            Some(s) if s.kind != kind => Err(CoreError::Validation(format!(
                "Selected file is a {}, not a {}",
                s.kind, kind
            ))),
            Some(s) => Ok(s.path.clone()),
        }
    }

    // =========================================================================
    // Pre-flight
    // =========================================================================

    /// Probes server health before starting a run.
    ///
    /// Offline servers block submission with a connection error; this is the
    /// only place health gates anything.
    pub async fn check_server(&self) -> CoreResult<HealthResponse> {
        match self.transport.health().await {
            Ok(health) if health.is_running() => {
                let model = if health.model_loaded {
                    "Loaded"
                } else {
                    "Not Loaded"
                };
                self.log(
                    LogLevel::Success,
                    format!(
                        "Connected to detection server | Model: {} | Device: {}",
                        model, health.device
                    ),
                );
                Ok(health)
            }
            Ok(health) => {
                self.log(
                    LogLevel::Error,
                    "Detection server is not running - please start the backend server",
                );
                Err(CoreError::Connection(format!(
                    "Server reported status '{}'",
                    health.status
                )))
            }
            Err(e) => {
                self.log(
                    LogLevel::Error,
                    "Cannot connect to detection server - please start the backend server",
                );
                Err(e)
            }
        }
    }

    // =========================================================================
    // Upload
    // =========================================================================

    async fn upload_selected(&self, kind: FileKind) -> CoreResult<UploadToken> {
        let path = self.selected(kind)?;
        self.log(LogLevel::Info, format!("Uploading {}...", kind));

        match self.transport.upload(&path, kind).await {
            Ok(token) => {
                self.log(LogLevel::Success, format!("{} uploaded successfully", kind));
                Ok(token)
            }
            Err(e) => {
                self.log(LogLevel::Error, e.to_string());
                Err(e)
            }
        }
    }

    // =========================================================================
    // Image Path
    // =========================================================================

    /// Runs synchronous detection on the selected image.
    pub async fn detect_image(&self) -> CoreResult<ImageReport> {
        if self.is_active() {
            return Err(self.active_job_error());
        }

        // Fail fast before any network call.
        self.selected(FileKind::Image)?;

        self.check_server().await?;
        let token = self.upload_selected(FileKind::Image).await?;

        self.log(LogLevel::Info, "Starting object detection on image...");
        let response = match self.transport.detect_image(&token).await {
            Ok(r) => r,
            Err(e) => {
                self.log(LogLevel::Error, e.to_string());
                return Err(e);
            }
        };

        let Some(frame_base64) = response.frame_base64 else {
            let msg = response
                .error
                .unwrap_or_else(|| "Detection failed".to_string());
            self.log(LogLevel::Error, format!("Failed to process image: {}", msg));
            return Err(CoreError::Detection(msg));
        };

        let annotated = base64::engine::general_purpose::STANDARD
            .decode(frame_base64.as_bytes())
            .map_err(|e| {
                CoreError::Detection(format!("Invalid annotated image from server: {}", e))
            })?;

        let summary = DetectionSummary::from_detections(&response.detections);
        let output_file = response.output_file.clone();

        self.view_tx.send_modify(|v| {
            v.summary = summary;
            v.output_file = output_file.clone();
            v.actions = ActionSet {
                start: true,
                cancel: false,
                download: output_file.is_some(),
                view_details: true,
            };
            v.push_log(
                LogLevel::Success,
                format!(
                    "Image processed! Detected {} objects ({} soldiers, {} civilians)",
                    response.count, summary.soldiers, summary.civilians
                ),
            );
        });

        Ok(ImageReport {
            summary,
            count: response.count,
            output_file: response.output_file,
            annotated,
        })
    }

    // =========================================================================
    // Video Path
    // =========================================================================

    /// Uploads the selected video and submits an asynchronous detection job,
    /// then follows it with the poll loop until a terminal state.
    pub async fn start_video(&self, frame_skip: u32) -> CoreResult<JobId> {
        if frame_skip == 0 {
            let msg = "Frame skip must be at least 1".to_string();
            self.log(LogLevel::Error, msg.clone());
            return Err(CoreError::Validation(msg));
        }

        if self.is_active() {
            return Err(self.active_job_error());
        }

        // Fail fast before any network call.
        self.selected(FileKind::Video)?;

        self.check_server().await?;
        let token = self.upload_selected(FileKind::Video).await?;

        self.log(LogLevel::Info, "Starting object detection...");
        let job_id = match self.transport.detect_video(&token, frame_skip).await {
            Ok(id) => id,
            Err(e) => {
                self.log(LogLevel::Error, e.to_string());
                return Err(e);
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().unwrap();
            inner.cancel_tx = Some(cancel_tx);
            inner.frames.clear();
        }

        self.view_tx.send_modify(|v| {
            v.phase = SessionPhase::Submitted;
            v.job_id = Some(job_id.clone());
            v.progress_percent = 0;
            v.status_text = "submitted".to_string();
            v.frames_processed = 0;
            v.summary = DetectionSummary::default();
            v.output_file = None;
            v.actions = ActionSet::processing();
            v.push_log(
                LogLevel::Success,
                format!("Processing started (Job ID: {})", job_id),
            );
        });

        self.view_tx
            .send_modify(|v| v.phase = SessionPhase::Polling);

        let task = tokio::spawn(run_poll_loop(
            self.transport.clone(),
            job_id.clone(),
            self.poll_interval,
            self.inner.clone(),
            self.view_tx.clone(),
            cancel_rx,
        ));
        self.inner.lock().unwrap().poll_task = Some(task);

        info!("Session {} polling job {}", self.id, job_id);
        Ok(job_id)
    }

    fn active_job_error(&self) -> CoreError {
        let job_id = self
            .view_tx
            .borrow()
            .job_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        CoreError::JobAlreadyActive(job_id)
    }

    /// Cancels the active poll loop.
    ///
    /// Client-side only: the remote job keeps running on the server - this
    /// stops the timer and resets action enablement. Returns false when no
    /// poll loop was active.
    pub fn cancel(&self) -> bool {
        let cancel_tx = self.inner.lock().unwrap().cancel_tx.take();
        match cancel_tx {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }

    /// Waits until the current run reaches a terminal phase (or is cancelled)
    /// and returns the final view state.
    pub async fn wait_done(&self) -> ViewState {
        let mut rx = self.subscribe();
        loop {
            {
                let view = rx.borrow_and_update();
                let cancelled = view.phase == SessionPhase::Idle && view.job_id.is_some();
                if view.phase.is_terminal() || cancelled {
                    return view.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.view();
            }
        }
    }

    // =========================================================================
    // Download
    // =========================================================================

    /// Downloads the annotated output of the current job into `dir`.
    ///
    /// Falls back to one status fetch when the terminal payload carried no
    /// output filename.
    pub async fn download_output(&self, dir: &Path) -> CoreResult<PathBuf> {
        let known = self.view_tx.borrow().output_file.clone();
        let output_file = match known {
            Some(f) => f,
            None => {
                let job_id = self.view_tx.borrow().job_id.clone().ok_or_else(|| {
                    CoreError::Validation("No completed job to download".to_string())
                })?;
                let status = self.transport.job_status(&job_id).await?;
                status.output_file.ok_or_else(|| {
                    CoreError::Validation("No output file available yet".to_string())
                })?
            }
        };

        let path = self.transport.download(&output_file, dir).await?;
        self.log(
            LogLevel::Info,
            format!("Downloaded processed output: {}", path.display()),
        );
        Ok(path)
    }
}

impl Drop for JobSession {
    fn drop(&mut self) {
        // Orphaned poll loops would outlive their consumer.
        if let Some(task) = self.inner.lock().unwrap().poll_task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Poll Loop
// =============================================================================

/// Follows one job to a terminal state.
///
/// Re-arming single-shot timer: the next tick is scheduled only after the
/// previous status fetch resolves, so ticks never overlap under slow
/// networks. Transport failures are swallowed to the diagnostic channel and
/// polling continues on the next tick.
async fn run_poll_loop(
    transport: Arc<dyn DetectionTransport>,
    job_id: JobId,
    interval: Duration,
    inner: Arc<Mutex<SessionInner>>,
    view_tx: Arc<watch::Sender<ViewState>>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            res = &mut cancel_rx => {
                // Err means the session itself was dropped; only a real
                // cancel gets surfaced to the user.
                if res.is_ok() {
                    view_tx.send_modify(|v| {
                        v.phase = SessionPhase::Idle;
                        v.status_text = "cancelled".to_string();
                        v.actions = ActionSet::default();
                        v.push_log(LogLevel::Warning, "Processing cancelled by user");
                    });
                    // The remote job keeps running; this abort is local only.
                    info!("Polling for job {} cancelled by user", job_id);
                }
                break;
            }
            _ = tokio::time::sleep(interval) => {
                match transport.job_status(&job_id).await {
                    Err(e) => {
                        // Best-effort tick: a single network blip must not
                        // abort the job.
                        debug!("Status check failed for job {}: {}", job_id, e);
                    }
                    Ok(status) => {
                        if apply_status(&view_tx, &inner, &status) {
                            break;
                        }
                    }
                }
            }
        }
    }

    let mut guard = inner.lock().unwrap();
    guard.cancel_tx = None;
    guard.poll_task = None;
}

/// Mirrors one status payload into the view. Returns true on a terminal
/// state.
fn apply_status(
    view_tx: &watch::Sender<ViewState>,
    inner: &Mutex<SessionInner>,
    status: &JobStatusResponse,
) -> bool {
    let state = status.state();

    // Aggregates are recomputed from the full frame history every tick, never
    // incrementally, so replaying a payload cannot double-count.
    let summary_update = if status.detections.is_empty() {
        None
    } else {
        inner.lock().unwrap().frames = status.detections.clone();
        Some((
            DetectionSummary::from_frames(&status.detections),
            status.detections.len() as u64,
        ))
    };

    view_tx.send_modify(|v| {
        v.set_progress(status.progress);
        v.status_text = status.status.clone();
        if let Some((summary, frames)) = summary_update {
            v.summary = summary;
            v.frames_processed = frames;
        }

        match state {
            JobState::Completed => {
                v.phase = SessionPhase::Completed;
                v.output_file = status.output_file.clone();
                v.actions = ActionSet::completed();
                v.push_log(LogLevel::Success, "Processing completed successfully!");
                v.push_log(
                    LogLevel::Success,
                    format!(
                        "Video processing complete! Detected {} objects",
                        v.summary.total()
                    ),
                );
            }
            JobState::Error => {
                v.phase = SessionPhase::Failed;
                let msg = status
                    .error
                    .clone()
                    .unwrap_or_else(|| "Unknown error".to_string());
                v.actions.start = true;
                v.actions.cancel = false;
                v.push_log(LogLevel::Error, format!("Processing error: {}", msg));
            }
            JobState::Queued | JobState::Processing => {
                v.phase = SessionPhase::Polling;
            }
        }
    });

    state.is_terminal()
}

// =============================================================================
// Tests
// =============================================================================
