//! Detection Server Sidecar Process Management
//!
//! Manages the lifecycle of the inference server running as a child process.
//! Exposes only start/stop/is-running to the rest of the system - the server
//! remains the sole owner of job state; this module never inspects it.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::process::{Child, Command};

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during sidecar operations
#[derive(Error, Debug)]
pub enum SidecarError {
    /// Server program not found at an explicit path
    #[error("Detection server program not found at: {0}")]
    ProgramNotFound(String),

    /// Failed to start the server process
    #[error("Failed to start detection server: {0}")]
    StartFailed(String),

    /// Readiness check failed
    #[error("Readiness check failed: {0}")]
    NotReady(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for sidecar operations
pub type SidecarResult<T> = Result<T, SidecarError>;

// =============================================================================
// Sidecar Configuration
// =============================================================================

/// Configuration for the detection server sidecar
#[derive(Debug, Clone)]
pub struct SidecarConfig {
    /// Program to run (bare names resolve via PATH)
    pub program: PathBuf,
    /// Program arguments
    pub args: Vec<String>,
    /// Working directory for the server process
    pub working_dir: Option<PathBuf>,
    /// Base API URL used for the readiness probe
    pub base_url: String,
    /// How long to wait for the server to answer its health endpoint
    pub ready_timeout: Duration,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python"),
            args: vec!["backend/server.py".to_string()],
            working_dir: None,
            base_url: crate::transport::DEFAULT_BASE_URL.to_string(),
            ready_timeout: Duration::from_secs(30),
        }
    }
}

impl SidecarConfig {
    /// Sets the program to run
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets the program arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the working directory
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Sets the base API URL for the readiness probe
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the readiness timeout
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// URL of the health endpoint probed during startup
    pub fn health_url(&self) -> String {
        format!("{}/health", self.base_url)
    }
}

// =============================================================================
// Sidecar Manager
// =============================================================================

/// Manages the detection server child process
pub struct DetectionSidecar {
    config: SidecarConfig,
    process: Option<Child>,
}

impl DetectionSidecar {
    /// Creates a new sidecar manager with the given configuration
    pub fn new(config: SidecarConfig) -> Self {
        Self {
            config,
            process: None,
        }
    }

    /// Starts the server process and waits for it to answer health probes.
    pub async fn start(&mut self) -> SidecarResult<()> {
        // Explicit paths are checked up front; bare program names are left to
        // PATH resolution at spawn time.
        if self.config.program.components().count() > 1 && !self.config.program.exists() {
            return Err(SidecarError::ProgramNotFound(
                self.config.program.to_string_lossy().to_string(),
            ));
        }

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args);
        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let process = cmd
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SidecarError::StartFailed(e.to_string()))?;

        tracing::info!(
            "Started detection server: {} (PID: {:?})",
            self.config.program.display(),
            process.id()
        );

        self.process = Some(process);

        self.wait_for_ready(self.config.ready_timeout).await?;

        Ok(())
    }

    /// Stops the server process
    pub async fn stop(&mut self) -> SidecarResult<()> {
        if let Some(mut process) = self.process.take() {
            tracing::info!("Stopping detection server...");
            process.kill().await?;
            tracing::info!("Detection server stopped");
        }
        Ok(())
    }

    /// Checks if the server process is running
    pub fn is_running(&mut self) -> bool {
        if let Some(ref mut process) = self.process {
            match process.try_wait() {
                Ok(None) => true,
                Ok(Some(_)) => false,
                Err(_) => false,
            }
        } else {
            false
        }
    }

    /// Waits for the server to answer its health endpoint
    async fn wait_for_ready(&self, timeout: Duration) -> SidecarResult<()> {
        let start = std::time::Instant::now();
        let client = reqwest::Client::new();
        let health_url = self.config.health_url();

        while start.elapsed() < timeout {
            match client.get(&health_url).send().await {
                Ok(response) if response.status().is_success() => {
                    tracing::info!("Detection server is ready");
                    return Ok(());
                }
                _ => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
            }
        }

        Err(SidecarError::NotReady(
            "Timed out waiting for the detection server to start".to_string(),
        ))
    }

    /// Returns the configuration
    pub fn config(&self) -> &SidecarConfig {
        &self.config
    }
}

impl Drop for DetectionSidecar {
    fn drop(&mut self) {
        // kill_on_drop is already set, but be explicit.
        if let Some(mut process) = self.process.take() {
            let _ = process.start_kill();
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = SidecarConfig::default();
        assert_eq!(config.program, PathBuf::from("python"));
        assert_eq!(config.args, vec!["backend/server.py".to_string()]);
        assert_eq!(config.base_url, "http://localhost:5000/api");
        assert_eq!(config.ready_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_config_builder() {
        let config = SidecarConfig::default()
            .with_program("/opt/detector/serve")
            .with_args(["--port", "5050"])
            .with_working_dir("/opt/detector")
            .with_base_url("http://localhost:5050/api/")
            .with_ready_timeout(Duration::from_secs(5));

        assert_eq!(config.program, PathBuf::from("/opt/detector/serve"));
        assert_eq!(config.args, vec!["--port".to_string(), "5050".to_string()]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/opt/detector")));
        assert_eq!(config.base_url, "http://localhost:5050/api");
        assert_eq!(config.health_url(), "http://localhost:5050/api/health");
    }

    #[test]
    fn test_not_running_before_start() {
        let mut sidecar = DetectionSidecar::new(SidecarConfig::default());
        assert!(!sidecar.is_running());
    }

    #[tokio::test]
    async fn test_start_with_missing_explicit_path() {
        let config =
            SidecarConfig::default().with_program("/nonexistent/path/to/detection-server");
        let mut sidecar = DetectionSidecar::new(config);

        match sidecar.start().await {
            Err(SidecarError::ProgramNotFound(path)) => {
                assert!(path.contains("nonexistent"));
            }
            other => panic!("Expected ProgramNotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let mut sidecar = DetectionSidecar::new(SidecarConfig::default());
        assert!(sidecar.stop().await.is_ok());
    }
}
