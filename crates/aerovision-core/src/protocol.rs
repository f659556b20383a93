//! Detection Server Wire Protocol
//!
//! Serde models for the JSON bodies exchanged with the detection server.
//! Optional fields default so partial payloads from older server builds
//! still deserialize.

use serde::{Deserialize, Serialize};
use tracing::warn;

// =============================================================================
// Health
// =============================================================================

/// Response from `GET /health`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Server status string; `"running"` means online
    #[serde(default)]
    pub status: String,
    /// Whether a detection model is loaded
    #[serde(default)]
    pub model_loaded: bool,
    /// Compute device in use (e.g. "cuda", "cpu"; "N/A" when no model)
    #[serde(default = "default_device")]
    pub device: String,
    /// Name of the currently loaded model, if any
    #[serde(default)]
    pub current_model: Option<String>,
}

fn default_device() -> String {
    "N/A".to_string()
}

impl HealthResponse {
    /// Returns true if the server reports itself as running
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

// =============================================================================
// Upload
// =============================================================================

/// Response from `POST /upload`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub success: bool,
    /// Server-issued filename token
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// Detections
// =============================================================================

/// A single detected object
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Object class name as reported by the model (e.g. "soldier")
    #[serde(rename = "class")]
    pub class_name: String,
    /// Detection confidence (0.0 - 1.0)
    #[serde(default)]
    pub confidence: f64,
    /// Bounding box corners `[x1, y1, x2, y2]` in pixels
    #[serde(default)]
    pub bbox: Option<[f64; 4]>,
}

impl Detection {
    /// Creates a new detection with the given class name
    pub fn new(class_name: impl Into<String>, confidence: f64) -> Self {
        Self {
            class_name: class_name.into(),
            confidence,
            bbox: None,
        }
    }

    /// Sets the bounding box
    pub fn with_bbox(mut self, bbox: [f64; 4]) -> Self {
        self.bbox = Some(bbox);
        self
    }
}

/// Detections for one processed video frame
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameResult {
    /// Source frame number
    #[serde(default)]
    pub frame: u64,
    /// Number of detections in this frame
    #[serde(default)]
    pub count: u64,
    /// Per-object detections
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Frame timestamp in seconds
    #[serde(default)]
    pub timestamp: f64,
}

// =============================================================================
// Image Detection
// =============================================================================

/// Response from `POST /detect/image`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageDetectionResponse {
    /// Annotated image, base64-encoded JPEG
    #[serde(default)]
    pub frame_base64: Option<String>,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Total detection count as reported by the server
    #[serde(default)]
    pub count: u64,
    /// Server-side filename of the annotated output
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// Video Submission
// =============================================================================

/// Request body for `POST /detect/video`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VideoDetectRequest {
    pub filename: String,
    /// Sampling stride - process every Nth frame
    pub frame_skip: u32,
}

/// Response from `POST /detect/video`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VideoSubmitResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// Job Status
// =============================================================================

/// Response from `GET /status/{job_id}`
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct JobStatusResponse {
    #[serde(default)]
    pub status: String,
    /// Completion percentage 0-100 as reported by the server
    #[serde(default)]
    pub progress: Option<f64>,
    /// All frame results accumulated so far (server sends the full list)
    #[serde(default)]
    pub detections: Vec<FrameResult>,
    /// Server-side filename of the annotated output video
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobStatusResponse {
    /// Parses the status string into a `JobState`
    pub fn state(&self) -> JobState {
        JobState::parse(&self.status)
    }
}

/// Lifecycle state of a server-tracked detection job
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Processing,
    Completed,
    Error,
}

impl JobState {
    /// Parses a server status string, case-insensitively.
    ///
    /// Unknown statuses map to `Processing` so a newer server build cannot
    /// strand the client in a stuck state.
    pub fn parse(status: &str) -> Self {
        match status.to_ascii_lowercase().as_str() {
            "queued" | "pending" => JobState::Queued,
            "processing" | "running" => JobState::Processing,
            "completed" => JobState::Completed,
            "error" | "failed" => JobState::Error,
            other => {
                warn!("Unknown job status from server: {}", other);
                JobState::Processing
            }
        }
    }

    /// Terminal states are absorbing - polling must stop once observed
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Error)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_running() {
        let json = r#"{"status":"running","model_loaded":true,"device":"cuda","current_model":"yolov8s.pt"}"#;
        let resp: HealthResponse = serde_json::from_str(json).unwrap();
        assert!(resp.is_running());
        assert!(resp.model_loaded);
        assert_eq!(resp.device, "cuda");
        assert_eq!(resp.current_model.as_deref(), Some("yolov8s.pt"));
    }

    #[test]
    fn test_health_response_defaults() {
        let resp: HealthResponse = serde_json::from_str("{}").unwrap();
        assert!(!resp.is_running());
        assert!(!resp.model_loaded);
        assert_eq!(resp.device, "N/A");
    }

    #[test]
    fn test_detection_deserializes_class_field() {
        let json = r#"{"class":"Soldier","confidence":0.91,"bbox":[10.0,20.0,110.0,220.0]}"#;
        let det: Detection = serde_json::from_str(json).unwrap();
        assert_eq!(det.class_name, "Soldier");
        assert!((det.confidence - 0.91).abs() < f64::EPSILON);
        assert_eq!(det.bbox, Some([10.0, 20.0, 110.0, 220.0]));
    }

    #[test]
    fn test_detection_tolerates_missing_geometry() {
        let det: Detection = serde_json::from_str(r#"{"class":"civilian"}"#).unwrap();
        assert_eq!(det.class_name, "civilian");
        assert_eq!(det.confidence, 0.0);
        assert!(det.bbox.is_none());
    }

    #[test]
    fn test_job_status_deserialization() {
        let json = r#"{
            "status": "processing",
            "progress": 40.0,
            "detections": [
                {"frame": 30, "count": 1, "detections": [{"class": "Soldier"}], "timestamp": 1.0}
            ],
            "output_file": "detected_clip.mp4"
        }"#;
        let status: JobStatusResponse = serde_json::from_str(json).unwrap();
        assert_eq!(status.state(), JobState::Processing);
        assert_eq!(status.progress, Some(40.0));
        assert_eq!(status.detections.len(), 1);
        assert_eq!(status.detections[0].detections[0].class_name, "Soldier");
    }

    #[test]
    fn test_job_state_parsing() {
        assert_eq!(JobState::parse("queued"), JobState::Queued);
        assert_eq!(JobState::parse("PROCESSING"), JobState::Processing);
        assert_eq!(JobState::parse("completed"), JobState::Completed);
        assert_eq!(JobState::parse("error"), JobState::Error);
        assert_eq!(JobState::parse("failed"), JobState::Error);
        // Unknown statuses must not be treated as terminal
        assert_eq!(JobState::parse("warming_up"), JobState::Processing);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Error.is_terminal());
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Processing.is_terminal());
    }

    #[test]
    fn test_upload_response_failure_shape() {
        let resp: UploadResponse =
            serde_json::from_str(r#"{"success":false,"error":"bad format"}"#).unwrap();
        assert!(!resp.success);
        assert_eq!(resp.error.as_deref(), Some("bad format"));
        assert!(resp.filename.is_none());
    }

    #[test]
    fn test_video_detect_request_serialization() {
        let req = VideoDetectRequest {
            filename: "clip.mp4".to_string(),
            frame_skip: 5,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"filename\":\"clip.mp4\""));
        assert!(json.contains("\"frame_skip\":5"));
    }
}
