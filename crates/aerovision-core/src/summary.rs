//! Detection Summary & Class Buckets
//!
//! Client-side classification of detected object classes into display
//! buckets, and aggregation across frame results.

use serde::{Deserialize, Serialize};

use crate::protocol::{Detection, FrameResult};

// =============================================================================
// Class Buckets
// =============================================================================

/// Display bucket for a detected object class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassBucket {
    Soldier,
    Civilian,
    Other,
}

impl ClassBucket {
    /// Classifies a class name by case-insensitive exact match.
    ///
    /// Anything other than "soldier" or "civilian" lands in `Other`.
    pub fn classify(class_name: &str) -> Self {
        if class_name.eq_ignore_ascii_case("soldier") {
            ClassBucket::Soldier
        } else if class_name.eq_ignore_ascii_case("civilian") {
            ClassBucket::Civilian
        } else {
            ClassBucket::Other
        }
    }
}

// =============================================================================
// Detection Summary
// =============================================================================

/// Aggregate bucket counts across all received detections.
///
/// Always rebuilt from the full frame history, never updated incrementally,
/// so re-applying the same payload yields identical counts.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSummary {
    pub soldiers: u64,
    pub civilians: u64,
    pub other: u64,
}

impl DetectionSummary {
    /// Aggregates a flat detection array (image path)
    pub fn from_detections(detections: &[Detection]) -> Self {
        let mut summary = Self::default();
        for det in detections {
            summary.add(det);
        }
        summary
    }

    /// Aggregates every detection across every frame (video path)
    pub fn from_frames(frames: &[FrameResult]) -> Self {
        let mut summary = Self::default();
        for frame in frames {
            for det in &frame.detections {
                summary.add(det);
            }
        }
        summary
    }

    fn add(&mut self, det: &Detection) {
        match ClassBucket::classify(&det.class_name) {
            ClassBucket::Soldier => self.soldiers += 1,
            ClassBucket::Civilian => self.civilians += 1,
            ClassBucket::Other => self.other += 1,
        }
    }

    /// Total detections across all buckets
    pub fn total(&self) -> u64 {
        self.soldiers + self.civilians + self.other
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(classes: &[&str]) -> FrameResult {
        FrameResult {
            frame: 0,
            count: classes.len() as u64,
            detections: classes.iter().map(|c| Detection::new(*c, 0.9)).collect(),
            timestamp: 0.0,
        }
    }

    #[test]
    fn test_classify_case_insensitive_exact() {
        assert_eq!(ClassBucket::classify("soldier"), ClassBucket::Soldier);
        assert_eq!(ClassBucket::classify("Soldier"), ClassBucket::Soldier);
        assert_eq!(ClassBucket::classify("SOLDIER"), ClassBucket::Soldier);
        assert_eq!(ClassBucket::classify("civilian"), ClassBucket::Civilian);
        assert_eq!(ClassBucket::classify("CiViLiAn"), ClassBucket::Civilian);
    }

    #[test]
    fn test_classify_unknown_goes_to_other() {
        assert_eq!(ClassBucket::classify("vehicle"), ClassBucket::Other);
        assert_eq!(ClassBucket::classify("soldiers"), ClassBucket::Other);
        assert_eq!(ClassBucket::classify(" soldier"), ClassBucket::Other);
        assert_eq!(ClassBucket::classify(""), ClassBucket::Other);
    }

    #[test]
    fn test_total_equals_bucket_sum() {
        let summary = DetectionSummary::from_detections(&[
            Detection::new("Soldier", 0.9),
            Detection::new("civilian", 0.8),
            Detection::new("civilian", 0.7),
            Detection::new("dog", 0.6),
        ]);
        assert_eq!(summary.soldiers, 1);
        assert_eq!(summary.civilians, 2);
        assert_eq!(summary.other, 1);
        assert_eq!(summary.total(), summary.soldiers + summary.civilians + summary.other);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_from_frames_scans_every_frame() {
        let frames = vec![
            frame(&["Soldier"]),
            frame(&["civilian", "SOLDIER"]),
            frame(&[]),
            frame(&["tank"]),
        ];
        let summary = DetectionSummary::from_frames(&frames);
        assert_eq!(summary.soldiers, 2);
        assert_eq!(summary.civilians, 1);
        assert_eq!(summary.other, 1);
        assert_eq!(summary.total(), 4);
    }

    #[test]
    fn test_aggregation_is_idempotent() {
        let frames = vec![frame(&["Soldier", "civilian"]), frame(&["soldier"])];
        let first = DetectionSummary::from_frames(&frames);
        let second = DetectionSummary::from_frames(&frames);
        assert_eq!(first, second);
    }
}
