//! Human-readable run summary.

use charuco_dataset_calib::{CalibrationFailure, CalibrationReport, Intrinsics};
use charuco_dataset_charuco::DetectError;
use std::fmt;

/// Why an image produced no detection.
#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    Detect(DetectError),
    /// The file could not be decoded.
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Detect(e) => write!(f, "{e}"),
            Self::Unreadable(e) => write!(f, "unreadable image: {e}"),
        }
    }
}

/// An image left out before calibration.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectionSkip {
    pub image_id: String,
    pub reason: SkipReason,
}

/// What a pipeline run did, plus the lines printed at the end.
#[derive(Clone, Debug, Default)]
pub struct RunSummary {
    pub images: usize,
    pub skipped: Vec<DetectionSkip>,
    pub calibration: Option<CalibrationReport>,
    pub calibration_error: Option<CalibrationFailure>,
    /// Frames written to `transforms.json`; `None` when no manifest was written.
    pub estimated_poses: Option<usize>,
    lines: Vec<String>,
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

impl RunSummary {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub(crate) fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub(crate) fn record_start(&mut self, images: usize) {
        self.images = images;
        self.push(format!("Starting with {images} images"));
    }

    pub(crate) fn record_skips(&mut self, skipped: Vec<DetectionSkip>) {
        if !skipped.is_empty() {
            self.push(format!("{} skipped", plural(skipped.len(), "image")));
            for skip in &skipped {
                self.push(format!("  {}: {}", skip.image_id, skip.reason));
            }
        }
        self.skipped = skipped;
    }

    pub(crate) fn record_calibration(&mut self, intrinsics: &Intrinsics, report: CalibrationReport) {
        for drop in &report.dropped {
            self.push(format!(
                "Dropped {} during calibration: {}",
                drop.image_id, drop.reason
            ));
        }
        self.push(format!("Calibration {}", report.stats));
        if !intrinsics.flags.is_empty() {
            let flags: Vec<&str> = intrinsics.flags.iter().map(|f| f.as_str()).collect();
            self.push(format!("Calibration flags: {}", flags.join(", ")));
        }
        self.calibration = Some(report);
    }

    pub(crate) fn record_calibration_failure(&mut self, err: CalibrationFailure) {
        self.push(format!(
            "Calibration failed ({err}), transform generation skipped"
        ));
        self.calibration_error = Some(err);
    }

    pub(crate) fn record_estimated(&mut self, frames: usize) {
        self.push(format!("Estimated pose for {frames} images"));
        self.estimated_poses = Some(frames);
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{line}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skip_lines_are_pluralized() {
        let mut summary = RunSummary::default();
        summary.record_start(10);
        summary.record_skips(vec![DetectionSkip {
            image_id: "frame_00004.png".into(),
            reason: SkipReason::Detect(DetectError::NoMarkers),
        }]);
        assert_eq!(summary.lines()[0], "Starting with 10 images");
        assert_eq!(summary.lines()[1], "1 image skipped");
        assert_eq!(
            summary.lines()[2],
            "  frame_00004.png: no board markers decoded"
        );

        let mut summary = RunSummary::default();
        summary.record_skips(vec![
            DetectionSkip {
                image_id: "a".into(),
                reason: SkipReason::Unreadable("bad".into()),
            };
            2
        ]);
        assert_eq!(summary.lines()[0], "2 images skipped");
    }

    #[test]
    fn no_skip_line_without_skips() {
        let mut summary = RunSummary::default();
        summary.record_skips(Vec::new());
        summary.record_estimated(9);
        assert_eq!(summary.lines(), ["Estimated pose for 9 images"]);
        assert_eq!(summary.to_string(), "Estimated pose for 9 images\n");
    }

    #[test]
    fn calibration_failure_line() {
        let mut summary = RunSummary::default();
        summary.record_calibration_failure(CalibrationFailure::TooFewFrames {
            attempted: 2,
            required: 5,
        });
        assert_eq!(
            summary.lines()[0],
            "Calibration failed (only 2 usable frames, 5 required), transform generation skipped"
        );
        assert!(summary.estimated_poses.is_none());
    }
}
