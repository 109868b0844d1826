use super::corners::locate_corners;
use super::quads::find_quads;
use super::{DetectError, Detection, DetectorParams};
use crate::board::CharucoBoard;
use charuco_dataset_aruco::{decode_quad, MarkerDetection, Matcher};
use charuco_dataset_core::{estimate_homography, GrayImageView};
use log::debug;
use nalgebra::Point2;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Marker-first ChArUco detector.
///
/// Stateless across images: `detect` is a pure function of the image, the
/// board and the parameters, so one detector can be shared between threads.
#[derive(Clone, Debug)]
pub struct CharucoDetector {
    board: CharucoBoard,
    params: DetectorParams,
    matcher: Matcher,
}

impl CharucoDetector {
    /// Create a detector for a given board and parameters.
    pub fn new(board: CharucoBoard, params: DetectorParams) -> Self {
        let matcher = Matcher::new(board.dictionary(), params.decode.max_hamming);
        Self {
            board,
            params,
            matcher,
        }
    }

    #[inline]
    pub fn board(&self) -> &CharucoBoard {
        &self.board
    }

    #[inline]
    pub fn params(&self) -> &DetectorParams {
        &self.params
    }

    /// Detect board markers and chessboard corners in one image.
    #[cfg_attr(
        feature = "tracing",
        instrument(
            level = "debug",
            skip(self, image),
            fields(width = image.width, height = image.height)
        )
    )]
    pub fn detect(
        &self,
        image_id: &str,
        image: &GrayImageView<'_>,
    ) -> Result<Detection, DetectError> {
        if !image.is_consistent() {
            return Err(DetectError::InvalidImage {
                width: image.width,
                height: image.height,
                len: image.data.len(),
            });
        }

        let quads = find_quads(image, &self.params);
        let marker_count = self.board.marker_count() as u32;
        let decoded: Vec<MarkerDetection> = quads
            .iter()
            .filter_map(|q| decode_quad(image, q, &self.params.decode, &self.matcher))
            .filter(|m| m.id < marker_count)
            .collect();
        debug!(
            "{image_id}: {} quad candidates, {} board markers decoded",
            quads.len(),
            decoded.len()
        );

        let markers = dedup_markers(decoded)?;
        let markers = drop_inconsistent_markers(&self.board, markers, self.params.marker_outlier_frac);
        if markers.is_empty() {
            return Err(DetectError::NoMarkers);
        }

        let correspondences = locate_corners(image, &self.board, &markers, &self.params);
        debug!(
            "{image_id}: {} markers kept, {} corners localized",
            markers.len(),
            correspondences.len()
        );
        if correspondences.len() < self.params.min_corners {
            return Err(DetectError::TooFewCorners {
                found: correspondences.len(),
                required: self.params.min_corners,
            });
        }

        Ok(Detection {
            image_id: image_id.to_string(),
            width: image.width,
            height: image.height,
            correspondences,
            markers,
        })
    }
}

fn mean_side(m: &MarkerDetection) -> f64 {
    (0..4)
        .map(|i| (m.corners[(i + 1) % 4] - m.corners[i]).norm())
        .sum::<f64>()
        / 4.0
}

/// Merge repeated decodes of one physical marker; two distinct markers with the
/// same id make the image ambiguous.
fn dedup_markers(mut markers: Vec<MarkerDetection>) -> Result<Vec<MarkerDetection>, DetectError> {
    markers.sort_by(|a, b| a.id.cmp(&b.id).then(a.hamming.cmp(&b.hamming)));
    let mut out: Vec<MarkerDetection> = Vec::with_capacity(markers.len());
    for m in markers {
        if let Some(prev) = out.last() {
            if prev.id == m.id {
                if (prev.center() - m.center()).norm() < 0.25 * mean_side(prev) {
                    continue;
                }
                return Err(DetectError::AmbiguousMarkers { id: m.id });
            }
        }
        out.push(m);
    }
    Ok(out)
}

/// Iteratively drop the marker that deviates most from a board-to-image
/// homography fitted to all markers.
fn drop_inconsistent_markers(
    board: &CharucoBoard,
    mut markers: Vec<MarkerDetection>,
    max_frac: f64,
) -> Vec<MarkerDetection> {
    while markers.len() >= 3 {
        let mut src = Vec::with_capacity(4 * markers.len());
        let mut dst = Vec::with_capacity(4 * markers.len());
        for m in &markers {
            let Some(outline) = board.marker_corners(m.id) else {
                continue;
            };
            for (b, p) in outline.iter().zip(m.corners.iter()) {
                src.push(Point2::new(b.x, b.y));
                dst.push(*p);
            }
        }
        let Some(h) = estimate_homography(&src, &dst) else {
            break;
        };

        let mut worst: Option<(usize, f64)> = None;
        for (idx, m) in markers.iter().enumerate() {
            let Some(outline) = board.marker_corners(m.id) else {
                continue;
            };
            let err = outline
                .iter()
                .zip(m.corners.iter())
                .map(|(b, p)| (h.apply(Point2::new(b.x, b.y)) - p).norm())
                .fold(0.0, f64::max);
            let ratio = err / mean_side(m).max(1e-9);
            if worst.is_none_or(|(_, w)| ratio > w) {
                worst = Some((idx, ratio));
            }
        }

        match worst {
            Some((idx, ratio)) if ratio > max_frac => {
                debug!("dropping marker {} (board fit error {:.2} sides)", markers[idx].id, ratio);
                markers.remove(idx);
            }
            _ => break,
        }
    }
    markers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(id: u32, hamming: u8, cx: f64, cy: f64) -> MarkerDetection {
        let h = 10.0;
        MarkerDetection {
            id,
            rotation: 0,
            hamming,
            border_score: 1.0,
            contrast: 120.0,
            code: 0,
            corners: [
                Point2::new(cx - h, cy - h),
                Point2::new(cx + h, cy - h),
                Point2::new(cx + h, cy + h),
                Point2::new(cx - h, cy + h),
            ],
        }
    }

    #[test]
    fn repeated_decode_of_one_marker_is_merged() {
        let markers = vec![
            marker(7, 1, 101.0, 50.5),
            marker(3, 0, 300.0, 40.0),
            marker(7, 0, 100.0, 50.0),
        ];
        let out = dedup_markers(markers).unwrap();
        assert_eq!(out.iter().map(|m| m.id).collect::<Vec<_>>(), vec![3, 7]);
        assert_eq!(out[1].hamming, 0);
    }

    #[test]
    fn same_id_in_two_places_is_ambiguous() {
        let markers = vec![
            marker(7, 0, 100.0, 50.0),
            marker(2, 0, 200.0, 50.0),
            marker(7, 0, 400.0, 260.0),
        ];
        assert_eq!(
            dedup_markers(markers).unwrap_err(),
            DetectError::AmbiguousMarkers { id: 7 }
        );
    }
}
