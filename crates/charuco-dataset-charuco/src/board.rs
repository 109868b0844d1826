//! Board specification and layout helpers for ChArUco.
//!
//! Layout: square `(sx, sy)` is black when `sx + sy` is even, so the top-left
//! square is black. Markers are centred in the white squares and numbered
//! row-major over them. Inner chessboard corner `(i, j)` with
//! `1 <= i < squares_x` and `1 <= j < squares_y` has id
//! `(j - 1) * (squares_x - 1) + (i - 1)`.
//!
//! Board frame: origin at the top-left board corner, X right, Y down, Z into
//! the board. All board points lie on `Z = 0`.

use charuco_dataset_aruco::{Dictionary, DictionaryId};
use nalgebra::{Point2, Point3};
use serde::{Deserialize, Serialize};

/// Static ChArUco board specification.
///
/// `squares_x`/`squares_y` are **square counts** (not inner corner counts).
/// Lengths share one physical unit; poses come out in that unit.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardSpec {
    pub squares_x: u32,
    pub squares_y: u32,
    pub square_length: f64,
    pub marker_length: f64,
    pub dictionary: DictionaryId,
}

/// Board specification validation errors.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum BoardError {
    #[error("squares_x and squares_y must be >= 2 (got {squares_x}x{squares_y})")]
    InvalidSize { squares_x: u32, squares_y: u32 },
    #[error("square_length must be a positive finite number (got {0})")]
    InvalidSquareLength(f64),
    #[error("marker_length must be positive and smaller than square_length (got {marker_length} vs {square_length})")]
    InvalidMarkerLength {
        marker_length: f64,
        square_length: f64,
    },
    #[error("board needs {needed} markers, dictionary {dictionary} has {available}")]
    NotEnoughDictionaryCodes {
        dictionary: DictionaryId,
        needed: usize,
        available: usize,
    },
}

/// Validated board with precomputed marker placement.
#[derive(Clone, Debug)]
pub struct CharucoBoard {
    spec: BoardSpec,
    dictionary: Dictionary,
    marker_cells: Vec<[u32; 2]>,
}

impl CharucoBoard {
    /// Validate and create a board from a spec.
    pub fn new(spec: BoardSpec) -> Result<Self, BoardError> {
        if spec.squares_x < 2 || spec.squares_y < 2 {
            return Err(BoardError::InvalidSize {
                squares_x: spec.squares_x,
                squares_y: spec.squares_y,
            });
        }
        if !spec.square_length.is_finite() || spec.square_length <= 0.0 {
            return Err(BoardError::InvalidSquareLength(spec.square_length));
        }
        if !spec.marker_length.is_finite()
            || spec.marker_length <= 0.0
            || spec.marker_length >= spec.square_length
        {
            return Err(BoardError::InvalidMarkerLength {
                marker_length: spec.marker_length,
                square_length: spec.square_length,
            });
        }

        let mut marker_cells = Vec::new();
        for sy in 0..spec.squares_y {
            for sx in 0..spec.squares_x {
                if (sx + sy) % 2 == 1 {
                    marker_cells.push([sx, sy]);
                }
            }
        }

        let dictionary = spec.dictionary.dictionary();
        let needed = marker_cells.len();
        let available = dictionary.codes.len();
        if available < needed {
            return Err(BoardError::NotEnoughDictionaryCodes {
                dictionary: spec.dictionary,
                needed,
                available,
            });
        }

        Ok(Self {
            spec,
            dictionary,
            marker_cells,
        })
    }

    #[inline]
    pub fn spec(&self) -> &BoardSpec {
        &self.spec
    }

    #[inline]
    pub fn dictionary(&self) -> Dictionary {
        self.dictionary
    }

    #[inline]
    pub fn marker_count(&self) -> usize {
        self.marker_cells.len()
    }

    /// Number of inner chessboard corners.
    #[inline]
    pub fn corner_count(&self) -> usize {
        ((self.spec.squares_x - 1) * (self.spec.squares_y - 1)) as usize
    }

    /// Physical board size (width, height) without any print margin.
    pub fn size(&self) -> (f64, f64) {
        (
            self.spec.squares_x as f64 * self.spec.square_length,
            self.spec.squares_y as f64 * self.spec.square_length,
        )
    }

    /// White gap between a marker and the edges of its square.
    #[inline]
    pub fn marker_margin(&self) -> f64 {
        0.5 * (self.spec.square_length - self.spec.marker_length)
    }

    #[inline]
    pub fn is_black_square(&self, sx: u32, sy: u32) -> bool {
        (sx + sy) % 2 == 0
    }

    /// Square cell `(sx, sy)` holding marker `id`.
    #[inline]
    pub fn marker_cell(&self, id: u32) -> Option<[u32; 2]> {
        self.marker_cells.get(id as usize).copied()
    }

    /// Marker id in square `(sx, sy)`, if that square is white.
    pub fn marker_at(&self, sx: u32, sy: u32) -> Option<u32> {
        if sx >= self.spec.squares_x || sy >= self.spec.squares_y || self.is_black_square(sx, sy) {
            return None;
        }
        // even rows hold floor(w/2) white squares, odd rows ceil(w/2)
        let w = self.spec.squares_x;
        let before_rows = (sy / 2) * w + (sy % 2) * (w / 2);
        let first_white = (sy + 1) % 2;
        Some(before_rows + (sx - first_white) / 2)
    }

    /// Board-frame outline of marker `id` (printed TL, TR, BR, BL).
    pub fn marker_corners(&self, id: u32) -> Option<[Point3<f64>; 4]> {
        let [sx, sy] = self.marker_cell(id)?;
        let l = self.spec.square_length;
        let m = self.marker_margin();
        let x0 = sx as f64 * l + m;
        let y0 = sy as f64 * l + m;
        let x1 = x0 + self.spec.marker_length;
        let y1 = y0 + self.spec.marker_length;
        Some([
            Point3::new(x0, y0, 0.0),
            Point3::new(x1, y0, 0.0),
            Point3::new(x1, y1, 0.0),
            Point3::new(x0, y1, 0.0),
        ])
    }

    /// Id of inner corner `(i, j)` in corner-grid coordinates.
    pub fn corner_id(&self, i: u32, j: u32) -> Option<u32> {
        if i == 0 || j == 0 || i >= self.spec.squares_x || j >= self.spec.squares_y {
            return None;
        }
        Some((j - 1) * (self.spec.squares_x - 1) + (i - 1))
    }

    /// Corner-grid coordinates `(i, j)` of corner `id`.
    pub fn corner_grid(&self, id: u32) -> Option<(u32, u32)> {
        if id as usize >= self.corner_count() {
            return None;
        }
        let stride = self.spec.squares_x - 1;
        Some((id % stride + 1, id / stride + 1))
    }

    /// Board-frame position of corner `id`.
    pub fn corner_point(&self, id: u32) -> Option<Point3<f64>> {
        let (i, j) = self.corner_grid(id)?;
        let l = self.spec.square_length;
        Some(Point3::new(i as f64 * l, j as f64 * l, 0.0))
    }

    /// All inner corners in id order.
    pub fn corner_points(&self) -> impl Iterator<Item = (u32, Point3<f64>)> + '_ {
        (0..self.corner_count() as u32).filter_map(|id| self.corner_point(id).map(|p| (id, p)))
    }

    /// The two markers sharing a diagonal at corner `id`.
    pub fn corner_markers(&self, id: u32) -> Vec<u32> {
        let Some((i, j)) = self.corner_grid(id) else {
            return Vec::new();
        };
        [(i - 1, j - 1), (i, j - 1), (i - 1, j), (i, j)]
            .into_iter()
            .filter_map(|(sx, sy)| self.marker_at(sx, sy))
            .collect()
    }

    /// Inner corners touching the square of marker `id`.
    pub fn marker_neighbor_corners(&self, id: u32) -> Vec<u32> {
        let Some([sx, sy]) = self.marker_cell(id) else {
            return Vec::new();
        };
        [(sx, sy), (sx + 1, sy), (sx + 1, sy + 1), (sx, sy + 1)]
            .into_iter()
            .filter_map(|(i, j)| self.corner_id(i, j))
            .collect()
    }

    /// Printed colour at board point `p`: `Some(true)` for black,
    /// `Some(false)` for white, `None` outside the squares.
    pub fn is_black_at(&self, p: Point2<f64>) -> Option<bool> {
        let (w, h) = self.size();
        if !(0.0..w).contains(&p.x) || !(0.0..h).contains(&p.y) {
            return None;
        }
        let l = self.spec.square_length;
        let sx = ((p.x / l).floor() as u32).min(self.spec.squares_x - 1);
        let sy = ((p.y / l).floor() as u32).min(self.spec.squares_y - 1);
        if self.is_black_square(sx, sy) {
            return Some(true);
        }

        let m = self.marker_margin();
        let u = p.x - sx as f64 * l - m;
        let v = p.y - sy as f64 * l - m;
        let ml = self.spec.marker_length;
        if u < 0.0 || v < 0.0 || u >= ml || v >= ml {
            return Some(false);
        }

        let n = self.dictionary.marker_size;
        let cells = n + 2;
        let cell = ml / cells as f64;
        let cx = ((u / cell) as usize).min(cells - 1);
        let cy = ((v / cell) as usize).min(cells - 1);
        if cx == 0 || cy == 0 || cx == cells - 1 || cy == cells - 1 {
            return Some(true);
        }
        let id = self.marker_at(sx, sy)?;
        self.dictionary.is_black(id, cx - 1, cy - 1)
    }
}
