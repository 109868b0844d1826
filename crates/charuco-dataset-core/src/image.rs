/// Borrowed 8-bit grayscale image, row-major.
#[derive(Clone, Copy, Debug)]
pub struct GrayImageView<'a> {
    pub width: usize,
    pub height: usize,
    pub data: &'a [u8], // len = w*h
}

/// Owned 8-bit grayscale image, row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct GrayImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl GrayImage {
    /// Image filled with a constant value.
    pub fn filled(width: usize, height: usize, value: u8) -> Self {
        Self {
            width,
            height,
            data: vec![value; width * height],
        }
    }

    #[inline]
    pub fn view(&self) -> GrayImageView<'_> {
        GrayImageView {
            width: self.width,
            height: self.height,
            data: &self.data,
        }
    }
}

impl GrayImageView<'_> {
    /// Pixel value with coordinates clamped to the image.
    #[inline]
    pub fn get_clamped(&self, x: i64, y: i64) -> u8 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u8 {
        self.data[y * self.width + x]
    }

    /// True when the buffer length matches `width * height` and both are non-zero.
    pub fn is_consistent(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.width * self.height
    }
}

/// Bilinear sample with pixel centers at integer coordinates.
///
/// Coordinates outside the image are clamped to the border.
#[inline]
pub fn sample_bilinear(src: &GrayImageView<'_>, x: f64, y: f64) -> f64 {
    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let x0 = x0 as i64;
    let y0 = y0 as i64;

    let p00 = src.get_clamped(x0, y0) as f64;
    let p10 = src.get_clamped(x0 + 1, y0) as f64;
    let p01 = src.get_clamped(x0, y0 + 1) as f64;
    let p11 = src.get_clamped(x0 + 1, y0 + 1) as f64;

    let a = p00 + fx * (p10 - p00);
    let b = p01 + fx * (p11 - p01);
    a + fy * (b - a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let img = GrayImage {
            width: 2,
            height: 2,
            data: vec![0, 100, 100, 200],
        };
        let view = img.view();
        assert_abs_diff_eq!(sample_bilinear(&view, 0.0, 0.0), 0.0);
        assert_abs_diff_eq!(sample_bilinear(&view, 0.5, 0.0), 50.0);
        assert_abs_diff_eq!(sample_bilinear(&view, 0.5, 0.5), 100.0);
        assert_abs_diff_eq!(sample_bilinear(&view, 1.0, 1.0), 200.0);
    }

    #[test]
    fn out_of_bounds_samples_clamp_to_border() {
        let img = GrayImage::filled(3, 3, 42);
        let view = img.view();
        assert_abs_diff_eq!(sample_bilinear(&view, -5.0, 1.0), 42.0);
        assert_abs_diff_eq!(sample_bilinear(&view, 10.0, 10.0), 42.0);
    }
}
