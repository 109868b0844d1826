//! Thresholding utilities for marker decoding.

/// Otsu threshold over a set of sample intensities.
///
/// Samples `<= threshold` belong to the dark class.
pub(crate) fn otsu_threshold(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 127.5;
    }

    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    if sorted[0] == sorted[n - 1] {
        return sorted[0];
    }

    let total: f64 = sorted.iter().sum();
    let mut sum_b = 0.0;
    let mut best_var = -1.0;
    let mut best_t = 0.5 * (sorted[0] + sorted[n - 1]);

    // Split after index `i`: dark = sorted[..=i], light = sorted[i+1..]
    for i in 0..n - 1 {
        sum_b += sorted[i];
        if sorted[i] == sorted[i + 1] {
            continue;
        }
        let w_b = (i + 1) as f64;
        let w_f = (n - i - 1) as f64;
        let m_b = sum_b / w_b;
        let m_f = (total - sum_b) / w_f;
        let var_between = w_b * w_f * (m_b - m_f) * (m_b - m_f);
        if var_between > best_var {
            best_var = var_between;
            best_t = 0.5 * (sorted[i] + sorted[i + 1]);
        }
    }

    best_t
}
