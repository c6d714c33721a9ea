//! Resampling helpers used to bring the sparse thermal envelope up to the
//! vibration sample count and then back down to the thermal update rate.

use rustfft::{num_complex::Complex64, FftPlanner};

/// Linearly interpolates `arr` at a fractional index. The index is clamped to
/// the array, so `0.0` and `len - 1` hit the endpoints exactly.
pub fn interp_index(arr: &[f64], index: f64) -> f64 {
    debug_assert!(!arr.is_empty());
    let last = arr.len() - 1;
    let index = index.clamp(0.0, last as f64);
    let lower = index.floor() as usize;
    let upper = (index.ceil() as usize).min(last);
    let weight = index - lower as f64;
    arr[lower] * (1.0 - weight) + arr[upper] * weight
}

/// Stretches `arr` onto `len` evenly spaced points spanning its first and last
/// element, interpolating linearly in between.
pub fn stretch_linear(arr: &[f64], len: usize) -> Vec<f64> {
    match (arr.len(), len) {
        (_, 0) => Vec::new(),
        (0, _) => vec![0.0; len],
        (_, 1) => vec![arr[0]],
        (n, _) => {
            let step = (n - 1) as f64 / (len - 1) as f64;
            (0..len).map(|j| interp_index(arr, j as f64 * step)).collect()
        }
    }
}

/// Band-limited resampling of `signal` to `num` points.
///
/// The signal is treated as one period of a periodic sequence: its spectrum is
/// truncated (or zero padded) to `num` bins and transformed back. Energy above
/// the new Nyquist frequency is discarded rather than folded back, which is
/// the point of doing this instead of picking every n-th sample.
pub fn resample_fourier(signal: &[f64], num: usize) -> Vec<f64> {
    let nx = signal.len();
    if num == 0 || nx == 0 {
        return vec![0.0; num];
    }
    if num == nx {
        return signal.to_vec();
    }

    let mut planner = FftPlanner::<f64>::new();

    let mut spectrum: Vec<Complex64> = signal.iter().map(|&s| Complex64::new(s, 0.0)).collect();
    planner.plan_fft_forward(nx).process(&mut spectrum);

    let n = num.min(nx);
    let nyq = n / 2 + 1;
    let mut resampled = vec![Complex64::new(0.0, 0.0); num];

    // Positive frequencies, including Nyquist when n is even
    resampled[..nyq].copy_from_slice(&spectrum[..nyq]);
    // Negative frequencies
    for j in 1..=n.saturating_sub(nyq) {
        resampled[num - j] = spectrum[nx - j];
    }

    if n % 2 == 0 {
        let half = n / 2;
        if num < nx {
            // fold the -n/2 bin onto +n/2, which is the same bin after truncation
            resampled[half] += spectrum[nx - half];
        } else {
            let split = resampled[half] * 0.5;
            resampled[half] = split;
            resampled[num - half] = split;
        }
    }

    planner.plan_fft_inverse(num).process(&mut resampled);

    // rustfft leaves the inverse unnormalized: 1/num for the transform, times
    // num/nx for the change in length
    resampled.iter().map(|c| c.re / nx as f64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn close(a: &[f64], b: &[f64], tol: f64) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < tol)
    }

    #[test]
    fn interp_hits_endpoints_and_midpoints() {
        let arr = [0.0, 1.0, 0.5];
        assert_eq!(interp_index(&arr, 0.0), 0.0);
        assert_eq!(interp_index(&arr, 2.0), 0.5);
        assert!((interp_index(&arr, 0.5) - 0.5).abs() < 1e-12);
        assert!((interp_index(&arr, 1.5) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn stretch_spans_the_whole_array() {
        let out = stretch_linear(&[0.0, 2.0, 0.0], 5);
        assert!(close(&out, &[0.0, 1.0, 2.0, 1.0, 0.0], 1e-12));

        assert_eq!(stretch_linear(&[3.0], 4), vec![3.0; 4]);
        assert!(stretch_linear(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn constant_signal_survives_downsampling() {
        let out = resample_fourier(&[1.5; 1000], 10);
        assert!(close(&out, &[1.5; 10], 1e-9));
    }

    #[test]
    fn low_tone_is_preserved() {
        // two cycles over the window, well under the new Nyquist
        let nx = 400;
        let tone = |n: usize| -> Vec<f64> {
            (0..n)
                .map(|i| (2.0 * PI * 2.0 * i as f64 / n as f64).sin())
                .collect()
        };
        let out = resample_fourier(&tone(nx), 40);
        assert!(close(&out, &tone(40), 1e-9));
    }

    #[test]
    fn high_tone_is_removed_not_aliased() {
        // 30 cycles over the window, above the Nyquist of a 40 point output
        let nx = 400;
        let signal: Vec<f64> = (0..nx)
            .map(|i| (2.0 * PI * 30.0 * i as f64 / nx as f64).cos())
            .collect();
        let out = resample_fourier(&signal, 40);
        assert!(out.iter().all(|v| v.abs() < 1e-9));
    }

    #[test]
    fn odd_lengths_and_upsampling() {
        let out = resample_fourier(&[2.0; 7], 3);
        assert!(close(&out, &[2.0; 3], 1e-9));

        let out = resample_fourier(&[2.0; 3], 8);
        assert!(close(&out, &[2.0; 8], 1e-9));
    }
}
