//! Technical indicators used by the triple-timeframe evaluator.

use super::signal::Oscillator;

/// Simple moving average.
///
/// Returns one value per full window, so the output is `window - 1` shorter
/// than the input and aligned to its end. A NaN input only affects the
/// windows that contain it.
pub fn sma(values: &[f64], window: usize) -> Vec<f64> {
    if window == 0 || values.len() < window {
        return vec![];
    }

    let window_f64 = window as f64;
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window_f64)
        .collect()
}

/// Stochastic oscillator over smoothed highs and lows.
///
/// Fast %K compares the close with the rolling mean of highs and lows over
/// `fast_k` bars; %K is the `k`-bar mean of fast %K and %D the `d`-bar mean
/// of %K. Output is aligned to the end of the input.
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    fast_k: usize,
    k: usize,
    d: usize,
) -> Vec<Oscillator> {
    let len = high.len().min(low.len()).min(close.len());
    if fast_k == 0 || len < fast_k {
        return vec![];
    }

    let rolling_high = sma(&high[high.len() - len..], fast_k);
    let rolling_low = sma(&low[low.len() - len..], fast_k);
    let closes = &close[close.len() - len + fast_k - 1..];

    let fast: Vec<f64> = rolling_high
        .iter()
        .zip(&rolling_low)
        .zip(closes)
        // A zero range has no defined position and yields NaN.
        .map(|((h, l), c)| (c - l) / (h - l) * 100.0)
        .collect();

    let k_line = sma(&fast, k);
    let d_line = sma(&k_line, d);
    let offset = k_line.len().saturating_sub(d_line.len());

    d_line
        .iter()
        .enumerate()
        .map(|(i, d)| Oscillator {
            k: k_line[i + offset],
            d: *d,
        })
        .collect()
}

/// Whether `x` lies within `range_percent` of `y` (either sign of `y`).
pub fn is_in_range(x: f64, y: f64, range_percent: f64) -> bool {
    let bottom = y / 100.0 * (100.0 - range_percent);
    let top = y / 100.0 * (100.0 + range_percent);
    (bottom <= x && x <= top) || (top <= x && x <= bottom)
}

/// Whether values rise (non-strictly) walking back from the last one in
/// steps of `step`.
///
/// With `step == 1` every consecutive pair is compared; with larger steps the
/// walk stops before reaching the first `step` entries.
pub fn is_trending_up(values: &[f64], step: usize) -> bool {
    if step == 0 || values.len() < 2 {
        return false;
    }

    let end = if step == 1 { 0 } else { step };
    let mut trending = false;
    let mut i = values.len() - 1;

    while i > end && i >= step {
        if values[i] >= values[i - step] {
            trending = true;
        } else {
            return false;
        }
        i -= step;
    }

    trending
}
