//! Statistics kernels.
//!
//! All functions take plain `f64` slices that are already null-free and
//! finite, and return `None` instead of NaN when a statistic is undefined.

use std::collections::HashMap;

/// Keep rows where both sides are present.
pub fn paired(x: &[Option<f64>], y: &[Option<f64>]) -> (Vec<f64>, Vec<f64>) {
    x.iter()
        .zip(y)
        .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
        .unzip()
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let sum: f64 = values.iter().sum();
    if sum.is_finite() {
        return Some(sum / n);
    }
    Some(values.iter().map(|v| v / n).sum())
}

/// Sample standard deviation (n - 1 denominator).
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values)?;
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some((ss / (values.len() - 1) as f64).sqrt())
}

pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    let first = *values.first()?;
    Some(
        values
            .iter()
            .fold((first, first), |(lo, hi), v| (lo.min(*v), hi.max(*v))),
    )
}

/// True when the values are not all equal.
pub fn varies(values: &[f64]) -> bool {
    min_max(values).is_some_and(|(lo, hi)| lo < hi)
}

/// Largest absolute value; divides a series into [-1, 1].
fn magnitude(values: &[f64]) -> f64 {
    values.iter().fold(0.0, |acc: f64, v| acc.max(v.abs()))
}

/// Centered sums of squares and cross-products of `x / sx` and `y / sy`.
struct Moments {
    sxx: f64,
    syy: f64,
    sxy: f64,
    sx: f64,
    sy: f64,
}

impl Moments {
    fn is_finite(&self) -> bool {
        self.sxx.is_finite() && self.syy.is_finite() && self.sxy.is_finite()
    }
}

/// Unscaled when the sums neither overflow nor underflow to zero, otherwise
/// over each side divided by its largest magnitude, which keeps every term
/// within [-4, 4].
fn moments(x: &[f64], y: &[f64]) -> Option<Moments> {
    let plain = centered_sums(x, y, 1.0, 1.0)?;
    let underflow = (plain.sxx == 0.0 && varies(x)) || (plain.syy == 0.0 && varies(y));
    if plain.is_finite() && !underflow {
        return Some(plain);
    }
    centered_sums(x, y, magnitude(x), magnitude(y))
}

fn centered_sums(x: &[f64], y: &[f64], sx: f64, sy: f64) -> Option<Moments> {
    let scale = |v: f64, s: f64| if s > 0.0 { v / s } else { 0.0 };
    let xs: Vec<f64> = x.iter().map(|&v| scale(v, sx)).collect();
    let ys: Vec<f64> = y.iter().map(|&v| scale(v, sy)).collect();
    let mx = mean(&xs)?;
    let my = mean(&ys)?;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for (a, b) in xs.iter().zip(&ys) {
        let dx = a - mx;
        let dy = b - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    Some(Moments { sxx, syy, sxy, sx, sy })
}

/// Pearson correlation, clamped to [-1, 1]. `None` for fewer than two pairs
/// or a constant side.
pub fn pearson(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let Moments { sxx, syy, sxy, .. } = moments(x, y)?;
    if sxx <= 0.0 || syy <= 0.0 {
        return None;
    }
    let r = sxy / (sxx.sqrt() * syy.sqrt());
    r.is_finite().then(|| r.clamp(-1.0, 1.0))
}

/// 1-based ranks; ties get the average of the ranks they span.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            ranks[idx] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Spearman rank correlation (Pearson over average ranks).
pub fn spearman(x: &[f64], y: &[f64]) -> Option<f64> {
    if x.len() != y.len() {
        return None;
    }
    pearson(&average_ranks(x), &average_ranks(y))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Ordinary least squares of `y` on `x`. `None` for a constant `x` or a
/// slope or intercept beyond the `f64` range.
pub fn linear_fit(x: &[f64], y: &[f64]) -> Option<LinearFit> {
    if x.len() != y.len() || x.len() < 2 {
        return None;
    }
    let Moments { sxx, syy, sxy, sx, sy } = moments(x, y)?;
    if sxx <= 0.0 {
        return None;
    }
    let slope = sxy / sxx * (sy / sx);
    let intercept = mean(y)? - slope * mean(x)?;
    // A constant y is fitted exactly by the flat line.
    let r_squared = if syy <= 0.0 {
        1.0
    } else {
        ((sxy * sxy) / (sxx * syy)).clamp(0.0, 1.0)
    };
    (slope.is_finite() && intercept.is_finite()).then_some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

/// Quantile of ascending `sorted` by linear interpolation between closest
/// ranks (position `q * (n - 1)`).
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Counts per distinct value, most frequent first (ties by label).
pub fn value_counts<I>(values: I) -> Vec<(String, usize)>
where
    I: IntoIterator<Item = String>,
{
    let mut counts: HashMap<String, usize> = HashMap::new();
    for v in values {
        *counts.entry(v).or_default() += 1;
    }
    let mut out: Vec<(String, usize)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub lo: f64,
    pub hi: f64,
    pub count: usize,
}

/// Equal-width histogram over [min, max]; the last bin is closed.
pub fn histogram(values: &[f64], bins: usize) -> Vec<Bin> {
    let Some((lo, hi)) = min_max(values) else {
        return Vec::new();
    };
    if bins == 0 {
        return Vec::new();
    }
    if hi <= lo {
        return vec![Bin {
            lo,
            hi,
            count: values.len(),
        }];
    }
    let width = (hi - lo) / bins as f64;
    let mut out: Vec<Bin> = (0..bins)
        .map(|i| Bin {
            lo: lo + width * i as f64,
            hi: if i + 1 == bins { hi } else { lo + width * (i + 1) as f64 },
            count: 0,
        })
        .collect();
    for v in values {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
