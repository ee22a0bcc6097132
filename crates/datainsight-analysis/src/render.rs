//! Chart rendering.
//!
//! [`Renderer`] is the seam to whatever draws charts. [`SvgRenderer`] is the
//! built-in implementation: plain string-built SVG, no drawing backend.

use crate::chart::ChartSpec;
use crate::handlers::fmt2;
use crate::result::Series;
use datainsight_interpret::ChartKind;
use std::fmt::Write as _;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("chart has no data points")]
    EmptySeries,
    #[error("chart series lengths differ: {x} x values, {y} y values")]
    LengthMismatch { x: usize, y: usize },
    #[error("chart contains a non-finite value")]
    NonFinite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedImage {
    pub bytes: Vec<u8>,
    pub content_type: &'static str,
    /// File extension used for the artifact key.
    pub extension: &'static str,
}

pub trait Renderer: Send + Sync {
    fn render(&self, spec: &ChartSpec) -> Result<RenderedImage, RenderError>;
}

// ============================================================================
// SVG
// ============================================================================

const MARGIN_LEFT: f64 = 64.0;
const MARGIN_RIGHT: f64 = 24.0;
const MARGIN_TOP: f64 = 40.0;
const MARGIN_BOTTOM: f64 = 72.0;
const Y_TICKS: usize = 5;
const FILL: &str = "#4e79a7";

#[derive(Debug, Clone, Copy)]
pub struct SvgRenderer {
    pub width: u32,
    pub height: u32,
}

impl Default for SvgRenderer {
    fn default() -> Self {
        Self {
            width: 800,
            height: 500,
        }
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Maps a data range onto a pixel range, padding degenerate ranges.
#[derive(Debug, Clone, Copy)]
struct Scale {
    lo: f64,
    hi: f64,
    px_lo: f64,
    px_hi: f64,
}

impl Scale {
    fn new(lo: f64, hi: f64, px_lo: f64, px_hi: f64) -> Self {
        let (lo, hi) = if hi > lo { (lo, hi) } else { (lo - 1.0, hi + 1.0) };
        Self { lo, hi, px_lo, px_hi }
    }

    fn map(&self, v: f64) -> f64 {
        self.px_lo + (v - self.lo) / (self.hi - self.lo) * (self.px_hi - self.px_lo)
    }
}

fn range(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

impl SvgRenderer {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn validate(spec: &ChartSpec) -> Result<(), RenderError> {
        let (x, y) = (spec.x_series.len(), spec.y_series.len());
        if x == 0 || y == 0 {
            return Err(RenderError::EmptySeries);
        }
        if x != y {
            return Err(RenderError::LengthMismatch { x, y });
        }
        let finite_x = match &spec.x_series {
            Series::Numbers(values) => values.iter().all(|v| v.is_finite()),
            Series::Labels(_) => true,
        };
        if !finite_x || !spec.y_series.iter().all(|v| v.is_finite()) {
            return Err(RenderError::NonFinite);
        }
        Ok(())
    }

    fn plot_area(&self) -> (f64, f64, f64, f64) {
        let (w, h) = (self.width as f64, self.height as f64);
        (MARGIN_LEFT, w - MARGIN_RIGHT, MARGIN_TOP, h - MARGIN_BOTTOM)
    }

    fn y_scale(&self, spec: &ChartSpec) -> Scale {
        let (_, _, top, bottom) = self.plot_area();
        let (lo, hi) = range(&spec.y_series);
        // Bars grow from zero.
        let (lo, hi) = match spec.kind {
            ChartKind::Bar | ChartKind::Hist => (lo.min(0.0), hi.max(0.0)),
            _ => (lo, hi),
        };
        Scale::new(lo, hi, bottom, top)
    }

    fn axes(&self, out: &mut String, spec: &ChartSpec, y: &Scale) {
        let (left, right, top, bottom) = self.plot_area();
        let _ = writeln!(
            out,
            r##"<line x1="{left}" y1="{bottom}" x2="{right}" y2="{bottom}" stroke="#333"/>"##
        );
        let _ = writeln!(
            out,
            r##"<line x1="{left}" y1="{top}" x2="{left}" y2="{bottom}" stroke="#333"/>"##
        );
        for i in 0..=Y_TICKS {
            let v = y.lo + (y.hi - y.lo) * i as f64 / Y_TICKS as f64;
            let py = y.map(v);
            let _ = writeln!(
                out,
                r#"<text x="{}" y="{py:.1}" font-size="11" text-anchor="end" dominant-baseline="middle">{}</text>"#,
                left - 6.0,
                fmt2(v)
            );
        }
        let (w, h) = (self.width as f64, self.height as f64);
        let _ = writeln!(
            out,
            r#"<text x="{:.1}" y="{:.1}" font-size="13" text-anchor="middle">{}</text>"#,
            (left + right) / 2.0,
            h - 12.0,
            xml_escape(&spec.labels.x)
        );
        let _ = writeln!(
            out,
            r#"<text x="16" y="{:.1}" font-size="13" text-anchor="middle" transform="rotate(-90 16 {:.1})">{}</text>"#,
            (top + bottom) / 2.0,
            (top + bottom) / 2.0,
            xml_escape(&spec.labels.y)
        );
        let _ = writeln!(
            out,
            r#"<text x="{:.1}" y="24" font-size="16" text-anchor="middle">{}</text>"#,
            w / 2.0,
            xml_escape(&spec.title)
        );
    }

    fn category_labels(spec: &ChartSpec) -> Vec<String> {
        match &spec.x_series {
            Series::Labels(labels) => labels.clone(),
            Series::Numbers(values) => values.iter().map(|v| fmt2(*v)).collect(),
        }
    }

    fn bars(&self, out: &mut String, spec: &ChartSpec, y: &Scale) {
        let (left, right, _, bottom) = self.plot_area();
        let labels = Self::category_labels(spec);
        let slot = (right - left) / labels.len() as f64;
        let zero = y.map(0.0);
        for (i, (label, v)) in labels.iter().zip(&spec.y_series).enumerate() {
            let x = left + slot * i as f64;
            let py = y.map(*v);
            let (top, height) = if py < zero { (py, zero - py) } else { (zero, py - zero) };
            let gap = if spec.kind == ChartKind::Hist { 1.0 } else { slot * 0.15 };
            let _ = writeln!(
                out,
                r#"<rect x="{:.1}" y="{top:.1}" width="{:.1}" height="{height:.1}" fill="{FILL}"/>"#,
                x + gap / 2.0,
                (slot - gap).max(1.0)
            );
            let cx = x + slot / 2.0;
            let _ = writeln!(
                out,
                r#"<text x="{cx:.1}" y="{:.1}" font-size="10" text-anchor="end" transform="rotate(-40 {cx:.1} {:.1})">{}</text>"#,
                bottom + 14.0,
                bottom + 14.0,
                xml_escape(label)
            );
        }
    }

    /// Pixel x positions: numeric x is scaled, labels are evenly spaced.
    fn x_positions(&self, spec: &ChartSpec) -> Vec<f64> {
        let (left, right, _, _) = self.plot_area();
        match &spec.x_series {
            Series::Numbers(values) => {
                let (lo, hi) = range(values);
                let scale = Scale::new(lo, hi, left, right);
                values.iter().map(|v| scale.map(*v)).collect()
            }
            Series::Labels(labels) => {
                let slot = (right - left) / labels.len() as f64;
                (0..labels.len()).map(|i| left + slot * (i as f64 + 0.5)).collect()
            }
        }
    }

    fn points(&self, out: &mut String, spec: &ChartSpec, y: &Scale) {
        let xs = self.x_positions(spec);
        let coords: Vec<(f64, f64)> = xs.iter().zip(&spec.y_series).map(|(px, v)| (*px, y.map(*v))).collect();
        if spec.kind == ChartKind::Line {
            let path: Vec<String> = coords.iter().map(|(x, y)| format!("{x:.1},{y:.1}")).collect();
            let _ = writeln!(
                out,
                r#"<polyline points="{}" fill="none" stroke="{FILL}" stroke-width="2"/>"#,
                path.join(" ")
            );
        } else {
            for (x, y) in &coords {
                let _ = writeln!(out, r#"<circle cx="{x:.1}" cy="{y:.1}" r="3" fill="{FILL}" fill-opacity="0.7"/>"#);
            }
        }

        // First and last x labels keep dense series readable.
        let (_, _, _, bottom) = self.plot_area();
        let labels = Self::category_labels(spec);
        let ends = [0, labels.len() - 1];
        for &i in ends.iter().take(if labels.len() > 1 { 2 } else { 1 }) {
            let _ = writeln!(
                out,
                r#"<text x="{:.1}" y="{:.1}" font-size="10" text-anchor="middle">{}</text>"#,
                xs[i],
                bottom + 14.0,
                xml_escape(&labels[i])
            );
        }
    }
}

impl Renderer for SvgRenderer {
    fn render(&self, spec: &ChartSpec) -> Result<RenderedImage, RenderError> {
        Self::validate(spec)?;
        let y = self.y_scale(spec);

        let mut out = String::new();
        let _ = writeln!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="Helvetica, Arial, sans-serif">"#,
            w = self.width,
            h = self.height
        );
        out.push_str("<rect width=\"100%\" height=\"100%\" fill=\"white\"/>\n");
        self.axes(&mut out, spec, &y);
        match spec.kind {
            ChartKind::Bar | ChartKind::Hist => self.bars(&mut out, spec, &y),
            ChartKind::Line | ChartKind::Scatter => self.points(&mut out, spec, &y),
        }
        out.push_str("</svg>\n");

        Ok(RenderedImage {
            bytes: out.into_bytes(),
            content_type: "image/svg+xml",
            extension: "svg",
        })
    }
}
