//! Minimal SVG builder for the diagnostic plots.

use std::fmt::Write as _;

const FONT: &str = "Arial, sans-serif";
pub const COLOR_TEXT: &str = "#2c3e50";
pub const COLOR_GRID: &str = "#ecf0f1";

/// Line colors cycled through by multi-series charts.
pub const PALETTE: [&str; 6] = [
    "#3498db", "#e74c3c", "#2ecc71", "#9b59b6", "#f39c12", "#1abc9c",
];

pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// An SVG document under construction.
#[derive(Debug, Clone)]
pub struct SvgCanvas {
    width: f64,
    body: String,
}

impl SvgCanvas {
    pub fn new(width: f64, height: f64) -> Self {
        let mut body = String::new();
        let _ = write!(
            body,
            r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 {width} {height}" width="{width}" height="{height}">"#
        );
        let _ = write!(
            body,
            r#"<rect width="{width}" height="{height}" fill="white"/>"#
        );
        Self { width, body }
    }

    pub fn title(&mut self, title: &str) {
        let _ = write!(
            self.body,
            r#"<text x="{}" y="30" text-anchor="middle" font-family="{FONT}" font-size="18" font-weight="bold" fill="{COLOR_TEXT}">{}</text>"#,
            self.width / 2.0,
            escape_xml(title)
        );
    }

    pub fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str, stroke: Option<&str>) {
        let stroke = stroke
            .map(|s| format!(r#" stroke="{s}" stroke-width="1""#))
            .unwrap_or_default();
        let _ = write!(
            self.body,
            r#"<rect x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" fill="{fill}"{stroke}/>"#
        );
    }

    pub fn text(&mut self, x: f64, y: f64, text: &str, size: f64, anchor: &str) {
        self.colored_text(x, y, text, size, anchor, COLOR_TEXT);
    }

    pub fn colored_text(&mut self, x: f64, y: f64, text: &str, size: f64, anchor: &str, color: &str) {
        let _ = write!(
            self.body,
            r#"<text x="{x:.1}" y="{y:.1}" text-anchor="{anchor}" font-family="{FONT}" font-size="{size}" fill="{color}">{}</text>"#,
            escape_xml(text)
        );
    }

    pub fn line(&mut self, x1: f64, y1: f64, x2: f64, y2: f64, color: &str, width: f64) {
        let _ = write!(
            self.body,
            r#"<line x1="{x1:.1}" y1="{y1:.1}" x2="{x2:.1}" y2="{y2:.1}" stroke="{color}" stroke-width="{width}"/>"#
        );
    }

    pub fn polyline(&mut self, points: &[(f64, f64)], color: &str, dashed: bool) {
        if points.is_empty() {
            return;
        }
        let coords: Vec<String> = points
            .iter()
            .map(|(x, y)| format!("{x:.1},{y:.1}"))
            .collect();
        let dash = if dashed { r#" stroke-dasharray="6 4""# } else { "" };
        let _ = write!(
            self.body,
            r#"<polyline points="{}" fill="none" stroke="{color}" stroke-width="2"{dash}/>"#,
            coords.join(" ")
        );
    }

    /// Embed a base64 PNG.
    pub fn png(&mut self, x: f64, y: f64, w: f64, h: f64, base64_png: &str) {
        let _ = write!(
            self.body,
            r#"<image x="{x:.1}" y="{y:.1}" width="{w:.1}" height="{h:.1}" href="data:image/png;base64,{base64_png}"/>"#
        );
    }

    pub fn finish(mut self) -> String {
        self.body.push_str("</svg>");
        self.body
    }
}

/// A named series of y values plotted against 1-based epochs.
#[derive(Debug, Clone)]
pub struct Series<'a> {
    pub name: String,
    pub values: &'a [f64],
    pub color: &'a str,
    pub dashed: bool,
}

/// Draw a line chart panel inside `canvas` at the given box.
pub fn line_panel(
    canvas: &mut SvgCanvas,
    (x0, y0, w, h): (f64, f64, f64, f64),
    title: &str,
    y_label: &str,
    series: &[Series<'_>],
) {
    const LEFT: f64 = 60.0;
    const BOTTOM: f64 = 40.0;
    const TOP: f64 = 30.0;

    let plot_x = x0 + LEFT;
    let plot_y = y0 + TOP;
    let plot_w = w - LEFT - 20.0;
    let plot_h = h - TOP - BOTTOM;

    let max_len = series.iter().map(|s| s.values.len()).max().unwrap_or(0).max(1);
    let finite = series
        .iter()
        .flat_map(|s| s.values.iter().copied())
        .filter(|v| v.is_finite());
    let (mut y_min, mut y_max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !y_min.is_finite() || !y_max.is_finite() {
        (y_min, y_max) = (0.0, 1.0);
    }
    if (y_max - y_min).abs() < 1e-9 {
        y_min -= 0.5;
        y_max += 0.5;
    }

    canvas.text(x0 + w / 2.0, y0 + 18.0, title, 14.0, "middle");
    for i in 0..=4 {
        let frac = i as f64 / 4.0;
        let y = plot_y + plot_h - frac * plot_h;
        canvas.line(plot_x, y, plot_x + plot_w, y, COLOR_GRID, 1.0);
        canvas.text(
            plot_x - 6.0,
            y + 4.0,
            &format!("{:.3}", y_min + frac * (y_max - y_min)),
            10.0,
            "end",
        );
    }
    canvas.line(plot_x, plot_y + plot_h, plot_x + plot_w, plot_y + plot_h, COLOR_TEXT, 1.5);
    canvas.line(plot_x, plot_y, plot_x, plot_y + plot_h, COLOR_TEXT, 1.5);
    canvas.text(plot_x + plot_w / 2.0, y0 + h - 8.0, "Epoch", 12.0, "middle");
    canvas.text(x0 + 12.0, plot_y - 8.0, y_label, 12.0, "start");

    let x_of = |i: usize| {
        if max_len <= 1 {
            plot_x + plot_w / 2.0
        } else {
            plot_x + i as f64 / (max_len - 1) as f64 * plot_w
        }
    };
    let y_of = |v: f64| plot_y + plot_h - (v - y_min) / (y_max - y_min) * plot_h;

    for (n, s) in series.iter().enumerate() {
        let points: Vec<(f64, f64)> = s
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| (x_of(i), y_of(*v)))
            .collect();
        canvas.polyline(&points, s.color, s.dashed);

        // legend
        let ly = plot_y + 12.0 + n as f64 * 14.0;
        let lx = plot_x + plot_w - 140.0;
        canvas.line(lx, ly - 4.0, lx + 18.0, ly - 4.0, s.color, 2.0);
        canvas.text(lx + 24.0, ly, &s.name, 10.0, "start");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_xml() {
        assert_eq!(escape_xml("a<b & 'c'"), "a&lt;b &amp; &apos;c&apos;");
    }

    #[test]
    fn test_line_panel_handles_flat_and_nan_series() {
        let mut canvas = SvgCanvas::new(400.0, 300.0);
        let flat = [0.5, 0.5, f64::NAN];
        line_panel(
            &mut canvas,
            (0.0, 0.0, 400.0, 300.0),
            "Accuracy",
            "acc",
            &[Series {
                name: "train".into(),
                values: &flat,
                color: PALETTE[0],
                dashed: false,
            }],
        );
        let svg = canvas.finish();
        assert!(svg.contains("<polyline"));
        assert!(!svg.contains("NaN"));
    }
}
