//! Human-readable architecture summaries (text table and SVG diagram).

use super::ArchitectureSpec;
use crate::error::MlError;
use crate::report::svg::SvgCanvas;
use pupcake_core::persistence::atomic_write;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// One row of a model summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSummary {
    pub name: String,
    pub kind: String,
    /// Output shape without the batch dimension.
    pub output_shape: Vec<usize>,
    /// Parameter count (batch norm counts scale and shift only).
    pub params: usize,
    pub trainable: bool,
}

impl LayerSummary {
    pub fn new(
        name: impl Into<String>,
        kind: impl Into<String>,
        output_shape: Vec<usize>,
        params: usize,
    ) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            output_shape,
            params,
            trainable: true,
        }
    }

    pub fn dense(name: impl Into<String>, fan_in: usize, fan_out: usize) -> Self {
        Self::new(name, "Linear", vec![fan_out], fan_in * fan_out + fan_out)
    }

    pub fn conv(
        name: impl Into<String>,
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        groups: usize,
        bias: bool,
        [h, w]: [usize; 2],
    ) -> Self {
        let weights = out_channels * (in_channels / groups.max(1)) * kernel * kernel;
        let bias = if bias { out_channels } else { 0 };
        let kind = if groups > 1 { "DepthwiseConv2d" } else { "Conv2d" };
        Self::new(name, kind, vec![out_channels, h, w], weights + bias)
    }

    pub fn batch_norm(name: impl Into<String>, output_shape: Vec<usize>) -> Self {
        let channels = output_shape.first().copied().unwrap_or(0);
        Self::new(name, "BatchNorm", output_shape, 2 * channels)
    }

    pub fn frozen(mut self) -> Self {
        self.trainable = false;
        self
    }

    fn shape_label(&self) -> String {
        let dims: Vec<String> = self.output_shape.iter().map(|d| d.to_string()).collect();
        format!("(None, {})", dims.join(", "))
    }
}

/// Directory holding every diagnostic for `model`.
pub fn model_plot_dir(plot_dir: &Path, model: &str) -> PathBuf {
    plot_dir.join(model)
}

/// Render the layer table as fixed-width text.
pub fn render_text(spec: &ArchitectureSpec) -> String {
    let rows = spec.layers();
    let mut out = String::new();
    let rule = "=".repeat(78);
    let _ = writeln!(out, "Model: \"{}\"", spec.kind);
    let _ = writeln!(out, "Input shape: {}", spec.input_shape);
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(
        out,
        "{:<32}{:<30}{:>16}",
        "Layer (type)", "Output Shape", "Param #"
    );
    let _ = writeln!(out, "{rule}");
    for row in &rows {
        let _ = writeln!(
            out,
            "{:<32}{:<30}{:>16}",
            format!("{} ({})", row.name, row.kind),
            row.shape_label(),
            row.params
        );
    }
    let total: usize = rows.iter().map(|r| r.params).sum();
    let trainable: usize = rows.iter().filter(|r| r.trainable).map(|r| r.params).sum();
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Total params: {total}");
    let _ = writeln!(out, "Trainable params: {trainable}");
    let _ = writeln!(out, "Non-trainable params: {}", total - trainable);
    let _ = writeln!(
        out,
        "Head: units={} dropout_rate={:.1} learning_rate={}",
        spec.head.units, spec.head.dropout_rate, spec.head.learning_rate
    );
    out
}

/// Render the layers as a vertical stack of boxes.
pub fn render_svg(spec: &ArchitectureSpec) -> String {
    const BOX_WIDTH: f64 = 360.0;
    const BOX_HEIGHT: f64 = 34.0;
    const GAP: f64 = 14.0;
    const MARGIN: f64 = 30.0;

    let rows = spec.layers();
    let height = MARGIN * 2.0 + 40.0 + rows.len() as f64 * (BOX_HEIGHT + GAP);
    let width = BOX_WIDTH + MARGIN * 2.0;
    let mut canvas = SvgCanvas::new(width, height);
    canvas.title(&format!("{} architecture", spec.kind));

    let x = MARGIN;
    for (i, row) in rows.iter().enumerate() {
        let y = MARGIN + 40.0 + i as f64 * (BOX_HEIGHT + GAP);
        let fill = if row.trainable { "#d6eaf8" } else { "#e5e7e9" };
        canvas.rect(x, y, BOX_WIDTH, BOX_HEIGHT, fill, Some("#2c3e50"));
        canvas.text(
            x + BOX_WIDTH / 2.0,
            y + BOX_HEIGHT / 2.0 + 4.0,
            &format!("{}: {} {}", row.name, row.kind, row.shape_label()),
            11.0,
            "middle",
        );
        if i + 1 < rows.len() {
            let cx = x + BOX_WIDTH / 2.0;
            canvas.line(cx, y + BOX_HEIGHT, cx, y + BOX_HEIGHT + GAP, "#2c3e50", 1.5);
        }
    }
    canvas.finish()
}

/// Write `<MODEL>_model_summary.txt` and `<MODEL>_model_summary_plot.svg`.
pub fn write_summary(plot_dir: &Path, spec: &ArchitectureSpec) -> Result<(), MlError> {
    let name = spec.kind.name();
    let dir = model_plot_dir(plot_dir, name);
    atomic_write(
        &dir.join(format!("{name}_model_summary.txt")),
        render_text(spec).as_bytes(),
    )?;
    atomic_write(
        &dir.join(format!("{name}_model_summary_plot.svg")),
        render_svg(spec).as_bytes(),
    )?;
    Ok(())
}
