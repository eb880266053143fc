//! Diagnostic SVG plots: training curves, confusion matrix, prediction
//! distribution and sample predictions.

use super::svg::{PALETTE, SvgCanvas, Series, line_panel};
use crate::dataset::ImageSet;
use crate::error::MlError;
use crate::models::ModelKind;
use crate::models::summary::model_plot_dir;
use crate::training::metrics::{History, predicted_class};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, RgbImage};
use pupcake_core::persistence::atomic_write;
use std::io::Cursor;
use std::path::{Path, PathBuf};

const PANEL_WIDTH: f64 = 520.0;
const PANEL_HEIGHT: f64 = 320.0;
const THUMB: f64 = 96.0;

pub fn history_path(plot_dir: &Path, model: ModelKind) -> PathBuf {
    model_plot_dir(plot_dir, model.name()).join(format!("{model}_history.svg"))
}

pub fn fold_history_path(plot_dir: &Path, model: ModelKind) -> PathBuf {
    model_plot_dir(plot_dir, model.name()).join(format!("{model}_kfold_history.svg"))
}

pub fn confusion_matrix_path(plot_dir: &Path, model: ModelKind) -> PathBuf {
    model_plot_dir(plot_dir, model.name()).join(format!("{model}_confusion_matrix.svg"))
}

pub fn sample_predictions_path(plot_dir: &Path, model: ModelKind) -> PathBuf {
    model_plot_dir(plot_dir, model.name()).join(format!("{model}_sample_predictions.svg"))
}

pub fn prediction_distribution_path(plot_dir: &Path, model: ModelKind) -> PathBuf {
    model_plot_dir(plot_dir, model.name()).join(format!("{model}_visual_prediction.svg"))
}

/// Accuracy and loss curves of one training run, side by side.
pub fn render_history(model: ModelKind, history: &History) -> String {
    let mut canvas = SvgCanvas::new(PANEL_WIDTH * 2.0, PANEL_HEIGHT + 50.0);
    canvas.title(&format!("{model} training history"));
    let accuracy = [
        Series {
            name: "train".into(),
            values: &history.accuracy,
            color: PALETTE[0],
            dashed: false,
        },
        Series {
            name: "validation".into(),
            values: &history.val_accuracy,
            color: PALETTE[1],
            dashed: false,
        },
    ];
    let loss = [
        Series {
            name: "train".into(),
            values: &history.loss,
            color: PALETTE[0],
            dashed: false,
        },
        Series {
            name: "validation".into(),
            values: &history.val_loss,
            color: PALETTE[1],
            dashed: false,
        },
    ];
    line_panel(
        &mut canvas,
        (0.0, 50.0, PANEL_WIDTH, PANEL_HEIGHT),
        "Accuracy",
        "accuracy",
        &accuracy,
    );
    line_panel(
        &mut canvas,
        (PANEL_WIDTH, 50.0, PANEL_WIDTH, PANEL_HEIGHT),
        "Loss",
        "loss",
        &loss,
    );
    canvas.finish()
}

/// Per-fold validation curves; solid accuracy, dashed loss.
pub fn render_fold_history(model: ModelKind, folds: &[History]) -> String {
    let mut canvas = SvgCanvas::new(PANEL_WIDTH * 2.0, PANEL_HEIGHT + 50.0);
    canvas.title(&format!("{model} k-fold history"));
    let color = |i: usize| PALETTE[i % PALETTE.len()];

    let accuracy: Vec<Series<'_>> = folds
        .iter()
        .enumerate()
        .map(|(i, h)| Series {
            name: format!("fold {} val", i + 1),
            values: &h.val_accuracy,
            color: color(i),
            dashed: false,
        })
        .collect();
    let loss: Vec<Series<'_>> = folds
        .iter()
        .enumerate()
        .map(|(i, h)| Series {
            name: format!("fold {} val", i + 1),
            values: &h.val_loss,
            color: color(i),
            dashed: true,
        })
        .collect();
    line_panel(
        &mut canvas,
        (0.0, 50.0, PANEL_WIDTH, PANEL_HEIGHT),
        "Validation accuracy",
        "accuracy",
        &accuracy,
    );
    line_panel(
        &mut canvas,
        (PANEL_WIDTH, 50.0, PANEL_WIDTH, PANEL_HEIGHT),
        "Validation loss",
        "loss",
        &loss,
    );
    canvas.finish()
}

/// 2x2 heat-map; rows are true classes, columns predicted classes.
pub fn render_confusion_matrix(
    model: ModelKind,
    matrix: &[[usize; 2]; 2],
    class_list: &[String],
) -> String {
    const CELL: f64 = 140.0;
    const LEFT: f64 = 150.0;
    const TOP: f64 = 90.0;

    let mut canvas = SvgCanvas::new(LEFT + CELL * 2.0 + 40.0, TOP + CELL * 2.0 + 70.0);
    canvas.title(&format!("{model} confusion matrix"));
    let max = matrix.iter().flatten().copied().max().unwrap_or(0).max(1) as f64;
    let class = |i: usize| class_list.get(i).cloned().unwrap_or_else(|| i.to_string());

    for (t, row) in matrix.iter().enumerate() {
        for (p, count) in row.iter().enumerate() {
            let x = LEFT + p as f64 * CELL;
            let y = TOP + t as f64 * CELL;
            let shade = 245.0 - (*count as f64 / max) * 180.0;
            let fill = format!("rgb({0:.0},{0:.0},255)", shade);
            canvas.rect(x, y, CELL, CELL, &fill, Some("#2c3e50"));
            canvas.text(x + CELL / 2.0, y + CELL / 2.0 + 8.0, &count.to_string(), 24.0, "middle");
        }
        canvas.text(LEFT - 10.0, TOP + t as f64 * CELL + CELL / 2.0 + 4.0, &class(t), 13.0, "end");
    }
    for p in 0..2 {
        canvas.text(LEFT + p as f64 * CELL + CELL / 2.0, TOP - 10.0, &class(p), 13.0, "middle");
    }
    canvas.text(LEFT + CELL, TOP + CELL * 2.0 + 30.0, "Predicted label", 13.0, "middle");
    canvas.text(20.0, TOP - 30.0, "True label", 13.0, "start");
    canvas.finish()
}

/// Predicted probability of every test image, one strip per true class, with
/// the 0.5 decision threshold. Misclassified points are drawn in red.
pub fn render_prediction_distribution(
    model: ModelKind,
    labels: &[f32],
    probs: &[f32],
    class_list: &[String],
) -> String {
    const LEFT: f64 = 150.0;
    const TOP: f64 = 70.0;
    const STRIP: f64 = 90.0;
    const MARK: f64 = 6.0;

    let mut canvas = SvgCanvas::new(LEFT + PANEL_WIDTH + 40.0, TOP + STRIP * 2.0 + 70.0);
    canvas.title(&format!("{model} predicted probabilities"));
    let x_of = |p: f64| LEFT + p.clamp(0.0, 1.0) * PANEL_WIDTH;

    for class in 0..2 {
        let y = TOP + class as f64 * STRIP;
        canvas.rect(LEFT, y, PANEL_WIDTH, STRIP, "#f8f9fa", Some("#bdc3c7"));
        let name = class_list.get(class).cloned().unwrap_or_else(|| class.to_string());
        canvas.text(LEFT - 10.0, y + STRIP / 2.0 + 4.0, &name, 13.0, "end");
    }

    // Jitter within the strip by index so overlapping points stay visible.
    for (i, (&label, &p)) in labels.iter().zip(probs).enumerate() {
        let row = if label >= 0.5 { 1.0 } else { 0.0 };
        let y = TOP + row * STRIP + 12.0 + (i % 9) as f64 * (STRIP - 24.0) / 8.0;
        let color = if predicted_class(p) == label { PALETTE[0] } else { "#c0392b" };
        canvas.rect(x_of(p as f64) - MARK / 2.0, y - MARK / 2.0, MARK, MARK, color, None);
    }

    canvas.line(x_of(0.5), TOP, x_of(0.5), TOP + STRIP * 2.0, "#2c3e50", 1.5);
    for tick in [0.0, 0.25, 0.5, 0.75, 1.0] {
        canvas.text(x_of(tick), TOP + STRIP * 2.0 + 18.0, &format!("{tick:.2}"), 11.0, "middle");
    }
    canvas.text(LEFT + PANEL_WIDTH / 2.0, TOP + STRIP * 2.0 + 45.0, "Predicted probability", 13.0, "middle");
    canvas.text(20.0, TOP - 20.0, "True label", 13.0, "start");
    canvas.finish()
}

/// Channels-first `[0, 1]` pixels back to an RGB image.
pub fn to_rgb_image(set: &ImageSet, index: usize) -> RgbImage {
    let shape = set.shape();
    let pixels = set.image(index);
    let plane = shape.height * shape.width;
    RgbImage::from_fn(shape.width as u32, shape.height as u32, |x, y| {
        let pos = y as usize * shape.width + x as usize;
        let channel = |c: usize| {
            let c = c.min(shape.channels - 1);
            (pixels[c * plane + pos].clamp(0.0, 1.0) * 255.0).round() as u8
        };
        image::Rgb([channel(0), channel(1), channel(2)])
    })
}

fn png_base64(img: RgbImage) -> Result<String, MlError> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(img).write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(STANDARD.encode(bytes))
}

/// Grid of the first `count` test images captioned with predicted and true class.
pub fn render_sample_predictions(
    model: ModelKind,
    set: &ImageSet,
    probs: &[f32],
    class_list: &[String],
    count: usize,
) -> Result<String, MlError> {
    const COLUMNS: usize = 4;
    const CELL_W: f64 = THUMB + 60.0;
    const CELL_H: f64 = THUMB + 50.0;

    let count = count.min(set.len()).min(probs.len());
    let rows = count.div_ceil(COLUMNS).max(1);
    let mut canvas = SvgCanvas::new(CELL_W * COLUMNS as f64 + 20.0, 60.0 + CELL_H * rows as f64);
    canvas.title(&format!("{model} sample predictions"));
    let class = |label: f32| {
        class_list
            .get(label as usize)
            .cloned()
            .unwrap_or_else(|| label.to_string())
    };

    for i in 0..count {
        let x = 10.0 + (i % COLUMNS) as f64 * CELL_W + 30.0;
        let y = 50.0 + (i / COLUMNS) as f64 * CELL_H;
        canvas.png(x, y, THUMB, THUMB, &png_base64(to_rgb_image(set, i))?);

        let predicted = predicted_class(probs[i]);
        let actual = set.labels()[i];
        let color = if predicted == actual { "#27ae60" } else { "#c0392b" };
        canvas.colored_text(
            x + THUMB / 2.0,
            y + THUMB + 16.0,
            &format!("pred: {} ({:.2})", class(predicted), probs[i]),
            10.0,
            "middle",
            color,
        );
        canvas.colored_text(
            x + THUMB / 2.0,
            y + THUMB + 30.0,
            &format!("true: {}", class(actual)),
            10.0,
            "middle",
            "#2c3e50",
        );
    }
    Ok(canvas.finish())
}

pub fn write_svg(path: &Path, svg: &str) -> Result<(), MlError> {
    atomic_write(path, svg.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pupcake_core::InputShape;

    #[test]
    fn test_plot_paths() {
        assert_eq!(
            fold_history_path(Path::new("plot"), ModelKind::Convolutional),
            PathBuf::from("plot/CNN/CNN_kfold_history.svg")
        );
    }

    #[test]
    fn test_confusion_matrix_contains_counts() {
        let classes = vec!["chihuahua".to_string(), "muffin".to_string()];
        let svg = render_confusion_matrix(ModelKind::Dense, &[[3, 1], [0, 4]], &classes);
        assert!(svg.contains(">3</text>"));
        assert!(svg.contains(">4</text>"));
        assert!(svg.contains("muffin"));
    }

    #[test]
    fn test_sample_predictions_embed_png() {
        let set = ImageSet::new(
            InputShape::new(1, 2, 2),
            vec![0.0, 0.5, 1.0, 0.25, 1.0, 1.0, 1.0, 1.0],
            vec![0.0, 1.0],
        )
        .unwrap();
        let classes = vec!["chihuahua".to_string(), "muffin".to_string()];
        let svg = render_sample_predictions(ModelKind::Dense, &set, &[0.1, 0.2], &classes, 16).unwrap();
        assert_eq!(svg.matches("data:image/png;base64,").count(), 2);
        assert!(svg.contains("true: muffin"));
    }

    #[test]
    fn test_prediction_distribution_marks_errors() {
        let classes = vec!["chihuahua".to_string(), "muffin".to_string()];
        let svg = render_prediction_distribution(
            ModelKind::Dense,
            &[0.0, 0.0, 1.0],
            &[0.1, 0.9, 0.8],
            &classes,
        );
        assert_eq!(svg.matches("#c0392b").count(), 1);
        assert!(svg.contains("Predicted probability"));
        assert!(svg.contains("chihuahua"));
    }

    #[test]
    fn test_to_rgb_image_grayscale_replicates_channel() {
        let set = ImageSet::new(InputShape::new(1, 1, 2), vec![0.0, 1.0], vec![0.0]).unwrap();
        let img = to_rgb_image(&set, 0);
        assert_eq!(img.get_pixel(1, 0), &image::Rgb([255, 255, 255]));
        assert_eq!(img.get_pixel(0, 0), &image::Rgb([0, 0, 0]));
    }
}
