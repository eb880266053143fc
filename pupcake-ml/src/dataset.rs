//! Labeled image datasets held in memory.
//!
//! Images are decoded with the `image` crate, resized to the configured
//! [`InputShape`], scaled to `[0, 1]` and stored channels-first so a batch can
//! be handed to burn without further copies. Labels are `0.0` / `1.0`, the index
//! of the image's class directory in the configured class list.

use crate::error::MlError;
use burn::tensor::{Tensor, TensorData, backend::Backend};
use image::imageops::FilterType;
use pupcake_core::{DatasetConfig, InputShape};
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// An in-memory set of images with binary labels.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSet {
    shape: InputShape,
    pixels: Vec<f32>,
    labels: Vec<f32>,
}

impl ImageSet {
    /// Build a set from channels-first pixels and binary labels.
    pub fn new(shape: InputShape, pixels: Vec<f32>, labels: Vec<f32>) -> Result<Self, MlError> {
        if shape.numel() == 0 {
            return Err(MlError::dataset("input shape has a zero dimension"));
        }
        if pixels.len() != labels.len() * shape.numel() {
            return Err(MlError::dataset(format!(
                "{} pixel values do not match {} images of shape {shape}",
                pixels.len(),
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|l| **l != 0.0 && **l != 1.0) {
            return Err(MlError::dataset(format!("label {bad} is not binary")));
        }
        Ok(Self {
            shape,
            pixels,
            labels,
        })
    }

    pub fn empty(shape: InputShape) -> Self {
        Self {
            shape,
            pixels: Vec::new(),
            labels: Vec::new(),
        }
    }

    /// Decode every image under `dir/<class>/` for the classes in `class_list`.
    pub fn load_dir(dir: &Path, class_list: &[String], shape: InputShape) -> Result<Self, MlError> {
        let mut pixels = Vec::new();
        let mut labels = Vec::new();

        for (label, class_name) in class_list.iter().enumerate() {
            let class_dir = dir.join(class_name);
            let files = list_images(&class_dir)?;
            debug!(class = %class_name, count = files.len(), dir = %class_dir.display(), "Decoding images");
            for file in files {
                pixels.extend(decode_image(&file, shape)?);
                labels.push(label as f32);
            }
        }

        Self::new(shape, pixels, labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn shape(&self) -> InputShape {
        self.shape
    }

    pub fn labels(&self) -> &[f32] {
        &self.labels
    }

    /// Channels-first pixels of image `index`.
    pub fn image(&self, index: usize) -> &[f32] {
        let n = self.shape.numel();
        &self.pixels[index * n..(index + 1) * n]
    }

    /// Number of images per class, `[negative, positive]`.
    pub fn class_counts(&self) -> [usize; 2] {
        let positive = self.labels.iter().filter(|l| **l == 1.0).count();
        [self.len() - positive, positive]
    }

    /// Copy of the images at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> Self {
        let n = self.shape.numel();
        let mut pixels = Vec::with_capacity(indices.len() * n);
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            pixels.extend_from_slice(self.image(i));
            labels.push(self.labels[i]);
        }
        Self {
            shape: self.shape,
            pixels,
            labels,
        }
    }

    /// This set followed by `other`.
    pub fn concat(&self, other: &ImageSet) -> Result<Self, MlError> {
        if self.shape != other.shape {
            return Err(MlError::dataset(format!(
                "cannot concatenate images of shape {} and {}",
                self.shape, other.shape
            )));
        }
        let mut pixels = self.pixels.clone();
        pixels.extend_from_slice(&other.pixels);
        let mut labels = self.labels.clone();
        labels.extend_from_slice(&other.labels);
        Ok(Self {
            shape: self.shape,
            pixels,
            labels,
        })
    }

    /// Shuffle and split off `fraction` of the images as a validation set.
    pub fn split_validation<R: Rng>(&self, fraction: f64, rng: &mut R) -> (Self, Self) {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        indices.shuffle(rng);
        let mut val_count = (self.len() as f64 * fraction) as usize;
        if val_count == 0 && self.len() > 1 {
            val_count = 1;
        }
        let (val_idx, train_idx) = indices.split_at(val_count);
        (self.subset(train_idx), self.subset(val_idx))
    }

    /// Images and labels at `indices` as burn tensors `[n, c, h, w]` and `[n, 1]`.
    pub fn batch<B: Backend>(
        &self,
        indices: &[usize],
        device: &B::Device,
    ) -> (Tensor<B, 4>, Tensor<B, 2>) {
        let InputShape {
            channels,
            height,
            width,
        } = self.shape;
        let n = self.shape.numel();
        let mut pixels = Vec::with_capacity(indices.len() * n);
        let mut labels = Vec::with_capacity(indices.len());
        for &i in indices {
            pixels.extend_from_slice(self.image(i));
            labels.push(self.labels[i]);
        }
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [indices.len(), channels, height, width]),
            device,
        );
        let targets = Tensor::<B, 2>::from_data(TensorData::new(labels, [indices.len(), 1]), device);
        (images, targets)
    }
}

/// Train / validation / test splits ready for the workflow.
#[derive(Debug, Clone)]
pub struct DatasetSplits {
    pub train: ImageSet,
    pub val: ImageSet,
    pub test: ImageSet,
}

/// Per-split image counts reported by [`check_dataset`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetCensus {
    pub train: Vec<(String, usize)>,
    pub test: Vec<(String, usize)>,
}

/// Verify the dataset layout before any expensive work starts.
pub fn check_dataset(config: &DatasetConfig) -> Result<DatasetCensus, MlError> {
    for dir in [&config.data_path, &config.train_dir, &config.test_dir] {
        if !dir.is_dir() {
            return Err(MlError::missing_input(dir));
        }
    }

    let census_of = |root: &PathBuf| -> Result<Vec<(String, usize)>, MlError> {
        config
            .class_list
            .iter()
            .map(|class| {
                let files = list_images(&root.join(class))?;
                Ok((class.clone(), files.len()))
            })
            .collect()
    };
    let census = DatasetCensus {
        train: census_of(&config.train_dir)?,
        test: census_of(&config.test_dir)?,
    };
    if let Some(val_dir) = &config.val_dir {
        if !val_dir.is_dir() {
            return Err(MlError::missing_input(val_dir));
        }
    }

    for (class, count) in &census.train {
        info!(class = %class, count, "Training images");
    }
    for (class, count) in &census.test {
        info!(class = %class, count, "Test images");
    }
    Ok(census)
}

/// Load train, validation and test sets as configured.
pub fn load_splits<R: Rng>(config: &DatasetConfig, rng: &mut R) -> Result<DatasetSplits, MlError> {
    let train = ImageSet::load_dir(&config.train_dir, &config.class_list, config.input_shape)?;
    let test = ImageSet::load_dir(&config.test_dir, &config.class_list, config.input_shape)?;

    let (train, val) = match &config.val_dir {
        Some(val_dir) => {
            let val = ImageSet::load_dir(val_dir, &config.class_list, config.input_shape)?;
            (train, val)
        }
        None => train.split_validation(config.validation_split, rng),
    };

    info!(
        train = train.len(),
        val = val.len(),
        test = test.len(),
        shape = %config.input_shape,
        "Dataset loaded"
    );
    Ok(DatasetSplits { train, val, test })
}

/// Image files directly inside `dir`, sorted by name.
fn list_images(dir: &Path) -> Result<Vec<PathBuf>, MlError> {
    if !dir.is_dir() {
        return Err(MlError::missing_input(dir));
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| MlError::dataset(format!("walking {}: {e}", dir.display())))?;
        let is_image = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if entry.file_type().is_file() && is_image {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Decode one file into channels-first `[0, 1]` pixels.
fn decode_image(path: &Path, shape: InputShape) -> Result<Vec<f32>, MlError> {
    let img = image::open(path)?.resize_exact(
        shape.width as u32,
        shape.height as u32,
        FilterType::Triangle,
    );
    let (raw, channels) = match shape.channels {
        1 => (img.to_luma8().into_raw(), 1),
        3 => (img.to_rgb8().into_raw(), 3),
        other => {
            return Err(MlError::dataset(format!(
                "unsupported channel count {other} for {}",
                path.display()
            )));
        }
    };

    let plane = shape.height * shape.width;
    let mut pixels = vec![0.0f32; channels * plane];
    for (i, value) in raw.iter().enumerate() {
        let c = i % channels;
        let pos = i / channels;
        pixels[c * plane + pos] = *value as f32 / 255.0;
    }
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tempfile::TempDir;

    fn tiny_set(n: usize) -> ImageSet {
        let shape = InputShape::new(1, 2, 2);
        let pixels = (0..n * 4).map(|v| v as f32).collect();
        let labels = (0..n).map(|i| (i % 2) as f32).collect();
        ImageSet::new(shape, pixels, labels).unwrap()
    }

    #[test]
    fn test_new_rejects_mismatched_lengths() {
        let shape = InputShape::new(1, 2, 2);
        assert!(ImageSet::new(shape, vec![0.0; 7], vec![0.0, 1.0]).is_err());
        assert!(ImageSet::new(shape, vec![0.0; 4], vec![0.5]).is_err());
    }

    #[test]
    fn test_subset_and_concat() {
        let set = tiny_set(4);
        let sub = set.subset(&[3, 0]);
        assert_eq!(sub.len(), 2);
        assert_eq!(sub.image(0), set.image(3));
        assert_eq!(sub.labels(), &[1.0, 0.0]);

        let joined = set.concat(&sub).unwrap();
        assert_eq!(joined.len(), 6);
        assert_eq!(joined.image(4), set.image(3));
        assert_eq!(joined.class_counts(), [3, 3]);
    }

    #[test]
    fn test_concat_rejects_shape_mismatch() {
        let a = tiny_set(2);
        let b = ImageSet::empty(InputShape::new(3, 2, 2));
        assert!(a.concat(&b).is_err());
    }

    #[test]
    fn test_split_validation_partitions() {
        let set = tiny_set(10);
        let mut rng = StdRng::seed_from_u64(7);
        let (train, val) = set.split_validation(0.2, &mut rng);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(), 2);
    }

    #[test]
    fn test_batch_tensor_shapes() {
        let set = tiny_set(3);
        let device = Default::default();
        let (images, targets) = set.batch::<NdArray<f32>>(&[0, 2], &device);
        assert_eq!(images.dims(), [2, 1, 2, 2]);
        assert_eq!(targets.dims(), [2, 1]);
        let labels = targets.into_data().to_vec::<f32>().unwrap();
        assert_eq!(labels, vec![0.0, 0.0]);
    }

    fn write_png(path: &Path, value: u8) {
        let img = image::RgbImage::from_pixel(6, 4, image::Rgb([value, 0, 255]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_load_dir_labels_by_class_order() {
        let dir = TempDir::new().unwrap();
        for (class, count) in [("chihuahua", 2), ("muffin", 1)] {
            std::fs::create_dir_all(dir.path().join(class)).unwrap();
            for i in 0..count {
                write_png(&dir.path().join(class).join(format!("{i}.png")), 255);
            }
        }
        std::fs::write(dir.path().join("muffin").join("notes.txt"), "skip me").unwrap();

        let classes = vec!["chihuahua".to_string(), "muffin".to_string()];
        let set = ImageSet::load_dir(dir.path(), &classes, InputShape::new(3, 2, 2)).unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(set.labels(), &[0.0, 0.0, 1.0]);
        // channels-first: the red plane is all ones, green zeros, blue ones
        let img = set.image(0);
        assert!(img[0..4].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(img[4..8].iter().all(|v| v.abs() < 1e-6));
        assert!(img[8..12].iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_check_dataset_missing_class_dir() {
        let dir = TempDir::new().unwrap();
        let train = dir.path().join("train");
        let test = dir.path().join("test");
        std::fs::create_dir_all(train.join("chihuahua")).unwrap();
        std::fs::create_dir_all(train.join("muffin")).unwrap();
        std::fs::create_dir_all(test.join("chihuahua")).unwrap();

        let config = DatasetConfig {
            data_path: dir.path().to_path_buf(),
            train_dir: train,
            test_dir: test.clone(),
            ..DatasetConfig::default()
        };
        match check_dataset(&config) {
            Err(MlError::MissingInput { path }) => assert_eq!(path, test.join("muffin")),
            other => panic!("expected missing input, got {other:?}"),
        }
    }

    #[test]
    fn test_check_dataset_missing_root() {
        let config = DatasetConfig {
            data_path: PathBuf::from("/nonexistent/pupcake-data"),
            ..DatasetConfig::default()
        };
        assert!(matches!(
            check_dataset(&config),
            Err(MlError::MissingInput { .. })
        ));
    }
}
