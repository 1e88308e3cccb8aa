//! Image preprocessing driven by a Hugging Face `preprocessor_config.json`.
//!
//! Covers the resize/crop policies used by the common image classifiers
//! (ViT-style exact resize, ConvNeXt/ResNet-style `crop_pct` resize + center
//! crop, CLIP-style shortest-edge resize + optional center crop), followed by
//! rescaling and per-channel normalization into an NCHW tensor.

use super::{ImageTensor, Preprocess};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::Deserialize;
use thiserror::Error;

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Above this shortest edge ConvNeXt-style processors warp to a square
/// instead of resize + crop.
const CROP_PCT_MAX_EDGE: u32 = 384;

#[derive(Debug, Error, PartialEq)]
pub enum PreprocessConfigError {
    #[error("{field} must have 3 entries, got {len}")]
    ChannelCount { field: &'static str, len: usize },

    #[error("image_std contains a zero entry")]
    ZeroStd,

    #[error("{0} must be non-zero")]
    ZeroSize(&'static str),

    #[error("crop_pct must be in (0, 1], got {0}")]
    CropPct(f32),
}

/// `size` / `crop_size` as found in processor configs.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ImageSize {
    Exact { height: u32, width: u32 },
    ShortestEdge { shortest_edge: u32 },
    Square(u32),
}

impl ImageSize {
    /// `(height, width)` when used as a crop target.
    fn crop_dims(self) -> (u32, u32) {
        match self {
            ImageSize::Exact { height, width } => (height, width),
            ImageSize::ShortestEdge { shortest_edge } => (shortest_edge, shortest_edge),
            ImageSize::Square(side) => (side, side),
        }
    }

    fn is_zero(self) -> bool {
        let (h, w) = self.crop_dims();
        h == 0 || w == 0
    }
}

/// Subset of the Hugging Face image processor settings this service honours.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PreprocessorConfig {
    pub do_resize: bool,
    pub size: ImageSize,
    /// PIL resampling code
    pub resample: u8,
    pub do_center_crop: bool,
    pub crop_size: Option<ImageSize>,
    pub crop_pct: Option<f32>,
    pub do_rescale: bool,
    pub rescale_factor: f32,
    pub do_normalize: bool,
    pub image_mean: Vec<f32>,
    pub image_std: Vec<f32>,
}

impl Default for PreprocessorConfig {
    fn default() -> Self {
        Self {
            do_resize: true,
            size: ImageSize::Exact {
                height: 224,
                width: 224,
            },
            resample: 2,
            do_center_crop: false,
            crop_size: None,
            crop_pct: None,
            do_rescale: true,
            rescale_factor: 1.0 / 255.0,
            do_normalize: true,
            image_mean: IMAGENET_MEAN.to_vec(),
            image_std: IMAGENET_STD.to_vec(),
        }
    }
}

/// Validated, immutable preprocessing function.
#[derive(Debug, Clone)]
pub struct ImagePreprocessor {
    config: PreprocessorConfig,
    filter: FilterType,
    mean: [f32; 3],
    std: [f32; 3],
}

impl ImagePreprocessor {
    pub fn new(config: PreprocessorConfig) -> Result<Self, PreprocessConfigError> {
        let mean = channel_triplet("image_mean", &config.image_mean)?;
        let std = channel_triplet("image_std", &config.image_std)?;
        if std.iter().any(|&s| s == 0.0) {
            return Err(PreprocessConfigError::ZeroStd);
        }
        if config.size.is_zero() {
            return Err(PreprocessConfigError::ZeroSize("size"));
        }
        if config.crop_size.is_some_and(ImageSize::is_zero) {
            return Err(PreprocessConfigError::ZeroSize("crop_size"));
        }
        if let Some(pct) = config.crop_pct {
            if !(pct > 0.0 && pct <= 1.0) {
                return Err(PreprocessConfigError::CropPct(pct));
            }
        }

        let filter = filter_for(config.resample);
        Ok(Self {
            config,
            filter,
            mean,
            std,
        })
    }

    /// Parse and validate the contents of `preprocessor_config.json`.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        let config: PreprocessorConfig = serde_json::from_str(json)?;
        Ok(Self::new(config)?)
    }

    fn resize_and_crop(&self, image: &RgbImage) -> RgbImage {
        let cfg = &self.config;
        let mut out = if cfg.do_resize {
            match cfg.size {
                ImageSize::Exact { height, width } => self.resize(image, width, height),
                ImageSize::Square(side) => self.resize(image, side, side),
                ImageSize::ShortestEdge { shortest_edge } => match cfg.crop_pct {
                    Some(pct) if shortest_edge < CROP_PCT_MAX_EDGE => {
                        let target = (shortest_edge as f32 / pct) as u32;
                        let resized = self.resize_shortest_edge(image, target);
                        return center_crop(&resized, shortest_edge, shortest_edge);
                    }
                    Some(_) => self.resize(image, shortest_edge, shortest_edge),
                    None => self.resize_shortest_edge(image, shortest_edge),
                },
            }
        } else {
            image.clone()
        };

        if cfg.do_center_crop {
            if let Some(crop) = cfg.crop_size {
                let (h, w) = crop.crop_dims();
                out = center_crop(&out, h, w);
            }
        }
        out
    }

    fn resize(&self, image: &RgbImage, width: u32, height: u32) -> RgbImage {
        if image.dimensions() == (width, height) {
            return image.clone();
        }
        imageops::resize(image, width, height, self.filter)
    }

    fn resize_shortest_edge(&self, image: &RgbImage, edge: u32) -> RgbImage {
        let (w, h) = image.dimensions();
        let (new_w, new_h) = if w <= h {
            (edge, ((edge as u64 * h as u64) / w.max(1) as u64) as u32)
        } else {
            (((edge as u64 * w as u64) / h.max(1) as u64) as u32, edge)
        };
        self.resize(image, new_w.max(1), new_h.max(1))
    }
}

impl Default for ImagePreprocessor {
    fn default() -> Self {
        Self {
            config: PreprocessorConfig::default(),
            filter: FilterType::Triangle,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }
}

impl Preprocess for ImagePreprocessor {
    fn preprocess(&self, image: &RgbImage) -> ImageTensor {
        let resized = self.resize_and_crop(image);
        let (width, height) = resized.dimensions();
        let (width, height) = (width as usize, height as usize);
        let plane = width * height;

        let scale = if self.config.do_rescale {
            self.config.rescale_factor
        } else {
            1.0
        };

        let mut data = vec![0.0f32; 3 * plane];
        for (x, y, pixel) in resized.enumerate_pixels() {
            let offset = y as usize * width + x as usize;
            for c in 0..3 {
                let mut value = pixel[c] as f32 * scale;
                if self.config.do_normalize {
                    value = (value - self.mean[c]) / self.std[c];
                }
                data[c * plane + offset] = value;
            }
        }

        ImageTensor {
            shape: [1, 3, height, width],
            data,
        }
    }
}

fn channel_triplet(field: &'static str, values: &[f32]) -> Result<[f32; 3], PreprocessConfigError> {
    <[f32; 3]>::try_from(values).map_err(|_| PreprocessConfigError::ChannelCount {
        field,
        len: values.len(),
    })
}

/// PIL resampling codes to `image` filters.
fn filter_for(resample: u8) -> FilterType {
    match resample {
        0 => FilterType::Nearest,
        1 => FilterType::Lanczos3,
        3 => FilterType::CatmullRom,
        _ => FilterType::Triangle,
    }
}

/// Crop the center `height x width` region, zero-padding when the image is
/// smaller than the target.
fn center_crop(image: &RgbImage, height: u32, width: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    if (w, h) == (width, height) {
        return image.clone();
    }
    let left = (w as i64 - width as i64) / 2;
    let top = (h as i64 - height as i64) / 2;

    let mut out = RgbImage::new(width, height);
    imageops::overlay(&mut out, image, -left, -top);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn test_default_produces_224_square() {
        let pre = ImagePreprocessor::default();
        let tensor = pre.preprocess(&solid(640, 480, [10, 20, 30]));

        assert_eq!(tensor.shape, [1, 3, 224, 224]);
        assert_eq!(tensor.data.len(), 3 * 224 * 224);
    }

    #[test]
    fn test_rescale_and_normalize() {
        let json = r#"{
            "do_normalize": true,
            "do_rescale": true,
            "do_resize": true,
            "image_mean": [0.5, 0.5, 0.5],
            "image_std": [0.5, 0.5, 0.5],
            "resample": 2,
            "rescale_factor": 0.00392156862745098,
            "size": {"height": 4, "width": 4}
        }"#;
        let pre = ImagePreprocessor::from_json(json).unwrap();
        let tensor = pre.preprocess(&solid(4, 4, [255, 0, 255]));

        let plane = 16;
        assert!((tensor.data[0] - 1.0).abs() < 1e-5);
        assert!((tensor.data[plane] + 1.0).abs() < 1e-5);
        assert!((tensor.data[2 * plane] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_channel_first_layout() {
        let pre = ImagePreprocessor::new(PreprocessorConfig {
            do_resize: false,
            do_rescale: false,
            do_normalize: false,
            ..Default::default()
        })
        .unwrap();

        let mut img = RgbImage::new(2, 1);
        img.put_pixel(0, 0, Rgb([1, 2, 3]));
        img.put_pixel(1, 0, Rgb([4, 5, 6]));

        let tensor = pre.preprocess(&img);
        assert_eq!(tensor.shape, [1, 3, 1, 2]);
        assert_eq!(tensor.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_crop_pct_resize_then_center_crop() {
        let json = r#"{
            "crop_pct": 0.875,
            "do_normalize": true,
            "do_rescale": true,
            "do_resize": true,
            "image_mean": [0.485, 0.456, 0.406],
            "image_std": [0.229, 0.224, 0.225],
            "resample": 3,
            "rescale_factor": 0.00392156862745098,
            "size": {"shortest_edge": 224}
        }"#;
        let pre = ImagePreprocessor::from_json(json).unwrap();
        let tensor = pre.preprocess(&solid(500, 300, [128, 128, 128]));

        assert_eq!(tensor.shape, [1, 3, 224, 224]);
    }

    #[test]
    fn test_shortest_edge_keeps_aspect_then_crops() {
        let pre = ImagePreprocessor::new(PreprocessorConfig {
            size: ImageSize::ShortestEdge { shortest_edge: 20 },
            do_center_crop: true,
            crop_size: Some(ImageSize::Exact {
                height: 16,
                width: 16,
            }),
            ..Default::default()
        })
        .unwrap();

        assert_eq!(pre.resize_shortest_edge(&solid(40, 80, [0, 0, 0]), 20).dimensions(), (20, 40));
        assert_eq!(pre.preprocess(&solid(40, 80, [0, 0, 0])).shape, [1, 3, 16, 16]);
    }

    #[test]
    fn test_center_crop_pads_small_images() {
        let cropped = center_crop(&solid(2, 2, [255, 255, 255]), 4, 4);

        assert_eq!(cropped.dimensions(), (4, 4));
        assert_eq!(cropped.get_pixel(0, 0), &Rgb([0, 0, 0]));
        assert_eq!(cropped.get_pixel(1, 1), &Rgb([255, 255, 255]));
        assert_eq!(cropped.get_pixel(2, 2), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_legacy_integer_size() {
        let pre = ImagePreprocessor::from_json(r#"{"size": 32}"#).unwrap();
        assert_eq!(pre.preprocess(&solid(50, 10, [1, 1, 1])).shape, [1, 3, 32, 32]);
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let bad_mean = PreprocessorConfig {
            image_mean: vec![0.5, 0.5],
            ..Default::default()
        };
        assert_eq!(
            ImagePreprocessor::new(bad_mean).unwrap_err(),
            PreprocessConfigError::ChannelCount {
                field: "image_mean",
                len: 2
            }
        );

        let zero_std = PreprocessorConfig {
            image_std: vec![0.5, 0.0, 0.5],
            ..Default::default()
        };
        assert_eq!(ImagePreprocessor::new(zero_std).unwrap_err(), PreprocessConfigError::ZeroStd);

        let bad_pct = PreprocessorConfig {
            crop_pct: Some(1.5),
            ..Default::default()
        };
        assert_eq!(ImagePreprocessor::new(bad_pct).unwrap_err(), PreprocessConfigError::CropPct(1.5));

        assert!(ImagePreprocessor::from_json(r#"{"size": {"height": 0, "width": 10}}"#).is_err());
    }
}
