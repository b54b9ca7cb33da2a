// U2-Net / IS-Net salient object segmentation through ONNX Runtime
use anyhow::{anyhow, bail, Context};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbaImage};
use log::info;
use ort::session::Session;
use ort::value::Tensor;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use super::{RemovalSession, SessionFactory, SharedSession};

pub const DEFAULT_BASE_URL: &str = "https://github.com/danielgatis/rembg/releases/download/v0.0.0";

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Input geometry and normalization of a published model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub input_size: u32,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

pub const CATALOGUE: &[ModelSpec] = &[
    ModelSpec { name: "u2net", input_size: 320, mean: IMAGENET_MEAN, std: IMAGENET_STD },
    ModelSpec { name: "u2netp", input_size: 320, mean: IMAGENET_MEAN, std: IMAGENET_STD },
    ModelSpec { name: "u2net_human_seg", input_size: 320, mean: IMAGENET_MEAN, std: IMAGENET_STD },
    ModelSpec { name: "silueta", input_size: 320, mean: IMAGENET_MEAN, std: IMAGENET_STD },
    ModelSpec { name: "isnet-general-use", input_size: 1024, mean: [0.5; 3], std: [1.0; 3] },
    ModelSpec { name: "isnet-anime", input_size: 1024, mean: [0.5; 3], std: [1.0; 3] },
];

pub fn lookup(model_name: &str) -> Option<&'static ModelSpec> {
    CATALOGUE.iter().find(|spec| spec.name == model_name)
}

/// Loads catalogue models with ONNX Runtime, downloading missing weights first.
#[derive(Debug, Clone)]
pub struct OnnxSessionFactory {
    base_url: String,
    // None keeps ONNX Runtime's own thread count
    intra_threads: Option<usize>,
}

impl OnnxSessionFactory {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            intra_threads: None,
        }
    }

    /// Pins the per-session intra-op thread count. Zero is treated as unset.
    pub fn with_intra_threads(mut self, threads: Option<usize>) -> Self {
        self.intra_threads = threads.filter(|n| *n > 0);
        self
    }

    pub fn intra_threads(&self) -> Option<usize> {
        self.intra_threads
    }

    fn download(&self, model_name: &str, dest: &Path) -> anyhow::Result<()> {
        let url = format!("{}/{model_name}.onnx", self.base_url.trim_end_matches('/'));
        info!("Downloading {url} to {}", dest.display());

        let response = ureq::get(&url)
            .call()
            .with_context(|| format!("failed to download {url}"))?;
        let partial = partial_path(dest);
        let written = {
            let mut file = BufWriter::new(
                File::create(&partial)
                    .with_context(|| format!("failed to create {}", partial.display()))?,
            );
            let written = io::copy(&mut response.into_reader(), &mut file);
            written.and_then(|n| file.flush().map(|_| n))
        };
        let written = match written {
            Ok(n) => n,
            Err(e) => {
                let _ = std::fs::remove_file(&partial);
                return Err(e).with_context(|| format!("failed to write {}", partial.display()));
            }
        };
        std::fs::rename(&partial, dest)
            .with_context(|| format!("failed to move weights into {}", dest.display()))?;
        info!("Downloaded {model_name} ({} MB)", written / (1024 * 1024));
        Ok(())
    }
}

impl SessionFactory for OnnxSessionFactory {
    fn load(&self, model_name: &str, models_dir: &Path) -> anyhow::Result<SharedSession> {
        let spec = *lookup(model_name).ok_or_else(|| anyhow!("No session class found for model '{model_name}'"))?;
        let weights = self.weights_path(model_name, models_dir);
        if !weights.exists() {
            self.download(model_name, &weights)?;
        }

        let mut builder = Session::builder().map_err(|e| anyhow!("failed to create ONNX session builder: {e}"))?;
        if let Some(threads) = self.intra_threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(|e| anyhow!("failed to configure ONNX session: {e}"))?;
        }
        let session = builder
            .commit_from_file(&weights)
            .map_err(|e| anyhow!("failed to load {}: {e}", weights.display()))?;

        Ok(Arc::new(OnnxRemovalSession {
            spec,
            session: Mutex::new(session),
        }))
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

pub struct OnnxRemovalSession {
    spec: ModelSpec,
    // ort needs exclusive access to run
    session: Mutex<Session>,
}

impl RemovalSession for OnnxRemovalSession {
    fn remove_background(&self, image: DynamicImage) -> anyhow::Result<RgbaImage> {
        let size = self.spec.input_size;
        let input = preprocess(&image, &self.spec);
        let tensor = Tensor::from_array(([1usize, 3, size as usize, size as usize], input))
            .map_err(|e| anyhow!("failed to build input tensor: {e}"))?;

        let mask = {
            let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
            let outputs = session
                .run(ort::inputs![tensor])
                .map_err(|e| anyhow!("inference failed: {e}"))?;
            let (shape, prediction) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| anyhow!("unexpected model output: {e}"))?;
            let dims: Vec<i64> = shape.iter().copied().collect();
            let (height, width) = match dims.as_slice() {
                [.., h, w] => (*h as u32, *w as u32),
                _ => bail!("unexpected output shape {dims:?}"),
            };
            prediction_to_mask(prediction, width, height)?
        };

        Ok(apply_mask(image, &mask))
    }
}

/// Resizes to the model's square input and lays the pixels out as normalized NCHW floats.
pub fn preprocess(image: &DynamicImage, spec: &ModelSpec) -> Vec<f32> {
    let size = spec.input_size;
    let resized = image.resize_exact(size, size, FilterType::Lanczos3).to_rgb8();
    let max = resized
        .as_raw()
        .iter()
        .copied()
        .max()
        .map_or(1e-6, |m| f32::from(m).max(1e-6));

    let plane = (size * size) as usize;
    let mut data = vec![0.0f32; 3 * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            data[c * plane + i] = (f32::from(pixel[c]) / max - spec.mean[c]) / spec.std[c];
        }
    }
    data
}

/// Min-max normalizes the first prediction plane into an 8-bit mask.
pub fn prediction_to_mask(prediction: &[f32], width: u32, height: u32) -> anyhow::Result<GrayImage> {
    let plane = (width * height) as usize;
    let Some(values) = prediction.get(..plane) else {
        bail!("prediction has {} values, expected at least {plane}", prediction.len());
    };
    let min = values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = (max - min).max(f32::EPSILON);
    let pixels = values
        .iter()
        .map(|v| (((v - min) / range) * 255.0).round().clamp(0.0, 255.0) as u8)
        .collect();
    GrayImage::from_raw(width, height, pixels).context("mask dimensions do not match buffer")
}

/// Scales the mask to the image and multiplies it into the alpha channel,
/// so pixels that were already transparent stay transparent.
pub fn apply_mask(image: DynamicImage, mask: &GrayImage) -> RgbaImage {
    let mut rgba = image.into_rgba8();
    let (width, height) = rgba.dimensions();
    let mask = if mask.dimensions() == (width, height) {
        mask.clone()
    } else {
        imageops::resize(mask, width, height, FilterType::Lanczos3)
    };
    for (pixel, alpha) in rgba.pixels_mut().zip(mask.pixels()) {
        pixel[3] = ((u16::from(pixel[3]) * u16::from(alpha[0]) + 127) / 255) as u8;
    }
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage, Rgba};

    #[test]
    fn catalogue_knows_default_model() {
        let spec = lookup(crate::DEFAULT_MODEL).unwrap();
        assert_eq!(spec.input_size, 320);
        assert!(lookup("not-a-model").is_none());
    }

    #[test]
    fn unknown_model_fails_before_download() {
        let factory = OnnxSessionFactory::new("http://127.0.0.1:9");
        let err = factory
            .load("not-a-model", &std::env::temp_dir())
            .err()
            .unwrap();
        assert!(err.to_string().contains("not-a-model"));
    }

    #[test]
    fn preprocess_produces_nchw_planes() {
        let spec = ModelSpec { name: "t", input_size: 4, mean: [0.0; 3], std: [1.0; 3] };
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([255, 0, 0])));
        let data = preprocess(&image, &spec);
        assert_eq!(data.len(), 3 * 16);
        assert!(data[..16].iter().all(|v| (v - 1.0).abs() < 1e-3));
        assert!(data[16..].iter().all(|v| v.abs() < 1e-3));
    }

    #[test]
    fn mask_is_min_max_normalized() {
        let mask = prediction_to_mask(&[0.0, 0.5, 1.0, 0.0], 2, 2).unwrap();
        assert_eq!(mask.get_pixel(0, 0)[0], 0);
        assert_eq!(mask.get_pixel(0, 1)[0], 255);
        assert_eq!(mask.get_pixel(1, 0)[0], 128);
    }

    #[test]
    fn short_prediction_is_rejected() {
        assert!(prediction_to_mask(&[0.0; 3], 2, 2).is_err());
    }

    #[test]
    fn mask_becomes_alpha_at_image_size() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(6, 3, Rgb([10, 20, 30])));
        let mask = GrayImage::from_pixel(6, 3, Luma([77]));
        let out = apply_mask(image, &mask);
        assert_eq!(out.dimensions(), (6, 3));
        assert!(out.pixels().all(|p| p.0 == [10, 20, 30, 77]));

        let small = GrayImage::from_pixel(2, 2, Luma([0]));
        let out = apply_mask(DynamicImage::ImageRgb8(RgbImage::new(6, 3)), &small);
        assert!(out.pixels().all(|p| p[3] == 0));
    }

    #[test]
    fn mask_scales_existing_alpha() {
        let mut image = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 0]));
        image.put_pixel(1, 0, Rgba([10, 20, 30, 128]));
        let opaque = GrayImage::from_pixel(2, 1, Luma([255]));
        let out = apply_mask(DynamicImage::ImageRgba8(image.clone()), &opaque);
        assert_eq!(out.get_pixel(0, 0).0, [10, 20, 30, 0]);
        assert_eq!(out.get_pixel(1, 0).0, [10, 20, 30, 128]);

        let half = GrayImage::from_pixel(2, 1, Luma([128]));
        let out = apply_mask(DynamicImage::ImageRgba8(image), &half);
        assert_eq!(out.get_pixel(0, 0)[3], 0);
        // 128 * 128 / 255 rounds to 64
        assert_eq!(out.get_pixel(1, 0)[3], 64);

        let solid = RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 255]));
        let out = apply_mask(DynamicImage::ImageRgba8(solid), &GrayImage::from_pixel(1, 1, Luma([128])));
        assert_eq!(out.get_pixel(0, 0)[3], 128);
    }

    #[test]
    fn thread_count_defaults_to_runtime_choice() {
        let factory = OnnxSessionFactory::new(DEFAULT_BASE_URL);
        assert_eq!(factory.intra_threads(), None);
        assert_eq!(factory.clone().with_intra_threads(Some(4)).intra_threads(), Some(4));
        assert_eq!(factory.with_intra_threads(Some(0)).intra_threads(), None);
    }

    #[test]
    fn partial_download_sits_next_to_weights() {
        let dest = Path::new("/models/u2netp.onnx");
        assert_eq!(partial_path(dest), PathBuf::from("/models/u2netp.onnx.part"));
    }
}
