//! CLI command implementations

pub mod check;
pub mod devices;
pub mod kernel;
pub mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use blink_compute::DeviceSet;
use blink_node::{Box2, ChannelSet, Knobs, MemoryImage, OcioBlinkNode, Operation};
use blink_ocio::Config;

use crate::{DeviceChoice, NodeArgs};

/// Global options every command sees.
pub struct Env {
    pub config: Option<PathBuf>,
    pub knobs: Option<PathBuf>,
}

impl Env {
    /// Color config from `--config`, else `$OCIO`, else built-in.
    pub fn color_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load config: {}", path.display())),
            None => blink_ocio::current_config().context("Failed to load the active config"),
        }
    }

    /// Knobs file, then environment overrides.
    pub fn knobs(&self) -> Result<Knobs> {
        let knobs = match &self.knobs {
            Some(path) => Knobs::from_file(path)
                .with_context(|| format!("Failed to load knobs: {}", path.display()))?,
            None => Knobs::default(),
        };
        Ok(knobs.with_env())
    }
}

pub fn parse_operation(op: Option<&str>, default: Operation) -> Result<Operation> {
    match op {
        Some(s) => s.parse().map_err(anyhow::Error::msg),
        None => Ok(default),
    }
}

/// Devices for `choice`.
pub fn devices(choice: DeviceChoice) -> Result<DeviceSet> {
    match choice {
        DeviceChoice::Cpu => Ok(DeviceSet::cpu_only()),
        DeviceChoice::Auto => Ok(DeviceSet::detect()),
        DeviceChoice::Gpu => {
            let set = DeviceSet::detect();
            if set.gpu_name().is_none() {
                bail!("No GPU available");
            }
            Ok(set)
        }
    }
}

/// Validated node reading `input`, with command-line settings on top of
/// the knobs.
pub fn build_node(
    env: &Env,
    args: &NodeArgs,
    use_kernel: bool,
    input: Arc<MemoryImage>,
) -> Result<OcioBlinkNode> {
    let mut knobs = env.knobs()?;
    knobs.operation = parse_operation(args.operation.as_deref(), knobs.operation)?;
    if let Some(h) = args.stripe_height {
        knobs.stripe_height = h.max(1);
    }
    knobs.use_kernel = use_kernel;
    knobs.use_gpu_if_available &= args.device != DeviceChoice::Cpu;

    let devices = devices(args.device)?;
    let mut node = OcioBlinkNode::new(Arc::new(env.color_config()?), devices, knobs);
    node.set_input(input);
    node.validate().context("Validate failed")?;
    Ok(node)
}

/// Loads an image as packed RGBA floats.
pub fn load_image(path: &Path) -> Result<MemoryImage> {
    let img = image::open(path)
        .with_context(|| format!("Failed to load: {}", path.display()))?
        .into_rgba32f();
    let bounds = Box2::from_size(img.width(), img.height());
    Ok(MemoryImage::from_vec(bounds, ChannelSet::rgba(), img.into_raw())?)
}

/// Saves packed RGBA floats. `.exr` and `.hdr` keep floats, other formats
/// are quantized.
pub fn save_image(path: &Path, image: &MemoryImage) -> Result<()> {
    let desc = image.descriptor();
    if desc.n_comps != 4 {
        bail!("Expected RGBA, got {} channels", desc.n_comps);
    }
    let (w, h) = (desc.bounds.width(), desc.bounds.height());
    let buffer = image::Rgba32FImage::from_raw(w, h, image.data().to_vec())
        .context("Image buffer has the wrong size")?;
    let dynamic = image::DynamicImage::ImageRgba32F(buffer);

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let result = match ext.as_str() {
        "exr" => dynamic.save(path),
        "hdr" => image::DynamicImage::ImageRgb32F(dynamic.to_rgb32f()).save(path),
        "png" | "tif" | "tiff" => image::DynamicImage::ImageRgba16(dynamic.to_rgba16()).save(path),
        "jpg" | "jpeg" => image::DynamicImage::ImageRgb8(dynamic.to_rgb8()).save(path),
        _ => image::DynamicImage::ImageRgba8(dynamic.to_rgba8()).save(path),
    };
    result.with_context(|| format!("Failed to save: {}", path.display()))
}

/// Horizontal log ramp with a vertical tint, alpha 1.
pub fn ramp(width: u32, height: u32) -> Result<MemoryImage> {
    let bounds = Box2::from_size(width, height);
    let mut data = Vec::with_capacity(bounds.area() * 4);
    for y in 0..height {
        for x in 0..width {
            let u = x as f32 / width.saturating_sub(1).max(1) as f32;
            let v = y as f32 / height.saturating_sub(1).max(1) as f32;
            data.extend_from_slice(&[u, u * (0.5 + 0.5 * v), u * (1.0 - 0.5 * v), 1.0]);
        }
    }
    Ok(MemoryImage::from_vec(bounds, ChannelSet::rgba(), data)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use blink_node::{Channel, PlaneSource};

    #[test]
    fn ramp_shape() {
        let img = ramp(5, 3).unwrap();
        assert_eq!(img.bounds(), Box2::from_size(5, 3));
        assert_eq!(img.get(4, 0, Channel::Red), 1.0);
        assert_eq!(img.get(2, 2, Channel::Alpha), 1.0);
    }

    #[test]
    fn exr_round_trip_keeps_floats() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.exr");
        let img = ramp(8, 4).unwrap();
        save_image(&path, &img).unwrap();
        let back = load_image(&path).unwrap();
        assert_eq!(back.data(), img.data());
    }

    #[test]
    fn operation_flag() {
        assert_eq!(parse_operation(None, Operation::LinToLog).unwrap(), Operation::LinToLog);
        assert_eq!(parse_operation(Some("log-to-lin"), Operation::LinToLog).unwrap(), Operation::LogToLin);
        assert!(parse_operation(Some("up"), Operation::LogToLin).is_err());
    }
}
