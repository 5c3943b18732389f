use image::imageops::{self, FilterType};

use crate::error::{PipelineError, Result};
use crate::frame::Image;

/// Fixed two-stage pre-processing applied to every raw frame:
/// resize to a requested size, then a uniform scale factor.
/// Both stages use nearest-neighbour sampling and are no-ops when unset.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TransformChain {
    width: Option<u32>,
    height: Option<u32>,
    scale: Option<f32>,
}

impl TransformChain {
    pub fn new(width: Option<u32>, height: Option<u32>, scale: Option<f32>) -> Result<Self> {
        if width == Some(0) || height == Some(0) {
            return Err(PipelineError::config("input width and height must be positive"));
        }
        if let Some(scale) = scale {
            if !(scale.is_finite() && scale > 0.0) {
                return Err(PipelineError::config(format!(
                    "input size scale must be positive, got {}",
                    scale
                )));
            }
        }
        Ok(Self {
            width,
            height,
            scale,
        })
    }

    pub fn is_identity(&self) -> bool {
        (self.width.is_none() || self.height.is_none()) && self.scale.is_none()
    }

    pub fn apply(&self, image: Image) -> Image {
        let image = self.resize(image);
        self.rescale(image)
    }

    fn resize(&self, image: Image) -> Image {
        match (self.width, self.height) {
            (Some(width), Some(height))
                if image.width() != width || image.height() != height =>
            {
                imageops::resize(&image, width, height, FilterType::Nearest)
            }
            _ => image,
        }
    }

    fn rescale(&self, image: Image) -> Image {
        match self.scale {
            Some(scale) if scale != 1.0 => {
                let width = ((image.width() as f32 * scale).round() as u32).max(1);
                let height = ((image.height() as f32 * scale).round() as u32).max(1);
                imageops::resize(&image, width, height, FilterType::Nearest)
            }
            _ => image,
        }
    }
}
