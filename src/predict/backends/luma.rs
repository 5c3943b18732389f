use crate::error::Result;
use crate::frame::Image;
use crate::predict::backend::{Prediction, Predictor};

const LABELS: [&str; 3] = ["dark", "dim", "bright"];

/// Reference predictor: buckets an image by mean luminance.
///
/// Scores are a softmax-like split over the three buckets so they sum to one.
#[derive(Default)]
pub struct LumaPredictor;

impl LumaPredictor {
    pub fn new() -> Self {
        Self
    }
}

fn mean_luma(image: &Image) -> f64 {
    let count = (image.width() as u64) * (image.height() as u64);
    if count == 0 {
        return 0.0;
    }
    let sum: f64 = image
        .pixels()
        .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
        .sum();
    sum / count as f64
}

impl Predictor for LumaPredictor {
    fn name(&self) -> &'static str {
        "luma"
    }

    fn predict(&mut self, image: &Image) -> Result<Prediction> {
        let luma = mean_luma(image) / 255.0;
        let centers = [1.0 / 6.0, 0.5, 5.0 / 6.0];
        let weights: Vec<f64> = centers
            .iter()
            .map(|c| (-((luma - c) * 6.0).powi(2)).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        let (best, score) = weights
            .iter()
            .enumerate()
            .fold((0, 0.0), |(bi, bs), (i, w)| if *w > bs { (i, *w) } else { (bi, bs) });
        Prediction::new(vec![score / total], vec![LABELS[best].to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luma_buckets_by_brightness() {
        let mut predictor = LumaPredictor::new();

        let black = Image::from_pixel(8, 8, image::Rgb([0, 0, 0]));
        let p = predictor.predict(&black).unwrap();
        assert_eq!(p.top().map(|(_, l)| l), Some("dark"));

        let white = Image::from_pixel(8, 8, image::Rgb([255, 255, 255]));
        let p = predictor.predict(&white).unwrap();
        assert_eq!(p.top().map(|(_, l)| l), Some("bright"));

        let gray = Image::from_pixel(8, 8, image::Rgb([128, 128, 128]));
        let (score, label) = predictor.predict(&gray).unwrap().top().map(|(s, l)| (s, l.to_string())).unwrap();
        assert_eq!(label, "dim");
        assert!(score > 0.0 && score <= 1.0);
    }
}
