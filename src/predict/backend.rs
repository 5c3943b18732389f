use crate::error::{PipelineError, Result};
use crate::frame::Image;

/// Index-aligned scores and labels returned by a predictor.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Prediction {
    scores: Vec<f64>,
    labels: Vec<String>,
}

impl Prediction {
    pub fn new(scores: Vec<f64>, labels: Vec<String>) -> Result<Self> {
        if scores.len() != labels.len() {
            return Err(PipelineError::predictor(format!(
                "predictor returned {} scores for {} labels",
                scores.len(),
                labels.len()
            )));
        }
        Ok(Self { scores, labels })
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// (score, label) pairs in predictor order.
    pub fn pairs(&self) -> impl Iterator<Item = (f64, &str)> {
        self.scores
            .iter()
            .copied()
            .zip(self.labels.iter().map(String::as_str))
    }

    /// Highest scoring label, if any.
    pub fn top(&self) -> Option<(f64, &str)> {
        self.pairs()
            .fold(None, |best: Option<(f64, &str)>, (score, label)| match best {
                Some((best_score, _)) if best_score >= score => best,
                _ => Some((score, label)),
            })
    }
}

/// Predictor capability consumed by classification blocks.
///
/// The numeric model lives behind this trait. Implementations receive the
/// image by reference for the duration of the call only.
pub trait Predictor: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Score an image.
    fn predict(&mut self, image: &Image) -> Result<Prediction>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}
