mod backend;
mod backends;
mod registry;

pub use backend::{Prediction, Predictor};
pub use backends::LumaPredictor;
pub use registry::PredictorRegistry;
