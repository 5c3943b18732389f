pub mod luma;

pub use luma::LumaPredictor;
