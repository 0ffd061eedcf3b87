pub mod inference;
pub mod ml_model;
pub mod residual;
pub mod training;

pub use inference::{argmax, InferenceEngine};
pub use ml_model::{categorical_cross_entropy, ActionClassifier, ModelConfig};
pub use residual::{ResidualBlock, ResidualBlockConfig};
pub use training::{train_model, EarlyStopping, EpochMetrics, StopReason, TrainingReport};
