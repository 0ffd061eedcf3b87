pub mod config;
pub mod inference_config;
pub mod model_metadata;
pub mod model_storage;

pub use config::{AppConfig, AugmentationSettings, DeviceType, ModelSettings, PathSettings, TrainingSettings};
pub use inference_config::InferenceConfig;
pub use model_metadata::ModelMetadata;
pub use model_storage::{
    encode_model, load_metadata, load_model_binary, print_metadata_info, save_model_bundle,
    save_model_with_metadata,
};
