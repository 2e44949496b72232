pub mod model_metadata;
pub mod model_storage;
pub mod inference_config;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{
    bundle_path, load_metadata, load_model_with_metadata, log_metadata_info, inspect_model, save_model_with_metadata,
    ModelState,
};
pub use inference_config::InferenceConfig;
pub use config::{AcquisitionSettings, AppConfig, DeviceType, PathSettings, ServerSettings, TrainingSettings};
