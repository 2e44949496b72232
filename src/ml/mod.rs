pub mod ml_model;
pub mod training;
pub mod inference;

pub use ml_model::{
    class_names, image_to_input, load_and_normalize_image_with_size, model_from_bytes, Classifier, ModelConfig,
    CHANNELS,
};
pub use training::{
    evaluate, split_rows, train_len, train_model, Evaluation, SampleBatch, SampleBatcher, SampleDataset, SampleItem,
    TrainingReport,
};
pub use inference::{InferenceEngine, Predictor};
