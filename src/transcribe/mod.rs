mod audio;
mod model;

pub use audio::{AudioError, load_wav_samples};

pub use model::{ModelError, ModelInfo, ModelStore, WhisperModel};
