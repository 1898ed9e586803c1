pub mod format;
pub mod source;

pub use format::{AudioEncoding, AudioFormat};
pub use source::AudioSource;
