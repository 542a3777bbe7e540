//! External collaborators of the generation pipeline.
//!
//! - `speech`: text-to-speech providers tried in order by [`SpeechSynthesizer`]
//! - `visual`: keyword to image resolution with a disk cache and placeholders

pub mod error;
pub mod speech;
pub mod visual;

pub use error::{ProviderError, ProviderResult, SpeechError, SpeechResult};
pub use speech::{
    AudioFormat, CommandSpeechConfig, CommandSpeechProvider, HttpSpeechConfig, HttpSpeechProvider, SpeechConfig,
    SpeechProvider, SpeechRequest, SpeechSynthesizer, SynthesizedSpeech,
};
pub use visual::{CachedVisualResolver, VisualConfig, VisualResolver};
