//! Voice processing module
//!
//! Handles audio capture, playback, and the hosted STT/TTS clients.

mod capture;
mod playback;
mod sink;
mod stt;
mod tts;

pub use capture::{
    AudioCapture, InputLevel, Microphone, SAMPLE_RATE, WavInfo, inspect_wav, samples_to_wav, wav_to_samples,
};
pub use playback::{AudioPlayback, decode_audio};
pub use sink::{FileSink, NullSink};
pub use stt::{SpeechToText, SttProvider};
pub use tts::{TextToSpeech, TtsProvider};
