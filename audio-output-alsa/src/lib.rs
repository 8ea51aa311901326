//! # audio-output-alsa
//!
//! ALSA backend for audio-output-core.
//!
//! Provides:
//! - `AlsaBackend`: opens PCM playback handles and mixers through alsa-lib
//! - `AlsaOutput`: the buffered output driver over ALSA
//! - `select_output`: the driver this build should use, as a trait object
//!
//! ## Platform Requirements
//! - Linux with alsa-lib (`libasound2-dev` to build)
//! - Cargo feature `alsa`; without it `select_output` returns the null output
//!
//! ## Usage
//! ```ignore
//! use audio_output_alsa::select_output;
//! use audio_output_core::{OutputConfiguration, SampleFormat, StreamParams};
//!
//! let mut output = select_output(OutputConfiguration::default());
//! let caps = output.init()?;
//! output.open(&StreamParams::new(SampleFormat::S16, 44100, 2))?;
//! ```

#[cfg(all(target_os = "linux", feature = "alsa"))]
pub mod alsa_mixer;
#[cfg(all(target_os = "linux", feature = "alsa"))]
pub mod alsa_pcm;

#[cfg(all(target_os = "linux", feature = "alsa"))]
pub use alsa_mixer::AlsaMixer;
#[cfg(all(target_os = "linux", feature = "alsa"))]
pub use alsa_pcm::{AlsaBackend, AlsaOutput, AlsaPcm};

use audio_output_core::{OutputConfiguration, OutputDriver};

/// The output driver for this build: ALSA when compiled in, the null
/// output otherwise.
#[cfg(all(target_os = "linux", feature = "alsa"))]
pub fn select_output(config: OutputConfiguration) -> Box<dyn OutputDriver> {
    log::info!("Using ALSA output on {}", config.device);
    Box::new(AlsaOutput::new(AlsaBackend::new(), config))
}

/// The output driver for this build: ALSA when compiled in, the null
/// output otherwise.
#[cfg(not(all(target_os = "linux", feature = "alsa")))]
pub fn select_output(config: OutputConfiguration) -> Box<dyn OutputDriver> {
    log::warn!("Built without ALSA support, audio goes to the null output");
    Box::new(audio_output_core::null_output(config))
}
