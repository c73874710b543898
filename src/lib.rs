//! Low-latency multi-voice sample player
//!
//! ```no_run
//! # fn main() -> thumper::Result<()> {
//! # let kick_wav: &[u8] = &[];
//! let device = thumper::OfflineDevice::new(48_000, 192);
//! let mut engine = thumper::engine().build(device.backend());
//! engine.setup_audio_stream(2)?;
//! engine.start_stream()?;
//!
//! // Loading happens on a control thread
//! let kick = engine.load_wav(kick_wav, 0.0)?;
//!
//! // In an input handler:
//! engine.trigger_down(kick);
//!
//! // The platform's audio thread pulls the mix
//! let block = device.render(192);
//! # Ok(())
//! # }
//! ```
//!
//! Voices are mixed in a real-time callback that never blocks, allocates or frees memory. Voice
//! state is kept in atomics, and the set of voices is handed to the callback through a wait-free
//! triple buffer. In duplex mode a capture thread feeds microphone frames through a
//! [`RingBuffer`] and they are summed into the same output.

#![warn(missing_docs)]

mod buffer;
mod capture;
#[cfg(feature = "cpal")]
mod cpal_backend;
mod engine;
mod error;
mod gain;
pub mod offline;
mod record;
mod render;
pub mod resample;
pub mod ring;
mod source;
pub mod stream;
mod swap;
pub mod wav;

pub use buffer::{AudioProperties, SampleBuffer};
#[cfg(feature = "cpal")]
pub use cpal_backend::{CpalBackend, CpalReader, CpalStream};
pub use engine::{engine, Builder, Engine};
pub use error::{Error, Result, StreamError};
pub use gain::{AtomicPanGain, PanGain};
pub use offline::{OfflineBackend, OfflineDevice};
pub use record::{RecordOptions, Recorder, WavRecorder};
pub use ring::RingBuffer;
pub use source::{Mixable, PlayMode, SampleSource};
pub use stream::{AudioStream, Backend, CaptureReader, StreamState};

/// Unitless instantaneous sound wave amplitude measurement
pub type Sample = f32;
