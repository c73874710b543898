//! Interfaces to the platform audio stack
//!
//! The engine never talks to hardware directly. A [`Backend`] opens [`AudioStream`]s that call
//! back into the engine for output and hand over a [`CaptureReader`] for input.

use std::{fmt, time::Duration};

use crate::{Result, Sample, StreamError};

/// Called on the audio thread to fill an interleaved output buffer
pub type RenderCallback = Box<dyn FnMut(&mut [Sample]) + Send>;

/// Called when a running stream fails asynchronously
pub type ErrorCallback = Box<dyn FnMut(StreamError) + Send>;

/// Opens streams on some audio device
pub trait Backend {
    /// Handle to an open stream
    type Stream: AudioStream;
    /// Blocking source of captured frames
    type Reader: CaptureReader + Send + 'static;

    /// Open an output stream that pulls audio from `render`
    fn open_output(
        &mut self,
        request: &StreamRequest,
        render: RenderCallback,
        on_error: ErrorCallback,
    ) -> Result<Self::Stream>;

    /// Open an input stream whose frames are obtained through the returned reader
    fn open_input(&mut self, request: &StreamRequest) -> Result<(Self::Stream, Self::Reader)>;
}

/// Lifecycle control of one open stream
pub trait AudioStream {
    /// Ask for a device buffer of `frames` frames, returning the size actually granted
    fn set_buffer_size_in_frames(&mut self, frames: usize) -> Result<usize>;
    /// Begin invoking callbacks
    fn request_start(&mut self) -> Result<()>;
    /// Stop invoking callbacks, draining queued audio
    fn request_stop(&mut self) -> Result<()>;
    /// Stop invoking callbacks, keeping queued audio
    fn pause(&mut self) -> Result<()>;
    /// Discard queued audio of a paused stream
    fn flush(&mut self) -> Result<()>;
    /// Release the device
    fn close(&mut self) -> Result<()>;
    /// Current lifecycle state
    fn state(&self) -> StreamState;
    /// Negotiated frame rate
    fn sample_rate(&self) -> u32;
    /// Smallest unit of frames the device schedules
    fn frames_per_burst(&self) -> usize;
    /// Platform audio session identifier, if the platform has such a thing
    fn session_id(&self) -> Option<i32>;
    /// Most recent frame position and when it was presented
    fn timestamp(&self) -> Result<Timestamp>;
}

/// Blocking reads from an input stream
pub trait CaptureReader {
    /// Samples per frame
    fn channel_count(&self) -> usize;

    /// Wait up to `timeout` for captured audio, copying at most `frames` frames into `out`
    ///
    /// Returns the number of frames read; 0 means the timeout elapsed.
    fn read(&mut self, out: &mut [Sample], frames: usize, timeout: Duration) -> Result<usize>;
}

/// Lifecycle state of a stream
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StreamState {
    /// Configured but not running
    Open,
    /// Invoking callbacks
    Started,
    /// Suspended with queued audio retained
    Paused,
    /// Suspended after draining
    Stopped,
    /// Released
    Closed,
    /// The device went away
    Disconnected,
}

/// Which way audio flows through a stream
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    /// Device to application
    Input,
    /// Application to device
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Input => "input",
            Direction::Output => "output",
        })
    }
}

/// Latency versus power tradeoff hint
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PerformanceMode {
    /// No preference
    None,
    /// Minimize power draw
    PowerSaving,
    /// Minimize latency
    #[default]
    LowLatency,
}

/// Whether other applications may use the device concurrently
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SharingMode {
    /// Sole access, where the platform permits it
    Exclusive,
    /// Mixed with other clients
    #[default]
    Shared,
}

/// Parameters for opening a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Which way audio flows
    pub direction: Direction,
    /// Samples per frame
    pub channel_count: u16,
    /// Desired rate, or `None` to accept the device default
    pub sample_rate: Option<u32>,
    /// Latency hint
    pub performance_mode: PerformanceMode,
    /// Device sharing
    pub sharing_mode: SharingMode,
}

/// Position of a stream on the presentation timeline
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Timestamp {
    /// Frames presented since the stream started
    pub frame_position: u64,
    /// Monotonic time at which `frame_position` was presented
    pub presentation_nanos: u64,
}
