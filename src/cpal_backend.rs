//! Hardware backend built on `cpal`

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{
    ring::{Consumer, RingBuffer},
    stream::{
        AudioStream, Backend, CaptureReader, Direction, ErrorCallback, RenderCallback,
        StreamRequest, StreamState, Timestamp,
    },
    Error, Result, Sample, StreamError,
};

/// Frames buffered between cpal's input callback and a [`CaptureReader`]
const INPUT_BUFFER_FRAMES: usize = 8192;

/// Used when the device doesn't report a buffer size range
const FALLBACK_BURST: usize = 256;

/// [`Backend`] for the default devices of a cpal host
pub struct CpalBackend {
    host: cpal::Host,
}

impl CpalBackend {
    /// Use the platform's default host
    pub fn new() -> Self {
        Self {
            host: cpal::default_host(),
        }
    }

    /// Use a specific host
    pub fn with_host(host: cpal::Host) -> Self {
        Self { host }
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn open_error(direction: Direction, reason: impl ToString) -> Error {
    Error::Open {
        direction,
        reason: reason.to_string(),
    }
}

/// Resolve `request` against the device's default configuration
fn stream_config(
    supported: cpal::SupportedStreamConfig,
    request: &StreamRequest,
) -> (cpal::StreamConfig, usize) {
    let burst = match *supported.buffer_size() {
        cpal::SupportedBufferSize::Range { min, .. } if min > 0 => min as usize,
        _ => FALLBACK_BURST,
    };
    let mut config = supported.config();
    config.channels = request.channel_count;
    if let Some(rate) = request.sample_rate {
        config.sample_rate = cpal::SampleRate(rate);
    }
    (config, burst)
}

impl Backend for CpalBackend {
    type Stream = CpalStream;
    type Reader = CpalReader;

    fn open_output(
        &mut self,
        request: &StreamRequest,
        mut render: RenderCallback,
        mut on_error: ErrorCallback,
    ) -> Result<CpalStream> {
        let direction = Direction::Output;
        let device = self
            .host
            .default_output_device()
            .ok_or_else(|| open_error(direction, "no output device"))?;
        let supported = device
            .default_output_config()
            .map_err(|e| open_error(direction, e))?;
        let (config, burst) = stream_config(supported, request);
        let frames = Arc::new(AtomicU64::new(0));
        let channels = u64::from(config.channels.max(1));
        let stream = device
            .build_output_stream(
                &config,
                {
                    let frames = frames.clone();
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        render(data);
                        frames.fetch_add(data.len() as u64 / channels, Ordering::Relaxed);
                    }
                },
                move |err| on_error(err.into()),
                None,
            )
            .map_err(|e| open_error(direction, e))?;
        // Some hosts start streams as soon as they're built
        let _ = stream.pause();
        log::info!(
            "opened cpal output: {} channel(s) at {} Hz",
            config.channels,
            config.sample_rate.0
        );
        Ok(CpalStream::new(stream, config.sample_rate.0, burst, frames))
    }

    fn open_input(&mut self, request: &StreamRequest) -> Result<(CpalStream, CpalReader)> {
        let direction = Direction::Input;
        let device = self
            .host
            .default_input_device()
            .ok_or_else(|| open_error(direction, "no input device"))?;
        let supported = device
            .default_input_config()
            .map_err(|e| open_error(direction, e))?;
        let (config, burst) = stream_config(supported, request);
        let channels = usize::from(config.channels.max(1));
        let (mut producer, consumer) = RingBuffer::new(INPUT_BUFFER_FRAMES, channels);
        let frames = Arc::new(AtomicU64::new(0));
        let stream = device
            .build_input_stream(
                &config,
                {
                    let frames = frames.clone();
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let n = producer.write(data);
                        frames.fetch_add(n as u64, Ordering::Relaxed);
                    }
                },
                |err| log::error!("input stream failed: {}", err),
                None,
            )
            .map_err(|e| open_error(direction, e))?;
        let _ = stream.pause();
        log::info!(
            "opened cpal input: {} channel(s) at {} Hz",
            config.channels,
            config.sample_rate.0
        );
        Ok((
            CpalStream::new(stream, config.sample_rate.0, burst, frames),
            CpalReader { consumer },
        ))
    }
}

/// Stream opened by a [`CpalBackend`]
pub struct CpalStream {
    stream: Option<cpal::Stream>,
    state: StreamState,
    sample_rate: u32,
    burst: usize,
    frames: Arc<AtomicU64>,
    opened: Instant,
}

impl CpalStream {
    fn new(stream: cpal::Stream, sample_rate: u32, burst: usize, frames: Arc<AtomicU64>) -> Self {
        Self {
            stream: Some(stream),
            state: StreamState::Open,
            sample_rate,
            burst,
            frames,
            opened: Instant::now(),
        }
    }

    fn stream(&self) -> Result<&cpal::Stream> {
        self.stream.as_ref().ok_or(Error::NotOpen)
    }
}

impl AudioStream for CpalStream {
    fn set_buffer_size_in_frames(&mut self, _frames: usize) -> Result<usize> {
        // cpal fixes the buffer size when the stream is built
        Err(Error::Unsupported)
    }

    fn request_start(&mut self) -> Result<()> {
        self.stream()?
            .play()
            .map_err(|e| Error::Start(e.to_string()))?;
        self.state = StreamState::Started;
        Ok(())
    }

    fn request_stop(&mut self) -> Result<()> {
        self.stream()?
            .pause()
            .map_err(|e| Error::Stream(e.to_string()))?;
        self.state = StreamState::Stopped;
        Ok(())
    }

    fn pause(&mut self) -> Result<()> {
        self.stream()?
            .pause()
            .map_err(|e| Error::Stream(e.to_string()))?;
        self.state = StreamState::Paused;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.stream()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.stream = None;
        self.state = StreamState::Closed;
        Ok(())
    }

    fn state(&self) -> StreamState {
        self.state
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn frames_per_burst(&self) -> usize {
        self.burst
    }

    fn session_id(&self) -> Option<i32> {
        None
    }

    fn timestamp(&self) -> Result<Timestamp> {
        self.stream()?;
        Ok(Timestamp {
            frame_position: self.frames.load(Ordering::Relaxed),
            presentation_nanos: self.opened.elapsed().as_nanos() as u64,
        })
    }
}

/// Polls frames captured by a cpal input stream
pub struct CpalReader {
    consumer: Consumer,
}

impl CaptureReader for CpalReader {
    fn channel_count(&self) -> usize {
        self.consumer.channel_count()
    }

    fn read(&mut self, out: &mut [Sample], frames: usize, timeout: Duration) -> Result<usize> {
        let ch = self.consumer.channel_count();
        let len = (frames * ch).min(out.len());
        let deadline = Instant::now() + timeout;
        loop {
            let n = self.consumer.read(&mut out[..len]);
            if n > 0 || Instant::now() >= deadline {
                return Ok(n);
            }
            thread::sleep(Duration::from_millis(1));
        }
    }
}

impl From<cpal::StreamError> for StreamError {
    fn from(e: cpal::StreamError) -> Self {
        match e {
            cpal::StreamError::DeviceNotAvailable => StreamError::Disconnected,
            cpal::StreamError::BackendSpecific { err } => StreamError::Backend(err.description),
        }
    }
}
