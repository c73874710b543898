//! Caller-driven backend without real hardware
//!
//! [`OfflineDevice`] stands in for a sound card: the application pulls rendered audio with
//! [`OfflineDevice::render`], pushes microphone audio with [`OfflineDevice::capture`], and can
//! inject failures. Useful for tests and for bouncing a mix to a file faster than real time.

use std::{
    collections::VecDeque,
    sync::{
        mpsc::{self, RecvTimeoutError},
        Arc, Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use crate::{
    stream::{
        AudioStream, Backend, CaptureReader, Direction, ErrorCallback, RenderCallback,
        StreamRequest, StreamState, Timestamp,
    },
    Error, Result, Sample, StreamError,
};

/// A simulated audio device
///
/// Cloning produces another handle to the same device.
#[derive(Clone)]
pub struct OfflineDevice {
    inner: Arc<Mutex<Device>>,
}

struct Device {
    sample_rate: u32,
    frames_per_burst: usize,
    session_id: Option<i32>,
    epoch: Instant,
    next_id: u64,
    output: Option<Output>,
    input: Option<Input>,
    fail_opens: usize,
    fail_starts: usize,
    output_opens: usize,
}

struct Output {
    id: u64,
    state: StreamState,
    channel_count: usize,
    buffer_size: usize,
    frames_presented: u64,
    render: RenderCallback,
    on_error: ErrorCallback,
}

struct Input {
    id: u64,
    state: StreamState,
    channel_count: usize,
    buffer_size: usize,
    frames_captured: u64,
    send: mpsc::Sender<Vec<Sample>>,
}

impl OfflineDevice {
    /// Create a device running at `sample_rate` that schedules `frames_per_burst` frames at a time
    pub fn new(sample_rate: u32, frames_per_burst: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Device {
                sample_rate,
                frames_per_burst,
                session_id: None,
                epoch: Instant::now(),
                next_id: 0,
                output: None,
                input: None,
                fail_opens: 0,
                fail_starts: 0,
                output_opens: 0,
            })),
        }
    }

    /// Report `id` as the audio session of every stream
    pub fn set_session_id(&self, id: i32) {
        self.lock().session_id = Some(id);
    }

    /// A backend that opens streams on this device
    pub fn backend(&self) -> OfflineBackend {
        OfflineBackend {
            device: self.clone(),
        }
    }

    /// Run the output stream's render callback for `frames` frames and return what it produced
    ///
    /// Yields silence if no output stream is started.
    pub fn render(&self, frames: usize) -> Vec<Sample> {
        let mut device = self.lock();
        match device.output {
            Some(ref mut out) => {
                let mut buffer = vec![0.0; frames * out.channel_count];
                if out.state == StreamState::Started {
                    (out.render)(&mut buffer);
                    out.frames_presented += frames as u64;
                }
                buffer
            }
            None => Vec::new(),
        }
    }

    /// Deliver interleaved microphone samples to the started input stream
    ///
    /// Returns whether anyone was listening.
    pub fn capture(&self, samples: &[Sample]) -> bool {
        let mut device = self.lock();
        match device.input {
            Some(ref mut input) if input.state == StreamState::Started => {
                input.frames_captured += (samples.len() / input.channel_count) as u64;
                input.send.send(samples.to_vec()).is_ok()
            }
            _ => false,
        }
    }

    /// Simulate the output device being unplugged
    pub fn disconnect(&self) {
        let mut device = self.lock();
        if let Some(ref mut out) = device.output {
            out.state = StreamState::Disconnected;
            (out.on_error)(StreamError::Disconnected);
        }
    }

    /// Make the next `count` stream opens fail
    pub fn fail_next_opens(&self, count: usize) {
        self.lock().fail_opens = count;
    }

    /// Make the next `count` stream starts fail
    pub fn fail_next_starts(&self, count: usize) {
        self.lock().fail_starts = count;
    }

    /// State of the output stream, if one is open
    pub fn output_state(&self) -> Option<StreamState> {
        self.lock().output.as_ref().map(|x| x.state)
    }

    /// State of the input stream, if one is open
    pub fn input_state(&self) -> Option<StreamState> {
        self.lock().input.as_ref().map(|x| x.state)
    }

    /// Number of output streams successfully opened so far
    pub fn output_opens(&self) -> usize {
        self.lock().output_opens
    }

    /// Buffer size granted to the output stream, if one is open
    pub fn buffer_size(&self) -> Option<usize> {
        self.lock().output.as_ref().map(|x| x.buffer_size)
    }

    fn lock(&self) -> MutexGuard<'_, Device> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// [`Backend`] for an [`OfflineDevice`]
pub struct OfflineBackend {
    device: OfflineDevice,
}

impl OfflineBackend {
    fn admit(&self, device: &mut Device, request: &StreamRequest) -> Result<u64> {
        let taken = match request.direction {
            Direction::Output => device.output.is_some(),
            Direction::Input => device.input.is_some(),
        };
        let reason = if device.fail_opens > 0 {
            device.fail_opens -= 1;
            "injected failure"
        } else if taken {
            "device busy"
        } else if request.channel_count == 0 {
            "zero channels requested"
        } else {
            device.next_id += 1;
            return Ok(device.next_id);
        };
        Err(Error::Open {
            direction: request.direction,
            reason: reason.into(),
        })
    }
}

impl Backend for OfflineBackend {
    type Stream = OfflineStream;
    type Reader = OfflineReader;

    fn open_output(
        &mut self,
        request: &StreamRequest,
        render: RenderCallback,
        on_error: ErrorCallback,
    ) -> Result<OfflineStream> {
        let mut device = self.device.lock();
        let id = self.admit(&mut device, request)?;
        let buffer_size = device.frames_per_burst * 4;
        device.output = Some(Output {
            id,
            state: StreamState::Open,
            channel_count: usize::from(request.channel_count),
            buffer_size,
            frames_presented: 0,
            render,
            on_error,
        });
        device.output_opens += 1;
        Ok(OfflineStream {
            device: self.device.clone(),
            direction: Direction::Output,
            id,
        })
    }

    fn open_input(&mut self, request: &StreamRequest) -> Result<(OfflineStream, OfflineReader)> {
        let mut device = self.device.lock();
        let id = self.admit(&mut device, request)?;
        let (send, recv) = mpsc::channel();
        let channel_count = usize::from(request.channel_count);
        let buffer_size = device.frames_per_burst * 4;
        device.input = Some(Input {
            id,
            state: StreamState::Open,
            channel_count,
            buffer_size,
            frames_captured: 0,
            send,
        });
        Ok((
            OfflineStream {
                device: self.device.clone(),
                direction: Direction::Input,
                id,
            },
            OfflineReader {
                recv,
                pending: VecDeque::new(),
                channel_count,
            },
        ))
    }
}

/// Stream opened by an [`OfflineBackend`]
pub struct OfflineStream {
    device: OfflineDevice,
    direction: Direction,
    id: u64,
}

impl OfflineStream {
    /// Apply `f` to this stream's state and buffer size, if the stream is still open
    fn with<T>(&self, f: impl FnOnce(&mut StreamState, &mut usize) -> T) -> Result<T> {
        let mut device = self.device.lock();
        match self.direction {
            Direction::Output => match device.output {
                Some(ref mut x) if x.id == self.id => Ok(f(&mut x.state, &mut x.buffer_size)),
                _ => Err(Error::NotOpen),
            },
            Direction::Input => match device.input {
                Some(ref mut x) if x.id == self.id => Ok(f(&mut x.state, &mut x.buffer_size)),
                _ => Err(Error::NotOpen),
            },
        }
    }

    fn transition(&mut self, to: StreamState) -> Result<()> {
        self.with(|state, _| match *state {
            StreamState::Disconnected => Err(Error::Disconnected),
            _ => {
                *state = to;
                Ok(())
            }
        })?
    }
}

impl AudioStream for OfflineStream {
    fn set_buffer_size_in_frames(&mut self, frames: usize) -> Result<usize> {
        let burst = self.frames_per_burst();
        self.with(|_, size| {
            // Round up to whole bursts
            *size = frames.max(1).div_ceil(burst.max(1)) * burst.max(1);
            *size
        })
    }

    fn request_start(&mut self) -> Result<()> {
        {
            let mut device = self.device.lock();
            if device.fail_starts > 0 {
                device.fail_starts -= 1;
                return Err(Error::Start("injected failure".into()));
            }
        }
        self.transition(StreamState::Started)
    }

    fn request_stop(&mut self) -> Result<()> {
        self.transition(StreamState::Stopped)
    }

    fn pause(&mut self) -> Result<()> {
        self.transition(StreamState::Paused)
    }

    fn flush(&mut self) -> Result<()> {
        self.with(|state, _| match *state {
            StreamState::Paused | StreamState::Stopped | StreamState::Open => Ok(()),
            _ => Err(Error::Stream("flush requires a paused stream".into())),
        })?
    }

    fn close(&mut self) -> Result<()> {
        let mut device = self.device.lock();
        match self.direction {
            Direction::Output if device.output.as_ref().map(|x| x.id) == Some(self.id) => {
                device.output = None;
            }
            Direction::Input if device.input.as_ref().map(|x| x.id) == Some(self.id) => {
                device.input = None;
            }
            _ => {}
        }
        Ok(())
    }

    fn state(&self) -> StreamState {
        self.with(|state, _| *state).unwrap_or(StreamState::Closed)
    }

    fn sample_rate(&self) -> u32 {
        self.device.lock().sample_rate
    }

    fn frames_per_burst(&self) -> usize {
        self.device.lock().frames_per_burst
    }

    fn session_id(&self) -> Option<i32> {
        self.device.lock().session_id
    }

    fn timestamp(&self) -> Result<Timestamp> {
        let device = self.device.lock();
        let frames = match self.direction {
            Direction::Output => device
                .output
                .as_ref()
                .filter(|x| x.id == self.id)
                .map(|x| x.frames_presented),
            Direction::Input => device
                .input
                .as_ref()
                .filter(|x| x.id == self.id)
                .map(|x| x.frames_captured),
        };
        let frame_position = frames.ok_or(Error::NotOpen)?;
        Ok(Timestamp {
            frame_position,
            presentation_nanos: device.epoch.elapsed().as_nanos() as u64,
        })
    }
}

impl Drop for OfflineStream {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Receives frames passed to [`OfflineDevice::capture`]
pub struct OfflineReader {
    recv: mpsc::Receiver<Vec<Sample>>,
    pending: VecDeque<Sample>,
    channel_count: usize,
}

impl CaptureReader for OfflineReader {
    fn channel_count(&self) -> usize {
        self.channel_count
    }

    fn read(&mut self, out: &mut [Sample], frames: usize, timeout: Duration) -> Result<usize> {
        let ch = self.channel_count;
        if self.pending.len() < ch {
            match self.recv.recv_timeout(timeout) {
                Ok(samples) => self.pending.extend(samples),
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => return Err(Error::Disconnected),
            }
        }
        while let Ok(samples) = self.recv.try_recv() {
            self.pending.extend(samples);
        }
        let n = frames.min(out.len() / ch).min(self.pending.len() / ch);
        for (o, s) in out[..n * ch].iter_mut().zip(self.pending.drain(..n * ch)) {
            *o = s;
        }
        Ok(n)
    }
}
