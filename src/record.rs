//! Recording microphone input to WAV files

use std::{
    fs::File,
    io::{BufWriter, Seek, Write},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crate::{
    capture::{Capture, CaptureSink},
    stream::{
        AudioStream, Backend, Direction, PerformanceMode, SharingMode, StreamRequest, StreamState,
    },
    Error, Result, Sample,
};

/// Writes interleaved float frames as 16-bit PCM WAV
///
/// The RIFF and data chunk sizes are filled in by [`finalize`](Self::finalize).
pub struct WavRecorder<W: Write + Seek> {
    writer: hound::WavWriter<W>,
    channels: usize,
    frames: u64,
}

impl WavRecorder<BufWriter<File>> {
    /// Create or truncate the file at `path`
    pub fn create(path: impl AsRef<Path>, channel_count: u16, sample_rate: u32) -> Result<Self> {
        let file = BufWriter::new(File::create(path)?);
        Self::new(file, channel_count, sample_rate)
    }
}

impl<W: Write + Seek> WavRecorder<W> {
    /// Write a WAV header with placeholder sizes to `inner`
    pub fn new(inner: W, channel_count: u16, sample_rate: u32) -> Result<Self> {
        if channel_count == 0 {
            return Err(Error::Format("cannot record zero channels".into()));
        }
        let spec = hound::WavSpec {
            channels: channel_count,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        Ok(Self {
            writer: hound::WavWriter::new(inner, spec)?,
            channels: usize::from(channel_count),
            frames: 0,
        })
    }

    /// Append whole frames from `samples`, clamping to [-1, 1]
    pub fn write_frames(&mut self, samples: &[Sample]) -> Result<()> {
        let whole = samples.len() / self.channels * self.channels;
        for &s in &samples[..whole] {
            self.writer.write_sample(to_i16(s))?;
        }
        self.frames += (whole / self.channels) as u64;
        Ok(())
    }

    /// Number of frames written so far
    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Patch the header sizes and flush
    pub fn finalize(self) -> Result<()> {
        self.writer.finalize()?;
        Ok(())
    }
}

fn to_i16(x: Sample) -> i16 {
    (x.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

/// Settings for [`Recorder::start`]
#[derive(Debug, Clone)]
pub struct RecordOptions {
    /// Samples per frame
    pub channel_count: u16,
    /// Requested capture rate; the file uses whatever the device grants
    pub sample_rate: u32,
    /// Audio requested per blocking read
    pub chunk: Duration,
    /// How long a read may block, bounding how long [`Recorder::stop`] takes
    pub read_timeout: Duration,
    /// Latency hint for the input stream
    pub performance_mode: PerformanceMode,
    /// Device sharing for the input stream
    pub sharing_mode: SharingMode,
}

impl Default for RecordOptions {
    fn default() -> Self {
        Self {
            channel_count: 1,
            sample_rate: 44_100,
            chunk: Duration::from_millis(20),
            read_timeout: Duration::from_secs(1),
            performance_mode: PerformanceMode::None,
            sharing_mode: SharingMode::Exclusive,
        }
    }
}

#[derive(Default)]
struct RecordShared {
    paused: AtomicBool,
    first_frame_hit: AtomicBool,
    frame_position: AtomicI64,
    frame_timestamp: AtomicI64,
    /// Nanoseconds from the start request to the first captured chunk
    start_delay: AtomicU64,
    frames: AtomicU64,
}

struct RecordSink {
    writer: WavRecorder<BufWriter<File>>,
    shared: Arc<RecordShared>,
    requested: Instant,
    error: Option<Error>,
}

impl CaptureSink for RecordSink {
    fn push(&mut self, samples: &[Sample], channel_count: usize) {
        let shared = &*self.shared;
        if !shared.first_frame_hit.load(Ordering::Relaxed) {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |x| x.as_millis() as i64);
            shared.frame_timestamp.store(now, Ordering::Relaxed);
            shared
                .start_delay
                .store(self.requested.elapsed().as_nanos() as u64, Ordering::Relaxed);
            shared
                .frame_position
                .store((samples.len() / channel_count) as i64, Ordering::Relaxed);
            shared.first_frame_hit.store(true, Ordering::Release);
            log::info!("first recorded frame at {} ms", now);
        }
        if shared.paused.load(Ordering::Acquire) || self.error.is_some() {
            return;
        }
        match self.writer.write_frames(samples) {
            Ok(()) => shared
                .frames
                .store(self.writer.frames_written(), Ordering::Release),
            Err(e) => {
                log::error!("recording write failed: {}", e);
                self.error = Some(e);
            }
        }
    }
}

/// Records an input stream to a WAV file on a background thread
pub struct Recorder<S: AudioStream> {
    stream: S,
    capture: Capture<RecordSink>,
    shared: Arc<RecordShared>,
}

impl<S: AudioStream> Recorder<S> {
    /// Open an input stream on `backend` and begin writing it to `path`
    pub fn start<B>(
        backend: &mut B,
        path: impl AsRef<Path>,
        options: &RecordOptions,
    ) -> Result<Self>
    where
        B: Backend<Stream = S>,
    {
        let path = path.as_ref();
        let (mut stream, reader) = backend.open_input(&StreamRequest {
            direction: Direction::Input,
            channel_count: options.channel_count,
            sample_rate: Some(options.sample_rate),
            performance_mode: options.performance_mode,
            sharing_mode: options.sharing_mode,
        })?;
        let rate = stream.sample_rate();
        let writer = match WavRecorder::create(path, options.channel_count, rate) {
            Ok(x) => x,
            Err(e) => {
                let _ = stream.close();
                return Err(e);
            }
        };
        let requested = Instant::now();
        if let Err(e) = stream.request_start() {
            let _ = stream.close();
            return Err(e);
        }
        let shared = Arc::new(RecordShared::default());
        let sink = RecordSink {
            writer,
            shared: shared.clone(),
            requested,
            error: None,
        };
        let chunk = (u128::from(rate) * options.chunk.as_millis() / 1000).max(1) as usize;
        let capture = match Capture::spawn(reader, sink, chunk, options.read_timeout) {
            Ok(x) => x,
            Err(e) => {
                let _ = stream.close();
                return Err(e);
            }
        };
        log::info!("recording to {} at {} Hz", path.display(), rate);
        Ok(Self {
            stream,
            capture,
            shared,
        })
    }

    /// Stop capturing without ending the file. Does nothing if already paused.
    pub fn pause(&mut self) -> Result<()> {
        if self.shared.paused.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        log::info!("pausing recording");
        if let Err(e) = self.stream.pause() {
            log::warn!("backend pause failed: {}", e);
        }
        Ok(())
    }

    /// Continue capturing after [`pause`](Self::pause)
    pub fn resume(&mut self) -> Result<()> {
        if !self.shared.paused.load(Ordering::Acquire) {
            return Ok(());
        }
        log::info!("resuming recording");
        if self.stream.state() != StreamState::Started {
            self.stream.request_start()?;
        }
        self.shared.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Whether recording is paused
    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Frames written to the file so far
    pub fn frames_recorded(&self) -> u64 {
        self.shared.frames.load(Ordering::Acquire)
    }

    /// Frames in the first chunk captured
    pub fn frame_position(&self) -> i64 {
        self.shared.frame_position.load(Ordering::Acquire)
    }

    /// Wall-clock milliseconds since the Unix epoch when the first chunk arrived
    pub fn frame_timestamp(&self) -> i64 {
        self.shared.frame_timestamp.load(Ordering::Acquire)
    }

    /// Time from requesting the input stream start to the first captured chunk
    ///
    /// `None` until audio arrives.
    pub fn start_delay(&self) -> Option<Duration> {
        if !self.shared.first_frame_hit.load(Ordering::Acquire) {
            return None;
        }
        Some(Duration::from_nanos(self.shared.start_delay.load(Ordering::Relaxed)))
    }

    /// Platform audio session of the input stream
    pub fn audio_session_id(&self) -> Option<i32> {
        self.stream.session_id()
    }

    /// Stop capturing, close the stream and finish the file, returning the frame count
    pub fn stop(mut self) -> Result<u64> {
        let sink = self.capture.stop();
        if let Err(e) = self.stream.request_stop() {
            log::warn!("failed to stop input stream: {}", e);
        }
        self.stream.close()?;
        let mut sink = sink.ok_or_else(|| Error::Stream("capture thread panicked".into()))?;
        if let Some(e) = sink.error.take() {
            return Err(e);
        }
        let frames = sink.writer.frames_written();
        sink.writer.finalize()?;
        log::info!("recorded {} frames", frames);
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::OfflineDevice;
    use std::{io::Cursor, thread, time::Instant};

    #[test]
    fn header_and_samples() {
        let mut cursor = Cursor::new(Vec::new());
        let mut rec = WavRecorder::new(&mut cursor, 2, 44_100).unwrap();
        rec.write_frames(&[0.0, 1.0, -2.0, 0.5, 0.25]).unwrap();
        assert_eq!(rec.frames_written(), 2);
        rec.finalize().unwrap();

        let bytes = cursor.into_inner();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(&bytes[8..16], b"WAVEfmt ");
        let riff_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        assert_eq!(riff_size as usize, bytes.len() - 8);
        let mut reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(
            (spec.channels, spec.sample_rate, spec.bits_per_sample),
            (2, 44_100, 16)
        );
        let samples = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(samples, [0, 32767, -32767, 16384]);
    }

    fn wait_for(mut f: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !f() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn records_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("take.wav");
        let device = OfflineDevice::new(44_100, 64);
        device.set_session_id(3);
        let mut backend = device.backend();
        let options = RecordOptions {
            read_timeout: Duration::from_millis(5),
            ..RecordOptions::default()
        };
        let mut rec = Recorder::start(&mut backend, &path, &options).unwrap();
        assert_eq!(rec.audio_session_id(), Some(3));
        assert_eq!(rec.start_delay(), None);

        thread::sleep(Duration::from_millis(2));
        assert!(device.capture(&[0.5; 100]));
        wait_for(|| rec.frames_recorded() == 100);
        assert_eq!(rec.frame_position(), 100);
        assert!(rec.frame_timestamp() > 0);
        assert!(rec.start_delay().unwrap() >= Duration::from_millis(2));

        rec.pause().unwrap();
        rec.pause().unwrap();
        assert!(!device.capture(&[0.5; 100]));
        rec.resume().unwrap();
        assert!(device.capture(&[-0.5; 50]));
        wait_for(|| rec.frames_recorded() == 150);

        assert_eq!(rec.stop().unwrap(), 150);
        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 44_100);
        assert_eq!(reader.duration(), 150);
        let samples = reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        assert!(samples[..100].iter().all(|&x| x == 16384));
        assert!(samples[100..].iter().all(|&x| x == -16384));
        assert_eq!(device.input_state(), None);
    }

    #[test]
    fn bad_path_releases_stream() {
        let device = OfflineDevice::new(44_100, 64);
        let mut backend = device.backend();
        let result = Recorder::start(
            &mut backend,
            "/nonexistent-dir/take.wav",
            &RecordOptions::default(),
        );
        assert!(matches!(result, Err(Error::Io(_))));
        assert_eq!(device.input_state(), None);
    }
}
