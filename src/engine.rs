use std::{
    sync::{atomic::Ordering, mpsc, Arc},
    thread,
    time::Duration,
};

use crate::{
    capture::Capture,
    render::{RenderShared, Renderer, VoiceTable},
    ring::{Producer, RingBuffer},
    source::Mixable,
    stream::{
        AudioStream, Backend, Direction, PerformanceMode, SharingMode, StreamRequest, StreamState,
        Timestamp,
    },
    swap, Error, PlayMode, Result, Sample, SampleBuffer, SampleSource, StreamError,
};

/// Begin building an engine
pub fn engine() -> Builder {
    Builder::default()
}

/// Configuration that engines are built from
#[must_use]
#[derive(Debug, Clone)]
pub struct Builder {
    buffer_size_in_bursts: usize,
    performance_mode: PerformanceMode,
    sharing_mode: SharingMode,
    duplex: bool,
    capture_capacity: usize,
    capture_chunk: usize,
    capture_timeout: Duration,
    start_attempts: usize,
    retry_delay: Duration,
}

impl Builder {
    /// Request an output buffer of `bursts` device bursts
    ///
    /// Smaller is lower latency and more prone to underruns.
    pub fn buffer_size_in_bursts(&mut self, bursts: usize) -> &mut Self {
        self.buffer_size_in_bursts = bursts.max(1);
        self
    }

    /// Latency hint passed when opening streams
    pub fn performance_mode(&mut self, mode: PerformanceMode) -> &mut Self {
        self.performance_mode = mode;
        self
    }

    /// Device sharing requested when opening streams
    pub fn sharing_mode(&mut self, mode: SharingMode) -> &mut Self {
        self.sharing_mode = mode;
        self
    }

    /// Whether to capture from the microphone and mix it into the output
    pub fn duplex(&mut self, enabled: bool) -> &mut Self {
        self.duplex = enabled;
        self
    }

    /// Frames of captured audio buffered between the capture thread and the output
    pub fn capture_capacity(&mut self, frames: usize) -> &mut Self {
        self.capture_capacity = frames.max(1);
        self
    }

    /// Frames requested per blocking capture read
    pub fn capture_chunk(&mut self, frames: usize) -> &mut Self {
        self.capture_chunk = frames.max(1);
        self
    }

    /// How long a capture read may block
    ///
    /// Stopping the engine waits for at most one such read to return.
    pub fn capture_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.capture_timeout = timeout;
        self
    }

    /// How many times to try opening and starting the output before giving up
    pub fn start_attempts(&mut self, attempts: usize) -> &mut Self {
        self.start_attempts = attempts.max(1);
        self
    }

    /// Pause between start attempts
    pub fn retry_delay(&mut self, delay: Duration) -> &mut Self {
        self.retry_delay = delay;
        self
    }

    /// Construct an engine that opens streams through `backend`
    ///
    /// No streams are opened until [`Engine::setup_audio_stream`].
    #[must_use]
    pub fn build<B: Backend>(&self, backend: B) -> Engine<B> {
        Engine {
            backend,
            config: self.clone(),
            channel_count: 0,
            sample_rate: 0,
            voices: Vec::new(),
            publish: None,
            output: None,
            input: None,
            pending_capture: None,
            capture: None,
            render: Arc::new(RenderShared::default()),
            errors: None,
            output_reset: false,
        }
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            buffer_size_in_bursts: 2,
            performance_mode: PerformanceMode::LowLatency,
            sharing_mode: SharingMode::Shared,
            duplex: false,
            capture_capacity: 2048,
            capture_chunk: 256,
            capture_timeout: Duration::from_secs(1),
            start_attempts: 3,
            retry_delay: Duration::from_millis(20),
        }
    }
}

/// Multi-voice sample player
///
/// Owns the attached voices and the streams that play them. Voice controls take `&self` and only
/// touch atomics, so they are cheap enough to call from input handlers; stream lifecycle methods
/// take `&mut self`.
pub struct Engine<B: Backend> {
    backend: B,
    config: Builder,
    channel_count: u16,
    sample_rate: u32,
    voices: Vec<Arc<SampleSource>>,
    /// Feeds the current voice table to the render callback while an output stream exists
    publish: Option<swap::Sender<VoiceTable>>,
    output: Option<B::Stream>,
    input: Option<B::Stream>,
    /// Opened but not yet started capture path
    pending_capture: Option<(B::Reader, Producer)>,
    capture: Option<Capture<Producer>>,
    render: Arc<RenderShared>,
    errors: Option<mpsc::Receiver<StreamError>>,
    output_reset: bool,
}

impl<B: Backend> Engine<B> {
    /// Open the output stream with `channel_count` channels, plus the input stream in duplex mode
    pub fn setup_audio_stream(&mut self, channel_count: u16) -> Result<()> {
        log::info!("setting up {} channel output", channel_count);
        self.channel_count = channel_count;
        self.open_stream()
    }

    /// Close any open streams, then open fresh ones
    pub fn open_stream(&mut self) -> Result<()> {
        self.close_streams();
        let ch = usize::from(self.channel_count);

        let (producer, consumer) = if self.config.duplex && ch > 0 {
            let (p, c) = RingBuffer::new(self.config.capture_capacity, ch);
            (Some(p), Some(c))
        } else {
            (None, None)
        };
        let (publish, voices) = swap::channel(self.voice_table());
        let (error_send, errors) = mpsc::channel();
        self.render.paused.store(false, Ordering::Release);
        self.render.first_frame_hit.store(false, Ordering::Release);
        let mut renderer = Renderer::new(ch, voices, consumer, self.render.clone());

        let request = self.request(Direction::Output, None);
        let mut output = self.backend.open_output(
            &request,
            Box::new(move |out: &mut [Sample]| renderer.render(out)),
            Box::new(move |error: StreamError| {
                log::error!("output stream failed: {}", error);
                let _ = error_send.send(error);
            }),
        )?;

        let frames = output.frames_per_burst() * self.config.buffer_size_in_bursts;
        match output.set_buffer_size_in_frames(frames) {
            Ok(granted) => log::debug!("output buffer is {} frames", granted),
            Err(e) => log::warn!("failed to set output buffer to {} frames: {}", frames, e),
        }
        let rate = output.sample_rate();
        if self.sample_rate != 0 && rate != self.sample_rate && !self.voices.is_empty() {
            log::warn!(
                "device rate changed from {} Hz to {} Hz; loaded voices keep the old rate",
                self.sample_rate,
                rate
            );
        }
        self.sample_rate = rate;
        self.output = Some(output);
        self.publish = Some(publish);
        self.errors = Some(errors);

        if let Some(producer) = producer {
            let request = self.request(Direction::Input, Some(rate));
            match self.backend.open_input(&request) {
                Ok((stream, reader)) => {
                    self.input = Some(stream);
                    self.pending_capture = Some((reader, producer));
                }
                Err(e) => log::warn!("continuing without capture: {}", e),
            }
        }
        log::info!("opened output stream at {} Hz", rate);
        Ok(())
    }

    /// Start the streams, reopening and retrying a bounded number of times on failure
    ///
    /// Opens the streams first if none are open.
    pub fn start_stream(&mut self) -> Result<()> {
        let mut last = Error::NotOpen;
        for attempt in 0..self.config.start_attempts {
            if attempt > 0 {
                // Give the system time to settle
                thread::sleep(self.config.retry_delay);
            }
            if attempt > 0 || self.output.is_none() {
                if let Err(e) = self.open_stream() {
                    log::warn!("open attempt {} failed: {}", attempt + 1, e);
                    last = e;
                    continue;
                }
            }
            match self.try_start() {
                Ok(()) => {
                    log::info!("stream started");
                    return Ok(());
                }
                Err(e) => {
                    log::error!("start attempt {} failed: {}", attempt + 1, e);
                    self.close_streams();
                    last = e;
                }
            }
        }
        Err(last)
    }

    fn try_start(&mut self) -> Result<()> {
        self.output.as_mut().ok_or(Error::NotOpen)?.request_start()?;
        if let Some(ref mut input) = self.input {
            if let Err(e) = input.request_start() {
                log::warn!("continuing without capture: {}", e);
                let _ = input.close();
                self.input = None;
                self.pending_capture = None;
            }
        }
        if let Some((reader, producer)) = self.pending_capture.take() {
            self.capture = Some(Capture::spawn(
                reader,
                producer,
                self.config.capture_chunk,
                self.config.capture_timeout,
            )?);
        }
        Ok(())
    }

    /// Stop and release every stream, joining the capture thread first
    pub fn teardown_audio_stream(&mut self) {
        log::info!("tearing down streams");
        self.close_streams();
    }

    /// Tear down, reopen and start
    pub fn restart(&mut self) -> Result<()> {
        self.teardown_audio_stream();
        self.open_stream()?;
        self.start_stream()
    }

    fn close_streams(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop();
        }
        self.pending_capture = None;
        if let Some(mut input) = self.input.take() {
            let _ = input.request_stop();
            if let Err(e) = input.close() {
                log::warn!("failed to close input stream: {}", e);
            }
        }
        if let Some(mut output) = self.output.take() {
            let _ = output.request_stop();
            if let Err(e) = output.close() {
                log::warn!("failed to close output stream: {}", e);
            }
        }
        self.publish = None;
        self.errors = None;
        self.render.first_frame_hit.store(false, Ordering::Release);
    }

    /// Suspend output and discard queued audio. Does nothing if already paused.
    pub fn pause_stream(&mut self) -> Result<()> {
        let Some(ref mut output) = self.output else {
            return Ok(());
        };
        if self.render.paused.load(Ordering::Acquire) {
            return Ok(());
        }
        log::info!("pausing stream");
        self.render.paused.store(true, Ordering::Release);
        if let Err(e) = output.pause() {
            // The render callback goes silent regardless
            log::warn!("backend pause failed: {}", e);
            return Ok(());
        }
        if let Err(e) = output.flush() {
            log::debug!("flush failed: {}", e);
        }
        Ok(())
    }

    /// Undo [`pause_stream`](Self::pause_stream). Does nothing if not paused.
    pub fn resume_stream(&mut self) -> Result<()> {
        let Some(ref mut output) = self.output else {
            return Ok(());
        };
        if !self.render.paused.load(Ordering::Acquire) {
            return Ok(());
        }
        log::info!("resuming stream");
        if output.state() != StreamState::Started {
            output.request_start()?;
        }
        self.render.paused.store(false, Ordering::Release);
        Ok(())
    }

    /// Whether output is paused
    pub fn is_paused(&self) -> bool {
        self.render.paused.load(Ordering::Acquire)
    }

    /// Turn microphone passthrough on or off
    ///
    /// Open streams are reopened with or without the input side, and a running or paused engine
    /// is restarted in the same state. Attached voices are kept.
    pub fn set_duplex(&mut self, enabled: bool) -> Result<()> {
        if self.config.duplex == enabled {
            return Ok(());
        }
        log::info!("turning passthrough {}", if enabled { "on" } else { "off" });
        self.config.duplex = enabled;
        if self.output.is_none() {
            return Ok(());
        }
        let paused = self.is_paused();
        let running = paused || self.output_state() == StreamState::Started;
        self.open_stream()?;
        if running {
            self.start_stream()?;
            if paused {
                self.pause_stream()?;
            }
        }
        Ok(())
    }

    /// Whether microphone passthrough is on
    pub fn is_duplex(&self) -> bool {
        self.config.duplex
    }

    /// Recover from asynchronous stream failures reported since the last call
    ///
    /// Stops every voice, then reopens and restarts the streams with the usual retry policy. On
    /// success the flag read by [`output_reset`](Self::output_reset) is raised. Returns whether
    /// any failure was pending.
    ///
    /// Voices detached by [`unload_sample_data`](Self::unload_sample_data) are freed by the
    /// first call after the render callback stops using them, so poll this regularly.
    pub fn handle_stream_errors(&mut self) -> bool {
        self.gc();
        let mut pending = 0;
        if let Some(ref errors) = self.errors {
            while errors.try_recv().is_ok() {
                pending += 1;
            }
        }
        if pending == 0 {
            return false;
        }
        log::warn!("recovering from {} stream error(s)", pending);
        self.reset_all();
        self.close_streams();
        match self.start_stream() {
            Ok(()) => {
                self.output_reset = true;
                log::info!("output stream recovered");
            }
            Err(e) => log::error!("failed to recover output stream: {}", e),
        }
        true
    }

    /// Whether the output was reopened after a failure since the last
    /// [`clear_output_reset`](Self::clear_output_reset)
    pub fn output_reset(&self) -> bool {
        self.output_reset
    }

    /// Lower the flag read by [`output_reset`](Self::output_reset)
    pub fn clear_output_reset(&mut self) {
        self.output_reset = false;
    }

    /// Attach a voice playing `buffer`, converted to the output rate, and return its index
    ///
    /// Indices are assigned in attachment order and stay valid until
    /// [`unload_sample_data`](Self::unload_sample_data).
    pub fn add_sample_source(
        &mut self,
        mut buffer: SampleBuffer,
        pan: f32,
        mode: PlayMode,
    ) -> usize {
        if self.sample_rate == 0 {
            log::warn!("no output rate known yet; attaching buffer without resampling");
        }
        buffer.resample(self.sample_rate);
        let index = self.voices.len();
        self.voices
            .push(Arc::new(SampleSource::new(Arc::new(buffer), pan, mode)));
        self.publish_voices();
        log::debug!("attached voice {}", index);
        index
    }

    /// Decode an in-memory WAV file and attach it as a one-shot voice
    pub fn load_wav(&mut self, bytes: &[u8], pan: f32) -> Result<usize> {
        let buffer = SampleBuffer::from_wav_bytes(bytes)?;
        Ok(self.add_sample_source(buffer, pan, PlayMode::OneShot))
    }

    /// Stop and detach every voice
    pub fn unload_sample_data(&mut self) {
        log::info!("unloading {} voice(s)", self.voices.len());
        self.reset_all();
        self.voices.clear();
        self.publish_voices();
    }

    /// Start voice `index` from its first frame
    pub fn trigger_down(&self, index: usize) {
        match self.voices.get(index) {
            Some(voice) => {
                log::debug!("trigger down {}", index);
                voice.set_play_mode();
            }
            None => log::debug!("trigger down {}: no such voice", index),
        }
    }

    /// Stop voice `index` and rewind it
    ///
    /// Also re-arms the first-frame timestamp.
    pub fn trigger_up(&self, index: usize) {
        self.render.first_frame_hit.store(false, Ordering::Release);
        if let Some(voice) = self.voices.get(index) {
            voice.set_stop_mode();
        }
    }

    /// Stop and rewind every voice
    pub fn reset_all(&self) {
        for voice in &self.voices {
            voice.set_stop_mode();
        }
    }

    /// Set the stereo position of voice `index`
    pub fn set_pan(&self, index: usize, pan: f32) {
        if let Some(voice) = self.voices.get(index) {
            voice.set_pan(pan);
        }
    }

    /// Stereo position of voice `index`, or 0 if there is no such voice
    pub fn pan(&self, index: usize) -> f32 {
        self.voices.get(index).map_or(0.0, |x| x.pan())
    }

    /// Set the linear gain of voice `index`
    pub fn set_gain(&self, index: usize, gain: f32) {
        if let Some(voice) = self.voices.get(index) {
            voice.set_gain(gain);
        }
    }

    /// Linear gain of voice `index`, or 0 if there is no such voice
    pub fn gain(&self, index: usize) -> f32 {
        self.voices.get(index).map_or(0.0, |x| x.gain())
    }

    /// Move every playing voice to `position_millis`
    ///
    /// The position is interpreted on a timeline of `sample_rate` frames per second of
    /// `channel_count` samples each. Stopped voices are unaffected.
    pub fn seek_to(&self, position_millis: i64, sample_rate: i32, channel_count: i32) {
        if position_millis < 0 || sample_rate <= 0 || channel_count <= 0 {
            log::warn!(
                "ignoring seek to {} ms at {} Hz x {}",
                position_millis,
                sample_rate,
                channel_count
            );
            return;
        }
        let Some(samples) = position_millis
            .checked_mul(i64::from(sample_rate))
            .and_then(|x| x.checked_mul(i64::from(channel_count)))
        else {
            log::warn!("ignoring seek to {} ms: out of range", position_millis);
            return;
        };
        let samples = samples / 1000;
        log::info!("seeking to {} ms", position_millis);
        for voice in self.voices.iter().filter(|x| x.is_playing()) {
            let ch = i64::from(voice.buffer().channel_count().max(1));
            voice.seek_to_frame(samples / ch);
        }
    }

    /// Playback position of voice `index` in milliseconds, or 0 if there is no such voice
    pub fn position(&self, index: usize, sample_rate: i32, channel_count: i32) -> i64 {
        self.voices
            .get(index)
            .map_or(0, |x| x.position_millis(sample_rate, channel_count))
    }

    /// Length of voice `index` in milliseconds, or 0 if there is no such voice
    pub fn duration(&self, index: usize, sample_rate: i32, channel_count: i32) -> i64 {
        self.voices
            .get(index)
            .map_or(0, |x| x.duration_millis(sample_rate, channel_count))
    }

    /// Frames in the first render callback since the stream opened or a voice was released
    pub fn frame_position(&self) -> i64 {
        self.render.frame_position.load(Ordering::Acquire)
    }

    /// Wall-clock milliseconds since the Unix epoch at that callback
    pub fn frame_timestamp(&self) -> i64 {
        self.render.frame_timestamp.load(Ordering::Acquire)
    }

    /// Presentation timestamp reported by the output stream
    pub fn stream_timestamp(&self) -> Result<Timestamp> {
        self.output.as_ref().ok_or(Error::NotOpen)?.timestamp()
    }

    /// Platform audio session of the output stream
    pub fn audio_session_id(&self) -> Option<i32> {
        self.output.as_ref().and_then(|x| x.session_id())
    }

    /// State of the output stream
    pub fn output_state(&self) -> StreamState {
        self.output
            .as_ref()
            .map_or(StreamState::Closed, |x| x.state())
    }

    /// Negotiated output rate, or 0 before any stream was opened
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Output channel count
    pub fn channel_count(&self) -> u16 {
        self.channel_count
    }

    /// Number of attached voices
    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// The voice at `index`
    pub fn voice(&self, index: usize) -> Option<&Arc<SampleSource>> {
        self.voices.get(index)
    }

    fn voice_table(&self) -> VoiceTable {
        self.voices
            .iter()
            .map(|x| x.clone() as Arc<dyn Mixable>)
            .collect()
    }

    fn publish_voices(&mut self) {
        let table = self.voice_table();
        if let Some(ref mut publish) = self.publish {
            // The superseded table is freed here rather than on the audio thread
            drop(publish.send(table));
        }
        self.gc();
    }

    /// Free voice tables the render callback has moved past
    fn gc(&mut self) {
        if let Some(ref mut publish) = self.publish {
            let placeholder: VoiceTable = Vec::new().into();
            if !publish.reclaim(&placeholder) {
                log::trace!("render callback still holds the previous voice table");
            }
        }
    }

    fn request(&self, direction: Direction, sample_rate: Option<u32>) -> StreamRequest {
        StreamRequest {
            direction,
            channel_count: self.channel_count,
            sample_rate,
            performance_mode: self.config.performance_mode,
            sharing_mode: self.config.sharing_mode,
        }
    }
}

impl<B: Backend> Drop for Engine<B> {
    fn drop(&mut self) {
        self.close_streams();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{offline::OfflineDevice, wav::tests::wav_bytes};
    use std::time::Instant;

    fn started(device: &OfflineDevice, channels: u16) -> Engine<crate::OfflineBackend> {
        let mut engine = engine().retry_delay(Duration::ZERO).build(device.backend());
        engine.setup_audio_stream(channels).unwrap();
        engine.start_stream().unwrap();
        engine
    }

    fn ramp(frames: usize) -> SampleBuffer {
        SampleBuffer::new(1, 48_000, (0..frames).map(|x| x as f32 / 100.0).collect())
    }

    #[test]
    fn mono_voice_into_stereo() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = started(&device, 2);
        let index = engine.add_sample_source(ramp(100), 0.0, PlayMode::OneShot);
        engine.trigger_down(index);
        let out = device.render(50);
        assert_eq!(out.len(), 100);
        for (i, frame) in out.chunks(2).enumerate() {
            let expected = i as f32 / 100.0 * 0.5;
            assert_eq!(frame, [expected, expected]);
        }
        let voice = engine.voice(index).unwrap();
        assert!(voice.is_playing());
        assert_eq!(voice.cursor(), 50);
    }

    #[test]
    fn out_of_range_trigger() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = started(&device, 2);
        engine.add_sample_source(ramp(10), 0.0, PlayMode::OneShot);
        engine.add_sample_source(ramp(10), 0.0, PlayMode::OneShot);
        engine.trigger_down(1);
        engine.trigger_down(99);
        engine.trigger_up(99);
        engine.set_gain(99, 2.0);
        assert!(!engine.voice(0).unwrap().is_playing());
        assert!(engine.voice(1).unwrap().is_playing());
        assert_eq!(engine.gain(99), 0.0);
        assert_eq!(engine.pan(99), 0.0);
        assert_eq!(engine.position(99, 48_000, 2), 0);
    }

    #[test]
    fn buffer_is_two_bursts() {
        let device = OfflineDevice::new(48_000, 96);
        let _engine = started(&device, 2);
        assert_eq!(device.buffer_size(), Some(192));
    }

    #[test]
    fn retries_start() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = engine().retry_delay(Duration::ZERO).build(device.backend());
        engine.setup_audio_stream(2).unwrap();
        device.fail_next_starts(2);
        engine.start_stream().unwrap();
        assert_eq!(device.output_opens(), 3);
        assert_eq!(device.output_state(), Some(StreamState::Started));
    }

    #[test]
    fn gives_up_after_attempts() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = engine().retry_delay(Duration::ZERO).build(device.backend());
        engine.setup_audio_stream(2).unwrap();
        device.fail_next_starts(3);
        assert!(matches!(engine.start_stream(), Err(Error::Start(_))));
        assert_eq!(device.output_state(), None);
        assert_eq!(engine.output_state(), StreamState::Closed);
    }

    #[test]
    fn recovers_from_disconnect() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = started(&device, 2);
        let index = engine.add_sample_source(ramp(100), 0.0, PlayMode::OneShot);
        engine.trigger_down(index);
        assert!(!engine.handle_stream_errors());

        device.disconnect();
        assert_eq!(device.output_state(), Some(StreamState::Disconnected));
        assert!(engine.handle_stream_errors());
        assert!(engine.output_reset());
        assert!(!engine.voice(index).unwrap().is_playing());
        assert_eq!(device.output_state(), Some(StreamState::Started));
        assert_eq!(device.output_opens(), 2);

        // Voices survive the reopen
        engine.trigger_down(index);
        assert!(device.render(4).iter().any(|&x| x != 0.0));

        engine.clear_output_reset();
        assert!(!engine.output_reset());
    }

    #[test]
    fn pause_and_resume() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = started(&device, 1);
        let index = engine.add_sample_source(
            SampleBuffer::new(1, 48_000, vec![1.0; 64]),
            0.0,
            PlayMode::OneShot,
        );
        engine.trigger_down(index);
        engine.pause_stream().unwrap();
        engine.pause_stream().unwrap();
        assert!(engine.is_paused());
        assert_eq!(device.output_state(), Some(StreamState::Paused));
        assert_eq!(device.render(4), [0.0; 4]);

        engine.resume_stream().unwrap();
        engine.resume_stream().unwrap();
        assert!(!engine.is_paused());
        assert_eq!(device.output_state(), Some(StreamState::Started));
        assert_eq!(device.render(4), [1.0; 4]);
    }

    #[test]
    fn broadcast_seek() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = started(&device, 2);
        let a = engine.add_sample_source(ramp(1000), 0.0, PlayMode::OneShot);
        let b = engine.add_sample_source(ramp(1000), 0.0, PlayMode::OneShot);
        engine.trigger_down(a);
        engine.seek_to(10, 48_000, 1);
        assert_eq!(engine.voice(a).unwrap().cursor(), 480);
        assert_eq!(engine.voice(b).unwrap().cursor(), 0);
        assert_eq!(engine.position(a, 48_000, 1), 10);

        engine.seek_to(-5, 48_000, 1);
        engine.seek_to(1000, 48_000, 1);
        engine.seek_to(i64::MAX / 1000, 48_000, 2);
        assert_eq!(engine.voice(a).unwrap().cursor(), 480);
    }

    #[test]
    fn resamples_on_attach() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = started(&device, 2);
        let index = engine.add_sample_source(
            SampleBuffer::new(1, 24_000, vec![0.0; 100]),
            0.0,
            PlayMode::OneShot,
        );
        let buffer = engine.voice(index).unwrap().buffer();
        assert_eq!(buffer.sample_rate(), 48_000);
        assert!((190..=208).contains(&buffer.frame_count()));
        assert_eq!(
            engine.duration(index, 48_000, 1),
            buffer.frame_count() as i64 * 1000 / 48_000
        );
    }

    #[test]
    fn unload() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = started(&device, 1);
        let index = engine.add_sample_source(
            SampleBuffer::new(1, 48_000, vec![1.0; 64]),
            0.0,
            PlayMode::OneShot,
        );
        engine.trigger_down(index);
        engine.unload_sample_data();
        assert_eq!(engine.voice_count(), 0);
        assert_eq!(device.render(4), [0.0; 4]);
        assert_eq!(engine.add_sample_source(ramp(4), 0.0, PlayMode::OneShot), 0);
    }

    #[test]
    fn unload_frees_buffers() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = started(&device, 2);
        let index = engine.add_sample_source(ramp(4800), 0.0, PlayMode::OneShot);
        engine.trigger_down(index);
        device.render(64);
        let buffer = Arc::downgrade(engine.voice(index).unwrap().buffer());
        engine.unload_sample_data();
        // Still referenced until the render callback adopts the empty table
        assert!(buffer.upgrade().is_some());
        for _ in 0..10 {
            device.render(64);
        }
        assert!(!engine.handle_stream_errors());
        assert!(buffer.upgrade().is_none());
    }

    #[test]
    fn load_wav() {
        let device = OfflineDevice::new(44_100, 64);
        let mut engine = started(&device, 2);
        assert!(engine.load_wav(b"RIFF nonsense", 0.0).is_err());
        assert_eq!(engine.voice_count(), 0);
        let index = engine.load_wav(&wav_bytes(1, 44_100, &[16384; 10]), -1.0).unwrap();
        assert_eq!(engine.pan(index), -1.0);
        engine.trigger_down(index);
        let out = device.render(1);
        assert!((out[0] - 0.5).abs() < 1e-4);
        assert_eq!(out[1], 0.0);
    }

    #[test]
    fn first_frame_timestamp() {
        let device = OfflineDevice::new(48_000, 64);
        let engine = started(&device, 2);
        assert_eq!(engine.frame_timestamp(), 0);
        device.render(32);
        device.render(64);
        assert_eq!(engine.frame_position(), 32);
        assert!(engine.frame_timestamp() > 0);
        engine.trigger_up(0);
        device.render(16);
        assert_eq!(engine.frame_position(), 16);
    }

    #[test]
    fn session_id() {
        let device = OfflineDevice::new(48_000, 64);
        device.set_session_id(7);
        let engine = started(&device, 2);
        assert_eq!(engine.audio_session_id(), Some(7));
    }

    #[test]
    fn duplex_passthrough() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = engine()
            .duplex(true)
            .capture_timeout(Duration::from_millis(5))
            .build(device.backend());
        engine.setup_audio_stream(1).unwrap();
        engine.start_stream().unwrap();
        assert_eq!(device.input_state(), Some(StreamState::Started));
        assert!(device.capture(&[0.25; 4]));
        assert_eq!(listen(&device, 4), [0.25; 4]);

        engine.teardown_audio_stream();
        assert_eq!(device.input_state(), None);
        assert_eq!(device.output_state(), None);
    }

    /// Render until `samples` nonzero samples have been heard or a deadline passes
    fn listen(device: &OfflineDevice, samples: usize) -> Vec<Sample> {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut heard = Vec::new();
        while heard.len() < samples && Instant::now() < deadline {
            heard.extend(device.render(4).into_iter().filter(|&x| x != 0.0));
            thread::sleep(Duration::from_millis(1));
        }
        heard
    }

    #[test]
    fn toggle_passthrough() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = engine()
            .capture_timeout(Duration::from_millis(5))
            .retry_delay(Duration::ZERO)
            .build(device.backend());
        engine.set_duplex(false).unwrap();
        engine.setup_audio_stream(1).unwrap();
        engine.start_stream().unwrap();
        let index = engine.add_sample_source(ramp(100), 0.0, PlayMode::OneShot);
        assert_eq!(device.input_state(), None);
        assert!(!device.capture(&[0.25; 4]));

        engine.set_duplex(true).unwrap();
        assert!(engine.is_duplex());
        assert_eq!(device.output_state(), Some(StreamState::Started));
        assert_eq!(device.input_state(), Some(StreamState::Started));
        assert!(device.capture(&[0.25; 4]));
        assert_eq!(listen(&device, 4), [0.25; 4]);

        engine.pause_stream().unwrap();
        engine.set_duplex(false).unwrap();
        assert!(!engine.is_duplex());
        assert!(engine.is_paused());
        assert_eq!(device.input_state(), None);
        assert_eq!(device.output_state(), Some(StreamState::Paused));
        assert_eq!(device.output_opens(), 3);
        assert_eq!(engine.voice_count(), 1);

        engine.resume_stream().unwrap();
        engine.trigger_down(index);
        assert_eq!(device.render(2), [0.0, 0.01]);
    }

    #[test]
    fn duplex_degrades_without_input() {
        let device = OfflineDevice::new(48_000, 64);
        let mut engine = engine()
            .duplex(true)
            .capture_timeout(Duration::from_millis(5))
            .build(device.backend());
        engine.setup_audio_stream(1).unwrap();
        // Occupy the input so the engine's open fails
        engine.teardown_audio_stream();
        let _mic = device
            .backend()
            .open_input(&engine.request(Direction::Input, None))
            .unwrap();
        engine.setup_audio_stream(1).unwrap();
        engine.start_stream().unwrap();
        assert_eq!(device.output_state(), Some(StreamState::Started));
    }
}
