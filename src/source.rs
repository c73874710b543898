use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    gain::{AtomicPanGain, PanGain},
    Sample, SampleBuffer,
};

/// Something the render callback can mix into its output
///
/// Implementations are called from the real-time thread and must not block, allocate, or log.
pub trait Mixable: Send + Sync {
    /// Add `frames` frames of audio into the interleaved `out`, which has `channel_count`
    /// samples per frame, advancing internal playback state
    fn mix_audio(&self, out: &mut [Sample], channel_count: usize, frames: usize);

    /// Whether `mix_audio` would currently contribute anything
    fn is_playing(&self) -> bool;
}

/// What a [`SampleSource`] does when it reaches the end of its buffer
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum PlayMode {
    /// Stop, leaving the cursor at the end
    #[default]
    OneShot,
    /// Wrap back to the first frame and keep playing
    Loop,
}

/// A playback voice over one [`SampleBuffer`]
///
/// Control methods may be called from any thread while the render thread mixes.
pub struct SampleSource {
    buffer: Arc<SampleBuffer>,
    mode: PlayMode,
    /// `PLAYING` flag plus cursor in frames
    state: AtomicU64,
    params: AtomicPanGain,
}

const PLAYING: u64 = 1 << 63;
const CURSOR_MASK: u64 = PLAYING - 1;

impl SampleSource {
    /// Construct a stopped voice at unity gain
    pub fn new(buffer: Arc<SampleBuffer>, pan: f32, mode: PlayMode) -> Self {
        Self {
            buffer,
            mode,
            state: AtomicU64::new(0),
            params: AtomicPanGain::new(PanGain::new(pan, 1.0)),
        }
    }

    /// The audio this voice plays
    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }

    /// End-of-buffer behavior
    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    /// Start playing from the first frame
    pub fn set_play_mode(&self) {
        self.state.store(PLAYING, Ordering::Release);
    }

    /// Stop playing and rewind to the first frame
    pub fn set_stop_mode(&self) {
        self.state.store(0, Ordering::Release);
    }

    /// Current read position in frames
    pub fn cursor(&self) -> usize {
        (self.state.load(Ordering::Acquire) & CURSOR_MASK) as usize
    }

    /// Set the stereo position, clamped to [-1, 1]
    pub fn set_pan(&self, pan: f32) {
        self.params.set_pan(pan);
    }

    /// Stereo position
    pub fn pan(&self) -> f32 {
        self.params.load().pan()
    }

    /// Set the overall linear amplitude factor
    pub fn set_gain(&self, gain: f32) {
        self.params.set_gain(gain);
    }

    /// Overall linear amplitude factor
    pub fn gain(&self) -> f32 {
        self.params.load().gain()
    }

    /// Left channel factor derived from pan and gain
    pub fn left_gain(&self) -> f32 {
        self.params.load().gains().0
    }

    /// Right channel factor derived from pan and gain
    pub fn right_gain(&self) -> f32 {
        self.params.load().gains().1
    }

    /// Move the cursor to frame `offset` without changing whether the voice is playing
    ///
    /// Returns `false`, leaving the cursor where it was, if `offset` is outside the buffer.
    pub fn seek_to_frame(&self, offset: i64) -> bool {
        let frame = match usize::try_from(offset) {
            Ok(x) if self.buffer.frame(x).is_some() => x as u64,
            _ => {
                log::warn!("cannot seek to frame {}", offset);
                return false;
            }
        };
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |state| {
                Some(state & PLAYING | frame)
            });
        log::debug!("seeked to frame {}", frame);
        true
    }

    /// Playback position in milliseconds, given the output's rate and channel count
    ///
    /// Returns 0 if either is non-positive.
    pub fn position_millis(&self, sample_rate: i32, channel_count: i32) -> i64 {
        let samples = self.cursor() as i64 * i64::from(self.buffer.channel_count());
        samples_to_millis(samples, sample_rate, channel_count)
    }

    /// Length of the buffer in milliseconds, given the output's rate and channel count
    ///
    /// Returns 0 if either is non-positive or nothing is loaded.
    pub fn duration_millis(&self, sample_rate: i32, channel_count: i32) -> i64 {
        samples_to_millis(
            self.buffer.total_samples() as i64,
            sample_rate,
            channel_count,
        )
    }
}

/// Convert an interleaved sample count to milliseconds
pub(crate) fn samples_to_millis(samples: i64, sample_rate: i32, channel_count: i32) -> i64 {
    if sample_rate <= 0 || channel_count <= 0 {
        log::warn!(
            "invalid sample rate ({}) or channel count ({})",
            sample_rate,
            channel_count
        );
        return 0;
    }
    samples * 1000 / (i64::from(sample_rate) * i64::from(channel_count))
}

impl Mixable for SampleSource {
    fn mix_audio(&self, out: &mut [Sample], channel_count: usize, frames: usize) {
        let state = self.state.load(Ordering::Acquire);
        if state & PLAYING == 0 {
            return;
        }
        let buffer = &*self.buffer;
        let total = buffer.frame_count();
        let src_ch = usize::from(buffer.channel_count());
        if total == 0 || channel_count == 0 {
            let _ = self
                .state
                .compare_exchange(state, 0, Ordering::AcqRel, Ordering::Relaxed);
            return;
        }
        let frames = frames.min(out.len() / channel_count);
        let params = self.params.load();
        let data = buffer.samples();

        let mut cursor = ((state & CURSOR_MASK) as usize).min(total);
        let mut done = 0;
        let mut playing = true;
        loop {
            let n = (frames - done).min(total - cursor);
            mix_frames(
                &data[cursor * src_ch..(cursor + n) * src_ch],
                &mut out[done * channel_count..(done + n) * channel_count],
                src_ch,
                channel_count,
                params,
            );
            done += n;
            cursor += n;
            if cursor == total {
                match self.mode {
                    PlayMode::OneShot => {
                        playing = false;
                        break;
                    }
                    PlayMode::Loop => cursor = 0,
                }
            }
            if done == frames {
                break;
            }
        }

        let next = if playing {
            PLAYING | cursor as u64
        } else {
            cursor as u64
        };
        // Losing the race means a control thread retriggered, stopped or seeked; its write wins.
        let _ = self
            .state
            .compare_exchange(state, next, Ordering::AcqRel, Ordering::Relaxed);
    }

    fn is_playing(&self) -> bool {
        self.state.load(Ordering::Acquire) & PLAYING != 0
    }
}

/// Add `src` frames into `out` frames, mapping channels and applying `params`
fn mix_frames(src: &[Sample], out: &mut [Sample], src_ch: usize, out_ch: usize, params: PanGain) {
    let (left, right) = params.gains();
    match (src_ch, out_ch) {
        (1, 1) => {
            let gain = params.gain();
            for (o, &s) in out.iter_mut().zip(src) {
                *o += s * gain;
            }
        }
        (1, 2) => {
            for (o, &s) in out.chunks_exact_mut(2).zip(src) {
                o[0] += s * left;
                o[1] += s * right;
            }
        }
        (2, 1) => {
            for (o, s) in out.iter_mut().zip(src.chunks_exact(2)) {
                *o += s[0] * left + s[1] * right;
            }
        }
        (2, 2) => {
            for (o, s) in out.chunks_exact_mut(2).zip(src.chunks_exact(2)) {
                o[0] += s[0] * left;
                o[1] += s[1] * right;
            }
        }
        _ => {
            let gain = params.gain();
            for (o, s) in out.chunks_exact_mut(out_ch).zip(src.chunks_exact(src_ch)) {
                for (c, x) in o.iter_mut().enumerate() {
                    let factor = match c {
                        0 => left,
                        1 => right,
                        _ => gain,
                    };
                    *x += s[c % src_ch] * factor;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(frames: usize) -> Arc<SampleBuffer> {
        Arc::new(SampleBuffer::new(
            1,
            1000,
            (0..frames).map(|x| x as f32 + 1.0).collect(),
        ))
    }

    #[test]
    fn retrigger_restarts() {
        let src = SampleSource::new(ramp(10), 0.0, PlayMode::OneShot);
        src.set_play_mode();
        let mut out = [0.0; 1];
        src.mix_audio(&mut out, 1, 1);
        src.mix_audio(&mut out, 1, 1);
        assert_eq!(src.cursor(), 2);
        src.set_stop_mode();
        src.set_play_mode();
        let mut out = [0.0; 1];
        src.mix_audio(&mut out, 1, 1);
        assert_eq!(out, [1.0]);
    }

    #[test]
    fn stops_at_end() {
        let src = SampleSource::new(ramp(20), 0.0, PlayMode::OneShot);
        src.set_play_mode();
        assert!(src.seek_to_frame(19));
        let mut out = [0.0; 10];
        src.mix_audio(&mut out, 1, 10);
        assert_eq!(out[0], 20.0);
        assert!(out[1..].iter().all(|&x| x == 0.0));
        assert!(!src.is_playing());
        assert_eq!(src.cursor(), 20);
    }

    #[test]
    fn loops() {
        let src = SampleSource::new(ramp(3), 0.0, PlayMode::Loop);
        src.set_play_mode();
        let mut out = [0.0; 7];
        src.mix_audio(&mut out, 1, 7);
        assert_eq!(out, [1.0, 2.0, 3.0, 1.0, 2.0, 3.0, 1.0]);
        assert!(src.is_playing());
        assert_eq!(src.cursor(), 1);
    }

    #[test]
    fn accumulates() {
        let src = SampleSource::new(ramp(2), -1.0, PlayMode::OneShot);
        src.set_play_mode();
        let mut out = [0.5; 4];
        src.mix_audio(&mut out, 2, 2);
        assert_eq!(out, [1.5, 0.5, 2.5, 0.5]);
    }

    #[test]
    fn stereo_to_mono() {
        let buf = Arc::new(SampleBuffer::new(2, 1000, vec![1.0, 3.0]));
        let src = SampleSource::new(buf, 0.0, PlayMode::OneShot);
        src.set_play_mode();
        let mut out = [0.0; 1];
        src.mix_audio(&mut out, 1, 1);
        assert_eq!(out, [2.0]);
    }

    #[test]
    fn stopped_is_silent() {
        let src = SampleSource::new(ramp(4), 0.0, PlayMode::OneShot);
        let mut out = [0.0; 4];
        src.mix_audio(&mut out, 1, 4);
        assert_eq!(out, [0.0; 4]);
    }

    #[test]
    fn invalid_seek_keeps_cursor() {
        let src = SampleSource::new(ramp(10), 0.0, PlayMode::OneShot);
        assert!(src.seek_to_frame(4));
        assert!(!src.seek_to_frame(10));
        assert!(!src.seek_to_frame(-1));
        assert_eq!(src.cursor(), 4);
        assert!(!src.is_playing());
    }

    #[test]
    fn seek_preserves_playing() {
        let src = SampleSource::new(ramp(10), 0.0, PlayMode::OneShot);
        src.set_play_mode();
        assert!(src.seek_to_frame(5));
        assert!(src.is_playing());
        assert_eq!(src.cursor(), 5);
    }

    #[test]
    fn gain_factors() {
        let src = SampleSource::new(ramp(1), 1.0, PlayMode::OneShot);
        src.set_gain(0.5);
        assert_eq!((src.left_gain(), src.right_gain()), (0.0, 0.5));
        src.set_pan(0.0);
        assert_eq!((src.left_gain(), src.right_gain()), (0.25, 0.25));
    }

    #[test]
    fn millis() {
        let src = SampleSource::new(ramp(500), 0.0, PlayMode::OneShot);
        assert_eq!(src.duration_millis(1000, 1), 500);
        assert_eq!(src.duration_millis(1000, 2), 250);
        assert_eq!(src.duration_millis(0, 2), 0);
        assert!(src.seek_to_frame(250));
        assert_eq!(src.position_millis(1000, 1), 250);
        assert_eq!(src.position_millis(1000, -1), 0);
    }
}
