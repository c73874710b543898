use std::{
    sync::{
        atomic::{AtomicBool, AtomicI64, Ordering},
        Arc,
    },
    time::{SystemTime, UNIX_EPOCH},
};

use crate::{ring::Consumer, source::Mixable, swap, Sample};

/// Snapshot of the voices the render callback mixes
pub(crate) type VoiceTable = Arc<[Arc<dyn Mixable>]>;

/// State shared between the engine and its render callback
#[derive(Debug, Default)]
pub(crate) struct RenderShared {
    pub paused: AtomicBool,
    pub first_frame_hit: AtomicBool,
    /// Frames in the first callback after the latest reset of `first_frame_hit`
    pub frame_position: AtomicI64,
    /// Wall-clock milliseconds at that callback
    pub frame_timestamp: AtomicI64,
}

/// Body of the output stream's render callback
pub(crate) struct Renderer {
    channels: usize,
    voices: swap::Receiver<VoiceTable>,
    capture: Option<Consumer>,
    shared: Arc<RenderShared>,
}

impl Renderer {
    pub fn new(
        channels: usize,
        voices: swap::Receiver<VoiceTable>,
        capture: Option<Consumer>,
        shared: Arc<RenderShared>,
    ) -> Self {
        Self {
            channels,
            voices,
            capture,
            shared,
        }
    }

    /// Overwrite `out` with the next block of the mix
    pub fn render(&mut self, out: &mut [Sample]) {
        out.fill(0.0);
        if self.channels == 0 {
            return;
        }
        let frames = out.len() / self.channels;

        if !self.shared.first_frame_hit.load(Ordering::Relaxed) {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |x| x.as_millis() as i64);
            self.shared.frame_timestamp.store(now, Ordering::Relaxed);
            self.shared
                .frame_position
                .store(frames as i64, Ordering::Relaxed);
            self.shared.first_frame_hit.store(true, Ordering::Release);
        }

        if self.shared.paused.load(Ordering::Acquire) {
            // Keep passthrough latency from piling up while nothing is audible
            if let Some(ref mut capture) = self.capture {
                capture.discard(capture.frames_available());
            }
            return;
        }

        self.voices.refresh();
        for voice in self.voices.get().iter() {
            if voice.is_playing() {
                voice.mix_audio(out, self.channels, frames);
            }
        }

        if let Some(ref mut capture) = self.capture {
            capture.read_add(&mut out[..frames * self.channels]);
        }
    }
}
