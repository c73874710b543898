use std::sync::atomic::{AtomicU64, Ordering};

/// Stereo position and amplitude of a voice
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PanGain {
    pan: f32,
    gain: f32,
}

impl PanGain {
    /// Centered, unity gain
    pub const CENTER: Self = Self {
        pan: 0.0,
        gain: 1.0,
    };

    /// Construct from a pan in [-1, 1] (clamped) and a linear gain (negative values become 0)
    pub fn new(pan: f32, gain: f32) -> Self {
        Self {
            pan: clamp_pan(pan),
            gain: clamp_gain(gain),
        }
    }

    /// -1 is hard left, 1 is hard right
    pub fn pan(&self) -> f32 {
        self.pan
    }

    /// Overall linear amplitude factor
    pub fn gain(&self) -> f32 {
        self.gain
    }

    /// Per-channel `(left, right)` factors under a linear pan law
    pub fn gains(&self) -> (f32, f32) {
        let right = self.pan * 0.5 + 0.5;
        ((1.0 - right) * self.gain, right * self.gain)
    }

    fn to_bits(self) -> u64 {
        u64::from(self.pan.to_bits()) << 32 | u64::from(self.gain.to_bits())
    }

    fn from_bits(bits: u64) -> Self {
        Self {
            pan: f32::from_bits((bits >> 32) as u32),
            gain: f32::from_bits(bits as u32),
        }
    }
}

impl Default for PanGain {
    fn default() -> Self {
        Self::CENTER
    }
}

fn clamp_pan(pan: f32) -> f32 {
    if pan.is_nan() {
        0.0
    } else {
        pan.clamp(-1.0, 1.0)
    }
}

fn clamp_gain(gain: f32) -> f32 {
    if gain.is_nan() {
        0.0
    } else {
        gain.max(0.0)
    }
}

/// [`PanGain`] that can be shared between the control and render threads
///
/// Both fields live in one atomic word, so readers never observe a pan from one update paired
/// with a gain from another.
#[derive(Debug)]
pub struct AtomicPanGain(AtomicU64);

impl AtomicPanGain {
    /// Wrap `value`
    pub fn new(value: PanGain) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Snapshot the current value
    pub fn load(&self) -> PanGain {
        PanGain::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Replace the pan, keeping the gain
    pub fn set_pan(&self, pan: f32) {
        self.update(|x| PanGain { pan: clamp_pan(pan), ..x });
    }

    /// Replace the gain, keeping the pan
    pub fn set_gain(&self, gain: f32) {
        self.update(|x| PanGain { gain: clamp_gain(gain), ..x });
    }

    fn update(&self, f: impl Fn(PanGain) -> PanGain) {
        let _ = self.0.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some(f(PanGain::from_bits(bits)).to_bits())
        });
    }
}

impl Default for AtomicPanGain {
    fn default() -> Self {
        Self::new(PanGain::CENTER)
    }
}
