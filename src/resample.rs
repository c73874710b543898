//! Sample rate conversion

use crate::Sample;

/// Streaming frame-at-a-time sample rate converter
///
/// Callers alternate between feeding input frames while [`is_write_needed`] and pulling output
/// frames otherwise.
///
/// [`is_write_needed`]: MultiChannelResampler::is_write_needed
pub trait MultiChannelResampler {
    /// Samples per frame on both sides
    fn channel_count(&self) -> usize;

    /// Whether another input frame must be written before the next output frame can be read
    fn is_write_needed(&self) -> bool;

    /// Consume one input frame of [`channel_count`](Self::channel_count) samples
    fn write_next_frame(&mut self, frame: &[Sample]);

    /// Produce one output frame of [`channel_count`](Self::channel_count) samples
    fn read_next_frame(&mut self, frame: &mut [Sample]);
}

/// Resampler that linearly interpolates between adjacent input frames
pub struct LinearResampler {
    channels: usize,
    previous: Vec<Sample>,
    current: Vec<Sample>,
    /// Distance of the next output frame past `previous`, in units of `1 / denominator` input
    /// frames
    phase: u64,
    /// Phase advance per output frame
    numerator: u64,
    /// Phase span of one input frame
    denominator: u64,
}

impl LinearResampler {
    /// Construct a converter from `input_rate` to `output_rate`
    ///
    /// # Panics
    ///
    /// Panics if any argument is zero.
    pub fn new(channel_count: usize, input_rate: u32, output_rate: u32) -> Self {
        assert!(channel_count > 0 && input_rate > 0 && output_rate > 0);
        let g = gcd(input_rate, output_rate);
        let denominator = u64::from(output_rate / g);
        Self {
            channels: channel_count,
            previous: vec![0.0; channel_count],
            current: vec![0.0; channel_count],
            // The first output lines up with the first input, which is two writes away
            phase: 2 * denominator,
            numerator: u64::from(input_rate / g),
            denominator,
        }
    }
}

impl MultiChannelResampler for LinearResampler {
    fn channel_count(&self) -> usize {
        self.channels
    }

    fn is_write_needed(&self) -> bool {
        self.phase >= self.denominator
    }

    fn write_next_frame(&mut self, frame: &[Sample]) {
        std::mem::swap(&mut self.previous, &mut self.current);
        self.current.copy_from_slice(&frame[..self.channels]);
        self.phase -= self.denominator;
    }

    fn read_next_frame(&mut self, frame: &mut [Sample]) {
        let t = self.phase as f32 / self.denominator as f32;
        for ((out, &a), &b) in frame[..self.channels]
            .iter_mut()
            .zip(&self.previous)
            .zip(&self.current)
        {
            *out = a + (b - a) * t;
        }
        self.phase += self.numerator;
    }
}

/// Extra output frames allocated beyond the rounded length estimate
pub const RESAMPLE_PAD_FRAMES: usize = 8;

/// Convert interleaved `input` from `input_rate` to `output_rate` using `resampler`
///
/// Output length is bounded by `round(frames * output_rate / input_rate)` plus
/// [`RESAMPLE_PAD_FRAMES`].
pub fn resample_interleaved(
    resampler: &mut dyn MultiChannelResampler,
    input: &[Sample],
    input_rate: u32,
    output_rate: u32,
) -> Vec<Sample> {
    let ch = resampler.channel_count();
    let input_frames = input.len() / ch;
    let estimate = input_frames as f64 * f64::from(output_rate) / f64::from(input_rate);
    let capacity = (estimate + 0.5) as usize + RESAMPLE_PAD_FRAMES;
    let mut output = vec![0.0; capacity * ch];

    let mut frames_in = input.chunks_exact(ch);
    let mut last = None;
    let mut held = false;
    let mut written = 0;
    while written < capacity {
        if resampler.is_write_needed() {
            match frames_in.next() {
                Some(frame) => {
                    resampler.write_next_frame(frame);
                    last = Some(frame);
                }
                // Hold the final frame once so that output reaches it
                None => match last {
                    Some(frame) if !held => {
                        resampler.write_next_frame(frame);
                        held = true;
                    }
                    _ => break,
                },
            }
        } else {
            resampler.read_next_frame(&mut output[written * ch..(written + 1) * ch]);
            written += 1;
        }
    }
    output.truncate(written * ch);
    output
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsample() {
        let mut r = LinearResampler::new(1, 1, 2);
        let out = resample_interleaved(&mut r, &[0.0, 1.0, 2.0, 3.0], 1, 2);
        assert_eq!(out, [0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 3.0]);
    }

    #[test]
    fn downsample() {
        let input = (0..8).map(|x| x as f32).collect::<Vec<_>>();
        let mut r = LinearResampler::new(1, 2, 1);
        let out = resample_interleaved(&mut r, &input, 2, 1);
        assert_eq!(out, [0.0, 2.0, 4.0, 6.0]);
    }

    #[test]
    fn stereo_channels_independent() {
        let mut r = LinearResampler::new(2, 1, 2);
        let out = resample_interleaved(&mut r, &[0.0, 10.0, 1.0, 20.0], 1, 2);
        assert_eq!(out, [0.0, 10.0, 0.5, 15.0, 1.0, 20.0, 1.0, 20.0]);
    }

    #[test]
    fn single_frame() {
        let mut r = LinearResampler::new(1, 24_000, 48_000);
        assert_eq!(resample_interleaved(&mut r, &[0.9], 24_000, 48_000), [0.9, 0.9]);
        let mut r = LinearResampler::new(1, 48_000, 24_000);
        assert_eq!(resample_interleaved(&mut r, &[0.9], 48_000, 24_000), [0.9]);
    }

    #[test]
    fn reaches_last_frame() {
        let mut r = LinearResampler::new(1, 24_000, 48_000);
        let out = resample_interleaved(&mut r, &[0.1, 0.2, 0.3, 0.9], 24_000, 48_000);
        assert_eq!(out.len(), 8);
        assert_eq!(out[6], 0.9);
    }

    #[test]
    fn common_rates_stay_near_estimate() {
        let input = vec![0.25; 44_100];
        let mut r = LinearResampler::new(1, 44_100, 48_000);
        let out = resample_interleaved(&mut r, &input, 44_100, 48_000);
        assert!(out.len() <= 48_000 + RESAMPLE_PAD_FRAMES);
        assert!(out.len() >= 47_990);
        assert!(out.iter().skip(1).all(|&x| (x - 0.25).abs() < 1e-6));
    }

    #[test]
    fn empty_input() {
        let mut r = LinearResampler::new(2, 8000, 48_000);
        assert!(resample_interleaved(&mut r, &[], 8000, 48_000).is_empty());
    }
}
