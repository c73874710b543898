use crate::{
    resample::{resample_interleaved, LinearResampler},
    wav::{Decode, WavDecoder},
    Result, Sample,
};

/// Shape of the audio held by a [`SampleBuffer`]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct AudioProperties {
    /// Samples per frame
    pub channel_count: u16,
    /// Frames per second
    pub sample_rate: u32,
}

/// Decoded interleaved PCM for one sound asset
#[derive(Debug, Clone, Default)]
pub struct SampleBuffer {
    properties: AudioProperties,
    data: Vec<Sample>,
}

impl SampleBuffer {
    /// Construct a buffer from interleaved `samples`
    ///
    /// A trailing partial frame is discarded.
    pub fn new(channel_count: u16, sample_rate: u32, mut samples: Vec<Sample>) -> Self {
        if channel_count > 0 {
            let ch = usize::from(channel_count);
            samples.truncate(samples.len() / ch * ch);
        } else {
            samples.clear();
        }
        Self {
            properties: AudioProperties {
                channel_count,
                sample_rate,
            },
            data: samples,
        }
    }

    /// Decode every frame available from `reader`, replacing any previous contents
    pub fn load(&mut self, reader: &mut dyn Decode) -> Result<()> {
        self.properties = AudioProperties {
            channel_count: reader.channel_count(),
            sample_rate: reader.sample_rate(),
        };
        reader.position_to_audio()?;
        let frames = reader.frame_count();
        let ch = usize::from(self.properties.channel_count);
        self.data = vec![0.0; frames * ch];
        let decoded = reader.read_f32(&mut self.data, frames)?;
        self.data.truncate(decoded * ch);
        log::debug!(
            "loaded {} frames, {} channel(s) at {} Hz",
            decoded,
            ch,
            self.properties.sample_rate
        );
        Ok(())
    }

    /// Decode an in-memory WAV file
    pub fn from_wav_bytes(bytes: &[u8]) -> Result<Self> {
        let mut buffer = Self::default();
        buffer.load(&mut WavDecoder::from_bytes(bytes)?)?;
        Ok(buffer)
    }

    /// Convert the contents to `sample_rate`
    ///
    /// Does nothing if the buffer is already at that rate, or if either rate is zero.
    pub fn resample(&mut self, sample_rate: u32) {
        let from = self.properties.sample_rate;
        let ch = self.properties.channel_count;
        if from == sample_rate || from == 0 || sample_rate == 0 || ch == 0 {
            return;
        }
        let mut resampler = LinearResampler::new(usize::from(ch), from, sample_rate);
        self.data = resample_interleaved(&mut resampler, &self.data, from, sample_rate);
        self.properties.sample_rate = sample_rate;
        log::debug!(
            "resampled {} Hz -> {} Hz, {} frames",
            from,
            sample_rate,
            self.frame_count()
        );
    }

    /// The interleaved samples of the frame at `offset`, or `None` if it's out of range
    pub fn frame(&self, offset: usize) -> Option<&[Sample]> {
        let ch = usize::from(self.properties.channel_count);
        if offset >= self.frame_count() {
            return None;
        }
        Some(&self.data[offset * ch..(offset + 1) * ch])
    }

    /// Number of complete frames
    pub fn frame_count(&self) -> usize {
        match self.properties.channel_count {
            0 => 0,
            ch => self.data.len() / usize::from(ch),
        }
    }

    /// Number of samples across all channels, or 0 if nothing is loaded
    pub fn total_samples(&self) -> usize {
        if self.data.is_empty() {
            log::warn!("sample buffer has no data loaded");
        }
        self.data.len()
    }

    /// All samples, interleaved
    pub fn samples(&self) -> &[Sample] {
        &self.data
    }

    /// Channel count and rate
    pub fn properties(&self) -> AudioProperties {
        self.properties
    }

    /// Samples per frame
    pub fn channel_count(&self) -> u16 {
        self.properties.channel_count
    }

    /// Frames per second
    pub fn sample_rate(&self) -> u32 {
        self.properties.sample_rate
    }

    /// Whether any audio is present
    pub fn is_loaded(&self) -> bool {
        !self.data.is_empty()
    }

    /// Release the sample storage
    pub fn unload(&mut self) {
        self.data = Vec::new();
    }
}
