//! WAV decoding

use std::io::{Cursor, Read, Seek};

use crate::{Error, Result, Sample};

/// Source of decoded PCM that a [`SampleBuffer`](crate::SampleBuffer) can be loaded from
pub trait Decode {
    /// Samples per frame
    fn channel_count(&self) -> u16;

    /// Frames per second
    fn sample_rate(&self) -> u32;

    /// Total number of frames in the asset
    fn frame_count(&self) -> usize;

    /// Rewind to the first frame of audio data
    fn position_to_audio(&mut self) -> Result<()>;

    /// Decode up to `frames` frames into `out` as floats in [-1, 1], returning the number of
    /// frames decoded
    fn read_f32(&mut self, out: &mut [Sample], frames: usize) -> Result<usize>;
}

/// [`Decode`] implementation for RIFF WAVE data
pub struct WavDecoder<R> {
    reader: hound::WavReader<R>,
}

impl<'a> WavDecoder<Cursor<&'a [u8]>> {
    /// Parse the header of an in-memory WAV file
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> WavDecoder<R> {
    /// Parse the header of a WAV stream
    pub fn new(source: R) -> Result<Self> {
        let reader = hound::WavReader::new(source)?;
        let spec = reader.spec();
        if spec.channels == 0 {
            return Err(Error::Format("WAV declares zero channels".into()));
        }
        if spec.sample_format == hound::SampleFormat::Float && spec.bits_per_sample != 32 {
            return Err(Error::Format(format!(
                "{}-bit float samples",
                spec.bits_per_sample
            )));
        }
        Ok(Self { reader })
    }
}

impl<R: Read + Seek> Decode for WavDecoder<R> {
    fn channel_count(&self) -> u16 {
        self.reader.spec().channels
    }

    fn sample_rate(&self) -> u32 {
        self.reader.spec().sample_rate
    }

    fn frame_count(&self) -> usize {
        self.reader.duration() as usize
    }

    fn position_to_audio(&mut self) -> Result<()> {
        self.reader.seek(0)?;
        Ok(())
    }

    fn read_f32(&mut self, out: &mut [Sample], frames: usize) -> Result<usize> {
        let spec = self.reader.spec();
        let ch = usize::from(spec.channels);
        let wanted = (frames * ch).min(out.len() / ch * ch);
        let mut n = 0;
        match spec.sample_format {
            hound::SampleFormat::Int => {
                let max_value = (2_u32.pow(u32::from(spec.bits_per_sample) - 1) - 1) as f32;
                for (o, s) in out[..wanted].iter_mut().zip(self.reader.samples::<i32>()) {
                    *o = s? as f32 / max_value;
                    n += 1;
                }
            }
            hound::SampleFormat::Float => {
                for (o, s) in out[..wanted].iter_mut().zip(self.reader.samples::<f32>()) {
                    *o = s?;
                    n += 1;
                }
            }
        }
        Ok(n / ch)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encode `samples` as a 16-bit PCM WAV file in memory
    pub(crate) fn wav_bytes(channels: u16, sample_rate: u32, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn decode_int() {
        let bytes = wav_bytes(2, 22_050, &[0, 32767, -32767, 0]);
        let mut d = WavDecoder::from_bytes(&bytes).unwrap();
        assert_eq!(d.channel_count(), 2);
        assert_eq!(d.sample_rate(), 22_050);
        assert_eq!(d.frame_count(), 2);
        d.position_to_audio().unwrap();
        let mut out = [9.0; 4];
        assert_eq!(d.read_f32(&mut out, 2).unwrap(), 2);
        assert_eq!(out, [0.0, 1.0, -1.0, 0.0]);
        assert_eq!(d.read_f32(&mut out, 2).unwrap(), 0);
    }

    #[test]
    fn decode_float() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        writer.write_sample(0.5f32).unwrap();
        writer.write_sample(-0.25f32).unwrap();
        writer.finalize().unwrap();
        let bytes = cursor.into_inner();

        let mut d = WavDecoder::from_bytes(&bytes).unwrap();
        let mut out = [0.0; 2];
        assert_eq!(d.read_f32(&mut out, 2).unwrap(), 2);
        assert_eq!(out, [0.5, -0.25]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            WavDecoder::from_bytes(b"definitely not a wav file"),
            Err(Error::Wav(_))
        ));
    }
}
