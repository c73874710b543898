use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::{ring::Producer, stream::CaptureReader, Error, Result, Sample};

/// Destination for frames pulled off an input stream
pub(crate) trait CaptureSink: Send + 'static {
    /// Accept `samples`, interleaved with `channel_count` samples per frame
    fn push(&mut self, samples: &[Sample], channel_count: usize);
}

/// Background thread draining a [`CaptureReader`] into a [`CaptureSink`]
///
/// Stopping is cooperative: the thread checks a flag between reads, so shutdown takes at most
/// one read timeout.
pub(crate) struct Capture<S> {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<S>>,
}

impl<S: CaptureSink> Capture<S> {
    pub fn spawn<R>(
        mut reader: R,
        mut sink: S,
        chunk_frames: usize,
        timeout: Duration,
    ) -> Result<Self>
    where
        R: CaptureReader + Send + 'static,
    {
        let running = Arc::new(AtomicBool::new(true));
        let thread = thread::Builder::new().name("capture".into()).spawn({
            let running = running.clone();
            move || {
                let ch = reader.channel_count();
                let mut buffer = vec![0.0; chunk_frames * ch];
                while running.load(Ordering::Acquire) {
                    match reader.read(&mut buffer, chunk_frames, timeout) {
                        Ok(0) => {}
                        Ok(n) => sink.push(&buffer[..n * ch], ch),
                        Err(Error::Disconnected) => {
                            log::warn!("capture stream disconnected");
                            break;
                        }
                        Err(e) => {
                            log::warn!("capture read failed: {}", e);
                            thread::sleep(timeout.min(Duration::from_millis(10)));
                        }
                    }
                }
                log::debug!("capture thread exiting");
                sink
            }
        })?;
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    /// Ask the thread to exit, wait for it, and recover the sink
    pub fn stop(&mut self) -> Option<S> {
        self.running.store(false, Ordering::Release);
        let thread = self.thread.take()?;
        match thread.join() {
            Ok(sink) => Some(sink),
            Err(_) => {
                log::error!("capture thread panicked");
                None
            }
        }
    }
}

impl<S> Drop for Capture<S> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl CaptureSink for Producer {
    fn push(&mut self, samples: &[Sample], channel_count: usize) {
        let out_ch = self.channel_count();
        if channel_count == out_ch {
            self.write(samples);
            return;
        }
        // Remap one frame at a time; overflow is dropped like any other full-buffer write
        if out_ch > MAX_REMAP_CHANNELS {
            return;
        }
        let mut frame = [0.0; MAX_REMAP_CHANNELS];
        for input in samples.chunks_exact(channel_count) {
            for (c, x) in frame[..out_ch].iter_mut().enumerate() {
                *x = input[c % channel_count];
            }
            if self.write(&frame[..out_ch]) == 0 {
                break;
            }
        }
    }
}

const MAX_REMAP_CHANNELS: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        offline::OfflineDevice,
        ring::RingBuffer,
        stream::{AudioStream, Backend, Direction, PerformanceMode, SharingMode, StreamRequest},
    };
    use std::time::Instant;

    #[test]
    fn drains_into_ring() {
        let device = OfflineDevice::new(48_000, 64);
        let (mut stream, reader) = device
            .backend()
            .open_input(&StreamRequest {
                direction: Direction::Input,
                channel_count: 1,
                sample_rate: None,
                performance_mode: PerformanceMode::LowLatency,
                sharing_mode: SharingMode::Shared,
            })
            .unwrap();
        stream.request_start().unwrap();
        let (tx, mut rx) = RingBuffer::new(16, 2);
        let mut capture = Capture::spawn(reader, tx, 4, Duration::from_millis(5)).unwrap();
        device.capture(&[0.5, 0.25]);

        let deadline = Instant::now() + Duration::from_secs(5);
        while rx.frames_available() < 2 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        let mut out = [0.0; 4];
        assert_eq!(rx.read(&mut out), 2);
        // Mono input duplicated across the stereo ring
        assert_eq!(out, [0.5, 0.5, 0.25, 0.25]);
        assert!(capture.stop().is_some());
    }
}
