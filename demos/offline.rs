//! Bounce a short drum pattern to `pattern.wav` without touching audio hardware

use thumper::{PlayMode, SampleBuffer};

const RATE: u32 = 48_000;
const BURST: usize = 192;
const STEPS: usize = 16;
const FRAMES_PER_STEP: usize = RATE as usize / 8;

fn tone(freq: f32, decay: f32, seconds: f32) -> SampleBuffer {
    let len = (RATE as f32 * seconds) as usize;
    SampleBuffer::new(
        1,
        RATE,
        (0..len)
            .map(|i| {
                let t = i as f32 / RATE as f32;
                (t * freq * 2.0 * std::f32::consts::PI).sin() * (-t * decay).exp() * 0.8
            })
            .collect(),
    )
}

fn main() -> thumper::Result<()> {
    env_logger::init();

    let device = thumper::OfflineDevice::new(RATE, BURST);
    let mut engine = thumper::engine().build(device.backend());
    engine.setup_audio_stream(2)?;
    engine.start_stream()?;

    let kick = engine.add_sample_source(tone(60.0, 12.0, 0.4), 0.0, PlayMode::OneShot);
    let hat = engine.add_sample_source(tone(7000.0, 60.0, 0.05), 0.6, PlayMode::OneShot);
    let drone = engine.add_sample_source(tone(110.0, 0.0, 0.5), -0.6, PlayMode::Loop);
    engine.set_gain(drone, 0.2);
    engine.trigger_down(drone);

    let mut mix = Vec::with_capacity(STEPS * FRAMES_PER_STEP * 2);
    for step in 0..STEPS {
        if step % 4 == 0 {
            engine.trigger_down(kick);
        }
        if step % 2 == 1 {
            engine.trigger_down(hat);
        }
        let mut remaining = FRAMES_PER_STEP;
        while remaining > 0 {
            let n = remaining.min(BURST);
            mix.extend(device.render(n));
            remaining -= n;
        }
    }

    let mut writer = thumper::WavRecorder::create("pattern.wav", 2, RATE)?;
    writer.write_frames(&mix)?;
    writer.finalize()?;
    println!("wrote {} frames to pattern.wav", mix.len() / 2);
    Ok(())
}
