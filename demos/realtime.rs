//! Play a few voices on the default output device, with the microphone mixed in

use std::{thread, time::Duration};

use thumper::{CpalBackend, PlayMode, SampleBuffer};

fn main() -> thumper::Result<()> {
    env_logger::init();

    let mut engine = thumper::engine().duplex(true).build(CpalBackend::new());
    engine.setup_audio_stream(2)?;
    engine.start_stream()?;
    let rate = engine.sample_rate();

    let boop = SampleBuffer::new(
        1,
        rate,
        (0..rate / 4)
            .map(|i| {
                let t = i as f32 / rate as f32;
                (t * 500.0 * 2.0 * std::f32::consts::PI).sin() * 0.3
            })
            .collect(),
    );
    let left = engine.add_sample_source(boop.clone(), -1.0, PlayMode::OneShot);
    let right = engine.add_sample_source(boop, 1.0, PlayMode::OneShot);

    for i in 0..12 {
        engine.trigger_down(if i % 2 == 0 { left } else { right });
        thread::sleep(Duration::from_millis(500));
        if engine.handle_stream_errors() {
            println!("output was reset");
            engine.clear_output_reset();
        }
    }
    engine.teardown_audio_stream();
    Ok(())
}
