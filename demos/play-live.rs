//! Plays a melody on the default audio device, together with a sine tone which gets written
//! into a raw PCM line at another sample rate.

use std::{thread, time::Duration};

use wavesynth::{
    cc, AudioPusher, CpalSink, Error, Mixer, MixerOptions, PcmLineOptions, SinkFormat,
    SynthOptions,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

fn main() -> Result<(), Error> {
    simple_logger::init_with_level(log::Level::Info).unwrap_or_default();

    let mixer = Mixer::new(MixerOptions::default().block_size(128))?;
    let sink = CpalSink::open(SinkFormat {
        sample_rate: mixer.options().sample_rate,
        channel_count: mixer.options().channel_count,
    })?;
    let pusher = AudioPusher::start(&mixer, sink)?;

    // electric piano with a bit of portamento
    let synth = mixer.open_synthesizer(SynthOptions::default())?;
    synth.with(|synth| {
        synth.program_change(0, 4);
        synth.controller(0, cc::REVERB, 70);
        synth.controller(0, cc::PORTAMENTO_TIME, 10);
    })?;

    // a quiet drone, written from another thread
    let (drone, writer) = mixer.open_pcm_line(
        PcmLineOptions::default()
            .sample_rate(22050)
            .channel_count(1)
            .volume(0.1),
    )?;
    let drone_thread = thread::spawn(move || {
        let frequency = 110.0 / 22050.0 * std::f32::consts::TAU;
        let mut phase = 0.0f32;
        let mut chunk = vec![0.0; 512];
        loop {
            for sample in chunk.iter_mut() {
                *sample = phase.sin();
                phase = (phase + frequency) % std::f32::consts::TAU;
            }
            // fails once the line got closed
            if writer.write(&chunk).is_err() {
                break;
            }
        }
    });

    let melody = [64, 62, 60, 62, 64, 64, 64, 62, 62, 62, 64, 67, 67];
    for (index, key) in melody.iter().enumerate() {
        synth.with(|synth| {
            synth.controller(0, cc::PORTAMENTO, if index % 4 == 3 { 127 } else { 0 });
            synth.note_on(0, *key, 100);
        })?;
        thread::sleep(Duration::from_millis(300));
        synth.with(|synth| synth.note_off(0, *key))?;
        thread::sleep(Duration::from_millis(50));
    }

    thread::sleep(Duration::from_secs(2));
    drone.close();
    synth.close();
    thread::sleep(Duration::from_millis(100));
    drone_thread.join().ok();
    pusher.stop()
}
