//! Renders a short chord progression with drums into a wav file, scheduling all notes with
//! sub-block precision.

use wavesynth::{
    cc, AudioSink, Error, Mixer, MixerOptions, SinkFormat, SynthEvent, SynthOptions, WavSink,
};

// -------------------------------------------------------------------------------------------------

#[cfg(all(debug_assertions, feature = "assert-allocs"))]
#[global_allocator]
static A: assert_no_alloc::AllocDisabler = assert_no_alloc::AllocDisabler;

// -------------------------------------------------------------------------------------------------

const BPM: f64 = 96.0;
const BARS: usize = 4;

fn main() -> Result<(), Error> {
    simple_logger::init_with_level(log::Level::Info).unwrap_or_default();

    let mixer = Mixer::new(MixerOptions::default())?;
    let options = *mixer.options();
    let synth = mixer.open_synthesizer(SynthOptions::default())?;

    // strings on channel 0, drums on channel 10
    synth.with(|synth| {
        synth.program_change(0, 48);
        synth.controller(0, cc::REVERB, 80);
        synth.controller(0, cc::CHORUS, 40);
    })?;

    // (frame, event) pairs, sorted by frame
    let frames_per_beat = (60.0 / BPM * options.sample_rate as f64) as u64;
    let chords: [[u8; 3]; BARS] = [[60, 64, 67], [57, 60, 64], [53, 57, 60], [55, 59, 62]];
    let mut events = Vec::new();
    for (bar, chord) in chords.iter().enumerate() {
        let bar_start = bar as u64 * 4 * frames_per_beat;
        for key in chord {
            events.push((bar_start, note_on(0, *key, 90)));
            events.push((bar_start + 4 * frames_per_beat - 1000, note_off(0, *key)));
        }
        for beat in 0..4 {
            let time = bar_start + beat * frames_per_beat;
            let drum = if beat % 2 == 0 { 36 } else { 38 };
            events.push((time, note_on(9, drum, 110)));
            events.push((time, note_on(9, 42, 70)));
            events.push((time + frames_per_beat / 2, note_on(9, 42, 50)));
        }
    }
    events.sort_by_key(|(frame, _)| *frame);

    let path = std::env::temp_dir().join("wavesynth-demo.wav");
    let mut sink = WavSink::create(
        &path,
        SinkFormat {
            sample_rate: options.sample_rate,
            channel_count: options.channel_count,
        },
    )?;

    // one extra bar for the release tails
    let total_frames = (BARS as u64 + 1) * 4 * frames_per_beat;
    let scheduler = synth.with(|synth| synth.scheduler())?;
    let mut block = vec![0.0; mixer.block_samples()];
    let mut pending = events.into_iter().peekable();
    let mut frame = 0;
    while frame < total_frames {
        let block_end = frame + options.block_size as u64;
        while let Some((time, event)) = pending.next_if(|(time, _)| *time < block_end) {
            scheduler.schedule((time - frame) as usize, event)?;
        }
        mixer.render(&mut block)?;
        sink.write(&block)?;
        frame = block_end;
    }
    sink.close()?;

    println!("Wrote {} frames into '{}'", sink.frames_written(), path.display());
    Ok(())
}

fn note_on(channel: u8, key: u8, velocity: u8) -> SynthEvent {
    SynthEvent::NoteOn {
        channel,
        key,
        velocity,
    }
}

fn note_off(channel: u8, key: u8) -> SynthEvent {
    SynthEvent::NoteOff { channel, key }
}
