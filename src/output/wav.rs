use std::{fs::File, io::BufWriter, path::Path};

use hound::{WavSpec, WavWriter};

use crate::{
    output::{to_i16, AudioSink, SampleFormat, SinkFormat},
    Error,
};

// -------------------------------------------------------------------------------------------------

const BUFFER_SIZE_FRAMES: usize = 1024;

// -------------------------------------------------------------------------------------------------

/// An [`AudioSink`] which writes into a wav file instead of playing back.
///
/// Writes never block on anything but file I/O, so rendering into a wav sink runs as fast as
/// the mixer renders. The file gets finalized on [`AudioSink::close`] or when dropped.
pub struct WavSink {
    format: SinkFormat,
    sample_format: SampleFormat,
    writer: Option<WavWriter<BufWriter<File>>>,
    frames_written: u64,
}

impl WavSink {
    /// Create a new wav file with the given format. 32 bit float files by default.
    pub fn create<P: AsRef<Path>>(file_path: P, format: SinkFormat) -> Result<Self, Error> {
        Self::create_with_sample_format(file_path, format, SampleFormat::F32)
    }

    /// Create a new wav file with the given format and sample encoding.
    pub fn create_with_sample_format<P: AsRef<Path>>(
        file_path: P,
        format: SinkFormat,
        sample_format: SampleFormat,
    ) -> Result<Self, Error> {
        let spec = WavSpec {
            channels: format.channel_count as u16,
            sample_rate: format.sample_rate,
            bits_per_sample: (sample_format.bytes_per_sample() * 8) as u16,
            sample_format: match sample_format {
                SampleFormat::F32 => hound::SampleFormat::Float,
                SampleFormat::I16 => hound::SampleFormat::Int,
            },
        };
        let writer =
            WavWriter::create(file_path, spec).map_err(|e| Error::OutputDeviceError(Box::new(e)))?;
        log::info!(
            "Writing wav file: {} Hz, {} channels, {sample_format}",
            format.sample_rate,
            format.channel_count
        );
        Ok(Self {
            format,
            sample_format,
            writer: Some(writer),
            frames_written: 0,
        })
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }
}

impl AudioSink for WavSink {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn buffer_size(&self) -> usize {
        BUFFER_SIZE_FRAMES
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), Error> {
        let writer = self.writer.as_mut().ok_or(Error::SinkClosed)?;
        let result = match self.sample_format {
            SampleFormat::F32 => samples
                .iter()
                .try_for_each(|sample| writer.write_sample(*sample)),
            SampleFormat::I16 => samples
                .iter()
                .try_for_each(|sample| writer.write_sample(to_i16(*sample))),
        };
        result.map_err(|e| Error::OutputDeviceError(Box::new(e)))?;
        self.frames_written += (samples.len() / self.format.channel_count) as u64;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(writer) = self.writer.take() {
            writer
                .finalize()
                .map_err(|e| Error::OutputDeviceError(Box::new(e)))?;
            log::info!("Finalized wav file with {} frames", self.frames_written);
        }
        Ok(())
    }
}

impl Drop for WavSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::error!("Failed to finalize wav file: {err}");
        }
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AudioPusher, Mixer, MixerOptions, SynthOptions};

    #[test]
    fn renders_synth_into_wav_files() -> Result<(), Box<dyn std::error::Error>> {
        let path = std::env::temp_dir().join(format!("wavesynth-test-{}.wav", std::process::id()));
        let mixer = Mixer::new(MixerOptions::default())?;
        let synth = mixer.open_synthesizer(SynthOptions::default())?;
        synth.with(|synth| synth.note_on(0, 64, 100))?;
        let format = SinkFormat {
            sample_rate: 44100,
            channel_count: 2,
        };
        let sink = WavSink::create_with_sample_format(&path, format, SampleFormat::I16)?;
        AudioPusher::start_for(&mixer, sink, 44100)?.wait()?;

        let reader = hound::WavReader::open(&path)?;
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().bits_per_sample, 16);
        assert_eq!(reader.duration(), 44100);
        let peak = reader
            .into_samples::<i16>()
            .try_fold(0i16, |peak, sample| sample.map(|s| peak.max(s.saturating_abs())))?;
        assert!(peak > 0);
        std::fs::remove_file(&path)?;
        Ok(())
    }

    #[test]
    fn writes_after_close_fail() -> Result<(), Box<dyn std::error::Error>> {
        let path = std::env::temp_dir().join(format!("wavesynth-closed-{}.wav", std::process::id()));
        let format = SinkFormat {
            sample_rate: 48000,
            channel_count: 1,
        };
        let mut sink = WavSink::create(&path, format)?;
        sink.write(&[0.0, 0.5])?;
        assert_eq!(sink.frames_written(), 2);
        sink.close()?;
        assert!(matches!(sink.write(&[0.0]), Err(Error::SinkClosed)));
        std::fs::remove_file(&path)?;
        Ok(())
    }
}
