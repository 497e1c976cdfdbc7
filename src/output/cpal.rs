use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender};
use rb::{Consumer, Producer, RbConsumer, RbProducer, SpscRb, RB};

use crate::{
    output::{AudioSink, SinkFormat},
    Error,
};

// -------------------------------------------------------------------------------------------------

const PREFERRED_BUFFER_SIZE: cpal::BufferSize = if cfg!(debug_assertions) {
    cpal::BufferSize::Default
} else {
    cpal::BufferSize::Fixed(1024)
};

/// Frames the ring buffer between sink writes and the device callback holds.
const RING_BUFFER_FRAMES: usize = 4096;

/// Time a blocking write sleeps while the ring buffer is full.
const WRITE_RETRY_DELAY: Duration = Duration::from_millis(1);

// -------------------------------------------------------------------------------------------------

/// Available audio hosts for cpal output (platform specific)
#[derive(Default, Clone, Copy, PartialEq, Eq, Debug)]
pub enum AudioHostId {
    #[default]
    Default, // system default
    #[cfg(target_os = "windows")]
    Asio,
    #[cfg(target_os = "windows")]
    Wasapi,
    #[cfg(target_os = "linux")]
    Alsa,
    #[cfg(target_os = "linux")]
    Jack,
}

// -------------------------------------------------------------------------------------------------

/// An [`AudioSink`] which plays back on the system's default output device via cpal.
///
/// Writes go into a ring buffer which the device callback drains, so writes block at the
/// device's pace. Underruns play silence.
pub struct CpalSink {
    format: SinkFormat,
    producer: Producer<f32>,
    failed: Arc<AtomicBool>,
    close_send: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    /// Open the default device of the default host with the given format.
    pub fn open(format: SinkFormat) -> Result<Self, Error> {
        Self::open_with_host(AudioHostId::Default, format)
    }

    /// Open the default device of the given host with the given format.
    pub fn open_with_host(host_id: AudioHostId, format: SinkFormat) -> Result<Self, Error> {
        let ring_buffer = SpscRb::new(RING_BUFFER_FRAMES * format.channel_count);
        let producer = ring_buffer.producer();
        let consumer = ring_buffer.consumer();
        let failed = Arc::new(AtomicBool::new(false));

        // cpal streams are not Send on all platforms: hold them in a dedicated thread
        let (open_send, open_recv) = bounded::<Result<(), Error>>(1);
        let (close_send, close_recv) = bounded::<()>(1);
        let thread = thread::Builder::new()
            .name("audio_output".to_string())
            .spawn({
                let failed = Arc::clone(&failed);
                move || match open_stream(host_id, format, consumer, Arc::clone(&failed)) {
                    Ok(stream) => {
                        let _ = open_send.send(Ok(()));
                        hold_stream(stream, close_recv);
                    }
                    Err(err) => {
                        failed.store(true, Ordering::Relaxed);
                        let _ = open_send.send(Err(err));
                    }
                }
            })?;
        open_recv
            .recv()
            .map_err(|err| Error::OutputDeviceError(Box::new(err)))??;

        Ok(Self {
            format,
            producer,
            failed,
            close_send: Some(close_send),
            thread: Some(thread),
        })
    }
}

impl AudioSink for CpalSink {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn buffer_size(&self) -> usize {
        match PREFERRED_BUFFER_SIZE {
            cpal::BufferSize::Fixed(frames) => frames as usize,
            cpal::BufferSize::Default => RING_BUFFER_FRAMES / 4,
        }
    }

    fn write(&mut self, samples: &[f32]) -> Result<(), Error> {
        let mut remaining = samples;
        while !remaining.is_empty() {
            if self.close_send.is_none() {
                return Err(Error::SinkClosed);
            }
            if self.failed.load(Ordering::Relaxed) {
                return Err(Error::OutputDeviceError(
                    "audio output stream failed".into(),
                ));
            }
            match self.producer.write(remaining) {
                Ok(written) => remaining = &remaining[written..],
                Err(_) => thread::sleep(WRITE_RETRY_DELAY),
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        if let Some(close_send) = self.close_send.take() {
            let _ = close_send.send(());
        }
        if let Some(thread) = self.thread.take() {
            thread.join().map_err(|payload| {
                Error::ThreadPanic(panic_message::panic_message(&payload).to_string())
            })?;
        }
        Ok(())
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            log::warn!("Failed to close audio output: {err}");
        }
    }
}

// -------------------------------------------------------------------------------------------------

fn open_stream(
    host_id: AudioHostId,
    format: SinkFormat,
    consumer: Consumer<f32>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, Error> {
    let host = match host_id {
        AudioHostId::Default => cpal::default_host(),
        #[cfg(target_os = "windows")]
        AudioHostId::Asio => cpal::host_from_id(cpal::HostId::Asio).map_err(device_error)?,
        #[cfg(target_os = "windows")]
        AudioHostId::Wasapi => cpal::host_from_id(cpal::HostId::Wasapi).map_err(device_error)?,
        #[cfg(target_os = "linux")]
        AudioHostId::Alsa => cpal::host_from_id(cpal::HostId::Alsa).map_err(device_error)?,
        #[cfg(target_os = "linux")]
        AudioHostId::Jack => cpal::host_from_id(cpal::HostId::Jack).map_err(device_error)?,
    };

    let device = host
        .default_output_device()
        .ok_or(cpal::DefaultStreamConfigError::DeviceNotAvailable)
        .map_err(device_error)?;
    if let Ok(name) = device.name() {
        log::info!("Using audio device: {name}");
    }

    let sample_rate = cpal::SampleRate(format.sample_rate);
    let supported = device
        .supported_output_configs()
        .map_err(device_error)?
        .any(|config| {
            config.channels() as usize == format.channel_count
                && config.sample_format() == cpal::SampleFormat::F32
                && (config.min_sample_rate()..=config.max_sample_rate()).contains(&sample_rate)
        });
    if !supported {
        return Err(Error::OutputDeviceError(
            format!(
                "audio device does not support {} Hz, {} channel float output",
                format.sample_rate, format.channel_count
            )
            .into(),
        ));
    }
    let config = cpal::StreamConfig {
        channels: format.channel_count as cpal::ChannelCount,
        sample_rate,
        buffer_size: PREFERRED_BUFFER_SIZE,
    };

    log::info!("Opening output stream: {config:?}");
    let stream = device
        .build_output_stream(
            &config,
            move |output: &mut [f32], _| {
                let read = consumer.read(output).unwrap_or(0);
                output[read..].fill(0.0);
            },
            move |err| {
                log::error!("Audio output error: {err}");
                failed.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(device_error)?;
    stream.play().map_err(device_error)?;
    Ok(stream)
}

fn hold_stream(stream: cpal::Stream, close_recv: Receiver<()>) {
    // returns when the sink sends close or gets dropped
    let _ = close_recv.recv();
    log::debug!("Closing audio output stream");
    if let Err(err) = stream.pause() {
        log::warn!("Failed to pause audio output stream: {err}");
    }
}

fn device_error<E: std::error::Error + Send + Sync + 'static>(err: E) -> Error {
    Error::OutputDeviceError(Box::new(err))
}
