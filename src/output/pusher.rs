use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};

use crate::{output::AudioSink, Error, Mixer};

// -------------------------------------------------------------------------------------------------

/// Renders a [`Mixer`] in a dedicated, real-time priority thread and writes the blocks into an
/// [`AudioSink`].
///
/// The pusher blocks on the sink's writes, so the sink's pace throttles rendering. When the
/// sink fails, the pusher stops and reports the error on [`Self::stop`] or [`Self::wait`]. The
/// mixer stays usable and can be pushed into a new sink.
pub struct AudioPusher {
    stop_send: Sender<()>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<Result<(), Error>>>,
}

impl AudioPusher {
    /// Start pushing the mixer into the given sink until stopped.
    pub fn start<S: AudioSink>(mixer: &Mixer, sink: S) -> Result<Self, Error> {
        Self::spawn(mixer, sink, None)
    }

    /// Start pushing exactly `frames` frames of the mixer into the given sink, then close it.
    pub fn start_for<S: AudioSink>(mixer: &Mixer, sink: S, frames: u64) -> Result<Self, Error> {
        Self::spawn(mixer, sink, Some(frames))
    }

    fn spawn<S: AudioSink>(mixer: &Mixer, sink: S, frames: Option<u64>) -> Result<Self, Error> {
        let format = sink.format();
        let options = mixer.options();
        if format.sample_rate != options.sample_rate || format.channel_count != options.channel_count
        {
            return Err(Error::ParameterError(format!(
                "sink format ({} Hz, {} channels) does not match the mixer's ({} Hz, {} channels)",
                format.sample_rate,
                format.channel_count,
                options.sample_rate,
                options.channel_count
            )));
        }
        let (stop_send, stop_recv) = bounded(1);
        let running = Arc::new(AtomicBool::new(true));
        let thread = thread::Builder::new()
            .name("audio_pusher".to_string())
            .spawn({
                let mixer = mixer.clone();
                let running = Arc::clone(&running);
                move || {
                    let result = catch_unwind(AssertUnwindSafe(|| {
                        PushLoop::new(mixer, sink, stop_recv, frames).run()
                    }))
                    .unwrap_or_else(|payload| {
                        let message = panic_message::panic_message(&payload).to_string();
                        log::error!("Audio pusher thread panicked: {message}");
                        Err(Error::ThreadPanic(message))
                    });
                    running.store(false, Ordering::Relaxed);
                    result
                }
            })?;
        Ok(Self {
            stop_send,
            running,
            thread: Some(thread),
        })
    }

    /// True until the pusher got stopped, finished or failed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop pushing and close the sink. Returns the error which stopped the pusher, if any.
    pub fn stop(mut self) -> Result<(), Error> {
        let _ = self.stop_send.try_send(());
        self.join()
    }

    /// Wait until the pusher finished, e.g. after pushing all frames of [`Self::start_for`].
    pub fn wait(mut self) -> Result<(), Error> {
        self.join()
    }

    fn join(&mut self) -> Result<(), Error> {
        match self.thread.take() {
            Some(thread) => thread.join().unwrap_or_else(|payload| {
                Err(Error::ThreadPanic(
                    panic_message::panic_message(&payload).to_string(),
                ))
            }),
            None => Ok(()),
        }
    }
}

impl Drop for AudioPusher {
    fn drop(&mut self) {
        if self.thread.is_some() {
            let _ = self.stop_send.try_send(());
            if let Err(err) = self.join() {
                log::warn!("Audio pusher stopped with error: {err}");
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------

struct PushLoop<S: AudioSink> {
    mixer: Mixer,
    sink: S,
    stop_recv: Receiver<()>,
    frames_left: Option<u64>,
}

impl<S: AudioSink> PushLoop<S> {
    fn new(mixer: Mixer, sink: S, stop_recv: Receiver<()>, frames: Option<u64>) -> Self {
        Self {
            mixer,
            sink,
            stop_recv,
            frames_left: frames,
        }
    }

    fn run(mut self) -> Result<(), Error> {
        let options = *self.mixer.options();
        let _priority = match audio_thread_priority::promote_current_thread_to_real_time(
            options.block_size as u32,
            options.sample_rate,
        ) {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::warn!("Failed to set audio pusher thread priority to real-time: {err}");
                None
            }
        };
        log::info!("Audio pusher started");

        let channel_count = options.channel_count;
        let mut block = vec![0.0; self.mixer.block_samples()];
        let result = loop {
            match self.stop_recv.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break Ok(()),
                Err(TryRecvError::Empty) => {}
            }
            let frames = match self.frames_left {
                Some(0) => break Ok(()),
                Some(left) => (left as usize).min(options.block_size),
                None => options.block_size,
            };
            if let Err(err) = self.mixer.render(&mut block) {
                break Err(err);
            }
            if let Err(err) = self.sink.write(&block[..frames * channel_count]) {
                log::error!("Audio sink failed: {err}");
                break Err(err);
            }
            if let Some(left) = &mut self.frames_left {
                *left -= frames as u64;
            }
        };

        let closed = self.sink.close();
        log::info!("Audio pusher stopped");
        result.and(closed)
    }
}

// -------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{output::SinkFormat, MixerOptions};

    #[derive(Default)]
    struct Collected {
        samples: Vec<f32>,
        writes: usize,
        closed: bool,
    }

    struct TestSink {
        collected: Arc<Mutex<Collected>>,
        fail_after: Option<usize>,
        panic: bool,
    }

    impl TestSink {
        fn new() -> (Self, Arc<Mutex<Collected>>) {
            let collected = Arc::new(Mutex::new(Collected::default()));
            let sink = Self {
                collected: Arc::clone(&collected),
                fail_after: None,
                panic: false,
            };
            (sink, collected)
        }
    }

    impl AudioSink for TestSink {
        fn format(&self) -> SinkFormat {
            SinkFormat {
                sample_rate: 44100,
                channel_count: 2,
            }
        }
        fn buffer_size(&self) -> usize {
            64
        }
        fn write(&mut self, samples: &[f32]) -> Result<(), Error> {
            if self.panic {
                panic!("sink exploded");
            }
            let mut collected = self.collected.lock().unwrap();
            if self.fail_after == Some(collected.writes) {
                return Err(Error::IoError(std::io::Error::other("device gone")));
            }
            collected.writes += 1;
            collected.samples.extend_from_slice(samples);
            Ok(())
        }
        fn close(&mut self) -> Result<(), Error> {
            self.collected.lock().unwrap().closed = true;
            Ok(())
        }
    }

    fn mixer() -> Mixer {
        Mixer::new(MixerOptions::default().block_size(64)).unwrap()
    }

    #[test]
    fn pushes_exact_frame_counts() -> Result<(), Box<dyn std::error::Error>> {
        let (sink, collected) = TestSink::new();
        AudioPusher::start_for(&mixer(), sink, 1000)?.wait()?;
        let collected = collected.lock().unwrap();
        assert_eq!(collected.samples.len(), 2000);
        assert_eq!(collected.writes, 16);
        assert!(collected.closed);
        Ok(())
    }

    #[test]
    fn stops_on_request() -> Result<(), Box<dyn std::error::Error>> {
        let (sink, collected) = TestSink::new();
        let pusher = AudioPusher::start(&mixer(), sink)?;
        assert!(pusher.is_running() || collected.lock().unwrap().writes > 0);
        pusher.stop()?;
        assert!(collected.lock().unwrap().closed);
        Ok(())
    }

    #[test]
    fn sink_errors_stop_the_pusher() -> Result<(), Box<dyn std::error::Error>> {
        let mixer = mixer();
        let (mut sink, collected) = TestSink::new();
        sink.fail_after = Some(3);
        let result = AudioPusher::start(&mixer, sink)?.wait();
        assert!(matches!(result, Err(Error::IoError(_))));
        assert_eq!(collected.lock().unwrap().writes, 3);
        assert!(collected.lock().unwrap().closed);

        // the mixer can be pushed again
        let (sink, _collected) = TestSink::new();
        AudioPusher::start_for(&mixer, sink, 64)?.wait()?;
        Ok(())
    }

    #[test]
    fn panics_get_reported() -> Result<(), Box<dyn std::error::Error>> {
        let (mut sink, _collected) = TestSink::new();
        sink.panic = true;
        let result = AudioPusher::start(&mixer(), sink)?.wait();
        match result {
            Err(Error::ThreadPanic(message)) => assert_eq!(message, "sink exploded"),
            _ => panic!("expected a thread panic error"),
        }
        Ok(())
    }

    #[test]
    fn format_mismatch_fails() {
        let (sink, _collected) = TestSink::new();
        let mixer = Mixer::new(MixerOptions::default().sample_rate(48000)).unwrap();
        assert!(matches!(
            AudioPusher::start(&mixer, sink),
            Err(Error::ParameterError(_))
        ));
    }
}
