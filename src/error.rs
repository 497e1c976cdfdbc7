use std::{error, fmt, io};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by wavesynth.
#[derive(Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    OutputDeviceError(Box<dyn error::Error + Send + Sync>),
    LineNotFoundError(usize),
    ParameterError(String),
    SendError(String),
    SinkClosed,
    ThreadPanic(String),
    IoError(io::Error),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutputDeviceError(err) => err.fmt(f),
            Self::LineNotFoundError(line_id) => {
                write!(f, "Mixer line with id {line_id} not found")
            }
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::SendError(str) => write!(f, "Failed to send channel message: {str}"),
            Self::SinkClosed => write!(f, "Audio sink is closed"),
            Self::ThreadPanic(str) => write!(f, "Audio thread panicked: {str}"),
            Self::IoError(err) => err.fmt(f),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

impl<T> From<crossbeam_channel::SendError<T>> for Error {
    fn from(err: crossbeam_channel::SendError<T>) -> Self {
        Error::SendError(err.to_string())
    }
}

impl<T> From<crossbeam_channel::TrySendError<T>> for Error {
    fn from(err: crossbeam_channel::TrySendError<T>) -> Self {
        Error::SendError(err.to_string())
    }
}
