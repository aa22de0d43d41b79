use std::{error, fmt};

// -------------------------------------------------------------------------------------------------

/// Provides an enumeration of all possible errors reported by choral.
#[derive(Debug)]
pub enum Error {
    UnsupportedChannelLayout(usize),
    UnsupportedSampleRate(u32),
    ParameterError(String),
    SendError(String),
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedChannelLayout(channel_count) => {
                write!(f, "Unsupported channel layout: {channel_count} channels")
            }
            Self::UnsupportedSampleRate(sample_rate) => {
                write!(f, "Unsupported sample rate: {sample_rate} Hz")
            }
            Self::ParameterError(str) => write!(f, "Invalid parameter: {str}"),
            Self::SendError(str) => write!(f, "Failed to send control message: {str}"),
        }
    }
}
