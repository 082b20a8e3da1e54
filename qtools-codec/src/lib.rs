//! Data structures and converter functions for dealing with the frames of the
//! link protocol spoken between the broker and its clients.
//!
//! All the data types are in the `frame` module, the `codec` implements
//! the encoding and the decoding.
pub mod codec;
pub mod frame;


#[macro_use]
extern crate bitflags;

use std::fmt;

/// Type alias for a sync and send error.
pub type Error = Box<dyn std::error::Error + Send + Sync>;
/// Type alias for a simplified Result with Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Error raised when a frame cannot be decoded.
#[derive(Debug)]
pub struct FrameError {
    pub performative: u8,
    pub message: String,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame error (performative {:02X}): {}", self.performative, self.message)
    }
}

impl std::error::Error for FrameError {}

impl From<FrameError> for std::io::Error {
    fn from(err: FrameError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, err)
    }
}

/// Shorthand for making decode errors with the performative code and an error message.
///
/// ```no_run
/// use qtools_codec::frame_error;
/// use qtools_codec::FrameError;
///
/// fn check_doff(doff: u8) -> Result<(), FrameError> {
///     if doff != 2 {
///         return frame_error!(0, "Unsupported data offset");
///     }
///
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! frame_error {
    ($performative:expr, $message:expr) => {
        ::std::result::Result::Err($crate::FrameError {
            performative: $performative,
            message: ::std::string::String::from($message),
        })
    };
}
