use std::fmt;

/// Error of an engine operation or a protocol violation of the peer. The condition is one of the
/// AMQP error condition names like `amqp:not-found`.
#[derive(Clone, Debug)]
pub struct EngineError {
    pub condition: String,
    pub description: String,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.condition, self.description)
    }
}

impl std::error::Error for EngineError {}

/// Shorthand for creating engine errors.
#[macro_export]
macro_rules! engine_error {
    ($condition:expr, $description:expr) => {
        ::std::result::Result::Err(anyhow::Error::new($crate::EngineError {
            condition: ::std::string::String::from($condition),
            description: ::std::string::String::from($description),
        }))
    };
}
