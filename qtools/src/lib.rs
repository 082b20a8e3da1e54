//! An AMQP message broker for testing and a client sending requests and collecting the responses.
//!
//! The [`broker`] keeps messages in named queues and forwards them to consumer links as the
//! consumers grant credit. The [`request`] client sends request messages over a pool of sender
//! links, each paired with a receiver on a dynamic address where the responses come back.
pub mod broker;
pub mod config;
pub mod logging;
pub mod queue;
pub mod request;
