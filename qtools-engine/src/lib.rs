//! Event driven protocol engine.
//!
//! A [`Container`] owns every connection and link of a process and runs a reactor loop which
//! processes one event at a time: decoded frames of the connections, newly accepted sockets,
//! disconnects and values injected from other threads. The application reacts to those events
//! by implementing [`Handler`]; every callback gets the container back so it can open, close
//! or send on links.
//!
//! Since events are never processed concurrently, handlers can mutate their own state and the
//! link state (credit, unsettled deliveries) without any locking.
mod connection;
mod container;
mod error;
mod handler;
mod io;
mod link;
mod model;

#[cfg(any(test, feature = "testing"))]
pub mod dev;

pub use connection::Connection;
pub use container::{Container, Injector};
pub use error::EngineError;
pub use handler::Handler;
pub use link::{Endpoint, Link, LinkEndpoint, ReceiverLink, SenderLink};
pub use model::{ConnectionId, Delivery, EndpointState, LinkId, LinkOptions, DEFAULT_PREFETCH};

pub use qtools_codec::frame::{DeliveryState, Message, Terminus};

/// Log the error of an expression and carry on.
#[macro_export]
macro_rules! logerr {
    ($val:expr) => {
        if let Err(e) = $val {
            ::log::error!("Error {:?}", e);
        }
    };
}
