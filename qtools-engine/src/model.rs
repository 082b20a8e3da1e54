use qtools_codec::frame::{DeliveryId, DeliveryState, Handle};
use std::fmt;

/// Credit a receiver grants when it is attached, if not configured otherwise.
pub const DEFAULT_PREFETCH: u32 = 10;

/// Process-wide unique identifier of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Identifies a link by its connection and its handle within the connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId {
    pub connection: ConnectionId,
    pub handle: Handle,
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.connection, self.handle)
    }
}

/// Local or remote state of a connection or link endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EndpointState {
    #[default]
    Uninitialized,
    Active,
    Closed,
}

/// Options of locally created links.
#[derive(Clone, Debug)]
pub struct LinkOptions {
    /// Ask the peer to assign the address of the link.
    pub dynamic: bool,
    /// Send deliveries settled, the peer won't report the outcome.
    pub at_most_once: bool,
    /// Credit a receiver keeps granting to its peer, 0 means manual flow control.
    pub prefetch: u32,
}

impl Default for LinkOptions {
    fn default() -> Self {
        LinkOptions {
            dynamic: false,
            at_most_once: false,
            prefetch: DEFAULT_PREFETCH,
        }
    }
}

impl LinkOptions {
    pub fn dynamic(mut self, mode: bool) -> Self {
        self.dynamic = mode;
        self
    }

    pub fn at_most_once(mut self, mode: bool) -> Self {
        self.at_most_once = mode;
        self
    }

    pub fn prefetch(mut self, credit: u32) -> Self {
        self.prefetch = credit;
        self
    }
}

/// The lifecycle record of one message transfer.
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub id: DeliveryId,
    pub link: LinkId,
    /// The delivery was settled by the sender already, no disposition is expected.
    pub settled: bool,
    /// Outcome reported by the peer.
    pub remote_state: Option<DeliveryState>,
    /// Outcome this side reports, accepted if left unset.
    pub local_state: Option<DeliveryState>,
}

impl Delivery {
    pub(crate) fn new(id: DeliveryId, link: LinkId, settled: bool) -> Self {
        Delivery {
            id,
            link,
            settled,
            remote_state: None,
            local_state: None,
        }
    }

    pub fn accept(&mut self) {
        self.local_state = Some(DeliveryState::Accepted);
    }

    pub fn reject(&mut self) {
        self.local_state = Some(DeliveryState::Rejected);
    }

    pub fn release(&mut self) {
        self.local_state = Some(DeliveryState::Released);
    }
}

impl fmt::Display for Delivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "delivery {} on {}", self.id, self.link)
    }
}
