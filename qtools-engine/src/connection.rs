use crate::engine_error;
use crate::link::{Endpoint, FrameSink, Link};
use crate::model::{ConnectionId, EndpointState, LinkId};
use anyhow::Result;
use qtools_codec::codec::Frame;
use qtools_codec::frame::{AMQPFrame, Handle, INTERNAL_ERROR};
use std::collections::BTreeMap;
use std::fmt;

/// Both peers refer to a link with the handle its initiator allocated. Connecting and accepting
/// sides allocate from different halves of the handle space.
const ACCEPTED_HANDLE_BASE: Handle = 0x8000_0000;

/// A connection with its links.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    /// Container id announced to the peer in the open frame.
    container: Option<String>,
    remote_container: Option<String>,
    peer: Option<String>,
    accepted: bool,
    pub(crate) local_state: EndpointState,
    pub(crate) remote_state: EndpointState,
    pub(crate) links: BTreeMap<Handle, Link>,
    next_handle: Handle,
    outgoing: FrameSink,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, accepted: bool, peer: Option<String>, outgoing: FrameSink) -> Self {
        Connection {
            id,
            container: None,
            remote_container: None,
            peer,
            accepted,
            local_state: EndpointState::Uninitialized,
            remote_state: EndpointState::Uninitialized,
            links: BTreeMap::new(),
            next_handle: if accepted { ACCEPTED_HANDLE_BASE } else { 0 },
            outgoing,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    pub fn set_container(&mut self, container: &str) {
        self.container = Some(container.to_string());
    }

    pub fn remote_container(&self) -> Option<&str> {
        self.remote_container.as_deref()
    }

    pub(crate) fn set_remote_container(&mut self, container: String) {
        self.remote_container = Some(container);
    }

    /// Address of the peer socket, if the connection was accepted or has been established.
    pub fn peer(&self) -> Option<&str> {
        self.peer.as_deref()
    }

    /// The connection was accepted by a listener, the peer connected to us.
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn local_state(&self) -> EndpointState {
        self.local_state
    }

    pub fn remote_state(&self) -> EndpointState {
        self.remote_state
    }

    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    /// Ids of the links whose remote endpoint is active, in handle order.
    pub fn remote_active_links(&self) -> Vec<LinkId> {
        self.links
            .values()
            .filter(|link| link.is_remote_active())
            .map(|link| link.id())
            .collect()
    }

    pub(crate) fn allocate_handle(&mut self) -> Handle {
        let handle = self.next_handle;
        self.next_handle = self.next_handle.wrapping_add(1);

        handle
    }

    pub(crate) fn outgoing(&self) -> FrameSink {
        self.outgoing.clone()
    }

    pub(crate) fn send(&self, frame: AMQPFrame) -> Result<()> {
        if self.outgoing.send(Frame::Frame(frame)).is_err() {
            return engine_error!(INTERNAL_ERROR, format!("Socket of {} is closed", self.id));
        }

        Ok(())
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.remote_container, &self.peer) {
            (Some(container), _) => write!(f, "{} ({})", self.id, container),
            (None, Some(peer)) => write!(f, "{} ({})", self.id, peer),
            (None, None) => write!(f, "{}", self.id),
        }
    }
}
