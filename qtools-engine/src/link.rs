use crate::engine_error;
use crate::model::{Delivery, EndpointState, LinkId};
use anyhow::Result;
use qtools_codec::codec::Frame;
use qtools_codec::frame::{
    self, AMQPFrame, AttachArgs, DeliveryId, DeliveryState, DispositionArgs, FlowArgs, Message, Role, SettleMode,
    Terminus, TransferArgs, INTERNAL_ERROR,
};
use std::collections::HashSet;
use tokio::sync::mpsc;

pub(crate) type FrameSink = mpsc::UnboundedSender<Frame>;

/// State shared by sender and receiver links.
#[derive(Debug)]
pub struct LinkEndpoint {
    pub(crate) id: LinkId,
    pub(crate) name: String,
    pub(crate) source: Terminus,
    pub(crate) target: Terminus,
    pub(crate) remote_source: Terminus,
    pub(crate) remote_target: Terminus,
    pub(crate) local_state: EndpointState,
    pub(crate) remote_state: EndpointState,
    pub(crate) outgoing: FrameSink,
}

impl LinkEndpoint {
    pub(crate) fn new(id: LinkId, name: String, outgoing: FrameSink) -> Self {
        LinkEndpoint {
            id,
            name,
            source: Terminus::default(),
            target: Terminus::default(),
            remote_source: Terminus::default(),
            remote_target: Terminus::default(),
            local_state: EndpointState::Uninitialized,
            remote_state: EndpointState::Uninitialized,
            outgoing,
        }
    }

    pub(crate) fn send(&self, frame: AMQPFrame) -> Result<()> {
        if self.outgoing.send(Frame::Frame(frame)).is_err() {
            return engine_error!(INTERNAL_ERROR, format!("Connection of link {} is gone", self.id));
        }

        Ok(())
    }
}

/// Accessors of the link endpoint state, common to both kinds of links.
pub trait Endpoint {
    fn endpoint(&self) -> &LinkEndpoint;
    fn endpoint_mut(&mut self) -> &mut LinkEndpoint;

    fn id(&self) -> LinkId {
        self.endpoint().id
    }

    fn name(&self) -> &str {
        &self.endpoint().name
    }

    /// Local source terminus.
    fn source(&self) -> &Terminus {
        &self.endpoint().source
    }

    /// Local target terminus.
    fn target(&self) -> &Terminus {
        &self.endpoint().target
    }

    fn remote_source(&self) -> &Terminus {
        &self.endpoint().remote_source
    }

    fn remote_target(&self) -> &Terminus {
        &self.endpoint().remote_target
    }

    fn set_source_address(&mut self, address: Option<String>) {
        self.endpoint_mut().source.address = address;
    }

    fn set_target_address(&mut self, address: Option<String>) {
        self.endpoint_mut().target.address = address;
    }

    fn local_state(&self) -> EndpointState {
        self.endpoint().local_state
    }

    fn remote_state(&self) -> EndpointState {
        self.endpoint().remote_state
    }

    fn is_remote_active(&self) -> bool {
        self.endpoint().remote_state == EndpointState::Active
    }
}

/// A link endpoint which sends messages to its peer as long as the peer grants credit.
#[derive(Debug)]
pub struct SenderLink {
    endpoint: LinkEndpoint,
    settle_mode: SettleMode,
    credit: u32,
    delivery_count: u32,
    next_delivery_id: DeliveryId,
    unsettled: HashSet<DeliveryId>,
}

impl SenderLink {
    pub(crate) fn new(endpoint: LinkEndpoint, settle_mode: SettleMode) -> Self {
        SenderLink {
            endpoint,
            settle_mode,
            credit: 0,
            delivery_count: 0,
            next_delivery_id: 0,
            unsettled: HashSet::new(),
        }
    }

    /// Number of messages the peer is ready to receive.
    pub fn credit(&self) -> u32 {
        self.credit
    }

    pub fn settle_mode(&self) -> SettleMode {
        self.settle_mode
    }

    /// Number of sent deliveries waiting for the outcome from the peer.
    pub fn unsettled(&self) -> usize {
        self.unsettled.len()
    }

    /// Send a message to the peer, consuming one unit of credit. Sending without credit is an
    /// error, the peer is not prepared to receive the message.
    pub fn send(&mut self, message: Message) -> Result<Delivery> {
        if self.endpoint.local_state != EndpointState::Active {
            return engine_error!(INTERNAL_ERROR, format!("Link {} is not active", self.endpoint.id));
        }

        if self.credit == 0 {
            return engine_error!(INTERNAL_ERROR, format!("Link {} has no credit", self.endpoint.id));
        }

        let delivery_id = self.next_delivery_id;
        let settled = self.settle_mode == SettleMode::Settled;

        self.endpoint
            .send(frame::transfer(self.endpoint.id.handle, delivery_id, settled, message))?;

        self.next_delivery_id = self.next_delivery_id.wrapping_add(1);
        self.delivery_count = self.delivery_count.wrapping_add(1);
        self.credit -= 1;

        if !settled {
            self.unsettled.insert(delivery_id);
        }

        Ok(Delivery::new(delivery_id, self.endpoint.id, settled))
    }

    /// Apply the flow state of the peer. Deliveries which were in flight when the peer sent the
    /// flow are deducted from the granted credit.
    pub(crate) fn on_flow(&mut self, args: &FlowArgs) {
        let in_flight = self.delivery_count.wrapping_sub(args.delivery_count);

        self.credit = args.link_credit.saturating_sub(in_flight);
    }

    /// Settle a delivery by the outcome the peer reported. Returns `None` if the delivery is not
    /// waiting for settlement.
    pub(crate) fn on_disposition(&mut self, args: &DispositionArgs) -> Option<Delivery> {
        if !self.unsettled.remove(&args.delivery_id) {
            return None;
        }

        let mut delivery = Delivery::new(args.delivery_id, self.endpoint.id, true);
        delivery.remote_state = Some(args.state);

        Some(delivery)
    }
}

impl Endpoint for SenderLink {
    fn endpoint(&self) -> &LinkEndpoint {
        &self.endpoint
    }

    fn endpoint_mut(&mut self) -> &mut LinkEndpoint {
        &mut self.endpoint
    }
}

/// A link endpoint which receives messages and grants credit to its peer.
#[derive(Debug)]
pub struct ReceiverLink {
    endpoint: LinkEndpoint,
    prefetch: u32,
    credit: u32,
    delivery_count: u32,
}

impl ReceiverLink {
    pub(crate) fn new(endpoint: LinkEndpoint, prefetch: u32) -> Self {
        ReceiverLink {
            endpoint,
            prefetch,
            credit: 0,
            delivery_count: 0,
        }
    }

    pub fn credit(&self) -> u32 {
        self.credit
    }

    pub fn prefetch(&self) -> u32 {
        self.prefetch
    }

    /// Grant `credit` to the peer. It replaces the credit granted earlier.
    pub fn flow(&mut self, credit: u32) -> Result<()> {
        self.credit = credit;

        self.endpoint
            .send(frame::flow(self.endpoint.id.handle, self.delivery_count, credit))
    }

    pub(crate) fn on_transfer(&mut self, args: &TransferArgs) -> Delivery {
        self.credit = self.credit.saturating_sub(1);
        self.delivery_count = self.delivery_count.wrapping_add(1);

        Delivery::new(args.delivery_id, self.endpoint.id, args.settled)
    }

    /// Report the outcome of an unsettled delivery to the peer, accepted by default.
    pub(crate) fn settle(&mut self, delivery: &Delivery) -> Result<()> {
        if delivery.settled {
            return Ok(());
        }

        let state = delivery.local_state.unwrap_or(DeliveryState::Accepted);

        self.endpoint
            .send(frame::disposition(self.endpoint.id.handle, delivery.id, state))
    }

    /// Top up the credit to the prefetch once half of it is used.
    pub(crate) fn replenish(&mut self) -> Result<()> {
        if self.prefetch > 0 && self.credit <= self.prefetch / 2 {
            self.flow(self.prefetch)?;
        }

        Ok(())
    }
}

impl Endpoint for ReceiverLink {
    fn endpoint(&self) -> &LinkEndpoint {
        &self.endpoint
    }

    fn endpoint_mut(&mut self) -> &mut LinkEndpoint {
        &mut self.endpoint
    }
}

/// A link is either sending or receiving messages.
#[derive(Debug)]
pub enum Link {
    Sender(SenderLink),
    Receiver(ReceiverLink),
}

impl Link {
    pub fn is_sender(&self) -> bool {
        matches!(self, Link::Sender(_))
    }

    pub fn is_receiver(&self) -> bool {
        matches!(self, Link::Receiver(_))
    }

    pub fn role(&self) -> Role {
        match self {
            Link::Sender(_) => Role::Sender,
            Link::Receiver(_) => Role::Receiver,
        }
    }

    pub fn as_sender(&self) -> Option<&SenderLink> {
        match self {
            Link::Sender(s) => Some(s),
            Link::Receiver(_) => None,
        }
    }

    pub fn as_sender_mut(&mut self) -> Option<&mut SenderLink> {
        match self {
            Link::Sender(s) => Some(s),
            Link::Receiver(_) => None,
        }
    }

    pub fn as_receiver(&self) -> Option<&ReceiverLink> {
        match self {
            Link::Sender(_) => None,
            Link::Receiver(r) => Some(r),
        }
    }

    pub fn as_receiver_mut(&mut self) -> Option<&mut ReceiverLink> {
        match self {
            Link::Sender(_) => None,
            Link::Receiver(r) => Some(r),
        }
    }

    /// The attach frame describing the local endpoint.
    pub(crate) fn attach_frame(&self) -> AMQPFrame {
        let ep = self.endpoint();

        let snd_settle_mode = match self {
            Link::Sender(s) => s.settle_mode,
            Link::Receiver(_) => SettleMode::Unsettled,
        };

        frame::attach(AttachArgs {
            name: ep.name.clone(),
            handle: ep.id.handle,
            role: self.role(),
            snd_settle_mode,
            source: ep.source.clone(),
            target: ep.target.clone(),
        })
    }
}

impl Endpoint for Link {
    fn endpoint(&self) -> &LinkEndpoint {
        match self {
            Link::Sender(s) => &s.endpoint,
            Link::Receiver(r) => &r.endpoint,
        }
    }

    fn endpoint_mut(&mut self) -> &mut LinkEndpoint {
        match self {
            Link::Sender(s) => &mut s.endpoint,
            Link::Receiver(r) => &mut r.endpoint,
        }
    }
}
