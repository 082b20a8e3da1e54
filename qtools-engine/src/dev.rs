//! Helpers for testing code which drives links, without any connection behind them.
use crate::link::{LinkEndpoint, ReceiverLink, SenderLink};
use crate::model::{EndpointState, LinkId};
use qtools_codec::codec::Frame;
use qtools_codec::frame::{AMQPFrame, FlowArgs, Message, SettleMode};
use tokio::sync::mpsc;

fn endpoint(id: LinkId) -> (LinkEndpoint, mpsc::UnboundedReceiver<Frame>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut endpoint = LinkEndpoint::new(id, format!("test-link-{}", id), tx);

    endpoint.local_state = EndpointState::Active;
    endpoint.remote_state = EndpointState::Active;

    (endpoint, rx)
}

/// An attached sender link which got `credit` from its peer. The frames it sends can be read from
/// the returned receiver.
pub fn sender_link(id: LinkId, credit: u32) -> (SenderLink, mpsc::UnboundedReceiver<Frame>) {
    let (endpoint, rx) = endpoint(id);
    let mut sender = SenderLink::new(endpoint, SettleMode::Unsettled);

    sender.on_flow(&FlowArgs {
        handle: id.handle,
        delivery_count: 0,
        link_credit: credit,
    });

    (sender, rx)
}

/// An attached receiver link with the given prefetch.
pub fn receiver_link(id: LinkId, prefetch: u32) -> (ReceiverLink, mpsc::UnboundedReceiver<Frame>) {
    let (endpoint, rx) = endpoint(id);

    (ReceiverLink::new(endpoint, prefetch), rx)
}

/// Grant credit to a sender link as its peer would do.
pub fn grant(sender: &mut SenderLink, delivery_count: u32, credit: u32) {
    sender.on_flow(&FlowArgs {
        handle: 0,
        delivery_count,
        link_credit: credit,
    });
}

/// Drain the frames sent so far and collect the transferred messages.
pub fn sent_messages(frames: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Message> {
    let mut messages = vec![];

    while let Ok(frame) = frames.try_recv() {
        if let Frame::Frame(AMQPFrame::Transfer(args)) = frame {
            messages.push(args.message);
        }
    }

    messages
}
