use crate::request::tracker::Tracker;
use anyhow::{anyhow, Result};
use log::{debug, info};
use qtools_engine::{ConnectionId, Container, Delivery, Endpoint, LinkId, LinkOptions, Message};
use std::collections::{HashMap, VecDeque};

/// An item of the request backlog.
#[derive(Clone, Debug, PartialEq)]
pub enum Pending {
    Request(Message),
    /// No more requests come.
    End,
}

/// What a dispatch attempt did.
#[derive(Debug, PartialEq)]
pub enum Dispatch {
    /// The end of the input was already reached.
    Stopped,
    /// The links are not open yet.
    NotReady,
    /// Nothing to send.
    Idle,
    /// The sender has no credit, the request is kept for later.
    Deferred,
    Sent(Delivery),
    /// The end of the input is reached, responses are still outstanding.
    AwaitingResponses,
    /// The end of the input is reached and every response is received.
    Complete,
}

/// The link operations the dispatcher needs.
pub trait Transport {
    fn open_sender(&mut self, connection: ConnectionId, address: &str, at_most_once: bool) -> Result<LinkId>;

    /// Open a receiver with an address assigned by the peer.
    fn open_reply_receiver(&mut self, connection: ConnectionId) -> Result<LinkId>;

    fn credit(&self, sender: LinkId) -> u32;

    fn target_address(&self, sender: LinkId) -> Option<String>;

    /// The address assigned by the peer to a dynamic receiver.
    fn reply_address(&self, receiver: LinkId) -> Option<String>;

    fn send(&mut self, sender: LinkId, message: Message) -> Result<Delivery>;
}

impl<I: Send + 'static> Transport for Container<I> {
    fn open_sender(&mut self, connection: ConnectionId, address: &str, at_most_once: bool) -> Result<LinkId> {
        self.create_sender(
            connection,
            Some(address),
            LinkOptions::default().at_most_once(at_most_once),
        )
    }

    fn open_reply_receiver(&mut self, connection: ConnectionId) -> Result<LinkId> {
        self.create_receiver(connection, None, LinkOptions::default().dynamic(true))
    }

    fn credit(&self, sender: LinkId) -> u32 {
        self.sender(sender).map(|s| s.credit()).unwrap_or_default()
    }

    fn target_address(&self, sender: LinkId) -> Option<String> {
        self.sender(sender)?.target().address.clone()
    }

    fn reply_address(&self, receiver: LinkId) -> Option<String> {
        self.receiver(receiver)?.remote_source().address.clone()
    }

    fn send(&mut self, sender: LinkId, message: Message) -> Result<Delivery> {
        match self.sender_mut(sender) {
            Some(link) => link.send(message),
            None => Err(anyhow!("Sender {} is gone", sender)),
        }
    }
}

/// Sends the pending requests over a pool of senders, each paired with a receiver the responses
/// come back to.
#[derive(Debug, Default)]
pub struct Dispatcher {
    senders: VecDeque<LinkId>,
    receivers_by_sender: HashMap<LinkId, LinkId>,
    pending: VecDeque<Pending>,
    tracker: Tracker,
    ready: bool,
    at_most_once: bool,
}

impl Dispatcher {
    pub fn new(at_most_once: bool) -> Self {
        Dispatcher {
            at_most_once,
            ..Default::default()
        }
    }

    /// Open a sender to `address` and a dynamic receiver for its responses on the connection.
    pub fn open_links<T: Transport>(
        &mut self,
        transport: &mut T,
        connection: ConnectionId,
        address: &str,
    ) -> Result<(LinkId, LinkId)> {
        let sender = transport.open_sender(connection, address, self.at_most_once)?;
        let receiver = transport.open_reply_receiver(connection)?;

        self.senders.push_front(sender);
        self.receivers_by_sender.insert(sender, receiver);

        debug!("Opened sender {} to '{}' with receiver {}", sender, address, receiver);

        Ok((sender, receiver))
    }

    /// Every link opened by [`Self::open_links`].
    pub fn links(&self) -> impl Iterator<Item = LinkId> + '_ {
        self.receivers_by_sender
            .iter()
            .flat_map(|(sender, receiver)| [*sender, *receiver])
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn set_ready(&mut self) {
        self.ready = true;
    }

    /// Append an item to the backlog.
    pub fn push(&mut self, item: Pending) {
        self.pending.push_back(item);
    }

    pub fn pending(&self) -> &VecDeque<Pending> {
        &self.pending
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut Tracker {
        &mut self.tracker
    }

    /// Try to send the next pending request, on `link` if given or on the next sender of the pool
    /// otherwise.
    pub fn dispatch<T: Transport>(&mut self, transport: &mut T, link: Option<LinkId>) -> Result<Dispatch> {
        if self.tracker.stop_requested() {
            return Ok(Dispatch::Stopped);
        }

        if !self.ready {
            return Ok(Dispatch::NotReady);
        }

        let mut message = match self.pending.pop_front() {
            None => return Ok(Dispatch::Idle),
            Some(Pending::End) => {
                self.tracker.request_stop();

                return Ok(if self.tracker.is_complete() {
                    Dispatch::Complete
                } else {
                    Dispatch::AwaitingResponses
                });
            }
            Some(Pending::Request(message)) => message,
        };

        let sender = match link {
            Some(link) => link,
            None => match self.senders.pop_back() {
                Some(sender) => {
                    self.senders.push_front(sender);
                    sender
                }
                None => {
                    self.pending.push_front(Pending::Request(message));

                    return Ok(Dispatch::NotReady);
                }
            },
        };

        if transport.credit(sender) == 0 {
            self.pending.push_front(Pending::Request(message));

            return Ok(Dispatch::Deferred);
        }

        let receiver = match self.receivers_by_sender.get(&sender) {
            Some(receiver) => *receiver,
            None => {
                self.pending.push_front(Pending::Request(message));

                return Err(anyhow!("Link {} is not a request sender", sender));
            }
        };

        message.reply_to = transport.reply_address(receiver);

        if message.address.is_none() {
            message.address = transport.target_address(sender);
        }

        let delivery = match transport.send(sender, message.clone()) {
            Ok(delivery) => delivery,
            Err(e) => {
                self.pending.push_front(Pending::Request(message));

                return Err(e);
            }
        };

        self.tracker.on_request_sent();

        info!("Sent request {:?} as {}", message, delivery);

        Ok(Dispatch::Sent(delivery))
    }

    /// Dispatch as long as requests can be sent. Returns the outcome of the last attempt.
    pub fn pump<T: Transport>(&mut self, transport: &mut T, link: Option<LinkId>) -> Result<Dispatch> {
        loop {
            match self.dispatch(transport, link)? {
                Dispatch::Sent(_) => continue,
                other => return Ok(other),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Links are tracked by id only, every sender targets "q{handle}" and every receiver got the
    /// address "reply{handle}".
    #[derive(Default)]
    struct FakeTransport {
        next_handle: u32,
        credit: HashMap<LinkId, u32>,
        sent: Vec<(LinkId, Message)>,
        at_most_once: Vec<LinkId>,
    }

    impl FakeTransport {
        fn allocate(&mut self, connection: ConnectionId) -> LinkId {
            let id = LinkId {
                connection,
                handle: self.next_handle,
            };

            self.next_handle += 1;

            id
        }

        fn sent_on(&self) -> Vec<LinkId> {
            self.sent.iter().map(|(link, _)| *link).collect()
        }
    }

    impl Transport for FakeTransport {
        fn open_sender(&mut self, connection: ConnectionId, _address: &str, at_most_once: bool) -> Result<LinkId> {
            let id = self.allocate(connection);

            self.credit.insert(id, 100);

            if at_most_once {
                self.at_most_once.push(id);
            }

            Ok(id)
        }

        fn open_reply_receiver(&mut self, connection: ConnectionId) -> Result<LinkId> {
            Ok(self.allocate(connection))
        }

        fn credit(&self, sender: LinkId) -> u32 {
            self.credit.get(&sender).copied().unwrap_or_default()
        }

        fn target_address(&self, sender: LinkId) -> Option<String> {
            Some(format!("q{}", sender.handle))
        }

        fn reply_address(&self, receiver: LinkId) -> Option<String> {
            Some(format!("reply{}", receiver.handle))
        }

        fn send(&mut self, sender: LinkId, message: Message) -> Result<Delivery> {
            let credit = self.credit.entry(sender).or_default();

            assert!(*credit > 0, "send without credit on {}", sender);

            *credit -= 1;

            self.sent.push((sender, message));

            Ok(Delivery {
                id: self.sent.len() as u32 - 1,
                link: sender,
                settled: false,
                remote_state: None,
                local_state: None,
            })
        }
    }

    fn setup(pairs: u64) -> (Dispatcher, FakeTransport, Vec<LinkId>) {
        let mut dispatcher = Dispatcher::new(false);
        let mut transport = FakeTransport::default();
        let mut senders = vec![];

        for i in 0..pairs {
            let (sender, _) = dispatcher
                .open_links(&mut transport, ConnectionId(i), "queue")
                .unwrap();

            senders.push(sender);
        }

        dispatcher.set_ready();

        (dispatcher, transport, senders)
    }

    fn request(body: &str) -> Pending {
        Pending::Request(Message::text(body))
    }

    #[test]
    fn nothing_is_sent_before_ready() {
        let mut dispatcher = Dispatcher::new(false);
        let mut transport = FakeTransport::default();

        dispatcher
            .open_links(&mut transport, ConnectionId(1), "queue")
            .unwrap();
        dispatcher.push(request("r1"));

        assert_eq!(dispatcher.dispatch(&mut transport, None).unwrap(), Dispatch::NotReady);
        assert_eq!(dispatcher.pending().len(), 1);
        assert!(transport.sent.is_empty());
    }

    #[test]
    fn empty_backlog_is_idle() {
        let (mut dispatcher, mut transport, _) = setup(1);

        assert_eq!(dispatcher.dispatch(&mut transport, None).unwrap(), Dispatch::Idle);
    }

    #[test]
    fn senders_are_used_round_robin() {
        let (mut dispatcher, mut transport, senders) = setup(3);

        for i in 0..6 {
            dispatcher.push(request(&format!("r{}", i)));
        }

        for _ in 0..6 {
            assert!(matches!(
                dispatcher.dispatch(&mut transport, None).unwrap(),
                Dispatch::Sent(_)
            ));
        }

        let used = transport.sent_on();
        let first_round: std::collections::HashSet<LinkId> = used[..3].iter().copied().collect();

        assert_eq!(first_round.len(), 3);
        assert!(senders.iter().all(|s| first_round.contains(s)));
        assert_eq!(&used[..3], &used[3..]);
    }

    #[test]
    fn oldest_sender_is_at_the_tail() {
        let (mut dispatcher, mut transport, senders) = setup(2);

        dispatcher.push(request("r1"));
        dispatcher.dispatch(&mut transport, None).unwrap();

        assert_eq!(transport.sent_on(), vec![senders[0]]);
    }

    #[test]
    fn triggering_link_is_used() {
        let (mut dispatcher, mut transport, senders) = setup(3);

        dispatcher.push(request("r1"));
        dispatcher.push(request("r2"));

        dispatcher.dispatch(&mut transport, Some(senders[2])).unwrap();
        dispatcher.dispatch(&mut transport, Some(senders[2])).unwrap();

        assert_eq!(transport.sent_on(), vec![senders[2], senders[2]]);
    }

    #[test]
    fn request_without_credit_goes_back_to_the_front() {
        let (mut dispatcher, mut transport, senders) = setup(1);

        transport.credit.insert(senders[0], 0);

        dispatcher.push(request("r1"));
        dispatcher.push(request("r2"));

        assert_eq!(dispatcher.dispatch(&mut transport, None).unwrap(), Dispatch::Deferred);
        assert!(transport.sent.is_empty());
        assert_eq!(
            dispatcher.pending().iter().cloned().collect::<Vec<_>>(),
            vec![request("r1"), request("r2")]
        );

        transport.credit.insert(senders[0], 1);

        assert!(matches!(
            dispatcher.pump(&mut transport, Some(senders[0])).unwrap(),
            Dispatch::Deferred
        ));
        assert_eq!(transport.sent[0].1.body, "r1");
        assert_eq!(dispatcher.pending().len(), 1);
    }

    #[test]
    fn reply_to_and_default_address_are_set() {
        let (mut dispatcher, mut transport, senders) = setup(1);

        dispatcher.push(request("r1"));
        dispatcher.push(Pending::Request(Message::text("r2").address("other")));

        dispatcher.pump(&mut transport, None).unwrap();

        let (link, first) = &transport.sent[0];

        assert_eq!(*link, senders[0]);
        assert_eq!(first.address.as_deref(), Some("q0"));
        assert_eq!(first.reply_to.as_deref(), Some("reply1"));

        let (_, second) = &transport.sent[1];

        assert_eq!(second.address.as_deref(), Some("other"));
        assert_eq!(second.reply_to.as_deref(), Some("reply1"));
    }

    #[test]
    fn end_completes_when_everything_is_answered() {
        let (mut dispatcher, mut transport, _) = setup(1);

        dispatcher.push(Pending::End);

        assert_eq!(dispatcher.dispatch(&mut transport, None).unwrap(), Dispatch::Complete);
        assert!(dispatcher.tracker().is_complete());
    }

    #[test]
    fn end_waits_for_outstanding_responses() {
        let (mut dispatcher, mut transport, _) = setup(1);

        dispatcher.push(request("r1"));
        dispatcher.push(Pending::End);

        assert_eq!(
            dispatcher.pump(&mut transport, None).unwrap(),
            Dispatch::AwaitingResponses
        );
        assert_eq!(dispatcher.tracker().sent_requests(), 1);
        assert!(!dispatcher.tracker().is_complete());

        assert!(dispatcher.tracker_mut().on_response());
    }

    #[test]
    fn dispatch_after_end_does_nothing() {
        let (mut dispatcher, mut transport, _) = setup(1);

        dispatcher.push(Pending::End);
        dispatcher.dispatch(&mut transport, None).unwrap();

        dispatcher.push(request("late"));

        assert_eq!(dispatcher.dispatch(&mut transport, None).unwrap(), Dispatch::Stopped);
        assert!(transport.sent.is_empty());
        assert_eq!(dispatcher.pending().len(), 1);
    }

    #[test]
    fn at_most_once_senders() {
        let mut dispatcher = Dispatcher::new(true);
        let mut transport = FakeTransport::default();

        let (sender, _) = dispatcher
            .open_links(&mut transport, ConnectionId(1), "queue")
            .unwrap();

        assert_eq!(transport.at_most_once, vec![sender]);
        assert_eq!(dispatcher.links().count(), 2);
    }
}
