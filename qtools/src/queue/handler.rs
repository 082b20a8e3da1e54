use anyhow::Result;
use log::{debug, info, warn};
use qtools_engine::{Delivery, Endpoint, LinkId, Message, SenderLink};
use std::collections::VecDeque;
use std::fmt;

/// A named queue of the broker: the messages waiting for delivery and the sender links of the
/// consumers in the order they registered.
#[derive(Debug)]
pub struct Queue {
    address: String,
    messages: VecDeque<Message>,
    consumers: Vec<LinkId>,
}

impl Queue {
    pub fn new(address: &str) -> Self {
        info!("Created queue '{}'", address);

        Queue {
            address: address.to_string(),
            messages: VecDeque::new(),
            consumers: vec![],
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Number of messages waiting for delivery.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consumer links in registration order.
    pub fn consumers(&self) -> &[LinkId] {
        &self.consumers
    }

    /// Register a consumer. Adding the same link twice is a programming error.
    pub fn add_consumer(&mut self, link: &SenderLink) {
        let id = link.id();

        assert!(
            !self.consumers.contains(&id),
            "Consumer {} is already registered on {}",
            id,
            self
        );

        self.consumers.push(id);

        debug!("Added consumer {} to {}", id, self);
    }

    /// Unregister a consumer. Removing a link which is not a consumer is a no-op.
    pub fn remove_consumer(&mut self, link: &SenderLink) {
        let id = link.id();

        if let Some(pos) = self.consumers.iter().position(|c| *c == id) {
            self.consumers.remove(pos);

            debug!("Removed consumer {} from {}", id, self);
        }
    }

    /// Append a message to the tail of the queue.
    pub fn store(&mut self, delivery: &Delivery, message: Message) {
        info!("Stored {:?} from {} on {}", message, delivery, self);

        self.messages.push_back(message);
    }

    /// Send as many messages from the head of the queue as the credit of the link allows.
    /// Returns the number of messages sent.
    pub fn forward(&mut self, link: &mut SenderLink) -> Result<usize> {
        let mut forwarded = 0;

        while link.credit() > 0 {
            let message = match self.messages.pop_front() {
                Some(message) => message,
                None => break,
            };

            if let Err(e) = link.send(message.clone()) {
                // keep the order, the message goes to the next consumer
                self.messages.push_front(message);

                return Err(e);
            }

            info!("Forwarded {:?} from {} to {}", message, self, link.id());

            forwarded += 1;
        }

        Ok(forwarded)
    }

    /// Forward to a consumer as `forward` does, but a consumer which cannot take the messages is
    /// only logged, so the caller can go on with the next one.
    pub fn offer(&mut self, link: &mut SenderLink) -> usize {
        match self.forward(link) {
            Ok(forwarded) => forwarded,
            Err(e) => {
                warn!("Cannot forward from {} to {}: {:?}", self, link.id(), e);

                0
            }
        }
    }
}

impl fmt::Display for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "queue '{}'", self.address)
    }
}
