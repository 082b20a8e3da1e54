//! The broker: keeps messages in queues by address and forwards them to the consumers as their
//! credit allows.
use crate::config::BrokerConfig;
use crate::queue::QueueManager;
use anyhow::{anyhow, Context, Result};
use log::{info, warn};
use qtools_engine::{
    ConnectionId, Container, Delivery, DeliveryState, Endpoint, Handler, Link, LinkId, Message,
};
use std::net::SocketAddr;

/// Generate a unique address for a consumer which asks for a dynamic one.
pub fn generate_address() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Routes the events of the engine to the queues.
pub struct BrokerHandler {
    listen: String,
    queues: QueueManager,
    local_addr: Option<SocketAddr>,
}

impl BrokerHandler {
    pub fn new(listen: &str) -> Self {
        BrokerHandler {
            listen: listen.to_string(),
            queues: QueueManager::new(),
            local_addr: None,
        }
    }

    pub fn queues(&self) -> &QueueManager {
        &self.queues
    }

    /// The address the broker is bound to once it is started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Unregister the consumers among the links of the connection which are still attached by the
    /// peer.
    fn remove_consumers(&mut self, container: &mut Container, connection: ConnectionId) {
        let links = match container.connection(connection) {
            Some(conn) => conn.remote_active_links(),
            None => return,
        };

        for id in links {
            self.remove_consumer(container, id);
        }
    }

    fn remove_consumer(&mut self, container: &Container, link: LinkId) {
        let sender = match container.sender(link) {
            Some(sender) => sender,
            None => return,
        };

        if let Some(queue) = sender
            .source()
            .address
            .as_deref()
            .and_then(|address| self.queues.get_mut(address))
        {
            queue.remove_consumer(sender);
        }
    }
}

impl Handler for BrokerHandler {
    type Input = ();

    fn on_start(&mut self, container: &mut Container) -> Result<()> {
        let addr = container
            .listen(&self.listen)
            .with_context(|| format!("Cannot listen on {}", self.listen))?;

        info!("Listening on {}", addr);

        self.local_addr = Some(addr);

        Ok(())
    }

    fn on_connection_opening(&mut self, container: &mut Container, connection: ConnectionId) -> Result<()> {
        let container_id = container.container_id().to_string();

        if let Some(conn) = container.connection_mut(connection) {
            conn.set_container(&container_id);
        }

        Ok(())
    }

    fn on_connection_opened(&mut self, container: &mut Container, connection: ConnectionId) -> Result<()> {
        if let Some(conn) = container.connection(connection) {
            info!("Opened {}", conn);
        }

        Ok(())
    }

    fn on_connection_closing(&mut self, container: &mut Container, connection: ConnectionId) -> Result<()> {
        self.remove_consumers(container, connection);

        Ok(())
    }

    fn on_connection_closed(&mut self, _container: &mut Container, connection: ConnectionId) -> Result<()> {
        info!("Closed {}", connection);

        Ok(())
    }

    fn on_disconnected(&mut self, container: &mut Container, connection: ConnectionId) -> Result<()> {
        info!("Disconnected {}", connection);

        self.remove_consumers(container, connection);

        Ok(())
    }

    fn on_link_opening(&mut self, container: &mut Container, link: LinkId) -> Result<()> {
        match container.link_mut(link) {
            Some(Link::Sender(sender)) => {
                let address = if sender.remote_source().dynamic {
                    generate_address()
                } else {
                    match &sender.remote_source().address {
                        Some(address) => address.clone(),
                        None => return Err(anyhow!("Consumer link {} has no source address", link)),
                    }
                };

                sender.set_source_address(Some(address.clone()));

                self.queues.get_or_create(&address).add_consumer(sender);
            }
            Some(Link::Receiver(receiver)) => {
                let address = receiver.remote_target().address.clone();

                receiver.set_target_address(address);
            }
            None => (),
        }

        Ok(())
    }

    fn on_link_closing(&mut self, container: &mut Container, link: LinkId) -> Result<()> {
        self.remove_consumer(container, link);

        Ok(())
    }

    fn on_sendable(&mut self, container: &mut Container, link: LinkId) -> Result<()> {
        let sender = match container.sender_mut(link) {
            Some(sender) => sender,
            None => return Ok(()),
        };

        if let Some(address) = sender.source().address.clone() {
            self.queues.get_or_create(&address).forward(sender)?;
        }

        Ok(())
    }

    fn on_settled(&mut self, container: &mut Container, delivery: &Delivery) -> Result<()> {
        let source = container
            .sender(delivery.link)
            .map(|sender| sender.source().to_string())
            .unwrap_or_default();

        match delivery.remote_state {
            Some(DeliveryState::Accepted) => info!("Consumer accepted {} from {}", delivery, source),
            Some(DeliveryState::Rejected) => warn!("Consumer rejected {} from {}", delivery, source),
            Some(DeliveryState::Released) => info!("Consumer released {} from {}", delivery, source),
            Some(DeliveryState::Modified) => info!("Consumer modified {} from {}", delivery, source),
            None => (),
        }

        Ok(())
    }

    fn on_message(&mut self, container: &mut Container, delivery: &mut Delivery, message: Message) -> Result<()> {
        let link_address = container
            .receiver(delivery.link)
            .and_then(|receiver| receiver.target().address.clone());

        let address = match link_address.or_else(|| message.address.clone()) {
            Some(address) => address,
            None => {
                warn!("Rejecting {:?} of {}, it has no address", message, delivery);

                delivery.reject();

                return Ok(());
            }
        };

        let queue = self.queues.get_or_create(&address);

        queue.store(delivery, message);

        for consumer in queue.consumers().to_vec() {
            if let Some(sender) = container.sender_mut(consumer) {
                queue.offer(sender);
            }
        }

        Ok(())
    }
}

/// Run the broker until the future is dropped. Fails if the listener cannot be bound.
pub async fn run(config: BrokerConfig) -> Result<()> {
    let container = match &config.broker.container_id {
        Some(id) => Container::new(id),
        None => Container::with_random_id(),
    };

    container.run(BrokerHandler::new(&config.listen_address())).await?;

    Ok(())
}
