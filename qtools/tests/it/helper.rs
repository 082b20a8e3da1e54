use anyhow::Result;
use qtools::broker;
use qtools::config::BrokerConfig;
use qtools_engine::{Container, Delivery, DeliveryState, Endpoint, Handler, Injector, LinkId, LinkOptions, Message};
use std::collections::VecDeque;
use std::future::Future;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Await the future or fail after a few seconds.
pub(crate) async fn within<T>(f: impl Future<Output = T>) -> Result<T> {
    Ok(tokio::time::timeout(Duration::from_secs(10), f).await?)
}

/// A port nobody listens on at the moment.
pub(crate) fn free_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;

    Ok(listener.local_addr()?.port())
}

/// Start a broker on a free port and wait until it accepts connections. Returns its `host:port`.
pub(crate) async fn start_broker() -> Result<String> {
    let mut config = BrokerConfig::default();
    config.network.port = free_port()?;

    let address = config.listen_address();

    tokio::spawn(broker::run(config));

    for _ in 0..100 {
        if tokio::net::TcpStream::connect(&address).await.is_ok() {
            return Ok(address);
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    anyhow::bail!("Broker didn't start on {}", address)
}

/// Run the handler in its own container.
pub(crate) fn spawn<H>(handler: H) -> (Injector<H::Input>, JoinHandle<Result<H>>)
where
    H: Handler + Send + 'static,
{
    let container = Container::with_random_id();
    let injector = container.injector();

    (injector, tokio::spawn(container.run(handler)))
}

/// Output of the request client which can be read by the test.
#[derive(Clone, Default)]
pub(crate) struct Buffer(Arc<Mutex<Vec<u8>>>);

impl Buffer {
    pub(crate) fn lines(&self) -> Vec<String> {
        let bytes = self.0.lock().unwrap().clone();

        String::from_utf8(bytes).unwrap().lines().map(str::to_string).collect()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Sends every message back to its reply address.
pub(crate) struct Echo {
    broker: String,
    address: String,
    sender: Option<LinkId>,
    replies: VecDeque<Message>,
    opened: Option<oneshot::Sender<()>>,
}

impl Echo {
    pub(crate) fn new(broker: &str, address: &str) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();

        let echo = Echo {
            broker: broker.to_string(),
            address: address.to_string(),
            sender: None,
            replies: VecDeque::new(),
            opened: Some(tx),
        };

        (echo, rx)
    }

    fn flush(&mut self, container: &mut Container) -> Result<()> {
        let id = match self.sender {
            Some(id) => id,
            None => return Ok(()),
        };

        let sender = match container.sender_mut(id) {
            Some(sender) => sender,
            None => return Ok(()),
        };

        while sender.credit() > 0 {
            match self.replies.pop_front() {
                Some(reply) => {
                    sender.send(reply)?;
                }
                None => break,
            }
        }

        Ok(())
    }
}

impl Handler for Echo {
    type Input = ();

    fn on_start(&mut self, container: &mut Container) -> Result<()> {
        let conn = container.connect(&self.broker);

        container.create_receiver(conn, Some(self.address.as_str()), LinkOptions::default())?;
        self.sender = Some(container.create_sender(conn, None, LinkOptions::default())?);

        Ok(())
    }

    fn on_link_opened(&mut self, _container: &mut Container, _link: LinkId) -> Result<()> {
        if let Some(tx) = self.opened.take() {
            let _ = tx.send(());
        }

        Ok(())
    }

    fn on_message(&mut self, container: &mut Container, _delivery: &mut Delivery, message: Message) -> Result<()> {
        let mut reply = Message::text(&message.body);
        reply.address = message.reply_to;

        self.replies.push_back(reply);

        self.flush(container)
    }

    fn on_sendable(&mut self, container: &mut Container, _link: LinkId) -> Result<()> {
        self.flush(container)
    }

    fn on_input(&mut self, container: &mut Container, _input: ()) -> Result<()> {
        container.stop();

        Ok(())
    }
}

/// Receives messages from an address, or from a dynamic address if none is given.
pub(crate) struct Consumer {
    broker: String,
    address: Option<String>,
    /// Ask the broker for an address.
    pub(crate) dynamic: bool,
    prefetch: u32,
    expected: usize,
    opened: Option<oneshot::Sender<Option<String>>>,
    pub(crate) received: Vec<Message>,
    pub(crate) refused: bool,
}

impl Consumer {
    /// Stops after `expected` messages, or when a value is injected if `expected` is 0.
    pub(crate) fn new(
        broker: &str,
        address: Option<&str>,
        prefetch: u32,
        expected: usize,
    ) -> (Self, oneshot::Receiver<Option<String>>) {
        let (tx, rx) = oneshot::channel();

        let consumer = Consumer {
            broker: broker.to_string(),
            address: address.map(str::to_string),
            dynamic: address.is_none(),
            prefetch,
            expected,
            opened: Some(tx),
            received: vec![],
            refused: false,
        };

        (consumer, rx)
    }

    pub(crate) fn bodies(&self) -> Vec<&str> {
        self.received.iter().map(|m| m.body.as_str()).collect()
    }
}

impl Handler for Consumer {
    type Input = ();

    fn on_start(&mut self, container: &mut Container) -> Result<()> {
        let conn = container.connect(&self.broker);
        let options = LinkOptions::default()
            .prefetch(self.prefetch)
            .dynamic(self.dynamic);

        container.create_receiver(conn, self.address.as_deref(), options)?;

        Ok(())
    }

    fn on_link_opened(&mut self, container: &mut Container, link: LinkId) -> Result<()> {
        let address = container
            .receiver(link)
            .and_then(|receiver| receiver.remote_source().address.clone());

        if let Some(tx) = self.opened.take() {
            let _ = tx.send(address);
        }

        Ok(())
    }

    fn on_link_closing(&mut self, container: &mut Container, _link: LinkId) -> Result<()> {
        self.refused = true;

        container.stop();

        Ok(())
    }

    fn on_message(&mut self, container: &mut Container, _delivery: &mut Delivery, message: Message) -> Result<()> {
        self.received.push(message);

        if self.received.len() == self.expected {
            container.stop();
        }

        Ok(())
    }

    fn on_input(&mut self, container: &mut Container, _input: ()) -> Result<()> {
        container.stop();

        Ok(())
    }
}

/// Consumes from an address and detaches its link on the first injected value while keeping the
/// connection open. The second injected value stops it.
pub(crate) struct Leaver {
    broker: String,
    address: String,
    link: Option<LinkId>,
    opened: Option<oneshot::Sender<()>>,
    detached: Option<oneshot::Sender<()>>,
    pub(crate) received: Vec<Message>,
}

impl Leaver {
    pub(crate) fn new(broker: &str, address: &str) -> (Self, oneshot::Receiver<()>, oneshot::Receiver<()>) {
        let (opened_tx, opened_rx) = oneshot::channel();
        let (detached_tx, detached_rx) = oneshot::channel();

        let leaver = Leaver {
            broker: broker.to_string(),
            address: address.to_string(),
            link: None,
            opened: Some(opened_tx),
            detached: Some(detached_tx),
            received: vec![],
        };

        (leaver, opened_rx, detached_rx)
    }
}

impl Handler for Leaver {
    type Input = ();

    fn on_start(&mut self, container: &mut Container) -> Result<()> {
        let conn = container.connect(&self.broker);

        self.link = Some(container.create_receiver(conn, Some(self.address.as_str()), LinkOptions::default())?);

        Ok(())
    }

    fn on_link_opened(&mut self, _container: &mut Container, _link: LinkId) -> Result<()> {
        if let Some(tx) = self.opened.take() {
            let _ = tx.send(());
        }

        Ok(())
    }

    fn on_link_closed(&mut self, _container: &mut Container, _link: LinkId) -> Result<()> {
        if let Some(tx) = self.detached.take() {
            let _ = tx.send(());
        }

        Ok(())
    }

    fn on_message(&mut self, _container: &mut Container, _delivery: &mut Delivery, message: Message) -> Result<()> {
        self.received.push(message);

        Ok(())
    }

    fn on_input(&mut self, container: &mut Container, _input: ()) -> Result<()> {
        match self.link.take() {
            Some(link) => container.close_link(link)?,
            None => container.stop(),
        }

        Ok(())
    }
}

/// Sends messages to an address, or on an anonymous link if none is given, and stops when all of
/// them are settled.
pub(crate) struct Producer {
    broker: String,
    address: Option<String>,
    messages: VecDeque<Message>,
    total: usize,
    pub(crate) outcomes: Vec<Option<DeliveryState>>,
}

impl Producer {
    pub(crate) fn new(broker: &str, address: Option<&str>, messages: Vec<Message>) -> Self {
        Producer {
            broker: broker.to_string(),
            address: address.map(str::to_string),
            total: messages.len(),
            messages: messages.into(),
            outcomes: vec![],
        }
    }
}

impl Handler for Producer {
    type Input = ();

    fn on_start(&mut self, container: &mut Container) -> Result<()> {
        let conn = container.connect(&self.broker);

        container.create_sender(conn, self.address.as_deref(), LinkOptions::default())?;

        Ok(())
    }

    fn on_sendable(&mut self, container: &mut Container, link: LinkId) -> Result<()> {
        if let Some(sender) = container.sender_mut(link) {
            while sender.credit() > 0 {
                match self.messages.pop_front() {
                    Some(message) => {
                        sender.send(message)?;
                    }
                    None => break,
                }
            }
        }

        Ok(())
    }

    fn on_settled(&mut self, container: &mut Container, delivery: &Delivery) -> Result<()> {
        self.outcomes.push(delivery.remote_state);

        if self.outcomes.len() == self.total {
            container.stop();
        }

        Ok(())
    }
}

/// Send the messages to the address and wait for their outcomes.
pub(crate) async fn produce(broker: &str, address: Option<&str>, messages: Vec<Message>) -> Result<Producer> {
    let (_, handle) = spawn(Producer::new(broker, address, messages));

    Ok(within(handle).await???)
}

pub(crate) fn texts(bodies: &[&str]) -> Vec<Message> {
    bodies.iter().map(|body| Message::text(body)).collect()
}
