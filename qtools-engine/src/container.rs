use crate::connection::Connection;
use crate::handler::Handler;
use crate::io;
use crate::link::{Endpoint, Link, LinkEndpoint, ReceiverLink, SenderLink};
use crate::model::{ConnectionId, EndpointState, LinkId, LinkOptions, DEFAULT_PREFETCH};
use crate::{engine_error, logerr};
use anyhow::{anyhow, Result};
use log::{debug, info, trace, warn};
use qtools_codec::frame::{
    self, AMQPFrame, AttachArgs, CloseArgs, DetachArgs, DispositionArgs, ErrorCondition, FlowArgs, Role, SettleMode,
    Terminus, TransferArgs, INVALID_FIELD, NOT_FOUND,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Events the reactor loop processes one by one.
pub(crate) enum Inbound<I> {
    Accepted(TcpStream, SocketAddr),
    Frame(ConnectionId, AMQPFrame),
    Disconnected(ConnectionId, Option<String>),
    Input(I),
}

/// Handle to push values into the reactor of a container from any thread. The values are passed
/// to [`Handler::on_input`].
pub struct Injector<I> {
    tx: mpsc::UnboundedSender<Inbound<I>>,
}

impl<I> Clone for Injector<I> {
    fn clone(&self) -> Self {
        Injector { tx: self.tx.clone() }
    }
}

impl<I> Injector<I> {
    /// Fails if the container has stopped.
    pub fn inject(&self, input: I) -> Result<()> {
        self.tx
            .send(Inbound::Input(input))
            .map_err(|_| anyhow!("Container is not running"))
    }
}

/// Owner of all the connections and links of an application, see the crate documentation.
pub struct Container<I = ()> {
    id: String,
    connections: BTreeMap<ConnectionId, Connection>,
    inbound_tx: mpsc::UnboundedSender<Inbound<I>>,
    inbound_rx: Option<mpsc::UnboundedReceiver<Inbound<I>>>,
    listeners: Vec<JoinHandle<()>>,
    stopping: bool,
}

impl<I: Send + 'static> Container<I> {
    pub fn new(id: &str) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        Container {
            id: id.to_string(),
            connections: BTreeMap::new(),
            inbound_tx,
            inbound_rx: Some(inbound_rx),
            listeners: vec![],
            stopping: false,
        }
    }

    /// Container with a random id.
    pub fn with_random_id() -> Self {
        Self::new(&uuid::Uuid::new_v4().to_string())
    }

    pub fn container_id(&self) -> &str {
        &self.id
    }

    pub fn injector(&self) -> Injector<I> {
        Injector {
            tx: self.inbound_tx.clone(),
        }
    }

    /// Bind a listener on `address` (`host:port`) and accept connections in the background.
    /// Returns the bound address, the port is the actual one if 0 was given.
    pub fn listen(&mut self, address: &str) -> Result<SocketAddr> {
        let std_listener = std::net::TcpListener::bind(address)?;
        std_listener.set_nonblocking(true)?;

        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;
        let inbound = self.inbound_tx.clone();

        self.listeners.push(tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        if inbound.send(Inbound::Accepted(socket, peer)).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Error accepting connection {:?}", e),
                }
            }
        }));

        Ok(local_addr)
    }

    /// Open a connection to `address` (`host:port`). Links can be created on the connection right
    /// away, their frames are sent once the socket is connected.
    pub fn connect(&mut self, address: &str) -> ConnectionId {
        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let mut conn = Connection::new(id, false, Some(address.to_string()), out_tx);

        conn.set_container(&self.id);
        conn.local_state = EndpointState::Active;

        logerr!(conn.send(AMQPFrame::Header));
        logerr!(conn.send(frame::open(&self.id)));

        self.connections.insert(id, conn);

        tokio::spawn(io::connect_loop(id, address.to_string(), out_rx, self.inbound_tx.clone()));

        id
    }

    /// Create a sender link on the connection. The target is `address` or a dynamic one.
    pub fn create_sender(
        &mut self,
        connection: ConnectionId,
        address: Option<&str>,
        options: LinkOptions,
    ) -> Result<LinkId> {
        let conn = self.connection_or_err(connection)?;
        let id = LinkId {
            connection,
            handle: conn.allocate_handle(),
        };

        let mut endpoint = LinkEndpoint::new(id, uuid::Uuid::new_v4().to_string(), conn.outgoing());
        endpoint.target = Terminus {
            address: address.map(str::to_string),
            dynamic: options.dynamic,
        };
        endpoint.local_state = EndpointState::Active;

        let settle_mode = if options.at_most_once {
            SettleMode::Settled
        } else {
            SettleMode::Unsettled
        };

        let link = Link::Sender(SenderLink::new(endpoint, settle_mode));

        conn.send(link.attach_frame())?;
        conn.links.insert(id.handle, link);

        debug!("Created sender {} to {:?}", id, address);

        Ok(id)
    }

    /// Create a receiver link on the connection. The source is `address` or a dynamic one which
    /// the peer assigns; it is known when the link is opened.
    pub fn create_receiver(
        &mut self,
        connection: ConnectionId,
        address: Option<&str>,
        options: LinkOptions,
    ) -> Result<LinkId> {
        let conn = self.connection_or_err(connection)?;
        let id = LinkId {
            connection,
            handle: conn.allocate_handle(),
        };

        let mut endpoint = LinkEndpoint::new(id, uuid::Uuid::new_v4().to_string(), conn.outgoing());
        endpoint.source = Terminus {
            address: address.map(str::to_string),
            dynamic: options.dynamic,
        };
        endpoint.local_state = EndpointState::Active;

        let mut link = Link::Receiver(ReceiverLink::new(endpoint, options.prefetch));

        conn.send(link.attach_frame())?;

        if let Some(receiver) = link.as_receiver_mut() {
            if options.prefetch > 0 {
                receiver.flow(options.prefetch)?;
            }
        }

        conn.links.insert(id.handle, link);

        debug!("Created receiver {} from {:?}", id, address);

        Ok(id)
    }

    /// Detach the link. It is removed once the peer answers.
    pub fn close_link(&mut self, id: LinkId) -> Result<()> {
        let conn = self.connection_or_err(id.connection)?;

        let link = match conn.links.get_mut(&id.handle) {
            Some(link) => link,
            None => return engine_error!(NOT_FOUND, format!("Link {} not found", id)),
        };

        if link.local_state() == EndpointState::Closed {
            return Ok(());
        }

        link.endpoint_mut().local_state = EndpointState::Closed;

        conn.send(frame::detach(id.handle, None))
    }

    /// Close the connection. It is removed once the peer answers or the socket is closed.
    pub fn close_connection(&mut self, id: ConnectionId) -> Result<()> {
        let conn = self.connection_or_err(id)?;

        if conn.local_state == EndpointState::Closed {
            return Ok(());
        }

        conn.local_state = EndpointState::Closed;

        for link in conn.links.values_mut() {
            link.endpoint_mut().local_state = EndpointState::Closed;
        }

        conn.send(frame::close(None))
    }

    /// Stop listening and close all the connections. The reactor loop returns once every
    /// connection is closed.
    pub fn stop(&mut self) {
        self.stopping = true;

        for listener in self.listeners.drain(..) {
            listener.abort();
        }

        let ids: Vec<ConnectionId> = self.connections.keys().copied().collect();

        for id in ids {
            logerr!(self.close_connection(id));
        }
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    pub fn connection_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    pub fn link(&self, id: LinkId) -> Option<&Link> {
        self.connections.get(&id.connection)?.links.get(&id.handle)
    }

    pub fn link_mut(&mut self, id: LinkId) -> Option<&mut Link> {
        self.connections.get_mut(&id.connection)?.links.get_mut(&id.handle)
    }

    pub fn sender(&self, id: LinkId) -> Option<&SenderLink> {
        self.link(id)?.as_sender()
    }

    pub fn sender_mut(&mut self, id: LinkId) -> Option<&mut SenderLink> {
        self.link_mut(id)?.as_sender_mut()
    }

    pub fn receiver(&self, id: LinkId) -> Option<&ReceiverLink> {
        self.link(id)?.as_receiver()
    }

    pub fn receiver_mut(&mut self, id: LinkId) -> Option<&mut ReceiverLink> {
        self.link_mut(id)?.as_receiver_mut()
    }

    /// Run the reactor until the container is stopped and all its connections are closed. The
    /// handler is given back at the end.
    pub async fn run<H: Handler<Input = I>>(mut self, mut handler: H) -> Result<H> {
        let mut inbound = match self.inbound_rx.take() {
            Some(rx) => rx,
            None => return Err(anyhow!("Container is already running")),
        };

        handler.on_start(&mut self)?;

        while !(self.stopping && self.connections.is_empty()) {
            match inbound.recv().await {
                Some(event) => self.process(event, &mut handler),
                None => break,
            }
        }

        info!("Container {} stopped", self.id);

        Ok(handler)
    }

    fn process<H: Handler<Input = I>>(&mut self, event: Inbound<I>, handler: &mut H) {
        match event {
            Inbound::Accepted(socket, peer) => self.accept(socket, peer),
            Inbound::Frame(id, frame) => {
                if !self.connections.contains_key(&id) {
                    trace!("Frame for the closed {} {:?}", id, frame);
                    return;
                }

                if let Err(e) = self.process_frame(id, frame, handler) {
                    warn!("Error processing frame of {} {:?}", id, e);
                }
            }
            Inbound::Disconnected(id, error) => {
                if !self.connections.contains_key(&id) {
                    return;
                }

                match error {
                    Some(e) => warn!("Disconnected {} with error {}", id, e),
                    None => debug!("Disconnected {}", id),
                }

                logerr!(handler.on_disconnected(self, id));

                self.connections.remove(&id);
            }
            Inbound::Input(input) => logerr!(handler.on_input(self, input)),
        }
    }

    fn accept(&mut self, socket: TcpStream, peer: SocketAddr) {
        if self.stopping {
            return;
        }

        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        self.connections
            .insert(id, Connection::new(id, true, Some(peer.to_string()), out_tx));

        debug!("Accepted {} from {}", id, peer);

        tokio::spawn(io::socket_loop(id, socket, out_rx, self.inbound_tx.clone()));
    }

    fn process_frame<H: Handler<Input = I>>(
        &mut self,
        id: ConnectionId,
        frame: AMQPFrame,
        handler: &mut H,
    ) -> Result<()> {
        match frame {
            AMQPFrame::Header => {
                let conn = self.connection_or_err(id)?;

                if conn.is_accepted() {
                    conn.send(AMQPFrame::Header)?;
                }

                Ok(())
            }
            AMQPFrame::Open(args) => self.on_open(id, args.container_id, handler),
            AMQPFrame::Attach(args) => self.on_attach(id, args, handler),
            AMQPFrame::Flow(args) => self.on_flow(id, args, handler),
            AMQPFrame::Transfer(args) => self.on_transfer(id, args, handler),
            AMQPFrame::Disposition(args) => self.on_disposition(id, args, handler),
            AMQPFrame::Detach(args) => self.on_detach(id, args, handler),
            AMQPFrame::Close(args) => self.on_close(id, args, handler),
        }
    }

    fn on_open<H: Handler<Input = I>>(&mut self, id: ConnectionId, remote: String, handler: &mut H) -> Result<()> {
        let conn = self.connection_or_err(id)?;

        conn.set_remote_container(remote);
        conn.remote_state = EndpointState::Active;

        if conn.local_state == EndpointState::Uninitialized {
            logerr!(handler.on_connection_opening(self, id));

            let local_id = self.id.clone();
            let conn = self.connection_or_err(id)?;
            let container = conn.container().map(str::to_string).unwrap_or(local_id);

            conn.send(frame::open(&container))?;
            conn.local_state = EndpointState::Active;
        }

        debug!("Opened {}", id);

        logerr!(handler.on_connection_opened(self, id));

        Ok(())
    }

    fn on_attach<H: Handler<Input = I>>(&mut self, id: ConnectionId, args: AttachArgs, handler: &mut H) -> Result<()> {
        let conn = self.connection_or_err(id)?;
        let link_id = LinkId {
            connection: id,
            handle: args.handle,
        };

        if let Some(link) = conn.links.get_mut(&args.handle) {
            // the peer answers our attach
            let ep = link.endpoint_mut();
            ep.remote_source = args.source;
            ep.remote_target = args.target;
            ep.remote_state = EndpointState::Active;

            logerr!(handler.on_link_opened(self, link_id));

            return Ok(());
        }

        let mut endpoint = LinkEndpoint::new(link_id, args.name, conn.outgoing());
        endpoint.remote_state = EndpointState::Active;

        // the peer's role decides ours
        let link = match args.role {
            Role::Receiver => {
                endpoint.source.dynamic = args.source.dynamic;
                endpoint.target = args.target.clone();

                Link::Sender(SenderLink::new(endpoint, args.snd_settle_mode))
            }
            Role::Sender => {
                endpoint.source = args.source.clone();
                endpoint.target.dynamic = args.target.dynamic;

                Link::Receiver(ReceiverLink::new(endpoint, DEFAULT_PREFETCH))
            }
        };

        conn.links.insert(args.handle, link);

        if let Some(link) = conn.links.get_mut(&args.handle) {
            let ep = link.endpoint_mut();
            ep.remote_source = args.source;
            ep.remote_target = args.target;
        }

        let opening = handler.on_link_opening(self, link_id);

        let conn = self.connection_or_err(id)?;
        let link = match conn.links.get_mut(&link_id.handle) {
            Some(link) => link,
            None => return Ok(()),
        };

        match opening {
            Ok(()) => {
                link.endpoint_mut().local_state = EndpointState::Active;

                let attach = link.attach_frame();
                conn.send(attach)?;

                if let Some(receiver) = conn.links.get_mut(&link_id.handle).and_then(Link::as_receiver_mut) {
                    let prefetch = receiver.prefetch();

                    receiver.flow(prefetch)?;
                }

                logerr!(handler.on_link_opened(self, link_id));
            }
            Err(e) => {
                warn!("Refused link {} {:?}", link_id, e);

                let attach = link.attach_frame();
                conn.links.remove(&link_id.handle);

                conn.send(attach)?;
                conn.send(frame::detach(
                    link_id.handle,
                    Some(ErrorCondition::new(INVALID_FIELD, &e.to_string())),
                ))?;
            }
        }

        Ok(())
    }

    fn on_flow<H: Handler<Input = I>>(&mut self, id: ConnectionId, args: FlowArgs, handler: &mut H) -> Result<()> {
        let link_id = LinkId {
            connection: id,
            handle: args.handle,
        };

        let sender = match self.link_mut(link_id) {
            Some(Link::Sender(sender)) => sender,
            Some(Link::Receiver(_)) => return Ok(()),
            None => return engine_error!(NOT_FOUND, format!("Flow on unknown link {}", link_id)),
        };

        sender.on_flow(&args);

        if sender.credit() > 0 && sender.local_state() == EndpointState::Active {
            logerr!(handler.on_sendable(self, link_id));
        }

        Ok(())
    }

    fn on_transfer<H: Handler<Input = I>>(
        &mut self,
        id: ConnectionId,
        args: TransferArgs,
        handler: &mut H,
    ) -> Result<()> {
        let link_id = LinkId {
            connection: id,
            handle: args.handle,
        };

        let mut delivery = match self.receiver_mut(link_id) {
            Some(receiver) => receiver.on_transfer(&args),
            None => return engine_error!(NOT_FOUND, format!("Transfer on unknown receiver {}", link_id)),
        };

        logerr!(handler.on_message(self, &mut delivery, args.message));

        // the handler may have closed the link in the meantime
        if let Some(receiver) = self.receiver_mut(link_id) {
            if receiver.local_state() == EndpointState::Active {
                receiver.settle(&delivery)?;
                receiver.replenish()?;
            }
        }

        Ok(())
    }

    fn on_disposition<H: Handler<Input = I>>(
        &mut self,
        id: ConnectionId,
        args: DispositionArgs,
        handler: &mut H,
    ) -> Result<()> {
        let link_id = LinkId {
            connection: id,
            handle: args.handle,
        };

        let settled = match self.sender_mut(link_id) {
            Some(sender) => sender.on_disposition(&args),
            None => return engine_error!(NOT_FOUND, format!("Disposition on unknown sender {}", link_id)),
        };

        if let Some(delivery) = settled {
            logerr!(handler.on_settled(self, &delivery));
        }

        Ok(())
    }

    fn on_detach<H: Handler<Input = I>>(&mut self, id: ConnectionId, args: DetachArgs, handler: &mut H) -> Result<()> {
        let link_id = LinkId {
            connection: id,
            handle: args.handle,
        };

        if let Some(err) = &args.error {
            warn!("Link {} detached with error {}", link_id, err);
        }

        let conn = self.connection_or_err(id)?;

        let link = match conn.links.get_mut(&args.handle) {
            Some(link) => link,
            None => {
                debug!("Detach of unknown link {}", link_id);
                return Ok(());
            }
        };

        link.endpoint_mut().remote_state = EndpointState::Closed;

        if link.local_state() != EndpointState::Closed {
            logerr!(handler.on_link_closing(self, link_id));

            let conn = self.connection_or_err(id)?;

            if let Some(link) = conn.links.get_mut(&args.handle) {
                link.endpoint_mut().local_state = EndpointState::Closed;
                conn.send(frame::detach(args.handle, None))?;
            }
        }

        logerr!(handler.on_link_closed(self, link_id));

        if let Some(conn) = self.connections.get_mut(&id) {
            conn.links.remove(&args.handle);
        }

        Ok(())
    }

    fn on_close<H: Handler<Input = I>>(&mut self, id: ConnectionId, args: CloseArgs, handler: &mut H) -> Result<()> {
        if let Some(err) = &args.error {
            warn!("Connection {} closed with error {}", id, err);
        }

        let conn = self.connection_or_err(id)?;
        conn.remote_state = EndpointState::Closed;

        if conn.local_state != EndpointState::Closed {
            logerr!(handler.on_connection_closing(self, id));

            let conn = self.connection_or_err(id)?;
            conn.local_state = EndpointState::Closed;
            conn.send(frame::close(None))?;
        }

        logerr!(handler.on_connection_closed(self, id));

        // dropping the connection ends its socket loop
        self.connections.remove(&id);

        debug!("Closed {}", id);

        Ok(())
    }

    fn connection_or_err(&mut self, id: ConnectionId) -> Result<&mut Connection> {
        match self.connections.get_mut(&id) {
            Some(conn) => Ok(conn),
            None => engine_error!(NOT_FOUND, format!("Connection {} not found", id)),
        }
    }
}
