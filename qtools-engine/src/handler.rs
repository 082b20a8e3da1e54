use crate::container::Container;
use crate::model::{ConnectionId, Delivery, LinkId};
use anyhow::Result;
use qtools_codec::frame::Message;

/// Callbacks of the reactor. Every callback is optional.
///
/// Only an error of `on_start` stops the container. Errors of the other callbacks are logged and
/// the reactor goes on with the next event, except `on_link_opening` where the error refuses the
/// link proposed by the peer.
#[allow(unused_variables)]
pub trait Handler {
    /// Values injected by other threads via an [`crate::Injector`].
    type Input: Send + 'static;

    fn on_start(&mut self, container: &mut Container<Self::Input>) -> Result<()> {
        Ok(())
    }

    /// The peer opened a connection, the local endpoint is going to be opened after this callback.
    fn on_connection_opening(
        &mut self,
        container: &mut Container<Self::Input>,
        connection: ConnectionId,
    ) -> Result<()> {
        Ok(())
    }

    fn on_connection_opened(&mut self, container: &mut Container<Self::Input>, connection: ConnectionId) -> Result<()> {
        Ok(())
    }

    /// The peer closed the connection, the local endpoint is going to be closed after this callback.
    fn on_connection_closing(
        &mut self,
        container: &mut Container<Self::Input>,
        connection: ConnectionId,
    ) -> Result<()> {
        Ok(())
    }

    fn on_connection_closed(&mut self, container: &mut Container<Self::Input>, connection: ConnectionId) -> Result<()> {
        Ok(())
    }

    /// The socket of the connection is closed or broken without a proper close handshake.
    fn on_disconnected(&mut self, container: &mut Container<Self::Input>, connection: ConnectionId) -> Result<()> {
        Ok(())
    }

    /// The peer proposes a new link. The handler can set the local terminus addresses.
    fn on_link_opening(&mut self, container: &mut Container<Self::Input>, link: LinkId) -> Result<()> {
        Ok(())
    }

    fn on_link_opened(&mut self, container: &mut Container<Self::Input>, link: LinkId) -> Result<()> {
        Ok(())
    }

    /// The peer detached the link, the local endpoint is going to be detached after this callback.
    fn on_link_closing(&mut self, container: &mut Container<Self::Input>, link: LinkId) -> Result<()> {
        Ok(())
    }

    fn on_link_closed(&mut self, container: &mut Container<Self::Input>, link: LinkId) -> Result<()> {
        Ok(())
    }

    /// The sender link has credit to send messages.
    fn on_sendable(&mut self, container: &mut Container<Self::Input>, link: LinkId) -> Result<()> {
        Ok(())
    }

    /// A message arrived on a receiver link. Unless the handler sets another outcome on the
    /// delivery, it is accepted after the callback.
    fn on_message(
        &mut self,
        container: &mut Container<Self::Input>,
        delivery: &mut Delivery,
        message: Message,
    ) -> Result<()> {
        Ok(())
    }

    /// The peer settled a delivery sent on a sender link.
    fn on_settled(&mut self, container: &mut Container<Self::Input>, delivery: &Delivery) -> Result<()> {
        Ok(())
    }

    fn on_input(&mut self, container: &mut Container<Self::Input>, input: Self::Input) -> Result<()> {
        Ok(())
    }
}
