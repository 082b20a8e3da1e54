use crate::container::Inbound;
use crate::model::ConnectionId;
use anyhow::Result;
use futures::stream::{SplitSink, StreamExt};
use futures::SinkExt;
use log::{error, trace};
use qtools_codec::codec::{AMQPCodec, Frame};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Connect to the peer and run the socket loop. Connection failure is reported as a disconnect.
pub(crate) async fn connect_loop<I>(
    id: ConnectionId,
    address: String,
    outgoing: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<Inbound<I>>,
) {
    match TcpStream::connect(&address).await {
        Ok(socket) => socket_loop(id, socket, outgoing, inbound).await,
        Err(e) => {
            error!("Cannot connect to {}: {:?}", address, e);

            let _ = inbound.send(Inbound::Disconnected(id, Some(e.to_string())));
        }
    }
}

/// Pump decoded frames to the reactor and frames of the outgoing channel to the socket. The loop
/// ends when the socket is closed or when the reactor drops the outgoing channel; the latter
/// happens after the close handshake, so all queued frames are written out before the socket is
/// dropped.
pub(crate) async fn socket_loop<I>(
    id: ConnectionId,
    socket: TcpStream,
    mut outgoing: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<Inbound<I>>,
) {
    let (mut sink, mut stream) = Framed::new(socket, AMQPCodec {}).split();

    'socket: loop {
        tokio::select! {
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Frame::Frame(frame))) => {
                        trace!("Incoming {} {:?}", id, frame);

                        if inbound.send(Inbound::Frame(id, frame)).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Frame::Frames(frames))) => {
                        for frame in frames {
                            if inbound.send(Inbound::Frame(id, frame)).is_err() {
                                break 'socket;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("Error reading {} {:?}", id, e);

                        let _ = inbound.send(Inbound::Disconnected(id, Some(e.to_string())));
                        break;
                    }
                    None => {
                        let _ = inbound.send(Inbound::Disconnected(id, None));
                        break;
                    }
                }
            }
            frame = outgoing.recv() => {
                match frame {
                    Some(frame) => {
                        if let Err(e) = send_out(&mut sink, frame).await {
                            error!("Error writing {} {:?}", id, e);

                            let _ = inbound.send(Inbound::Disconnected(id, Some(e.to_string())));
                            break;
                        }
                    }
                    None => {
                        // the reactor is done with the connection
                        break;
                    }
                }
            }
        }
    }
}

async fn send_out(sink: &mut SplitSink<Framed<TcpStream, AMQPCodec>, Frame>, frame: Frame) -> Result<()> {
    trace!("Outgoing {:?}", frame);

    sink.send(frame).await?;

    Ok(())
}
