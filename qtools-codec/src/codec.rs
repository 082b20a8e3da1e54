use crate::frame::*;
use crate::{frame_error, FrameError};
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const PROTOCOL_HEADER: &[u8; 8] = b"AMQP\x00\x01\x00\x00";
const FRAME_HEADER_SIZE: usize = 8;
const DATA_OFFSET: u8 = 2;
const FRAME_TYPE_AMQP: u8 = 0x00;
/// Frames bigger than this are considered as garbage on the wire.
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Placeholder for the encoder and decoder functions.
pub struct AMQPCodec {}

#[derive(Debug)]
pub enum Frame {
    Frame(AMQPFrame),
    Frames(Vec<AMQPFrame>),
}

impl From<AMQPFrame> for Frame {
    fn from(frame: AMQPFrame) -> Self {
        Frame::Frame(frame)
    }
}

impl Encoder<Frame> for AMQPCodec {
    type Error = std::io::Error;

    fn encode(&mut self, event: Frame, buf: &mut BytesMut) -> Result<(), Self::Error> {
        match event {
            Frame::Frame(frame) => encode_amqp_frame(buf, &frame)?,
            Frame::Frames(frames) => {
                for frame in frames {
                    encode_amqp_frame(buf, &frame)?;
                }
            }
        }

        Ok(())
    }
}

impl Decoder for AMQPCodec {
    type Item = Frame;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        if src.starts_with(b"AMQP") {
            let mut head = [0u8; 8];
            src.copy_to_slice(&mut head);

            if &head != PROTOCOL_HEADER {
                return Err(FrameError {
                    performative: 0,
                    message: format!("Unsupported protocol header {:?}", head),
                }
                .into());
            }

            return Ok(Some(Frame::Frame(AMQPFrame::Header)));
        }

        let mut size_bytes = [0u8; 4];
        size_bytes.copy_from_slice(&src[0..4]);
        let size = u32::from_be_bytes(size_bytes) as usize;

        if !(FRAME_HEADER_SIZE + 1..=MAX_FRAME_SIZE).contains(&size) {
            return Err(FrameError {
                performative: 0,
                message: format!("Invalid frame size {}", size),
            }
            .into());
        }

        if src.len() < size {
            src.reserve(size - src.len());

            return Ok(None);
        }

        let mut frame_buf = src.split_to(size);
        frame_buf.advance(4);

        let doff = frame_buf.get_u8();
        let frame_type = frame_buf.get_u8();
        let _channel = frame_buf.get_u16();

        if doff != DATA_OFFSET || frame_type != FRAME_TYPE_AMQP {
            return Err(FrameError {
                performative: 0,
                message: format!("Unsupported frame doff={} type={}", doff, frame_type),
            }
            .into());
        }

        let performative = frame_buf.get_u8();
        let frame = decode_performative(&mut frame_buf, performative)?;

        Ok(Some(Frame::Frame(frame)))
    }
}

fn decode_performative(src: &mut BytesMut, performative: u8) -> Result<AMQPFrame, FrameError> {
    let mut r = Reader { src, performative };

    let frame = match performative {
        OPEN => AMQPFrame::Open(OpenArgs {
            container_id: r.string()?,
        }),
        ATTACH => decode_attach(&mut r)?,
        FLOW => AMQPFrame::Flow(FlowArgs {
            handle: r.u32()?,
            delivery_count: r.u32()?,
            link_credit: r.u32()?,
        }),
        TRANSFER => AMQPFrame::Transfer(TransferArgs {
            handle: r.u32()?,
            delivery_id: r.u32()?,
            settled: r.bool()?,
            message: decode_message(&mut r)?,
        }),
        DISPOSITION => {
            let handle = r.u32()?;
            let delivery_id = r.u32()?;
            let settled = r.bool()?;
            let code = r.u8()?;

            let state = match DeliveryState::from_code(code) {
                Some(state) => state,
                None => return frame_error!(performative, format!("Unknown delivery state {:02X}", code)),
            };

            AMQPFrame::Disposition(DispositionArgs {
                handle,
                delivery_id,
                settled,
                state,
            })
        }
        DETACH => AMQPFrame::Detach(DetachArgs {
            handle: r.u32()?,
            closed: r.bool()?,
            error: r.error_condition()?,
        }),
        CLOSE => AMQPFrame::Close(CloseArgs {
            error: r.error_condition()?,
        }),
        _ => return frame_error!(performative, "Unknown performative"),
    };

    Ok(frame)
}

fn decode_attach(r: &mut Reader<'_>) -> Result<AMQPFrame, FrameError> {
    let name = r.string()?;
    let handle = r.u32()?;
    let flags = AttachFlags::from_bits_truncate(r.u8()?);
    let source_address = r.optional_string()?;
    let target_address = r.optional_string()?;

    Ok(AMQPFrame::Attach(AttachArgs {
        name,
        handle,
        role: if flags.contains(AttachFlags::RECEIVER) {
            Role::Receiver
        } else {
            Role::Sender
        },
        snd_settle_mode: if flags.contains(AttachFlags::SETTLED) {
            SettleMode::Settled
        } else {
            SettleMode::Unsettled
        },
        source: Terminus {
            address: source_address,
            dynamic: flags.contains(AttachFlags::SOURCE_DYNAMIC),
        },
        target: Terminus {
            address: target_address,
            dynamic: flags.contains(AttachFlags::TARGET_DYNAMIC),
        },
    }))
}

fn decode_message(r: &mut Reader<'_>) -> Result<Message, FrameError> {
    let flags = MessagePropertyFlags::from_bits_truncate(r.u8()?);
    let mut message = Message::default();

    if flags.contains(MessagePropertyFlags::MESSAGE_ID) {
        message.id = Some(r.string()?);
    }
    if flags.contains(MessagePropertyFlags::ADDRESS) {
        message.address = Some(r.string()?);
    }
    if flags.contains(MessagePropertyFlags::REPLY_TO) {
        message.reply_to = Some(r.string()?);
    }
    if flags.contains(MessagePropertyFlags::CORRELATION_ID) {
        message.correlation_id = Some(r.string()?);
    }
    if flags.contains(MessagePropertyFlags::SUBJECT) {
        message.subject = Some(r.string()?);
    }
    if flags.contains(MessagePropertyFlags::CONTENT_TYPE) {
        message.content_type = Some(r.string()?);
    }

    message.body = r.long_string()?;

    Ok(message)
}

/// Bounds checked reads from a frame body. Every read reports a truncated body as a `FrameError`
/// instead of panicking like the plain `Buf` getters do.
struct Reader<'a> {
    src: &'a mut BytesMut,
    performative: u8,
}

impl<'a> Reader<'a> {
    fn ensure(&self, len: usize) -> Result<(), FrameError> {
        if self.src.remaining() < len {
            return frame_error!(self.performative, "Frame body is too short");
        }

        Ok(())
    }

    fn u8(&mut self) -> Result<u8, FrameError> {
        self.ensure(1)?;
        Ok(self.src.get_u8())
    }

    fn bool(&mut self) -> Result<bool, FrameError> {
        Ok(self.u8()? != 0)
    }

    fn u16(&mut self) -> Result<u16, FrameError> {
        self.ensure(2)?;
        Ok(self.src.get_u16())
    }

    fn u32(&mut self) -> Result<u32, FrameError> {
        self.ensure(4)?;
        Ok(self.src.get_u32())
    }

    fn utf8(&mut self, len: usize) -> Result<String, FrameError> {
        self.ensure(len)?;

        let bytes = self.src.split_to(len);

        match String::from_utf8(bytes.to_vec()) {
            Ok(s) => Ok(s),
            Err(_) => frame_error!(self.performative, "String is not valid UTF-8"),
        }
    }

    fn string(&mut self) -> Result<String, FrameError> {
        let len = self.u16()? as usize;
        self.utf8(len)
    }

    fn long_string(&mut self) -> Result<String, FrameError> {
        let len = self.u32()? as usize;
        self.utf8(len)
    }

    fn optional_string(&mut self) -> Result<Option<String>, FrameError> {
        if self.bool()? {
            Ok(Some(self.string()?))
        } else {
            Ok(None)
        }
    }

    fn error_condition(&mut self) -> Result<Option<ErrorCondition>, FrameError> {
        if !self.bool()? {
            return Ok(None);
        }

        Ok(Some(ErrorCondition {
            condition: self.string()?,
            description: self.string()?,
        }))
    }
}

/// The frame goes to `buf` only if its whole body could be encoded.
fn encode_amqp_frame(buf: &mut BytesMut, frame: &AMQPFrame) -> Result<(), FrameError> {
    let performative = match frame.performative() {
        None => {
            buf.put(&PROTOCOL_HEADER[..]);
            return Ok(());
        }
        Some(p) => p,
    };

    let mut body = BytesMut::with_capacity(256);

    match frame {
        AMQPFrame::Header => unreachable!(),
        AMQPFrame::Open(args) => encode_string(&mut body, performative, &args.container_id)?,
        AMQPFrame::Attach(args) => encode_attach(&mut body, performative, args)?,
        AMQPFrame::Flow(args) => {
            body.put_u32(args.handle);
            body.put_u32(args.delivery_count);
            body.put_u32(args.link_credit);
        }
        AMQPFrame::Transfer(args) => {
            body.put_u32(args.handle);
            body.put_u32(args.delivery_id);
            body.put_u8(args.settled as u8);
            encode_message(&mut body, performative, &args.message)?;
        }
        AMQPFrame::Disposition(args) => {
            body.put_u32(args.handle);
            body.put_u32(args.delivery_id);
            body.put_u8(args.settled as u8);
            body.put_u8(args.state.code());
        }
        AMQPFrame::Detach(args) => {
            body.put_u32(args.handle);
            body.put_u8(args.closed as u8);
            encode_error_condition(&mut body, performative, args.error.as_ref())?;
        }
        AMQPFrame::Close(args) => encode_error_condition(&mut body, performative, args.error.as_ref())?,
    }

    buf.reserve(FRAME_HEADER_SIZE + 1 + body.len());
    buf.put_u32((FRAME_HEADER_SIZE + 1 + body.len()) as u32);
    buf.put_u8(DATA_OFFSET);
    buf.put_u8(FRAME_TYPE_AMQP);
    buf.put_u16(0);
    buf.put_u8(performative);
    buf.put(body);

    Ok(())
}

fn encode_attach(buf: &mut BytesMut, performative: u8, args: &AttachArgs) -> Result<(), FrameError> {
    encode_string(buf, performative, &args.name)?;
    buf.put_u32(args.handle);
    buf.put_u8(args.flags().bits());
    encode_optional_string(buf, performative, args.source.address.as_deref())?;
    encode_optional_string(buf, performative, args.target.address.as_deref())
}

fn encode_message(buf: &mut BytesMut, performative: u8, message: &Message) -> Result<(), FrameError> {
    buf.put_u8(message.property_flags().bits());

    let properties = [
        &message.id,
        &message.address,
        &message.reply_to,
        &message.correlation_id,
        &message.subject,
        &message.content_type,
    ];

    // same order as the property flag bits
    for value in properties.into_iter().flatten() {
        encode_string(buf, performative, value)?;
    }

    let len = match u32::try_from(message.body.len()) {
        Ok(len) if (len as usize) < MAX_FRAME_SIZE => len,
        _ => return frame_error!(performative, "Message body is too long"),
    };

    buf.put_u32(len);
    buf.put(message.body.as_bytes());

    Ok(())
}

/// Short strings carry a 16 bit length, longer ones cannot be encoded.
fn encode_string(buf: &mut BytesMut, performative: u8, s: &str) -> Result<(), FrameError> {
    let len = match u16::try_from(s.len()) {
        Ok(len) => len,
        Err(_) => return frame_error!(performative, format!("String of {} bytes is too long", s.len())),
    };

    buf.put_u16(len);
    buf.put(s.as_bytes());

    Ok(())
}

fn encode_optional_string(buf: &mut BytesMut, performative: u8, s: Option<&str>) -> Result<(), FrameError> {
    match s {
        None => {
            buf.put_u8(0);

            Ok(())
        }
        Some(s) => {
            buf.put_u8(1);
            encode_string(buf, performative, s)
        }
    }
}

fn encode_error_condition(
    buf: &mut BytesMut,
    performative: u8,
    error: Option<&ErrorCondition>,
) -> Result<(), FrameError> {
    match error {
        None => {
            buf.put_u8(0);

            Ok(())
        }
        Some(err) => {
            buf.put_u8(1);
            encode_string(buf, performative, &err.condition)?;
            encode_string(buf, performative, &err.description)
        }
    }
}
