mod connection;
mod link;
mod transfer;

pub use self::{
    connection::{close, open, CloseArgs, OpenArgs},
    link::{attach, detach, flow, AttachArgs, AttachFlags, DetachArgs, FlowArgs, Role, SettleMode, Terminus},
    transfer::{disposition, transfer, DeliveryState, DispositionArgs, Message, MessagePropertyFlags, TransferArgs},
};

pub const OPEN: u8 = 0x10;
pub const ATTACH: u8 = 0x12;
pub const FLOW: u8 = 0x13;
pub const TRANSFER: u8 = 0x14;
pub const DISPOSITION: u8 = 0x15;
pub const DETACH: u8 = 0x16;
pub const CLOSE: u8 = 0x18;

/// Link handle, unique per connection and link endpoint.
pub type Handle = u32;
/// Delivery identifier, unique per link.
pub type DeliveryId = u32;

/// Condition names used in detach and close frames.
pub const INTERNAL_ERROR: &str = "amqp:internal-error";
pub const INVALID_FIELD: &str = "amqp:invalid-field";
pub const NOT_FOUND: &str = "amqp:not-found";

/// Represents a frame of the link protocol.
pub enum AMQPFrame {
    /// Header is to be sent by the connecting side at first, announcing the protocol version.
    Header,
    Open(OpenArgs),
    Attach(AttachArgs),
    Flow(FlowArgs),
    Transfer(TransferArgs),
    Disposition(DispositionArgs),
    Detach(DetachArgs),
    Close(CloseArgs),
}

impl AMQPFrame {
    /// The performative code of the frame, `None` for the protocol header.
    pub fn performative(&self) -> Option<u8> {
        match self {
            AMQPFrame::Header => None,
            AMQPFrame::Open(_) => Some(OPEN),
            AMQPFrame::Attach(_) => Some(ATTACH),
            AMQPFrame::Flow(_) => Some(FLOW),
            AMQPFrame::Transfer(_) => Some(TRANSFER),
            AMQPFrame::Disposition(_) => Some(DISPOSITION),
            AMQPFrame::Detach(_) => Some(DETACH),
            AMQPFrame::Close(_) => Some(CLOSE),
        }
    }
}

impl std::fmt::Debug for AMQPFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AMQPFrame::Header => write!(f, "Header"),
            AMQPFrame::Open(args) => write!(f, "Open({:?})", args),
            AMQPFrame::Attach(args) => write!(f, "Attach({:?})", args),
            AMQPFrame::Flow(args) => write!(f, "Flow({:?})", args),
            AMQPFrame::Transfer(args) => write!(f, "Transfer({:?})", args),
            AMQPFrame::Disposition(args) => write!(f, "Disposition({:?})", args),
            AMQPFrame::Detach(args) => write!(f, "Detach({:?})", args),
            AMQPFrame::Close(args) => write!(f, "Close({:?})", args),
        }
    }
}

/// Error condition carried by detach and close frames.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorCondition {
    pub condition: String,
    pub description: String,
}

impl ErrorCondition {
    pub fn new(condition: &str, description: &str) -> Self {
        ErrorCondition {
            condition: condition.to_string(),
            description: description.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.condition, self.description)
    }
}
