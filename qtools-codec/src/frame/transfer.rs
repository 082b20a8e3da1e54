use super::{AMQPFrame, DeliveryId, Handle};

/// Terminal outcome of a delivery as reported by the receiving side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryState {
    Accepted,
    Rejected,
    Released,
    Modified,
}

impl DeliveryState {
    pub fn code(self) -> u8 {
        match self {
            DeliveryState::Accepted => 0x24,
            DeliveryState::Rejected => 0x25,
            DeliveryState::Released => 0x26,
            DeliveryState::Modified => 0x27,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x24 => Some(DeliveryState::Accepted),
            0x25 => Some(DeliveryState::Rejected),
            0x26 => Some(DeliveryState::Released),
            0x27 => Some(DeliveryState::Modified),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeliveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DeliveryState::Accepted => "accepted",
            DeliveryState::Rejected => "rejected",
            DeliveryState::Released => "released",
            DeliveryState::Modified => "modified",
        };

        f.write_str(name)
    }
}

bitflags! {
    /// Marks which optional message properties follow in the encoded message.
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct MessagePropertyFlags: u8 {
        const MESSAGE_ID     = 0b0000_0001;
        const ADDRESS        = 0b0000_0010;
        const REPLY_TO       = 0b0000_0100;
        const CORRELATION_ID = 0b0000_1000;
        const SUBJECT        = 0b0001_0000;
        const CONTENT_TYPE   = 0b0010_0000;
    }
}

/// A message with the properties the broker and the request client care about and a text body.
#[derive(Clone, Default, PartialEq)]
pub struct Message {
    pub id: Option<String>,
    /// Routing address, used when the link has no fixed target.
    pub address: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<String>,
    pub subject: Option<String>,
    pub content_type: Option<String>,
    pub body: String,
}

impl Message {
    pub fn text(body: &str) -> Self {
        Message {
            body: body.to_string(),
            ..Default::default()
        }
    }

    pub fn address(mut self, address: &str) -> Self {
        self.address = Some(address.to_string());
        self
    }

    pub fn reply_to(mut self, reply_to: &str) -> Self {
        self.reply_to = Some(reply_to.to_string());
        self
    }

    pub fn id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    pub fn property_flags(&self) -> MessagePropertyFlags {
        let mut flags = MessagePropertyFlags::empty();

        flags.set(MessagePropertyFlags::MESSAGE_ID, self.id.is_some());
        flags.set(MessagePropertyFlags::ADDRESS, self.address.is_some());
        flags.set(MessagePropertyFlags::REPLY_TO, self.reply_to.is_some());
        flags.set(MessagePropertyFlags::CORRELATION_ID, self.correlation_id.is_some());
        flags.set(MessagePropertyFlags::SUBJECT, self.subject.is_some());
        flags.set(MessagePropertyFlags::CONTENT_TYPE, self.content_type.is_some());

        flags
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body: String = self.body.chars().take(64).collect();

        f.debug_struct("Message")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("reply_to", &self.reply_to)
            .field("body", &body)
            .finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct TransferArgs {
    pub handle: Handle,
    pub delivery_id: DeliveryId,
    pub settled: bool,
    pub message: Message,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DispositionArgs {
    pub handle: Handle,
    pub delivery_id: DeliveryId,
    pub settled: bool,
    pub state: DeliveryState,
}

pub fn transfer(handle: Handle, delivery_id: DeliveryId, settled: bool, message: Message) -> AMQPFrame {
    AMQPFrame::Transfer(TransferArgs {
        handle,
        delivery_id,
        settled,
        message,
    })
}

pub fn disposition(handle: Handle, delivery_id: DeliveryId, state: DeliveryState) -> AMQPFrame {
    AMQPFrame::Disposition(DispositionArgs {
        handle,
        delivery_id,
        settled: true,
        state,
    })
}
