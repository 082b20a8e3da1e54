use bitflags::Flags;

use super::{AMQPFrame, ErrorCondition, Handle};

/// The role of the link endpoint which sent the attach frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Role {
    #[default]
    Sender,
    Receiver,
}

impl Role {
    pub fn inverse(self) -> Self {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

/// Settlement policy of the sending endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SettleMode {
    /// Deliveries are settled by the receiver's disposition.
    #[default]
    Unsettled,
    /// Deliveries are sent settled, aka. fire-and-forget.
    Settled,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq)]
    pub struct AttachFlags: u8 {
        const RECEIVER = 0b0000_0001;
        const SETTLED = 0b0000_0010;
        const SOURCE_DYNAMIC = 0b0000_0100;
        const TARGET_DYNAMIC = 0b0000_1000;
    }
}

/// Source or target of a link. A dynamic terminus asks the peer to assign the address.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Terminus {
    pub address: Option<String>,
    pub dynamic: bool,
}

impl Terminus {
    pub fn address(address: &str) -> Self {
        Terminus {
            address: Some(address.to_string()),
            dynamic: false,
        }
    }

    pub fn dynamic() -> Self {
        Terminus {
            address: None,
            dynamic: true,
        }
    }
}

impl std::fmt::Display for Terminus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.address, self.dynamic) {
            (Some(address), _) => write!(f, "'{}'", address),
            (None, true) => write!(f, "<dynamic>"),
            (None, false) => write!(f, "<none>"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct AttachArgs {
    pub name: String,
    pub handle: Handle,
    pub role: Role,
    pub snd_settle_mode: SettleMode,
    pub source: Terminus,
    pub target: Terminus,
}

impl AttachArgs {
    pub fn flags(&self) -> AttachFlags {
        let mut flags = AttachFlags::empty();

        Flags::set(&mut flags, AttachFlags::RECEIVER, self.role == Role::Receiver);
        Flags::set(&mut flags, AttachFlags::SETTLED, self.snd_settle_mode == SettleMode::Settled);
        Flags::set(&mut flags, AttachFlags::SOURCE_DYNAMIC, self.source.dynamic);
        Flags::set(&mut flags, AttachFlags::TARGET_DYNAMIC, self.target.dynamic);

        flags
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlowArgs {
    pub handle: Handle,
    /// Number of deliveries the receiver has seen on the link so far.
    pub delivery_count: u32,
    pub link_credit: u32,
}

#[derive(Clone, Debug, Default)]
pub struct DetachArgs {
    pub handle: Handle,
    pub closed: bool,
    pub error: Option<ErrorCondition>,
}

pub fn attach(args: AttachArgs) -> AMQPFrame {
    AMQPFrame::Attach(args)
}

pub fn flow(handle: Handle, delivery_count: u32, link_credit: u32) -> AMQPFrame {
    AMQPFrame::Flow(FlowArgs {
        handle,
        delivery_count,
        link_credit,
    })
}

pub fn detach(handle: Handle, error: Option<ErrorCondition>) -> AMQPFrame {
    AMQPFrame::Detach(DetachArgs {
        handle,
        closed: true,
        error,
    })
}
