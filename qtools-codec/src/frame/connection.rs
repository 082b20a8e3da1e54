use super::{AMQPFrame, ErrorCondition};

#[derive(Clone, Debug, Default)]
pub struct OpenArgs {
    pub container_id: String,
}

#[derive(Clone, Debug, Default)]
pub struct CloseArgs {
    pub error: Option<ErrorCondition>,
}

pub fn open(container_id: &str) -> AMQPFrame {
    AMQPFrame::Open(OpenArgs {
        container_id: container_id.to_string(),
    })
}

pub fn close(error: Option<ErrorCondition>) -> AMQPFrame {
    AMQPFrame::Close(CloseArgs { error })
}
