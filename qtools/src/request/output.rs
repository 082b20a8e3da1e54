use anyhow::Result;
use qtools_engine::Message;
use serde_derive::Serialize;
use std::io::Write;

/// JSON form of a response, only the properties which are set.
#[derive(Serialize)]
struct MessageData<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    subject: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    content_type: Option<&'a str>,
    body: &'a str,
}

impl<'a> From<&'a Message> for MessageData<'a> {
    fn from(message: &'a Message) -> Self {
        MessageData {
            id: message.id.as_deref(),
            address: message.address.as_deref(),
            reply_to: message.reply_to.as_deref(),
            correlation_id: message.correlation_id.as_deref(),
            subject: message.subject.as_deref(),
            content_type: message.content_type.as_deref(),
            body: &message.body,
        }
    }
}

/// Writes the responses one per line, the body as is or the message in JSON.
pub struct Output {
    writer: Box<dyn Write + Send>,
    json: bool,
}

impl Output {
    pub fn new(writer: Box<dyn Write + Send>, json: bool) -> Self {
        Output { writer, json }
    }

    pub fn write(&mut self, message: &Message) -> Result<()> {
        if self.json {
            serde_json::to_writer(&mut self.writer, &MessageData::from(message))?;
        } else {
            self.writer.write_all(message.body.as_bytes())?;
        }

        self.writer.write_all(b"\n")?;

        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        Ok(self.writer.flush()?)
    }
}
