//! Danube messages as staged text records.

use broker_load_core::{ConnectorError, ConnectorResult};
use danube_core::message::StreamMessage;
use std::borrow::Cow;

/// A consumed message waiting to be staged
#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub message: StreamMessage,
}

impl SinkRecord {
    pub fn from_stream_message(message: StreamMessage) -> Self {
        Self { message }
    }

    pub fn payload(&self) -> &[u8] {
        &self.message.payload
    }

    /// Get the payload as a UTF-8 string (if valid)
    pub fn payload_str(&self) -> ConnectorResult<&str> {
        std::str::from_utf8(self.payload()).map_err(|e| {
            ConnectorError::invalid_data(
                format!("Payload of {} is not valid UTF-8: {}", self.message_id(), e),
                self.message.payload.clone(),
            )
        })
    }

    /// Payload as one staged line, terminated by `delimiter` unless it already is
    pub fn to_line<'a>(&'a self, delimiter: &str) -> ConnectorResult<Cow<'a, str>> {
        let text = self.payload_str()?;
        if delimiter.is_empty() || text.ends_with(delimiter) {
            Ok(Cow::Borrowed(text))
        } else {
            Ok(Cow::Owned(format!("{}{}", text, delimiter)))
        }
    }

    pub fn topic(&self) -> &str {
        &self.message.msg_id.topic_name
    }

    pub fn offset(&self) -> u64 {
        self.message.msg_id.topic_offset
    }

    /// Get a formatted message ID string for logging
    pub fn message_id(&self) -> String {
        format!(
            "topic:{}/producer:{}/offset:{}",
            self.message.msg_id.topic_name,
            self.message.msg_id.producer_id,
            self.message.msg_id.topic_offset
        )
    }
}
