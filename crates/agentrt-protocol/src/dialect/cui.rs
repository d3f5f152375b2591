//! CUI dialect: identity pass-through. All message types, including
//! `event` and `action`, reach the client verbatim.

use super::{Dialect, Frame};
use crate::message::{Message, MessageType};

#[derive(Debug, Default, Clone, Copy)]
pub struct CuiDialect;

impl Dialect for CuiDialect {
    fn adapt(&self, msg: &Message) -> Vec<Frame> {
        vec![Frame::Json(
            serde_json::to_value(msg).expect("Message always serializes"),
        )]
    }

    fn supports_type(&self, _msg_type: MessageType) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use serde_json::Map;

    #[test]
    fn passes_every_type_through_unchanged() {
        let dialect = CuiDialect;
        let msg = Message::new(MessageType::Event, Map::new()).with_chunk_id("C1");
        let frames = dialect.adapt(&msg);
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Frame::Json(v) => assert_eq!(v["type"], "event"),
            Frame::Done => panic!("unexpected Done frame"),
        }
    }
}
