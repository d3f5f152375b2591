//! A mapping from message type to conversion function plus a fallback.
//! Registration is dynamic so callers can override individual types.

use super::Frame;
use crate::message::{Message, MessageType};
use std::collections::HashMap;
use std::sync::Arc;

pub type Converter = Arc<dyn Fn(&Message) -> Vec<Frame> + Send + Sync>;

/// Dynamic, overridable mapping from [`MessageType`] to conversion closure.
#[derive(Clone)]
pub struct DialectRegistry {
    converters: HashMap<MessageType, Converter>,
    fallback: Converter,
}

impl DialectRegistry {
    pub fn new(fallback: Converter) -> Self {
        Self {
            converters: HashMap::new(),
            fallback,
        }
    }

    /// Register (or override) the converter for one message type.
    pub fn register(&mut self, msg_type: MessageType, converter: Converter) {
        self.converters.insert(msg_type, converter);
    }

    pub fn convert(&self, msg: &Message) -> Vec<Frame> {
        match self.converters.get(&msg.msg_type) {
            Some(f) => f(msg),
            None => (self.fallback)(msg),
        }
    }

    pub fn has_override(&self, msg_type: MessageType) -> bool {
        self.converters.contains_key(&msg_type)
    }
}
