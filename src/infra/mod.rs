//! Infrastructure adapters: persisted message log.

pub mod message_log;

pub use message_log::{decode_bus_messages, write_message, LoggedMessage, MessageLogWriter};
