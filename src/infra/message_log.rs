//! Persisted message log: every bus message as one JSON line.
//!
//! A record looks like
//! `{"logged_at_ms":1700000000000,"message":{"kind":"job_issued","body":{..}}}`.
//! A crash mid-write leaves at most one unterminated record at the end of the
//! log; readers discard it.

use std::io::{BufRead, Write};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::bus::{MessageBus, Subscription};
use crate::core::error::MessageLogError;
use crate::core::inbox::MessageInbox;
use crate::core::message::{Message, MessageKind};
use crate::util::clock::now_ms;

/// One line of the message log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggedMessage {
    /// When the message was written.
    pub logged_at_ms: u128,
    /// The message itself.
    pub message: Message,
}

/// Append one message to `writer` as a terminated JSON line.
///
/// # Errors
///
/// Encoding or write failures.
pub fn write_message<W: Write + ?Sized>(
    writer: &mut W,
    message: &Message,
) -> Result<(), MessageLogError> {
    let record = LoggedMessage {
        logged_at_ms: now_ms(),
        message: message.clone(),
    };
    let mut line = serde_json::to_vec(&record).map_err(MessageLogError::Encode)?;
    line.push(b'\n');
    writer.write_all(&line)?;
    Ok(())
}

/// Records every message published on a bus to a writer.
///
/// Logging stops when the writer handle is dropped.
pub struct MessageLogWriter<W: Write + Send + 'static> {
    writer: Arc<Mutex<W>>,
    subscriptions: Vec<Subscription>,
}

impl<W: Write + Send + 'static> MessageLogWriter<W> {
    /// Start logging every kind of message published on `bus` to `writer`.
    pub fn attach(bus: &MessageBus, writer: W) -> Self {
        let writer = Arc::new(Mutex::new(writer));
        let subscriptions = MessageKind::ALL
            .iter()
            .map(|&kind| {
                let sink = Arc::clone(&writer);
                bus.subscribe_kind(kind, move |message| {
                    if let Err(e) = write_message(&mut *sink.lock(), message) {
                        warn!(kind = %kind, error = %e, "failed to log message");
                    }
                })
            })
            .collect();
        debug!("message log attached");
        Self {
            writer,
            subscriptions,
        }
    }

    /// Flush buffered records to the underlying writer.
    ///
    /// # Errors
    ///
    /// The writer's flush error.
    pub fn flush(&self) -> Result<(), MessageLogError> {
        self.writer.lock().flush()?;
        Ok(())
    }

    /// Stop logging and hand back the writer, flushed.
    ///
    /// # Errors
    ///
    /// The writer's flush error.
    pub fn into_inner(mut self) -> Result<W, MessageLogError> {
        self.subscriptions.clear();
        // Fails only while a listener is mid-write on another thread.
        let mut writer = Arc::try_unwrap(self.writer)
            .map_err(|_| std::io::Error::other("message log writer still in use"))?
            .into_inner();
        writer.flush()?;
        Ok(writer)
    }
}

impl<W: Write + Send + 'static> std::fmt::Debug for MessageLogWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLogWriter")
            .field("subscriptions", &self.subscriptions.len())
            .finish_non_exhaustive()
    }
}

/// Load every complete record of the given kinds from a message log into a
/// disconnected inbox, in log order.
///
/// An unterminated final record is discarded. Records of other kinds are
/// skipped.
///
/// # Errors
///
/// Read failures, or [`MessageLogError::Decode`] for a corrupt complete record.
pub fn decode_bus_messages<R: BufRead>(
    mut stream: R,
    kinds: &[MessageKind],
) -> Result<MessageInbox, MessageLogError> {
    let inbox = MessageInbox::with_kinds(kinds);
    let mut buf = Vec::new();
    let mut line = 0;
    let mut loaded = 0_usize;

    loop {
        buf.clear();
        if stream.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line += 1;
        if buf.last() != Some(&b'\n') {
            debug!(line, bytes = buf.len(), "discarding partial trailing record");
            break;
        }
        if buf.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let record: LoggedMessage = serde_json::from_slice(&buf)
            .map_err(|source| MessageLogError::Decode { line, source })?;
        if inbox.is_subscribed(record.message.kind()) {
            inbox.deliver(record.message);
            loaded += 1;
        }
    }

    debug!(records = line, loaded, "decoded message log");
    Ok(inbox)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::{JobIssued, QueueSize};
    use std::io::Cursor;

    #[test]
    fn test_partial_trailing_record_is_discarded() {
        let mut log = Vec::new();
        write_message(&mut log, &QueueSize { queue_size: 4 }.into()).unwrap();
        log.extend_from_slice(br#"{"logged_at_ms":1,"message":{"kind":"queue_si"#);

        let inbox = decode_bus_messages(Cursor::new(log), &[MessageKind::QueueSize]).unwrap();
        let sizes: Vec<u64> = inbox
            .for_each::<QueueSize>()
            .unwrap()
            .map(|m| m.queue_size)
            .collect();
        assert_eq!(sizes, vec![4]);
    }

    #[test]
    fn test_corrupt_complete_record_is_an_error() {
        let log = b"{\"logged_at_ms\":1}\n".to_vec();
        let err = decode_bus_messages(Cursor::new(log), &[MessageKind::QueueSize]).unwrap_err();
        assert!(matches!(err, MessageLogError::Decode { line: 1, .. }));
    }

    #[test]
    fn test_unwanted_kinds_skipped() {
        let mut log = Vec::new();
        write_message(&mut log, &QueueSize { queue_size: 1 }.into()).unwrap();
        write_message(
            &mut log,
            &JobIssued {
                job_type: "t".into(),
                job_id: "a".into(),
            }
            .into(),
        )
        .unwrap();

        let inbox = decode_bus_messages(Cursor::new(log), &[MessageKind::JobIssued]).unwrap();
        assert_eq!(inbox.count(MessageKind::JobIssued), Ok(1));
        assert!(inbox.count(MessageKind::QueueSize).is_err());
    }
}
