//! Message records exchanged between leader components.
//!
//! Every message is one case of the closed [`Message`] enum. The case's
//! [`MessageKind`] is the only routing key the bus uses; there is no secondary
//! filtering on field contents.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Produced when a job is issued to run on the batch system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobIssued {
    /// The kind of job issued, for statistics aggregation.
    pub job_type: String,
    /// The job store ID of the job.
    pub job_id: String,
}

/// Produced when a job is "updated" and ready to have something happen to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobUpdated {
    /// The job store ID of the job.
    pub job_id: String,
    /// Return code for the job; nonzero if something has gone wrong.
    pub result_status: i32,
}

/// Produced when a job is completed, whether successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobCompleted {
    /// The kind of job, for statistics aggregation.
    pub job_type: String,
    /// The job store ID of the job.
    pub job_id: String,
}

/// Produced when a job is completely failed and will not be retried again.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobFailed {
    /// The kind of job, for statistics aggregation.
    pub job_type: String,
    /// The job store ID of the job.
    pub job_id: String,
}

/// Produced when a job should be in the batch system but isn't.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobMissing {
    /// The job store ID of the job.
    pub job_id: String,
}

/// Size of the queue of jobs issued but not yet completed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueSize {
    /// Number of issued, unfinished jobs.
    pub queue_size: u64,
}

/// Number of instances of a certain type the autoscaler thinks exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterSize {
    /// Instance type name, like `t4g.medium`.
    pub instance_type: String,
    /// Current number of instances of that type.
    pub current_size: u64,
}

/// Number of instances of a certain type the autoscaler wants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterDesiredSize {
    /// Instance type name, like `t4g.medium`.
    pub instance_type: String,
    /// Desired number of instances of that type.
    pub desired_size: u64,
}

/// Routing tag of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// [`JobIssued`]
    JobIssued,
    /// [`JobUpdated`]
    JobUpdated,
    /// [`JobCompleted`]
    JobCompleted,
    /// [`JobFailed`]
    JobFailed,
    /// [`JobMissing`]
    JobMissing,
    /// [`QueueSize`]
    QueueSize,
    /// [`ClusterSize`]
    ClusterSize,
    /// [`ClusterDesiredSize`]
    ClusterDesiredSize,
}

impl MessageKind {
    /// Every message kind, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::JobIssued,
        Self::JobUpdated,
        Self::JobCompleted,
        Self::JobFailed,
        Self::JobMissing,
        Self::QueueSize,
        Self::ClusterSize,
        Self::ClusterDesiredSize,
    ];

    /// Stable identifier, matching the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::JobIssued => "job_issued",
            Self::JobUpdated => "job_updated",
            Self::JobCompleted => "job_completed",
            Self::JobFailed => "job_failed",
            Self::JobMissing => "job_missing",
            Self::QueueSize => "queue_size",
            Self::ClusterSize => "cluster_size",
            Self::ClusterDesiredSize => "cluster_desired_size",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A message on the leader bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Message {
    /// A job was issued.
    JobIssued(JobIssued),
    /// A job was updated.
    JobUpdated(JobUpdated),
    /// A job completed.
    JobCompleted(JobCompleted),
    /// A job failed for good.
    JobFailed(JobFailed),
    /// A job went missing.
    JobMissing(JobMissing),
    /// Issued-queue size report.
    QueueSize(QueueSize),
    /// Cluster size report.
    ClusterSize(ClusterSize),
    /// Desired cluster size report.
    ClusterDesiredSize(ClusterDesiredSize),
}

impl Message {
    /// The routing tag of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::JobIssued(_) => MessageKind::JobIssued,
            Self::JobUpdated(_) => MessageKind::JobUpdated,
            Self::JobCompleted(_) => MessageKind::JobCompleted,
            Self::JobFailed(_) => MessageKind::JobFailed,
            Self::JobMissing(_) => MessageKind::JobMissing,
            Self::QueueSize(_) => MessageKind::QueueSize,
            Self::ClusterSize(_) => MessageKind::ClusterSize,
            Self::ClusterDesiredSize(_) => MessageKind::ClusterDesiredSize,
        }
    }
}

/// A record type that is one case of [`Message`].
///
/// Lets subscribers and inboxes work with the concrete record instead of
/// matching on the enum themselves.
pub trait BusMessage: Clone + Into<Message> + Send + Sync + 'static {
    /// The case this record type belongs to.
    const KIND: MessageKind;

    /// Extract the record if `message` is of this case.
    fn from_message(message: Message) -> Option<Self>;
}

macro_rules! bus_message {
    ($($record:ident),+ $(,)?) => {
        $(
            impl From<$record> for Message {
                fn from(record: $record) -> Self {
                    Self::$record(record)
                }
            }

            impl BusMessage for $record {
                const KIND: MessageKind = MessageKind::$record;

                fn from_message(message: Message) -> Option<Self> {
                    match message {
                        Message::$record(record) => Some(record),
                        _ => None,
                    }
                }
            }
        )+
    };
}

bus_message!(
    JobIssued,
    JobUpdated,
    JobCompleted,
    JobFailed,
    JobMissing,
    QueueSize,
    ClusterSize,
    ClusterDesiredSize,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_record_kind() {
        let msg: Message = JobFailed {
            job_type: "sort".into(),
            job_id: "j2".into(),
        }
        .into();
        assert_eq!(msg.kind(), MessageKind::JobFailed);
        assert_eq!(msg.kind(), <JobFailed as BusMessage>::KIND);
    }

    #[test]
    fn test_from_message_rejects_other_cases() {
        let msg: Message = QueueSize { queue_size: 3 }.into();
        assert!(JobIssued::from_message(msg.clone()).is_none());
        assert_eq!(QueueSize::from_message(msg), Some(QueueSize { queue_size: 3 }));
    }

    #[test]
    fn test_serialized_kind_tag_matches_as_str() {
        for kind in MessageKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }

        let msg: Message = ClusterSize {
            instance_type: "t4g.medium".into(),
            current_size: 4,
        }
        .into();
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["kind"], "cluster_size");
        assert_eq!(value["body"]["current_size"], 4);
    }
}
