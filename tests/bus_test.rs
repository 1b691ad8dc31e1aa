//! Integration tests for the message bus, inboxes and connections.

use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use rand::Rng;
use workflow_leader::core::{
    BusError, ClusterDesiredSize, ClusterSize, JobCompleted, JobFailed, JobIssued, JobMissing,
    JobUpdated, Message, MessageBus, MessageKind, QueueSize,
};

fn completed(id: &str) -> JobCompleted {
    JobCompleted {
        job_type: "sort".into(),
        job_id: id.into(),
    }
}

fn failed(id: &str) -> JobFailed {
    JobFailed {
        job_type: "sort".into(),
        job_id: id.into(),
    }
}

#[test]
fn test_completed_and_failed_routed_separately() {
    let bus = MessageBus::new();
    let conn = bus.connect(&[MessageKind::JobCompleted, MessageKind::JobFailed]);

    bus.publish(completed("j1"));
    bus.publish(failed("j2"));

    assert_eq!(conn.count(MessageKind::JobCompleted), Ok(1));
    assert_eq!(conn.count(MessageKind::JobFailed), Ok(1));

    let done: Vec<_> = conn
        .for_each::<JobCompleted>()
        .unwrap()
        .map(|m| m.job_id)
        .collect();
    let lost: Vec<_> = conn
        .for_each::<JobFailed>()
        .unwrap()
        .map(|m| m.job_id)
        .collect();
    assert_eq!(done, vec!["j1"]);
    assert_eq!(lost, vec!["j2"]);
    assert!(conn.empty());
}

#[test]
fn test_every_kind_round_trips_through_connection() {
    let bus = MessageBus::new();
    let conn = bus.connect(&MessageKind::ALL);
    let messages: Vec<Message> = vec![
        JobIssued {
            job_type: "t".into(),
            job_id: "a".into(),
        }
        .into(),
        JobUpdated {
            job_id: "a".into(),
            result_status: 1,
        }
        .into(),
        completed("a").into(),
        failed("a").into(),
        JobMissing { job_id: "a".into() }.into(),
        QueueSize { queue_size: 3 }.into(),
        ClusterSize {
            instance_type: "t4g.medium".into(),
            current_size: 2,
        }
        .into(),
        ClusterDesiredSize {
            instance_type: "t4g.medium".into(),
            desired_size: 5,
        }
        .into(),
    ];
    for message in &messages {
        conn.publish(message.clone()).unwrap();
    }
    for kind in MessageKind::ALL {
        assert_eq!(conn.count(kind), Ok(1), "one {kind} message");
    }
}

#[test]
fn test_per_kind_fifo_with_random_interleaving() {
    let bus = MessageBus::new();
    let inbox = bus.inbox(&[MessageKind::JobCompleted, MessageKind::QueueSize]);
    let mut rng = rand::rng();

    let mut expected_ids = Vec::new();
    let mut expected_sizes = Vec::new();
    for i in 0..200_u64 {
        if rng.random_bool(0.5) {
            let id = format!("j{i}");
            bus.publish(completed(&id));
            expected_ids.push(id);
        } else {
            bus.publish(QueueSize { queue_size: i });
            expected_sizes.push(i);
        }
    }

    let sizes: Vec<u64> = inbox
        .for_each::<QueueSize>()
        .unwrap()
        .map(|m| m.queue_size)
        .collect();
    let ids: Vec<String> = inbox
        .for_each::<JobCompleted>()
        .unwrap()
        .map(|m| m.job_id)
        .collect();
    assert_eq!(sizes, expected_sizes);
    assert_eq!(ids, expected_ids);
}

#[test]
fn test_retry_after_failure_yields_remainder_first() {
    let bus = MessageBus::new();
    let conn = bus.connect(&[MessageKind::JobCompleted]);
    let n = 10;
    let m = 4;
    for i in 0..n {
        bus.publish(completed(&format!("j{i}")));
    }

    let outcome: Result<usize, String> = conn.handle_each(|msg: JobCompleted| {
        if msg.job_id == format!("j{m}") {
            bus.publish(completed("newer"));
            return Err(format!("cannot handle {}", msg.job_id));
        }
        Ok(())
    });
    assert_eq!(outcome, Err("cannot handle j4".to_string()));

    let retried: Vec<String> = conn
        .for_each::<JobCompleted>()
        .unwrap()
        .map(|msg| msg.job_id)
        .collect();
    let mut expected: Vec<String> = (m..n).map(|i| format!("j{i}")).collect();
    expected.push("newer".into());
    assert_eq!(retried, expected);
}

#[test]
fn test_panicking_handler_requeues_message() {
    let bus = MessageBus::new();
    let conn = bus.connect(&[MessageKind::JobFailed]);
    bus.publish(failed("a"));
    bus.publish(failed("b"));

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        for msg in conn.for_each::<JobFailed>().unwrap() {
            assert_ne!(msg.job_id, "a", "handler gives up");
        }
    }));
    assert!(result.is_err());
    assert_eq!(conn.count(MessageKind::JobFailed), Ok(2));
}

#[test]
fn test_unsubscribed_kind_is_a_protocol_error() {
    let bus = MessageBus::new();
    let conn = bus.connect(&[MessageKind::JobCompleted]);
    let outcome: Result<usize, BusError> = conn.handle_each(|_: JobFailed| Ok(()));
    assert_eq!(
        outcome,
        Err(BusError::UnsubscribedType(MessageKind::JobFailed))
    );
}

#[test]
fn test_dropped_connection_stops_buffering() {
    let bus = MessageBus::new();
    let conn = bus.connect(&[MessageKind::JobCompleted]);
    assert_eq!(bus.listener_count(MessageKind::JobCompleted), 1);
    drop(conn);
    bus.publish(completed("after"));
    assert_eq!(bus.listener_count(MessageKind::JobCompleted), 0);
}

#[test]
fn test_concurrent_publishers_keep_per_thread_order() {
    let bus = MessageBus::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = bus.subscribe::<JobCompleted, _>(move |m| sink.lock().push(m.job_id));

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let bus = bus.clone();
            thread::spawn(move || {
                for i in 0..50 {
                    bus.publish(completed(&format!("{t}:{i}")));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let seen = seen.lock();
    assert_eq!(seen.len(), 200);
    for t in 0..4 {
        let order: Vec<usize> = seen
            .iter()
            .filter_map(|id| id.strip_prefix(&format!("{t}:")))
            .map(|i| i.parse().unwrap())
            .collect();
        assert_eq!(order, (0..50).collect::<Vec<_>>());
    }
}
