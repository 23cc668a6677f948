//! Tests for mailbox implementations

use std::thread;
use std::time::Duration;

use prometheus_resource_broker::infra::{InMemoryMailbox, Mailbox};

#[test]
fn test_in_memory_mailbox_post_and_recv() {
    let mailbox = InMemoryMailbox::<u32>::new();
    let handle = mailbox.handle();

    handle.post(1).unwrap();
    handle.post(2).unwrap();
    assert_eq!(handle.len(), 2);
    assert_eq!(mailbox.len(), 2);

    assert_eq!(mailbox.try_recv(), Some(1));
    assert_eq!(mailbox.recv(), Some(2));
    assert!(mailbox.is_empty());
    assert_eq!(mailbox.try_recv(), None);
}

#[test]
fn test_recv_timeout_on_empty_mailbox() {
    let mailbox = InMemoryMailbox::<String>::new();
    let got = mailbox.recv_timeout(Duration::from_millis(10)).unwrap();
    assert!(got.is_none());
}

#[test]
fn test_posts_from_one_thread_keep_order() {
    let mailbox = InMemoryMailbox::<usize>::new();
    let handle = mailbox.handle();
    let poster = thread::spawn(move || {
        for i in 0..100 {
            handle.post(i).unwrap();
        }
    });
    poster.join().unwrap();

    let received: Vec<usize> = std::iter::from_fn(|| mailbox.try_recv()).collect();
    assert_eq!(received, (0..100).collect::<Vec<_>>());
}

#[test]
fn test_post_after_receiver_dropped_fails() {
    let mailbox = InMemoryMailbox::<u8>::new();
    let handle = mailbox.handle();
    drop(mailbox);
    assert!(handle.post(1).is_err());
}
