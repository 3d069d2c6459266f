//! EOF Semantics Tests
//!
//! Every comm kind must behave the same at end of stream: messages sent
//! before EOF arrive in order, EOF closes both ends, and a closed receiver
//! reports EOF rather than a failure.

use comm::{BackendOptions, Comm, CommConfig, CommKind, FileOptions};
use ipc::{Direction, Message};
use tests_routing::{broker_options, start_local_broker, WAIT};

fn check_eof_closes_both_ends(sender: Comm, receiver: Comm) {
    assert!(sender.send(&Message::new("first")));
    assert!(sender.send(&Message::new("second")));
    assert!(!sender.send_eof());
    assert!(sender.is_closed());
    assert!(!sender.send(&Message::new("late")));

    let (ok, message) = receiver.recv(Some(WAIT));
    assert!(ok);
    assert_eq!(message.body, b"first");
    let (ok, message) = receiver.recv(Some(WAIT));
    assert!(ok);
    assert_eq!(message.body, b"second");

    let (ok, eof) = receiver.recv(Some(WAIT));
    assert!(!ok);
    assert!(eof.is_eof());
    assert!(receiver.is_closed());
    assert_eq!(receiver.n_recv(), 2);
}

fn pair(config: CommConfig) -> (Comm, Comm) {
    let sender = Comm::new(config).unwrap();
    let receiver = Comm::new(sender.opp_config()).unwrap();
    (sender, receiver)
}

#[test]
fn test_buffer_eof() {
    let (sender, receiver) = pair(CommConfig::buffer("buffer_eof", Direction::Send));
    check_eof_closes_both_ends(sender, receiver);
}

#[test]
fn test_file_eof() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("eof.txt");
    let options = BackendOptions::File(FileOptions {
        path: Some(path),
        ..FileOptions::default()
    });
    let sender =
        Comm::new(CommConfig::new("file_eof", CommKind::File, Direction::Send).with_options(options))
            .unwrap();

    // A file receiver reads what is on disk, so open it after the writes
    let receiver_config = sender.opp_config();
    assert!(sender.send(&Message::new("first")));
    assert!(sender.send(&Message::new("second")));
    assert!(!sender.send_eof());
    let receiver = Comm::new(receiver_config).unwrap();

    assert_eq!(receiver.recv(Some(WAIT)).1.body, b"first");
    assert_eq!(receiver.recv(Some(WAIT)).1.body, b"second");
    let (ok, eof) = receiver.recv(Some(WAIT));
    assert!(!ok && eof.is_eof());
    assert!(receiver.is_closed());
}

#[test]
fn test_broker_eof() {
    let broker = start_local_broker("eof-sync");
    let options = BackendOptions::Broker(broker_options(&broker));
    let (sender, receiver) = pair(
        CommConfig::new("broker_eof", CommKind::Broker, Direction::Send).with_options(options),
    );
    check_eof_closes_both_ends(sender, receiver);
    broker.stop();
}

#[test]
fn test_async_broker_eof() {
    let broker = start_local_broker("eof-async");
    let options = BackendOptions::AsyncBroker(broker_options(&broker));
    let (sender, receiver) = pair(
        CommConfig::new("async_eof", CommKind::AsyncBroker, Direction::Send).with_options(options),
    );
    check_eof_closes_both_ends(sender, receiver);
    broker.stop();
}

#[test]
fn test_chunked_message_then_eof() {
    let (sender, receiver) =
        pair(CommConfig::buffer("chunked_eof", Direction::Send).with_max_msg_size(64));
    let body: Vec<u8> = (0..1_000u32).map(|i| (i % 251) as u8).collect();

    assert!(sender.send_nolimit(&Message::new(body.clone())));
    assert!(!sender.send_eof());

    let (ok, message) = receiver.recv_nolimit(Some(WAIT));
    assert!(ok);
    assert_eq!(message.body, body);
    let (ok, eof) = receiver.recv_nolimit(Some(WAIT));
    assert!(!ok && eof.is_eof());
    assert!(receiver.is_closed());
}

#[test]
fn test_timeout_is_not_eof() {
    let (_sender, receiver) = pair(CommConfig::buffer("quiet_eof", Direction::Send));
    let (ok, message) = receiver.recv(Some(std::time::Duration::from_millis(50)));
    assert!(!ok);
    assert!(!message.is_eof());
    assert!(receiver.is_open());
}
