//! Request/Response Routing Tests
//!
//! A client model calls a server model through a client request driver and
//! a server request driver. These tests check that every reply reaches the
//! caller that asked for it, over each client-facing transport.

use comm::BackendOptions;
use core_types::RequestId;
use ipc::Message;
use std::thread;
use tests_routing::{
    answer_one, broker_options, start_client, start_local_broker, start_server, WAIT,
};

#[test]
fn test_single_request_reply() {
    let server = start_server("echo", BackendOptions::Buffer);
    let client = start_client("echo", server.driver.request_address(), BackendOptions::Buffer);

    // Server model answers exactly one request
    let responder = thread::spawn(move || {
        assert!(answer_one(&server, "-ack"));
        server
    });

    let (ok, reply) = client
        .rpc
        .call(Message::new("hello").with_id("r1"), Some(WAIT))
        .unwrap();
    assert!(ok);
    assert_eq!(reply.body, b"hello-ack");
    assert_eq!(reply.header.id, Some(RequestId::from_string("r1")));

    let server = responder.join().unwrap();
    client.driver.terminate();
    server.driver.terminate();
}

#[test]
fn test_concurrent_clients_get_their_own_replies() {
    let server = start_server("shared", BackendOptions::Buffer);
    let address = server.driver.request_address().clone();
    let first = start_client("shared_a", &address, BackendOptions::Buffer);
    let second = start_client("shared_b", &address, BackendOptions::Buffer);

    let responder = thread::spawn(move || {
        for _ in 0..4 {
            assert!(answer_one(&server, "-done"));
        }
        server
    });

    let callers: Vec<_> = [(first, "alpha"), (second, "beta")]
        .into_iter()
        .map(|(client, tag)| {
            thread::spawn(move || {
                for round in 0..2 {
                    let body = format!("{}-{}", tag, round);
                    let (ok, reply) = client.rpc.call(Message::new(body.clone()), Some(WAIT)).unwrap();
                    assert!(ok);
                    assert_eq!(reply.body, format!("{}-done", body).into_bytes());
                }
                client
            })
        })
        .collect();

    for caller in callers {
        let client = caller.join().unwrap();
        client.driver.terminate();
    }
    let server = responder.join().unwrap();
    server.driver.terminate();
}

#[test]
fn test_large_request_and_reply_are_chunked() {
    let server = start_server("bulk", BackendOptions::Buffer);
    let client = start_client("bulk", server.driver.request_address(), BackendOptions::Buffer);
    let payload = vec![b'x'; 10_000];

    let responder = thread::spawn(move || {
        assert!(answer_one(&server, "!"));
        server
    });

    let (ok, reply) = client.rpc.call(Message::new(payload.clone()), Some(WAIT)).unwrap();
    assert!(ok);
    assert_eq!(reply.body.len(), payload.len() + 1);
    assert!(reply.header.size.is_none());

    let server = responder.join().unwrap();
    client.driver.terminate();
    server.driver.terminate();
}

#[test]
fn test_request_reply_over_broker() {
    let broker = start_local_broker("rpc-sync");
    let options = BackendOptions::Broker(broker_options(&broker));
    let server = start_server("brokered", options.clone());
    let client = start_client("brokered", server.driver.request_address(), options);

    let responder = thread::spawn(move || {
        assert!(answer_one(&server, "-via-broker"));
        server
    });

    let (ok, reply) = client
        .rpc
        .call(Message::new("ping").with_id("b1"), Some(WAIT))
        .unwrap();
    assert!(ok);
    assert_eq!(reply.body, b"ping-via-broker");
    assert_eq!(reply.header.id, Some(RequestId::from_string("b1")));

    let server = responder.join().unwrap();
    client.driver.terminate();
    server.driver.terminate();
    broker.stop();
}

#[test]
fn test_request_reply_over_async_broker() {
    let broker = start_local_broker("rpc-async");
    let options = BackendOptions::AsyncBroker(broker_options(&broker));
    let server = start_server("async_brokered", options.clone());
    let client = start_client("async_brokered", server.driver.request_address(), options);

    let responder = thread::spawn(move || {
        assert!(answer_one(&server, "-async"));
        server
    });

    let (ok, reply) = client.rpc.call(Message::new("ping"), Some(WAIT)).unwrap();
    assert!(ok);
    assert_eq!(reply.body, b"ping-async");

    let server = responder.join().unwrap();
    client.driver.terminate();
    server.driver.terminate();
    broker.stop();
}
