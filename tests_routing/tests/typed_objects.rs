//! Typed Object Tests
//!
//! Values sent with a datatype keep their exact types across a driver, and
//! the type registry checks instances against a schema.

use comm::{Comm, CommConfig};
use drivers::ConnectionDriver;
use ipc::Direction;
use metaschema::{Typedef, Value};
use serde_json::json;
use tests_routing::{quick_config, WAIT};

#[test]
fn test_object_survives_relay() {
    let producer = Comm::new(CommConfig::buffer("objects", Direction::Send)).unwrap();
    let consumer = Comm::new(CommConfig::buffer("objects_out", Direction::Recv)).unwrap();
    let relay = ConnectionDriver::builder(
        "objects",
        Comm::new(producer.opp_config()).unwrap(),
        Comm::new(consumer.opp_config()).unwrap(),
    )
    .with_config(quick_config())
    .build();
    relay.start().unwrap();

    let value = Value::object([
        ("count", Value::Uint(3)),
        ("ratio", Value::Float(0.5)),
        ("tags", Value::Array(vec![Value::from("a"), Value::from("b")])),
        ("raw", Value::Bytes(b"payload".to_vec())),
    ]);
    assert!(producer.send_object(&value).unwrap());

    let (ok, received) = consumer.recv_object(Some(WAIT)).unwrap();
    assert!(ok);
    assert_eq!(received, value);
    relay.terminate();
}

#[test]
fn test_declared_datatype_applied() {
    let sender = Comm::new(
        CommConfig::buffer("typed", Direction::Send)
            .with_datatype(json!({"type": "array", "items": [{"type": "int"}, {"type": "string"}]})),
    )
    .unwrap();
    let receiver = Comm::new(sender.opp_config()).unwrap();

    let value = Value::Array(vec![Value::Int(-4), Value::from("four")]);
    assert!(sender.send_object(&value).unwrap());
    let (ok, received) = receiver.recv_object(Some(WAIT)).unwrap();
    assert!(ok);
    assert_eq!(received, value);

    assert!(sender.send_object(&Value::Int(1)).is_err());
}

#[test]
fn test_bare_container_datatype_keeps_element_types() {
    let sender = Comm::new(
        CommConfig::buffer("loose", Direction::Send).with_datatype(json!({"type": "array"})),
    )
    .unwrap();
    let receiver = Comm::new(sender.opp_config()).unwrap();

    let value = Value::Array(vec![Value::Bytes(b"ab".to_vec()), Value::Uint(3)]);
    assert!(sender.send_object(&value).unwrap());
    let (ok, received) = receiver.recv_object(Some(WAIT)).unwrap();
    assert!(ok);
    assert_eq!(received, value);
}

#[test]
fn test_schema_validation_reports_every_problem() {
    let schema = Typedef::from_json(&json!({
        "type": "object",
        "properties": {
            "name": {"type": "string", "length": 3},
            "tags": {"type": "array", "items": [{"type": "string"}, {"type": "string"}]}
        }
    }))
    .unwrap();

    let good = Value::object([
        ("name", Value::from("bob")),
        ("tags", Value::Array(vec![Value::from("x")])),
    ]);
    assert!(metaschema::validate_instance(&good, &schema).is_ok());

    let bad = Value::object([
        ("name", Value::from("robert")),
        ("tags", Value::Array(vec![Value::Int(1), Value::from("y")])),
    ]);
    let errors = metaschema::validate_instance(&bad, &schema).unwrap_err();
    assert_eq!(errors.len(), 2);
}
