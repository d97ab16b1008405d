//! Tests for message types.

use super::*;

#[test]
fn test_message_builder() {
    let message = Message::new("test body".into())
        .with_metadata("someMeta")
        .with_tag("key", "value")
        .with_delay_seconds(3)
        .with_expiration_seconds(5);

    assert_eq!(message.body, Bytes::from("test body"));
    assert_eq!(message.metadata.as_deref(), Some("someMeta"));
    assert_eq!(message.tags.get("key"), Some(&"value".to_string()));
    assert_eq!(message.delay_seconds, Some(3));
    assert_eq!(message.expiration_seconds, Some(5));
    assert!(message.message_id.is_none());
    assert!(message.attributes.is_none());
}

#[test]
fn test_with_body_replaces_body() {
    let message = Message::default().with_body(Bytes::from_static(b"payload"));
    assert_eq!(message.body, Bytes::from_static(b"payload"));
}

#[test]
fn test_dead_letter_policy_requires_both_fields() {
    let count_only = Message::new("x".into()).with_max_receive_count(3);
    assert!(matches!(
        count_only.dead_letter_policy(),
        Err(ValidationError::DeadLetterPairing)
    ));

    let queue_only = Message::new("x".into()).with_dead_letter_queue("DeadLetterQueue");
    assert!(matches!(
        queue_only.dead_letter_policy(),
        Err(ValidationError::DeadLetterPairing)
    ));
}

#[test]
fn test_dead_letter_policy_resolves_when_paired() {
    let message = Message::new("x".into())
        .with_max_receive_count(3)
        .with_dead_letter_queue("DeadLetterQueue");

    let policy = message.dead_letter_policy().unwrap().unwrap();
    assert_eq!(policy.max_receive_count, 3);
    assert_eq!(policy.queue.as_str(), "DeadLetterQueue");

    assert!(Message::new("y".into())
        .dead_letter_policy()
        .unwrap()
        .is_none());
}

#[test]
fn test_dead_letter_policy_rejects_zero_count_and_bad_queue() {
    assert!(DeadLetterPolicy::new(0, "dlq").is_err());
    assert!(DeadLetterPolicy::new(1, "bad queue").is_err());

    let policy = DeadLetterPolicy::new(2, "dlq").unwrap();
    let message = Message::new("z".into()).with_dead_letter_policy(policy.clone());
    assert_eq!(message.dead_letter_policy().unwrap(), Some(policy));
}

#[test]
fn test_receive_count_defaults_to_zero() {
    let mut message = Message::new("x".into());
    assert_eq!(message.receive_count(), 0);

    message.attributes = Some(MessageAttributes {
        sent_at: Timestamp::now(),
        sequence: 1,
        receive_count: 2,
        rerouted: false,
        rerouted_from_queue: None,
        expiration_at: None,
        delayed_to: None,
    });
    assert_eq!(message.receive_count(), 2);
}

#[test]
fn test_client_id_validation() {
    assert!(ClientId::new("ClientID".to_string()).is_ok());
    assert!(ClientId::new("worker-1@host".to_string()).is_ok());

    assert!(ClientId::new(String::new()).is_err());
    assert!(ClientId::new("a".repeat(257)).is_err());
    assert!(ClientId::new("tab\tchar".to_string()).is_err());
}

#[test]
fn test_message_id_parsing() {
    assert!("".parse::<MessageId>().is_err());
    let id: MessageId = "abc-123".parse().unwrap();
    assert_eq!(id.as_str(), "abc-123");
}

#[test]
fn test_timestamp_unix_round_trip() {
    let ts = Timestamp::from_unix_seconds(1_600_000_000).unwrap();
    assert_eq!(ts.unix_seconds(), 1_600_000_000);
    assert_eq!(ts.plus_seconds(5).unix_seconds(), 1_600_000_005);
    assert_eq!(ts.to_string(), "2020-09-13 12:26:40 UTC");
}

#[test]
fn test_queue_name_rules() {
    for good in ["orders", "orders.dlq", "a_b-c.d", "Q1"] {
        assert!(QueueName::new(good.to_string()).is_ok(), "{} rejected", good);
    }

    for bad in ["", "has space", "-lead", "trail.", "double--dash", "dot..dot", "ünï"] {
        assert!(QueueName::new(bad.to_string()).is_err(), "{} accepted", bad);
    }

    assert!(QueueName::new("q".repeat(260)).is_ok());
    assert!(matches!(
        QueueName::new("q".repeat(261)),
        Err(ValidationError::OutOfRange { .. })
    ));
}

#[test]
fn test_queue_name_deserialization_validates() {
    let name: QueueName = serde_json::from_str("\"orders\"").unwrap();
    assert_eq!(name.as_str(), "orders");

    assert!(serde_json::from_str::<QueueName>("\"bad name\"").is_err());
}
