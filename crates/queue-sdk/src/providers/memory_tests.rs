//! Tests for the in-memory broker transport.

use super::*;
use std::time::Duration;

fn queue(name: &str) -> QueueName {
    QueueName::new(name.to_string()).unwrap()
}

fn client(id: &str) -> ClientId {
    ClientId::new(id.to_string()).unwrap()
}

fn send_request(queue_name: &str, body: &str) -> SendRequest {
    SendRequest {
        client_id: client("producer"),
        queue: queue(queue_name),
        body: Bytes::from(body.to_string()),
        metadata: None,
        tags: HashMap::new(),
        delay_seconds: 0,
        expiration_seconds: 0,
        dead_letter: None,
    }
}

fn receive_request(queue_name: &str, client_id: &str, wait: u32) -> ReceiveRequest {
    ReceiveRequest {
        request_id: "req-1".to_string(),
        client_id: client(client_id),
        queue: queue(queue_name),
        max_messages: 10,
        wait_timeout_seconds: wait,
        is_peek: false,
        visibility_timeout_seconds: 30,
    }
}

fn peek_request(queue_name: &str) -> ReceiveRequest {
    ReceiveRequest {
        is_peek: true,
        ..receive_request(queue_name, "peeker", 0)
    }
}

fn bodies(batch: &ReceivedBatch) -> Vec<String> {
    batch
        .messages
        .iter()
        .map(|m| String::from_utf8(m.body.to_vec()).unwrap())
        .collect()
}

// ============================================================================
// Send and Receive
// ============================================================================

mod send_and_receive {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_receive_returns_messages_in_send_order() {
        let transport = InMemoryTransport::default();
        transport.send_message(&send_request("work", "one")).await.unwrap();
        transport.send_message(&send_request("work", "two")).await.unwrap();

        let batch = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();

        assert_eq!(bodies(&batch), vec!["one", "two"]);
        let attributes = batch.messages[0].attributes.as_ref().unwrap();
        assert_eq!(attributes.sequence, 1);
        assert_eq!(attributes.receive_count, 1);
        assert!(!attributes.rerouted);
        assert!(batch.messages[0].message_id.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_respects_max_messages() {
        let transport = InMemoryTransport::default();
        for body in ["a", "b", "c"] {
            transport.send_message(&send_request("work", body)).await.unwrap();
        }

        let mut request = receive_request("work", "worker", 0);
        request.max_messages = 2;
        let batch = transport.receive_messages(&request).await.unwrap();

        assert_eq!(bodies(&batch), vec!["a", "b"]);
        assert_eq!(transport.queue_depth(&queue("work")), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_on_empty_queue_waits_for_timeout() {
        let transport = InMemoryTransport::default();
        let start = Instant::now();

        let batch = transport
            .receive_messages(&receive_request("work", "worker", 5))
            .await
            .unwrap();

        assert!(batch.messages.is_empty());
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_wakes_when_message_arrives() {
        let transport = InMemoryTransport::default();
        let receiver = transport.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            receiver
                .receive_messages(&receive_request("work", "worker", 10))
                .await
        });
        tokio::task::yield_now().await;

        transport.send_message(&send_request("work", "late")).await.unwrap();

        let batch = handle.await.unwrap().unwrap();
        assert_eq!(bodies(&batch), vec!["late"]);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_binary_body_is_preserved() {
        let transport = InMemoryTransport::default();
        let mut request = send_request("work", "");
        request.body = Bytes::from_static(&[0, 159, 146, 150, 255]);
        request.metadata = Some("meta".to_string());
        request.tags.insert("k".to_string(), "v".to_string());
        transport.send_message(&request).await.unwrap();

        let batch = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();

        let message = &batch.messages[0];
        assert_eq!(message.body.as_ref(), &[0, 159, 146, 150, 255]);
        assert_eq!(message.metadata.as_deref(), Some("meta"));
        assert_eq!(message.tags.get("k").map(String::as_str), Some("v"));
    }
}

// ============================================================================
// Peek
// ============================================================================

mod peek {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_peek_does_not_consume_or_count() {
        let transport = InMemoryTransport::default();
        transport.send_message(&send_request("work", "one")).await.unwrap();

        let peeked = transport.receive_messages(&peek_request("work")).await.unwrap();
        assert_eq!(bodies(&peeked), vec!["one"]);
        assert_eq!(peeked.messages[0].receive_count(), 0);

        let received = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();
        assert_eq!(bodies(&received), vec!["one"]);
        assert_eq!(received.messages[0].receive_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peek_skips_in_flight_messages() {
        let transport = InMemoryTransport::default();
        transport.send_message(&send_request("work", "one")).await.unwrap();
        transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();

        let peeked = transport.receive_messages(&peek_request("work")).await.unwrap();
        assert!(peeked.messages.is_empty());
    }
}

// ============================================================================
// Delay and Expiration
// ============================================================================

mod scheduling {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_delayed_message_hidden_until_delay_elapses() {
        let transport = InMemoryTransport::default();
        let mut request = send_request("work", "later");
        request.delay_seconds = 3;
        let sent = transport.send_message(&request).await.unwrap();
        assert!(sent.delayed_to.is_some());

        let early = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();
        assert!(early.messages.is_empty());

        tokio::time::advance(Duration::from_secs(3)).await;

        let on_time = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();
        assert_eq!(bodies(&on_time), vec!["later"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reported_times_follow_broker_clock() {
        let transport = InMemoryTransport::default();
        let first = transport.send_message(&send_request("work", "one")).await.unwrap();

        tokio::time::advance(Duration::from_secs(100)).await;
        let mut request = send_request("work", "two");
        request.delay_seconds = 5;
        let second = transport.send_message(&request).await.unwrap();

        assert_eq!(second.sent_at.unix_seconds() - first.sent_at.unix_seconds(), 100);
        let delayed_to = second.delayed_to.unwrap();
        assert_eq!(delayed_to.unix_seconds() - second.sent_at.unix_seconds(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_poll_returns_delayed_message_once_due() {
        let transport = InMemoryTransport::default();
        let mut request = send_request("work", "later");
        request.delay_seconds = 2;
        transport.send_message(&request).await.unwrap();
        let start = Instant::now();

        let batch = transport
            .receive_messages(&receive_request("work", "worker", 10))
            .await
            .unwrap();

        assert_eq!(bodies(&batch), vec!["later"]);
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_message_is_discarded_and_counted() {
        let transport = InMemoryTransport::default();
        let mut request = send_request("work", "stale");
        request.expiration_seconds = 2;
        let sent = transport.send_message(&request).await.unwrap();
        assert!(sent.expiration_at.is_some());

        tokio::time::advance(Duration::from_secs(3)).await;

        let batch = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();
        assert!(batch.messages.is_empty());
        assert_eq!(batch.messages_expired, 1);
        assert_eq!(transport.queue_depth(&queue("work")), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiration_ignored_once_received() {
        let transport = InMemoryTransport::default();
        let mut request = send_request("work", "slow");
        request.expiration_seconds = 2;
        transport.send_message(&request).await.unwrap();

        let mut receive = receive_request("work", "worker", 0);
        receive.visibility_timeout_seconds = 1;
        transport.receive_messages(&receive).await.unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;

        let batch = transport.receive_messages(&receive).await.unwrap();
        assert_eq!(bodies(&batch), vec!["slow"]);
        assert_eq!(batch.messages[0].receive_count(), 2);
        assert_eq!(batch.messages_expired, 0);
    }
}

// ============================================================================
// Visibility and Dead-Letter Routing
// ============================================================================

mod visibility {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_unacknowledged_message_redelivered_after_visibility_timeout() {
        let transport = InMemoryTransport::default();
        transport.send_message(&send_request("work", "one")).await.unwrap();
        transport.send_message(&send_request("work", "two")).await.unwrap();

        let mut receive = receive_request("work", "worker", 0);
        receive.max_messages = 1;
        receive.visibility_timeout_seconds = 5;
        let first = transport.receive_messages(&receive).await.unwrap();
        assert_eq!(bodies(&first), vec!["one"]);

        tokio::time::advance(Duration::from_secs(5)).await;

        // Redelivered message keeps its place ahead of "two"
        let again = transport.receive_messages(&receive).await.unwrap();
        assert_eq!(bodies(&again), vec!["one"]);
        assert_eq!(again.messages[0].receive_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_dead_lettered_after_max_receives() {
        let transport = InMemoryTransport::default();
        let mut request = send_request("work", "poison");
        request.dead_letter = Some(DeadLetterPolicy::new(2, "work-dlq").unwrap());
        transport.send_message(&request).await.unwrap();

        let mut receive = receive_request("work", "worker", 0);
        receive.visibility_timeout_seconds = 1;
        for attempt in 1..=2 {
            let batch = transport.receive_messages(&receive).await.unwrap();
            assert_eq!(batch.messages[0].receive_count(), attempt);
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        let work = transport.receive_messages(&receive).await.unwrap();
        assert!(work.messages.is_empty());

        let dead = transport
            .receive_messages(&receive_request("work-dlq", "auditor", 0))
            .await
            .unwrap();
        assert_eq!(bodies(&dead), vec!["poison"]);
        let attributes = dead.messages[0].attributes.as_ref().unwrap();
        assert!(attributes.rerouted);
        assert_eq!(attributes.rerouted_from_queue, Some(queue("work")));
        assert_eq!(attributes.receive_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_dead_letter_queue_keeps_message_on_origin() {
        let transport = InMemoryTransport::new(InMemoryConfig {
            max_queue_size: 1,
            ..InMemoryConfig::default()
        });
        transport.send_message(&send_request("dlq", "earlier")).await.unwrap();
        let mut request = send_request("work", "poison");
        request.dead_letter = Some(DeadLetterPolicy::new(1, "dlq").unwrap());
        transport.send_message(&request).await.unwrap();

        let mut receive = receive_request("work", "worker", 0);
        receive.visibility_timeout_seconds = 1;
        transport.receive_messages(&receive).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        let again = transport.receive_messages(&receive).await.unwrap();
        assert_eq!(bodies(&again), vec!["poison"]);
        let attributes = again.messages[0].attributes.as_ref().unwrap();
        assert_eq!(attributes.receive_count, 2);
        assert!(!attributes.rerouted);
        assert_eq!(transport.queue_depth(&queue("dlq")), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unregistered_dead_letter_queue_not_created() {
        let transport = InMemoryTransport::new(InMemoryConfig {
            auto_create_queues: false,
            ..InMemoryConfig::default()
        });
        transport.create_queue(&queue("work"));
        let mut request = send_request("work", "poison");
        request.dead_letter = Some(DeadLetterPolicy::new(1, "never-registered").unwrap());
        transport.send_message(&request).await.unwrap();

        let mut receive = receive_request("work", "worker", 0);
        receive.visibility_timeout_seconds = 1;
        transport.receive_messages(&receive).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        let again = transport.receive_messages(&receive).await.unwrap();
        assert_eq!(bodies(&again), vec!["poison"]);
        assert_eq!(transport.queue_depth(&queue("never-registered")), None);
        assert_eq!(transport.queue_depth(&queue("work")), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_requeues_immediately() {
        let transport = InMemoryTransport::default();
        transport.send_message(&send_request("work", "one")).await.unwrap();

        let batch = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();
        let message_id = batch.messages[0].message_id.clone().unwrap();

        transport
            .settle_message(&SettleRequest {
                client_id: client("worker"),
                queue: queue("work"),
                message_id,
                settlement: Settlement::Reject,
            })
            .await
            .unwrap();

        let again = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();
        assert_eq!(bodies(&again), vec!["one"]);
        assert_eq!(again.messages[0].receive_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_dead_letters_when_receives_exhausted() {
        let transport = InMemoryTransport::default();
        let mut request = send_request("work", "poison");
        request.dead_letter = Some(DeadLetterPolicy::new(1, "work-dlq").unwrap());
        transport.send_message(&request).await.unwrap();

        let batch = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();
        transport
            .settle_message(&SettleRequest {
                client_id: client("worker"),
                queue: queue("work"),
                message_id: batch.messages[0].message_id.clone().unwrap(),
                settlement: Settlement::Reject,
            })
            .await
            .unwrap();

        assert_eq!(transport.queue_depth(&queue("work")), Some(0));
        assert_eq!(transport.queue_depth(&queue("work-dlq")), Some(1));
    }
}

// ============================================================================
// Acknowledgement
// ============================================================================

mod acknowledgement {
    use super::*;

    fn ack_all(queue_name: &str, client_id: &str) -> AckAllRequest {
        AckAllRequest {
            request_id: "ack-1".to_string(),
            client_id: client(client_id),
            queue: queue(queue_name),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_all_with_nothing_outstanding_returns_zero() {
        let transport = InMemoryTransport::default();
        transport.send_message(&send_request("work", "one")).await.unwrap();

        let affected = transport.ack_all_messages(&ack_all("work", "worker")).await.unwrap();
        assert_eq!(affected, 0);
        assert_eq!(transport.queue_depth(&queue("work")), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_all_only_affects_calling_client() {
        let transport = InMemoryTransport::default();
        for body in ["a", "b", "c"] {
            transport.send_message(&send_request("work", body)).await.unwrap();
        }

        let mut first = receive_request("work", "worker-1", 0);
        first.max_messages = 2;
        transport.receive_messages(&first).await.unwrap();
        transport
            .receive_messages(&receive_request("work", "worker-2", 0))
            .await
            .unwrap();

        let affected = transport
            .ack_all_messages(&ack_all("work", "worker-1"))
            .await
            .unwrap();
        assert_eq!(affected, 2);
        assert_eq!(transport.queue_depth(&queue("work")), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_all_skips_messages_whose_visibility_expired() {
        let transport = InMemoryTransport::default();
        transport.send_message(&send_request("work", "one")).await.unwrap();

        let mut receive = receive_request("work", "worker", 0);
        receive.visibility_timeout_seconds = 1;
        transport.receive_messages(&receive).await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let affected = transport.ack_all_messages(&ack_all("work", "worker")).await.unwrap();
        assert_eq!(affected, 0);
        assert_eq!(transport.queue_depth(&queue("work")), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_message_removes_it() {
        let transport = InMemoryTransport::default();
        transport.send_message(&send_request("work", "one")).await.unwrap();
        let batch = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();

        transport
            .settle_message(&SettleRequest {
                client_id: client("worker"),
                queue: queue("work"),
                message_id: batch.messages[0].message_id.clone().unwrap(),
                settlement: Settlement::Ack,
            })
            .await
            .unwrap();

        assert_eq!(transport.queue_depth(&queue("work")), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_by_other_client_is_rejected() {
        let transport = InMemoryTransport::default();
        transport.send_message(&send_request("work", "one")).await.unwrap();
        let batch = transport
            .receive_messages(&receive_request("work", "worker", 0))
            .await
            .unwrap();

        let result = transport
            .settle_message(&SettleRequest {
                client_id: client("intruder"),
                queue: queue("work"),
                message_id: batch.messages[0].message_id.clone().unwrap(),
                settlement: Settlement::Ack,
            })
            .await;

        assert!(matches!(result, Err(QueueError::MessageNotFound { .. })));
        assert_eq!(transport.queue_depth(&queue("work")), Some(1));
    }
}

// ============================================================================
// Queue Management
// ============================================================================

mod queue_management {
    use super::*;

    #[tokio::test]
    async fn test_unknown_queue_rejected_without_auto_create() {
        let transport = InMemoryTransport::new(InMemoryConfig {
            auto_create_queues: false,
            ..InMemoryConfig::default()
        });

        let result = transport.send_message(&send_request("work", "one")).await;
        assert!(matches!(result, Err(QueueError::QueueNotFound { .. })));

        transport.create_queue(&queue("work"));
        assert!(transport.send_message(&send_request("work", "one")).await.is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_rejects_send() {
        let transport = InMemoryTransport::new(InMemoryConfig {
            max_queue_size: 1,
            ..InMemoryConfig::default()
        });

        transport.send_message(&send_request("work", "one")).await.unwrap();
        let result = transport.send_message(&send_request("work", "two")).await;

        match result {
            Err(QueueError::QueueFull { max_size, .. }) => assert_eq!(max_size, 1),
            other => panic!("Expected QueueFull, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_batch_reports_per_message_outcome() {
        let transport = InMemoryTransport::new(InMemoryConfig {
            max_queue_size: 2,
            ..InMemoryConfig::default()
        });
        let requests = vec![
            send_request("work", "a"),
            send_request("work", "b"),
            send_request("work", "c"),
        ];

        let results = transport.send_messages("batch-1", &requests).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(matches!(results[2], Err(QueueError::QueueFull { .. })));
    }

    #[test]
    fn test_transport_type() {
        let transport = InMemoryTransport::default();
        assert_eq!(transport.transport_type(), TransportType::InMemory);
        assert!(transport.supports_batching());
    }
}
