// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! End-to-end exercises of the fabric clients and proxies over IPC.

use aiperf_config::{ServiceConfig, TransportConfig};
use aiperf_fabric::{Fabric, SubClientBuilder};
use aiperf_messages::{
    ConversationRequestMessage, ConversationResponseMessage, Conversation, CreditPhase,
    CreditReturnMessage, Message, MessageHeader,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn ipc_fabric(service_id: &str, run_dir: &std::path::Path) -> Fabric {
    let config = ServiceConfig {
        transport: TransportConfig::Ipc { run_dir: run_dir.to_path_buf() },
        ..ServiceConfig::default()
    };
    Fabric::new(service_id, config)
}

fn credit_return(service_id: &str, phase: CreditPhase) -> Message {
    Message::CreditReturn(CreditReturnMessage { header: MessageHeader::new(service_id), phase })
}

#[tokio::test]
async fn event_bus_delivers_topic_filtered_messages() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fabric = ipc_fabric("test", dir.path());
    let cancel = CancellationToken::new();

    let proxy = fabric.start_event_bus_proxy(cancel.clone()).await.expect("proxy");

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let builder = SubClientBuilder::new().subscribe(
        "credit_return",
        Box::new(move |message| {
            let seen_tx = seen_tx.clone();
            Box::pin(async move {
                let _ = seen_tx.send(message);
            })
        }),
    );
    let subscriber =
        fabric.event_bus_subscriber(builder, cancel.clone()).await.expect("subscriber");

    let publisher = fabric.event_bus_publisher(cancel.clone()).await.expect("publisher");
    // Let the proxy register the subscriber before the first publish;
    // delivery to not-yet-accepted subscribers is best-effort.
    tokio::time::sleep(Duration::from_millis(200)).await;
    // Matching topic.
    publisher.publish(&credit_return("w-1", CreditPhase::Profiling)).await.expect("publish");
    // Non-matching topic: filtered out by the subscriber.
    publisher
        .publish(&Message::CreditsComplete(aiperf_messages::CreditsCompleteMessage {
            header: MessageHeader::new("tm-1"),
        }))
        .await
        .expect("publish");
    publisher.publish(&credit_return("w-2", CreditPhase::Warmup)).await.expect("publish");

    let first = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("delivery")
        .expect("message");
    let second = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("delivery")
        .expect("message");
    match (&first, &second) {
        (Message::CreditReturn(a), Message::CreditReturn(b)) => {
            assert_eq!(a.header.service_id, "w-1");
            assert_eq!(b.header.service_id, "w-2");
        }
        other => panic!("expected two credit returns, got {other:?}"),
    }

    publisher.stop().await;
    subscriber.stop().await;
    proxy.stop().await;
}

#[tokio::test]
async fn push_pull_load_balances_across_consumers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fabric = ipc_fabric("test", dir.path());
    let cancel = CancellationToken::new();

    let producer = fabric.credit_drop_producer(cancel.clone()).await.expect("producer");
    let mut consumer_a = fabric.credit_drop_consumer(cancel.clone()).await.expect("consumer a");
    let mut consumer_b = fabric.credit_drop_consumer(cancel.clone()).await.expect("consumer b");

    // Give both consumers time to be accepted so round-robin sees them.
    tokio::time::sleep(Duration::from_millis(200)).await;

    for _ in 0..4 {
        producer.push(&credit_return("tm", CreditPhase::Profiling)).await.expect("push");
    }

    let mut received = 0usize;
    let deadline = Duration::from_secs(5);
    let a = consumer_a.recv_timeout(deadline).await.expect("a receives");
    let b = consumer_b.recv_timeout(deadline).await.expect("b receives");
    received += 2;
    assert!(matches!(a, Message::CreditReturn(_)));
    assert!(matches!(b, Message::CreditReturn(_)));
    // Drain the remaining two from either consumer.
    for consumer in [&mut consumer_a, &mut consumer_b] {
        if let Ok(_msg) = consumer.recv_timeout(Duration::from_millis(500)).await {
            received += 1;
        }
    }
    assert_eq!(received, 4);

    producer.stop().await;
    consumer_a.stop().await;
    consumer_b.stop().await;
}

#[tokio::test]
async fn request_reply_round_trips_through_the_dataset_proxy() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fabric = ipc_fabric("test", dir.path());
    let cancel = CancellationToken::new();

    let proxy = fabric.start_dataset_proxy(cancel.clone()).await.expect("proxy");
    let mut replier = fabric.dataset_replier(cancel.clone()).await.expect("replier");
    let requester = fabric.dataset_requester(cancel.clone()).await.expect("requester");

    let server_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        loop {
            let request = tokio::select! {
                _ = server_cancel.cancelled() => break,
                request = replier.wait_for_request() => request,
            };
            let Some((token, message)) = request else { break };
            let Message::ConversationRequest(request) = message else { continue };
            let conversation_id =
                request.conversation_id.unwrap_or_else(|| "default".to_string());
            let reply = Message::ConversationResponse(ConversationResponseMessage {
                header: MessageHeader::new("dataset-1"),
                conversation: Conversation::single_turn(conversation_id, "hello"),
            });
            replier.respond(&token, reply).await.expect("respond");
        }
    });

    let reply = requester
        .request(
            Message::ConversationRequest(ConversationRequestMessage {
                header: MessageHeader::new("worker-1"),
                conversation_id: Some("conv-42".to_string()),
            }),
            Duration::from_secs(5),
        )
        .await
        .expect("reply");
    match reply {
        Message::ConversationResponse(response) => {
            assert_eq!(response.conversation.conversation_id, "conv-42");
            assert_eq!(response.conversation.turns.len(), 1);
        }
        other => panic!("expected conversation response, got {other:?}"),
    }

    cancel.cancel();
    let _ = server.await;
    requester.stop().await;
    proxy.stop().await;
}

#[tokio::test]
async fn request_times_out_when_no_replier_exists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fabric = ipc_fabric("test", dir.path());
    let cancel = CancellationToken::new();

    let proxy = fabric.start_dataset_proxy(cancel.clone()).await.expect("proxy");
    let requester = fabric.dataset_requester(cancel.clone()).await.expect("requester");

    let result = requester
        .request(
            Message::ConversationRequest(ConversationRequestMessage {
                header: MessageHeader::new("worker-1"),
                conversation_id: None,
            }),
            Duration::from_millis(200),
        )
        .await;
    assert!(matches!(result, Err(aiperf_fabric::Error::RequestTimeout { .. })));

    requester.stop().await;
    proxy.stop().await;
}

#[tokio::test]
async fn bound_subscriber_receives_from_connecting_publishers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let fabric = ipc_fabric("test", dir.path());
    let cancel = CancellationToken::new();

    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let builder = SubClientBuilder::new().subscribe(
        "credit_return",
        Box::new(move |message| {
            let seen_tx = seen_tx.clone();
            Box::pin(async move {
                let _ = seen_tx.send(message);
            })
        }),
    );
    let subscriber =
        fabric.credit_return_subscriber(builder, cancel.clone()).await.expect("subscriber");

    let publisher = fabric.credit_return_publisher(cancel.clone()).await.expect("publisher");
    publisher.publish(&credit_return("w-9", CreditPhase::Profiling)).await.expect("publish");

    let message = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv())
        .await
        .expect("delivery")
        .expect("message");
    assert!(matches!(message, Message::CreditReturn(_)));

    publisher.stop().await;
    subscriber.stop().await;
}
