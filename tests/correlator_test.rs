// Request-Reply Correlator Integration Tests
// Person lookups over req.person.get / res.person.get on the in-process broker

mod common;

use common::{broker_with_queues, eventually, FlakyTransport, Person, PersonQuery};
use relay_bus::correlator::{CorrelatorConfig, ReplyListener, RequestReplyCorrelator};
use relay_bus::messaging::{
    handler_fn, Delivery, InMemoryBroker, MessageHeaders, MessagingError, OutboundMessage,
    SubscribeOptions, Subscription, Transport,
};
use relay_bus::retry::RetryTier;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const REQUESTS: &str = "req.person.get";
const RESPONSES: &str = "res.person.get";

async fn setup() -> (InMemoryBroker, RequestReplyCorrelator) {
    let broker = broker_with_queues(&[REQUESTS, RESPONSES]).await;
    let correlator = RequestReplyCorrelator::new(Arc::new(broker.clone()));
    (broker, correlator)
}

async fn start_responder(
    correlator: &RequestReplyCorrelator,
    cancel: &CancellationToken,
) -> Subscription {
    correlator
        .receive_and_reply(
            REQUESTS,
            RESPONSES,
            |query: PersonQuery| async move {
                if query.id == "missing" {
                    return Err(format!("no person with id {}", query.id));
                }
                let name = match query.id.as_str() {
                    "p1" => "Alice".to_string(),
                    other => format!("person-{}", other),
                };
                Ok(Person { id: query.id, name })
            },
            RetryTier::None,
            cancel,
        )
        .await
        .unwrap()
}

fn query(id: &str) -> PersonQuery {
    PersonQuery { id: id.to_string() }
}

// ============================================================================
// request_reply
// ============================================================================

#[tokio::test]
async fn test_person_lookup_round_trip() {
    let (broker, correlator) = setup().await;
    let cancel = CancellationToken::new();
    let responder = start_responder(&correlator, &cancel).await;

    let person: Person = correlator
        .request_reply(
            &query("p1"),
            REQUESTS,
            RESPONSES,
            MessageHeaders::new(),
            RetryTier::Medium,
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(
        person,
        Person {
            id: "p1".to_string(),
            name: "Alice".to_string()
        }
    );

    eventually(|| {
        broker.active_message_count(REQUESTS).unwrap() == 0
            && broker.active_message_count(RESPONSES).unwrap() == 0
    })
    .await;
    responder.close().await;
}

#[tokio::test]
async fn test_reply_carries_request_correlation_id() {
    let (broker, correlator) = setup().await;
    let cancel = CancellationToken::new();
    let responder = start_responder(&correlator, &cancel).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let replies = broker
        .subscribe(
            RESPONSES,
            handler_fn(move |delivery: Delivery| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(delivery.message().headers.correlation_id.clone());
                    Ok(())
                }
            }),
            SubscribeOptions::default(),
        )
        .await
        .unwrap();

    // Without a correlation ID the reply falls back to the request's message ID
    let request_id = broker
        .send(
            REQUESTS,
            OutboundMessage::json(&query("p2"), MessageHeaders::new()).unwrap(),
        )
        .await
        .unwrap();
    broker
        .send(
            REQUESTS,
            OutboundMessage::json(
                &query("p3"),
                MessageHeaders::new().with_correlation_id("lookup-3"),
            )
            .unwrap(),
        )
        .await
        .unwrap();

    let mut seen = Vec::new();
    for _ in 0..2 {
        let correlation_id = timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        seen.push(correlation_id.unwrap());
    }
    seen.sort();

    let mut expected = vec![request_id.to_string(), "lookup-3".to_string()];
    expected.sort();
    assert_eq!(seen, expected);

    replies.close().await;
    responder.close().await;
}

#[tokio::test]
async fn test_cancellation_before_reply() {
    let (_broker, correlator) = setup().await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = correlator
        .request_reply::<_, Person>(
            &query("p1"),
            REQUESTS,
            RESPONSES,
            MessageHeaders::new(),
            RetryTier::Medium,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MessagingError::Cancelled));

    // The abandoned call leaves nothing behind that blocks a later one
    let fresh = CancellationToken::new();
    let responder = start_responder(&correlator, &fresh).await;
    let person: Person = timeout(
        Duration::from_secs(2),
        correlator.request_reply(
            &query("p1"),
            REQUESTS,
            RESPONSES,
            MessageHeaders::new(),
            RetryTier::None,
            &fresh,
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(person.name, "Alice");
    responder.close().await;
}

#[tokio::test(start_paused = true)]
async fn test_reply_timeout() {
    let broker = broker_with_queues(&[REQUESTS, RESPONSES]).await;
    let correlator = RequestReplyCorrelator::with_config(
        Arc::new(broker.clone()),
        CorrelatorConfig {
            response_timeout: Some(Duration::from_secs(5)),
            ..Default::default()
        },
    );

    let err = correlator
        .request_reply::<_, Person>(
            &query("p1"),
            REQUESTS,
            RESPONSES,
            MessageHeaders::new(),
            RetryTier::None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MessagingError::Timeout(_)));
    // The unanswered request stays queued
    assert_eq!(broker.active_message_count(REQUESTS).unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_request_survives_flaky_transport() {
    let (broker, _) = setup().await;
    let cancel = CancellationToken::new();

    let responder_side = RequestReplyCorrelator::new(Arc::new(broker.clone()));
    let responder = start_responder(&responder_side, &cancel).await;

    let flaky = Arc::new(FlakyTransport::new(broker.clone(), 1));
    let requester = RequestReplyCorrelator::new(flaky.clone());

    let person: Person = requester
        .request_reply(
            &query("p1"),
            REQUESTS,
            RESPONSES,
            MessageHeaders::new(),
            RetryTier::Low,
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(person.name, "Alice");
    assert_eq!(flaky.send_attempts(), 2);
    responder.close().await;
}

#[tokio::test]
async fn test_request_reply_to_missing_queue() {
    let (_broker, correlator) = setup().await;

    let err = correlator
        .request_reply::<_, Person>(
            &query("p1"),
            "req.unknown",
            RESPONSES,
            MessageHeaders::new(),
            RetryTier::None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    match err {
        MessagingError::SendFailed { entity, source, .. } => {
            assert_eq!(entity, "req.unknown");
            assert!(source.to_string().contains("not found"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

// ============================================================================
// receive_and_reply
// ============================================================================

#[tokio::test]
async fn test_failed_transform_sends_no_reply() {
    let (broker, correlator) = setup().await;
    let cancel = CancellationToken::new();
    let responder = start_responder(&correlator, &cancel).await;

    correlator
        .send(
            &query("missing"),
            REQUESTS,
            MessageHeaders::new(),
            RetryTier::None,
            &cancel,
        )
        .await
        .unwrap();

    // The request is still completed
    eventually(|| broker.active_message_count(REQUESTS).unwrap() == 0).await;
    assert_eq!(broker.active_message_count(RESPONSES).unwrap(), 0);
    assert!(broker.dead_letter_messages(REQUESTS).unwrap().is_empty());

    responder.close().await;
}

#[tokio::test]
async fn test_closed_responder_leaves_requests_queued() {
    let (broker, correlator) = setup().await;
    let cancel = CancellationToken::new();
    let responder = start_responder(&correlator, &cancel).await;
    responder.close().await;

    correlator
        .send(
            &query("p1"),
            REQUESTS,
            MessageHeaders::new(),
            RetryTier::None,
            &cancel,
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(broker.active_message_count(REQUESTS).unwrap(), 1);
    assert_eq!(broker.active_message_count(RESPONSES).unwrap(), 0);
}

// ============================================================================
// ReplyListener
// ============================================================================

#[tokio::test]
async fn test_listener_routes_concurrent_requests() {
    let (broker, correlator) = setup().await;
    let cancel = CancellationToken::new();
    let responder = start_responder(&correlator, &cancel).await;
    let listener = ReplyListener::start(correlator.clone(), RESPONSES, RetryTier::None, &cancel)
        .await
        .unwrap();

    let ids: Vec<String> = (0..8).map(|i| format!("c{}", i)).collect();
    let queries: Vec<PersonQuery> = ids.iter().map(|id| query(id)).collect();
    let requests = queries.iter().map(|q| {
        listener.request::<_, Person>(
            q,
            REQUESTS,
            MessageHeaders::new(),
            RetryTier::None,
            &cancel,
        )
    });
    let people = futures::future::join_all(requests).await;

    for (id, person) in ids.iter().zip(people) {
        let person = person.unwrap();
        assert_eq!(&person.id, id);
        assert_eq!(person.name, format!("person-{}", id));
    }

    assert_eq!(listener.pending_count(), 0);
    assert!(broker.dead_letter_messages(RESPONSES).unwrap().is_empty());

    listener.close().await;
    responder.close().await;
}

#[tokio::test]
async fn test_listener_request_times_out_and_unregisters() {
    let broker = broker_with_queues(&[REQUESTS, RESPONSES]).await;
    let correlator = RequestReplyCorrelator::with_config(
        Arc::new(broker.clone()),
        CorrelatorConfig {
            response_timeout: Some(Duration::from_millis(100)),
            ..Default::default()
        },
    );
    let cancel = CancellationToken::new();
    let listener = ReplyListener::start(correlator, RESPONSES, RetryTier::None, &cancel)
        .await
        .unwrap();

    let err = listener
        .request::<_, Person>(
            &query("p1"),
            REQUESTS,
            MessageHeaders::new(),
            RetryTier::None,
            &cancel,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, MessagingError::Timeout(_)));
    assert_eq!(listener.pending_count(), 0);
    listener.close().await;

    // The unanswered request names the listener's queue and a correlation ID
    let (tx, mut rx) = mpsc::unbounded_channel();
    let requests = broker
        .subscribe(
            REQUESTS,
            handler_fn(move |delivery: Delivery| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(delivery.message().headers.clone());
                    Ok(())
                }
            }),
            SubscribeOptions::default(),
        )
        .await
        .unwrap();

    let headers = timeout(Duration::from_secs(2), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(headers.reply_to.as_deref(), Some(RESPONSES));
    assert!(headers.correlation_id.is_some());
    requests.close().await;
}

// ============================================================================
// Payloads without Sync
// ============================================================================

/// Payload that can move between threads but not be shared by them
#[derive(Debug, Serialize, Deserialize)]
struct Tally {
    count: Cell<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Count {
    count: u32,
}

#[tokio::test]
async fn test_payloads_need_not_be_sync() {
    let (broker, correlator) = setup().await;
    let cancel = CancellationToken::new();

    let responder = correlator
        .receive_and_reply(
            REQUESTS,
            RESPONSES,
            |tally: Tally| async move {
                Ok::<_, String>(Count {
                    count: tally.count.get() + 1,
                })
            },
            RetryTier::None,
            &cancel,
        )
        .await
        .unwrap();

    let reply: Tally = correlator
        .request_reply(
            &Count { count: 41 },
            REQUESTS,
            RESPONSES,
            MessageHeaders::new(),
            RetryTier::None,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(reply.count.get(), 42);
    eventually(|| broker.active_message_count(REQUESTS).unwrap() == 0).await;
    responder.close().await;

    broker
        .send(
            REQUESTS,
            OutboundMessage::json(&Count { count: 7 }, MessageHeaders::new()).unwrap(),
        )
        .await
        .unwrap();
    let doubled = correlator
        .receive_and_transform(
            REQUESTS,
            |tally: Tally| async move { Ok::<_, String>(tally.count.get() * 2) },
            RetryTier::None,
            &cancel,
        )
        .await
        .unwrap();
    assert_eq!(doubled, 14);
}
