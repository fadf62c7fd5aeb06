use super::*;
use crate::dispatcher::SocketDispatcher;
use crate::endpoint::DualEndpoint;
use crate::socket::{Frame, SocketContext};
use crate::stream::{observe_channel, Notification, Observable, Observer};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

struct Fixture {
    context: SocketContext,
    dispatcher: Arc<SocketDispatcher>,
    endpoint: DualEndpoint,
}

impl Fixture {
    fn new(name: &str) -> Self {
        Self {
            context: SocketContext::new(),
            dispatcher: Arc::new(SocketDispatcher::new()),
            endpoint: DualEndpoint::in_process(name).unwrap(),
        }
    }

    fn relay(&self) -> DualSocketBus {
        DualSocketBus::new(self.endpoint.clone(), self.dispatcher.clone(), &self.context)
    }

    fn publisher(&self) -> BusPublisher {
        BusPublisher::new(self.endpoint.clone(), self.dispatcher.clone(), &self.context)
    }

    fn subscriber(&self) -> BusSubscriber {
        BusSubscriber::new(self.endpoint.clone(), self.dispatcher.clone(), &self.context)
    }
}

async fn next_notification<T>(rx: &mut UnboundedReceiver<Notification<T>>) -> Notification<T> {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("channel closed")
}

async fn next_frame(rx: &mut UnboundedReceiver<Notification<Frame>>) -> Frame {
    match next_notification(rx).await {
        Notification::Next(frame) => frame,
        other => panic!("expected frame, got {:?}", other),
    }
}

fn frame(label: &str, body: &'static [u8]) -> Frame {
    Frame::message(label, Bytes::from_static(body))
}

#[tokio::test]
async fn test_relay_forwards_publisher_to_subscriber() {
    let fx = Fixture::new("orders");
    let relay = fx.relay();
    relay.start().unwrap();

    let subscriber = fx.subscriber();
    let (_subscription, mut rx) = observe_channel(&subscriber);
    assert!(subscriber.is_started());

    let publisher = fx.publisher();
    publisher.publish(frame("OrderPlaced", b"{\"id\":42}")).unwrap();

    let received = next_frame(&mut rx).await;
    assert_eq!(received.message_type().unwrap(), "OrderPlaced");
    assert_eq!(received.serialized_message().unwrap().as_ref(), b"{\"id\":42}");
    assert_eq!(relay.relayed_count(), 1);
}

#[tokio::test]
async fn test_single_publisher_order_preserved() {
    let fx = Fixture::new("ordered");
    let relay = fx.relay();
    relay.start().unwrap();
    let subscriber = fx.subscriber();
    let (_subscription, mut rx) = observe_channel(&subscriber);
    let publisher = fx.publisher();

    for i in 0..250u32 {
        publisher
            .publish(Frame::message("Seq", Bytes::from(i.to_be_bytes().to_vec())))
            .unwrap();
    }

    for i in 0..250u32 {
        let received = next_frame(&mut rx).await;
        let body = received.serialized_message().unwrap();
        assert_eq!(body.as_ref(), &i.to_be_bytes());
    }
}

#[tokio::test]
async fn test_multiple_publishers_reach_every_subscriber() {
    let fx = Fixture::new("fan");
    let relay = fx.relay();
    relay.start().unwrap();

    let first = fx.subscriber();
    let second = fx.subscriber();
    let (_s1, mut rx1) = observe_channel(&first);
    let (_s2, mut rx2) = observe_channel(&second);

    let (p1, p2) = (fx.publisher(), fx.publisher());
    p1.publish(frame("A", b"1")).unwrap();
    p2.publish(frame("B", b"2")).unwrap();

    for rx in [&mut rx1, &mut rx2] {
        let mut labels = vec![
            next_frame(rx).await.message_type().unwrap().to_string(),
            next_frame(rx).await.message_type().unwrap().to_string(),
        ];
        labels.sort();
        assert_eq!(labels, vec!["A", "B"]);
    }
}

#[test]
fn test_relay_start_stop_idempotent() {
    let fx = Fixture::new("idem");
    let relay = fx.relay();

    relay.start().unwrap();
    relay.start().unwrap();
    assert!(relay.is_started());
    assert_eq!(fx.dispatcher.endpoint_count(), 2);

    relay.stop().unwrap();
    relay.stop().unwrap();
    assert!(!relay.is_started());
    assert_eq!(fx.dispatcher.endpoint_count(), 0);

    relay.start().unwrap();
    assert!(relay.is_started());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_relay_concurrent_start_and_repeated_stop() {
    let fx = Fixture::new("concurrent-start");
    let relay = fx.relay();

    let first = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.start_async(CancellationToken::new()).await })
    };
    let second = {
        let relay = relay.clone();
        tokio::spawn(async move { relay.start_async(CancellationToken::new()).await })
    };
    let (first, second) = tokio::join!(first, second);
    first.unwrap().unwrap();
    second.unwrap().unwrap();

    assert!(relay.is_started());
    assert!(fx.dispatcher.is_dispatching());
    // both sockets, registered once
    assert_eq!(fx.dispatcher.endpoint_count(), 2);

    relay.stop_async(CancellationToken::new()).await.unwrap();
    relay.stop_async(CancellationToken::new()).await.unwrap();
    assert!(!relay.is_started());
    assert!(!fx.dispatcher.is_dispatching());
}

#[test]
fn test_relay_address_in_use() {
    let fx = Fixture::new("taken");
    let first = fx.relay();
    first.start().unwrap();

    let second = fx.relay();
    let err = second.start().unwrap_err();
    assert!(matches!(err, BusError::Socket(_)));
    assert!(!second.is_started());
}

#[test]
fn test_dispose_prevents_start() {
    let fx = Fixture::new("disposed");
    let relay = fx.relay();
    relay.start().unwrap();

    MessageBus::dispose(&relay);
    MessageBus::dispose(&relay);

    assert!(!relay.is_started());
    assert!(matches!(relay.start(), Err(BusError::Disposed(_))));

    let publisher = fx.publisher();
    MessageBus::dispose(&publisher);
    assert!(matches!(
        publisher.publish(frame("A", b"1")),
        Err(BusError::Disposed(_))
    ));
}

#[test]
fn test_dispose_releases_inproc_address() {
    let fx = Fixture::new("reuse");
    let relay = fx.relay();
    relay.start().unwrap();
    MessageBus::dispose(&relay);

    let replacement = fx.relay();
    replacement.start().unwrap();
}

#[tokio::test]
async fn test_dispatcher_stops_with_last_component() {
    let fx = Fixture::new("shared");
    let relay = fx.relay();
    relay.start().unwrap();

    let subscriber = fx.subscriber();
    let subscription = subscriber.subscribe(crate::stream::observer_fn(|_: &Frame| {}));
    let publisher = fx.publisher();
    publisher.start().unwrap();
    assert!(fx.dispatcher.is_dispatching());

    drop(subscription);
    assert!(!subscriber.is_started());
    publisher.stop().unwrap();
    assert!(fx.dispatcher.is_dispatching());

    relay.stop().unwrap();
    assert!(!fx.dispatcher.is_dispatching());
}

#[test]
fn test_first_publish_starts_publisher() {
    let fx = Fixture::new("lazy");
    let publisher = fx.publisher();
    assert!(!publisher.is_started());

    publisher.publish(frame("A", b"1")).unwrap();

    assert!(publisher.is_started());
    assert!(fx.dispatcher.is_dispatching());
}

#[test]
fn test_concurrent_publish_starts_once() {
    let fx = Fixture::new("race");
    let publisher = fx.publisher();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let publisher = publisher.clone();
            std::thread::spawn(move || publisher.publish(frame("A", b"1")))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    assert!(publisher.is_started());
    // queue and socket, registered exactly once
    assert_eq!(fx.dispatcher.endpoint_count(), 2);
}

#[tokio::test]
async fn test_publisher_upstream_errors_become_values() {
    let fx = Fixture::new("errors");
    let publisher = fx.publisher();
    let (_subscription, mut rx) = observe_channel(publisher.errors());

    <BusPublisher as Observer<Frame>>::on_error(&publisher, Arc::new(BusError::Cancelled));

    match next_notification(&mut rx).await {
        Notification::Next(error) => assert!(matches!(*error, BusError::Cancelled)),
        other => panic!("expected error value, got {:?}", other),
    }
}

#[tokio::test]
async fn test_send_failure_does_not_stop_draining() {
    let port = std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    let endpoint =
        DualEndpoint::multicast(std::net::Ipv4Addr::LOCALHOST, port, port + 1).unwrap();
    let dispatcher = Arc::new(SocketDispatcher::new());
    let publisher = BusPublisher::new(endpoint, dispatcher, &SocketContext::new());
    let (_subscription, mut rx) = observe_channel(publisher.errors());

    // too large for one datagram
    let oversized = Frame::message("Big", Bytes::from(vec![0u8; 70_000]));
    publisher.publish(frame("A", b"1")).unwrap();
    publisher.publish(oversized).unwrap();
    publisher.publish(frame("B", b"2")).unwrap();
    publisher.publish(frame("C", b"3")).unwrap();

    match next_notification(&mut rx).await {
        Notification::Next(error) => assert!(matches!(*error, BusError::Socket(_))),
        other => panic!("expected send error value, got {:?}", other),
    }
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while publisher.sent_count() < 3 && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(publisher.sent_count(), 3);
    assert_eq!(publisher.failed_count(), 1);
    assert!(publisher.is_started());
}

#[tokio::test]
async fn test_publisher_as_observer_forwards_frames() {
    let fx = Fixture::new("piped");
    let relay = fx.relay();
    relay.start().unwrap();
    let subscriber = fx.subscriber();
    let (_subscription, mut rx) = observe_channel(&subscriber);

    let source = crate::stream::Subject::<Frame>::new();
    let _pipe = source.subscribe(Arc::new(fx.publisher()));
    source.next(&frame("Piped", b"x"));

    assert_eq!(next_frame(&mut rx).await.message_type().unwrap(), "Piped");
}

#[test]
fn test_subscriber_lifecycle_follows_observers() {
    let fx = Fixture::new("refcount");
    let relay = fx.relay();
    relay.start().unwrap();
    let subscriber = fx.subscriber();
    assert!(!subscriber.is_started());

    let first = subscriber.subscribe(crate::stream::observer_fn(|_: &Frame| {}));
    let second = subscriber.subscribe(crate::stream::observer_fn(|_: &Frame| {}));
    assert!(subscriber.is_started());
    assert_eq!(subscriber.observer_count(), 2);

    first.unsubscribe();
    assert!(subscriber.is_started());

    drop(second);
    assert!(!subscriber.is_started());
    assert_eq!(subscriber.observer_count(), 0);

    let _again = subscriber.subscribe(crate::stream::observer_fn(|_: &Frame| {}));
    assert!(subscriber.is_started());
}

#[test]
fn test_subscribe_racing_last_unsubscribe_keeps_subscriber_running() {
    let fx = Fixture::new("refcount-race");
    let relay = fx.relay();
    relay.start().unwrap();
    let subscriber = fx.subscriber();

    for _ in 0..500 {
        let leaving = subscriber.subscribe(crate::stream::observer_fn(|_: &Frame| {}));
        let joiner = {
            let subscriber = subscriber.clone();
            std::thread::spawn(move || {
                subscriber.subscribe(crate::stream::observer_fn(|_: &Frame| {}))
            })
        };
        drop(leaving);
        let joined = joiner.join().unwrap();

        // one observer left, so the subscriber must be running
        assert_eq!(subscriber.observer_count(), 1);
        assert!(subscriber.is_started());

        drop(joined);
        assert!(!subscriber.is_started());
    }
}

#[tokio::test]
async fn test_malformed_frame_is_protocol_error() {
    let fx = Fixture::new("malformed");
    let relay = fx.relay();
    relay.start().unwrap();
    let subscriber = fx.subscriber();
    let (_subscription, mut rx) = observe_channel(&subscriber);
    let publisher = fx.publisher();

    publisher.publish(frame("Before", b"ok")).unwrap();
    publisher
        .publish(Frame::new(vec![Bytes::from_static(b"lonely")]))
        .unwrap();
    publisher.publish(frame("After", b"ok")).unwrap();

    assert_eq!(next_frame(&mut rx).await.message_type().unwrap(), "Before");
    match next_notification(&mut rx).await {
        Notification::Error(error) => assert!(matches!(*error, BusError::Protocol(_))),
        other => panic!("expected protocol error, got {:?}", other),
    }
    assert_eq!(next_frame(&mut rx).await.message_type().unwrap(), "After");
    assert_eq!(subscriber.malformed_count(), 1);
    assert_eq!(subscriber.received_count(), 2);
}

#[tokio::test]
async fn test_subscriber_dispose_completes_observers() {
    let fx = Fixture::new("complete");
    let subscriber = fx.subscriber();
    let (_subscription, mut rx) = observe_channel(&subscriber);

    MessageBus::dispose(&subscriber);

    assert!(matches!(
        next_notification(&mut rx).await,
        Notification::Completed
    ));
    assert!(matches!(subscriber.start(), Err(BusError::Disposed(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_subscriber_preserves_order() {
    let fx = Fixture::new("scheduled");
    let relay = fx.relay();
    relay.start().unwrap();
    let subscriber = BusSubscriber::with_scheduler(
        fx.endpoint.clone(),
        fx.dispatcher.clone(),
        &fx.context,
        tokio::runtime::Handle::current(),
    );
    let (_subscription, mut rx) = observe_channel(&subscriber);
    let publisher = fx.publisher();

    for i in 0..50u8 {
        publisher.publish(Frame::message("Seq", vec![i])).unwrap();
    }
    for i in 0..50u8 {
        let received = next_frame(&mut rx).await;
        assert_eq!(received.serialized_message().unwrap().as_ref(), &[i]);
    }
}

#[tokio::test]
async fn test_cancelled_start_does_nothing() {
    let fx = Fixture::new("cancelled");
    let relay = fx.relay();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = relay.start_async(cancel.clone()).await.unwrap_err();
    assert!(matches!(err, BusError::Cancelled));
    assert!(!relay.is_started());
    assert_eq!(fx.context.address_count(), 0);

    relay.start_async(CancellationToken::new()).await.unwrap();
    assert!(matches!(
        relay.stop_async(cancel).await,
        Err(BusError::Cancelled)
    ));
    assert!(relay.is_started());
}

#[tokio::test]
async fn test_component_names() {
    let fx = Fixture::new("named");
    assert_eq!(
        fx.relay().name(),
        "relay inproc://named-in -> inproc://named-out"
    );
    assert_eq!(fx.publisher().name(), "publisher -> inproc://named-in");
    assert_eq!(fx.subscriber().name(), "subscriber <- inproc://named-out");
}
