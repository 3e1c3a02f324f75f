//! Integration tests for hub broadcasts over PUB/SUB.

use std::time::Duration;

use tokio::time::timeout;

use taskhub_wire::{
    topics, Broadcast, EventPublisher, EventSubscriber, Session, Transport, ZmqPublisher,
    ZmqSubscriber,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE: Duration = Duration::from_millis(200);

#[tokio::test]
async fn ping_reaches_subscriber() {
    let transport = Transport::tcp("127.0.0.1", 17600);
    let session = Session::signed("cluster-key");

    let publisher = ZmqPublisher::bind(&transport, session.clone()).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let subscriber = ZmqSubscriber::connect(&transport, Session::signed("cluster-key"))
        .await
        .unwrap();
    subscriber.subscribe(topics::PING).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    publisher
        .publish(Broadcast::Ping { generation: 7 }.to_message().unwrap())
        .await
        .unwrap();

    let received = timeout(TIMEOUT, subscriber.recv())
        .await
        .expect("timed out waiting for ping")
        .unwrap();
    assert_eq!(received.topic, topics::PING);
    assert_eq!(
        Broadcast::from_message(&received).unwrap(),
        Broadcast::Ping { generation: 7 }
    );
}

#[tokio::test]
async fn notify_prefix_filters_pings() {
    let transport = Transport::tcp("127.0.0.1", 17610);

    let publisher = ZmqPublisher::bind(&transport, Session::unsigned()).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    let subscriber = ZmqSubscriber::connect(&transport, Session::unsigned())
        .await
        .unwrap();
    subscriber.subscribe(topics::NOTIFY).await.unwrap();
    tokio::time::sleep(SETTLE).await;

    publisher
        .publish(Broadcast::Ping { generation: 1 }.to_message().unwrap())
        .await
        .unwrap();
    publisher
        .publish(Broadcast::EngineUnregistered { engine_id: 3 }.to_message().unwrap())
        .await
        .unwrap();

    let received = timeout(TIMEOUT, subscriber.recv()).await.unwrap().unwrap();
    assert_eq!(received.topic, topics::ENGINE_UNREGISTERED);

    let nothing = timeout(Duration::from_millis(300), subscriber.recv()).await;
    assert!(nothing.is_err(), "ping should have been filtered out");
}
