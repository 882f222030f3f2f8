// Relay hub behavior: fan-out to every other client, acknowledgement to the
// sender, and survival of abrupt disconnects.

mod common;

use serde_json::json;

use common::{connect, loopback, wait_for_peers, LONG, SHORT};
use jsonwire::common::messages::is_relay_ack;
use jsonwire::server::ServerMode;
use jsonwire::setup::setup_server;

#[tokio::test]
async fn message_reaches_every_other_client() {
    let server = setup_server(loopback().with_relay_mode(true)).await.unwrap();
    assert_eq!(server.mode(), ServerMode::Relay);

    let mut p1 = connect(&server).await;
    let mut p2 = connect(&server).await;
    let mut p3 = connect(&server).await;
    wait_for_peers(&server, 3).await;

    let message = json!({ "from": "p1", "text": "hello everyone" });
    let ack = p1.send_as_json(&message, LONG).await.unwrap();
    assert!(is_relay_ack(&ack), "sender got {ack} instead of an ack");

    assert_eq!(p2.receive_json(LONG).await.unwrap(), message);
    assert_eq!(p3.receive_json(LONG).await.unwrap(), message);

    // The reverse direction works the same way.
    let reply = json!({ "from": "p3" });
    assert!(is_relay_ack(&p3.send_as_json(&reply, LONG).await.unwrap()));
    assert_eq!(p1.receive_json(LONG).await.unwrap(), reply);
    assert_eq!(p2.receive_json(LONG).await.unwrap(), reply);

    assert_eq!(server.metrics().relayed, 4);
    server.stop().await;
}

#[tokio::test]
async fn sender_never_receives_its_own_message() {
    let server = setup_server(loopback().with_relay_mode(true)).await.unwrap();
    let mut p1 = connect(&server).await;
    let mut p2 = connect(&server).await;
    wait_for_peers(&server, 2).await;

    let message = json!({ "n": 1 });
    assert!(is_relay_ack(&p1.send_as_json(&message, LONG).await.unwrap()));
    assert_eq!(p2.receive_json(LONG).await.unwrap(), message);

    let err = p1.receive_json(SHORT).await.unwrap_err();
    assert!(err.is_timeout(), "expected nothing for the sender, got {err:?}");
    server.stop().await;
}

#[tokio::test]
async fn lone_sender_is_still_acknowledged() {
    let server = setup_server(loopback().with_relay_mode(true)).await.unwrap();
    let mut alone = connect(&server).await;

    let ack = alone.send_as_json(&json!({ "anyone": "?" }), LONG).await.unwrap();
    assert!(is_relay_ack(&ack));
    assert_eq!(server.metrics().relayed, 0);
    server.stop().await;
}

#[tokio::test]
async fn abrupt_disconnect_does_not_stop_the_broadcast() {
    let server = setup_server(loopback().with_relay_mode(true)).await.unwrap();
    let mut p1 = connect(&server).await;
    let p2 = connect(&server).await;
    let mut p3 = connect(&server).await;
    wait_for_peers(&server, 3).await;

    let gone = p2.connection().local_addr().unwrap();
    // Dropping the client tears the socket down without a goodbye.
    drop(p2);

    let message = json!({ "after": "p2 left" });
    assert!(is_relay_ack(&p1.send_as_json(&message, LONG).await.unwrap()));
    assert_eq!(p3.receive_json(LONG).await.unwrap(), message);

    wait_for_peers(&server, 2).await;
    assert!(!server.connected_peers().await.contains(&gone));

    // Later broadcasts keep flowing to the survivors.
    let next = json!({ "still": "relaying" });
    assert!(is_relay_ack(&p3.send_as_json(&next, LONG).await.unwrap()));
    assert_eq!(p1.receive_json(LONG).await.unwrap(), next);

    server.stop().await;
}

#[tokio::test]
async fn peers_beyond_the_backlog_size_still_get_broadcasts() {
    let config = loopback().with_relay_mode(true).with_max_concurrent_clients(2);
    let server = setup_server(config).await.unwrap();

    let mut p1 = connect(&server).await;
    let mut p2 = connect(&server).await;
    let mut p3 = connect(&server).await;
    wait_for_peers(&server, 3).await;

    let message = json!({ "to": "everyone" });
    assert!(is_relay_ack(&p1.send_as_json(&message, LONG).await.unwrap()));
    assert_eq!(p2.receive_json(LONG).await.unwrap(), message);
    assert_eq!(p3.receive_json(LONG).await.unwrap(), message);

    server.stop().await;
}
