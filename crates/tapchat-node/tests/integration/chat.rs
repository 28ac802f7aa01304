//! Connecting two nodes and exchanging messages.

use tapchat_node::LanConfig;
use tapchat_protocol::Direction;
use tapchat_session::{PeerHandle, SessionEvent, SessionStatus};

use crate::harness::{connected_pair, TestNode};

#[tokio::test]
async fn test_connect_exchanges_names() {
    let (alice, bob) = connected_pair().await.unwrap();

    assert_eq!(alice.session.peer_name(), "Bob");
    assert_eq!(bob.session.peer_name(), "Alice");
    assert_eq!(alice.session.status(), SessionStatus::Connected);
    assert_eq!(bob.session.status(), SessionStatus::Connected);
}

#[tokio::test]
async fn test_messages_flow_both_ways_in_order() {
    let (mut alice, mut bob) = connected_pair().await.unwrap();

    for text in ["one", "two", "three"] {
        bob.session.send_message(text).await.unwrap();
    }
    alice.session.send_message("grüße zurück").await.unwrap();

    for text in ["one", "two", "three"] {
        let message = alice.expect_message(text).await.unwrap();
        assert_eq!(message.sender_name, "Bob");
        assert_eq!(message.direction, Direction::In);
        assert!(!message.archived);
    }
    let reply = bob.expect_message("grüße zurück").await.unwrap();
    assert_eq!(reply.sender_name, "Alice");
}

#[tokio::test]
async fn test_browse_then_connect() {
    let mut alice = TestNode::start("Alice").await;
    let browse_target = alice.adapter.browse_addr().expect("alice answers probes");

    let mut bob = TestNode::start_with(
        "Bob",
        LanConfig {
            browse_targets: vec![browse_target],
            ..LanConfig::loopback()
        },
    )
    .await;

    let peers = bob.session.search().await.unwrap();
    assert_eq!(peers, vec![alice.peer_handle()]);
    assert_eq!(bob.session.peers(), peers);
    bob.expect_event("search result", |e| {
        matches!(e, SessionEvent::SearchFinished(found) if found.len() == 1)
    })
    .await
    .unwrap();

    bob.session.connect_to_peer(peers[0].clone()).await.unwrap();
    alice.wait_peer_name("Bob").await.unwrap();
    bob.wait_peer_name("Alice").await.unwrap();

    bob.session.send_message("found you").await.unwrap();
    alice.expect_message("found you").await.unwrap();
}

#[tokio::test]
async fn test_search_with_nobody_around() {
    let mut lonely = TestNode::start("Lonely").await;

    let peers = lonely.session.search().await.unwrap();
    assert!(peers.is_empty());
    lonely
        .expect_event("empty search result", |e| {
            matches!(e, SessionEvent::SearchFinished(found) if found.is_empty())
        })
        .await
        .unwrap();
    // Still discovering, ready for a tap
    assert!(lonely.session.status().is_started());
}

#[tokio::test]
async fn test_connect_to_missing_peer_reports_problem() {
    let mut alice = TestNode::start("Alice").await;
    let gone = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        PeerHandle::new(listener.local_addr().unwrap().to_string(), "Ghost")
    };

    // Nothing listens on that port any more
    alice.wait_status(SessionStatus::Listening).await.unwrap();
    assert!(alice.session.connect_to_peer(gone).await.is_err());
    alice
        .expect_event("connectivity problem", |e| {
            matches!(e, SessionEvent::ConnectivityProblem(_))
        })
        .await
        .unwrap();
    assert_eq!(alice.session.status(), SessionStatus::Listening);
}
