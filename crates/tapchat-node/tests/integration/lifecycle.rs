//! Disconnect, interruption and stop across two real nodes.

use std::time::Duration;

use tapchat_session::{SessionError, SessionEvent, SessionStatus};

use crate::harness::connected_pair;

fn is_interrupted(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::ConnectionInterrupted(_))
}

#[tokio::test]
async fn test_disconnect_interrupts_the_other_side() {
    let (mut alice, mut bob) = connected_pair().await.unwrap();

    alice.session.disconnect().await.unwrap();
    assert!(alice.session.status().is_started());
    assert_eq!(alice.session.peer_name(), "");

    bob.expect_event("interruption", is_interrupted).await.unwrap();
    assert!(matches!(
        bob.session.send_message("still there?").await,
        Err(SessionError::NotConnected)
    ));
    alice
        .expect_no_event("interruption", Duration::from_millis(200), is_interrupted)
        .await
        .unwrap();

    bob.session.disconnect().await.unwrap();
    assert!(bob.session.status().is_started());
    assert_ne!(bob.session.status(), SessionStatus::Connected);
}

#[tokio::test]
async fn test_reconnect_after_disconnect() {
    let (mut alice, mut bob) = connected_pair().await.unwrap();

    bob.session.disconnect().await.unwrap();
    alice.expect_event("interruption", is_interrupted).await.unwrap();
    alice.session.disconnect().await.unwrap();

    // Alice is accepting again after restarting discovery
    bob.session.connect_to_peer(alice.peer_handle()).await.unwrap();
    alice.wait_status(SessionStatus::Connected).await.unwrap();
    alice.wait_peer_name("Bob").await.unwrap();

    bob.session.send_message("back again").await.unwrap();
    let message = alice.expect_message("back again").await.unwrap();
    assert_eq!(message.sender_name, "Bob");
}

#[tokio::test]
async fn test_stop_is_silent_locally() {
    let (mut alice, mut bob) = connected_pair().await.unwrap();

    alice.session.stop().await.unwrap();
    assert_eq!(alice.session.status(), SessionStatus::Idle);

    bob.expect_event("interruption", is_interrupted).await.unwrap();
    alice
        .expect_no_event("interruption", Duration::from_millis(200), is_interrupted)
        .await
        .unwrap();

    // A stopped node can be started again
    alice.session.start().await.unwrap();
    assert!(alice.session.status().is_started());
}
