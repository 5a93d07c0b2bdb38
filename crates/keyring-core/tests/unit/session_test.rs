//! Unit tests for remote sessions

use keyring_core::session::{
    ApprovalMode, MemoryTransport, RemoteRequest, ResponseMode, SessionManager,
    SessionManagerConfig, SessionStatus,
};
use keyring_core::{Error, SessionKey};
use std::sync::Arc;
use std::time::Duration;

const KEY: &str = "c87509a1c067bbde78beb793e6fa76530b6382a4c0241e5e4a9ec0a0f44dc0d3";
const ADDRESS: &str = "0x627306090abab3a6e1400e9345bc60c78a8bef57";

fn personal(message: &[u8]) -> RemoteRequest {
    RemoteRequest::PersonalSign {
        address: ADDRESS.into(),
        message: message.to_vec(),
    }
}

fn manager(transport: &MemoryTransport, max_duration: Duration) -> SessionManager {
    let config = SessionManagerConfig {
        max_duration,
        ..SessionManagerConfig::default()
    };
    SessionManager::new(Arc::new(transport.clone()), config)
}

#[tokio::test]
async fn test_peer_disconnect_fails_pending_request() {
    let transport = MemoryTransport::new();
    transport.add_wallet("MetaMask", KEY).unwrap();
    transport.set_response(ResponseMode::Silent);
    let manager = manager(&transport, Duration::from_secs(60));
    let key = SessionKey::new(ADDRESS, "MetaMask");

    let pending = {
        let manager = manager.clone();
        let key = key.clone();
        tokio::spawn(async move { manager.sign(&key, None, personal(b"hello")).await })
    };

    while transport.requests().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let session_id = manager.session(&key).unwrap().session_id;
    transport.disconnect(&session_id, "peer went away");

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Transport(_))));
    assert!(manager.session(&key).is_none());
    assert_eq!(manager.stats().total_failed, 1);
}

#[tokio::test]
async fn test_disconnect_address_covers_every_brand() {
    let transport = MemoryTransport::new();
    transport.add_wallet("MetaMask", KEY).unwrap();
    transport.add_wallet("Rainbow", KEY).unwrap();
    let manager = manager(&transport, Duration::from_secs(60));

    manager.connect(&SessionKey::new(ADDRESS, "MetaMask"), None).await.unwrap();
    manager.connect(&SessionKey::new(ADDRESS, "Rainbow"), Some(10)).await.unwrap();
    assert_eq!(manager.sessions().len(), 2);
    assert_eq!(
        manager
            .session(&SessionKey::new(ADDRESS, "Rainbow"))
            .unwrap()
            .chain_id,
        Some(10)
    );

    assert_eq!(manager.disconnect_address(ADDRESS).await, 2);
    assert!(manager.sessions().is_empty());
    assert!(transport.open_sessions().is_empty());
    assert_eq!(transport.closed_sessions().len(), 2);
}

#[tokio::test]
async fn test_connect_reuses_live_session() {
    let transport = MemoryTransport::new();
    transport.add_wallet("MetaMask", KEY).unwrap();
    let manager = manager(&transport, Duration::from_secs(60));
    let key = SessionKey::new(ADDRESS, "MetaMask");

    let first = manager.connect(&key, None).await.unwrap();
    let second = manager.connect(&key, None).await.unwrap();
    assert_eq!(first.session_id, second.session_id);
    assert_eq!(first.status, SessionStatus::Connected);
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_connect_expires() {
    let transport = MemoryTransport::new();
    transport.add_wallet("MetaMask", KEY).unwrap();
    transport.set_approval(ApprovalMode::Silent);
    let manager = manager(&transport, Duration::from_secs(5));

    let result = manager
        .connect(&SessionKey::new(ADDRESS, "MetaMask"), None)
        .await;
    assert!(matches!(result, Err(Error::SessionExpired(_))));
}

#[tokio::test]
async fn test_peer_error_fails_session() {
    let transport = MemoryTransport::new();
    transport.add_wallet("MetaMask", KEY).unwrap();
    transport.set_response(ResponseMode::Error);
    let manager = manager(&transport, Duration::from_secs(60));
    let key = SessionKey::new(ADDRESS, "MetaMask");

    let result = manager.sign(&key, None, personal(b"hello")).await;
    assert!(matches!(result, Err(Error::Transport(_))));

    // A failed session is replaced on the next request
    transport.set_response(ResponseMode::Sign);
    while manager.session(&key).is_some() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    manager.sign(&key, None, personal(b"again")).await.unwrap();
    assert_eq!(transport.connect_count(), 2);
}
