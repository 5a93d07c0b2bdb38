//! WalletConnect keyrings through the in-memory session transport

use k256::ecdsa::SigningKey;
use keyring_core::session::{MemoryTransport, PeerEvent, PeerOutcome, ResponseMode};
use keyring_core::types::personal_message_hash;
use keyring_core::vault::{KdfParams, MemoryVaultStore};
use keyring_core::{
    AccountFilter, Error, KeyringConfig, KeyringEvent, KeyringOptions, KeyringService,
    KeyringType, RemoteAccount, SessionKey, SessionStatus, Signature,
};
use std::sync::Arc;
use std::time::Duration;

const PASSWORD: &str = "password123";
const KEY: &str = "c87509a1c067bbde78beb793e6fa76530b6382a4c0241e5e4a9ec0a0f44dc0d3";
const ADDRESS: &str = "0x627306090abab3a6e1400e9345bc60c78a8bef57";
const OTHER_KEY: &str = "ae6ae8e5ccbfb04590405997ee2d52d2b330726137b875053c36d94e974d162f";

async fn rig() -> (MemoryTransport, Arc<KeyringService>) {
    let transport = MemoryTransport::new();
    transport.add_wallet("MetaMask", KEY).unwrap();

    let service = KeyringService::builder(Arc::new(MemoryVaultStore::new()))
        .config(KeyringConfig::default().with_kdf(KdfParams::light()))
        .session_transport(Arc::new(transport.clone()))
        .build();
    service.boot(PASSWORD).await.unwrap();
    service
        .add_new_keyring(
            KeyringType::WalletConnect,
            KeyringOptions::Remote {
                accounts: vec![RemoteAccount::new(ADDRESS, "MetaMask")],
            },
        )
        .await
        .unwrap();
    (transport, Arc::new(service))
}

fn metamask() -> AccountFilter {
    AccountFilter::of_type(KeyringType::WalletConnect).with_brand("MetaMask")
}

#[tokio::test]
async fn test_remote_sign_and_status_events() {
    let (_transport, service) = rig().await;
    let mut events = service.subscribe();

    let signature = service
        .sign_personal_message(ADDRESS, b"remote", &metamask())
        .await
        .unwrap();
    assert_eq!(
        signature
            .recover_address(&personal_message_hash(b"remote"))
            .unwrap(),
        ADDRESS
    );

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let KeyringEvent::SessionStatusChanged { status, brand, .. } = event {
            assert_eq!(brand, "MetaMask");
            seen.push(status);
        }
    }
    assert_eq!(
        seen,
        vec![
            SessionStatus::Pending,
            SessionStatus::Connected,
            SessionStatus::Waiting,
            SessionStatus::Submitted
        ]
    );
}

#[tokio::test]
async fn test_rejection_keeps_session() {
    let (transport, service) = rig().await;
    transport.set_response(ResponseMode::Reject);

    let result = service
        .sign_personal_message(ADDRESS, b"no", &metamask())
        .await;
    assert!(matches!(result, Err(Error::RemoteRejected(_))));

    transport.set_response(ResponseMode::Sign);
    service
        .sign_personal_message(ADDRESS, b"yes", &metamask())
        .await
        .unwrap();
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn test_late_failure_does_not_override_signature() {
    let (transport, service) = rig().await;
    transport.set_response(ResponseMode::SignThenError);

    service
        .sign_personal_message(ADDRESS, b"once", &metamask())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let sessions = service.sessions().unwrap();
    let key = SessionKey::new(ADDRESS, "MetaMask");
    assert_eq!(sessions.status(&key), Some(SessionStatus::Submitted));
}

#[tokio::test]
async fn test_signature_from_wrong_account_rejected() {
    let (transport, service) = rig().await;
    transport.set_response(ResponseMode::Silent);

    let pending = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .sign_personal_message(ADDRESS, b"forged", &metamask())
                .await
        })
    };
    while transport.requests().is_empty() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let other = SigningKey::from_slice(&hex::decode(OTHER_KEY).unwrap()).unwrap();
    let (sig, recovery_id) = other
        .sign_prehash_recoverable(&personal_message_hash(b"forged"))
        .unwrap();
    let forged = Signature::from_recoverable(&sig, recovery_id).to_hex();

    let call = transport.requests()[0].clone();
    let session_id = transport.open_sessions()[0].clone();
    transport.emit(
        &session_id,
        PeerEvent::Response {
            id: call.id,
            outcome: PeerOutcome::Signature(forged),
        },
    );

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::RemoteUnauthorized(_))));
}

#[tokio::test]
async fn test_lock_and_remove_close_sessions() {
    let (transport, service) = rig().await;
    service
        .sign_personal_message(ADDRESS, b"open", &metamask())
        .await
        .unwrap();
    assert_eq!(transport.open_sessions().len(), 1);

    service.set_locked().await.unwrap();
    assert!(transport.open_sessions().is_empty());
    assert_eq!(transport.killed_sessions().len(), 1);

    service.submit_password(PASSWORD).await.unwrap();
    service
        .sign_personal_message(ADDRESS, b"reopen", &metamask())
        .await
        .unwrap();
    assert_eq!(transport.open_sessions().len(), 1);

    service
        .remove_account(ADDRESS, KeyringType::WalletConnect, Some("MetaMask"))
        .await
        .unwrap();
    assert!(transport.open_sessions().is_empty());
    assert!(service.get_keyrings().await.is_empty());
}

#[tokio::test]
async fn test_unapproved_account_is_unauthorized() {
    let (transport, service) = rig().await;
    transport.set_approved_accounts(Some(vec![
        "0x0000000000000000000000000000000000000001".to_string(),
    ]));

    let result = service
        .sign_personal_message(ADDRESS, b"who", &metamask())
        .await;
    assert!(matches!(result, Err(Error::RemoteUnauthorized(_))));
}
