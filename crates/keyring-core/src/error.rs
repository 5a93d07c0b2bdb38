//! Error types for keyring operations

use crate::types::KeyringType;
use thiserror::Error;

/// Result type alias for keyring operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during keyring operations
#[derive(Debug, Error)]
pub enum Error {
    // ============ Vault / Lock Errors ============
    /// The supplied password does not decrypt the vault
    #[error("Incorrect password")]
    IncorrectPassword,

    /// `boot` was called on a vault that already exists
    #[error("Vault already booted")]
    AlreadyBooted,

    /// No vault has ever been booted, so there is nothing to unlock
    #[error("Cannot unlock without a previous vault")]
    CanNotUnlock,

    /// Operation requires an unlocked vault
    #[error("Vault is locked")]
    VaultLocked,

    // ============ Registry / Resolver Errors ============
    /// No keyring owns the requested account
    #[error("No keyring found for the requested account")]
    NoKeyringFound,

    /// Account already present in the target keyring
    #[error("Duplicate account: {0}")]
    DuplicateAccount(String),

    /// Keyring type does not implement the capability
    #[error("{operation} is not supported by {keyring_type} keyrings")]
    NotSupported {
        keyring_type: KeyringType,
        operation: &'static str,
    },

    /// Unknown keyring type tag in a persisted record or request
    #[error("Unknown keyring type: {0}")]
    UnknownKeyringType(String),

    // ============ Input Errors ============
    /// Malformed account address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Malformed private key
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// Malformed mnemonic phrase
    #[error("Invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Options do not fit the keyring type
    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    // ============ Hardware Bridge Errors ============
    /// Device transport cannot be reached (e.g. WebUSB unsupported)
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// User declined the operation on the device
    #[error("Rejected on device: {0}")]
    DeviceRejected(String),

    /// No response within the protocol timeout
    #[error("Protocol timeout waiting for {0}")]
    ProtocolTimeout(String),

    /// Any other device-side failure reported through the bridge
    #[error("Bridge error: {0}")]
    Bridge(String),

    // ============ Remote Session Errors ============
    /// Another signing operation is already in flight on the session
    #[error("Session busy: {0}")]
    SessionBusy(String),

    /// Session reached its lifetime cap or was torn down mid-operation
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Peer connected without authority for the requested account
    #[error("Remote unauthorized: {0}")]
    RemoteUnauthorized(String),

    /// Peer declined the signing request
    #[error("Rejected by remote signer: {0}")]
    RemoteRejected(String),

    /// Session transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    // ============ Cryptographic Errors ============
    /// Encryption or key derivation failed
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// Signing primitive failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    // ============ Serialization / Storage Errors ============
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============ Internal Errors ============
    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a [`Error::NotSupported`] error
    pub fn not_supported(keyring_type: KeyringType, operation: &'static str) -> Self {
        Error::NotSupported {
            keyring_type,
            operation,
        }
    }

    /// Whether the caller can retry with corrected input (new password,
    /// different address, ...) without any other recovery step.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::IncorrectPassword
                | Error::VaultLocked
                | Error::NoKeyringFound
                | Error::DuplicateAccount(_)
                | Error::InvalidAddress(_)
                | Error::InvalidKey(_)
                | Error::InvalidMnemonic(_)
                | Error::InvalidOptions(_)
                | Error::SessionBusy(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<hex::FromHexError> for Error {
    fn from(e: hex::FromHexError) -> Self {
        Error::Deserialization(e.to_string())
    }
}
