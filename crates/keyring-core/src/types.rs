//! Core types for the keyring service
//!
//! Accounts, keyring type tags, signatures and the signing payloads every
//! keyring adapter accepts. Address normalisation lives here so that every
//! comparison boundary goes through the same function.

use crate::{Error, Result};
use k256::{ecdsa, elliptic_curve::sec1::ToEncodedPoint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of an account address in bytes
pub const ADDRESS_LEN: usize = 20;

/// Keyring backend kind, persisted as the `type` tag of each vault record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyringType {
    /// Imported raw private keys
    #[serde(rename = "Simple Key Pair")]
    SimpleKeyPair,
    /// BIP-39 mnemonic with BIP-32 derivation
    #[serde(rename = "HD Key Tree")]
    HdKeyTree,
    /// Device reached through the hardware bridge
    #[serde(rename = "Hardware")]
    Hardware,
    /// Peer wallet reached through a remote session
    #[serde(rename = "WalletConnect")]
    WalletConnect,
    /// Address without signing authority
    #[serde(rename = "Watch Address")]
    WatchAddress,
}

impl KeyringType {
    /// Get all keyring types
    pub fn all() -> [KeyringType; 5] {
        [
            KeyringType::SimpleKeyPair,
            KeyringType::HdKeyTree,
            KeyringType::Hardware,
            KeyringType::WalletConnect,
            KeyringType::WatchAddress,
        ]
    }

    /// Persisted tag for this type
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyringType::SimpleKeyPair => "Simple Key Pair",
            KeyringType::HdKeyTree => "HD Key Tree",
            KeyringType::Hardware => "Hardware",
            KeyringType::WalletConnect => "WalletConnect",
            KeyringType::WatchAddress => "Watch Address",
        }
    }

    /// Whether accounts of this type live in the vault itself rather than
    /// on a device or remote peer
    pub fn is_vault_held(&self) -> bool {
        matches!(
            self,
            KeyringType::SimpleKeyPair | KeyringType::HdKeyTree | KeyringType::WatchAddress
        )
    }
}

impl fmt::Display for KeyringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for KeyringType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        KeyringType::all()
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::UnknownKeyringType(s.to_string()))
    }
}

/// Normalize an address to its canonical `0x`-prefixed lowercase form
///
/// Every map keyed by address and every comparison goes through this function.
pub fn normalize_address(address: &str) -> Result<String> {
    let trimmed = address.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);

    if body.len() != ADDRESS_LEN * 2 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::InvalidAddress(address.to_string()));
    }

    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

/// An account exposed by a keyring
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Normalized address
    pub address: String,
    /// Type of the owning keyring
    #[serde(rename = "type")]
    pub keyring_type: KeyringType,
    /// Device family or peer wallet name, if the keyring distinguishes them
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub brand_name: Option<String>,
}

impl Account {
    /// Create an account without brand
    pub fn new(address: impl Into<String>, keyring_type: KeyringType) -> Self {
        Self {
            address: address.into(),
            keyring_type,
            brand_name: None,
        }
    }

    /// Attach a brand name
    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand_name = Some(brand.into());
        self
    }
}

/// ECDSA signature (r, s, v)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// R component (32 bytes)
    #[serde(with = "hex::serde")]
    pub r: [u8; 32],
    /// S component (32 bytes)
    #[serde(with = "hex::serde")]
    pub s: [u8; 32],
    /// Recovery ID (0 or 1)
    pub recovery_id: u8,
}

impl Signature {
    /// Create a new signature
    pub fn new(r: [u8; 32], s: [u8; 32], recovery_id: u8) -> Self {
        Self { r, s, recovery_id }
    }

    /// Build from a k256 recoverable signature
    pub fn from_recoverable(sig: &ecdsa::Signature, recovery_id: ecdsa::RecoveryId) -> Self {
        let bytes = sig.to_bytes();
        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..]);
        Self::new(r, s, recovery_id.to_byte())
    }

    /// Parse a 65-byte `r || s || v` hex string as returned by devices and peers
    pub fn from_hex(value: &str) -> Result<Self> {
        let body = value.strip_prefix("0x").unwrap_or(value);
        let bytes = hex::decode(body)?;
        if bytes.len() != 65 {
            return Err(Error::Deserialization(format!(
                "signature must be 65 bytes, got {}",
                bytes.len()
            )));
        }

        let mut r = [0u8; 32];
        let mut s = [0u8; 32];
        r.copy_from_slice(&bytes[..32]);
        s.copy_from_slice(&bytes[32..64]);
        let v = bytes[64];
        let recovery_id = match v {
            0 | 1 => v,
            27 | 28 => v - 27,
            _ => {
                return Err(Error::Deserialization(format!(
                    "unexpected recovery byte {}",
                    v
                )))
            }
        };

        Ok(Self::new(r, s, recovery_id))
    }

    /// Convert to bytes (r || s)
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(&self.r);
        bytes[32..].copy_from_slice(&self.s);
        bytes
    }

    /// Get v value for legacy Ethereum signatures
    pub fn v(&self) -> u8 {
        self.recovery_id + 27
    }

    /// `0x`-prefixed `r || s || v` hex, the form returned to callers
    pub fn to_hex(&self) -> String {
        let mut bytes = self.to_bytes().to_vec();
        bytes.push(self.v());
        format!("0x{}", hex::encode(bytes))
    }

    /// Recover the signer address for a prehashed message
    pub fn recover_address(&self, prehash: &[u8; 32]) -> Result<String> {
        let sig = ecdsa::Signature::from_slice(&self.to_bytes())
            .map_err(|e| Error::Crypto(e.to_string()))?;
        let recovery_id = ecdsa::RecoveryId::from_byte(self.recovery_id)
            .ok_or_else(|| Error::Crypto("invalid recovery id".into()))?;
        let key = ecdsa::VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id)
            .map_err(|e| Error::Crypto(e.to_string()))?;
        Ok(address_from_verifying_key(&key))
    }
}

/// Transaction to sign
///
/// The wire format belongs to the caller: `unsigned_tx` holds the encoded
/// unsigned transaction and software keyrings sign its Keccak-256 hash.
/// Hardware and remote signers receive the bytes as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRequest {
    /// Unique request ID
    pub request_id: String,
    /// Signing account
    pub from: String,
    /// Chain ID (for EVM)
    pub chain_id: Option<u64>,
    /// Encoded unsigned transaction
    #[serde(with = "hex::serde")]
    pub unsigned_tx: Vec<u8>,
    /// Request timestamp
    pub timestamp: i64,
    /// Optional metadata
    pub metadata: Option<serde_json::Value>,
}

impl TransactionRequest {
    /// Create a new transaction request
    pub fn new(from: impl Into<String>, unsigned_tx: Vec<u8>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            from: from.into(),
            chain_id: None,
            unsigned_tx,
            timestamp: chrono::Utc::now().timestamp(),
            metadata: None,
        }
    }

    /// Set chain ID
    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    /// Hash signed by software keyrings
    pub fn signing_hash(&self) -> [u8; 32] {
        keccak256_hash(&self.unsigned_tx)
    }
}

/// EIP-712 typed data prepared for signing
///
/// Structured hashing is done by the caller; the raw JSON travels with the
/// hashes so devices and peers can display it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedDataRequest {
    /// Domain separator hash
    #[serde(with = "hex::serde")]
    pub domain_separator: [u8; 32],
    /// Hash of the primary struct
    #[serde(with = "hex::serde")]
    pub struct_hash: [u8; 32],
    /// Original typed data document
    pub data: serde_json::Value,
}

impl TypedDataRequest {
    /// Create a typed data request
    pub fn new(domain_separator: [u8; 32], struct_hash: [u8; 32], data: serde_json::Value) -> Self {
        Self {
            domain_separator,
            struct_hash,
            data,
        }
    }

    /// `keccak256(0x19 0x01 || domainSeparator || structHash)`
    pub fn signing_hash(&self) -> [u8; 32] {
        let mut buf = Vec::with_capacity(66);
        buf.extend_from_slice(&[0x19, 0x01]);
        buf.extend_from_slice(&self.domain_separator);
        buf.extend_from_slice(&self.struct_hash);
        keccak256_hash(&buf)
    }
}

/// EIP-191 hash of a personal message
pub fn personal_message_hash(message: &[u8]) -> [u8; 32] {
    let prefix = format!("\x19Ethereum Signed Message:\n{}", message.len());
    let mut buf = Vec::with_capacity(prefix.len() + message.len());
    buf.extend_from_slice(prefix.as_bytes());
    buf.extend_from_slice(message);
    keccak256_hash(&buf)
}

/// Compute Keccak256 hash of data
pub fn keccak256_hash(data: &[u8]) -> [u8; 32] {
    use tiny_keccak::{Hasher, Keccak};
    let mut hasher = Keccak::v256();
    hasher.update(data);
    let mut hash = [0u8; 32];
    hasher.finalize(&mut hash);
    hash
}

/// Ethereum address of a secp256k1 public key, normalized
pub fn address_from_verifying_key(key: &ecdsa::VerifyingKey) -> String {
    let encoded = key.as_affine().to_encoded_point(false);
    // Skip the 0x04 prefix, take the last 20 bytes of the hash
    let hash = keccak256_hash(&encoded.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}
