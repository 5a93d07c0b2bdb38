//! Software-emulated hardware device
//!
//! Behaves like a device family driver: derives keys from a mnemonic held
//! "on device", answers the standard bridge actions and can be told to be
//! unplugged or to have its user decline.

use super::host::DeviceDriver;
use super::{
    ACTION_GET_ADDRESS, ACTION_SIGN_PERSONAL_MESSAGE, ACTION_SIGN_TRANSACTION,
    ACTION_SIGN_TYPED_DATA,
};
use crate::keyring::hd::{derive_path_key, parse_mnemonic};
use crate::keyring::simple::sign_prehash;
use crate::types::{
    address_from_verifying_key, keccak256_hash, personal_message_hash, TypedDataRequest,
};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use zeroize::Zeroizing;

/// Emulated device for one bridge target
pub struct MemoryDevice {
    target: String,
    seed: Zeroizing<[u8; 64]>,
    available: AtomicBool,
    decline: AtomicBool,
    open: AtomicBool,
    opens: AtomicUsize,
    signatures: AtomicUsize,
}

impl MemoryDevice {
    /// Device at `target` whose secret is `phrase`
    pub fn from_phrase(target: impl Into<String>, phrase: &str) -> Result<Self> {
        let mnemonic = parse_mnemonic(phrase)?;
        Ok(Self {
            target: target.into(),
            seed: Zeroizing::new(mnemonic.to_seed("")),
            available: AtomicBool::new(true),
            decline: AtomicBool::new(false),
            open: AtomicBool::new(false),
            opens: AtomicUsize::new(0),
            signatures: AtomicUsize::new(0),
        })
    }

    /// Simulate plugging in or unplugging the device
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make the user decline every signing prompt
    pub fn set_decline(&self, decline: bool) {
        self.decline.store(decline, Ordering::SeqCst);
    }

    /// Whether the transport is currently open
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// How many times the transport was opened
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// How many signatures the device produced
    pub fn signature_count(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }

    fn sign(&self, path: &str, hash: &[u8; 32]) -> Result<Map<String, Value>> {
        if self.decline.load(Ordering::SeqCst) {
            return Err(Error::DeviceRejected("denied by the user".into()));
        }
        let key = derive_path_key(&self.seed[..], path)?;
        let signature = sign_prehash(&key, hash)?;
        self.signatures.fetch_add(1, Ordering::SeqCst);
        Ok(fields(json!({ "signature": signature.to_hex() })))
    }
}

fn fields(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn param_str<'a>(params: &'a [Value], index: usize) -> Result<&'a str> {
    params
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Bridge(format!("missing string parameter {}", index)))
}

fn param_bytes(params: &[Value], index: usize) -> Result<Vec<u8>> {
    let raw = param_str(params, index)?;
    Ok(hex::decode(raw.strip_prefix("0x").unwrap_or(raw))?)
}

fn param_hash(params: &[Value], index: usize) -> Result<[u8; 32]> {
    param_bytes(params, index)?
        .try_into()
        .map_err(|_| Error::Bridge(format!("parameter {} is not a 32-byte hash", index)))
}

#[async_trait]
impl DeviceDriver for MemoryDevice {
    fn target(&self) -> &str {
        &self.target
    }

    async fn open(&self) -> Result<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::TransportUnavailable(format!("{} not connected", self.target)));
        }
        self.open.store(true, Ordering::SeqCst);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    async fn invoke(&self, action: &str, params: &[Value]) -> Result<Map<String, Value>> {
        if !self.is_open() {
            return Err(Error::Bridge("transport not open".into()));
        }
        let path = param_str(params, 0)?;

        match action {
            ACTION_GET_ADDRESS => {
                let key = derive_path_key(&self.seed[..], path)?;
                let address = address_from_verifying_key(key.verifying_key());
                Ok(fields(json!({ "address": address })))
            }
            ACTION_SIGN_TRANSACTION => {
                let tx = param_bytes(params, 1)?;
                self.sign(path, &keccak256_hash(&tx))
            }
            ACTION_SIGN_PERSONAL_MESSAGE => {
                let message = param_bytes(params, 1)?;
                self.sign(path, &personal_message_hash(&message))
            }
            ACTION_SIGN_TYPED_DATA => {
                let request = TypedDataRequest::new(
                    param_hash(params, 1)?,
                    param_hash(params, 2)?,
                    params.get(3).cloned().unwrap_or(Value::Null),
                );
                self.sign(path, &request.signing_hash())
            }
            other => Err(Error::Bridge(format!("unsupported action `{}`", other))),
        }
    }
}
