//! Account identities and field-message signatures.
//!
//! An account is an Ed25519 public key. Its map key is the Poseidon hash of
//! the key split into two field elements, and signed messages are sequences
//! of field elements encoded as their canonical 32-byte representations.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use halo2curves_axiom::bn256::Fr;
use mcash_common::{fr_to_bytes, poseidon_hash, reduce_be_bytes_to_fr};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::LedgerError;

/// A ledger account, identified by its Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AccountId {
    key: VerifyingKey,
}

impl AccountId {
    pub fn from_verifying_key(key: VerifyingKey) -> Self {
        Self { key }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LedgerError> {
        let key = VerifyingKey::try_from(bytes)
            .map_err(|err| LedgerError::InvalidInput(format!("invalid public key: {err}")))?;
        Ok(Self { key })
    }

    pub fn from_hex(value: &str) -> Result<Self, LedgerError> {
        let raw = value.strip_prefix("0x").unwrap_or(value);
        let bytes = hex::decode(raw)
            .map_err(|err| LedgerError::InvalidInput(format!("invalid public key hex: {err}")))?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        self.key.as_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.key
    }

    /// The public key as two field elements (big-endian halves).
    pub fn to_fields(&self) -> [Fr; 2] {
        let bytes = self.as_bytes();
        [
            reduce_be_bytes_to_fr(&bytes[..16]),
            reduce_be_bytes_to_fr(&bytes[16..]),
        ]
    }

    /// Key under which this account's entries live in every map.
    pub fn map_key(&self) -> Fr {
        poseidon_hash(&self.to_fields())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AccountId").field(&self.to_hex()).finish()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for AccountId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for AccountId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for AccountId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).map_err(de::Error::custom)
    }
}

/// The message a sender signs to authorise a payment to `destination`.
pub fn payment_message(destination: &AccountId, sender: &AccountId) -> Fr {
    let [d0, d1] = destination.to_fields();
    let [s0, s1] = sender.to_fields();
    poseidon_hash(&[d0, d1, s0, s1])
}

fn message_bytes(message: &[Fr]) -> Vec<u8> {
    message.iter().flat_map(fr_to_bytes).collect()
}

pub fn sign_fields(signing_key: &SigningKey, message: &[Fr]) -> Signature {
    signing_key.sign(&message_bytes(message))
}

pub fn verify_fields(
    account: &AccountId,
    message: &[Fr],
    signature: &Signature,
) -> Result<(), LedgerError> {
    account
        .verifying_key()
        .verify(&message_bytes(message), signature)
        .map_err(|_| LedgerError::InvalidSignature)
}

pub fn signature_from_hex(value: &str) -> Result<Signature, LedgerError> {
    let raw = value.strip_prefix("0x").unwrap_or(value);
    let bytes = hex::decode(raw)
        .map_err(|err| LedgerError::InvalidInput(format!("invalid signature hex: {err}")))?;
    Signature::from_slice(&bytes)
        .map_err(|err| LedgerError::InvalidInput(format!("invalid signature: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    fn keypair() -> (SigningKey, AccountId) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let account = AccountId::from_verifying_key(signing_key.verifying_key());
        (signing_key, account)
    }

    #[test]
    fn hex_round_trip() {
        let (_, account) = keypair();
        let parsed: AccountId = account.to_hex().parse().unwrap();
        assert_eq!(parsed, account);
        assert_eq!(parsed.map_key(), account.map_key());
        assert!(AccountId::from_hex("abcd").is_err());
    }

    #[test]
    fn map_keys_differ_per_account() {
        let (_, a) = keypair();
        let (_, b) = keypair();
        assert_ne!(a.map_key(), b.map_key());
    }

    #[test]
    fn payment_signature_is_bound_to_message() {
        let (sender_key, sender) = keypair();
        let (_, destination) = keypair();
        let (_, other) = keypair();

        let message = payment_message(&destination, &sender);
        let signature = sign_fields(&sender_key, &[message]);
        assert!(verify_fields(&sender, &[message], &signature).is_ok());

        let redirected = payment_message(&other, &sender);
        assert_eq!(
            verify_fields(&sender, &[redirected], &signature),
            Err(LedgerError::InvalidSignature)
        );
    }

    #[test]
    fn signature_hex_parsing() {
        let (key, _) = keypair();
        let signature = sign_fields(&key, &[Fr::from(1u64)]);
        let parsed = signature_from_hex(&hex::encode(signature.to_bytes())).unwrap();
        assert_eq!(parsed, signature);
        assert!(signature_from_hex("00ff").is_err());
    }
}
