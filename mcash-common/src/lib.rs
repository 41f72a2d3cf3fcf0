//! Shared primitives for the mcash ledger.
//!
//! Everything that crosses a crate boundary as a field element goes through
//! the helpers here: byte conversions, the Poseidon domain hash used for map
//! keys and signed messages, and the hex serde codec used on the wire.

use anyhow::{anyhow, ensure, Context, Result};
use halo2curves_axiom::{
    bn256::Fr,
    ff::{Field, PrimeField},
};
use poseidon_primitives::poseidon::primitives::{ConstantLength, Hash as PoseidonHash, Spec};

/// Number of bits needed to address every canonical field element.
pub const FIELD_BITS: usize = <Fr as PrimeField>::NUM_BITS as usize;

const POSEIDON_T: usize = 6;
const POSEIDON_RATE: usize = 5;
const POSEIDON_FULL_ROUNDS: usize = 8;
const POSEIDON_PARTIAL_ROUNDS: usize = 57;

pub fn fr_from_bytes(bytes: &[u8; 32]) -> Result<Fr> {
    Fr::from_bytes(bytes)
        .into_option()
        .ok_or_else(|| anyhow!("invalid bn256 scalar encoding"))
}

pub fn fr_to_bytes(fr: &Fr) -> [u8; 32] {
    let repr = fr.to_repr();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(repr.as_ref());
    bytes
}

pub fn reduce_be_bytes_to_fr(bytes: &[u8]) -> Fr {
    let mut acc = Fr::zero();
    let base = Fr::from(256);
    for byte in bytes.iter() {
        acc = acc * base + Fr::from(*byte as u64);
    }
    acc
}

/// Interpret a field element as a `u64`, failing if it does not fit.
pub fn fr_to_u64(fr: &Fr) -> Result<u64> {
    let repr = fr.to_repr();
    let bytes = repr.as_ref();
    ensure!(
        bytes[8..].iter().all(|&b| b == 0),
        "field element does not fit in u64"
    );
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    Ok(u64::from_le_bytes(buf))
}

/// Field element from little-endian bits of its canonical representation.
/// Bits beyond `FIELD_BITS` are ignored.
pub fn fr_from_bits(bits: &[bool]) -> Result<Fr> {
    let mut bytes = [0u8; 32];
    for (i, bit) in bits.iter().take(FIELD_BITS).enumerate() {
        if *bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    fr_from_bytes(&bytes).context("bit path does not encode a canonical field element")
}

pub fn fr_to_hex(fr: &Fr) -> String {
    format!("0x{}", hex::encode(fr_to_bytes(fr)))
}

pub fn fr_from_hex(value: &str) -> Result<Fr> {
    let hex_str = value.strip_prefix("0x").unwrap_or(value);
    ensure!(
        hex_str.len() == 64,
        "expected 64 hex chars, got {}",
        hex_str.len()
    );
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hex_str, &mut bytes).context("invalid hex field element")?;
    fr_from_bytes(&bytes)
}

/// Poseidon hash over a fixed number of field elements.
pub fn poseidon_hash<const L: usize>(values: &[Fr; L]) -> Fr {
    PoseidonHash::<Fr, LedgerPoseidonSpec, ConstantLength<L>, POSEIDON_T, POSEIDON_RATE>::init()
        .hash(*values)
}

#[derive(Debug)]
struct LedgerPoseidonSpec;

impl Spec<Fr, POSEIDON_T, POSEIDON_RATE> for LedgerPoseidonSpec {
    fn full_rounds() -> usize {
        POSEIDON_FULL_ROUNDS
    }

    fn partial_rounds() -> usize {
        POSEIDON_PARTIAL_ROUNDS
    }

    fn sbox(val: Fr) -> Fr {
        val.pow_vartime([5])
    }

    fn secure_mds() -> usize {
        0
    }
}

/// Serde codec for `Fr` as a `0x`-prefixed 32-byte little-endian hex string.
pub mod serde_fr {
    use super::Fr;
    use serde::{de, Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S>(fr: &Fr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::fr_to_hex(fr))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Fr, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct FrVisitor;

        impl de::Visitor<'_> for FrVisitor {
            type Value = Fr;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a 32-byte hex string (with or without 0x prefix)")
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                super::fr_from_hex(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(FrVisitor)
    }

    /// Same encoding for a sequence of field elements.
    pub mod vec {
        use super::Fr;
        use serde::{ser::SerializeSeq, Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(values: &[Fr], serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let mut seq = serializer.serialize_seq(Some(values.len()))?;
            for value in values {
                seq.serialize_element(&crate::fr_to_hex(value))?;
            }
            seq.end()
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Fr>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let raw = Vec::<String>::deserialize(deserializer)?;
            raw.iter()
                .map(|s| crate::fr_from_hex(s).map_err(serde::de::Error::custom))
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Wrapped {
        #[serde(with = "serde_fr")]
        value: Fr,
        #[serde(with = "serde_fr::vec")]
        path: Vec<Fr>,
    }

    #[test]
    fn fr_bytes_round_trip() {
        let value = Fr::from(2024u64);
        let bytes = fr_to_bytes(&value);
        assert_eq!(fr_from_bytes(&bytes).unwrap(), value);
    }

    #[test]
    fn fr_from_bits_reads_little_endian() {
        let mut bits = vec![false; FIELD_BITS];
        bits[0] = true;
        bits[2] = true;
        assert_eq!(fr_from_bits(&bits).unwrap(), Fr::from(5u64));
        assert!(fr_from_bits(&[true; FIELD_BITS]).is_err());
    }

    #[test]
    fn fr_to_u64_rejects_large_values() {
        assert_eq!(fr_to_u64(&Fr::from(1_000_000u64)).unwrap(), 1_000_000);
        assert!(fr_to_u64(&(Fr::from(u64::MAX) + Fr::one())).is_err());
    }

    #[test]
    fn hex_codec_rejects_bad_length() {
        assert!(fr_from_hex("0x1234").is_err());
        let hex = fr_to_hex(&Fr::from(42u64));
        assert_eq!(fr_from_hex(&hex).unwrap(), Fr::from(42u64));
    }

    #[test]
    fn serde_wrapper_uses_hex_strings() {
        let wrapped = Wrapped {
            value: Fr::from(5u64),
            path: vec![Fr::zero(), Fr::one()],
        };
        let json = serde_json::to_value(&wrapped).unwrap();
        assert!(json["value"].as_str().unwrap().starts_with("0x"));
        let decoded: Wrapped = serde_json::from_value(json).unwrap();
        assert_eq!(decoded.value, wrapped.value);
        assert_eq!(decoded.path, wrapped.path);
    }

    #[test]
    fn poseidon_is_input_sensitive() {
        let a = poseidon_hash(&[Fr::from(1u64), Fr::from(2u64)]);
        let b = poseidon_hash(&[Fr::from(2u64), Fr::from(1u64)]);
        assert_eq!(a, poseidon_hash(&[Fr::from(1u64), Fr::from(2u64)]));
        assert_ne!(a, b);
    }
}
