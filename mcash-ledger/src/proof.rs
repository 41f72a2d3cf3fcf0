//! Proof engine boundary.
//!
//! The core never inspects proofs; it asks a [`ProofEngine`] to certify a
//! transition's public inputs and the ledger asks the same engine to check
//! the certificate before accepting new roots.

use std::fmt;
use std::thread;
use std::time::Duration;

use halo2curves_axiom::bn256::Fr;
use mcash_common::fr_to_bytes;
use serde::{Deserialize, Serialize};

use crate::error::LedgerError;
use crate::roots::Roots;

/// Identifies which transition function produced a result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    InitRoots,
    VerifyDeposit,
    MakeDeposit,
    MakePayment,
    GetReputation,
}

impl TransitionKind {
    pub fn id(&self) -> u8 {
        match self {
            TransitionKind::InitRoots => 0,
            TransitionKind::VerifyDeposit => 1,
            TransitionKind::MakeDeposit => 2,
            TransitionKind::MakePayment => 3,
            TransitionKind::GetReputation => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionKind::InitRoots => "init_roots",
            TransitionKind::VerifyDeposit => "verify_deposit",
            TransitionKind::MakeDeposit => "make_deposit",
            TransitionKind::MakePayment => "make_payment",
            TransitionKind::GetReputation => "get_reputation",
        }
    }

    /// Whether results of this kind replace committed roots.
    pub fn mutates_roots(&self) -> bool {
        !matches!(self, TransitionKind::GetReputation)
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The values a proof attests to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicInputs {
    pub kind: TransitionKind,
    /// `None` only for genesis.
    pub prior_roots: Option<Roots>,
    pub new_roots: Roots,
}

impl PublicInputs {
    pub fn to_fields(&self) -> Vec<Fr> {
        let mut fields = Vec::with_capacity(7);
        fields.push(Fr::from(self.kind.id() as u64));
        match &self.prior_roots {
            Some(prior) => fields.extend(prior.to_fields()),
            None => fields.extend([Fr::zero(); 3]),
        }
        fields.extend(self.new_roots.to_fields());
        fields
    }
}

/// An opaque certificate that a transition was computed correctly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionProof {
    pub kind: TransitionKind,
    #[serde(with = "serde_hex_32")]
    pub bytes: [u8; 32],
}

impl TransitionProof {
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

mod serde_hex_32 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&raw, &mut bytes).map_err(serde::de::Error::custom)?;
        Ok(bytes)
    }
}

/// Turns a transition into a succinct certificate and checks certificates.
///
/// Proving is synchronous and may be slow; callers run it off the async
/// executor.
pub trait ProofEngine: Send + Sync {
    fn prove(&self, inputs: &PublicInputs) -> Result<TransitionProof, LedgerError>;

    fn verify(&self, proof: &TransitionProof, inputs: &PublicInputs) -> bool;
}

/// Deterministic engine that commits to the public inputs with blake3.
#[derive(Clone, Debug, Default)]
pub struct DigestProofEngine {
    delay: Option<Duration>,
}

impl DigestProofEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` before every proof, to model a slow prover.
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }

    fn digest(inputs: &PublicInputs) -> [u8; 32] {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"mcash_transition_proof_v1");
        for field in inputs.to_fields() {
            hasher.update(&fr_to_bytes(&field));
        }
        *hasher.finalize().as_bytes()
    }
}

impl ProofEngine for DigestProofEngine {
    fn prove(&self, inputs: &PublicInputs) -> Result<TransitionProof, LedgerError> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        if inputs.prior_roots.is_none() && inputs.kind != TransitionKind::InitRoots {
            return Err(LedgerError::ProofGenerationFailed(format!(
                "{} requires prior roots",
                inputs.kind
            )));
        }
        Ok(TransitionProof {
            kind: inputs.kind,
            bytes: Self::digest(inputs),
        })
    }

    fn verify(&self, proof: &TransitionProof, inputs: &PublicInputs) -> bool {
        proof.kind == inputs.kind && proof.bytes == Self::digest(inputs)
    }
}
