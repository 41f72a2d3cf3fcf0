//! mcash-operator library
//!
//! Axum-based HTTP surface over the mcash sequencer. Every root-changing
//! request is forwarded to the single sequencer queue; reads are served from
//! the shadow store and the committed roots.

pub mod config;

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use mcash_ledger::{
    signature_from_hex, AccountId, AccountView, DigestProofEngine, InMemoryLedger, LedgerError,
    Receipt, ReconcileReport, ReputationProof, Roots, Sequencer, SequencerConfig, ShadowStore,
    TransferLog, TreeWitness, DEPOSIT_UNIT,
};

pub use config::OperatorConfig;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub sequencer: Sequencer,
}

impl AppState {
    /// Wire an in-process ledger, proof engine and transfer log around the
    /// configured shadow store, and commit genesis if the ledger is empty.
    ///
    /// The ledger lives in memory, so every start begins with an empty
    /// history. A persisted shadow store is therefore not repaired from
    /// committed history on restart; its current roots become the new
    /// genesis instead. Commits that landed but were never mirrored before
    /// a crash are lost with the old ledger.
    pub async fn from_config(config: &OperatorConfig) -> anyhow::Result<Self> {
        let shadow = match &config.shadow_db {
            Some(path) => {
                warn!(
                    path = %path.display(),
                    "ledger is in memory; persisted shadow roots become the new genesis"
                );
                ShadowStore::open(path)?
            }
            None => ShadowStore::in_memory(),
        };
        Self::with_shadow(shadow, config.sequencer.clone()).await
    }

    pub async fn in_memory() -> anyhow::Result<Self> {
        Self::with_shadow(ShadowStore::in_memory(), SequencerConfig::default()).await
    }

    async fn with_shadow(shadow: ShadowStore, config: SequencerConfig) -> anyhow::Result<Self> {
        let engine = Arc::new(DigestProofEngine::new());
        let ledger = Arc::new(InMemoryLedger::new(engine.clone()));
        let (sequencer, report): (Sequencer, ReconcileReport) = Sequencer::start(
            ledger,
            engine,
            Arc::new(TransferLog::new()),
            shadow,
            config,
        )?;

        if report.roots.is_none() {
            let genesis = sequencer.init_roots().await?;
            if genesis.roots != Roots::empty() {
                warn!("genesis committed from a non-empty shadow store");
            }
            info!(sequence = ?genesis.sequence, "committed genesis roots");
        }
        Ok(Self { sequencer })
    }
}

/// Build the router.
pub fn app_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/roots", get(roots))
        .route("/accounts/:public_key", get(account))
        .route("/accounts/:public_key/reputation", get(reputation_proof))
        .route("/deposits/verify", post(verify_deposit))
        .route("/deposits/confirm", post(confirm_deposit))
        .route("/payments", post(make_payment))
        .route("/reputation/verify", post(verify_reputation))
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "initialized": state.sequencer.roots().is_some(),
        "deposit_unit": DEPOSIT_UNIT,
    }))
}

async fn roots(State(state): State<AppState>) -> Result<Json<Roots>, ApiError> {
    state
        .sequencer
        .roots()
        .map(Json)
        .ok_or_else(|| LedgerError::NotInitialized.into())
}

async fn account(
    State(state): State<AppState>,
    Path(public_key): Path<String>,
) -> Result<Json<AccountView>, ApiError> {
    let account = AccountId::from_hex(&public_key)?;
    Ok(Json(state.sequencer.account_view(&account).await?))
}

async fn reputation_proof(
    State(state): State<AppState>,
    Path(public_key): Path<String>,
) -> Result<Json<ReputationProof>, ApiError> {
    let account = AccountId::from_hex(&public_key)?;
    Ok(Json(state.sequencer.reputation_proof(&account).await?))
}

/// Deposit staging request.
#[derive(Debug, Deserialize)]
pub struct VerifyDepositRequest {
    pub public_key: String,
    /// Must equal the deposit unit when present.
    pub deposit_amount: Option<u64>,
}

async fn verify_deposit(
    State(state): State<AppState>,
    Json(req): Json<VerifyDepositRequest>,
) -> Result<Json<Receipt>, ApiError> {
    let account = AccountId::from_hex(&req.public_key)?;
    check_deposit_amount(req.deposit_amount)?;
    Ok(Json(state.sequencer.verify_deposit(account).await?))
}

/// Deposit settlement request.
#[derive(Debug, Deserialize)]
pub struct ConfirmDepositRequest {
    pub public_key: String,
    /// External identifier of the deposit; settles at most once.
    pub deposit_id: String,
}

async fn confirm_deposit(
    State(state): State<AppState>,
    Json(req): Json<ConfirmDepositRequest>,
) -> Result<Json<Receipt>, ApiError> {
    let account = AccountId::from_hex(&req.public_key)?;
    if req.deposit_id.trim().is_empty() {
        return Err(LedgerError::InvalidInput("deposit_id must not be empty".into()).into());
    }
    Ok(Json(
        state
            .sequencer
            .confirm_deposit(account, req.deposit_id)
            .await?,
    ))
}

/// Payment request.
#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub sender: String,
    pub recipient_address: String,
    pub payment_amount: u64,
    /// Hex Ed25519 signature over the payment message.
    pub signature: String,
}

async fn make_payment(
    State(state): State<AppState>,
    Json(req): Json<PaymentRequest>,
) -> Result<Json<Receipt>, ApiError> {
    let sender = AccountId::from_hex(&req.sender)?;
    let destination = AccountId::from_hex(&req.recipient_address)?;
    let signature = signature_from_hex(&req.signature)?;
    Ok(Json(
        state
            .sequencer
            .make_payment(sender, destination, req.payment_amount, signature)
            .await?,
    ))
}

/// Positional reputation query.
#[derive(Debug, Deserialize)]
pub struct VerifyReputationRequest {
    pub witness: TreeWitness,
    pub reputation: u64,
}

async fn verify_reputation(
    State(state): State<AppState>,
    Json(req): Json<VerifyReputationRequest>,
) -> Result<Json<Receipt>, ApiError> {
    Ok(Json(
        state
            .sequencer
            .verify_reputation(req.witness, req.reputation)
            .await?,
    ))
}

fn check_deposit_amount(amount: Option<u64>) -> Result<(), LedgerError> {
    match amount {
        Some(amount) if amount != DEPOSIT_UNIT => Err(LedgerError::InvalidInput(format!(
            "deposits are fixed at {DEPOSIT_UNIT}, got {amount}"
        ))),
        _ => Ok(()),
    }
}

/// API error type.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ApiError {
    status: StatusCode,
    message: String,
    code: &'static str,
    retryable: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    code: &'a str,
    retryable: bool,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorBody {
            error: &self.message,
            code: self.code,
            retryable: self.retryable,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        let (status, code) = status_and_code(&err);
        ApiError {
            status,
            message: err.to_string(),
            code,
            retryable: err.is_retryable(),
        }
    }
}

fn status_and_code(err: &LedgerError) -> (StatusCode, &'static str) {
    match err {
        LedgerError::KeyMismatch { .. } => (StatusCode::BAD_REQUEST, "KEY_MISMATCH"),
        LedgerError::StaleWitness { .. } => (StatusCode::CONFLICT, "STALE_WITNESS"),
        LedgerError::CrossMapKeyMismatch => (StatusCode::BAD_REQUEST, "CROSS_MAP_KEY_MISMATCH"),
        LedgerError::InsufficientBalance { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "INSUFFICIENT_BALANCE")
        }
        LedgerError::InvalidSignature => (StatusCode::UNAUTHORIZED, "INVALID_SIGNATURE"),
        LedgerError::ProofMismatch => (StatusCode::UNPROCESSABLE_ENTITY, "PROOF_MISMATCH"),
        LedgerError::MalformedWitness(_) => (StatusCode::BAD_REQUEST, "MALFORMED_WITNESS"),
        LedgerError::ProofTimeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "PROOF_TIMEOUT"),
        LedgerError::ProofGenerationFailed(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "PROOF_GENERATION_FAILED")
        }
        LedgerError::CommitRejected(_) => (StatusCode::CONFLICT, "COMMIT_REJECTED"),
        LedgerError::TransferFailed(_) => (StatusCode::BAD_GATEWAY, "TRANSFER_FAILED"),
        LedgerError::NotInitialized => (StatusCode::CONFLICT, "NOT_INITIALIZED"),
        LedgerError::ShadowDivergence(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SHADOW_DIVERGENCE"),
        LedgerError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        LedgerError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        LedgerError::SequencerClosed => (StatusCode::SERVICE_UNAVAILABLE, "SEQUENCER_UNAVAILABLE"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo2curves_axiom::bn256::Fr;
    use mcash_ledger::{MapKind, MapUpdate};

    #[test]
    fn ledger_errors_map_to_stable_codes() {
        let err = ApiError::from(LedgerError::InsufficientBalance {
            balance: 1,
            required: 2,
        });
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.code(), "INSUFFICIENT_BALANCE");
        assert!(!err.retryable);

        let stale = ApiError::from(LedgerError::StaleWitness {
            map: MapKind::Settled,
        });
        assert_eq!(stale.status(), StatusCode::CONFLICT);
        assert!(stale.retryable);
        assert_eq!(
            ApiError::from(LedgerError::ProofTimeout { timeout_ms: 5 }).code(),
            "PROOF_TIMEOUT"
        );
    }

    #[tokio::test]
    async fn persisted_shadow_roots_become_genesis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shadow");
        let key = mcash_ledger::deposit_nullifier("tx-1");
        let persisted = {
            let mut shadow = ShadowStore::open(&path).unwrap();
            let roots = shadow
                .apply(&[
                    MapUpdate::new(MapKind::Settled, key, Fr::from(DEPOSIT_UNIT)),
                    MapUpdate::new(MapKind::Nullifier, key, Fr::one()),
                ])
                .unwrap();
            shadow.flush().unwrap();
            roots
        };

        let config = OperatorConfig {
            port: 0,
            shadow_db: Some(path),
            sequencer: SequencerConfig::default(),
        };
        let state = AppState::from_config(&config).await.unwrap();
        assert_eq!(state.sequencer.roots(), Some(persisted));
        assert_ne!(persisted, Roots::empty());
    }

    #[test]
    fn deposit_amount_must_be_the_unit() {
        assert!(check_deposit_amount(None).is_ok());
        assert!(check_deposit_amount(Some(DEPOSIT_UNIT)).is_ok());
        assert!(check_deposit_amount(Some(DEPOSIT_UNIT - 1)).is_err());
    }
}
