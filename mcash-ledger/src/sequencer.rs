//! Single-writer sequencer.
//!
//! Every root-changing request goes through one bounded queue drained by a
//! single worker task. For each request the worker looks up witnesses in the
//! shadow store, runs the transition, proves it off the async executor,
//! commits it to the ledger and mirrors the accepted updates before it takes
//! the next request. A commit rejected for stale roots is re-witnessed and
//! retried up to [`SequencerConfig::max_commit_retries`] times.

use std::sync::Arc;

use ed25519_dalek::Signature;
use halo2curves_axiom::bn256::Fr;
use mcash_common::serde_fr;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::config::SequencerConfig;
use crate::error::LedgerError;
use crate::identity::AccountId;
use crate::ledger::{CommitOutcome, CommitmentLedger, RejectReason, Submission};
use crate::map::MapWitness;
use crate::nullifier::{committed_in, deposit_nullifier, nullifier_update, ReplayGuard};
use crate::proof::{ProofEngine, PublicInputs, TransitionKind, TransitionProof};
use crate::reconcile::{reconcile, ReconcileReport};
use crate::roots::{MapKind, Roots};
use crate::shadow::{AccountView, ShadowStore};
use crate::transfer::FundsTransfer;
use crate::transition::{
    get_reputation, init_roots, make_deposit, make_payment, verify_deposit, PaymentInputs,
    TransitionResult,
};
use crate::tree::TreeWitness;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// New roots were committed and mirrored.
    Committed,
    /// The deposit was settled earlier; nothing changed.
    AlreadySettled,
    /// A read-only query was proved against the committed roots.
    Verified,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TransferReceipt {
    pub destination: AccountId,
    pub amount: u64,
    pub reference: String,
}

/// Outcome of a sequenced request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub kind: TransitionKind,
    pub status: ReceiptStatus,
    pub roots: Roots,
    pub sequence: Option<u64>,
    /// Hex-encoded proof, absent when nothing was proved.
    pub proof: Option<String>,
    pub transfer: Option<TransferReceipt>,
}

/// A reputation value with its map witness, checked against the committed root.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReputationProof {
    pub account: AccountId,
    pub reputation: u64,
    #[serde(with = "serde_fr")]
    pub root: Fr,
    pub witness: MapWitness,
}

enum Request {
    InitRoots,
    VerifyDeposit {
        account: AccountId,
    },
    ConfirmDeposit {
        account: AccountId,
        deposit_id: String,
    },
    MakePayment {
        sender: AccountId,
        destination: AccountId,
        amount: u64,
        signature: Signature,
    },
}

struct Job {
    request: Request,
    respond: oneshot::Sender<Result<Receipt, LedgerError>>,
}

/// Handle to the sequencer. Cloning shares the same queue and worker.
#[derive(Clone)]
pub struct Sequencer {
    queue: mpsc::Sender<Job>,
    shadow: Arc<RwLock<ShadowStore>>,
    ledger: Arc<dyn CommitmentLedger>,
    engine: Arc<dyn ProofEngine>,
    config: SequencerConfig,
}

impl Sequencer {
    /// Reconcile the shadow store with the ledger and spawn the worker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        ledger: Arc<dyn CommitmentLedger>,
        engine: Arc<dyn ProofEngine>,
        transfers: Arc<dyn FundsTransfer>,
        mut shadow: ShadowStore,
        config: SequencerConfig,
    ) -> Result<(Self, ReconcileReport), LedgerError> {
        let report = reconcile(&mut shadow, ledger.as_ref())?;
        let shadow = Arc::new(RwLock::new(shadow));
        let (queue, receiver) = mpsc::channel(config.queue_capacity.max(1));

        let worker = Worker {
            ledger: ledger.clone(),
            engine: engine.clone(),
            transfers,
            shadow: shadow.clone(),
            config: config.clone(),
        };
        tokio::spawn(worker.run(receiver));

        info!(
            queue_capacity = config.queue_capacity,
            max_commit_retries = config.max_commit_retries,
            proof_timeout_ms = config.proof_timeout.as_millis() as u64,
            "sequencer started"
        );
        Ok((
            Self {
                queue,
                shadow,
                ledger,
                engine,
                config,
            },
            report,
        ))
    }

    async fn submit(&self, request: Request) -> Result<Receipt, LedgerError> {
        let (respond, response) = oneshot::channel();
        self.queue
            .send(Job { request, respond })
            .await
            .map_err(|_| LedgerError::SequencerClosed)?;
        response.await.map_err(|_| LedgerError::SequencerClosed)?
    }

    /// Commit genesis roots taken from the (empty) shadow store.
    pub async fn init_roots(&self) -> Result<Receipt, LedgerError> {
        self.submit(Request::InitRoots).await
    }

    /// Stage one deposit unit for `account`.
    pub async fn verify_deposit(&self, account: AccountId) -> Result<Receipt, LedgerError> {
        self.submit(Request::VerifyDeposit { account }).await
    }

    /// Settle a staged deposit, at most once per `deposit_id`.
    pub async fn confirm_deposit(
        &self,
        account: AccountId,
        deposit_id: impl Into<String>,
    ) -> Result<Receipt, LedgerError> {
        self.submit(Request::ConfirmDeposit {
            account,
            deposit_id: deposit_id.into(),
        })
        .await
    }

    pub async fn make_payment(
        &self,
        sender: AccountId,
        destination: AccountId,
        amount: u64,
        signature: Signature,
    ) -> Result<Receipt, LedgerError> {
        self.submit(Request::MakePayment {
            sender,
            destination,
            amount,
            signature,
        })
        .await
    }

    /// Prove a positional reputation witness against the committed root.
    pub async fn verify_reputation(
        &self,
        witness: TreeWitness,
        reputation: u64,
    ) -> Result<Receipt, LedgerError> {
        let roots = self.ledger.roots().ok_or(LedgerError::NotInitialized)?;
        let result = get_reputation(&roots, &witness, reputation)?;
        let inputs = result.public_inputs();
        let proof = prove(&self.engine, &self.config, inputs).await?;
        if !self.engine.verify(&proof, &inputs) {
            return Err(LedgerError::ProofGenerationFailed(
                "reputation proof failed verification".into(),
            ));
        }
        Ok(Receipt {
            kind: result.kind,
            status: ReceiptStatus::Verified,
            roots,
            sequence: None,
            proof: Some(proof.to_hex()),
            transfer: None,
        })
    }

    pub async fn account_view(&self, account: &AccountId) -> Result<AccountView, LedgerError> {
        self.shadow.read().await.account_view(account)
    }

    /// The account's reputation with a witness that opens against the
    /// committed reputation root.
    pub async fn reputation_proof(&self, account: &AccountId) -> Result<ReputationProof, LedgerError> {
        let roots = self.ledger.roots().ok_or(LedgerError::NotInitialized)?;
        let witnessed = self
            .shadow
            .read()
            .await
            .witnessed(MapKind::Reputation, account)?;
        let (root, key) = witnessed
            .witness
            .compute_root_and_key(Fr::from(witnessed.value))?;
        if key != account.map_key() {
            return Err(LedgerError::KeyMismatch {
                map: MapKind::Reputation,
            });
        }
        if root != roots.reputation {
            return Err(LedgerError::StaleWitness {
                map: MapKind::Reputation,
            });
        }
        Ok(ReputationProof {
            account: *account,
            reputation: witnessed.value,
            root,
            witness: witnessed.witness,
        })
    }

    /// Committed roots, `None` before genesis.
    pub fn roots(&self) -> Option<Roots> {
        self.ledger.roots()
    }
}

/// Run the engine on a blocking thread, bounded by the configured timeout.
async fn prove(
    engine: &Arc<dyn ProofEngine>,
    config: &SequencerConfig,
    inputs: PublicInputs,
) -> Result<TransitionProof, LedgerError> {
    let engine = engine.clone();
    let task = tokio::task::spawn_blocking(move || engine.prove(&inputs));
    match tokio::time::timeout(config.proof_timeout, task).await {
        Err(_) => Err(LedgerError::ProofTimeout {
            timeout_ms: config.proof_timeout.as_millis() as u64,
        }),
        Ok(Err(join_err)) => Err(LedgerError::ProofGenerationFailed(join_err.to_string())),
        Ok(Ok(proved)) => proved,
    }
}

struct Committed {
    result: TransitionResult,
    sequence: u64,
    proof: TransitionProof,
}

struct Worker {
    ledger: Arc<dyn CommitmentLedger>,
    engine: Arc<dyn ProofEngine>,
    transfers: Arc<dyn FundsTransfer>,
    shadow: Arc<RwLock<ShadowStore>>,
    config: SequencerConfig,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::Receiver<Job>) {
        while let Some(job) = receiver.recv().await {
            let outcome = self.handle(job.request).await;
            if let Err(err) = &outcome {
                warn!(error = %err, "sequenced request failed");
            }
            let _ = job.respond.send(outcome);
        }
        debug!("sequencer queue closed, worker exiting");
    }

    async fn handle(&self, request: Request) -> Result<Receipt, LedgerError> {
        match request {
            Request::InitRoots => self.init_roots().await,
            Request::VerifyDeposit { account } => {
                let committed = self
                    .commit_transition(None, |roots, shadow| {
                        let unstable = shadow.witnessed(MapKind::Unstable, &account)?;
                        verify_deposit(roots, &account, &unstable)
                    })
                    .await?;
                Ok(receipt(committed, None))
            }
            Request::ConfirmDeposit {
                account,
                deposit_id,
            } => self.confirm_deposit(account, &deposit_id).await,
            Request::MakePayment {
                sender,
                destination,
                amount,
                signature,
            } => {
                let committed = self
                    .commit_transition(None, |roots, shadow| {
                        let inputs = PaymentInputs {
                            amount,
                            sender,
                            destination,
                            balance: shadow.witnessed(MapKind::Settled, &sender)?,
                            reputation: shadow.witnessed(MapKind::Reputation, &sender)?,
                            signature,
                        };
                        make_payment(roots, &inputs)
                    })
                    .await?;
                self.pay_out(committed).await
            }
        }
    }

    async fn init_roots(&self) -> Result<Receipt, LedgerError> {
        let genesis = init_roots(self.shadow.read().await.roots());
        let proof = prove(&self.engine, &self.config, genesis.public_inputs()).await?;
        match self.ledger.commit(&Submission::new(&genesis, proof.clone())) {
            CommitOutcome::Accepted { sequence } => Ok(receipt(
                Committed {
                    result: genesis,
                    sequence,
                    proof,
                },
                None,
            )),
            CommitOutcome::Rejected { reason } => Err(LedgerError::CommitRejected(reason.to_string())),
        }
    }

    async fn confirm_deposit(&self, account: AccountId, deposit_id: &str) -> Result<Receipt, LedgerError> {
        let nullifier = deposit_nullifier(deposit_id);
        let roots = self.synced_roots().await?;
        if self.already_settled(&nullifier).await? {
            info!(%account, deposit_id, "deposit already settled");
            return Ok(Receipt {
                kind: TransitionKind::MakeDeposit,
                status: ReceiptStatus::AlreadySettled,
                roots,
                sequence: None,
                proof: None,
                transfer: None,
            });
        }

        let committed = self
            .commit_transition(Some(nullifier), |roots, shadow| {
                let unstable = shadow.witnessed(MapKind::Unstable, &account)?;
                let settled = shadow.witnessed(MapKind::Settled, &account)?;
                make_deposit(roots, &account, &unstable, &settled)
            })
            .await?;
        Ok(receipt(committed, None))
    }

    /// Check the local replay guard, falling back to the ledger history for a
    /// mark that was committed but never mirrored. A mark found only in the
    /// history is restored locally.
    async fn already_settled(&self, nullifier: &Fr) -> Result<bool, LedgerError> {
        let mut shadow = self.shadow.write().await;
        if shadow.check(nullifier) {
            return Ok(true);
        }
        if !committed_in(&self.ledger.history(), nullifier) {
            return Ok(false);
        }
        warn!("committed nullifier missing from shadow store, restoring mark");
        shadow.mark(*nullifier)?;
        Ok(true)
    }

    async fn pay_out(&self, committed: Committed) -> Result<Receipt, LedgerError> {
        let Some(transfer) = committed.result.transfer else {
            return Ok(receipt(committed, None));
        };
        let reference = self.transfers.transfer(&transfer).await.map_err(|err| {
            warn!(
                destination = %transfer.destination,
                amount = transfer.amount,
                sequence = committed.sequence,
                error = %err,
                "outbound transfer failed after commit"
            );
            LedgerError::TransferFailed(err.to_string())
        })?;
        let transfer = TransferReceipt {
            destination: transfer.destination,
            amount: transfer.amount,
            reference,
        };
        Ok(receipt(committed, Some(transfer)))
    }

    /// Committed roots, after reconciling the shadow store if it lags.
    async fn synced_roots(&self) -> Result<Roots, LedgerError> {
        let committed = self.ledger.roots().ok_or(LedgerError::NotInitialized)?;
        let mut shadow = self.shadow.write().await;
        if shadow.roots() == committed {
            return Ok(committed);
        }
        reconcile(&mut *shadow, self.ledger.as_ref())?
            .roots
            .ok_or(LedgerError::NotInitialized)
    }

    /// Witness, prove, commit and mirror one transition, retrying on stale roots.
    async fn commit_transition<F>(
        &self,
        nullifier: Option<Fr>,
        build: F,
    ) -> Result<Committed, LedgerError>
    where
        F: Fn(&Roots, &ShadowStore) -> Result<TransitionResult, LedgerError>,
    {
        let max_retries = self.config.max_commit_retries;
        for attempt in 0..=max_retries {
            let roots = self.synced_roots().await?;
            let result = {
                let shadow = self.shadow.read().await;
                build(&roots, &*shadow)?
            };
            debug!(kind = %result.kind, attempt, "proving transition");
            let proof = prove(&self.engine, &self.config, result.public_inputs()).await?;

            let mut submission = Submission::new(&result, proof.clone());
            submission.updates.extend(nullifier.map(nullifier_update));

            match self.ledger.commit(&submission) {
                CommitOutcome::Accepted { sequence } => {
                    let mut shadow = self.shadow.write().await;
                    let mirrored = shadow.apply(&result.updates)?;
                    if let Some(nullifier) = nullifier {
                        shadow.mark(nullifier)?;
                    }
                    if mirrored != result.new_roots {
                        return Err(LedgerError::ShadowDivergence(format!(
                            "mirroring {} at sequence {sequence} produced unexpected roots",
                            result.kind
                        )));
                    }
                    return Ok(Committed {
                        result,
                        sequence,
                        proof,
                    });
                }
                CommitOutcome::Rejected {
                    reason: RejectReason::StaleRoots,
                } => {
                    warn!(
                        kind = %result.kind,
                        attempt,
                        max_retries,
                        "ledger roots moved, re-witnessing"
                    );
                }
                CommitOutcome::Rejected { reason } => {
                    return Err(LedgerError::CommitRejected(reason.to_string()));
                }
            }
        }
        Err(LedgerError::CommitRejected(format!(
            "roots still stale after {max_retries} retries"
        )))
    }
}

fn receipt(committed: Committed, transfer: Option<TransferReceipt>) -> Receipt {
    Receipt {
        kind: committed.result.kind,
        status: ReceiptStatus::Committed,
        roots: committed.result.new_roots,
        sequence: Some(committed.sequence),
        proof: Some(committed.proof.to_hex()),
        transfer,
    }
}
