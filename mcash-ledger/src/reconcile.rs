//! Shadow store repair from the ledger's commit history.
//!
//! The operator commits first and mirrors second, so a crash in between
//! leaves the shadow store one or more transitions behind. Every committed
//! entry carries its update list, which is enough to roll the shadow store
//! forward until its roots match the ledger again.

use serde::Serialize;
use tracing::{info, warn};

use crate::error::LedgerError;
use crate::ledger::{CommitmentLedger, CommittedTransition};
use crate::nullifier::ReplayGuard;
use crate::roots::{MapKind, Roots};
use crate::shadow::ShadowStore;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Committed transitions re-applied to the shadow store.
    pub replayed: usize,
    /// Whether the shadow store was rebuilt from genesis.
    pub rebuilt: bool,
    /// Committed nullifier marks that were missing locally.
    pub remarked: usize,
    /// Roots after reconciliation, `None` before genesis.
    pub roots: Option<Roots>,
}

/// Bring `shadow` back in line with the ledger's committed roots and
/// nullifier marks.
pub fn reconcile(
    shadow: &mut ShadowStore,
    ledger: &dyn CommitmentLedger,
) -> Result<ReconcileReport, LedgerError> {
    let Some(committed) = ledger.roots() else {
        return Ok(ReconcileReport {
            replayed: 0,
            rebuilt: false,
            remarked: 0,
            roots: None,
        });
    };
    let history = ledger.history();

    let mut report = ReconcileReport {
        replayed: 0,
        rebuilt: false,
        remarked: 0,
        roots: Some(committed),
    };

    let local = shadow.roots();
    if local != committed {
        warn!(
            local_settled = %mcash_common::fr_to_hex(&local.settled),
            committed_settled = %mcash_common::fr_to_hex(&committed.settled),
            "shadow store behind ledger, reconciling"
        );
        let start = match history.iter().rposition(|entry| entry.new_roots == local) {
            Some(position) => position + 1,
            None => {
                warn!("no committed entry matches shadow roots, rebuilding from genesis");
                shadow.clear()?;
                report.rebuilt = true;
                0
            }
        };
        report.replayed = replay(shadow, &history[start..])?;
        if shadow.roots() != committed {
            return Err(LedgerError::ShadowDivergence(
                "replayed history does not reach the committed roots".into(),
            ));
        }
    }

    // Marks are mirrored after the map writes of the same commit.
    for entry in &history {
        for update in entry.updates.iter().filter(|u| u.map == MapKind::Nullifier) {
            if !shadow.check(&update.key) {
                shadow.mark(update.key)?;
                report.remarked += 1;
            }
        }
    }

    if report.replayed > 0 || report.remarked > 0 {
        info!(
            replayed = report.replayed,
            rebuilt = report.rebuilt,
            remarked = report.remarked,
            "shadow store reconciled with ledger"
        );
    }
    Ok(report)
}

fn replay(shadow: &mut ShadowStore, pending: &[CommittedTransition]) -> Result<usize, LedgerError> {
    for entry in pending {
        shadow.apply(&entry.updates)?;
        if shadow.roots() != entry.new_roots {
            return Err(LedgerError::ShadowDivergence(format!(
                "replaying {} at sequence {} produced unexpected roots",
                entry.kind, entry.sequence
            )));
        }
    }
    Ok(pending.len())
}
