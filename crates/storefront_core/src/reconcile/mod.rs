//! Set-difference reconciliation for many-to-many join tables.
//!
//! # Responsibility
//! - Compute the minimal insert/delete diff between the live join rows of one
//!   owner and a caller-supplied desired set of target ids.
//! - Apply that diff through an [`AssociationStore`] inside one transaction.
//!
//! # Invariants
//! - An absent desired set is a no-op; an empty desired set removes every
//!   association of the owner.
//! - Join rows are only inserted or deleted, never rewritten.
//! - Every failure leaves the owner's join rows as they were before the call.
//! - The reconciler holds no state between calls and never retries.

mod error;
mod reconciler;

pub use error::{BoxError, ReconcileError, ReconcileResult};
pub use reconciler::{
    plan_reconciliation, Association, AssociationStore, AssociationWriter, ReconcileOutcome,
    ReconcilePlan, RelationReconciler,
};
