use super::error::{ReconcileError, ReconcileResult};
use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::fmt::Display;
use std::time::Instant;

/// One join row linking owner `owner_id` to target `target_id`.
///
/// Rows carry their own `id` so removals target exact rows instead of
/// matching on the `(owner, target)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Association<O, T, L> {
    pub id: L,
    pub owner_id: O,
    pub target_id: T,
}

/// Read/write capabilities available inside a store transaction.
pub trait AssociationWriter<O, T, L> {
    /// Reads the live join rows of one owner under the transaction's locks.
    fn find_associations(&mut self, owner_id: O) -> ReconcileResult<Vec<Association<O, T, L>>>;
    /// Deletes join rows by their own id and returns how many were removed.
    fn bulk_delete(&mut self, ids: &[L]) -> ReconcileResult<usize>;
    /// Inserts one join row per `(owner, target)` pair and returns the count.
    fn bulk_insert(&mut self, rows: &[(O, T)]) -> ReconcileResult<usize>;
}

/// Persistence capabilities consumed by [`RelationReconciler`].
pub trait AssociationStore {
    type OwnerId: Copy + Display;
    type TargetId: Copy + Ord + Display;
    type LinkId: Copy + Display;

    /// Reads the live join rows of one owner.
    fn find_associations(
        &self,
        owner_id: Self::OwnerId,
    ) -> ReconcileResult<Vec<Association<Self::OwnerId, Self::TargetId, Self::LinkId>>>;

    /// Runs `work` atomically: commits when it returns `Ok`, rolls back
    /// every write otherwise.
    fn run_in_transaction<R, F>(&mut self, work: F) -> ReconcileResult<R>
    where
        F: FnOnce(
            &mut dyn AssociationWriter<Self::OwnerId, Self::TargetId, Self::LinkId>,
        ) -> ReconcileResult<R>;
}

/// Minimal diff between live join rows and a desired target set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilePlan<O, T, L> {
    /// Desired targets with no live row, ascending.
    pub to_add: Vec<T>,
    /// Live rows whose target is not desired, plus surplus duplicate rows.
    pub to_remove: Vec<Association<O, T, L>>,
}

impl<O, T, L> ReconcilePlan<O, T, L> {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Result of one successful reconcile call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome<T> {
    /// No desired set was supplied; nothing was read or written.
    Skipped,
    /// Live rows already matched the desired set; nothing was written.
    Unchanged,
    /// The diff was committed.
    Applied { added: Vec<T>, removed: Vec<T> },
}

impl<T> ReconcileOutcome<T> {
    /// Number of join rows inserted plus deleted.
    pub fn write_count(&self) -> usize {
        match self {
            Self::Skipped | Self::Unchanged => 0,
            Self::Applied { added, removed } => added.len() + removed.len(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Skipped => "skipped",
            Self::Unchanged => "unchanged",
            Self::Applied { .. } => "applied",
        }
    }
}

/// Computes the insert/delete diff for one owner without touching storage.
///
/// When `current` holds more than one row for a desired target, the first
/// row is kept and the rest are scheduled for removal.
pub fn plan_reconciliation<O, T, L>(
    current: &[Association<O, T, L>],
    desired: &BTreeSet<T>,
) -> ReconcilePlan<O, T, L>
where
    O: Copy,
    T: Ord + Copy,
    L: Copy,
{
    let mut kept = BTreeSet::new();
    let mut to_remove = Vec::new();
    for association in current {
        if !desired.contains(&association.target_id) || !kept.insert(association.target_id) {
            to_remove.push(*association);
        }
    }

    let to_add = desired.difference(&kept).copied().collect();
    ReconcilePlan { to_add, to_remove }
}

/// Brings the join rows of one owner into exact correspondence with a
/// desired target set.
pub struct RelationReconciler<S: AssociationStore> {
    store: S,
}

impl<S: AssociationStore> RelationReconciler<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reconciles `owner_id` against `desired`.
    ///
    /// `None` leaves the owner untouched; `Some(&[])` removes every row.
    /// Duplicate ids in `desired` collapse.
    ///
    /// # Errors
    /// - `Persistence` when the read fails or storage rejects a write.
    /// - `Conflict` when a concurrent writer for the same owner interfered.
    /// - `Transaction` when begin/commit/rollback fails.
    pub fn reconcile(
        &mut self,
        owner_id: S::OwnerId,
        desired: Option<&[S::TargetId]>,
    ) -> ReconcileResult<ReconcileOutcome<S::TargetId>> {
        self.reconcile_inner(owner_id, desired, None)
    }

    /// Same as [`Self::reconcile`], but fails with `Cancelled` and commits
    /// nothing once `deadline` has passed.
    pub fn reconcile_with_deadline(
        &mut self,
        owner_id: S::OwnerId,
        desired: Option<&[S::TargetId]>,
        deadline: Instant,
    ) -> ReconcileResult<ReconcileOutcome<S::TargetId>> {
        self.reconcile_inner(owner_id, desired, Some(deadline))
    }

    /// Reads the live rows of `owner_id` and diffs them against `desired`.
    pub fn plan(
        &self,
        owner_id: S::OwnerId,
        desired: &[S::TargetId],
    ) -> ReconcileResult<ReconcilePlan<S::OwnerId, S::TargetId, S::LinkId>> {
        let desired = desired.iter().copied().collect::<BTreeSet<_>>();
        let current = self.store.find_associations(owner_id)?;
        Ok(plan_reconciliation(&current, &desired))
    }

    /// Applies a plan computed earlier.
    ///
    /// A plan whose rows were removed concurrently fails with `Conflict`, as
    /// does a plan adding a target another writer already linked.
    pub fn apply_plan(
        &mut self,
        owner_id: S::OwnerId,
        plan: &ReconcilePlan<S::OwnerId, S::TargetId, S::LinkId>,
    ) -> ReconcileResult<ReconcileOutcome<S::TargetId>> {
        self.apply(owner_id, plan, None)
    }

    fn reconcile_inner(
        &mut self,
        owner_id: S::OwnerId,
        desired: Option<&[S::TargetId]>,
        deadline: Option<Instant>,
    ) -> ReconcileResult<ReconcileOutcome<S::TargetId>> {
        let Some(desired) = desired else {
            debug!("event=reconcile module=reconcile status=skipped owner_id={owner_id}");
            return Ok(ReconcileOutcome::Skipped);
        };

        let started_at = Instant::now();
        let desired = desired.iter().copied().collect::<BTreeSet<_>>();
        let result = check_deadline(deadline)
            .and_then(|()| self.reconcile_set(owner_id, &desired, deadline));

        match &result {
            Ok(outcome @ ReconcileOutcome::Applied { added, removed }) => info!(
                "event=reconcile module=reconcile status={} owner_id={} added={} removed={} duration_ms={}",
                outcome.label(),
                owner_id,
                added.len(),
                removed.len(),
                started_at.elapsed().as_millis()
            ),
            Ok(outcome) => debug!(
                "event=reconcile module=reconcile status={} owner_id={} duration_ms={}",
                outcome.label(),
                owner_id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=reconcile module=reconcile status=error owner_id={} error_kind={} duration_ms={} error={}",
                owner_id,
                err.kind(),
                started_at.elapsed().as_millis(),
                err
            ),
        }

        result
    }

    fn reconcile_set(
        &mut self,
        owner_id: S::OwnerId,
        desired: &BTreeSet<S::TargetId>,
        deadline: Option<Instant>,
    ) -> ReconcileResult<ReconcileOutcome<S::TargetId>> {
        // Unlocked pre-read keeps the common no-op path out of the write lock.
        let current = self.store.find_associations(owner_id)?;
        if plan_reconciliation(&current, desired).is_empty() {
            return Ok(ReconcileOutcome::Unchanged);
        }
        check_deadline(deadline)?;

        self.store.run_in_transaction(|writer| {
            let current = writer.find_associations(owner_id)?;
            let plan = plan_reconciliation(&current, desired);
            if plan.is_empty() {
                return Ok(ReconcileOutcome::Unchanged);
            }
            write_plan(writer, owner_id, &plan)?;
            check_deadline(deadline)?;
            Ok(applied_outcome(&plan))
        })
    }

    fn apply(
        &mut self,
        owner_id: S::OwnerId,
        plan: &ReconcilePlan<S::OwnerId, S::TargetId, S::LinkId>,
        deadline: Option<Instant>,
    ) -> ReconcileResult<ReconcileOutcome<S::TargetId>> {
        if plan.is_empty() {
            return Ok(ReconcileOutcome::Unchanged);
        }
        check_deadline(deadline)?;

        self.store.run_in_transaction(|writer| {
            write_plan(writer, owner_id, plan)?;
            check_deadline(deadline)?;
            Ok(applied_outcome(plan))
        })
    }
}

/// Deletes first, then inserts. A short delete count means another writer
/// removed rows this plan still expected.
fn write_plan<O, T, L>(
    writer: &mut dyn AssociationWriter<O, T, L>,
    owner_id: O,
    plan: &ReconcilePlan<O, T, L>,
) -> ReconcileResult<()>
where
    O: Copy + Display,
    T: Copy,
    L: Copy,
{
    if !plan.to_remove.is_empty() {
        let remove_ids = plan.to_remove.iter().map(|row| row.id).collect::<Vec<_>>();
        let removed = writer.bulk_delete(&remove_ids)?;
        if removed != remove_ids.len() {
            return Err(ReconcileError::Conflict(format!(
                "owner {owner_id}: expected to delete {} association rows, storage deleted {removed}",
                remove_ids.len()
            )));
        }
    }

    if !plan.to_add.is_empty() {
        let insert_rows = plan
            .to_add
            .iter()
            .map(|target_id| (owner_id, *target_id))
            .collect::<Vec<_>>();
        writer.bulk_insert(&insert_rows)?;
    }

    Ok(())
}

fn applied_outcome<O, T: Copy, L>(plan: &ReconcilePlan<O, T, L>) -> ReconcileOutcome<T> {
    ReconcileOutcome::Applied {
        added: plan.to_add.clone(),
        removed: plan.to_remove.iter().map(|row| row.target_id).collect(),
    }
}

fn check_deadline(deadline: Option<Instant>) -> ReconcileResult<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(ReconcileError::Cancelled),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        plan_reconciliation, Association, AssociationStore, AssociationWriter, ReconcileOutcome,
        RelationReconciler,
    };
    use crate::reconcile::{ReconcileError, ReconcileResult};
    use std::cell::Cell;
    use std::collections::BTreeSet;
    use std::time::{Duration, Instant};

    type Link = Association<i64, i64, i64>;

    const OWNER: i64 = 7;

    #[derive(Default)]
    struct MemoryStore {
        rows: Vec<Link>,
        next_id: i64,
        finds: Cell<usize>,
        transactions: usize,
        inserted: usize,
        deleted: usize,
        fail_inserts: bool,
    }

    impl MemoryStore {
        fn with_targets(owner_id: i64, targets: &[i64]) -> Self {
            let mut store = Self::default();
            for target_id in targets {
                store.push(owner_id, *target_id);
            }
            store
        }

        fn push(&mut self, owner_id: i64, target_id: i64) {
            self.next_id += 1;
            self.rows.push(Association {
                id: self.next_id,
                owner_id,
                target_id,
            });
        }

        fn targets(&self, owner_id: i64) -> Vec<i64> {
            let mut targets = self
                .rows
                .iter()
                .filter(|row| row.owner_id == owner_id)
                .map(|row| row.target_id)
                .collect::<Vec<_>>();
            targets.sort_unstable();
            targets
        }

        fn writes(&self) -> usize {
            self.inserted + self.deleted
        }
    }

    struct MemoryWriter<'a> {
        rows: &'a mut Vec<Link>,
        next_id: &'a mut i64,
        inserted: &'a mut usize,
        deleted: &'a mut usize,
        fail_inserts: bool,
    }

    impl AssociationWriter<i64, i64, i64> for MemoryWriter<'_> {
        fn find_associations(&mut self, owner_id: i64) -> ReconcileResult<Vec<Link>> {
            Ok(self
                .rows
                .iter()
                .filter(|row| row.owner_id == owner_id)
                .copied()
                .collect())
        }

        fn bulk_delete(&mut self, ids: &[i64]) -> ReconcileResult<usize> {
            let before = self.rows.len();
            self.rows.retain(|row| !ids.contains(&row.id));
            let removed = before - self.rows.len();
            *self.deleted += removed;
            Ok(removed)
        }

        fn bulk_insert(&mut self, rows: &[(i64, i64)]) -> ReconcileResult<usize> {
            if self.fail_inserts {
                return Err(ReconcileError::Persistence("injected insert failure".into()));
            }
            for (owner_id, target_id) in rows {
                if self
                    .rows
                    .iter()
                    .any(|row| row.owner_id == *owner_id && row.target_id == *target_id)
                {
                    return Err(ReconcileError::Conflict(format!(
                        "duplicate ({owner_id}, {target_id})"
                    )));
                }
                *self.next_id += 1;
                self.rows.push(Association {
                    id: *self.next_id,
                    owner_id: *owner_id,
                    target_id: *target_id,
                });
                *self.inserted += 1;
            }
            Ok(rows.len())
        }
    }

    impl AssociationStore for MemoryStore {
        type OwnerId = i64;
        type TargetId = i64;
        type LinkId = i64;

        fn find_associations(&self, owner_id: i64) -> ReconcileResult<Vec<Link>> {
            self.finds.set(self.finds.get() + 1);
            Ok(self
                .rows
                .iter()
                .filter(|row| row.owner_id == owner_id)
                .copied()
                .collect())
        }

        fn run_in_transaction<R, F>(&mut self, work: F) -> ReconcileResult<R>
        where
            F: FnOnce(&mut dyn AssociationWriter<i64, i64, i64>) -> ReconcileResult<R>,
        {
            self.transactions += 1;
            let snapshot = (self.rows.clone(), self.next_id);
            let mut writer = MemoryWriter {
                rows: &mut self.rows,
                next_id: &mut self.next_id,
                inserted: &mut self.inserted,
                deleted: &mut self.deleted,
                fail_inserts: self.fail_inserts,
            };
            let result = work(&mut writer);
            if result.is_err() {
                (self.rows, self.next_id) = snapshot;
            }
            result
        }
    }

    fn desired(ids: &[i64]) -> BTreeSet<i64> {
        ids.iter().copied().collect()
    }

    #[test]
    fn plan_adds_missing_and_removes_stale_targets() {
        let store = MemoryStore::with_targets(OWNER, &[1, 2, 3]);
        let plan = plan_reconciliation(&store.rows, &desired(&[2, 3, 4]));

        assert_eq!(plan.to_add, vec![4]);
        assert_eq!(plan.to_remove.len(), 1);
        assert_eq!(plan.to_remove[0].target_id, 1);
    }

    #[test]
    fn plan_removes_surplus_duplicate_rows_but_keeps_first() {
        let store = MemoryStore::with_targets(OWNER, &[5, 5, 6]);
        let plan = plan_reconciliation(&store.rows, &desired(&[5, 6]));

        assert!(plan.to_add.is_empty());
        assert_eq!(plan.to_remove.len(), 1);
        assert_eq!(plan.to_remove[0].id, 2);
    }

    #[test]
    fn reconcile_applies_minimal_diff() {
        let mut reconciler = RelationReconciler::new(MemoryStore::with_targets(OWNER, &[1, 2, 3]));

        let outcome = reconciler.reconcile(OWNER, Some(&[2, 3, 4])).unwrap();
        assert_eq!(
            outcome,
            ReconcileOutcome::Applied {
                added: vec![4],
                removed: vec![1],
            }
        );

        let store = reconciler.store();
        assert_eq!(store.targets(OWNER), vec![2, 3, 4]);
        assert_eq!(store.inserted, 1);
        assert_eq!(store.deleted, 1);
        assert_eq!(store.transactions, 1);
    }

    #[test]
    fn reconcile_keeps_untouched_rows_identity() {
        let mut reconciler = RelationReconciler::new(MemoryStore::with_targets(OWNER, &[1, 2]));
        let before = reconciler.store().rows.clone();

        reconciler.reconcile(OWNER, Some(&[2, 9])).unwrap();

        let kept = reconciler
            .store()
            .rows
            .iter()
            .find(|row| row.target_id == 2)
            .copied()
            .expect("target 2 should stay linked");
        assert_eq!(Some(kept), before.iter().find(|row| row.target_id == 2).copied());
    }

    #[test]
    fn absent_desired_set_skips_without_reading() {
        let mut reconciler = RelationReconciler::new(MemoryStore::with_targets(OWNER, &[1]));

        let outcome = reconciler.reconcile(OWNER, None).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Skipped);
        assert_eq!(reconciler.store().finds.get(), 0);
        assert_eq!(reconciler.store().targets(OWNER), vec![1]);
    }

    #[test]
    fn empty_desired_set_removes_every_association() {
        let mut reconciler = RelationReconciler::new(MemoryStore::with_targets(OWNER, &[1, 2]));
        reconciler.store.push(OWNER + 1, 1);

        reconciler.reconcile(OWNER, Some(&[])).unwrap();
        assert!(reconciler.store().targets(OWNER).is_empty());
        assert_eq!(reconciler.store().targets(OWNER + 1), vec![1]);
    }

    #[test]
    fn empty_to_empty_is_a_no_op() {
        let mut reconciler = RelationReconciler::new(MemoryStore::default());

        let outcome = reconciler.reconcile(OWNER, Some(&[])).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert_eq!(reconciler.store().transactions, 0);
        assert_eq!(reconciler.store().writes(), 0);
    }

    #[test]
    fn second_identical_reconcile_writes_nothing() {
        let mut reconciler = RelationReconciler::new(MemoryStore::with_targets(OWNER, &[5]));
        assert_eq!(
            reconciler.reconcile(OWNER, Some(&[5])).unwrap(),
            ReconcileOutcome::Unchanged
        );

        reconciler.reconcile(OWNER, Some(&[5, 6])).unwrap();
        let writes_after_first = reconciler.store().writes();
        let outcome = reconciler.reconcile(OWNER, Some(&[6, 5])).unwrap();

        assert_eq!(outcome, ReconcileOutcome::Unchanged);
        assert_eq!(reconciler.store().writes(), writes_after_first);
        assert_eq!(reconciler.store().targets(OWNER), vec![5, 6]);
    }

    #[test]
    fn duplicate_desired_ids_insert_once() {
        let mut reconciler = RelationReconciler::new(MemoryStore::default());

        let outcome = reconciler.reconcile(OWNER, Some(&[3, 3, 3])).unwrap();
        assert_eq!(outcome.write_count(), 1);
        assert_eq!(reconciler.store().targets(OWNER), vec![3]);
    }

    #[test]
    fn failed_insert_rolls_back_earlier_delete() {
        let mut store = MemoryStore::with_targets(OWNER, &[1, 2]);
        store.fail_inserts = true;
        let mut reconciler = RelationReconciler::new(store);

        let err = reconciler.reconcile(OWNER, Some(&[2, 3])).unwrap_err();
        assert!(matches!(err, ReconcileError::Persistence(_)));
        assert_eq!(reconciler.store().targets(OWNER), vec![1, 2]);
    }

    #[test]
    fn stale_plan_fails_with_conflict_and_changes_nothing() {
        let mut reconciler = RelationReconciler::new(MemoryStore::with_targets(OWNER, &[1, 2]));
        let plan = reconciler.plan(OWNER, &[3]).unwrap();

        reconciler.store.rows.retain(|row| row.target_id != 1);
        let before = reconciler.store().rows.clone();

        let err = reconciler.apply_plan(OWNER, &plan).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(reconciler.store().rows, before);
    }

    #[test]
    fn plan_adding_an_already_linked_target_conflicts() {
        let mut reconciler = RelationReconciler::new(MemoryStore::default());
        let plan = reconciler.plan(OWNER, &[4]).unwrap();

        reconciler.store.push(OWNER, 4);

        let err = reconciler.apply_plan(OWNER, &plan).unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(reconciler.store().targets(OWNER), vec![4]);
    }

    #[test]
    fn expired_deadline_cancels_before_any_write() {
        let mut reconciler = RelationReconciler::new(MemoryStore::with_targets(OWNER, &[1]));
        let deadline = Instant::now()
            .checked_sub(Duration::from_millis(1))
            .unwrap_or_else(Instant::now);

        let err = reconciler
            .reconcile_with_deadline(OWNER, Some(&[2]), deadline)
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Cancelled));
        assert_eq!(reconciler.store().targets(OWNER), vec![1]);
        assert_eq!(reconciler.store().writes(), 0);
    }

    #[test]
    fn generous_deadline_still_applies() {
        let mut reconciler = RelationReconciler::new(MemoryStore::default());
        let deadline = Instant::now() + Duration::from_secs(60);

        let outcome = reconciler
            .reconcile_with_deadline(OWNER, Some(&[1, 2]), deadline)
            .unwrap();
        assert_eq!(outcome.write_count(), 2);
    }
}
