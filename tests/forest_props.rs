use proptest::prelude::*;

use taskit::forest::linearize;
use taskit::model::Task;
use std::collections::HashSet;

use taskit::ops::{DeletePolicy, Outcome};
use taskit::store::Store;
use taskit::validate::{check_forest, Violation};

#[derive(Debug, Clone)]
enum Op {
    Append { bucket: usize },
    Insert { reference: usize },
    Check { task: usize },
    Delete { task: usize },
    Reorder { from: usize, to: usize },
    Promote { task: usize },
    Demote { task: usize, above: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0usize..2).prop_map(|bucket| Op::Append { bucket }),
        2 => any::<usize>().prop_map(|reference| Op::Insert { reference }),
        1 => any::<usize>().prop_map(|task| Op::Check { task }),
        1 => any::<usize>().prop_map(|task| Op::Delete { task }),
        3 => (any::<usize>(), any::<usize>()).prop_map(|(from, to)| Op::Reorder { from, to }),
        2 => any::<usize>().prop_map(|task| Op::Promote { task }),
        3 => (any::<usize>(), any::<usize>()).prop_map(|(task, above)| Op::Demote { task, above }),
    ]
}

struct World {
    store: Store,
    buckets: Vec<i64>,
}

impl World {
    fn new() -> Self {
        Self::with_policy(DeletePolicy::default())
    }

    fn with_policy(policy: DeletePolicy) -> Self {
        let store = Store::open_memory().unwrap().with_delete_policy(policy);
        let buckets = vec![
            store.create_bucket(Some("a")).unwrap().id,
            store.create_bucket(Some("b")).unwrap().id,
        ];
        World { store, buckets }
    }

    fn all_tasks(&self) -> Vec<Task> {
        self.buckets
            .iter()
            .flat_map(|&b| self.store.tasks(b).unwrap())
            .collect()
    }

    /// Pick a task id; ids past the end name tasks that do not exist.
    fn pick(&self, n: usize) -> i64 {
        let tasks = self.all_tasks();
        if tasks.is_empty() || n % 5 == 0 {
            return 10_000 + n as i64 % 100;
        }
        tasks[n % tasks.len()].id
    }

    /// Run `op`; `Some(outcome)` for operations that report one.
    fn run(&self, op: &Op) -> Option<Outcome> {
        let s = &self.store;
        match *op {
            Op::Append { bucket } => {
                s.append_task(self.buckets[bucket], "t").unwrap();
                None
            }
            Op::Insert { reference } => {
                s.insert_task_above(self.pick(reference), "t").unwrap();
                None
            }
            Op::Check { task } => Some(s.update_task_checked(self.pick(task), true).unwrap()),
            Op::Delete { task } => Some(s.delete_task(self.pick(task)).unwrap()),
            Op::Reorder { from, to } => Some(s.reorder_task(self.pick(from), self.pick(to)).unwrap()),
            Op::Promote { task } => Some(s.promote_to_root(self.pick(task)).unwrap()),
            Op::Demote { task, above } => {
                Some(s.demote_to_child(self.pick(task), self.pick(above)).unwrap())
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn random_edits_keep_a_valid_forest(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let world = World::new();
        for op in &ops {
            let before = world.all_tasks();
            let outcome = world.run(op);

            if let Some(Outcome::Skipped(reason)) = outcome {
                prop_assert_eq!(&world.all_tasks(), &before, "{:?} skipped ({}) but changed rows", op, reason);
            }

            for &bucket in &world.buckets {
                let tasks = world.store.tasks(bucket).unwrap();
                let violations = check_forest(&tasks);
                prop_assert!(violations.is_empty(), "after {:?}: {:?}", op, violations);
                prop_assert_eq!(linearize(&tasks).len(), tasks.len(), "unreachable tasks after {:?}", op);
                prop_assert!(tasks.iter().all(|t| t.bucket_id == bucket));
            }
        }
    }

    #[test]
    fn reorder_within_roots_is_a_permutation(n in 2usize..8, from in 0usize..8, to in 0usize..8) {
        let world = World::new();
        let bucket = world.buckets[0];
        let ids: Vec<i64> = (0..n)
            .map(|_| world.store.append_task(bucket, "t").unwrap().unwrap().id)
            .collect();
        let (from, to) = (from % n, to % n);
        world.store.reorder_task(ids[from], ids[to]).unwrap();

        let tasks = world.store.tasks(bucket).unwrap();
        let order: Vec<i64> = linearize(&tasks).iter().map(|t| t.id).collect();
        let mut expected = ids.clone();
        let moved = expected.remove(from);
        expected.insert(to, moved);
        prop_assert_eq!(order, expected);
    }

    #[test]
    fn row_deletes_never_hand_orphans_to_new_tasks(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let world = World::with_policy(DeletePolicy::Row);
        for op in &ops {
            let before = world.all_tasks();
            let outcome = world.run(op);
            let after = world.all_tasks();

            if let Some(Outcome::Skipped(reason)) = outcome {
                prop_assert_eq!(&after, &before, "{:?} skipped ({}) but changed rows", op, reason);
            }

            // A parent is either gone or a task of the same bucket.
            for t in after.iter().filter(|t| !t.is_root()) {
                if let Some(parent) = after.iter().find(|p| p.id == t.parent_id) {
                    prop_assert_eq!(parent.bucket_id, t.bucket_id, "task {} after {:?}", t.id, op);
                }
            }

            let old: HashSet<i64> = before.iter().map(|t| t.id).collect();
            for new in after.iter().filter(|t| !old.contains(&t.id)) {
                prop_assert!(
                    after.iter().all(|t| t.parent_id != new.id),
                    "task {} was created with children after {:?}", new.id, op
                );
            }

            for &bucket in &world.buckets {
                let tasks = world.store.tasks(bucket).unwrap();
                let cycles: Vec<Violation> = check_forest(&tasks)
                    .into_iter()
                    .filter(|v| matches!(v, Violation::Cycle { .. }))
                    .collect();
                prop_assert!(cycles.is_empty(), "after {:?}: {:?}", op, cycles);
            }
        }
    }
}
