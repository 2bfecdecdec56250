use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use quill_core::alert::AlertLog;
use quill_core::api::MemoryTaskApi;
use quill_core::interval::{DateInterval, IntervalSet};
use quill_core::store::{Bucket, TaskStore};
use quill_core::task::{Task, TaskDraft};
use uuid::Uuid;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
        .single()
        .expect("valid instant")
}

fn interval() -> impl Strategy<Value = DateInterval> {
    (0i64..10_000, 0i64..500).prop_map(|(offset, len)| {
        let start = epoch() + Duration::minutes(offset);
        DateInterval::new(start, start + Duration::minutes(len)).expect("ordered")
    })
}

fn interval_set() -> impl Strategy<Value = IntervalSet> {
    prop::collection::vec(interval(), 0..8).prop_map(IntervalSet::from_intervals)
}

proptest! {
    #[test]
    fn union_is_idempotent_and_commutative(a in interval_set(), b in interval_set()) {
        let ab = a.union(&b);
        prop_assert!(ab.is_normalized());
        prop_assert_eq!(ab.union(&ab), ab.clone());
        prop_assert_eq!(&ab, &b.union(&a));
    }

    #[test]
    fn xor_with_self_and_empty(a in interval_set()) {
        prop_assert!(a.xor(&a).is_empty());
        prop_assert_eq!(a.xor(&IntervalSet::new()), a.clone());
        prop_assert!(a.xor(&IntervalSet::new()).is_normalized());
    }

    #[test]
    fn difference_and_intersection_partition(a in interval_set(), b in interval_set()) {
        let only_a = a.difference(&b);
        let both = a.intersection(&b);
        prop_assert!(only_a.is_normalized());
        prop_assert!(both.is_normalized());
        prop_assert!(only_a.intersection(&b).is_empty());
        prop_assert_eq!(only_a.union(&both), a.clone());
    }

    #[test]
    fn raw_input_normalises(raw in prop::collection::vec(interval(), 0..12)) {
        let set = IntervalSet::from_intervals(raw.clone());
        prop_assert!(set.is_normalized());
        for range in raw.iter().filter(|range| !range.is_empty()) {
            prop_assert!(set.covers(range));
        }
    }

    #[test]
    fn every_task_lands_in_exactly_one_bucket(
        shapes in prop::collection::vec(
            (-3_000i64..3_000, proptest::option::of(0i64..3_000), any::<bool>()),
            0..20,
        ),
        now_offset in 0i64..1_440,
    ) {
        let now = epoch() + Duration::days(10) + Duration::minutes(now_offset);
        let tasks: Vec<Task> = shapes
            .iter()
            .map(|&(due_offset, start_before, complete)| {
                let due = now + Duration::minutes(due_offset);
                let mut draft = TaskDraft::new("p", due);
                if let Some(before) = start_before {
                    draft = draft.with_start(due - Duration::minutes(before));
                }
                let mut task = Task::from_draft(Uuid::new_v4(), draft, now);
                task.set_complete(complete, now);
                task
            })
            .collect();

        let mut store = TaskStore::new(MemoryTaskApi::with_tasks(tasks.clone()), AlertLog::new());
        store.load().expect("load");
        let buckets = store.by_status(now);
        prop_assert_eq!(buckets.total(), tasks.len());

        for task in &tasks {
            let holders = Bucket::ALL
                .iter()
                .filter(|bucket| buckets.get(**bucket).iter().any(|t| t.id == task.id))
                .count();
            prop_assert_eq!(holders, 1);
            prop_assert_eq!(buckets.bucket_of(task.id), Some(Bucket::classify(task, now)));
            prop_assert_eq!(task.due <= now, buckets.bucket_of(task.id) == Some(Bucket::Overdue));
        }
    }
}
