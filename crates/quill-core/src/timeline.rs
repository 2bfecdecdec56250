//! Calendar-shaped view over the task collection.
//!
//! A [`Timeline`] materialises one [`Day`] per local calendar day of the
//! visible window. Which days exist is tracked as an [`IntervalSet`]; moving
//! the window only builds the days that came into view and drops the ones
//! that left it. The loaded set always equals the union of the loaded days'
//! intervals.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, instrument, trace};
use uuid::Uuid;

use crate::datetime::{start_of_local_day, to_project_date};
use crate::error::TimelineError;
use crate::interval::{DateInterval, IntervalSet};
use crate::store::{StoreEvent, bucket_order};
use crate::task::Task;

/// Largest number of days one request may materialise.
pub const MAX_WINDOW_DAYS: i64 = 5000;

/// One local calendar day and the tasks that concern it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Day {
    date: NaiveDate,
    interval: DateInterval,
    due: Vec<Task>,
    working: Vec<Task>,
}

impl Day {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            interval: DateInterval::day(date),
            due: Vec::new(),
            working: Vec::new(),
        }
    }

    pub fn build<'a, I>(date: NaiveDate, tasks: I) -> Self
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let mut day = Self::new(date);
        for task in tasks {
            day.admit(task);
        }
        day
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn interval(&self) -> &DateInterval {
        &self.interval
    }

    /// Tasks due on this day.
    pub fn due_tasks(&self) -> &[Task] {
        &self.due
    }

    /// Tasks due on another day whose work span covers part of this one.
    pub fn working_tasks(&self) -> &[Task] {
        &self.working
    }

    pub fn is_empty(&self) -> bool {
        self.due.is_empty() && self.working.is_empty()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.interval.contains(instant)
    }

    /// File `task` under this day if it belongs here. Returns whether it
    /// was kept.
    pub fn admit(&mut self, task: &Task) -> bool {
        let list = if self.interval.contains(task.due) {
            &mut self.due
        } else if task
            .work_interval()
            .is_some_and(|span| span.overlaps(&self.interval))
        {
            &mut self.working
        } else {
            return false;
        };

        let pos = list
            .binary_search_by(|probe| bucket_order(probe, task))
            .unwrap_or_else(|pos| pos);
        list.insert(pos, task.clone());
        true
    }

    pub fn forget(&mut self, id: Uuid) -> bool {
        let before = self.due.len() + self.working.len();
        self.due.retain(|task| task.id != id);
        self.working.retain(|task| task.id != id);
        before != self.due.len() + self.working.len()
    }
}

/// Days that came into and went out of view after a window change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowChange {
    pub loaded: Vec<NaiveDate>,
    pub evicted: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct Timeline {
    days: BTreeMap<NaiveDate, Day>,
    loaded: IntervalSet,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(&self) -> &IntervalSet {
        &self.loaded
    }

    pub fn days(&self) -> impl Iterator<Item = &Day> {
        self.days.values()
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn day(&self, date: NaiveDate) -> Option<&Day> {
        self.days.get(&date)
    }

    /// The loaded day containing `instant`.
    pub fn day_for(&self, instant: DateTime<Utc>) -> Option<&Day> {
        self.days
            .get(&to_project_date(instant))
            .filter(|day| day.contains(instant))
    }

    /// Loaded days intersecting `window`, in date order.
    pub fn window_days(&self, window: &DateInterval) -> Vec<&Day> {
        self.days
            .values()
            .filter(|day| day.interval.overlaps(window))
            .collect()
    }

    /// Make exactly the days of `requested` loaded: build the ones not yet
    /// loaded and evict the ones outside it.
    #[instrument(skip(self, tasks), fields(requested = %requested))]
    pub fn show<'a, I>(
        &mut self,
        requested: DateInterval,
        tasks: I,
    ) -> Result<WindowChange, TimelineError>
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let window = checked_window(&requested)?;
        let wanted = IntervalSet::single(window);
        let to_load = wanted.difference(&self.loaded);
        let to_evict = self.loaded.difference(&wanted);
        debug!(
            load = to_load.len(),
            evict = to_evict.len(),
            "computed window delta"
        );

        let mut change = WindowChange::default();
        for range in to_evict.iter() {
            change.evicted.extend(self.evict(range));
        }
        change.loaded = self.materialise(&to_load, tasks);
        debug_assert_eq!(self.loaded, wanted);
        Ok(change)
    }

    /// Load whatever part of `requested` is missing, keep everything else
    /// that is loaded, and return the days intersecting `requested`.
    #[instrument(skip(self, tasks), fields(requested = %requested))]
    pub fn days_in_interval<'a, I>(
        &mut self,
        requested: DateInterval,
        tasks: I,
    ) -> Result<Vec<&Day>, TimelineError>
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let window = checked_window(&requested)?;
        let missing = IntervalSet::single(window).difference(&self.loaded);
        self.materialise(&missing, tasks);
        Ok(self.window_days(&requested))
    }

    /// Evict every loaded day that `range` fully covers.
    #[instrument(skip(self), fields(range = %range))]
    pub fn unload(&mut self, range: DateInterval) -> Vec<NaiveDate> {
        self.evict(&range)
    }

    /// Keep loaded days current after a store change. A reload rebuilds
    /// every loaded day.
    pub fn apply(&mut self, event: &StoreEvent) {
        match event {
            StoreEvent::Loaded(tasks) => self.refresh(tasks),
            StoreEvent::Created(task) => self.place(task),
            StoreEvent::Updated { before, after } => {
                self.remove_task(before.id);
                self.place(after);
            }
            StoreEvent::Deleted(task) => self.remove_task(task.id),
            StoreEvent::RolledBack(inner) => self.apply(inner),
            StoreEvent::FocusChanged(_) => {}
        }
    }

    /// Rebuild every loaded day from `tasks`.
    pub fn refresh<'a, I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = &'a Task>,
    {
        let tasks: Vec<&Task> = tasks.into_iter().collect();
        for day in self.days.values_mut() {
            *day = Day::build(day.date, tasks.iter().copied());
        }
        debug!(days = self.days.len(), "refreshed loaded days");
    }

    fn materialise<'a, I>(&mut self, ranges: &IntervalSet, tasks: I) -> Vec<NaiveDate>
    where
        I: IntoIterator<Item = &'a Task>,
    {
        if ranges.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<&Task> = tasks
            .into_iter()
            .filter(|task| ranges.iter().any(|range| touches_range(task, range)))
            .collect();

        let mut built = Vec::new();
        for range in ranges.iter() {
            for date in range.dates() {
                let day = Day::build(date, candidates.iter().copied());
                trace!(%date, due = day.due.len(), working = day.working.len(), "built day");
                self.loaded.insert(day.interval);
                self.days.insert(date, day);
                built.push(date);
            }
        }
        built
    }

    fn evict(&mut self, range: &DateInterval) -> Vec<NaiveDate> {
        let doomed: Vec<NaiveDate> = self
            .days
            .values()
            .filter(|day| range.engulfs(&day.interval))
            .map(|day| day.date)
            .collect();

        for date in &doomed {
            if let Some(day) = self.days.remove(date) {
                self.loaded.remove(day.interval);
            }
        }
        trace!(count = doomed.len(), "evicted days");
        doomed
    }

    fn place(&mut self, task: &Task) {
        let first = to_project_date(task.start.map_or(task.due, |start| start.min(task.due)));
        let last = to_project_date(task.due);
        for day in self.days.range_mut(first..=last).map(|(_, day)| day) {
            day.admit(task);
        }
    }

    fn remove_task(&mut self, id: Uuid) {
        for day in self.days.values_mut() {
            day.forget(id);
        }
    }
}

fn touches_range(task: &Task, range: &DateInterval) -> bool {
    task.falls_within(range)
        || task
            .work_interval()
            .is_some_and(|span| span.overlaps(range))
}

fn checked_window(requested: &DateInterval) -> Result<DateInterval, TimelineError> {
    if requested.is_empty() {
        return Err(TimelineError::EmptyWindow);
    }

    let first = to_project_date(requested.start());
    let last = to_project_date(requested.end());
    let trailing = i64::from(start_of_local_day(last) != requested.end());
    let days = (last - first).num_days() + trailing;
    if days > MAX_WINDOW_DAYS {
        return Err(TimelineError::WindowTooLarge {
            days,
            max: MAX_WINDOW_DAYS,
        });
    }

    Ok(requested.whole_days())
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::task::TaskDraft;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 4, day).expect("valid date")
    }

    fn days(from: u32, to: u32) -> DateInterval {
        DateInterval::new(start_of_local_day(date(from)), start_of_local_day(date(to)))
            .expect("ordered window")
    }

    fn task_due(day: u32, hour: i64) -> Task {
        let due = start_of_local_day(date(day)) + Duration::hours(hour);
        let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).single().expect("now");
        Task::from_draft(Uuid::new_v4(), TaskDraft::new("t", due), now)
    }

    #[test]
    fn show_materialises_each_day_with_its_due_tasks() {
        let a = task_due(3, 9);
        let b = task_due(5, 17);
        let mut timeline = Timeline::new();
        let change = timeline.show(days(2, 6), [&a, &b]).expect("show");

        assert_eq!(change.loaded, vec![date(2), date(3), date(4), date(5)]);
        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline.day(date(3)).expect("day 3").due_tasks(), &[a]);
        assert_eq!(timeline.day(date(5)).expect("day 5").due_tasks(), &[b]);
        assert!(timeline.day(date(4)).expect("day 4").is_empty());
    }

    #[test]
    fn shifting_window_only_touches_delta() {
        let mut timeline = Timeline::new();
        timeline.show(days(1, 8), std::iter::empty()).expect("first window");

        let change = timeline.show(days(4, 11), std::iter::empty()).expect("second window");
        assert_eq!(change.evicted, vec![date(1), date(2), date(3)]);
        assert_eq!(change.loaded, vec![date(8), date(9), date(10)]);
        assert_eq!(timeline.loaded(), &IntervalSet::single(days(4, 11)));
    }

    #[test]
    fn working_span_marks_intermediate_days() {
        let mut task = task_due(6, 12);
        task.start = Some(start_of_local_day(date(4)) + Duration::hours(9));
        let mut timeline = Timeline::new();
        timeline.show(days(3, 8), [&task]).expect("show");

        assert!(timeline.day(date(3)).expect("day 3").is_empty());
        assert_eq!(timeline.day(date(4)).expect("day 4").working_tasks().len(), 1);
        assert_eq!(timeline.day(date(5)).expect("day 5").working_tasks().len(), 1);
        assert_eq!(timeline.day(date(6)).expect("day 6").due_tasks().len(), 1);
    }

    #[test]
    fn rejects_empty_and_oversized_windows() {
        let mut timeline = Timeline::new();
        let instant = start_of_local_day(date(1));
        let empty = DateInterval::new(instant, instant).expect("empty");
        assert_eq!(
            timeline.show(empty, std::iter::empty()),
            Err(TimelineError::EmptyWindow)
        );

        let huge = DateInterval::new(instant, instant + Duration::days(MAX_WINDOW_DAYS + 1))
            .expect("huge");
        assert!(matches!(
            timeline.show(huge, std::iter::empty()),
            Err(TimelineError::WindowTooLarge { .. })
        ));
        assert!(timeline.is_empty());
    }

    #[test]
    fn days_in_interval_keeps_previous_days() {
        let mut timeline = Timeline::new();
        timeline.show(days(1, 3), std::iter::empty()).expect("show");
        let found = timeline
            .days_in_interval(days(5, 7), std::iter::empty())
            .expect("days");
        assert_eq!(found.len(), 2);
        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline.loaded().len(), 2);
    }

    #[test]
    fn unload_removes_only_engulfed_days() {
        let mut timeline = Timeline::new();
        timeline.show(days(1, 6), std::iter::empty()).expect("show");
        let partial = DateInterval::new(
            start_of_local_day(date(2)) + Duration::hours(12),
            start_of_local_day(date(4)),
        )
        .expect("range");
        assert_eq!(timeline.unload(partial), vec![date(3)]);
        assert_eq!(timeline.loaded().len(), 2);
        assert!(timeline.loaded().is_normalized());
    }

    #[test]
    fn store_events_move_tasks_between_days() {
        let task = task_due(2, 10);
        let mut timeline = Timeline::new();
        timeline.show(days(1, 5), std::iter::empty()).expect("show");

        timeline.apply(&StoreEvent::Created(task.clone()));
        assert_eq!(timeline.day(date(2)).expect("day 2").due_tasks().len(), 1);

        let mut moved = task.clone();
        moved.due = start_of_local_day(date(4)) + Duration::hours(8);
        timeline.apply(&StoreEvent::Updated {
            before: task.clone(),
            after: moved.clone(),
        });
        assert!(timeline.day(date(2)).expect("day 2").is_empty());
        assert_eq!(timeline.day(date(4)).expect("day 4").due_tasks(), &[moved.clone()]);

        timeline.apply(&StoreEvent::RolledBack(Box::new(StoreEvent::Deleted(moved))));
        assert!(timeline.days().all(Day::is_empty));
    }

    #[test]
    fn reload_event_rebuilds_loaded_days() {
        let kept = task_due(2, 9);
        let dropped = task_due(3, 9);
        let mut timeline = Timeline::new();
        timeline
            .show(days(1, 5), [&kept, &dropped])
            .expect("show");

        let added = task_due(4, 15);
        timeline.apply(&StoreEvent::Loaded(vec![kept.clone(), added.clone()]));

        assert_eq!(timeline.day(date(2)).expect("day 2").due_tasks(), &[kept]);
        assert!(timeline.day(date(3)).expect("day 3").is_empty());
        assert_eq!(timeline.day(date(4)).expect("day 4").due_tasks(), &[added]);
        assert_eq!(timeline.len(), 4);
    }

    #[test]
    fn day_for_finds_loaded_day() {
        let mut timeline = Timeline::new();
        timeline.show(days(1, 3), std::iter::empty()).expect("show");
        let noon = start_of_local_day(date(2)) + Duration::hours(12);
        assert_eq!(timeline.day_for(noon).map(Day::date), Some(date(2)));
        assert!(timeline.day_for(start_of_local_day(date(9))).is_none());
    }
}
