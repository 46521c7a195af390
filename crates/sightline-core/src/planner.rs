//! Collection strategy planner.
//!
//! Given a requested day window and the sources available, computes the
//! smallest gap-free set of [`FetchTask`]s that covers it.
//!
//! # Algorithm
//!
//! The planner walks a cursor from `window_start` to `window_end`:
//!
//! 1. At the cursor, every periodic source whose unit *starts* on that
//!    day, is published as of `as_of`, and ends inside the window is a
//!    candidate. The candidate covering the most days in one fetch wins;
//!    ties go to the lower `cost_weight`, then the coarser unit.
//! 2. If no periodic unit starts at the cursor, the days up to the next
//!    day where one does are handed to a live-poll source. That is allowed
//!    when the slice lies beyond every periodic publication horizon (the
//!    unpublished tail, regardless of the live source's depth) or when the
//!    live source's rolling depth reaches back to the cursor. A periodic
//!    source's horizon is the end of its latest complete published unit,
//!    or the latest published day for a cumulative source.
//! 3. Otherwise planning fails with [`PlanError::UncoverableWindow`].
//!
//! ```text
//! window:   |2024-01-01 ............................................ 2024-04-10|
//! quarterly |========= Q1 (1 fetch) =========|
//! daily                                      |d|d|d|d|d|d|d|d|d|
//! live                                                         |tail|
//! ```

use std::cmp::Reverse;
use std::collections::HashSet;

use chrono::{Datelike, Days, NaiveDate};
use serde::Deserialize;

use crate::error::PlanError;
use crate::models::{FetchTask, SourceKind, SyncPlan};

/// Publication unit of a periodic source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarUnit {
    Day,
    Month,
    Quarter,
    Year,
}

impl CalendarUnit {
    /// First day of the unit containing `day`.
    pub fn start_of(&self, day: NaiveDate) -> Option<NaiveDate> {
        match self {
            CalendarUnit::Day => Some(day),
            CalendarUnit::Month => NaiveDate::from_ymd_opt(day.year(), day.month(), 1),
            CalendarUnit::Quarter => {
                let first_month = (day.month0() / 3) * 3 + 1;
                NaiveDate::from_ymd_opt(day.year(), first_month, 1)
            }
            CalendarUnit::Year => NaiveDate::from_ymd_opt(day.year(), 1, 1),
        }
    }

    /// Last day of the unit containing `day`.
    pub fn end_of(&self, day: NaiveDate) -> Option<NaiveDate> {
        let start = self.start_of(day)?;
        let next = match self {
            CalendarUnit::Day => return Some(day),
            CalendarUnit::Month => start.checked_add_months(chrono::Months::new(1))?,
            CalendarUnit::Quarter => start.checked_add_months(chrono::Months::new(3))?,
            CalendarUnit::Year => start.checked_add_months(chrono::Months::new(12))?,
        };
        next.pred_opt()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarUnit::Day => "day",
            CalendarUnit::Month => "month",
            CalendarUnit::Quarter => "quarter",
            CalendarUnit::Year => "year",
        }
    }
}

/// How much of the calendar a source can serve.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Coverage {
    /// One fetchable file per calendar unit.
    Periodic {
        unit: CalendarUnit,
        /// Days after a unit ends before it is published.
        #[serde(default)]
        publication_lag_days: u32,
        /// The running unit is republished as it grows, so a partially
        /// elapsed unit can be fetched up to the publication horizon.
        #[serde(default)]
        cumulative: bool,
        /// First day the source has data for.
        #[serde(default)]
        earliest: Option<NaiveDate>,
    },
    /// A feed of the most recent `depth_items` items.
    Rolling { depth_items: u32, items_per_day: u32 },
}

/// A source the planner may assign work to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub kind: SourceKind,
    pub coverage: Coverage,
    /// Relative expense of one fetch.
    #[serde(default = "default_cost_weight")]
    pub cost_weight: u32,
    #[serde(default)]
    pub priority: i32,
}

fn default_cost_weight() -> u32 {
    1
}

impl SourceSpec {
    fn unit(&self) -> Option<CalendarUnit> {
        match self.coverage {
            Coverage::Periodic { unit, .. } => Some(unit),
            Coverage::Rolling { .. } => None,
        }
    }

    /// Last day this periodic source has published data for.
    ///
    /// A day `as_of - (lag + 1)` or earlier is old enough to be published,
    /// but only a cumulative source serves it before its unit closes;
    /// otherwise the source reaches the end of its latest complete unit.
    fn published_through(&self, as_of: NaiveDate) -> Option<NaiveDate> {
        let Coverage::Periodic {
            unit, cumulative, ..
        } = self.coverage
        else {
            return None;
        };
        let day_horizon = self.day_horizon(as_of)?;
        if cumulative || unit.end_of(day_horizon)? == day_horizon {
            Some(day_horizon)
        } else {
            unit.start_of(day_horizon)?.pred_opt()
        }
    }

    /// Last day old enough to be published, ignoring unit boundaries.
    fn day_horizon(&self, as_of: NaiveDate) -> Option<NaiveDate> {
        match self.coverage {
            Coverage::Periodic {
                publication_lag_days,
                ..
            } => as_of.checked_sub_days(Days::new(u64::from(publication_lag_days) + 1)),
            Coverage::Rolling { .. } => None,
        }
    }

    /// End of the fetchable unit starting exactly at `day`, if any.
    fn unit_starting_at(
        &self,
        day: NaiveDate,
        window_end: NaiveDate,
        as_of: NaiveDate,
    ) -> Option<NaiveDate> {
        let Coverage::Periodic {
            unit,
            cumulative,
            earliest,
            ..
        } = self.coverage
        else {
            return None;
        };
        if unit.start_of(day)? != day {
            return None;
        }
        if earliest.is_some_and(|e| day < e) {
            return None;
        }
        let horizon = self.day_horizon(as_of)?;
        let full_end = unit.end_of(day)?;
        let end = if full_end <= horizon {
            full_end
        } else if cumulative && day <= horizon {
            horizon
        } else {
            return None;
        };
        (end <= window_end).then_some(end)
    }

    /// Oldest day a rolling source still reaches.
    fn rolling_earliest(&self, as_of: NaiveDate) -> Option<NaiveDate> {
        match self.coverage {
            Coverage::Rolling {
                depth_items,
                items_per_day,
            } => {
                let depth_days = u64::from(depth_items.div_ceil(items_per_day.max(1))).max(1);
                as_of.checked_sub_days(Days::new(depth_days - 1))
            }
            Coverage::Periodic { .. } => None,
        }
    }

    fn validate(&self) -> Result<(), PlanError> {
        let invalid = |reason: &str| PlanError::InvalidSource {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() {
            return Err(invalid("name is empty"));
        }
        if let Coverage::Rolling {
            depth_items,
            items_per_day,
        } = self.coverage
        {
            if items_per_day == 0 {
                return Err(invalid("items_per_day must be >= 1"));
            }
            if depth_items == 0 {
                return Err(invalid("depth_items must be >= 1"));
            }
        }
        Ok(())
    }
}

/// Plans fetch work relative to a fixed reference date.
#[derive(Debug, Clone)]
pub struct CollectionPlanner {
    as_of: NaiveDate,
}

impl CollectionPlanner {
    pub fn new(as_of: NaiveDate) -> Self {
        Self { as_of }
    }

    pub fn as_of(&self) -> NaiveDate {
        self.as_of
    }

    /// Cover `[window_start, window_end]` (inclusive) with fetch tasks.
    pub fn plan(
        &self,
        window_start: NaiveDate,
        window_end: NaiveDate,
        sources: &[SourceSpec],
    ) -> Result<SyncPlan, PlanError> {
        if window_start > window_end {
            return Err(PlanError::InvalidWindow {
                start: window_start,
                end: window_end,
            });
        }
        let mut names = HashSet::new();
        for s in sources {
            s.validate()?;
            if !names.insert(s.name.as_str()) {
                return Err(PlanError::InvalidSource {
                    name: s.name.clone(),
                    reason: "duplicate source name".to_string(),
                });
            }
        }

        let horizon = sources
            .iter()
            .filter_map(|s| s.published_through(self.as_of))
            .max();

        let mut tasks = Vec::new();
        let mut cursor = window_start;
        loop {
            let slice_end = if let Some((spec, end)) = self.best_periodic(cursor, window_end, sources)
            {
                tasks.push(task_for(spec, cursor, end));
                end
            } else {
                let next = self.next_periodic_start(cursor, window_end, sources);
                let slice_end = match next {
                    Some(d) => d.pred_opt().unwrap_or(cursor),
                    None => window_end,
                };
                // Without any periodic source there is no tail; live
                // polling is limited to its rolling depth.
                let is_tail = horizon.is_some_and(|h| cursor > h);
                match best_live(cursor, is_tail, self.as_of, sources) {
                    Some(spec) => tasks.push(task_for(spec, cursor, slice_end)),
                    None => {
                        return Err(PlanError::UncoverableWindow {
                            start: cursor,
                            end: self.uncoverable_end(cursor, slice_end, horizon, sources),
                        })
                    }
                }
                slice_end
            };
            match slice_end.succ_opt() {
                Some(next) if slice_end < window_end => cursor = next,
                _ => break,
            }
        }

        tracing::debug!(
            start = %window_start,
            end = %window_end,
            as_of = %self.as_of,
            tasks = tasks.len(),
            "planned collection"
        );

        Ok(SyncPlan {
            window_start,
            window_end,
            as_of: self.as_of,
            tasks,
        })
    }

    fn best_periodic<'a>(
        &self,
        day: NaiveDate,
        window_end: NaiveDate,
        sources: &'a [SourceSpec],
    ) -> Option<(&'a SourceSpec, NaiveDate)> {
        sources
            .iter()
            .filter_map(|s| {
                s.unit_starting_at(day, window_end, self.as_of)
                    .map(|end| (s, end))
            })
            .min_by_key(|(s, end)| {
                (
                    Reverse(*end),
                    s.cost_weight,
                    Reverse(s.unit()),
                    s.name.clone(),
                )
            })
    }

    fn next_periodic_start(
        &self,
        after: NaiveDate,
        window_end: NaiveDate,
        sources: &[SourceSpec],
    ) -> Option<NaiveDate> {
        let mut day = after.succ_opt()?;
        while day <= window_end {
            if self.best_periodic(day, window_end, sources).is_some() {
                return Some(day);
            }
            day = day.succ_opt()?;
        }
        None
    }

    /// Last day of the unreachable run starting at `start`.
    fn uncoverable_end(
        &self,
        start: NaiveDate,
        slice_end: NaiveDate,
        horizon: Option<NaiveDate>,
        sources: &[SourceSpec],
    ) -> NaiveDate {
        let live_reach = sources
            .iter()
            .filter_map(|s| s.rolling_earliest(self.as_of))
            .chain(horizon.and_then(|h| h.succ_opt()))
            .filter(|d| *d > start && *d <= slice_end)
            .min();
        // Only a live source can pick up mid-slice.
        let has_live = sources.iter().any(|s| s.rolling_earliest(self.as_of).is_some());
        match live_reach {
            Some(d) if has_live => d.pred_opt().unwrap_or(start),
            _ => slice_end,
        }
    }
}

fn best_live(
    day: NaiveDate,
    is_tail: bool,
    as_of: NaiveDate,
    sources: &[SourceSpec],
) -> Option<&SourceSpec> {
    sources
        .iter()
        .filter_map(|s| s.rolling_earliest(as_of).map(|earliest| (s, earliest)))
        .filter(|(_, earliest)| is_tail || day >= *earliest)
        .min_by_key(|(s, earliest)| (s.cost_weight, *earliest, s.name.clone()))
        .map(|(s, _)| s)
}

fn task_for(spec: &SourceSpec, start: NaiveDate, end: NaiveDate) -> FetchTask {
    FetchTask {
        source: spec.name.clone(),
        kind: spec.kind,
        window_start: start,
        window_end: end,
        priority: spec.priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn periodic(name: &str, unit: CalendarUnit, cost: u32, cumulative: bool) -> SourceSpec {
        SourceSpec {
            name: name.to_string(),
            kind: if unit == CalendarUnit::Day {
                SourceKind::PeriodicIndex
            } else {
                SourceKind::BulkArchive
            },
            coverage: Coverage::Periodic {
                unit,
                publication_lag_days: 0,
                cumulative,
                earliest: None,
            },
            cost_weight: cost,
            priority: 0,
        }
    }

    fn live(depth_items: u32, items_per_day: u32) -> SourceSpec {
        SourceSpec {
            name: "live".to_string(),
            kind: SourceKind::LivePoll,
            coverage: Coverage::Rolling {
                depth_items,
                items_per_day,
            },
            cost_weight: 3,
            priority: 1,
        }
    }

    fn assert_exact_cover(plan: &SyncPlan) {
        assert!(!plan.tasks.is_empty());
        assert_eq!(plan.tasks[0].window_start, plan.window_start);
        assert_eq!(plan.tasks.last().unwrap().window_end, plan.window_end);
        for pair in plan.tasks.windows(2) {
            assert!(pair[0].window_start <= pair[0].window_end);
            assert_eq!(
                pair[0].window_end.succ_opt().unwrap(),
                pair[1].window_start,
                "gap or overlap between {} and {}",
                pair[0].label(),
                pair[1].label()
            );
        }
    }

    #[test]
    fn calendar_units() {
        let day = d("2024-02-15");
        assert_eq!(CalendarUnit::Month.start_of(day), Some(d("2024-02-01")));
        assert_eq!(CalendarUnit::Month.end_of(day), Some(d("2024-02-29")));
        assert_eq!(CalendarUnit::Quarter.start_of(day), Some(d("2024-01-01")));
        assert_eq!(CalendarUnit::Quarter.end_of(d("2024-11-30")), Some(d("2024-12-31")));
        assert_eq!(CalendarUnit::Year.end_of(day), Some(d("2024-12-31")));
        assert_eq!(CalendarUnit::Day.end_of(day), Some(day));
    }

    #[test]
    fn quarter_bulk_then_daily_then_live_tail() {
        let sources = vec![
            periodic("quarterly", CalendarUnit::Quarter, 1, false),
            periodic("daily", CalendarUnit::Day, 2, false),
            live(400, 100),
        ];
        let plan = CollectionPlanner::new(d("2024-04-10"))
            .plan(d("2024-01-01"), d("2024-04-10"), &sources)
            .unwrap();
        assert_exact_cover(&plan);

        let quarterly: Vec<_> = plan.tasks_for("quarterly").collect();
        assert_eq!(quarterly.len(), 1);
        assert_eq!(quarterly[0].window_start, d("2024-01-01"));
        assert_eq!(quarterly[0].window_end, d("2024-03-31"));

        let daily: Vec<_> = plan.tasks_for("daily").collect();
        assert_eq!(daily.len(), 9);
        assert!(daily.iter().all(|t| t.days() == 1 && t.window_start >= d("2024-04-01")));

        let live: Vec<_> = plan.tasks_for("live").collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].window_start, d("2024-04-10"));
        assert_eq!(live[0].kind, SourceKind::LivePoll);
    }

    #[test]
    fn cumulative_quarter_covers_bulk_and_live_takes_today() {
        let sources = vec![
            periodic("quarterly", CalendarUnit::Quarter, 1, true),
            periodic("daily", CalendarUnit::Day, 2, false),
            live(400, 100),
        ];
        let plan = CollectionPlanner::new(d("2024-03-31"))
            .plan(d("2024-01-01"), d("2024-03-31"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert_eq!(plan.fetch_count(), 2);
        assert_eq!(plan.tasks[0].source, "quarterly");
        assert_eq!(plan.tasks[0].window_end, d("2024-03-30"));
        assert_eq!(plan.tasks[1].source, "live");
        assert_eq!(plan.tasks[1].window_start, d("2024-03-31"));
        assert_eq!(plan.tasks_for("daily").count(), 0);
    }

    #[test]
    fn misaligned_start_uses_finer_units_until_boundary() {
        let sources = vec![
            periodic("quarterly", CalendarUnit::Quarter, 1, false),
            periodic("monthly", CalendarUnit::Month, 1, false),
            periodic("daily", CalendarUnit::Day, 1, false),
        ];
        let plan = CollectionPlanner::new(d("2024-08-01"))
            .plan(d("2024-02-15"), d("2024-06-30"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert_eq!(plan.tasks_for("daily").count(), 15);
        let monthly: Vec<_> = plan.tasks_for("monthly").collect();
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].window_start, d("2024-03-01"));
        let quarterly: Vec<_> = plan.tasks_for("quarterly").collect();
        assert_eq!(quarterly.len(), 1);
        assert_eq!(quarterly[0].window_start, d("2024-04-01"));
        assert_eq!(quarterly[0].window_end, d("2024-06-30"));
    }

    #[test]
    fn unit_must_fit_inside_window() {
        let sources = vec![
            periodic("quarterly", CalendarUnit::Quarter, 1, false),
            periodic("monthly", CalendarUnit::Month, 1, false),
        ];
        let plan = CollectionPlanner::new(d("2024-12-01"))
            .plan(d("2024-01-01"), d("2024-02-29"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert!(plan.tasks.iter().all(|t| t.source == "monthly"));
        assert_eq!(plan.fetch_count(), 2);
    }

    #[test]
    fn equal_fetch_count_prefers_cheaper_source() {
        let sources = vec![
            periodic("daily-premium", CalendarUnit::Day, 5, false),
            periodic("daily-mirror", CalendarUnit::Day, 2, false),
        ];
        let plan = CollectionPlanner::new(d("2024-06-01"))
            .plan(d("2024-05-01"), d("2024-05-10"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert!(plan.tasks.iter().all(|t| t.source == "daily-mirror"));
    }

    #[test]
    fn equal_count_and_cost_prefers_coarser_unit() {
        // As of Feb 1 the running quarter file and the January file cover
        // the same 31 days in one fetch each.
        let mut sources = vec![
            periodic("monthly", CalendarUnit::Month, 1, false),
            periodic("quarterly", CalendarUnit::Quarter, 1, true),
        ];
        let planner = CollectionPlanner::new(d("2024-02-01"));
        let plan = planner
            .plan(d("2024-01-01"), d("2024-01-31"), &sources)
            .unwrap();
        assert_eq!(plan.fetch_count(), 1);
        assert_eq!(plan.tasks[0].source, "quarterly");

        sources[1].cost_weight = 4;
        let plan = planner
            .plan(d("2024-01-01"), d("2024-01-31"), &sources)
            .unwrap();
        assert_eq!(plan.tasks[0].source, "monthly");
    }

    #[test]
    fn future_tail_goes_to_shallow_live_source() {
        let sources = vec![periodic("daily", CalendarUnit::Day, 1, false), live(10, 10)];
        let plan = CollectionPlanner::new(d("2024-03-15"))
            .plan(d("2024-03-01"), d("2024-04-30"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert_eq!(plan.tasks_for("daily").count(), 14);
        let tail: Vec<_> = plan.tasks_for("live").collect();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].window_start, d("2024-03-15"));
        assert_eq!(tail[0].window_end, d("2024-04-30"));
    }

    #[test]
    fn live_fills_published_gap_within_depth() {
        // Monthly only: the days of a partial month already published are
        // not served by any periodic unit, but sit inside live depth.
        let sources = vec![periodic("monthly", CalendarUnit::Month, 1, false), live(3000, 100)];
        let plan = CollectionPlanner::new(d("2024-05-20"))
            .plan(d("2024-04-01"), d("2024-05-20"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert_eq!(plan.tasks[0].source, "monthly");
        assert_eq!(plan.tasks[1].source, "live");
        assert_eq!(plan.tasks[1].window_start, d("2024-05-01"));
        assert_eq!(plan.fetch_count(), 2);
    }

    #[test]
    fn unpublished_tail_without_live_is_uncoverable() {
        let sources = vec![periodic("daily", CalendarUnit::Day, 1, false)];
        let err = CollectionPlanner::new(d("2024-03-15"))
            .plan(d("2024-03-01"), d("2024-03-20"), &sources)
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::UncoverableWindow {
                start: d("2024-03-15"),
                end: d("2024-03-20"),
            }
        );
    }

    #[test]
    fn history_before_earliest_is_uncoverable() {
        let mut daily = periodic("daily", CalendarUnit::Day, 1, false);
        daily.coverage = Coverage::Periodic {
            unit: CalendarUnit::Day,
            publication_lag_days: 0,
            cumulative: false,
            earliest: Some(d("2024-01-10")),
        };
        let err = CollectionPlanner::new(d("2024-06-01"))
            .plan(d("2024-01-01"), d("2024-01-20"), &[daily, live(100, 100)])
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::UncoverableWindow {
                start: d("2024-01-01"),
                end: d("2024-01-09"),
            }
        );
    }

    #[test]
    fn unclosed_quarter_is_tail_for_live_polling() {
        // Q4 2023 is the latest complete quarter, so all of Q1 is tail.
        let sources = vec![
            periodic("quarterly", CalendarUnit::Quarter, 1, false),
            live(400, 100),
        ];
        let planner = CollectionPlanner::new(d("2024-03-15"));
        let plan = planner
            .plan(d("2024-01-01"), d("2024-03-15"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert_eq!(plan.fetch_count(), 1);
        assert_eq!(plan.tasks[0].source, "live");

        let plan = planner
            .plan(d("2024-01-01"), d("2024-03-31"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert_eq!(plan.fetch_count(), 1);
        assert_eq!(plan.tasks[0].source, "live");
        assert_eq!(plan.tasks[0].window_end, d("2024-03-31"));
    }

    #[test]
    fn tail_starts_after_latest_closed_month() {
        let sources = vec![
            periodic("quarterly", CalendarUnit::Quarter, 1, false),
            periodic("monthly", CalendarUnit::Month, 1, false),
            live(400, 100),
        ];
        let plan = CollectionPlanner::new(d("2024-03-15"))
            .plan(d("2024-01-01"), d("2024-03-15"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        let sources_used: Vec<_> = plan.tasks.iter().map(|t| t.source.as_str()).collect();
        assert_eq!(sources_used, vec!["monthly", "monthly", "live"]);
        assert_eq!(plan.tasks[2].window_start, d("2024-03-01"));
    }

    #[test]
    fn published_quarter_is_one_fetch() {
        let sources = vec![
            periodic("quarterly", CalendarUnit::Quarter, 1, false),
            periodic("daily", CalendarUnit::Day, 2, false),
            live(400, 100),
        ];
        let plan = CollectionPlanner::new(d("2024-04-10"))
            .plan(d("2024-01-01"), d("2024-03-31"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert_eq!(plan.fetch_count(), 1);
        assert_eq!(plan.tasks[0].source, "quarterly");
        assert_eq!(plan.tasks[0].window_start, d("2024-01-01"));
        assert_eq!(plan.tasks[0].window_end, d("2024-03-31"));
    }

    #[test]
    fn unpublished_quarter_falls_back_to_daily_and_live() {
        let sources = vec![
            periodic("quarterly", CalendarUnit::Quarter, 1, false),
            periodic("daily", CalendarUnit::Day, 2, false),
            live(400, 100),
        ];
        let plan = CollectionPlanner::new(d("2024-03-31"))
            .plan(d("2024-01-01"), d("2024-03-31"), &sources)
            .unwrap();
        assert_exact_cover(&plan);
        assert_eq!(plan.tasks_for("quarterly").count(), 0);
        assert_eq!(plan.tasks_for("daily").count(), 90);
        let live: Vec<_> = plan.tasks_for("live").collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].window_start, d("2024-03-31"));
    }

    #[test]
    fn live_only_is_bounded_by_rolling_depth() {
        let planner = CollectionPlanner::new(d("2024-03-15"));
        let err = planner
            .plan(d("1990-01-01"), d("2024-03-15"), &[live(400, 100)])
            .unwrap_err();
        assert_eq!(
            err,
            PlanError::UncoverableWindow {
                start: d("1990-01-01"),
                end: d("2024-03-11"),
            }
        );

        let plan = planner
            .plan(d("2024-03-12"), d("2024-03-20"), &[live(400, 100)])
            .unwrap();
        assert_exact_cover(&plan);
        assert_eq!(plan.fetch_count(), 1);
    }

    #[test]
    fn rejects_bad_input() {
        let planner = CollectionPlanner::new(d("2024-06-01"));
        assert!(matches!(
            planner.plan(d("2024-02-01"), d("2024-01-01"), &[]),
            Err(PlanError::InvalidWindow { .. })
        ));
        assert!(matches!(
            planner.plan(d("2024-01-01"), d("2024-01-02"), &[live(10, 0)]),
            Err(PlanError::InvalidSource { .. })
        ));
        let dup = periodic("daily", CalendarUnit::Day, 1, false);
        assert!(matches!(
            planner.plan(d("2024-01-01"), d("2024-01-02"), &[dup.clone(), dup]),
            Err(PlanError::InvalidSource { .. })
        ));
        assert_eq!(
            planner.plan(d("2024-01-01"), d("2024-01-02"), &[]),
            Err(PlanError::UncoverableWindow {
                start: d("2024-01-01"),
                end: d("2024-01-02"),
            })
        );
    }

    #[test]
    fn every_window_is_covered_exactly() {
        let sources = vec![
            periodic("yearly", CalendarUnit::Year, 1, false),
            periodic("quarterly", CalendarUnit::Quarter, 1, true),
            periodic("monthly", CalendarUnit::Month, 2, false),
            periodic("daily", CalendarUnit::Day, 2, false),
            live(400, 100),
        ];
        let as_of = d("2024-06-15");
        let planner = CollectionPlanner::new(as_of);
        let base = d("2022-11-01");
        for offset in (0..600).step_by(17) {
            for len in (0..420).step_by(29) {
                let start = base + chrono::Duration::days(offset);
                let end = start + chrono::Duration::days(len);
                let plan = planner.plan(start, end, &sources).unwrap();
                assert_exact_cover(&plan);

                // Within one source, no unit is fetched twice.
                for s in &sources {
                    let mut own: Vec<_> = plan.tasks_for(&s.name).collect();
                    own.sort_by_key(|t| t.window_start);
                    for pair in own.windows(2) {
                        assert!(pair[0].window_end < pair[1].window_start);
                    }
                }
                // Nothing but the live source touches unpublished days.
                for t in &plan.tasks {
                    if t.window_end >= as_of {
                        assert_eq!(t.source, "live", "{}", t.label());
                    }
                }
            }
        }
    }
}
