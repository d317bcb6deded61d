// ⚖️ Reconciliation Engine - one correct master row per issuer
//
// update_master():
//   1. repair incoming rows (rejections are collected, never fatal)
//   2. union: incoming + previous master rows + recorded name history,
//      all expressed as observations
//   3. build the per-issuer timeline (sort + dedup, see timeline.rs)
//   4. resolve every attribute from the timeline
//   5. emit listing events for Active ↔ Inactive flips
//   6. fold deprecated identities into their successors
//   7. rebuild name history for issuers seen this run
//
// Attribute rules:
//   status        never appeared in baseline → Unknown
//                 in baseline → baseline's current value; if that is Unknown,
//                 the most recent known value from any other source
//   sector/market baseline's current value, else most recent usable value
//   name          latest dated name, else baseline name, else last undated
//   other fields  most recent non-empty value
//
// Every fallback is "most recent non-empty": the last qualifying entry on
// the timeline.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::entities::{
    IdentityBridge, IssuerObservation, ListingEvent, ListingEventType, ListingStatus, MasterEntity,
    NameChangeEvent, Origin, RawObservation,
};
use crate::history::rebuild_name_history;
use crate::names::is_placeholder_attribute;
use crate::timeline::{build_timelines, Timeline};
use crate::validation::{ObservationValidator, Rejection};

pub const DEFAULT_BASELINE_SOURCE: &str = "exchange_listing";
/// Source tag of observations derived from the previous master row.
pub const MASTER_SOURCE: &str = "master";
/// Source tag of observations derived from recorded name-change events.
pub const HISTORY_SOURCE: &str = "history";

// ============================================================================
// INPUT / OUTPUT
// ============================================================================

/// Everything one reconciliation pass reads.
#[derive(Debug, Clone, Default)]
pub struct ReconcileInput {
    pub master: Vec<MasterEntity>,
    pub name_history: Vec<NameChangeEvent>,
    pub observations: Vec<RawObservation>,
    pub bridges: Vec<IdentityBridge>,
    /// Processing date; listing events are stamped with it.
    pub as_of: NaiveDate,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileStats {
    pub incoming: usize,
    pub accepted: usize,
    pub rejected: usize,
    pub repaired_fields: usize,
    pub duplicates_dropped: usize,
    pub issuers_total: usize,
    pub issuers_new: usize,
    pub issuers_changed: usize,
    pub histories_rebuilt: usize,
    pub name_events: usize,
    pub listing_events: usize,
    pub bridges_applied: usize,
    pub bridges_skipped: usize,
    pub national_id_changes: usize,
}

impl ReconcileStats {
    pub fn summary(&self) -> String {
        format!(
            "Reconciled {} issuers ({} new, {} changed) from {} observations ({} accepted, {} rejected, {} duplicates); \
             {} name histories rebuilt ({} events), {} listing events, {} bridges applied, {} skipped",
            self.issuers_total,
            self.issuers_new,
            self.issuers_changed,
            self.incoming,
            self.accepted,
            self.rejected,
            self.duplicates_dropped,
            self.histories_rebuilt,
            self.name_events,
            self.listing_events,
            self.bridges_applied,
            self.bridges_skipped
        )
    }
}

/// Result of one pass. Nothing here is persisted yet.
#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    /// Full replacement master table, sorted by registry id.
    pub master: Vec<MasterEntity>,
    /// Full replacement name-history table.
    pub name_history: Vec<NameChangeEvent>,
    /// New listing events only; merge them into the recorded history.
    pub listing_events: Vec<ListingEvent>,
    pub rejections: Vec<Rejection>,
    pub stats: ReconcileStats,
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

pub struct ReconciliationEngine {
    baseline_source: String,
    validator: ObservationValidator,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        Self::with_baseline_source(DEFAULT_BASELINE_SOURCE)
    }

    pub fn with_baseline_source(source: impl Into<String>) -> Self {
        let baseline_source = source.into();
        ReconciliationEngine {
            validator: ObservationValidator::new(baseline_source.clone()),
            baseline_source,
        }
    }

    pub fn baseline_source(&self) -> &str {
        &self.baseline_source
    }

    pub fn update_master(&self, input: ReconcileInput) -> ReconcileOutcome {
        let mut stats = ReconcileStats {
            incoming: input.observations.len(),
            ..ReconcileStats::default()
        };

        // 1. repair
        let repaired = self.validator.repair_all(&input.observations);
        stats.accepted = repaired.accepted.len();
        stats.rejected = repaired.rejected.len();
        stats.repaired_fields = repaired.repaired_fields;

        // ids folded away in earlier runs keep pointing at their holder
        let holders = former_id_holders(&input.master);
        let mut accepted = repaired.accepted;
        for obs in &mut accepted {
            if let Some(holder) = holders.get(&obs.registry_id) {
                debug!(former = %obs.registry_id, holder = %holder, "observation of a former id redirected");
                obs.registry_id = holder.clone();
            }
        }

        let touched: BTreeSet<String> = accepted.iter().map(|o| o.registry_id.clone()).collect();

        // 2. union
        let previous: BTreeMap<String, MasterEntity> = input
            .master
            .into_iter()
            .map(|m| (m.registry_id.clone(), m))
            .collect();

        let mut union: Vec<IssuerObservation> = Vec::new();
        for row in previous.values() {
            union.extend(self.master_observations(row));
        }
        union.extend(
            input
                .name_history
                .iter()
                .filter(|e| touched.contains(&e.registry_id))
                .map(history_observation),
        );
        union.extend(accepted);

        // 3. timeline
        let timelines = build_timelines(union);
        stats.duplicates_dropped = timelines.duplicates_dropped;

        // 4. resolve + 5. listing events
        let mut resolved: BTreeMap<String, MasterEntity> = BTreeMap::new();
        let mut listing_events = Vec::new();
        for (registry_id, timeline) in &timelines.by_issuer {
            let prev = previous.get(registry_id);
            let row = self.resolve(registry_id, timeline, prev);

            match prev {
                None => stats.issuers_new += 1,
                Some(p) if p != &row => stats.issuers_changed += 1,
                Some(_) => {}
            }
            if let Some(p) = prev {
                if let (Some(old), Some(new)) = (&p.national_id, &row.national_id) {
                    if old != new {
                        warn!(registry_id = %registry_id, old = %old, new = %new, "national id changed; keeping the newest");
                        stats.national_id_changes += 1;
                    }
                }
                if let Some(event) = listing_transition(p, &row, input.as_of) {
                    debug!(registry_id = %registry_id, event = event.event_type.as_str(), "listing status flipped");
                    listing_events.push(event);
                }
            }
            resolved.insert(registry_id.clone(), row);
        }

        // 6. bridges
        self.apply_bridges(&mut resolved, &input.bridges, &holders, &mut stats);

        // 7. name history
        let name_history = rebuild_name_history(input.name_history, &timelines, &touched);
        stats.histories_rebuilt = touched.len();
        stats.name_events = name_history.len();

        stats.issuers_total = resolved.len();
        stats.listing_events = listing_events.len();
        info!("{}", stats.summary());

        ReconcileOutcome {
            master: resolved.into_values().collect(),
            name_history,
            listing_events,
            rejections: repaired.rejected,
            stats,
        }
    }

    // ------------------------------------------------------------------------
    // observations from persisted state
    // ------------------------------------------------------------------------

    /// A previous master row, restated as up to two observations.
    ///
    /// Baseline-sourced values go back out as an undated baseline
    /// observation; everything else rides on a master observation dated at
    /// the row's newest observation. Feeding an unchanged row back in
    /// therefore reproduces it.
    fn master_observations(&self, row: &MasterEntity) -> Vec<IssuerObservation> {
        let sector_from_baseline = row.in_baseline && usable_attribute(row.baseline_sector.as_deref());
        let market_from_baseline = row.in_baseline && usable_attribute(row.baseline_market.as_deref());
        let status_from_fallback = row.in_baseline && !row.baseline_status.is_known();

        let mut own = IssuerObservation::new(row.registry_id.as_str(), row.name.as_str(), MASTER_SOURCE)
            .with_origin(Origin::Master);
        own.national_id = row.national_id.clone();
        own.trading_code = row.trading_code.clone();
        own.name_en = row.name_en.clone();
        if !sector_from_baseline {
            own.sector = row.sector.clone();
        }
        if !market_from_baseline {
            own.market = row.market.clone();
        }
        if status_from_fallback {
            own.status = row.status;
        }
        own.observed_at = row.last_observed_at;

        let mut out = vec![own];
        if row.in_baseline {
            let mut baseline =
                IssuerObservation::new(row.registry_id.as_str(), row.name.as_str(), self.baseline_source.as_str())
                    .with_status(row.baseline_status)
                    .with_origin(Origin::Master);
            baseline.sector = row.baseline_sector.clone();
            baseline.market = row.baseline_market.clone();
            out.push(baseline);
        }
        out
    }

    // ------------------------------------------------------------------------
    // attribute resolution
    // ------------------------------------------------------------------------

    fn resolve(&self, registry_id: &str, timeline: &Timeline, prev: Option<&MasterEntity>) -> MasterEntity {
        let baseline = timeline.last_from_source(&self.baseline_source);
        let in_baseline = baseline.is_some() || prev.is_some_and(|p| p.in_baseline);

        let name = timeline
            .latest_dated()
            .or(baseline)
            .or_else(|| timeline.undated().last())
            .map(|o| o.name.clone())
            .unwrap_or_else(|| prev.map(|p| p.name.clone()).unwrap_or_default());

        let baseline_status = baseline.map(|b| b.status).unwrap_or_default();
        let status = if !in_baseline {
            ListingStatus::Unknown
        } else if baseline_status.is_known() {
            baseline_status
        } else {
            timeline
                .entries()
                .iter()
                .rev()
                .filter(|o| o.source != self.baseline_source)
                .map(|o| o.status)
                .find(ListingStatus::is_known)
                .unwrap_or(ListingStatus::Unknown)
        };

        let baseline_sector = baseline.and_then(|b| b.sector.clone());
        let baseline_market = baseline.and_then(|b| b.market.clone());
        let sector = pick_baseline_or_latest(baseline_sector.as_deref(), timeline, |o| o.sector.as_deref());
        let market = pick_baseline_or_latest(baseline_market.as_deref(), timeline, |o| o.market.as_deref());

        MasterEntity {
            registry_id: registry_id.to_string(),
            national_id: timeline.latest_value(|o| o.national_id.as_deref(), |_| true),
            trading_code: timeline.latest_value(|o| o.trading_code.as_deref(), |_| true),
            name,
            name_en: timeline.latest_value(|o| o.name_en.as_deref(), |_| true),
            sector,
            market,
            status,
            in_baseline,
            baseline_status,
            baseline_sector,
            baseline_market,
            last_observed_at: timeline.last_observed_at(),
            former_registry_ids: prev.map(|p| p.former_registry_ids.clone()).unwrap_or_default(),
        }
    }

    // ------------------------------------------------------------------------
    // identity bridges
    // ------------------------------------------------------------------------

    /// Fold each deprecated identity into its final successor.
    ///
    /// Chains (A → B → C) resolve to their last link. A successor that does
    /// not exist this run means the bridge is skipped; successors are never
    /// removed, whatever their status.
    fn apply_bridges(
        &self,
        rows: &mut BTreeMap<String, MasterEntity>,
        bridges: &[IdentityBridge],
        holders: &BTreeMap<String, String>,
        stats: &mut ReconcileStats,
    ) {
        let links: BTreeMap<&str, &str> = bridges
            .iter()
            .filter(|b| b.deprecated_id != b.successor_id)
            .map(|b| (b.deprecated_id.as_str(), b.successor_id.as_str()))
            .collect();

        for (&deprecated, _) in &links {
            let Some(successor) = final_successor(&links, deprecated) else {
                warn!(deprecated, "identity bridge chain loops; skipped");
                stats.bridges_skipped += 1;
                continue;
            };
            // a successor folded in an earlier run hands over to its holder
            let successor = holders.get(successor).map(String::as_str).unwrap_or(successor);
            if successor == deprecated {
                warn!(deprecated, "identity bridge points back at itself; skipped");
                stats.bridges_skipped += 1;
                continue;
            }
            if !rows.contains_key(successor) {
                warn!(deprecated, successor, "identity bridge skipped: successor not in master");
                stats.bridges_skipped += 1;
                continue;
            }

            let folded = rows.remove(deprecated);
            if let Some(target) = rows.get_mut(successor) {
                target.add_former_id(deprecated);
                if let Some(old) = folded {
                    for id in &old.former_registry_ids {
                        target.add_former_id(id);
                    }
                    if target.national_id.is_none() {
                        target.national_id = old.national_id;
                    }
                    if target.trading_code.is_none() {
                        target.trading_code = old.trading_code;
                    }
                }
                debug!(deprecated, successor, "identity bridge applied");
                stats.bridges_applied += 1;
            }
        }
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn history_observation(event: &NameChangeEvent) -> IssuerObservation {
    IssuerObservation::new(event.registry_id.as_str(), event.new_name.as_str(), HISTORY_SOURCE)
        .dated(event.change_date)
        .with_origin(Origin::History)
}

fn usable_attribute(value: Option<&str>) -> bool {
    value.is_some_and(|v| !is_placeholder_attribute(v))
}

fn pick_baseline_or_latest<F>(baseline: Option<&str>, timeline: &Timeline, field: F) -> Option<String>
where
    F: Fn(&IssuerObservation) -> Option<&str>,
{
    if usable_attribute(baseline) {
        return baseline.map(str::to_string);
    }
    timeline.latest_value(field, |v| !is_placeholder_attribute(v))
}

/// Former id → the live row that recorded it. Ids that are themselves live
/// rows are left alone.
fn former_id_holders(master: &[MasterEntity]) -> BTreeMap<String, String> {
    let live: BTreeSet<&str> = master.iter().map(|m| m.registry_id.as_str()).collect();
    let mut holders = BTreeMap::new();
    for row in master {
        for former in &row.former_registry_ids {
            if !live.contains(former.as_str()) {
                holders.insert(former.clone(), row.registry_id.clone());
            }
        }
    }
    holders
}

/// Last id of the bridge chain starting at `start`; `None` on a cycle.
fn final_successor<'a>(links: &BTreeMap<&'a str, &'a str>, start: &'a str) -> Option<&'a str> {
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut current = start;
    visited.insert(current);
    while let Some(&next) = links.get(current) {
        if !visited.insert(next) {
            return None;
        }
        current = next;
    }
    Some(current)
}

/// Listing event for an Active ↔ Inactive flip. Unknown on either side
/// never produces an event.
fn listing_transition(prev: &MasterEntity, row: &MasterEntity, as_of: NaiveDate) -> Option<ListingEvent> {
    let event_type = match (prev.status, row.status) {
        (ListingStatus::Inactive, ListingStatus::Active) => ListingEventType::Listing,
        (ListingStatus::Active, ListingStatus::Inactive) => ListingEventType::Delisting,
        _ => return None,
    };
    Some(ListingEvent {
        registry_id: row.registry_id.clone(),
        trading_code: row.trading_code.clone().or_else(|| prev.trading_code.clone()),
        event_type,
        event_date: as_of,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn raw(id: &str, name: &str, source: &str, date: Option<&str>) -> RawObservation {
        RawObservation {
            registry_id: Some(id.into()),
            name: Some(name.into()),
            source: Some(source.into()),
            observed_at: date.map(str::to_string),
            ..RawObservation::default()
        }
    }

    fn baseline(id: &str, name: &str, active: bool) -> RawObservation {
        RawObservation {
            is_active: Some(if active { "true" } else { "false" }.into()),
            ..raw(id, name, DEFAULT_BASELINE_SOURCE, None)
        }
    }

    fn input(observations: Vec<RawObservation>) -> ReconcileInput {
        ReconcileInput {
            observations,
            as_of: day("2024-07-01"),
            ..ReconcileInput::default()
        }
    }

    #[test]
    fn test_baseline_scenario_one_rename_and_inactive() {
        let engine = ReconciliationEngine::new();
        let outcome = engine.update_master(input(vec![
            baseline("E1", "A Corp", false),
            raw("E1", "A Corp", "filings", Some("2021-01-01")),
            raw("E1", "A Corporation", "filings", Some("2023-06-01")),
        ]));

        assert_eq!(outcome.master.len(), 1);
        let row = &outcome.master[0];
        assert_eq!(row.status, ListingStatus::Inactive);
        assert_eq!(row.name, "A Corporation");
        assert_eq!(outcome.name_history.len(), 1);
        let event = &outcome.name_history[0];
        assert_eq!((event.old_name.as_str(), event.new_name.as_str()), ("A Corp", "A Corporation"));
        assert_eq!(event.change_date, day("2023-06-01"));
        println!("✅ {}", outcome.stats.summary());
    }

    #[test]
    fn test_status_unknown_without_baseline() {
        let engine = ReconciliationEngine::new();
        let mut r = raw("E2", "B社", "filings", Some("2024-01-01"));
        r.is_active = Some("true".into());
        let outcome = engine.update_master(input(vec![r]));
        assert_eq!(outcome.master[0].status, ListingStatus::Unknown);
        assert!(!outcome.master[0].in_baseline);
    }

    #[test]
    fn test_baseline_status_beats_fresher_sources() {
        let engine = ReconciliationEngine::new();
        let mut fresh = raw("E3", "C社", "filings", Some("2024-06-30"));
        fresh.is_active = Some("true".into());
        let outcome = engine.update_master(input(vec![baseline("E3", "C社", false), fresh]));
        assert_eq!(outcome.master[0].status, ListingStatus::Inactive);
    }

    #[test]
    fn test_unknown_baseline_status_falls_back_to_latest_known() {
        let engine = ReconciliationEngine::new();
        let mut old = raw("E4", "D社", "filings", Some("2020-01-01"));
        old.is_active = Some("false".into());
        let mut new = raw("E4", "D社", "filings", Some("2023-01-01"));
        new.is_active = Some("true".into());
        let outcome = engine.update_master(input(vec![raw("E4", "D社", DEFAULT_BASELINE_SOURCE, None), old, new]));

        let row = &outcome.master[0];
        assert!(row.in_baseline);
        assert_eq!(row.baseline_status, ListingStatus::Unknown);
        assert_eq!(row.status, ListingStatus::Active);
    }

    #[test]
    fn test_sector_falls_back_to_most_recent_usable() {
        let engine = ReconciliationEngine::new();
        let mut base = baseline("E5", "E社", true);
        base.sector = Some("その他".into());
        let mut a = raw("E5", "E社", "filings", Some("2020-01-01"));
        a.sector = Some("電気機器".into());
        let mut b = raw("E5", "E社", "filings", Some("2022-01-01"));
        b.sector = Some("情報・通信業".into());
        let outcome = engine.update_master(input(vec![base, a, b]));
        assert_eq!(outcome.master[0].sector.as_deref(), Some("情報・通信業"));
    }

    #[test]
    fn test_any_arrival_order_gives_same_result() {
        let engine = ReconciliationEngine::new();
        let mut rows = vec![
            baseline("E6", "F Holdings", true),
            raw("E6", "F Trading", "filings", Some("2019-03-31")),
            raw("E6", "F Holdings", "filings", Some("2021-03-31")),
            raw("E6", "F Group", "news", Some("2021-03-31")),
            raw("E6", "F Group", "filings", Some("2023-03-31")),
        ];
        let forward = engine.update_master(input(rows.clone()));
        rows.reverse();
        let backward = engine.update_master(input(rows.clone()));
        rows.swap(0, 3);
        let shuffled = engine.update_master(input(rows));

        assert_eq!(forward.master, backward.master);
        assert_eq!(forward.master, shuffled.master);
        assert_eq!(forward.name_history, backward.name_history);
        assert_eq!(forward.name_history, shuffled.name_history);
    }

    #[test]
    fn test_rerun_with_same_input_is_a_fixed_point() {
        let engine = ReconciliationEngine::new();
        let rows = vec![
            baseline("E7", "G Corp", true),
            raw("E7", "G Corp", "filings", Some("2021-01-01")),
            raw("E7", "G Corporation", "filings", Some("2023-06-01")),
        ];
        let first = engine.update_master(input(rows.clone()));

        let second = engine.update_master(ReconcileInput {
            master: first.master.clone(),
            name_history: first.name_history.clone(),
            ..input(rows)
        });
        assert_eq!(first.master, second.master);
        assert_eq!(first.name_history, second.name_history);
        assert!(second.listing_events.is_empty());

        let idle = engine.update_master(ReconcileInput {
            master: first.master.clone(),
            name_history: first.name_history.clone(),
            ..input(Vec::new())
        });
        assert_eq!(idle.master, first.master);
        assert_eq!(idle.name_history, first.name_history);
    }

    #[test]
    fn test_status_flip_emits_listing_event() {
        let engine = ReconciliationEngine::new();
        let mut listed = baseline("E8", "H社", true);
        listed.trading_code = Some("1301".into());
        let first = engine.update_master(input(vec![listed]));
        assert!(first.listing_events.is_empty());

        let second = engine.update_master(ReconcileInput {
            master: first.master.clone(),
            ..input(vec![baseline("E8", "H社", false)])
        });
        assert_eq!(second.listing_events.len(), 1);
        let event = &second.listing_events[0];
        assert_eq!(event.event_type, ListingEventType::Delisting);
        assert_eq!(event.event_date, day("2024-07-01"));
        assert_eq!(event.trading_code.as_deref(), Some("13010"));
    }

    #[test]
    fn test_rejected_rows_do_not_abort_the_batch() {
        let engine = ReconciliationEngine::new();
        let outcome = engine.update_master(input(vec![
            raw("E9", "I社", "filings", Some("2024-01-01")),
            RawObservation {
                name: Some("no id".into()),
                ..RawObservation::default()
            },
        ]));
        assert_eq!(outcome.master.len(), 1);
        assert_eq!(outcome.rejections.len(), 1);
        assert_eq!(outcome.stats.rejected, 1);
    }

    #[test]
    fn test_bridges_fold_into_final_successor() {
        let engine = ReconciliationEngine::new();
        let mut old = raw("E100", "Old KK", "filings", Some("2018-01-01"));
        old.national_id = Some("1234567890123".into());
        let mut mid = raw("E200", "Mid KK", "filings", Some("2019-01-01"));
        mid.trading_code = Some("9999".into());
        let mut successor = baseline("E300", "New KK", false);
        successor.is_active = Some("false".into());

        let outcome = engine.update_master(ReconcileInput {
            bridges: vec![
                IdentityBridge::new("E100", "E200"),
                IdentityBridge::new("E200", "E300"),
                IdentityBridge::new("E400", "E999"),
            ],
            ..input(vec![old, mid, successor])
        });

        assert_eq!(outcome.master.len(), 1);
        let row = &outcome.master[0];
        assert_eq!(row.registry_id, "E300");
        assert_eq!(row.status, ListingStatus::Inactive);
        assert_eq!(row.former_registry_ids, vec!["E100", "E200"]);
        assert_eq!(row.national_id.as_deref(), Some("1234567890123"));
        assert_eq!(row.trading_code.as_deref(), Some("99990"));
        assert_eq!(outcome.stats.bridges_applied, 2);
        assert_eq!(outcome.stats.bridges_skipped, 1);
    }

    #[test]
    fn test_bridged_id_seen_in_a_later_run_stays_folded() {
        let engine = ReconciliationEngine::new();
        let first = engine.update_master(ReconcileInput {
            bridges: vec![IdentityBridge::new("E100", "E300")],
            ..input(vec![
                raw("E100", "Old KK", "filings", Some("2018-01-01")),
                raw("E300", "New KK", "filings", Some("2020-01-01")),
            ])
        });
        assert_eq!(first.master.len(), 1);
        assert_eq!(first.master[0].former_registry_ids, vec!["E100"]);

        // no bridge delta this time; the recorded former id is enough
        let second = engine.update_master(ReconcileInput {
            master: first.master.clone(),
            name_history: first.name_history.clone(),
            ..input(vec![raw("E100", "New KK", "news", Some("2024-01-01"))])
        });
        let ids: Vec<&str> = second.master.iter().map(|m| m.registry_id.as_str()).collect();
        assert_eq!(ids, vec!["E300"]);
        assert_eq!(second.master[0].former_registry_ids, vec!["E100"]);
        assert_eq!(second.stats.issuers_new, 0);
        assert_eq!(second.stats.histories_rebuilt, 1);

        // a bridge onto an already folded id lands on its holder
        let third = engine.update_master(ReconcileInput {
            master: second.master.clone(),
            bridges: vec![IdentityBridge::new("E050", "E100")],
            ..input(vec![raw("E050", "Older KK", "filings", Some("2015-01-01"))])
        });
        assert_eq!(third.master.len(), 1);
        assert_eq!(third.master[0].registry_id, "E300");
        assert_eq!(third.master[0].former_registry_ids, vec!["E050", "E100"]);
        assert_eq!(third.stats.bridges_applied, 1);
    }

    #[test]
    fn test_bridge_cycle_is_skipped() {
        let links: BTreeMap<&str, &str> = [("A", "B"), ("B", "A")].into_iter().collect();
        assert_eq!(final_successor(&links, "A"), None);
        let chain: BTreeMap<&str, &str> = [("A", "B"), ("B", "C")].into_iter().collect();
        assert_eq!(final_successor(&chain, "A"), Some("C"));
    }
}
