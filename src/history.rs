// 📜 Name History - rebuilt from the full timeline on every run
//
// Names arrive out of order (backfills land after newer data). Comparing in
// arrival order invents reversed or phantom changes, so the chain is rebuilt
// from the sorted timeline instead:
//
//   seed   = old_name of the oldest recorded event (the name before any
//            known change), else the first dated name (seeds, no event)
//   walk   = dated observations in timeline order; a normalized change emits
//            (current → new, date); a spelling-only change moves the pointer
//
// Undated names never take part: an undated registry row describes "now",
// not a point on the chain.
//
// The rebuilt chain replaces the issuer's recorded chain outright, even when
// it is empty, so stale rows from earlier bad runs self-correct.

use std::collections::BTreeSet;

use crate::entities::NameChangeEvent;
use crate::names::same_name;
use crate::timeline::{Timeline, Timelines};

/// Rebuild one issuer's chain. `recorded` is that issuer's existing events.
pub fn rebuild_issuer_history(
    registry_id: &str,
    timeline: &Timeline,
    recorded: &[NameChangeEvent],
) -> Vec<NameChangeEvent> {
    let seed = recorded
        .iter()
        .min_by(|a, b| (a.change_date, &a.old_name).cmp(&(b.change_date, &b.old_name)))
        .map(|e| e.old_name.clone());

    let mut current: Option<String> = seed;
    let mut events = Vec::new();

    for obs in timeline.dated() {
        let Some(date) = obs.observed_at else { continue };
        let Some(name) = current.as_deref() else {
            current = Some(obs.name.clone());
            continue;
        };
        if name == obs.name {
            continue;
        }
        if !same_name(name, &obs.name) {
            events.push(NameChangeEvent::new(registry_id, name, obs.name.as_str(), date));
        }
        current = Some(obs.name.clone());
    }
    events
}

/// Full name-history table after a run.
///
/// Issuers in `touched` get their chain rebuilt from `timelines`; every other
/// issuer's recorded events pass through unchanged.
pub fn rebuild_name_history(
    recorded: Vec<NameChangeEvent>,
    timelines: &Timelines,
    touched: &BTreeSet<String>,
) -> Vec<NameChangeEvent> {
    let (replaced, mut kept): (Vec<_>, Vec<_>) = recorded
        .into_iter()
        .partition(|e| touched.contains(&e.registry_id));

    for registry_id in touched {
        let Some(timeline) = timelines.by_issuer.get(registry_id) else {
            continue;
        };
        let own: Vec<NameChangeEvent> = replaced
            .iter()
            .filter(|e| &e.registry_id == registry_id)
            .cloned()
            .collect();
        kept.extend(rebuild_issuer_history(registry_id, timeline, &own));
    }

    kept.sort_by(|a, b| {
        (&a.registry_id, a.change_date, &a.old_name, &a.new_name)
            .cmp(&(&b.registry_id, b.change_date, &b.old_name, &b.new_name))
    });
    kept.dedup();
    kept
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{IssuerObservation, Origin};
    use crate::names::normalize_name;
    use crate::timeline::build_timelines;
    use chrono::NaiveDate;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn incoming(name: &str, date: &str) -> IssuerObservation {
        IssuerObservation::new("E9999", name, "filings").dated(day(date))
    }

    fn master(name: &str, date: &str) -> IssuerObservation {
        IssuerObservation::new("E9999", name, "master")
            .dated(day(date))
            .with_origin(Origin::Master)
    }

    fn history_obs(e: &NameChangeEvent) -> IssuerObservation {
        IssuerObservation::new(e.registry_id.as_str(), e.new_name.as_str(), "history")
            .dated(e.change_date)
            .with_origin(Origin::History)
    }

    fn rebuild(obs: Vec<IssuerObservation>, recorded: &[NameChangeEvent]) -> Vec<NameChangeEvent> {
        let mut all = obs;
        all.extend(recorded.iter().map(history_obs));
        let timelines = build_timelines(all);
        rebuild_issuer_history("E9999", &timelines.by_issuer["E9999"], recorded)
    }

    fn pairs(events: &[NameChangeEvent]) -> Vec<(&str, &str, String)> {
        events
            .iter()
            .map(|e| (e.old_name.as_str(), e.new_name.as_str(), e.change_date.to_string()))
            .collect()
    }

    #[test]
    fn test_backfilled_names_build_forward_chain() {
        // master already knows C; B then A arrive late
        let events = rebuild(
            vec![
                master("Company C", "2023-01-01"),
                incoming("Company B", "2022-01-01"),
                incoming("Company A", "2021-01-01"),
            ],
            &[],
        );
        assert_eq!(
            pairs(&events),
            vec![
                ("Company A", "Company B", "2022-01-01".to_string()),
                ("Company B", "Company C", "2023-01-01".to_string()),
            ]
        );
    }

    #[test]
    fn test_older_name_arriving_later_does_not_reverse() {
        let events = rebuild(
            vec![master("LINE Yahoo", "2023-10-01"), incoming("Z Holdings", "2022-04-01")],
            &[],
        );
        assert_eq!(pairs(&events), vec![("Z Holdings", "LINE Yahoo", "2023-10-01".to_string())]);
    }

    #[test]
    fn test_recorded_seed_shifts_change_date() {
        let recorded = vec![NameChangeEvent::new("E9999", "Company B", "Company A", day("2023-01-01"))];
        let events = rebuild(
            vec![master("Company A", "2023-01-01"), incoming("Company A", "2022-01-01")],
            &recorded,
        );
        assert_eq!(pairs(&events), vec![("Company B", "Company A", "2022-01-01".to_string())]);
    }

    #[test]
    fn test_baseline_plus_dated_renames_once() {
        let events = rebuild(
            vec![
                IssuerObservation::new("E9999", "A Corp", "exchange_listing"),
                incoming("A Corp", "2021-01-01"),
                incoming("A Corporation", "2023-06-01"),
            ],
            &[],
        );
        assert_eq!(pairs(&events), vec![("A Corp", "A Corporation", "2023-06-01".to_string())]);
    }

    #[test]
    fn test_spelling_variants_are_not_changes() {
        let events = rebuild(
            vec![
                incoming("トヨタ自動車(株)", "2020-01-01"),
                incoming("トヨタ自動車株式会社", "2021-01-01"),
                incoming("トヨタ自動車 株式会社", "2022-01-01"),
            ],
            &[],
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_no_consecutive_equal_names() {
        let events = rebuild(
            vec![
                incoming("Alpha", "2020-01-01"),
                incoming("Beta", "2020-06-01"),
                incoming("ALPHA", "2021-01-01"),
                incoming("Beta", "2022-01-01"),
            ],
            &[],
        );
        for pair in events.windows(2) {
            assert_ne!(normalize_name(&pair[0].new_name), normalize_name(&pair[1].new_name));
        }
        for e in &events {
            assert_ne!(normalize_name(&e.old_name), normalize_name(&e.new_name));
        }
    }

    #[test]
    fn test_untouched_issuers_keep_their_events_and_empty_rebuild_clears() {
        let recorded = vec![
            NameChangeEvent::new("E0001", "Old", "New", day("2020-01-01")),
            NameChangeEvent::new("E9999", "Wrong", "Company A", day("2023-01-01")),
        ];
        let timelines = build_timelines(vec![incoming("Company A", "2022-01-01")]);
        let touched: BTreeSet<String> = ["E9999".to_string()].into_iter().collect();

        let full = rebuild_name_history(recorded.clone(), &timelines, &touched);
        // E9999's chain rebuilds from the recorded seed: Wrong → Company A at 2022
        assert_eq!(full.len(), 2);
        assert_eq!(full[0].registry_id, "E0001");
        assert_eq!(full[1].change_date, day("2022-01-01"));

        let empty = rebuild_name_history(
            vec![NameChangeEvent::new("E9999", "Company A", "Company A ", day("2023-01-01"))],
            &build_timelines(vec![incoming("Company A", "2022-01-01")]),
            &touched,
        );
        assert!(empty.is_empty());
    }
}
