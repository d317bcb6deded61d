// 🕰️ Observation Timeline - the one place observations get ordered
//
// Attribute resolution and name-history rebuild both read the same per-issuer
// timeline, so ordering rules live here and nowhere else:
//   1. undated observations first (baseline registries carry no date)
//   2. then by date ascending
//   3. equal dates: History < Master < Incoming (see Origin)
//   4. still tied: canonical content key (the fingerprint)
//
// Step 4 makes the order total, so any arrival order of the same set yields
// the same timeline. Exact duplicates (same fingerprint) collapse to one.

use chrono::NaiveDate;
use std::collections::{BTreeMap, HashSet};

use crate::entities::IssuerObservation;

/// Sorted, deduplicated observations of one issuer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    entries: Vec<IssuerObservation>,
}

impl Timeline {
    pub fn entries(&self) -> &[IssuerObservation] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn undated(&self) -> impl Iterator<Item = &IssuerObservation> {
        self.entries.iter().filter(|o| o.observed_at.is_none())
    }

    pub fn dated(&self) -> impl Iterator<Item = &IssuerObservation> {
        self.entries.iter().filter(|o| o.observed_at.is_some())
    }

    pub fn latest_dated(&self) -> Option<&IssuerObservation> {
        self.dated().last()
    }

    pub fn last_observed_at(&self) -> Option<NaiveDate> {
        self.latest_dated().and_then(|o| o.observed_at)
    }

    /// The current baseline observation: the last one from `source`.
    pub fn last_from_source(&self, source: &str) -> Option<&IssuerObservation> {
        self.entries.iter().rev().find(|o| o.source == source)
    }

    /// Most recent value of `field` that passes `usable`.
    pub fn latest_value<F, P>(&self, field: F, usable: P) -> Option<String>
    where
        F: Fn(&IssuerObservation) -> Option<&str>,
        P: Fn(&str) -> bool,
    {
        self.entries
            .iter()
            .rev()
            .filter_map(|o| field(o))
            .find(|v| usable(v))
            .map(str::to_string)
    }
}

/// All timelines of one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct Timelines {
    pub by_issuer: BTreeMap<String, Timeline>,
    /// Observations dropped as exact duplicates.
    pub duplicates_dropped: usize,
}

/// Group observations per issuer, sort each group, drop exact duplicates.
pub fn build_timelines(observations: Vec<IssuerObservation>) -> Timelines {
    let mut keyed: BTreeMap<String, Vec<(String, IssuerObservation)>> = BTreeMap::new();
    for obs in observations {
        let fingerprint = obs.fingerprint();
        keyed.entry(obs.registry_id.clone()).or_default().push((fingerprint, obs));
    }

    let mut timelines = Timelines::default();
    for (registry_id, mut group) in keyed {
        group.sort_by(|(fa, a), (fb, b)| {
            (a.observed_at.is_some(), a.observed_at, a.origin, fa)
                .cmp(&(b.observed_at.is_some(), b.observed_at, b.origin, fb))
        });

        let mut seen: HashSet<String> = HashSet::new();
        let mut entries = Vec::with_capacity(group.len());
        for (fingerprint, obs) in group {
            if seen.insert(fingerprint) {
                entries.push(obs);
            } else {
                timelines.duplicates_dropped += 1;
            }
        }
        timelines.by_issuer.insert(registry_id, Timeline { entries });
    }
    timelines
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::Origin;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample() -> Vec<IssuerObservation> {
        vec![
            IssuerObservation::new("E1", "B", "filings").dated(day(2023, 6, 1)),
            IssuerObservation::new("E1", "A", "exchange_listing"),
            IssuerObservation::new("E1", "A", "filings").dated(day(2021, 1, 1)),
            IssuerObservation::new("E1", "A", "history")
                .dated(day(2021, 1, 1))
                .with_origin(Origin::History),
            IssuerObservation::new("E2", "Z", "filings").dated(day(2020, 1, 1)),
        ]
    }

    #[test]
    fn test_undated_first_then_date_then_origin() {
        let t = build_timelines(sample());
        let e1: Vec<_> = t.by_issuer["E1"]
            .entries()
            .iter()
            .map(|o| (o.name.as_str(), o.source.as_str()))
            .collect();
        assert_eq!(
            e1,
            vec![("A", "exchange_listing"), ("A", "history"), ("A", "filings"), ("B", "filings")]
        );
        assert_eq!(t.by_issuer["E1"].last_observed_at(), Some(day(2023, 6, 1)));
    }

    #[test]
    fn test_order_independent() {
        let forward = build_timelines(sample());
        let mut reversed = sample();
        reversed.reverse();
        let backward = build_timelines(reversed);
        assert_eq!(forward.by_issuer, backward.by_issuer);
    }

    #[test]
    fn test_exact_duplicates_collapse() {
        let mut obs = sample();
        obs.push(IssuerObservation::new("E1", "B", "filings").dated(day(2023, 6, 1)));
        let t = build_timelines(obs);
        assert_eq!(t.duplicates_dropped, 1);
        assert_eq!(t.by_issuer["E1"].len(), 4);
    }

    #[test]
    fn test_latest_value_skips_unusable() {
        let mut a = IssuerObservation::new("E1", "A", "s1").dated(day(2020, 1, 1));
        a.sector = Some("輸送用機器".into());
        let mut b = IssuerObservation::new("E1", "A", "s2").dated(day(2022, 1, 1));
        b.sector = Some("その他".into());
        let t = build_timelines(vec![a, b]);

        let sector = t.by_issuer["E1"].latest_value(|o| o.sector.as_deref(), |v| v != "その他");
        assert_eq!(sector.as_deref(), Some("輸送用機器"));
    }
}
