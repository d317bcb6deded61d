// 📜 History Events - name changes, listing lifecycle, index membership
//
// Name-change events are rebuilt per issuer on every run; listing events are
// only ever appended (deduplicated on issuer + type + date). Index events
// arrive ready-made from workers and are appended the same way, keyed on
// index + code + type + date.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// NAME CHANGE EVENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameChangeEvent {
    pub registry_id: String,
    pub old_name: String,
    pub new_name: String,
    pub change_date: NaiveDate,
}

impl NameChangeEvent {
    pub fn new(
        registry_id: impl Into<String>,
        old_name: impl Into<String>,
        new_name: impl Into<String>,
        change_date: NaiveDate,
    ) -> Self {
        NameChangeEvent {
            registry_id: registry_id.into(),
            old_name: old_name.into(),
            new_name: new_name.into(),
            change_date,
        }
    }
}

// ============================================================================
// LISTING EVENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ListingEventType {
    Listing,
    Delisting,
}

impl ListingEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingEventType::Listing => "LISTING",
            ListingEventType::Delisting => "DELISTING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LISTING" => Some(ListingEventType::Listing),
            "DELISTING" => Some(ListingEventType::Delisting),
            _ => None,
        }
    }
}

/// Lifecycle transition, dated at processing time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ListingEvent {
    pub registry_id: String,
    pub trading_code: Option<String>,
    pub event_type: ListingEventType,
    pub event_date: NaiveDate,
}

impl ListingEvent {
    /// Dedup key: the same transition on the same day is one event.
    pub fn dedup_key(&self) -> (&str, ListingEventType, NaiveDate) {
        (&self.registry_id, self.event_type, self.event_date)
    }
}

/// Append new events to an existing listing history without duplicates.
///
/// Existing rows win on key collisions; output is sorted by issuer then date.
pub fn merge_listing_history(existing: Vec<ListingEvent>, new_events: Vec<ListingEvent>) -> Vec<ListingEvent> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::with_capacity(existing.len() + new_events.len());

    for event in existing.into_iter().chain(new_events) {
        let (id, event_type, event_date) = event.dedup_key();
        if seen.insert((id.to_string(), event_type, event_date)) {
            merged.push(event);
        }
    }

    merged.sort_by(|a, b| {
        (&a.registry_id, a.event_date, a.event_type).cmp(&(&b.registry_id, b.event_date, b.event_type))
    });
    merged
}

// ============================================================================
// INDEX EVENT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum IndexEventType {
    Add,
    Remove,
}

impl IndexEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexEventType::Add => "ADD",
            IndexEventType::Remove => "REMOVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ADD" => Some(IndexEventType::Add),
            "REMOVE" => Some(IndexEventType::Remove),
            _ => None,
        }
    }
}

/// A security joining or leaving an index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexEvent {
    pub index_name: String,
    pub trading_code: String,
    pub event_type: IndexEventType,
    pub event_date: NaiveDate,
}

/// Append index events; on a key collision the later row replaces the
/// earlier one. Output is sorted by index, code, date.
pub fn merge_index_history(existing: Vec<IndexEvent>, new_events: Vec<IndexEvent>) -> Vec<IndexEvent> {
    let mut by_key: std::collections::BTreeMap<(String, String, IndexEventType, NaiveDate), IndexEvent> =
        std::collections::BTreeMap::new();
    for event in existing.into_iter().chain(new_events) {
        let key = (
            event.index_name.clone(),
            event.trading_code.clone(),
            event.event_type,
            event.event_date,
        );
        by_key.insert(key, event);
    }

    let mut merged: Vec<IndexEvent> = by_key.into_values().collect();
    merged.sort_by(|a, b| {
        (&a.index_name, &a.trading_code, a.event_date, a.event_type)
            .cmp(&(&b.index_name, &b.trading_code, b.event_date, b.event_type))
    });
    merged
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn event(id: &str, t: ListingEventType, d: NaiveDate) -> ListingEvent {
        ListingEvent {
            registry_id: id.to_string(),
            trading_code: Some("72030".to_string()),
            event_type: t,
            event_date: d,
        }
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!(ListingEventType::parse("listing"), Some(ListingEventType::Listing));
        assert_eq!(ListingEventType::parse(" DELISTING "), Some(ListingEventType::Delisting));
        assert_eq!(ListingEventType::parse("RE-LISTING"), None);
    }

    #[test]
    fn test_merge_listing_history_dedups() {
        let existing = vec![event("E1", ListingEventType::Delisting, date(2024, 3, 1))];
        let new_events = vec![
            event("E1", ListingEventType::Delisting, date(2024, 3, 1)),
            event("E1", ListingEventType::Listing, date(2025, 1, 10)),
        ];

        let merged = merge_listing_history(existing, new_events);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].event_type, ListingEventType::Delisting);
        assert_eq!(merged[1].event_type, ListingEventType::Listing);
    }

    #[test]
    fn test_merge_index_history_dedups_on_full_key() {
        let add = |index: &str, code: &str, d: NaiveDate| IndexEvent {
            index_name: index.to_string(),
            trading_code: code.to_string(),
            event_type: IndexEventType::Add,
            event_date: d,
        };
        let existing = vec![add("TOPIX Core30", "72030", date(2024, 10, 7))];
        let new_events = vec![
            add("TOPIX Core30", "72030", date(2024, 10, 7)),
            add("Nikkei 225", "72030", date(2024, 10, 7)),
            IndexEvent {
                event_type: IndexEventType::Remove,
                ..add("TOPIX Core30", "72030", date(2025, 10, 7))
            },
        ];

        let merged = merge_index_history(existing, new_events);
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].index_name, "Nikkei 225");
        assert_eq!(merged[2].event_type, IndexEventType::Remove);
        assert_eq!(IndexEventType::parse(" remove"), Some(IndexEventType::Remove));
    }
}
