// Entity Models
// "Identity persists, values change"
//
// - issuer: the master row keyed by registry id, plus identity bridges
// - observation: raw and repaired per-source observations
// - events: name-change, listing lifecycle and index membership history
// - catalog: the filed-document index
// - detail: dynamic-column detail rows routed to bins

pub mod catalog;
pub mod detail;
pub mod events;
pub mod issuer;
pub mod observation;

pub use catalog::{merge_catalog, CatalogRecord};
pub use detail::{cell_str, DetailFrame, DetailRow};
pub use events::{
    merge_index_history, merge_listing_history, IndexEvent, IndexEventType, ListingEvent,
    ListingEventType, NameChangeEvent,
};
pub use issuer::{IdentityBridge, ListingStatus, MasterEntity};
pub use observation::{IssuerObservation, Origin, RawObservation};
