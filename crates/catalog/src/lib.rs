//! `surplus-catalog` — listings offered by stores.

pub mod listing;

pub use listing::{
    AdjustQuantity, CreateListing, DeleteListing, Listing, ListingCommand, ListingCreated,
    ListingDeleted, ListingEvent, ListingId, ListingStatus, ListingUpdated, QuantityAdjusted,
    UpdateListing,
};
