use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use surplus_catalog::{Listing, ListingStatus};
use surplus_infra::projections::ListingReadModel;
use surplus_orders::OrderStatus;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateListingRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub contents: String,
    pub original_price: u64,
    pub discount_price: u64,
    pub quantity: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct UpdateListingRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub contents: Option<String>,
    pub original_price: Option<u64>,
    pub discount_price: Option<u64>,
    pub quantity: Option<i64>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    pub listing_id: String,
    pub quantity: i64,
}

#[derive(Debug, Deserialize)]
pub struct DepositRequest {
    pub amount: u64,
}

#[derive(Debug, Deserialize)]
pub struct BrowseListingsQuery {
    pub price_min: Option<u64>,
    pub price_max: Option<u64>,
    pub search: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StoreListingsQuery {
    pub search: Option<String>,
    pub sort: Option<String>,
}

// -------------------------
// Response views
// -------------------------

/// Listing as returned to clients (a snapshot at response time).
#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    pub id: String,
    pub store_id: String,
    pub title: String,
    pub description: String,
    pub contents: String,
    pub original_price: u64,
    pub discount_price: u64,
    pub quantity: i64,
    pub is_active: bool,
    pub status: ListingStatus,
}

impl ListingView {
    /// Snapshot from a rehydrated aggregate (command path).
    pub fn from_aggregate(listing: &Listing) -> Option<Self> {
        let store_id = listing.store_id()?;
        if !listing.exists() {
            return None;
        }
        Some(Self {
            id: listing.id_typed().to_string(),
            store_id: store_id.to_string(),
            title: listing.title().to_string(),
            description: listing.description().to_string(),
            contents: listing.contents().to_string(),
            original_price: listing.original_price(),
            discount_price: listing.discount_price(),
            quantity: listing.quantity(),
            is_active: listing.is_active(),
            status: listing.status(),
        })
    }

    /// Snapshot from the listings projection (query path).
    pub fn from_read_model(rm: &ListingReadModel) -> Self {
        Self {
            id: rm.listing_id.to_string(),
            store_id: rm.store_id.to_string(),
            title: rm.title.clone(),
            description: rm.description.clone(),
            contents: rm.contents.clone(),
            original_price: rm.original_price,
            discount_price: rm.discount_price,
            quantity: rm.quantity,
            is_active: rm.is_active,
            status: rm.status,
        }
    }
}

/// One order line with its referenced listing snapshot (if it still exists).
#[derive(Debug, Clone, Serialize)]
pub struct OrderLineView {
    pub line_no: u32,
    pub quantity: i64,
    pub listing: Option<ListingView>,
}

/// Order with nested line items and the lazily recomputed total.
#[derive(Debug, Clone, Serialize)]
pub struct OrderView {
    pub id: String,
    pub buyer_id: String,
    pub status: OrderStatus,
    /// Σ(line quantity × listing's current discount price).
    pub total_price: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub items: Vec<OrderLineView>,
}
