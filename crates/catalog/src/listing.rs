use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use surplus_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use surplus_events::Event;

/// Listing identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ListingId(pub AggregateId);

impl ListingId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ListingId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Derived availability of a listing.
///
/// Never stored independently: always a pure function of `(quantity, is_active)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingStatus {
    Available,
    Sold,
}

impl ListingStatus {
    pub fn derive(quantity: i64, is_active: bool) -> Self {
        if quantity > 0 && is_active {
            ListingStatus::Available
        } else {
            ListingStatus::Sold
        }
    }
}

/// Aggregate root: Listing.
///
/// A batch of goods a store puts up at a discount. Quantity moves on every
/// order placement (down) and every cancellation/refund (back up).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    id: ListingId,
    store_id: Option<UserId>,
    title: String,
    description: String,
    contents: String,
    original_price: u64,
    discount_price: u64,
    quantity: i64,
    is_active: bool,
    version: u64,
    created: bool,
    deleted: bool,
}

impl Listing {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: ListingId) -> Self {
        Self {
            id,
            store_id: None,
            title: String::new(),
            description: String::new(),
            contents: String::new(),
            original_price: 0,
            discount_price: 0,
            quantity: 0,
            is_active: false,
            version: 0,
            created: false,
            deleted: false,
        }
    }

    pub fn id_typed(&self) -> ListingId {
        self.id
    }

    pub fn store_id(&self) -> Option<UserId> {
        self.store_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn contents(&self) -> &str {
        &self.contents
    }

    pub fn original_price(&self) -> u64 {
        self.original_price
    }

    pub fn discount_price(&self) -> u64 {
        self.discount_price
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn exists(&self) -> bool {
        self.created && !self.deleted
    }

    pub fn status(&self) -> ListingStatus {
        ListingStatus::derive(self.quantity, self.is_active)
    }

    pub fn is_available(&self) -> bool {
        self.exists() && self.status() == ListingStatus::Available
    }
}

impl AggregateRoot for Listing {
    type Id = ListingId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateListing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateListing {
    pub listing_id: ListingId,
    pub store_id: UserId,
    pub title: String,
    pub description: String,
    pub contents: String,
    pub original_price: u64,
    pub discount_price: u64,
    pub quantity: i64,
    pub is_active: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateListing (partial update by the owning store).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateListing {
    pub listing_id: ListingId,
    pub actor: UserId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub contents: Option<String>,
    pub original_price: Option<u64>,
    pub discount_price: Option<u64>,
    pub quantity: Option<i64>,
    pub is_active: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

impl UpdateListing {
    fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.contents.is_none()
            && self.original_price.is_none()
            && self.discount_price.is_none()
            && self.quantity.is_none()
            && self.is_active.is_none()
    }
}

/// Command: AdjustQuantity (stock movement driven by the order lifecycle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustQuantity {
    pub listing_id: ListingId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteListing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteListing {
    pub listing_id: ListingId,
    pub actor: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingCommand {
    CreateListing(CreateListing),
    UpdateListing(UpdateListing),
    AdjustQuantity(AdjustQuantity),
    DeleteListing(DeleteListing),
}

/// Event: ListingCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingCreated {
    pub listing_id: ListingId,
    pub store_id: UserId,
    pub title: String,
    pub description: String,
    pub contents: String,
    pub original_price: u64,
    pub discount_price: u64,
    pub quantity: i64,
    pub is_active: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ListingUpdated (only the changed fields are set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingUpdated {
    pub listing_id: ListingId,
    pub title: Option<String>,
    pub description: Option<String>,
    pub contents: Option<String>,
    pub original_price: Option<u64>,
    pub discount_price: Option<u64>,
    pub quantity: Option<i64>,
    pub is_active: Option<bool>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuantityAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityAdjusted {
    pub listing_id: ListingId,
    pub delta: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ListingDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDeleted {
    pub listing_id: ListingId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListingEvent {
    ListingCreated(ListingCreated),
    ListingUpdated(ListingUpdated),
    QuantityAdjusted(QuantityAdjusted),
    ListingDeleted(ListingDeleted),
}

impl Event for ListingEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ListingEvent::ListingCreated(_) => "catalog.listing.created",
            ListingEvent::ListingUpdated(_) => "catalog.listing.updated",
            ListingEvent::QuantityAdjusted(_) => "catalog.listing.quantity_adjusted",
            ListingEvent::ListingDeleted(_) => "catalog.listing.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ListingEvent::ListingCreated(e) => e.occurred_at,
            ListingEvent::ListingUpdated(e) => e.occurred_at,
            ListingEvent::QuantityAdjusted(e) => e.occurred_at,
            ListingEvent::ListingDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Listing {
    type Command = ListingCommand;
    type Event = ListingEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ListingEvent::ListingCreated(e) => {
                self.id = e.listing_id;
                self.store_id = Some(e.store_id);
                self.title = e.title.clone();
                self.description = e.description.clone();
                self.contents = e.contents.clone();
                self.original_price = e.original_price;
                self.discount_price = e.discount_price;
                self.quantity = e.quantity;
                self.is_active = e.is_active;
                self.created = true;
                self.deleted = false;
            }
            ListingEvent::ListingUpdated(e) => {
                if let Some(title) = &e.title {
                    self.title = title.clone();
                }
                if let Some(description) = &e.description {
                    self.description = description.clone();
                }
                if let Some(contents) = &e.contents {
                    self.contents = contents.clone();
                }
                if let Some(original_price) = e.original_price {
                    self.original_price = original_price;
                }
                if let Some(discount_price) = e.discount_price {
                    self.discount_price = discount_price;
                }
                if let Some(quantity) = e.quantity {
                    self.quantity = quantity;
                }
                if let Some(is_active) = e.is_active {
                    self.is_active = is_active;
                }
            }
            ListingEvent::QuantityAdjusted(e) => {
                self.quantity += e.delta;
            }
            ListingEvent::ListingDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ListingCommand::CreateListing(cmd) => self.handle_create(cmd),
            ListingCommand::UpdateListing(cmd) => self.handle_update(cmd),
            ListingCommand::AdjustQuantity(cmd) => self.handle_adjust(cmd),
            ListingCommand::DeleteListing(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Listing {
    fn ensure_listing_id(&self, listing_id: ListingId) -> Result<(), DomainError> {
        if self.id != listing_id {
            return Err(DomainError::invariant("listing_id mismatch"));
        }
        Ok(())
    }

    fn ensure_owner(&self, actor: UserId) -> Result<(), DomainError> {
        if self.store_id != Some(actor) {
            return Err(DomainError::Forbidden);
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateListing) -> Result<Vec<ListingEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("listing already exists"));
        }
        if cmd.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        check_prices(cmd.original_price, cmd.discount_price)?;
        if cmd.quantity < 0 {
            return Err(DomainError::validation("quantity cannot be negative"));
        }

        Ok(vec![ListingEvent::ListingCreated(ListingCreated {
            listing_id: cmd.listing_id,
            store_id: cmd.store_id,
            title: cmd.title.clone(),
            description: cmd.description.clone(),
            contents: cmd.contents.clone(),
            original_price: cmd.original_price,
            discount_price: cmd.discount_price,
            quantity: cmd.quantity,
            is_active: cmd.is_active,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateListing) -> Result<Vec<ListingEvent>, DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        self.ensure_listing_id(cmd.listing_id)?;
        self.ensure_owner(cmd.actor)?;

        if cmd.is_empty() {
            return Err(DomainError::validation(
                "at least one field must be provided to update",
            ));
        }

        if let Some(title) = &cmd.title {
            if title.trim().is_empty() {
                return Err(DomainError::validation("title cannot be empty"));
            }
        }
        if let Some(quantity) = cmd.quantity {
            if quantity < 0 {
                return Err(DomainError::validation("quantity cannot be negative"));
            }
        }

        // Price invariant is checked on the merged (post-update) values.
        let original = cmd.original_price.unwrap_or(self.original_price);
        let discount = cmd.discount_price.unwrap_or(self.discount_price);
        check_prices(original, discount)?;

        Ok(vec![ListingEvent::ListingUpdated(ListingUpdated {
            listing_id: cmd.listing_id,
            title: cmd.title.clone(),
            description: cmd.description.clone(),
            contents: cmd.contents.clone(),
            original_price: cmd.original_price,
            discount_price: cmd.discount_price,
            quantity: cmd.quantity,
            is_active: cmd.is_active,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustQuantity) -> Result<Vec<ListingEvent>, DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        self.ensure_listing_id(cmd.listing_id)?;

        if cmd.delta == 0 {
            return Err(DomainError::validation("delta cannot be zero"));
        }

        let new_quantity = self.quantity + cmd.delta;
        if new_quantity < 0 {
            return Err(DomainError::insufficient_funds(
                "listing quantity cannot go negative",
            ));
        }

        Ok(vec![ListingEvent::QuantityAdjusted(QuantityAdjusted {
            listing_id: cmd.listing_id,
            delta: cmd.delta,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delete(&self, cmd: &DeleteListing) -> Result<Vec<ListingEvent>, DomainError> {
        if !self.exists() {
            return Err(DomainError::not_found());
        }
        self.ensure_listing_id(cmd.listing_id)?;
        self.ensure_owner(cmd.actor)?;

        Ok(vec![ListingEvent::ListingDeleted(ListingDeleted {
            listing_id: cmd.listing_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

fn check_prices(original_price: u64, discount_price: u64) -> Result<(), DomainError> {
    if original_price == 0 {
        return Err(DomainError::validation("original price must be positive"));
    }
    if discount_price == 0 {
        return Err(DomainError::validation("discount price must be positive"));
    }
    if original_price <= discount_price {
        return Err(DomainError::validation(
            "original price must be greater than discount price",
        ));
    }
    Ok(())
}
