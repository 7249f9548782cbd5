use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use surplus_catalog::ListingId;
use surplus_core::{Aggregate, AggregateId, AggregateRoot, DomainError, UserId};
use surplus_events::Event;

/// Order identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order status lifecycle.
///
/// pending → confirmed → completed; pending/confirmed → cancelled;
/// completed → cancelled via the refund path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

/// Order line: listing, seller and quantity at placement time.
///
/// Immutable once appended. The unit price is deliberately *not* frozen here:
/// totals are recomputed from the listing's current discount price at every
/// observation point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub listing_id: ListingId,
    pub seller_id: UserId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    buyer_id: Option<UserId>,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            buyer_id: None,
            status: OrderStatus::Pending,
            lines: Vec::new(),
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn buyer_id(&self) -> Option<UserId> {
        self.buyer_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// An open order accepts further placements.
    pub fn is_open(&self) -> bool {
        matches!(self.status, OrderStatus::Pending | OrderStatus::Confirmed)
    }

    /// Seller credited on completion: the owner of the first line's listing.
    pub fn first_seller(&self) -> Option<UserId> {
        self.lines.first().map(|l| l.seller_id)
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenOrder {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLine {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub listing_id: ListingId,
    pub seller_id: UserId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RefundOrder (cancellation of an already-completed order).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundOrder {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    OpenOrder(OpenOrder),
    AddLine(AddLine),
    ConfirmOrder(ConfirmOrder),
    CancelOrder(CancelOrder),
    CompleteOrder(CompleteOrder),
    RefundOrder(RefundOrder),
}

/// Event: OrderOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderOpened {
    pub order_id: OrderId,
    pub buyer_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAdded {
    pub order_id: OrderId,
    pub line_no: u32,
    pub listing_id: ListingId,
    pub seller_id: UserId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderRefunded (terminal state is cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRefunded {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderOpened(OrderOpened),
    LineAdded(LineAdded),
    OrderConfirmed(OrderConfirmed),
    OrderCancelled(OrderCancelled),
    OrderCompleted(OrderCompleted),
    OrderRefunded(OrderRefunded),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderOpened(_) => "orders.order.opened",
            OrderEvent::LineAdded(_) => "orders.order.line_added",
            OrderEvent::OrderConfirmed(_) => "orders.order.confirmed",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
            OrderEvent::OrderCompleted(_) => "orders.order.completed",
            OrderEvent::OrderRefunded(_) => "orders.order.refunded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderOpened(e) => e.occurred_at,
            OrderEvent::LineAdded(e) => e.occurred_at,
            OrderEvent::OrderConfirmed(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
            OrderEvent::OrderCompleted(e) => e.occurred_at,
            OrderEvent::OrderRefunded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderOpened(e) => {
                self.id = e.order_id;
                self.buyer_id = Some(e.buyer_id);
                self.status = OrderStatus::Pending;
                self.lines.clear();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::LineAdded(e) => {
                self.lines.push(OrderLine {
                    line_no: e.line_no,
                    listing_id: e.listing_id,
                    seller_id: e.seller_id,
                    quantity: e.quantity,
                    occurred_at: e.occurred_at,
                });
            }
            OrderEvent::OrderConfirmed(_) => {
                self.status = OrderStatus::Confirmed;
            }
            OrderEvent::OrderCancelled(_) => {
                self.status = OrderStatus::Cancelled;
            }
            OrderEvent::OrderCompleted(_) => {
                self.status = OrderStatus::Completed;
            }
            OrderEvent::OrderRefunded(_) => {
                self.status = OrderStatus::Cancelled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::OpenOrder(cmd) => self.handle_open(cmd),
            OrderCommand::AddLine(cmd) => self.handle_add_line(cmd),
            OrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
            OrderCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
            OrderCommand::RefundOrder(cmd) => self.handle_refund(cmd),
        }
    }
}

impl Order {
    /// Transition lookups behave like a `(id, buyer, required-state)` filter:
    /// a wrong buyer or wrong state is indistinguishable from a missing order.
    fn ensure_match(&self, buyer_id: UserId, allowed: &[OrderStatus]) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.buyer_id != Some(buyer_id) {
            return Err(DomainError::not_found());
        }
        if !allowed.contains(&self.status) {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }

        Ok(vec![OrderEvent::OrderOpened(OrderOpened {
            order_id: cmd.order_id,
            buyer_id: cmd.buyer_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line(&self, cmd: &AddLine) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_match(
            cmd.buyer_id,
            &[OrderStatus::Pending, OrderStatus::Confirmed],
        )?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let next_line_no = (self.lines.len() as u32) + 1;

        Ok(vec![OrderEvent::LineAdded(LineAdded {
            order_id: cmd.order_id,
            line_no: next_line_no,
            listing_id: cmd.listing_id,
            seller_id: cmd.seller_id,
            quantity: cmd.quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_match(cmd.buyer_id, &[OrderStatus::Pending])?;

        Ok(vec![OrderEvent::OrderConfirmed(OrderConfirmed {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_match(
            cmd.buyer_id,
            &[OrderStatus::Pending, OrderStatus::Confirmed],
        )?;

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_match(cmd.buyer_id, &[OrderStatus::Confirmed])?;

        if self.lines.is_empty() {
            return Err(DomainError::validation("order has no line items"));
        }

        Ok(vec![OrderEvent::OrderCompleted(OrderCompleted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_refund(&self, cmd: &RefundOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_match(cmd.buyer_id, &[OrderStatus::Completed])?;

        if self.lines.is_empty() {
            return Err(DomainError::validation("order has no line items"));
        }

        Ok(vec![OrderEvent::OrderRefunded(OrderRefunded {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
