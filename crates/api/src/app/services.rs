use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use tokio::sync::broadcast;

use surplus_catalog::{
    AdjustQuantity, CreateListing, DeleteListing, Listing, ListingCommand, ListingId, UpdateListing,
};
use surplus_core::{AggregateId, UserId};
use surplus_events::{EventBus, EventEnvelope, InMemoryEventBus};
use surplus_infra::command_dispatcher::{CommandDispatcher, DispatchError, rehydrate};
use surplus_infra::event_store::{InMemoryEventStore, StoredEvent};
use surplus_infra::jobs::{
    InMemoryJobStore, Job, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobId, JobStore,
    RetryPolicy,
};
use surplus_infra::projections::{
    BalanceReadModel, BalancesProjection, ListingReadModel, ListingsProjection, OrderReadModel,
    OrdersProjection,
};
use surplus_infra::read_model::InMemoryStore;
use surplus_ledger::{Account, Ledger, LedgerCommand, LedgerEvent, LedgerId, PostEntry};
use surplus_orders::{
    AddLine, CancelOrder, CompleteOrder, ConfirmOrder, OpenOrder, Order, OrderCommand, OrderId,
    OrderLine, OrderStatus, RefundOrder,
};

use crate::app::dto::{
    BrowseListingsQuery, CreateListingRequest, ListingView, OrderLineView, OrderView,
    StoreListingsQuery, UpdateListingRequest,
};

const AGGREGATE_LISTING: &str = "catalog.listing";
const AGGREGATE_ORDER: &str = "orders.order";
const AGGREGATE_LEDGER: &str = "ledger";

const REPORT_JOB_KIND: &str = "reports.store_sales";

type Envelope = EventEnvelope<JsonValue>;
type InMemoryDispatcher = CommandDispatcher<Arc<InMemoryEventStore>, Arc<InMemoryEventBus<Envelope>>>;
type SharedListings = Arc<ListingsProjection<Arc<InMemoryStore<ListingId, ListingReadModel>>>>;
type SharedOrders = Arc<OrdersProjection<Arc<InMemoryStore<OrderId, OrderReadModel>>>>;
type SharedBalances = Arc<BalancesProjection<Arc<InMemoryStore<Account, BalanceReadModel>>>>;

/// Realtime message broadcast via SSE, filtered to its recipients.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub recipients: Vec<UserId>,
    pub payload: JsonValue,
}

/// Application-service failures surfaced to the HTTP layer.
#[derive(Debug)]
pub enum ServiceError {
    Dispatch(DispatchError),
    NotFound,
    InsufficientFunds(String),
    Validation(String),
    Conflict(String),
}

impl From<DispatchError> for ServiceError {
    fn from(value: DispatchError) -> Self {
        ServiceError::Dispatch(value)
    }
}

/// Infrastructure wiring + the multi-aggregate orchestration flows.
///
/// Command-path reads rehydrate aggregates straight from the event store
/// (read-your-writes); list/query endpoints read the eventually consistent
/// projections fed by the background bus subscriber.
pub struct AppServices {
    dispatcher: InMemoryDispatcher,
    event_store: Arc<InMemoryEventStore>,
    listings_projection: SharedListings,
    orders_projection: SharedOrders,
    balances_projection: SharedBalances,
    ledger_id: AggregateId,
    jobs: Arc<InMemoryJobStore>,
    job_executor: Mutex<Option<JobExecutorHandle>>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

pub fn build_services() -> Arc<AppServices> {
    // In-memory infra wiring: store + bus + projections.
    let store = Arc::new(InMemoryEventStore::new());
    let bus: Arc<InMemoryEventBus<Envelope>> = Arc::new(InMemoryEventBus::new());

    let listings_projection: SharedListings =
        Arc::new(ListingsProjection::new(Arc::new(InMemoryStore::new())));
    let orders_projection: SharedOrders =
        Arc::new(OrdersProjection::new(Arc::new(InMemoryStore::new())));
    let balances_projection: SharedBalances =
        Arc::new(BalancesProjection::new(Arc::new(InMemoryStore::new())));

    // Realtime channel (SSE): lossy broadcast, recipient-filtered in handlers.
    let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

    // Background subscriber: bus -> projections -> realtime notifications.
    {
        let sub = bus.subscribe();
        let listings_projection = listings_projection.clone();
        let orders_projection = orders_projection.clone();
        let balances_projection = balances_projection.clone();
        let realtime_tx = realtime_tx.clone();
        tokio::task::spawn_blocking(move || {
            loop {
                match sub.recv() {
                    Ok(env) => {
                        let at = env.aggregate_type().to_string();

                        // Deletions drop the read model, so capture the owner first.
                        let prior_listing_owner = if at == AGGREGATE_LISTING {
                            listings_projection
                                .get(&ListingId::new(env.aggregate_id()))
                                .map(|l| l.store_id)
                        } else {
                            None
                        };

                        let apply_ok = match at.as_str() {
                            AGGREGATE_LISTING => listings_projection
                                .apply_envelope(&env)
                                .map_err(|e| e.to_string()),
                            AGGREGATE_ORDER => orders_projection
                                .apply_envelope(&env)
                                .map_err(|e| e.to_string()),
                            AGGREGATE_LEDGER => balances_projection
                                .apply_envelope(&env)
                                .map_err(|e| e.to_string()),
                            _ => Ok(()),
                        };

                        if let Err(e) = apply_ok {
                            tracing::warn!("projection apply failed: {e}");
                            continue;
                        }

                        let recipients =
                            interested_users(&env, &listings_projection, &orders_projection)
                                .into_iter()
                                .chain(prior_listing_owner)
                                .collect::<Vec<_>>();

                        // Lossy broadcast; no backpressure on the command path.
                        let _ = realtime_tx.send(RealtimeMessage {
                            topic: format!("{at}.projection_updated"),
                            recipients,
                            payload: json!({
                                "kind": "projection_update",
                                "aggregate_type": at,
                                "aggregate_id": env.aggregate_id().to_string(),
                                "sequence_number": env.sequence_number(),
                            }),
                        });
                    }
                    Err(_) => break,
                }
            }
        });
    }

    // Background job executor: report generation with fixed retries.
    let jobs = Arc::new(InMemoryJobStore::new());
    let job_executor = {
        let mut executor = JobExecutor::new(
            jobs.clone(),
            RetryPolicy::fixed(3, std::time::Duration::from_millis(200)),
        );
        let listings_projection = listings_projection.clone();
        let orders_projection = orders_projection.clone();
        executor.register_handler(REPORT_JOB_KIND, move |job| {
            build_store_sales_report(job, &listings_projection, &orders_projection)
        });
        executor.spawn(JobExecutorConfig::default())
    };

    let dispatcher = CommandDispatcher::new(store.clone(), bus);

    Arc::new(AppServices {
        dispatcher,
        event_store: store,
        listings_projection,
        orders_projection,
        balances_projection,
        ledger_id: AggregateId::new(),
        jobs,
        job_executor: Mutex::new(Some(job_executor)),
        realtime_tx,
    })
}

/// Which users a projection update is relevant to.
fn interested_users(
    env: &Envelope,
    listings: &SharedListings,
    orders: &SharedOrders,
) -> Vec<UserId> {
    match env.aggregate_type() {
        AGGREGATE_LISTING => listings
            .get(&ListingId::new(env.aggregate_id()))
            .map(|l| vec![l.store_id])
            .unwrap_or_default(),
        AGGREGATE_ORDER => match orders.get(&OrderId::new(env.aggregate_id())) {
            Some(rm) => {
                let mut users = vec![rm.buyer_id];
                for line in &rm.lines {
                    if !users.contains(&line.seller_id) {
                        users.push(line.seller_id);
                    }
                }
                users
            }
            None => vec![],
        },
        AGGREGATE_LEDGER => match serde_json::from_value::<LedgerEvent>(env.payload().clone()) {
            Ok(LedgerEvent::EntryPosted(e)) => {
                let mut users = Vec::new();
                for line in &e.lines {
                    if let Account::User(user_id) = line.account {
                        if !users.contains(&user_id) {
                            users.push(user_id);
                        }
                    }
                }
                users
            }
            Err(_) => vec![],
        },
        _ => vec![],
    }
}

fn build_store_sales_report(
    job: &Job,
    listings: &SharedListings,
    orders: &SharedOrders,
) -> Result<JsonValue, String> {
    let store_id = job.requested_by;

    let store_listings = listings.list_for_store(store_id);
    let total_listings = store_listings.len();
    let active_listings = store_listings.iter().filter(|l| l.is_available()).count();

    let touching = orders.list_touching_seller(store_id);
    let total_orders = touching.len();

    let mut completed_orders = 0usize;
    let mut gross_revenue: u64 = 0;
    for order in &touching {
        if order.status != OrderStatus::Completed {
            continue;
        }
        completed_orders += 1;
        for line in &order.lines {
            if line.seller_id != store_id {
                continue;
            }
            if let Some(listing) = listings.get(&line.listing_id) {
                gross_revenue = gross_revenue
                    .saturating_add(listing.discount_price.saturating_mul(line.quantity as u64));
            }
        }
    }

    Ok(json!({
        "store_id": store_id.to_string(),
        "total_listings": total_listings,
        "active_listings": active_listings,
        "total_orders": total_orders,
        "completed_orders": completed_orders,
        "gross_revenue": gross_revenue,
        "generated_at": Utc::now(),
    }))
}

impl AppServices {
    fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Vec<StoredEvent>, DispatchError>
    where
        A: surplus_core::Aggregate<Error = surplus_core::DomainError>,
        A::Event: surplus_events::Event + serde::Serialize + serde::de::DeserializeOwned,
    {
        self.dispatcher
            .dispatch::<A>(aggregate_id, aggregate_type, command, make_aggregate)
    }

    fn load_listing(&self, listing_id: ListingId) -> Result<Listing, ServiceError> {
        Ok(rehydrate(&self.event_store, listing_id.0, |id| {
            Listing::empty(ListingId::new(id))
        })?)
    }

    fn load_order(&self, order_id: OrderId) -> Result<Order, ServiceError> {
        Ok(rehydrate(&self.event_store, order_id.0, |id| {
            Order::empty(OrderId::new(id))
        })?)
    }

    fn load_ledger(&self) -> Result<Ledger, ServiceError> {
        Ok(rehydrate(&self.event_store, self.ledger_id, |id| {
            Ledger::empty(LedgerId::new(id))
        })?)
    }

    fn post_ledger_entry(&self, entry: PostEntry) -> Result<(), ServiceError> {
        self.dispatch::<Ledger>(
            self.ledger_id,
            AGGREGATE_LEDGER,
            LedgerCommand::PostEntry(entry),
            |id| Ledger::empty(LedgerId::new(id)),
        )?;
        Ok(())
    }

    fn ledger_id_typed(&self) -> LedgerId {
        LedgerId::new(self.ledger_id)
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    /// Stop background workers (used by graceful shutdown paths).
    pub fn shutdown_workers(&self) {
        if let Ok(mut guard) = self.job_executor.lock() {
            if let Some(handle) = guard.take() {
                handle.shutdown();
            }
        }
    }

    // ---------------------------------------------------------------
    // Listings
    // ---------------------------------------------------------------

    pub fn create_listing(
        &self,
        store_id: UserId,
        req: CreateListingRequest,
    ) -> Result<ListingView, ServiceError> {
        let listing_id = ListingId::new(AggregateId::new());

        self.dispatch::<Listing>(
            listing_id.0,
            AGGREGATE_LISTING,
            ListingCommand::CreateListing(CreateListing {
                listing_id,
                store_id,
                title: req.title,
                description: req.description,
                contents: req.contents,
                original_price: req.original_price,
                discount_price: req.discount_price,
                quantity: req.quantity,
                is_active: req.is_active,
                occurred_at: Utc::now(),
            }),
            |id| Listing::empty(ListingId::new(id)),
        )?;

        let listing = self.load_listing(listing_id)?;
        ListingView::from_aggregate(&listing).ok_or(ServiceError::NotFound)
    }

    pub fn update_listing(
        &self,
        actor: UserId,
        listing_id: ListingId,
        req: UpdateListingRequest,
    ) -> Result<ListingView, ServiceError> {
        self.dispatch::<Listing>(
            listing_id.0,
            AGGREGATE_LISTING,
            ListingCommand::UpdateListing(UpdateListing {
                listing_id,
                actor,
                title: req.title,
                description: req.description,
                contents: req.contents,
                original_price: req.original_price,
                discount_price: req.discount_price,
                quantity: req.quantity,
                is_active: req.is_active,
                occurred_at: Utc::now(),
            }),
            |id| Listing::empty(ListingId::new(id)),
        )?;

        let listing = self.load_listing(listing_id)?;
        ListingView::from_aggregate(&listing).ok_or(ServiceError::NotFound)
    }

    pub fn delete_listing(&self, actor: UserId, listing_id: ListingId) -> Result<(), ServiceError> {
        // A listing stays deletable only once no non-cancelled order could
        // still restore quantity onto it.
        if self.orders_projection.any_open_reference(&listing_id) {
            return Err(ServiceError::Conflict(
                "listing is referenced by open orders".to_string(),
            ));
        }

        self.dispatch::<Listing>(
            listing_id.0,
            AGGREGATE_LISTING,
            ListingCommand::DeleteListing(DeleteListing {
                listing_id,
                actor,
                occurred_at: Utc::now(),
            }),
            |id| Listing::empty(ListingId::new(id)),
        )?;
        Ok(())
    }

    pub fn browse_listings(&self, query: &BrowseListingsQuery) -> Vec<ListingView> {
        let needle = query.search.as_deref().map(str::to_lowercase);
        let mut listings: Vec<_> = self
            .listings_projection
            .list()
            .into_iter()
            .filter(|l| l.is_available())
            .filter(|l| query.price_min.is_none_or(|min| l.discount_price >= min))
            .filter(|l| query.price_max.is_none_or(|max| l.discount_price <= max))
            .filter(|l| {
                needle.as_deref().is_none_or(|s| {
                    l.title.to_lowercase().contains(s)
                        || l.description.to_lowercase().contains(s)
                        || l.contents.to_lowercase().contains(s)
                })
            })
            .collect();
        listings.sort_by_key(|l| std::cmp::Reverse(l.created_at));
        listings.iter().map(ListingView::from_read_model).collect()
    }

    pub fn store_listings(&self, store_id: UserId, query: &StoreListingsQuery) -> Vec<ListingView> {
        let needle = query.search.as_deref().map(str::to_lowercase);
        let mut listings: Vec<_> = self
            .listings_projection
            .list_for_store(store_id)
            .into_iter()
            .filter(|l| {
                needle
                    .as_deref()
                    .is_none_or(|s| l.title.to_lowercase().contains(s))
            })
            .collect();

        match query.sort.as_deref() {
            Some("oldest") => listings.sort_by_key(|l| l.created_at),
            Some("price_low_to_high") => listings.sort_by_key(|l| l.discount_price),
            Some("price_high_to_low") => {
                listings.sort_by_key(|l| std::cmp::Reverse(l.discount_price))
            }
            // "newest" is the default.
            _ => listings.sort_by_key(|l| std::cmp::Reverse(l.created_at)),
        }

        listings.iter().map(ListingView::from_read_model).collect()
    }

    pub fn store_stats(&self, store_id: UserId) -> JsonValue {
        let listings = self.listings_projection.list_for_store(store_id);
        let active = listings.iter().filter(|l| l.is_available()).count();
        let orders = self.orders_projection.list_touching_seller(store_id);

        json!({
            "total_listings": listings.len(),
            "active_listings": active,
            "total_orders": orders.len(),
            "balance": self.balances_projection.user_balance(store_id),
        })
    }

    // ---------------------------------------------------------------
    // Orders
    // ---------------------------------------------------------------

    /// Place an order: validate the listing and the buyer's funds, reuse or
    /// open the buyer's order, move stock, append the line, hold the money.
    pub fn place_order(
        &self,
        buyer_id: UserId,
        listing_id: ListingId,
        quantity: i64,
    ) -> Result<OrderView, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::Validation(
                "quantity must be positive".to_string(),
            ));
        }

        // 1) The listing must exist, be available and cover the quantity.
        let listing = self.load_listing(listing_id)?;
        if !listing.is_available() || listing.quantity() < quantity {
            return Err(ServiceError::NotFound);
        }
        let seller_id = listing.store_id().ok_or(ServiceError::NotFound)?;

        // 2) This placement's cost at the current discount price.
        let candidate_total = listing
            .discount_price()
            .checked_mul(quantity as u64)
            .ok_or_else(|| ServiceError::Validation("order total overflows".to_string()))?;

        // 3) Funds check before any mutation (the ledger re-checks on post).
        let ledger = self.load_ledger()?;
        if ledger.balance(&Account::User(buyer_id)) < candidate_total as i64 {
            return Err(ServiceError::InsufficientFunds(
                "insufficient balance to place this order".to_string(),
            ));
        }

        // 4) Reuse the buyer's open order, or open a fresh one.
        let order_id = match self.orders_projection.find_open_for_buyer(buyer_id) {
            Some(open) => open.order_id,
            None => {
                let order_id = OrderId::new(AggregateId::new());
                self.dispatch::<Order>(
                    order_id.0,
                    AGGREGATE_ORDER,
                    OrderCommand::OpenOrder(OpenOrder {
                        order_id,
                        buyer_id,
                        occurred_at: Utc::now(),
                    }),
                    |id| Order::empty(OrderId::new(id)),
                )?;
                order_id
            }
        };

        // 5) Move stock (the aggregate rejects going below zero).
        self.dispatch::<Listing>(
            listing_id.0,
            AGGREGATE_LISTING,
            ListingCommand::AdjustQuantity(AdjustQuantity {
                listing_id,
                delta: -quantity,
                occurred_at: Utc::now(),
            }),
            |id| Listing::empty(ListingId::new(id)),
        )?;

        // 6) Append the line item.
        self.dispatch::<Order>(
            order_id.0,
            AGGREGATE_ORDER,
            OrderCommand::AddLine(AddLine {
                order_id,
                buyer_id,
                listing_id,
                seller_id,
                quantity,
                occurred_at: Utc::now(),
            }),
            |id| Order::empty(OrderId::new(id)),
        )?;

        // 7/8) Debit the buyer by this placement's cost; the running order
        // total stays the lazy sum over all lines at current prices.
        self.post_ledger_entry(PostEntry::hold(
            self.ledger_id_typed(),
            uuid::Uuid::now_v7(),
            buyer_id,
            candidate_total,
            Utc::now(),
        ))?;

        // 9) Return the order with nested lines and listing snapshots.
        let order = self.load_order(order_id)?;
        Ok(self.order_view_from_aggregate(&order))
    }

    pub fn confirm_order(&self, buyer_id: UserId, order_id: OrderId) -> Result<OrderView, ServiceError> {
        self.dispatch::<Order>(
            order_id.0,
            AGGREGATE_ORDER,
            OrderCommand::ConfirmOrder(ConfirmOrder {
                order_id,
                buyer_id,
                occurred_at: Utc::now(),
            }),
            |id| Order::empty(OrderId::new(id)),
        )?;

        let order = self.load_order(order_id)?;
        Ok(self.order_view_from_aggregate(&order))
    }

    /// Cancel an open order: flip the status, restore every line's quantity,
    /// return the held money to the buyer.
    pub fn cancel_order(&self, buyer_id: UserId, order_id: OrderId) -> Result<OrderView, ServiceError> {
        let order = self.load_order(order_id)?;
        let total = self.lazy_total(order.lines());

        self.dispatch::<Order>(
            order_id.0,
            AGGREGATE_ORDER,
            OrderCommand::CancelOrder(CancelOrder {
                order_id,
                buyer_id,
                occurred_at: Utc::now(),
            }),
            |id| Order::empty(OrderId::new(id)),
        )?;

        self.restore_quantities(order.lines());

        if total > 0 {
            self.post_ledger_entry(PostEntry::refund_hold(
                self.ledger_id_typed(),
                uuid::Uuid::now_v7(),
                buyer_id,
                total,
                Utc::now(),
            ))?;
        }

        let order = self.load_order(order_id)?;
        Ok(self.order_view_from_aggregate(&order))
    }

    /// Complete a confirmed order: flip the status and pay the seller of the
    /// order's first line the full order total.
    pub fn complete_order(&self, buyer_id: UserId, order_id: OrderId) -> Result<OrderView, ServiceError> {
        let order = self.load_order(order_id)?;
        let total = self.lazy_total(order.lines());
        let seller = order.first_seller();

        self.dispatch::<Order>(
            order_id.0,
            AGGREGATE_ORDER,
            OrderCommand::CompleteOrder(CompleteOrder {
                order_id,
                buyer_id,
                occurred_at: Utc::now(),
            }),
            |id| Order::empty(OrderId::new(id)),
        )?;

        if let Some(seller) = seller {
            if total > 0 {
                self.post_ledger_entry(PostEntry::release(
                    self.ledger_id_typed(),
                    uuid::Uuid::now_v7(),
                    seller,
                    total,
                    Utc::now(),
                ))?;
            }
        }

        let order = self.load_order(order_id)?;
        Ok(self.order_view_from_aggregate(&order))
    }

    /// Refund a completed order: claw the total back from the seller, credit
    /// the buyer, restore quantities, leave the order cancelled.
    pub fn refund_order(&self, buyer_id: UserId, order_id: OrderId) -> Result<OrderView, ServiceError> {
        let order = self.load_order(order_id)?;

        // Mirror the transition filter before moving money: a wrong buyer or
        // state must fail without any balance effect.
        if !order.exists()
            || order.buyer_id() != Some(buyer_id)
            || order.status() != OrderStatus::Completed
        {
            return Err(ServiceError::NotFound);
        }
        let seller = order.first_seller().ok_or_else(|| {
            ServiceError::Validation("order has no line items".to_string())
        })?;
        let total = self.lazy_total(order.lines());

        // Seller is debited first; an uncovered claw-back aborts the refund.
        if total > 0 {
            self.post_ledger_entry(PostEntry::claw_back(
                self.ledger_id_typed(),
                uuid::Uuid::now_v7(),
                seller,
                buyer_id,
                total,
                Utc::now(),
            ))?;
        }

        self.dispatch::<Order>(
            order_id.0,
            AGGREGATE_ORDER,
            OrderCommand::RefundOrder(RefundOrder {
                order_id,
                buyer_id,
                occurred_at: Utc::now(),
            }),
            |id| Order::empty(OrderId::new(id)),
        )?;

        self.restore_quantities(order.lines());

        let order = self.load_order(order_id)?;
        Ok(self.order_view_from_aggregate(&order))
    }

    pub fn buyer_orders(&self, buyer_id: UserId) -> Vec<OrderView> {
        self.orders_projection
            .list_for_buyer(buyer_id)
            .iter()
            .map(|rm| self.order_view_from_read_model(rm))
            .collect()
    }

    pub fn store_orders(&self, store_id: UserId) -> Vec<OrderView> {
        self.orders_projection
            .list_touching_seller(store_id)
            .iter()
            .map(|rm| self.order_view_from_read_model(rm))
            .collect()
    }

    /// Return each line's quantity to its listing. Listings that were deleted
    /// in the meantime are skipped.
    fn restore_quantities(&self, lines: &[OrderLine]) {
        for line in lines {
            let result = self.dispatch::<Listing>(
                line.listing_id.0,
                AGGREGATE_LISTING,
                ListingCommand::AdjustQuantity(AdjustQuantity {
                    listing_id: line.listing_id,
                    delta: line.quantity,
                    occurred_at: Utc::now(),
                }),
                |id| Listing::empty(ListingId::new(id)),
            );
            match result {
                Ok(_) | Err(DispatchError::NotFound) => {}
                Err(e) => {
                    tracing::warn!(listing_id = %line.listing_id, "quantity restore failed: {e:?}")
                }
            }
        }
    }

    /// The order total, recomputed from current discount prices.
    ///
    /// Lines whose listing no longer exists contribute zero.
    fn lazy_total(&self, lines: &[OrderLine]) -> u64 {
        let mut total: u64 = 0;
        for line in lines {
            if let Ok(listing) = self.load_listing(line.listing_id) {
                if listing.exists() {
                    total = total.saturating_add(
                        listing.discount_price().saturating_mul(line.quantity as u64),
                    );
                }
            }
        }
        total
    }

    fn order_view_from_aggregate(&self, order: &Order) -> OrderView {
        let mut total: u64 = 0;
        let items = order
            .lines()
            .iter()
            .map(|line| {
                let listing = self
                    .load_listing(line.listing_id)
                    .ok()
                    .and_then(|l| ListingView::from_aggregate(&l));
                if let Some(listing) = &listing {
                    total = total
                        .saturating_add(listing.discount_price.saturating_mul(line.quantity as u64));
                }
                OrderLineView {
                    line_no: line.line_no,
                    quantity: line.quantity,
                    listing,
                }
            })
            .collect();

        OrderView {
            id: order.id_typed().to_string(),
            buyer_id: order
                .buyer_id()
                .map(|b| b.to_string())
                .unwrap_or_default(),
            status: order.status(),
            total_price: total,
            created_at: order.created_at(),
            items,
        }
    }

    fn order_view_from_read_model(&self, rm: &OrderReadModel) -> OrderView {
        let mut total: u64 = 0;
        let items = rm
            .lines
            .iter()
            .map(|line| {
                let listing = self
                    .listings_projection
                    .get(&line.listing_id)
                    .map(|l| ListingView::from_read_model(&l));
                if let Some(listing) = &listing {
                    total = total
                        .saturating_add(listing.discount_price.saturating_mul(line.quantity as u64));
                }
                OrderLineView {
                    line_no: line.line_no,
                    quantity: line.quantity,
                    listing,
                }
            })
            .collect();

        OrderView {
            id: rm.order_id.to_string(),
            buyer_id: rm.buyer_id.to_string(),
            status: rm.status,
            total_price: total,
            created_at: Some(rm.created_at),
            items,
        }
    }

    // ---------------------------------------------------------------
    // Balance
    // ---------------------------------------------------------------

    pub fn balance_of(&self, user_id: UserId) -> Result<i64, ServiceError> {
        let ledger = self.load_ledger()?;
        Ok(ledger.balance(&Account::User(user_id)))
    }

    pub fn deposit(&self, user_id: UserId, amount: u64) -> Result<i64, ServiceError> {
        if amount == 0 {
            return Err(ServiceError::Validation(
                "deposit amount must be positive".to_string(),
            ));
        }

        self.post_ledger_entry(PostEntry::deposit(
            self.ledger_id_typed(),
            uuid::Uuid::now_v7(),
            user_id,
            amount,
            Utc::now(),
        ))?;

        self.balance_of(user_id)
    }

    // ---------------------------------------------------------------
    // Reports
    // ---------------------------------------------------------------

    pub fn request_report(&self, store_id: UserId) -> JobId {
        let job = Job::new(REPORT_JOB_KIND, store_id, json!({}));
        let id = job.id;
        self.jobs.enqueue(job);
        id
    }

    /// A store only ever sees its own report jobs.
    pub fn report_for(&self, store_id: UserId, job_id: JobId) -> Option<Job> {
        self.jobs
            .get(job_id)
            .filter(|job| job.requested_by == store_id)
    }
}
