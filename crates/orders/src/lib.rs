//! `surplus-orders` — buyer order lifecycle.

pub mod order;

pub use order::{
    AddLine, CancelOrder, CompleteOrder, ConfirmOrder, LineAdded, OpenOrder, Order, OrderCancelled,
    OrderCommand, OrderCompleted, OrderConfirmed, OrderEvent, OrderId, OrderLine, OrderOpened,
    OrderRefunded, OrderStatus, RefundOrder,
};
