pub mod checkout;
pub mod inventory;
pub mod quote;
pub mod vendor;

pub use checkout::{CheckoutItem, CheckoutRequest, NodeId, NodeState, NodeStatus, OrderStatus, OverallState};
pub use inventory::InventoryLedger;
pub use quote::{PriceQuote, QuoteRequest};
pub use vendor::VendorEndpoint;
