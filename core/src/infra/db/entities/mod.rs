//! Database entities
//!
//! The client and the server keep separate SQLite databases. Client tables:
//! `pending_requests`, `orders` (offline drafts), `products`, `categories`,
//! `settings`. Server tables: `stores`, `orders`, `sync_sessions`,
//! `sync_conflicts`.

// Client database
pub mod cached_category;
pub mod cached_product;
pub mod offline_order;
pub mod pending_request;
pub mod setting;

// Server database
pub mod order;
pub mod store;
pub mod sync_conflict;
pub mod sync_session;

pub use cached_category::Entity as CachedCategory;
pub use cached_product::Entity as CachedProduct;
pub use offline_order::Entity as OfflineOrder;
pub use pending_request::Entity as PendingRequest;
pub use setting::Entity as Setting;

pub use order::Entity as Order;
pub use store::Entity as Store;
pub use sync_conflict::Entity as SyncConflict;
pub use sync_session::Entity as SyncSession;
