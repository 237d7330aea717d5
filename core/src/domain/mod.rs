//! Domain models for offline order capture and server-side sync

pub mod catalog;
pub mod ingest;
pub mod mutation;
pub mod order;
pub mod session;
pub mod store;

pub use catalog::{Catalog, CatalogItem, CatalogKind};
pub use ingest::{IngestBatch, IngestResult, IngestStatus};
pub use mutation::{Headers, HttpMethod, Mutation, MutationError, OperationId, PendingOperation};
pub use order::{
	OfflineId, OfflineOrder, Order, OrderChanges, OrderDraft, OrderItem, OrderPatch, OrderStatus,
	OrderSubmission, OrderType, StatusChange, Topping, Variation,
};
pub use session::{
	CompleteSession, ConflictRecord, HistoryPage, HistoryQuery, ProgressUpdate, ResolveConflicts,
	ResolvedBy, StartSession, SyncSession, SyncStatus,
};
pub use store::Store;
