//! Read-through catalog cache entries

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A product or category as last fetched from the server.
///
/// Catalog payloads are opaque to the sync engine; only the id is needed to
/// key the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
	pub id: String,
	pub data: Value,
}

impl CatalogItem {
	/// Extract the id from a server document, accepting `id` or `_id`
	pub fn from_value(data: Value) -> Option<Self> {
		let id = ["id", "_id"].iter().find_map(|key| match data.get(*key)? {
			Value::String(s) if !s.is_empty() => Some(s.clone()),
			Value::Number(n) => Some(n.to_string()),
			_ => None,
		})?;

		Some(Self { id, data })
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogKind {
	Products,
	Categories,
}

impl CatalogKind {
	/// Server path the collection is fetched from
	pub fn path(&self) -> &'static str {
		match self {
			CatalogKind::Products => "/products",
			CatalogKind::Categories => "/categories",
		}
	}
}

/// The cached catalog as served to the register
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
	pub products: Vec<CatalogItem>,
	pub categories: Vec<CatalogItem>,
	/// True when served from the local cache because the server was unreachable
	pub stale: bool,
}
