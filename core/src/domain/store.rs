use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A physical store that sessions and orders belong to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Store {
	pub id: Uuid,
	pub code: String,
	pub name: String,
	pub created_at: DateTime<Utc>,
}

impl Store {
	/// Last four characters of the store code, used as the order number prefix
	pub fn order_prefix(&self) -> String {
		let chars: Vec<char> = self.code.chars().collect();
		let start = chars.len().saturating_sub(4);
		chars[start..].iter().collect::<String>().to_uppercase()
	}
}
