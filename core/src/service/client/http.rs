//! HTTP implementation of the sync transport

use super::transport::{SyncTransport, TransportError};
use crate::domain::{
	CompleteSession, Headers, HttpMethod, IngestBatch, IngestResult, Mutation, OfflineOrder,
	ProgressUpdate, StartSession, SyncSession,
};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::trace;
use uuid::Uuid;

const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// Header carrying the register identity on every request
pub const CLIENT_ID_HEADER: &str = "x-client-id";

pub struct HttpTransport {
	client: Client,
	base_url: String,
	client_id: String,
}

impl HttpTransport {
	pub fn new(
		base_url: impl Into<String>,
		timeout: Duration,
		client_id: impl Into<String>,
	) -> Result<Self, TransportError> {
		let client = Client::builder()
			.timeout(timeout)
			.build()
			.map_err(|e| TransportError::Decode(format!("failed to build HTTP client: {}", e)))?;

		Ok(Self {
			client,
			base_url: base_url.into().trim_end_matches('/').to_string(),
			client_id: client_id.into(),
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.base_url, path)
	}

	fn request(&self, method: Method, path: &str) -> RequestBuilder {
		self.client
			.request(method, self.url(path))
			.header(CLIENT_ID_HEADER, &self.client_id)
	}

	/// Send a request and unwrap the `{status, data}` envelope
	async fn execute(&self, builder: RequestBuilder) -> Result<Value, TransportError> {
		// Any failure before a response arrives means the server is unreachable
		let response = builder
			.send()
			.await
			.map_err(|e| TransportError::Unreachable(e.to_string()))?;

		let status = response.status();
		let text = response
			.text()
			.await
			.map_err(|e| TransportError::Unreachable(e.to_string()))?;
		trace!(status = status.as_u16(), body = %text, "Server response");

		let body: Value = if text.is_empty() {
			Value::Null
		} else if status.is_success() {
			serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))?
		} else {
			serde_json::from_str(&text).unwrap_or(Value::Null)
		};

		if !status.is_success() {
			return Err(TransportError::from_response(status.as_u16(), &body));
		}

		Ok(match body {
			Value::Object(mut map) if map.contains_key("data") => {
				map.remove("data").unwrap_or(Value::Null)
			}
			other => other,
		})
	}

	async fn execute_as<T: DeserializeOwned>(
		&self,
		builder: RequestBuilder,
	) -> Result<T, TransportError> {
		let data = self.execute(builder).await?;
		serde_json::from_value(data).map_err(|e| TransportError::Decode(e.to_string()))
	}
}

fn to_method(method: HttpMethod) -> Method {
	match method {
		HttpMethod::Post => Method::POST,
		HttpMethod::Put => Method::PUT,
		HttpMethod::Patch => Method::PATCH,
		HttpMethod::Delete => Method::DELETE,
	}
}

#[async_trait]
impl SyncTransport for HttpTransport {
	async fn send(&self, mutation: &Mutation, headers: &Headers) -> Result<Value, TransportError> {
		let mut builder = self
			.request(to_method(mutation.method()), &mutation.target())
			.json(&mutation.body());
		for (name, value) in headers {
			builder = builder.header(name.as_str(), value.as_str());
		}

		self.execute(builder).await
	}

	async fn ingest_orders(
		&self,
		orders: &[OfflineOrder],
	) -> Result<Vec<IngestResult>, TransportError> {
		let batch = IngestBatch {
			orders: orders.to_vec(),
		};
		self.execute_as(self.request(Method::POST, "/orders/sync").json(&batch))
			.await
	}

	async fn start_session(&self, request: &StartSession) -> Result<SyncSession, TransportError> {
		self.execute_as(self.request(Method::POST, "/sync/start").json(request))
			.await
	}

	async fn update_progress(
		&self,
		session_id: Uuid,
		update: &ProgressUpdate,
	) -> Result<SyncSession, TransportError> {
		let path = format!("/sync/{}/progress", session_id);
		self.execute_as(self.request(Method::PATCH, &path).json(update))
			.await
	}

	async fn complete_session(
		&self,
		session_id: Uuid,
		request: &CompleteSession,
	) -> Result<SyncSession, TransportError> {
		let path = format!("/sync/{}/complete", session_id);
		self.execute_as(self.request(Method::POST, &path).json(request))
			.await
	}

	async fn fetch(&self, path: &str) -> Result<Value, TransportError> {
		self.execute(self.request(Method::GET, path)).await
	}

	async fn ping(&self) -> Result<(), TransportError> {
		self.execute(self.request(Method::GET, "/ping").timeout(PING_TIMEOUT))
			.await
			.map(|_| ())
	}
}
