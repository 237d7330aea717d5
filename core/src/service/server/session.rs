//! Sync session orchestrator
//!
//! Owns the lifecycle `started -> in_progress -> completed | failed`.
//! Transitions only move forward, `processed_records` never exceeds
//! `total_records`, and conflicts are append-only.

use super::ServerContext;
use crate::domain::session::{progress_percentage, DEFAULT_HISTORY_LIMIT};
use crate::domain::{
	CompleteSession, ConflictRecord, HistoryPage, HistoryQuery, ProgressUpdate, ResolveConflicts,
	ResolvedBy, StartSession, SyncSession, SyncStatus,
};
use crate::infra::db::entities::{store, sync_conflict, sync_session};
use crate::infra::event::Event;
use chrono::Utc;
use sea_orm::{
	ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, PaginatorTrait,
	QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SessionError {
	#[error("Validation error: {0}")]
	Validation(String),

	#[error("Sync session {0} not found")]
	NotFound(Uuid),

	#[error("Sync session {session_id} is {status} and cannot become {attempted}")]
	InvalidTransition {
		session_id: Uuid,
		status: SyncStatus,
		attempted: SyncStatus,
	},

	#[error("Corrupt session record: {0}")]
	Corrupt(String),

	#[error("Database error: {0}")]
	Database(#[from] DbErr),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;

pub struct SessionOrchestrator {
	ctx: ServerContext,
}

impl SessionOrchestrator {
	pub fn new(ctx: ServerContext) -> Self {
		Self { ctx }
	}

	pub async fn start(&self, request: StartSession) -> Result<SyncSession> {
		let client = request.client.trim();
		if client.is_empty() {
			return Err(SessionError::Validation("client is required".to_string()));
		}
		let total_records = i64::try_from(request.total_records).map_err(|_| {
			SessionError::Validation(format!(
				"totalRecords {} is out of range",
				request.total_records
			))
		})?;

		let txn = self.ctx.db().begin().await?;

		let store_exists = store::Entity::find()
			.filter(store::Column::Uuid.eq(request.store))
			.count(&txn)
			.await? > 0;
		if !store_exists {
			return Err(SessionError::Validation(format!(
				"Store {} does not exist",
				request.store
			)));
		}

		let now = Utc::now();
		let metadata = match request.metadata {
			Value::Null => json!({}),
			other => other,
		};

		let model = sync_session::ActiveModel {
			uuid: Set(Uuid::new_v4()),
			client_id: Set(client.to_string()),
			store_id: Set(request.store),
			start_time: Set(now),
			end_time: Set(None),
			status: Set(SyncStatus::Started.as_str().to_string()),
			total_records: Set(total_records),
			processed_records: Set(0),
			metadata: Set(serde_json::to_string(&metadata)?),
			created_at: Set(now),
			updated_at: Set(now),
			..Default::default()
		}
		.insert(&txn)
		.await?;

		txn.commit().await?;

		let session = to_domain(model, Vec::new())?;
		info!(
			session_id = %session.session_id,
			client_id = %session.client_id,
			store_id = %session.store_id,
			total_records = session.total_records,
			"Sync session started"
		);
		self.ctx.events().emit(Event::SyncStarted {
			session: session.clone(),
		});

		Ok(session)
	}

	/// Record progress. `processed_records` is clamped to the session total;
	/// the only statuses accepted here are `in_progress` and `failed`.
	pub async fn update_progress(
		&self,
		session_id: Uuid,
		update: ProgressUpdate,
	) -> Result<SyncSession> {
		let target = match update.status {
			None | Some(SyncStatus::InProgress) => SyncStatus::InProgress,
			Some(SyncStatus::Failed) => SyncStatus::Failed,
			Some(other) => {
				return Err(SessionError::Validation(format!(
					"status {} cannot be set through a progress update",
					other
				)))
			}
		};

		let txn = self.ctx.db().begin().await?;

		let model = find_session(&txn, session_id).await?;
		let status = parse_status(&model.status)?;
		if status.is_terminal() {
			return Err(SessionError::InvalidTransition {
				session_id,
				status,
				attempted: target,
			});
		}

		let total = model.total_records.max(0) as u64;
		let processed = update.processed_records.min(total);
		if processed < update.processed_records {
			warn!(
				%session_id,
				reported = update.processed_records,
				total,
				"Processed records exceed total, clamping"
			);
		}

		let mut metadata = parse_metadata(&model.metadata)?;
		if !update.metadata.is_null() {
			metadata.insert("progressDetails".to_string(), update.metadata);
		}

		let now = Utc::now();
		let mut active: sync_session::ActiveModel = model.into();
		active.status = Set(target.as_str().to_string());
		active.processed_records = Set(processed as i64);
		active.metadata = Set(serde_json::to_string(&metadata)?);
		active.updated_at = Set(now);
		if target == SyncStatus::Failed {
			active.end_time = Set(Some(now));
		}
		let model = active.update(&txn).await?;
		let conflicts = load_conflicts(&txn, model.id).await?;

		txn.commit().await?;

		let session = to_domain(model, conflicts)?;
		debug!(
			%session_id,
			status = %session.status,
			processed = session.processed_records,
			total = session.total_records,
			"Sync progress"
		);

		if target == SyncStatus::Failed {
			self.ctx.events().emit(Event::SyncFailed {
				session_id,
				reason: reason_from(&session.metadata),
			});
		} else {
			self.ctx.events().emit(Event::SyncProgress {
				session_id,
				status: session.status,
				processed_records: session.processed_records,
				total_records: session.total_records,
			});
		}

		Ok(session)
	}

	/// Complete a session, appending the given conflicts. Completing an
	/// already completed session changes nothing.
	pub async fn complete(&self, session_id: Uuid, request: CompleteSession) -> Result<SyncSession> {
		let txn = self.ctx.db().begin().await?;

		let model = find_session(&txn, session_id).await?;
		match parse_status(&model.status)? {
			SyncStatus::Completed => {
				let conflicts = load_conflicts(&txn, model.id).await?;
				debug!(%session_id, "Session already completed");
				return to_domain(model, conflicts);
			}
			SyncStatus::Failed => {
				return Err(SessionError::InvalidTransition {
					session_id,
					status: SyncStatus::Failed,
					attempted: SyncStatus::Completed,
				})
			}
			SyncStatus::Started | SyncStatus::InProgress => {}
		}

		let mut metadata = parse_metadata(&model.metadata)?;
		if !request.metadata.is_null() {
			metadata.insert("completionDetails".to_string(), request.metadata);
		}

		let now = Utc::now();
		let pk = model.id;
		let mut active: sync_session::ActiveModel = model.into();
		active.status = Set(SyncStatus::Completed.as_str().to_string());
		active.end_time = Set(Some(now));
		active.metadata = Set(serde_json::to_string(&metadata)?);
		active.updated_at = Set(now);
		let model = active.update(&txn).await?;

		insert_conflicts(&txn, pk, &request.conflicts, None).await?;
		let conflicts = load_conflicts(&txn, pk).await?;

		txn.commit().await?;

		let session = to_domain(model, conflicts)?;
		info!(
			%session_id,
			processed = session.processed_records,
			total = session.total_records,
			conflicts = session.conflicts.len(),
			"Sync session completed"
		);
		self.ctx.events().emit(Event::SyncCompleted {
			session: session.clone(),
		});

		Ok(session)
	}

	/// Mark a session failed. Failing a failed session changes nothing.
	pub async fn fail(&self, session_id: Uuid, reason: &str) -> Result<SyncSession> {
		let txn = self.ctx.db().begin().await?;

		let model = find_session(&txn, session_id).await?;
		match parse_status(&model.status)? {
			SyncStatus::Failed => {
				let conflicts = load_conflicts(&txn, model.id).await?;
				return to_domain(model, conflicts);
			}
			SyncStatus::Completed => {
				return Err(SessionError::InvalidTransition {
					session_id,
					status: SyncStatus::Completed,
					attempted: SyncStatus::Failed,
				})
			}
			SyncStatus::Started | SyncStatus::InProgress => {}
		}

		let mut metadata = parse_metadata(&model.metadata)?;
		metadata.insert("failureReason".to_string(), Value::from(reason));

		let now = Utc::now();
		let mut active: sync_session::ActiveModel = model.into();
		active.status = Set(SyncStatus::Failed.as_str().to_string());
		active.end_time = Set(Some(now));
		active.metadata = Set(serde_json::to_string(&metadata)?);
		active.updated_at = Set(now);
		let model = active.update(&txn).await?;
		let conflicts = load_conflicts(&txn, model.id).await?;

		txn.commit().await?;

		warn!(%session_id, reason, "Sync session failed");
		self.ctx.events().emit(Event::SyncFailed {
			session_id,
			reason: reason.to_string(),
		});

		to_domain(model, conflicts)
	}

	/// Append conflict records. Records default to `resolvedBy: server` and
	/// earlier ones are never touched.
	pub async fn resolve_conflicts(&self, request: ResolveConflicts) -> Result<SyncSession> {
		let session_id = request.session_id;
		let txn = self.ctx.db().begin().await?;

		let model = find_session(&txn, session_id).await?;
		insert_conflicts(&txn, model.id, &request.conflicts, Some(ResolvedBy::Server)).await?;

		let mut active: sync_session::ActiveModel = model.into();
		active.updated_at = Set(Utc::now());
		let model = active.update(&txn).await?;
		let conflicts = load_conflicts(&txn, model.id).await?;

		txn.commit().await?;

		info!(%session_id, count = request.conflicts.len(), "Conflicts resolved");
		self.ctx.events().emit(Event::ConflictsResolved {
			session_id,
			count: request.conflicts.len(),
		});

		to_domain(model, conflicts)
	}

	pub async fn get(&self, session_id: Uuid) -> Result<SyncSession> {
		let model = find_session(self.ctx.db(), session_id).await?;
		let conflicts = load_conflicts(self.ctx.db(), model.id).await?;
		to_domain(model, conflicts)
	}

	/// Sessions matching the filters, newest first, one page at a time
	pub async fn history(&self, query: HistoryQuery) -> Result<HistoryPage> {
		let mut select = sync_session::Entity::find();
		if let Some(store) = query.store {
			select = select.filter(sync_session::Column::StoreId.eq(store));
		}
		if let Some(client) = &query.client {
			select = select.filter(sync_session::Column::ClientId.eq(client.as_str()));
		}
		if let Some(status) = query.status {
			select = select.filter(sync_session::Column::Status.eq(status.as_str()));
		}
		if let Some(start) = query.start_date {
			select = select.filter(sync_session::Column::CreatedAt.gte(start));
		}
		if let Some(end) = query.end_date {
			select = select.filter(sync_session::Column::CreatedAt.lte(end));
		}

		let limit = if query.limit == 0 {
			DEFAULT_HISTORY_LIMIT
		} else {
			query.limit
		};

		let total = select.clone().count(self.ctx.db()).await?;
		let models = select
			.order_by_desc(sync_session::Column::CreatedAt)
			.order_by_desc(sync_session::Column::Id)
			.offset(query.skip)
			.limit(limit)
			.all(self.ctx.db())
			.await?;

		let sessions = self.attach_conflicts(models).await?;

		Ok(HistoryPage {
			sessions,
			total,
			limit,
			skip: query.skip,
		})
	}

	/// Sessions still `started` or `in_progress`, newest first
	pub async fn active_sessions(&self, store: Option<Uuid>) -> Result<Vec<SyncSession>> {
		let mut select = sync_session::Entity::find().filter(sync_session::Column::Status.is_in([
			SyncStatus::Started.as_str(),
			SyncStatus::InProgress.as_str(),
		]));
		if let Some(store) = store {
			select = select.filter(sync_session::Column::StoreId.eq(store));
		}

		let models = select
			.order_by_desc(sync_session::Column::CreatedAt)
			.order_by_desc(sync_session::Column::Id)
			.all(self.ctx.db())
			.await?;

		self.attach_conflicts(models).await
	}

	async fn attach_conflicts(&self, models: Vec<sync_session::Model>) -> Result<Vec<SyncSession>> {
		let ids: Vec<i32> = models.iter().map(|m| m.id).collect();
		let mut grouped: HashMap<i32, Vec<ConflictRecord>> = HashMap::new();

		if !ids.is_empty() {
			let rows = sync_conflict::Entity::find()
				.filter(sync_conflict::Column::SessionId.is_in(ids))
				.order_by_asc(sync_conflict::Column::Id)
				.all(self.ctx.db())
				.await?;
			for row in rows {
				let session = row.session_id;
				let record = conflict_from(row)?;
				grouped.entry(session).or_default().push(record);
			}
		}

		models
			.into_iter()
			.map(|model| {
				let conflicts = grouped.remove(&model.id).unwrap_or_default();
				to_domain(model, conflicts)
			})
			.collect()
	}
}

async fn find_session<C: ConnectionTrait>(conn: &C, session_id: Uuid) -> Result<sync_session::Model> {
	sync_session::Entity::find()
		.filter(sync_session::Column::Uuid.eq(session_id))
		.one(conn)
		.await?
		.ok_or(SessionError::NotFound(session_id))
}

async fn load_conflicts<C: ConnectionTrait>(conn: &C, session_pk: i32) -> Result<Vec<ConflictRecord>> {
	sync_conflict::Entity::find()
		.filter(sync_conflict::Column::SessionId.eq(session_pk))
		.order_by_asc(sync_conflict::Column::Id)
		.all(conn)
		.await?
		.into_iter()
		.map(conflict_from)
		.collect()
}

async fn insert_conflicts<C: ConnectionTrait>(
	conn: &C,
	session_pk: i32,
	conflicts: &[ConflictRecord],
	default_resolution: Option<ResolvedBy>,
) -> Result<()> {
	let now = Utc::now();
	for conflict in conflicts {
		let resolved_by = conflict.resolved_by.or(default_resolution);
		sync_conflict::ActiveModel {
			session_id: Set(session_pk),
			entity_type: Set(conflict.entity_type.clone()),
			entity_id: Set(conflict.entity_id.clone()),
			local_version: Set(serde_json::to_string(&conflict.local_version)?),
			server_version: Set(serde_json::to_string(&conflict.server_version)?),
			resolved_by: Set(resolved_by.map(|r| r.as_str().to_string())),
			recorded_at: Set(now),
			..Default::default()
		}
		.insert(conn)
		.await?;
	}
	Ok(())
}

fn conflict_from(row: sync_conflict::Model) -> Result<ConflictRecord> {
	Ok(ConflictRecord {
		entity_type: row.entity_type,
		entity_id: row.entity_id,
		local_version: serde_json::from_str(&row.local_version)?,
		server_version: serde_json::from_str(&row.server_version)?,
		resolved_by: row.resolved_by.as_deref().and_then(ResolvedBy::from_str),
	})
}

fn parse_status(value: &str) -> Result<SyncStatus> {
	SyncStatus::from_str(value).ok_or_else(|| SessionError::Corrupt(format!("unknown status {}", value)))
}

fn parse_metadata(value: &str) -> Result<Map<String, Value>> {
	match serde_json::from_str(value)? {
		Value::Object(map) => Ok(map),
		_ => Ok(Map::new()),
	}
}

fn reason_from(metadata: &Value) -> String {
	metadata
		.pointer("/progressDetails/reason")
		.and_then(Value::as_str)
		.unwrap_or("reported failed by client")
		.to_string()
}

fn to_domain(model: sync_session::Model, conflicts: Vec<ConflictRecord>) -> Result<SyncSession> {
	let status = parse_status(&model.status)?;
	let total = model.total_records.max(0) as u64;
	let processed = model.processed_records.max(0) as u64;

	Ok(SyncSession {
		session_id: model.uuid,
		client_id: model.client_id,
		store_id: model.store_id,
		start_time: model.start_time,
		end_time: model.end_time,
		status,
		total_records: total,
		processed_records: processed,
		progress_percentage: progress_percentage(total, processed),
		conflicts,
		metadata: serde_json::from_str(&model.metadata)?,
		created_at: model.created_at,
		updated_at: model.updated_at,
	})
}
