//! HTTP API
//!
//! Every success is wrapped as `{status: "success", data, meta?}` and every
//! failure as `{status: "error", message}` (see [`crate::error::ApiError`]).

use crate::error::ApiError;
use axum::{
	extract::{
		rejection::{JsonRejection, QueryRejection},
		Path, Query, State,
	},
	http::StatusCode,
	response::IntoResponse,
	routing::{get, patch, post},
	Json, Router,
};
use chrono::Utc;
use pos_sync_core::{
	domain::{
		CompleteSession, HistoryQuery, OrderPatch, OrderSubmission, ProgressUpdate,
		ResolveConflicts, StartSession, StatusChange,
	},
	service::server::{CreateOutcome, ServerContext},
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

type ApiResult<T> = Result<T, ApiError>;

pub fn router(ctx: ServerContext) -> Router {
	Router::new()
		.route("/ping", get(ping))
		.route("/sync/start", post(start_session))
		.route("/sync/resolve-conflicts", post(resolve_conflicts))
		.route("/sync/history", get(history))
		.route("/sync/active-sessions", get(active_sessions))
		.route("/sync/:session_id", get(get_session))
		.route("/sync/:session_id/progress", patch(update_progress))
		.route("/sync/:session_id/complete", post(complete_session))
		.route("/orders", post(create_order))
		.route("/orders/sync", post(sync_orders))
		.route("/orders/:order_id", get(get_order).patch(update_order))
		.route("/orders/:order_id/status", patch(update_order_status))
		.with_state(ctx)
}

fn success<T: Serialize>(data: T) -> Json<Value> {
	Json(json!({ "status": "success", "data": data }))
}

async fn ping() -> Json<Value> {
	success(json!({ "pong": true, "time": Utc::now() }))
}

async fn start_session(
	State(ctx): State<ServerContext>,
	payload: Result<Json<StartSession>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
	let Json(request) = payload?;
	let session = ctx.sessions().start(request).await?;
	Ok((StatusCode::CREATED, success(session)))
}

async fn get_session(
	State(ctx): State<ServerContext>,
	Path(session_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
	Ok(success(ctx.sessions().get(session_id).await?))
}

async fn update_progress(
	State(ctx): State<ServerContext>,
	Path(session_id): Path<Uuid>,
	payload: Result<Json<ProgressUpdate>, JsonRejection>,
) -> ApiResult<Json<Value>> {
	let Json(update) = payload?;
	Ok(success(ctx.sessions().update_progress(session_id, update).await?))
}

async fn complete_session(
	State(ctx): State<ServerContext>,
	Path(session_id): Path<Uuid>,
	payload: Option<Json<CompleteSession>>,
) -> ApiResult<Json<Value>> {
	let request = payload.map(|Json(request)| request).unwrap_or_default();
	Ok(success(ctx.sessions().complete(session_id, request).await?))
}

async fn resolve_conflicts(
	State(ctx): State<ServerContext>,
	payload: Result<Json<ResolveConflicts>, JsonRejection>,
) -> ApiResult<Json<Value>> {
	let Json(request) = payload?;
	Ok(success(ctx.sessions().resolve_conflicts(request).await?))
}

async fn history(
	State(ctx): State<ServerContext>,
	query: Result<Query<HistoryQuery>, QueryRejection>,
) -> ApiResult<Json<Value>> {
	let Query(query) = query?;
	let page = ctx.sessions().history(query).await?;

	Ok(Json(json!({
		"status": "success",
		"data": page.sessions,
		"meta": {
			"total": page.total,
			"limit": page.limit,
			"skip": page.skip,
		},
	})))
}

#[derive(Debug, Deserialize)]
struct StoreFilter {
	#[serde(default)]
	store: Option<Uuid>,
}

async fn active_sessions(
	State(ctx): State<ServerContext>,
	Query(filter): Query<StoreFilter>,
) -> ApiResult<Json<Value>> {
	Ok(success(ctx.sessions().active_sessions(filter.store).await?))
}

#[derive(Debug, Deserialize)]
struct SyncOrdersBody {
	#[serde(default)]
	orders: Vec<Value>,
}

async fn sync_orders(
	State(ctx): State<ServerContext>,
	payload: Result<Json<SyncOrdersBody>, JsonRejection>,
) -> ApiResult<Json<Value>> {
	let Json(body) = payload?;
	let results = ctx.ingestor().ingest_values(body.orders).await?;
	Ok(success(results))
}

async fn create_order(
	State(ctx): State<ServerContext>,
	payload: Result<Json<OrderSubmission>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
	let Json(submission) = payload?;
	let response = match ctx.orders().create(submission).await? {
		CreateOutcome::Created(order) => (StatusCode::CREATED, success(order)),
		CreateOutcome::Existing(order) => (StatusCode::OK, success(order)),
	};
	Ok(response)
}

async fn get_order(
	State(ctx): State<ServerContext>,
	Path(order_id): Path<Uuid>,
) -> ApiResult<Json<Value>> {
	Ok(success(ctx.orders().get(order_id).await?))
}

async fn update_order(
	State(ctx): State<ServerContext>,
	Path(order_id): Path<Uuid>,
	payload: Result<Json<OrderPatch>, JsonRejection>,
) -> ApiResult<Json<Value>> {
	let Json(patch) = payload?;
	Ok(success(ctx.orders().update(order_id, patch).await?))
}

async fn update_order_status(
	State(ctx): State<ServerContext>,
	Path(order_id): Path<Uuid>,
	payload: Result<Json<StatusChange>, JsonRejection>,
) -> ApiResult<Json<Value>> {
	let Json(change) = payload?;
	let order = ctx
		.orders()
		.update_status(order_id, change.status, change.note)
		.await?;
	Ok(success(order))
}
