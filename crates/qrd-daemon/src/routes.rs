//! Axum router and all HTTP handlers for qrd-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers.  All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use chrono::{TimeZone, Utc};
use futures_util::{Stream, StreamExt};
use qrd_orders::{
    allowed_targets, Actor, NewSubscription, OrderCursor, OrderError, OrderFilter, OrderRequest,
};
use qrd_schemas::{Audience, OrderEvent, OrderStatus};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    actor::RequestActor,
    api_types::{
        ActiveOrderResponse, HealthResponse, ListOrdersQuery, ListOrdersResponse,
        PlaceOrderResponse, SetStatusRequest, SetStatusResponse, SubscribeRequest,
        TransitionsResponse,
    },
    error::{ApiError, ApiResult},
    pipeline::publish,
    state::{uptime_secs, AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route(
            "/v1/accounts/:account_id/tables/:table_id/orders",
            post(place_order),
        )
        .route(
            "/v1/accounts/:account_id/tables/:table_id/active-order",
            get(active_order),
        )
        .route("/v1/accounts/:account_id/orders", get(list_orders))
        .route("/v1/accounts/:account_id/stream", get(account_stream))
        .route(
            "/v1/accounts/:account_id/push/subscriptions",
            post(subscribe),
        )
        .route("/v1/push/subscriptions/:subscription_id", delete(unsubscribe))
        .route("/v1/orders/:order_id", get(get_order))
        .route("/v1/orders/:order_id/status", post(set_status))
        .route("/v1/orders/:order_id/transitions", get(transitions))
        .route("/v1/orders/:order_id/stream", get(order_stream))
        .with_state(state)
}

fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> ApiResult<T> {
    payload
        .map(|Json(v)| v)
        .map_err(|e| ApiError::bad_request("malformed_payload", e.body_text()))
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            uptime_secs: uptime_secs(),
        }),
    )
}

// ---------------------------------------------------------------------------
// POST /v1/accounts/:account_id/tables/:table_id/orders
// ---------------------------------------------------------------------------

/// Place a customer order. `409 active_order_exists` carries the id of the
/// order already open on the table.
pub(crate) async fn place_order(
    State(st): State<Arc<AppState>>,
    Path((account_id, table_id)): Path<(String, String)>,
    payload: Result<Json<OrderRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let request = json_body(payload)?;
    let placed = st
        .service
        .place_order(&account_id, &table_id, &request)
        .await?;

    publish(
        &st,
        OrderEvent::Created {
            order: placed.order.clone(),
        },
    );

    Ok((
        StatusCode::CREATED,
        Json(PlaceOrderResponse {
            order: placed.order,
            customer_token: placed.customer_token,
        }),
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// GET /v1/accounts/:account_id/tables/:table_id/active-order
// ---------------------------------------------------------------------------

/// Anyone who scanned the table may learn that it is busy; only staff and the
/// token holder get the order itself.
pub(crate) async fn active_order(
    State(st): State<Arc<AppState>>,
    Path((account_id, table_id)): Path<(String, String)>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Json<ActiveOrderResponse>> {
    let order = st
        .service
        .active_order(&account_id, &table_id)
        .await?
        .ok_or_else(|| {
            ApiError::not_found(
                "no_active_order",
                format!("table {table_id} has no active order"),
            )
        })?;

    Ok(Json(ActiveOrderResponse {
        order_id: order.order_id,
        status: order.status,
        order: actor.can_access(&order).then_some(order),
    }))
}

// ---------------------------------------------------------------------------
// GET /v1/orders/:order_id
// ---------------------------------------------------------------------------

pub(crate) async fn get_order(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<impl IntoResponse> {
    let order = st.service.view(order_id, &actor).await?;
    Ok(Json(order))
}

// ---------------------------------------------------------------------------
// POST /v1/orders/:order_id/status
// ---------------------------------------------------------------------------

/// Request a status change. Re-requesting the current status answers
/// `changed = false` and propagates nothing.
pub(crate) async fn set_status(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
    payload: Result<Json<SetStatusRequest>, JsonRejection>,
) -> ApiResult<Json<SetStatusResponse>> {
    let req = json_body(payload)?;
    let to = OrderStatus::parse(&req.status).ok_or_else(|| {
        ApiError::bad_request("unknown_status", format!("unknown status: {}", req.status))
    })?;

    let adv = st.service.advance(order_id, &actor, to).await?;

    if adv.changed {
        info!(order_id = %order_id, from = %adv.previous, to = %to, "status/set");
        publish(
            &st,
            OrderEvent::StatusChanged {
                order: adv.order.clone(),
                previous: adv.previous,
            },
        );
    }

    Ok(Json(SetStatusResponse {
        order: adv.order,
        previous: adv.previous,
        changed: adv.changed,
    }))
}

// ---------------------------------------------------------------------------
// GET /v1/orders/:order_id/transitions
// ---------------------------------------------------------------------------

pub(crate) async fn transitions(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Json<TransitionsResponse>> {
    let order = st.service.view(order_id, &actor).await?;
    Ok(Json(TransitionsResponse {
        order_id,
        current: order.status,
        allowed: allowed_targets(order.status, actor.role()),
    }))
}

// ---------------------------------------------------------------------------
// GET /v1/accounts/:account_id/orders  (fallback polling)
// ---------------------------------------------------------------------------

pub(crate) fn parse_status_list(raw: Option<&str>) -> ApiResult<Vec<OrderStatus>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            OrderStatus::parse(s)
                .ok_or_else(|| ApiError::bad_request("unknown_status", format!("unknown status: {s}")))
        })
        .collect()
}

pub(crate) async fn list_orders(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    RequestActor(actor): RequestActor,
    Query(q): Query<ListOrdersQuery>,
) -> ApiResult<Json<ListOrdersResponse>> {
    let statuses = parse_status_list(q.status.as_deref())?;

    let updated_since = match q.since_ms {
        None => None,
        Some(ms) => Some(Utc.timestamp_millis_opt(ms).single().ok_or_else(|| {
            ApiError::bad_request("invalid_cursor", format!("since_ms out of range: {ms}"))
        })?),
    };

    let after = q
        .cursor
        .as_deref()
        .filter(|c| !c.trim().is_empty())
        .map(|c| {
            c.parse::<OrderCursor>()
                .map_err(|e| ApiError::bad_request("invalid_cursor", e.to_string()))
        })
        .transpose()?;

    let max = st.settings.polling_max_limit;
    let limit = q.limit.unwrap_or(max).clamp(1, max);

    let filter = OrderFilter {
        statuses,
        updated_since,
        after,
        limit,
    };
    let orders = st.service.list(&account_id, &actor, &filter).await?;

    let next_cursor = orders
        .last()
        .map(OrderCursor::of)
        .or(after)
        .map(|c| c.to_string());
    let next_since_ms = orders
        .iter()
        .map(|o| o.updated_at_utc.timestamp_millis())
        .max()
        .or(q.since_ms);

    Ok(Json(ListOrdersResponse {
        orders,
        next_cursor,
        next_since_ms,
    }))
}

// ---------------------------------------------------------------------------
// Push subscriptions
// ---------------------------------------------------------------------------

pub(crate) async fn subscribe(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    RequestActor(actor): RequestActor,
    payload: Result<Json<SubscribeRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let req = json_body(payload)?;

    let endpoint = req.endpoint.trim();
    if !(endpoint.starts_with("https://") || endpoint.starts_with("http://")) {
        return Err(ApiError::bad_request(
            "invalid_endpoint",
            "endpoint must be an http(s) url",
        ));
    }

    let audience = match (req.role, req.order_id) {
        (Some(role), None) => {
            if !role.is_staff() {
                return Err(ApiError::bad_request(
                    "invalid_audience",
                    "customers subscribe with order_id",
                ));
            }
            match &actor {
                Actor::Staff {
                    account_id: a,
                    role: own,
                } if *a == account_id && (*own == role || *own == qrd_schemas::Role::Admin) => {}
                _ => {
                    return Err(ApiError::Forbidden(format!(
                        "not permitted to subscribe {role} devices of {account_id}"
                    )))
                }
            }
            Audience::Staff { role }
        }
        (None, Some(order_id)) => {
            let order = st.service.view(order_id, &actor).await?;
            if order.account_id != account_id {
                return Err(OrderError::OrderNotFound(order_id).into());
            }
            Audience::Order { order_id }
        }
        _ => {
            return Err(ApiError::bad_request(
                "invalid_audience",
                "exactly one of role or order_id is required",
            ))
        }
    };

    let sub = st
        .store()
        .add_subscription(NewSubscription {
            account_id,
            audience,
            endpoint: endpoint.to_string(),
        })
        .await?;

    info!(subscription_id = %sub.subscription_id, account_id = %sub.account_id, "push/subscribe");
    Ok((StatusCode::CREATED, Json(sub)).into_response())
}

pub(crate) async fn unsubscribe(
    State(st): State<Arc<AppState>>,
    Path(subscription_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<StatusCode> {
    let sub = st
        .store()
        .subscription(subscription_id)
        .await?
        .ok_or_else(|| ApiError::not_found("subscription_not_found", "subscription not found"))?;

    let permitted = actor.is_staff_of(&sub.account_id)
        || match sub.audience {
            Audience::Order { order_id } => st.service.view(order_id, &actor).await.is_ok(),
            Audience::Staff { .. } => false,
        };
    if !permitted {
        return Err(ApiError::Forbidden(
            "not permitted to remove this subscription".to_string(),
        ));
    }

    st.store().remove_subscription(subscription_id).await?;
    info!(subscription_id = %subscription_id, "push/unsubscribe");
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// SSE: GET /v1/accounts/:account_id/stream, GET /v1/orders/:order_id/stream
// ---------------------------------------------------------------------------

/// Which bus events a stream forwards.
#[derive(Debug, Clone)]
pub(crate) enum StreamScope {
    Account(String),
    Order(Uuid),
}

impl StreamScope {
    fn admits(&self, ev: &OrderEvent) -> bool {
        match self {
            StreamScope::Account(a) => ev.account_id() == a,
            StreamScope::Order(id) => ev.order_id() == *id,
        }
    }
}

pub(crate) async fn account_stream(
    State(st): State<Arc<AppState>>,
    Path(account_id): Path<String>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Response> {
    if !actor.is_staff_of(&account_id) {
        return Err(OrderError::AccountAccessDenied(account_id).into());
    }
    Ok(sse_response(st.bus.subscribe(), StreamScope::Account(account_id)))
}

pub(crate) async fn order_stream(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    RequestActor(actor): RequestActor,
) -> ApiResult<Response> {
    // Subscribe before the access check so nothing between the two is lost.
    let rx = st.bus.subscribe();
    st.service.view(order_id, &actor).await?;
    Ok(sse_response(rx, StreamScope::Order(order_id)))
}

fn sse_response(rx: broadcast::Receiver<BusMsg>, scope: StreamScope) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));

    let events = broadcast_to_sse(rx, scope);

    (headers, Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

pub(crate) fn broadcast_to_sse(
    rx: broadcast::Receiver<BusMsg>,
    scope: StreamScope,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(rx).filter_map(move |msg| {
        let scope = scope.clone();
        async move {
            match msg {
                Ok(BusMsg::Heartbeat { ts_millis }) => Some(Ok(Event::default()
                    .event("heartbeat")
                    .data(serde_json::json!({ "ts_millis": ts_millis }).to_string()))),
                Ok(BusMsg::Order(ev)) => {
                    if !scope.admits(&ev) {
                        return None;
                    }
                    let data = serde_json::to_string(&ev).ok()?;
                    Some(Ok(Event::default().event(ev.event_name()).data(data)))
                }
                // The client missed events; it must re-poll to catch up.
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed, ?scope, "sse subscriber lagged");
                    Some(Ok(Event::default()
                        .event("resync")
                        .data(serde_json::json!({ "missed": missed }).to_string())))
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_list_parses_and_rejects() {
        assert!(parse_status_list(None).unwrap().is_empty());
        assert_eq!(
            parse_status_list(Some("pending, ready,")).unwrap(),
            vec![OrderStatus::Pending, OrderStatus::Ready]
        );
        assert!(parse_status_list(Some("pending,cooking")).is_err());
    }
}
