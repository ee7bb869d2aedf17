//! JSON HTTP surface over the ledger, checkout and order services.
//!
//! The caller's identity comes from the `x-user-id` header, set by whatever
//! sits in front of this service.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use uuid::Uuid;
use crate::domain::aggregates::{Address, NewAddress, Order, OrderStatus};
use crate::repository::{AddressBook, Identity, SessionIdentity};
use crate::services::{CartLedger, CartSession, CartSnapshot, CheckoutRequest, OrderAssembler, OrderService};
use crate::{EcommerceError, UserId};

pub const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct AppState {
    pub ledger: CartLedger,
    pub assembler: Arc<OrderAssembler>,
    pub orders: OrderService,
    pub addresses: Arc<dyn AddressBook>,
}

impl IntoResponse for EcommerceError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::OutOfStock { .. } | Self::StockExceeded { .. } | Self::InvalidTransition { .. } => StatusCode::CONFLICT,
            Self::EmptyCart | Self::InvalidAddress(_) | Self::InvalidQuantity => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::LedgerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::StorageError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, EcommerceError>;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "opensase-storefront"})) }))
        .route("/api/v1/cart", get(get_cart).post(add_to_cart).delete(clear_cart))
        .route("/api/v1/cart/lines/:id", put(update_line).delete(remove_line))
        .route("/api/v1/addresses", get(list_addresses).post(create_address))
        .route("/api/v1/checkout", post(checkout))
        .route("/api/v1/orders", get(list_orders))
        .route("/api/v1/orders/:id", get(get_order))
        .route("/api/v1/orders/:id/status", post(update_order_status))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive()))
        .with_state(state)
}

fn identity(headers: &HeaderMap) -> SessionIdentity {
    match headers.get(USER_HEADER).and_then(|v| v.to_str().ok()).map(str::trim).filter(|v| !v.is_empty()) {
        Some(user) => SessionIdentity::signed_in(user),
        None => SessionIdentity::anonymous(),
    }
}

fn user_id(headers: &HeaderMap) -> ApiResult<UserId> {
    identity(headers).current_user_id().ok_or(EcommerceError::Unauthenticated)
}

async fn session(s: &AppState, headers: &HeaderMap) -> ApiResult<CartSession> {
    s.ledger.session(&identity(headers)).await
}

async fn get_cart(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<Json<CartSnapshot>> {
    Ok(Json(session(&s, &headers).await?.current().await?))
}

#[derive(Debug, Deserialize)]
pub struct AddToCartRequest {
    pub product_id: String,
    pub variant_id: Option<String>,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 { 1 }

async fn add_to_cart(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<AddToCartRequest>) -> ApiResult<(StatusCode, Json<CartSnapshot>)> {
    let cart = session(&s, &headers).await?;
    Ok((StatusCode::CREATED, Json(cart.add_to_cart(r.product_id, r.variant_id, r.quantity).await?)))
}

async fn clear_cart(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<StatusCode> {
    session(&s, &headers).await?.clear_cart().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct UpdateQuantityRequest {
    pub quantity: i64,
}

async fn update_line(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>, Json(r): Json<UpdateQuantityRequest>) -> ApiResult<Json<CartSnapshot>> {
    Ok(Json(session(&s, &headers).await?.update_quantity(id, r.quantity).await?))
}

async fn remove_line(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> ApiResult<Json<CartSnapshot>> {
    Ok(Json(session(&s, &headers).await?.remove_from_cart(id).await?))
}

async fn list_addresses(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<Address>>> {
    Ok(Json(s.addresses.list_addresses(&user_id(&headers)?).await?))
}

async fn create_address(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<NewAddress>) -> ApiResult<(StatusCode, Json<Address>)> {
    let user = user_id(&headers)?;
    let address = s.addresses.create_address(&user, r.validated()?).await?;
    Ok((StatusCode::CREATED, Json(address)))
}

async fn checkout(State(s): State<AppState>, headers: HeaderMap, Json(r): Json<CheckoutRequest>) -> ApiResult<(StatusCode, Json<Order>)> {
    let cart = session(&s, &headers).await?;
    Ok((StatusCode::CREATED, Json(s.assembler.place_order(&cart, r).await?)))
}

async fn list_orders(State(s): State<AppState>, headers: HeaderMap) -> ApiResult<Json<Vec<Order>>> {
    Ok(Json(s.orders.list_orders(&user_id(&headers)?).await?))
}

async fn get_order(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.get_order(&user_id(&headers)?, id).await?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

async fn update_order_status(State(s): State<AppState>, headers: HeaderMap, Path(id): Path<Uuid>, Json(r): Json<UpdateStatusRequest>) -> ApiResult<Json<Order>> {
    Ok(Json(s.orders.update_status(&user_id(&headers)?, id, r.status).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::aggregates::cart::tests::product;
    use crate::domain::value_objects::TaxRate;
    use crate::publisher::NoopPublisher;
    use crate::repository::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn app() -> Router {
        let store = MemoryStore::with_products([product("p1", 2_000, 5)]);
        let shared = Arc::new(store);
        let events = Arc::new(NoopPublisher);
        router(AppState {
            ledger: CartLedger::new(shared.clone(), shared.clone(), 16),
            assembler: Arc::new(OrderAssembler::new(shared.clone(), shared.clone(), shared.clone(), events.clone(), TaxRate::default())),
            orders: OrderService::new(shared.clone(), events).with_staff([UserId::from("ops")]),
            addresses: shared,
        })
    }

    async fn call(app: &Router, method: &str, uri: &str, user: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri).header("content-type", "application/json");
        if let Some(user) = user {
            req = req.header(USER_HEADER, user);
        }
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        let res = app.clone().oneshot(req.body(body).unwrap()).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_cart_requires_identity() {
        let app = app();
        let (status, body) = call(&app, "GET", "/api/v1/cart", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("sign in"));
    }

    #[tokio::test]
    async fn test_cart_and_checkout_over_http() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/v1/cart", Some("u1"), Some(json!({ "product_id": "p1" }))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["subtotal"], "20.00");

        let (_, body) = call(&app, "POST", "/api/v1/cart", Some("u1"), Some(json!({ "product_id": "p1", "quantity": 2 }))).await;
        let line = body["items"][0]["id"].as_str().unwrap().to_string();
        assert_eq!(body["total_items"], 3);

        let (status, body) = call(&app, "PUT", &format!("/api/v1/cart/lines/{line}"), Some("u1"), Some(json!({ "quantity": 10 }))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].is_string());

        let checkout = json!({
            "address": { "kind": "new", "address": {
                "full_name": "Ada Obi", "phone": "0800", "line1": "12 Marina Rd", "city": "Lagos",
                "state": "LA", "postal_code": "101001", "country": "NG"
            }},
            "delivery_method": "standard",
            "payment_method": "card"
        });
        let (status, order) = call(&app, "POST", "/api/v1/checkout", Some("u1"), Some(checkout.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(order["total"], "69.80");
        assert_eq!(order["tax"], "4.80");
        assert_eq!(order["status"], "pending");

        let (_, cart) = call(&app, "GET", "/api/v1/cart", Some("u1"), None).await;
        assert_eq!(cart["total_items"], 0);

        let (status, _) = call(&app, "POST", "/api/v1/checkout", Some("u1"), Some(checkout)).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

        let id = order["id"].as_str().unwrap();
        let status_uri = format!("/api/v1/orders/{id}/status");
        let (status, _) = call(&app, "POST", &status_uri, None, Some(json!({ "status": "cancelled" }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, "POST", &status_uri, Some("u1"), Some(json!({ "status": "processing" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = call(&app, "POST", &status_uri, Some("u2"), Some(json!({ "status": "cancelled" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, moved) = call(&app, "POST", &status_uri, Some("ops"), Some(json!({ "status": "processing" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(moved["status"], "processing");

        let (status, _) = call(&app, "GET", &format!("/api/v1/orders/{id}"), Some("u2"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, mine) = call(&app, "GET", "/api/v1/orders", Some("u1"), None).await;
        assert_eq!(mine.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_address_validation_over_http() {
        let app = app();
        let (status, body) = call(&app, "POST", "/api/v1/addresses", Some("u1"), Some(json!({ "full_name": "Ada" }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("postal_code"));
        let (_, list) = call(&app, "GET", "/api/v1/addresses", Some("u1"), None).await;
        assert_eq!(list, json!([]));
    }
}
