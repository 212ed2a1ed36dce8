use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    middleware,
    routing::{get, post, put},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::commission::Distribution;
use crate::error::ApiErrorWithMeta;
use crate::graph::{Attachment, Registration};
use crate::responses::{ApiOk, RequestMeta, meta_middleware};
use crate::service::Network;
use crate::store::Store;
use crate::types::{
    Earning, NewPackage, Package, Purchase, TeamMember, User, UserId, Withdrawal,
};

/// The application state.
pub struct AppState<S> {
    /// The sponsorship network the handlers operate on.
    pub network: Arc<Network<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            network: self.network.clone(),
        }
    }
}

impl<S: Store> AppState<S> {
    pub fn new(network: Network<S>) -> Self {
        Self {
            network: Arc::new(network),
        }
    }
}

/// The request to move a user under another sponsor, or to the root.
#[derive(Deserialize)]
pub struct ReassignSponsorRequest {
    pub sponsor_id: Option<UserId>,
}

/// The query string of the team listing.
#[derive(Deserialize)]
pub struct TeamQuery {
    /// How many levels below the user to include.
    pub levels: Option<u32>,
}

/// The request to create a package.
#[derive(Deserialize)]
pub struct CreatePackageRequest {
    pub name: String,
    pub price: Decimal,
    pub profit_percentage: Decimal,
}

/// The request to buy a package.
#[derive(Deserialize)]
pub struct CreatePurchaseRequest {
    /// The ID of the buyer.
    pub user_id: UserId,
    /// The ID of the package bought.
    pub package_id: i64,
}

/// The request to withdraw part of the available balance.
#[derive(Deserialize)]
pub struct CreateWithdrawalRequest {
    pub user_id: UserId,
    pub amount: Decimal,
}

/// The response after a purchase.
#[derive(Serialize)]
pub struct PurchaseResponse {
    pub purchase: Purchase,
    pub profit: Decimal,
    pub earnings: Vec<Earning>,
}

impl From<Distribution> for PurchaseResponse {
    fn from(d: Distribution) -> Self {
        Self {
            purchase: d.purchase,
            profit: d.profit,
            earnings: d.earnings,
        }
    }
}

pub fn init_router<S: Store>(state: AppState<S>) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/users", post(register_handler::<S>))
        .route("/users/{id}", get(get_user_handler::<S>))
        .route("/users/{id}/sponsor", put(reassign_sponsor_handler::<S>))
        .route("/users/{id}/team", get(team_handler::<S>))
        .route("/users/{id}/earnings", get(earnings_handler::<S>))
        .route("/users/{id}/withdrawals", get(withdrawals_handler::<S>))
        .route("/users/{id}/purchases", get(purchases_handler::<S>))
        .route(
            "/packages",
            get(list_packages_handler::<S>).post(create_package_handler::<S>),
        )
        .route("/purchases", post(create_purchase_handler::<S>))
        .route("/withdrawals", post(create_withdrawal_handler::<S>))
        .route(
            "/withdrawals/{id}/complete",
            post(complete_withdrawal_handler::<S>),
        )
        .route(
            "/withdrawals/{id}/reject",
            post(reject_withdrawal_handler::<S>),
        )
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(middleware::from_fn(meta_middleware))
}

async fn register_handler<S: Store>(
    State(st): State<AppState<S>>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<Registration>,
) -> Result<ApiOk<User>, ApiErrorWithMeta> {
    let user = st
        .network
        .register(&req)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::created("user registered", user, meta))
}

async fn get_user_handler<S: Store>(
    State(st): State<AppState<S>>,
    Path(id): Path<UserId>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<User>, ApiErrorWithMeta> {
    let user = st
        .network
        .user(id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("user fetched", user, meta))
}

async fn reassign_sponsor_handler<S: Store>(
    State(st): State<AppState<S>>,
    Path(id): Path<UserId>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<ReassignSponsorRequest>,
) -> Result<ApiOk<Attachment>, ApiErrorWithMeta> {
    let attachment = st
        .network
        .reassign_sponsor(id, req.sponsor_id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("sponsor updated", attachment, meta))
}

async fn team_handler<S: Store>(
    State(st): State<AppState<S>>,
    Path(id): Path<UserId>,
    Query(q): Query<TeamQuery>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<TeamMember>>, ApiErrorWithMeta> {
    let team = st
        .network
        .team(id, q.levels)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("team fetched", team, meta))
}

async fn earnings_handler<S: Store>(
    State(st): State<AppState<S>>,
    Path(id): Path<UserId>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<Earning>>, ApiErrorWithMeta> {
    let earnings = st
        .network
        .earnings(id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("earnings fetched", earnings, meta))
}

async fn withdrawals_handler<S: Store>(
    State(st): State<AppState<S>>,
    Path(id): Path<UserId>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<Withdrawal>>, ApiErrorWithMeta> {
    let withdrawals = st
        .network
        .withdrawals(id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("withdrawals fetched", withdrawals, meta))
}

async fn purchases_handler<S: Store>(
    State(st): State<AppState<S>>,
    Path(id): Path<UserId>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<Purchase>>, ApiErrorWithMeta> {
    let purchases = st
        .network
        .purchases(id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("purchases fetched", purchases, meta))
}

async fn list_packages_handler<S: Store>(
    State(st): State<AppState<S>>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Vec<Package>>, ApiErrorWithMeta> {
    let packages = st
        .network
        .packages()
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("packages fetched", packages, meta))
}

async fn create_package_handler<S: Store>(
    State(st): State<AppState<S>>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreatePackageRequest>,
) -> Result<ApiOk<Package>, ApiErrorWithMeta> {
    let package = st
        .network
        .create_package(NewPackage {
            name: req.name,
            price: req.price,
            profit_percentage: req.profit_percentage,
        })
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::created("package created", package, meta))
}

async fn create_purchase_handler<S: Store>(
    State(st): State<AppState<S>>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreatePurchaseRequest>,
) -> Result<ApiOk<PurchaseResponse>, ApiErrorWithMeta> {
    let distribution = st
        .network
        .purchase(req.user_id, req.package_id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::created(
        "purchase recorded",
        distribution.into(),
        meta,
    ))
}

async fn create_withdrawal_handler<S: Store>(
    State(st): State<AppState<S>>,
    Extension(meta): Extension<RequestMeta>,
    Json(req): Json<CreateWithdrawalRequest>,
) -> Result<ApiOk<Withdrawal>, ApiErrorWithMeta> {
    let withdrawal = st
        .network
        .request_withdrawal(req.user_id, req.amount)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::created("withdrawal requested", withdrawal, meta))
}

async fn complete_withdrawal_handler<S: Store>(
    State(st): State<AppState<S>>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Withdrawal>, ApiErrorWithMeta> {
    let withdrawal = st
        .network
        .complete_withdrawal(id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("withdrawal completed", withdrawal, meta))
}

async fn reject_withdrawal_handler<S: Store>(
    State(st): State<AppState<S>>,
    Path(id): Path<i64>,
    Extension(meta): Extension<RequestMeta>,
) -> Result<ApiOk<Withdrawal>, ApiErrorWithMeta> {
    let withdrawal = st
        .network
        .reject_withdrawal(id)
        .await
        .map_err(|e| e.into_api(meta.clone()))?;
    Ok(ApiOk::ok("withdrawal rejected", withdrawal, meta))
}
