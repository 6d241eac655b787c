//! HTTP API for users and certificates.

pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use certflow_core::queue::Publisher;

use crate::manager::StateManager;

/// Build the service router.
///
/// `/user` and `/cert` carry the store operations, `/health` reports store
/// connectivity.
pub fn build_router<P: Publisher + 'static>(manager: Arc<StateManager<P>>) -> Router {
    Router::new()
        .route(
            "/user",
            get(routes::get_user::<P>)
                .post(routes::add_user::<P>)
                .delete(routes::deactivate_user::<P>),
        )
        .route(
            "/cert",
            get(routes::list_certificates::<P>)
                .post(routes::add_certificate::<P>)
                .patch(routes::set_certificate_active::<P>),
        )
        .route("/health", get(routes::health::<P>))
        .with_state(manager)
}
