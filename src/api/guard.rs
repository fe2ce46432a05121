use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::MethodRouter;

use crate::api::response::{ApiError, AppQuery};
use crate::auth::{extract_credential, AuthError, Predicate, RequestFacts};
use crate::AppState;

/// Per-route authorization: the shared state plus the route's policy.
#[derive(Clone)]
pub struct RouteGuard {
    state: Arc<AppState>,
    policy: Arc<Predicate>,
}

impl RouteGuard {
    pub fn new(state: Arc<AppState>, policy: Predicate) -> Self {
        Self {
            state,
            policy: Arc::new(policy),
        }
    }
}

/// Attach `policy` to a method router. Runs after route matching so path
/// parameters are available to ownership predicates.
pub fn guarded(
    state: &Arc<AppState>,
    policy: Predicate,
    route: MethodRouter<Arc<AppState>>,
) -> MethodRouter<Arc<AppState>> {
    route.route_layer(middleware::from_fn_with_state(
        RouteGuard::new(Arc::clone(state), policy),
        authorize,
    ))
}

/// Authorization middleware.
///
/// Resolves the caller, evaluates the route policy and stores the resolved
/// `UserId` in request extensions for handlers to extract.
pub async fn authorize(
    State(guard): State<RouteGuard>,
    params: Option<Path<HashMap<String, String>>>,
    AppQuery(query): AppQuery<HashMap<String, String>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let credential = extract_credential(req.headers());
    let facts = RequestFacts::new(params.map(|Path(p)| p).unwrap_or_default(), query);

    let user = guard
        .state
        .engine
        .authorize(credential.as_deref(), &facts, &guard.policy)
        .await
        .map_err(|e| {
            match &e {
                AuthError::AuthenticationRequired | AuthError::Denied => {
                    tracing::debug!(path = %req.uri().path(), error = %e, "request not authorized");
                }
                _ => {
                    tracing::warn!(path = %req.uri().path(), error = %e, "authorization check failed");
                }
            }
            ApiError::from(e)
        })?;

    req.extensions_mut().insert(user);
    Ok(next.run(req).await)
}
