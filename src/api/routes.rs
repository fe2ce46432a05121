use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::guard::guarded;
use super::handlers;
use crate::auth::{Predicate, ResourceKey, RoleGroup};
use crate::AppState;

/// Multipart framing around a chunk: boundaries plus the resumable.js fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    let chunk_limit = state.config.uploads.max_chunk_size as usize + MULTIPART_OVERHEAD;
    let policies = Policies::new(&state);

    let mut router = Router::new()
        // Uploads
        .route(
            "/api/submission-receiver-resumable",
            guarded(
                &state,
                policies.new_submission(),
                post(handlers::receive_chunk)
                    .get(handlers::probe_chunk)
                    .layer(DefaultBodyLimit::max(chunk_limit)),
            ),
        )
        .route(
            "/api/submission-receiver-resumable/:submission-id",
            guarded(
                &state,
                policies.existing_submission(),
                post(handlers::receive_chunk)
                    .get(handlers::probe_chunk)
                    .layer(DefaultBodyLimit::max(chunk_limit)),
            ),
        )
        .route(
            "/api/upload-status/:identifier",
            guarded(
                &state,
                Predicate::authenticated(),
                get(handlers::upload_status),
            ),
        )
        // Submissions
        .route(
            "/api/submissions/:submission-id",
            guarded(
                &state,
                policies.existing_submission(),
                get(handlers::get_submission),
            ),
        )
        .route(
            "/api/submissions/:submission-id",
            guarded(
                &state,
                Predicate::RoleAny(RoleGroup::Deleter),
                delete(handlers::delete_submission),
            ),
        )
        .route(
            "/api/submission-batch/:submission-ids/comment",
            guarded(&state, policies.comment(), post(handlers::add_comments)),
        )
        // Internal
        .route(
            "/api/internal/users/:user-id/sessions",
            guarded(
                &state,
                policies.god(),
                delete(handlers::delete_user_sessions),
            ),
        )
        .route(
            "/api/internal/jobs",
            guarded(&state, policies.god(), get(handlers::job_status)),
        )
        .route(
            "/api/internal/jobs/:kind",
            guarded(&state, policies.god(), post(handlers::trigger_job)),
        )
        .route("/_internal/health", get(handlers::health));

    // Test-only routes
    if state.config.test_mode {
        tracing::warn!("Test mode enabled; purge and session minting routes are available.");
        router = router
            .route("/admin/purge", delete(handlers::admin_purge))
            .route("/admin/sessions", post(handlers::admin_create_session));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Route policies that depend on configuration.
struct Policies<'a> {
    state: &'a AppState,
}

impl<'a> Policies<'a> {
    fn new(state: &'a AppState) -> Self {
        Self { state }
    }

    fn staff() -> Predicate {
        Predicate::RoleAny(RoleGroup::Staff)
    }

    fn trial_curator() -> Predicate {
        Predicate::RoleAny(RoleGroup::TrialCurator)
    }

    /// Opening a submission: audit identities are capped on open submissions.
    fn new_submission(&self) -> Predicate {
        Predicate::any([
            self.state.bypass.predicate(),
            Self::staff(),
            Self::trial_curator(),
            Predicate::all([
                Predicate::in_audit(),
                Predicate::WithinResourceLimit(
                    ResourceKey::SubmissionId,
                    self.state.config.uploads.audit_submission_limit,
                ),
            ]),
        ])
    }

    /// Staff, or the owner of `submission-id`.
    fn existing_submission(&self) -> Predicate {
        let owns = || Predicate::OwnsResource(ResourceKey::SubmissionId);
        Predicate::any([
            Self::staff(),
            Predicate::all([Self::trial_curator(), owns()]),
            Predicate::all([Predicate::in_audit(), owns()]),
        ])
    }

    /// Staff may comment anywhere; others only on submissions they own.
    /// Everybody is bound by the action permissions of their roles.
    fn comment(&self) -> Predicate {
        let owns_all = || Predicate::OwnsAllResources(ResourceKey::SubmissionIds);
        Predicate::all([
            Predicate::CanPerformAction,
            Predicate::any([
                Self::staff(),
                Predicate::all([Self::trial_curator(), owns_all()]),
                Predicate::all([Predicate::in_audit(), owns_all()]),
            ]),
        ])
    }

    fn god(&self) -> Predicate {
        Predicate::any([
            Predicate::RoleAny(RoleGroup::God),
            self.state.bypass.predicate(),
        ])
    }
}
