//! curation-portal - core of a community curation portal
//!
//! This crate provides:
//! - Declarative, composable route authorization over roles and resource ownership
//! - Resumable chunked uploads with exactly-once assembly into submissions
//! - Single-flight guards for long-running maintenance jobs
//! - redb embedded database for sessions, submissions and archives
//! - REST API with JSend envelopes

pub mod api;
pub mod auth;
pub mod config;
pub mod jobs;
pub mod object_store;
pub mod storage;
pub mod submissions;
#[cfg(test)]
pub mod testutil;
pub mod uploads;

use std::sync::Arc;

use auth::{AuthorizationEngine, BypassRule};
use config::Config;
use jobs::{ArchiveIndexer, JobRegistry};
use object_store::ObjectStore;
use storage::Database;
use submissions::{Notifier, SubmissionAssembler, Validator};
use uploads::{ChunkStore, UploadCoordinator};

/// Shared application state
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub object_store: Arc<dyn ObjectStore>,
    pub engine: AuthorizationEngine,
    pub bypass: BypassRule,
    pub uploads: UploadCoordinator,
    pub jobs: Arc<JobRegistry>,
    pub indexer: Option<Arc<dyn ArchiveIndexer>>,
    pub notifier: Arc<dyn Notifier>,
}

impl AppState {
    /// Wire the engine, upload coordinator and job registry around the
    /// given collaborators.
    pub fn new(
        config: Config,
        db: Database,
        object_store: Arc<dyn ObjectStore>,
        validator: Arc<dyn Validator>,
        notifier: Arc<dyn Notifier>,
        indexer: Option<Arc<dyn ArchiveIndexer>>,
    ) -> Self {
        let store = Arc::new(db.clone());
        let engine = AuthorizationEngine::new(store.clone(), store.clone());

        let assembler = SubmissionAssembler::new(
            db.clone(),
            Arc::clone(&object_store),
            store,
            validator,
            Arc::clone(&notifier),
        );
        let uploads = UploadCoordinator::new(ChunkStore::new(db.clone()), Arc::new(assembler));

        let bypass = BypassRule::new("god-bypass", config.auth.bypass_user_ids.iter().copied());

        Self {
            config,
            db,
            object_store,
            engine,
            bypass,
            uploads,
            jobs: JobRegistry::new(),
            indexer,
            notifier,
        }
    }
}
