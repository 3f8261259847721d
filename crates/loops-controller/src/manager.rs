//! Runs every controller against one store until shutdown.

use std::sync::Arc;

use loops_client::LoopsApi;
use loops_core::ResourceRef;
use loops_storage::DynStore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::contact::ContactReconciler;
use crate::controller::{Controller, ControllerConfig};
use crate::error::ReconcileError;
use crate::indexes::register_indexes;
use crate::membership::ContactGroupMembershipReconciler;

#[derive(Debug, Clone, Default)]
pub struct ManagerConfig {
    pub controller: ControllerConfig,
    /// Group that `newsletter-` contacts are enrolled in. `None` disables enrolment.
    pub newsletter_group: Option<ResourceRef>,
}

pub struct Manager {
    store: DynStore,
    loops: Arc<dyn LoopsApi>,
    config: ManagerConfig,
}

impl Manager {
    pub fn new(store: DynStore, loops: Arc<dyn LoopsApi>, config: ManagerConfig) -> Self {
        Self {
            store,
            loops,
            config,
        }
    }

    /// Register indexes, then run both controllers until `shutdown` is cancelled.
    ///
    /// If one controller fails to start the other is stopped as well.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ReconcileError> {
        register_indexes(&self.store)?;

        let contacts = Controller::new(
            self.store.clone(),
            ContactReconciler::new(
                self.store.clone(),
                self.loops.clone(),
                self.config.newsletter_group.clone(),
            )?,
            self.config.controller.clone(),
        );
        let memberships = Controller::new(
            self.store.clone(),
            ContactGroupMembershipReconciler::new(self.store.clone(), self.loops.clone())?,
            self.config.controller.clone(),
        );

        let stop = shutdown.child_token();
        let mut tasks = JoinSet::new();
        tasks.spawn(contacts.run(stop.clone()));
        tasks.spawn(memberships.run(stop.clone()));
        info!(newsletter_group = ?self.config.newsletter_group, "controller manager started");

        let mut result = Ok(());
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|err| Err(ReconcileError::Panicked(err.to_string())));
            if let Err(err) = outcome {
                error!(error = %err, "controller exited with error");
                stop.cancel();
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        info!("controller manager stopped");
        result
    }
}
