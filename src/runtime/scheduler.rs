/// Schedule trigger adapter
///
/// Registers a cron job for every schedule-trigger node and enqueues a
/// queue item each time one fires; execution stays with the queue
/// processor. Jobs hot-reload: updating a workflow swaps its jobs without
/// touching anyone else's, and a fired job whose workflow has been
/// deleted simply skips.

use crate::{
    queue::store::{EnqueueRequest, QueueStore},
    queue::types::Priority,
    workflow::{registry::DefinitionRegistry, types::WorkflowDefinition},
};
use anyhow::Result;
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

/// Hot-reload cron scheduler service for schedule triggers.
pub struct ScheduleTriggerService {
    scheduler: Arc<RwLock<JobScheduler>>,
    /// Job UUIDs keyed by "workflow_id:node_id" so updates can remove the
    /// superseded job.
    job_uuid_map: Arc<RwLock<HashMap<String, Uuid>>>,
    definitions: Arc<DefinitionRegistry>,
    store: QueueStore,
    default_max_retries: u32,
}

impl ScheduleTriggerService {
    pub async fn new(
        definitions: Arc<DefinitionRegistry>,
        store: QueueStore,
        default_max_retries: u32,
    ) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;

        Ok(Self {
            scheduler: Arc::new(RwLock::new(scheduler)),
            job_uuid_map: Arc::new(RwLock::new(HashMap::new())),
            definitions,
            store,
            default_max_retries,
        })
    }

    /// Register jobs for every known workflow and start ticking.
    pub async fn start(&self) -> Result<()> {
        tracing::info!("⏰ Starting schedule trigger service");

        self.register_all_schedules().await?;

        {
            let scheduler = self.scheduler.read().await;
            scheduler.start().await?;
        }

        tracing::info!("✅ Schedule trigger service started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        tracing::info!("⏹️ Stopping schedule trigger service");

        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.clear();
        }
        {
            let mut scheduler = self.scheduler.write().await;
            scheduler.shutdown().await?;
        }

        tracing::info!("✅ Schedule trigger service stopped");
        Ok(())
    }

    /// Add or update the schedule jobs for one workflow (hot reload).
    pub async fn sync_workflow_schedules(&self, workflow: &WorkflowDefinition) -> Result<()> {
        let schedule_nodes: Vec<_> = workflow
            .nodes
            .iter()
            .filter(|node| node.node_type == "schedule")
            .collect();

        if schedule_nodes.is_empty() {
            // Remove any jobs left over from a previous revision.
            self.remove_workflow_schedules(&workflow.id).await;
            return Ok(());
        }

        let count = schedule_nodes.len();
        for node in schedule_nodes {
            self.add_or_update_schedule_job(&workflow.id, &node.id, &node.config)
                .await?;
        }

        tracing::info!(
            "🔥 Hot-reloaded {} schedule triggers for workflow: {}",
            count,
            workflow.id
        );
        Ok(())
    }

    /// Remove all schedule jobs for a workflow.
    pub async fn remove_workflow_schedules(&self, workflow_id: &str) {
        let mut job_uuid_map = self.job_uuid_map.write().await;
        let prefix = format!("{workflow_id}:");
        let keys_to_remove: Vec<String> = job_uuid_map
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();

        for key in keys_to_remove {
            if let Some(job_uuid) = job_uuid_map.remove(&key) {
                let scheduler = self.scheduler.read().await;
                if let Err(e) = scheduler.remove(&job_uuid).await {
                    tracing::warn!("⚠️ Failed to remove schedule job {}: {}", key, e);
                } else {
                    tracing::debug!("🛑 Removed schedule job: {}", key);
                }
            }
        }
    }

    async fn add_or_update_schedule_job(
        &self,
        workflow_id: &str,
        node_id: &str,
        config: &serde_json::Value,
    ) -> Result<()> {
        let cron = config
            .get("cron")
            .and_then(|s| s.as_str())
            .ok_or_else(|| anyhow::anyhow!("schedule node missing 'cron' parameter"))?;
        let priority = config
            .get("priority")
            .and_then(|p| p.as_str())
            .and_then(Priority::parse)
            .unwrap_or_default();

        let job_key = format!("{workflow_id}:{node_id}");
        tracing::info!("⏰ Registering schedule job {} ({})", job_key, cron);

        // Drop the superseded job first so updates never double-fire.
        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            if let Some(old_uuid) = job_uuid_map.remove(&job_key) {
                let scheduler = self.scheduler.read().await;
                if let Err(e) = scheduler.remove(&old_uuid).await {
                    tracing::warn!("⚠️ Failed to remove old schedule job {}: {}", job_key, e);
                }
            }
        }

        let workflow_id_owned = workflow_id.to_string();
        let node_id_owned = node_id.to_string();
        let definitions = Arc::clone(&self.definitions);
        let store = self.store.clone();
        let default_max_retries = self.default_max_retries;

        let job = Job::new_async(cron, move |_uuid, _l| {
            let workflow_id = workflow_id_owned.clone();
            let node_id = node_id_owned.clone();
            let definitions = Arc::clone(&definitions);
            let store = store.clone();

            Box::pin(async move {
                // The workflow may have been deleted since registration;
                // the job just skips until it is cleaned up.
                let Some(compiled) = definitions.get(&workflow_id) else {
                    tracing::debug!(
                        "⏭️ Skipping schedule trigger for deleted workflow: {}",
                        workflow_id
                    );
                    return;
                };

                let request = EnqueueRequest {
                    workflow_id: workflow_id.clone(),
                    workflow_name: compiled.definition.name.clone(),
                    trigger_data: json!({
                        "trigger_type": "schedule",
                        "node_id": node_id,
                        "fired_at": chrono::Utc::now().to_rfc3339(),
                    }),
                    priority,
                    scheduled_at: None,
                    max_retries: default_max_retries,
                    serialize_runs: compiled.definition.serialize_runs,
                };

                match store.enqueue(request).await {
                    Ok(item) => tracing::info!(
                        "🔔 Schedule trigger enqueued item {} for workflow {}",
                        item.id,
                        workflow_id
                    ),
                    Err(e) => tracing::error!(
                        "❌ Schedule trigger failed to enqueue for workflow {}: {}",
                        workflow_id,
                        e
                    ),
                }
            })
        })?;

        let new_uuid = {
            let scheduler = self.scheduler.write().await;
            scheduler.add(job).await?
        };

        {
            let mut job_uuid_map = self.job_uuid_map.write().await;
            job_uuid_map.insert(job_key, new_uuid);
        }

        Ok(())
    }

    /// Register schedule triggers from all known workflows (startup only).
    async fn register_all_schedules(&self) -> Result<()> {
        let mut total = 0;
        let compiled = self.definitions.all();
        let workflow_count = compiled.len();

        for compiled in compiled {
            let triggers = compiled
                .definition
                .nodes
                .iter()
                .filter(|n| n.node_type == "schedule")
                .count();

            if triggers > 0 {
                self.sync_workflow_schedules(&compiled.definition).await?;
                total += triggers;
            }
        }

        tracing::info!(
            "📊 Registered {} schedule triggers from {} workflows",
            total,
            workflow_count
        );
        Ok(())
    }
}
