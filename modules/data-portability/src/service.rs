use mutation_kernel::{
    Actor, Clock, EffectOutcome, EventDraft, Kernel, KernelError, KernelResult, Mutation,
    MutationCoordinator, MutationResponse, RequestContext,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{
    CreateExportRequest, ExportCompletedPayload, ExportRequest, ExportRequestedMetric,
    ExportStatus,
};
use crate::store::ExportStore;

/// Roles that may export on a user's behalf
pub const SUPPORT_ROLES: &[&str] = &["admin", "support"];

pub struct ExportService {
    coordinator: MutationCoordinator,
    store: Arc<dyn ExportStore>,
    clock: Arc<dyn Clock>,
}

impl ExportService {
    pub fn new(kernel: &Kernel, store: Arc<dyn ExportStore>) -> Self {
        Self {
            coordinator: kernel.coordinator(),
            store,
            clock: kernel.clock(),
        }
    }

    /// Produce a user's data export. Generation is synchronous, so the
    /// request completes within the call.
    pub async fn request_export(
        &self,
        ctx: &RequestContext,
        actor: &Actor,
        request: CreateExportRequest,
    ) -> KernelResult<MutationResponse<ExportRequest>> {
        if request.user_id.trim().is_empty() {
            return Err(KernelError::InvalidInput("user_id is required".to_string()));
        }

        let owner = request.user_id.clone();
        let mutation = Mutation::new("data_export.request", actor, &request)?
            .authorize(move |a| a.require_self_or_role(&owner, SUPPORT_ROLES));

        self.coordinator
            .execute(ctx, mutation, || async move {
                let now = self.clock.now();
                let request_id = format!("exp_{}", Uuid::new_v4().simple());
                let export = ExportRequest {
                    location: format!(
                        "exports/{}/{}.{}",
                        request.user_id,
                        request_id,
                        request.format.extension()
                    ),
                    request_id,
                    user_id: request.user_id,
                    format: request.format,
                    status: ExportStatus::Completed,
                    requested_at: now,
                    completed_at: now,
                };
                self.store.insert(export.clone()).await?;

                tracing::info!(
                    request_id = %export.request_id,
                    user_id = %export.user_id,
                    format = export.format.extension(),
                    "Data export completed"
                );

                let completed = EventDraft::domain(
                    "data_export.completed",
                    "user_id",
                    &ExportCompletedPayload {
                        request_id: export.request_id.clone(),
                        user_id: export.user_id.clone(),
                        format: export.format,
                        location: export.location.clone(),
                    },
                )?;
                let metric = EventDraft::analytics(
                    "data_export.requested",
                    "user_id",
                    &ExportRequestedMetric {
                        user_id: export.user_id.clone(),
                        format: export.format,
                    },
                )?;

                Ok::<_, KernelError>(EffectOutcome::created(export)
                    .with_event(completed)
                    .with_event(metric))
            })
            .await
    }

    pub async fn list_exports(&self, actor: &Actor, user_id: &str) -> KernelResult<Vec<ExportRequest>> {
        actor.require_subject()?;
        actor.require_self_or_role(user_id, SUPPORT_ROLES)?;
        Ok(self.store.list_for_user(user_id).await?)
    }
}
