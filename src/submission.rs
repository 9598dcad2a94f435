//! Submission orchestrator
//!
//! validate → build archive → submit to the engine → persist the record.
//! Nothing is written before the engine acknowledges the job, so every
//! failure up to that point leaves no trace. After it, a failed insert is
//! an orphaned engine job and is reported as `RecordPersistFailure`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::archive::{Archive, ArchiveBuilder};
use crate::config::SubmissionConfig;
use crate::error::{GatewayError, SubmissionError};
use crate::gateway::{GatewayReceipt, WorkflowGateway};
use crate::geometry;
use crate::lifecycle::{Transition, TransitionOutcome};
use crate::store::LifecycleStore;
use crate::types::{
    Descriptor, EcosystemType, ExecutionRecord, ExecutionStatus, GeometryType, NewExecution,
    SubmissionRequest,
};

/// A retry may duplicate the job on the engine, so there is at most one
const MAX_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct SubmissionPolicy {
    pub retry_unreachable: bool,
    pub retry_delay: Duration,
}

impl Default for SubmissionPolicy {
    fn default() -> Self {
        Self::from(&SubmissionConfig::default())
    }
}

impl From<&SubmissionConfig> for SubmissionPolicy {
    fn from(config: &SubmissionConfig) -> Self {
        Self {
            retry_unreachable: config.retry_unreachable,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }
}

pub struct SubmissionOrchestrator {
    store: Arc<dyn LifecycleStore>,
    gateway: Arc<dyn WorkflowGateway>,
    archive: ArchiveBuilder,
    policy: SubmissionPolicy,
}

impl SubmissionOrchestrator {
    pub fn new(
        store: Arc<dyn LifecycleStore>,
        gateway: Arc<dyn WorkflowGateway>,
        policy: SubmissionPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            archive: ArchiveBuilder::new(),
            policy,
        }
    }

    pub async fn submit(
        &self,
        owner_id: &str,
        request: SubmissionRequest,
    ) -> Result<ExecutionRecord, SubmissionError> {
        if owner_id.trim().is_empty() {
            return Err(SubmissionError::invalid("owner_id", "must not be empty"));
        }

        let descriptor = validate(&request)?;
        let archive = self.archive.build(&descriptor)?;
        let receipt = self.submit_with_retry(&archive, &descriptor).await?;

        let execution_id = receipt.execution_id.clone();
        let record = self
            .store
            .insert(NewExecution {
                execution_id: execution_id.clone(),
                owner_id: owner_id.to_string(),
                descriptor,
                created_at: Utc::now(),
            })
            .await
            .map_err(|source| {
                error!(
                    execution_id = %execution_id,
                    owner_id = %owner_id,
                    error = %source,
                    "Orphaned engine job: execution accepted but its record could not be persisted"
                );
                SubmissionError::RecordPersistFailure {
                    execution_id: execution_id.clone(),
                    source,
                }
            })?;

        info!(
            execution_id = %record.execution_id,
            owner_id = %owner_id,
            gateway = self.gateway.kind(),
            "Execution submitted"
        );

        Ok(self.apply_inline_status(record, &receipt).await)
    }

    async fn submit_with_retry(
        &self,
        archive: &Archive,
        descriptor: &Descriptor,
    ) -> Result<GatewayReceipt, GatewayError> {
        let mut attempt = 1;
        loop {
            match self.gateway.submit(archive, descriptor).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) => {
                    if let GatewayError::Protocol { .. } = &e {
                        warn!(attempt, error = %e, "Execution engine contract mismatch");
                    }
                    if e.is_retryable()
                        && self.policy.retry_unreachable
                        && attempt < MAX_ATTEMPTS
                    {
                        warn!(attempt, error = %e, "Execution engine unavailable, retrying");
                        tokio::time::sleep(self.policy.retry_delay).await;
                        attempt += 1;
                        continue;
                    }
                    warn!(attempt, error = %e, "Submission to execution engine failed");
                    return Err(e);
                }
            }
        }
    }

    /// Record an inline `running` heartbeat; failures keep the submitted record
    async fn apply_inline_status(
        &self,
        record: ExecutionRecord,
        receipt: &GatewayReceipt,
    ) -> ExecutionRecord {
        match receipt.status {
            Some(ExecutionStatus::Running) => {}
            Some(other) if other != ExecutionStatus::Submitted => {
                debug!(
                    execution_id = %record.execution_id,
                    status = %other,
                    "Ignoring inline terminal status; waiting for the callback"
                );
                return record;
            }
            _ => return record,
        }

        match self
            .store
            .transition(&record.execution_id, &Transition::Running, Utc::now())
            .await
        {
            Ok(TransitionOutcome::Applied(updated)) => updated,
            Ok(TransitionOutcome::AlreadyTerminal(current))
            | Ok(TransitionOutcome::Unchanged(current)) => current,
            Ok(TransitionOutcome::NotFound) => record,
            Err(e) => {
                warn!(
                    execution_id = %record.execution_id,
                    error = %e,
                    "Failed to record running heartbeat"
                );
                record
            }
        }
    }
}

/* ===================== Validation ===================== */

/// Check a request and snapshot it as an immutable descriptor
pub fn validate(request: &SubmissionRequest) -> Result<Descriptor, SubmissionError> {
    let name = required("name", &request.name)?;
    let species_tag = required("species_tag", &request.species_tag)?;

    let ecosystem_type: EcosystemType = required("ecosystem_type", &request.ecosystem_type)?
        .parse()
        .map_err(|e: crate::types::UnknownVariant| {
            SubmissionError::invalid("ecosystem_type", e.to_string())
        })?;
    let geometry_type: GeometryType = required("geometry_type", &request.geometry_type)?
        .parse()
        .map_err(|e: crate::types::UnknownVariant| {
            SubmissionError::invalid("geometry_type", e.to_string())
        })?;

    let geometry_wkt = geometry::normalize(geometry_type, &request.geometry)?;

    if let Some(window) = request.time_window {
        if window.start > window.end {
            return Err(SubmissionError::invalid(
                "time_window",
                format!("start {} is after end {}", window.start, window.end),
            ));
        }
    }

    let description = request
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(String::from);

    Ok(Descriptor {
        name,
        description,
        species_tag,
        ecosystem_type,
        geometry_type,
        geometry_wkt,
        time_window: request.time_window,
        parameters: request.parameters.clone(),
    })
}

fn required(field: &'static str, value: &str) -> Result<String, SubmissionError> {
    let value = value.trim();
    if value.is_empty() {
        Err(SubmissionError::invalid(field, "must not be empty"))
    } else {
        Ok(value.to_string())
    }
}
