use crate::resource_scheduler;
use crate::types::{ResourceSchedulerRecord, ResourceType};
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_emr::Client as EmrClient;
use aws_sdk_sagemaker::error::ProvideErrorMetadata;
use aws_sdk_sagemaker::Client as SageMakerClient;
use lambda_http::Error;

const SECONDS_PER_DAY: i64 = 86_400;

/// What the sweep does with a past-due scheduler record.
#[derive(Debug, PartialEq, Eq)]
pub enum SweepAction {
    /// Disable termination protection, terminate, drop the record.
    TerminateCluster,
    /// Delete the endpoint, drop the record.
    DeleteEndpoint,
    /// Stop the notebook and reschedule the record for the same time
    /// tomorrow; notebooks recur daily rather than terminating.
    StopNotebook { next_stop: i64 },
}

impl SweepAction {
    pub fn removes_record(&self) -> bool {
        !matches!(self, SweepAction::StopNotebook { .. })
    }
}

/// Decide the action for a past-due record. A non-schedulable type in the
/// scheduler table is a deployment misconfiguration and fails the sweep.
pub fn plan_action(record: &ResourceSchedulerRecord, now: i64) -> Result<SweepAction, String> {
    match record.resource_type {
        ResourceType::EmrCluster => Ok(SweepAction::TerminateCluster),
        ResourceType::Endpoint => Ok(SweepAction::DeleteEndpoint),
        ResourceType::NotebookInstance => {
            // Keep the configured time of day; skip forward whole days until
            // the next stop is in the future.
            let mut next_stop = record.termination_time;
            while next_stop <= now {
                next_stop += SECONDS_PER_DAY;
            }
            Ok(SweepAction::StopNotebook { next_stop })
        }
        other => Err(format!(
            "Resource type '{}' must never appear in the scheduler table",
            other
        )),
    }
}

/// Stop codes SageMaker returns when a notebook is already stopped or gone.
fn notebook_stop_is_benign(code: Option<&str>) -> bool {
    matches!(
        code,
        Some("ValidationException") | Some("ResourceNotFound") | Some("ResourceNotFoundException")
    )
}

async fn terminate_cluster(emr: &EmrClient, cluster_id: &str) -> Result<(), Error> {
    emr.set_termination_protection()
        .job_flow_ids(cluster_id)
        .termination_protected(false)
        .send()
        .await?;
    emr.terminate_job_flows()
        .job_flow_ids(cluster_id)
        .send()
        .await?;
    Ok(())
}

async fn stop_notebook(sagemaker: &SageMakerClient, name: &str) -> Result<(), Error> {
    match sagemaker
        .stop_notebook_instance()
        .notebook_instance_name(name)
        .send()
        .await
    {
        Ok(_) => Ok(()),
        Err(e) if notebook_stop_is_benign(e.code()) => {
            tracing::info!("Notebook {} already stopped or deleted, rescheduling anyway", name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Run one sweep over every past-due scheduler record.
///
/// Per-record failures are logged and skipped so one stuck resource cannot
/// stall the rest of the batch. Returns the number of records handled.
pub async fn run_sweep(
    dynamo: &DynamoClient,
    sagemaker: &SageMakerClient,
    emr: &EmrClient,
    scheduler_table: &str,
    now: i64,
) -> Result<usize, Error> {
    let past_due = resource_scheduler::scan_past_due(dynamo, scheduler_table, now).await?;
    tracing::info!("Sweep found {} past-due resource(s)", past_due.len());

    let mut handled = 0;
    for record in &past_due {
        let action = plan_action(record, now).map_err(Error::from)?;
        let result = match &action {
            SweepAction::TerminateCluster => terminate_cluster(emr, &record.resource_id).await,
            SweepAction::DeleteEndpoint => sagemaker
                .delete_endpoint()
                .endpoint_name(&record.resource_id)
                .send()
                .await
                .map(|_| ())
                .map_err(Error::from),
            SweepAction::StopNotebook { .. } => {
                stop_notebook(sagemaker, &record.resource_id).await
            }
        };

        if let Err(e) = result {
            tracing::error!(
                "Sweep failed for {} {}: {}",
                record.resource_type,
                record.resource_id,
                e
            );
            continue;
        }

        let bookkeeping = match action {
            SweepAction::StopNotebook { next_stop } => {
                resource_scheduler::update_termination_time(
                    dynamo,
                    scheduler_table,
                    &record.resource_id,
                    record.resource_type,
                    next_stop,
                )
                .await
            }
            _ => {
                resource_scheduler::delete_schedule(
                    dynamo,
                    scheduler_table,
                    &record.resource_id,
                    record.resource_type,
                )
                .await
            }
        };
        if let Err(e) = bookkeeping {
            tracing::error!(
                "Scheduler bookkeeping failed for {} {}: {}",
                record.resource_type,
                record.resource_id,
                e
            );
            continue;
        }
        handled += 1;
    }
    Ok(handled)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(resource_type: ResourceType, termination_time: i64) -> ResourceSchedulerRecord {
        ResourceSchedulerRecord {
            resource_id: "res-1".to_string(),
            resource_type,
            termination_time,
            project: "proj".to_string(),
        }
    }

    #[test]
    fn emr_and_endpoints_drop_their_record() {
        let now = 1_700_000_000;
        let emr = plan_action(&record(ResourceType::EmrCluster, now - 60), now).unwrap();
        assert_eq!(emr, SweepAction::TerminateCluster);
        assert!(emr.removes_record());

        let endpoint = plan_action(&record(ResourceType::Endpoint, now - 60), now).unwrap();
        assert_eq!(endpoint, SweepAction::DeleteEndpoint);
        assert!(endpoint.removes_record());
    }

    #[test]
    fn notebooks_reschedule_for_the_next_day() {
        let now = 1_700_000_000;
        let scheduled = now - 3600;
        let action = plan_action(&record(ResourceType::NotebookInstance, scheduled), now).unwrap();
        assert!(!action.removes_record());
        match action {
            SweepAction::StopNotebook { next_stop } => {
                assert_eq!(next_stop, scheduled + SECONDS_PER_DAY);
                assert!(next_stop > now);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn stale_notebook_schedule_skips_to_a_future_stop() {
        let now = 1_700_000_000;
        // missed for a week, e.g. the sweep was disabled
        let scheduled = now - 7 * SECONDS_PER_DAY - 120;
        let action = plan_action(&record(ResourceType::NotebookInstance, scheduled), now).unwrap();
        match action {
            SweepAction::StopNotebook { next_stop } => {
                assert!(next_stop > now);
                assert_eq!((next_stop - scheduled) % SECONDS_PER_DAY, 0);
                assert!(next_stop - now <= SECONDS_PER_DAY);
            }
            other => panic!("unexpected action {:?}", other),
        }
    }

    #[test]
    fn unschedulable_types_fail_the_sweep() {
        let now = 1_700_000_000;
        let err = plan_action(&record(ResourceType::TrainingJob, now - 60), now).unwrap_err();
        assert!(err.contains("training-job"));
    }

    #[test]
    fn benign_notebook_stop_errors_are_recognized() {
        assert!(notebook_stop_is_benign(Some("ValidationException")));
        assert!(notebook_stop_is_benign(Some("ResourceNotFound")));
        assert!(!notebook_stop_is_benign(Some("ThrottlingException")));
        assert!(!notebook_stop_is_benign(None));
    }
}
