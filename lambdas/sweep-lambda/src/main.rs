use aws_config::retry::RetryConfig;
use aws_lambda_events::event::cloudwatch_events::CloudWatchEvent;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_emr::Client as EmrClient;
use aws_sdk_sagemaker::Client as SageMakerClient;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use mlspace_shared::sweep;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false)
        .without_time()
        .init();

    run(service_fn(function_handler)).await
}

/// EventBridge fires this on a fixed schedule; the event payload itself
/// carries nothing the sweep needs.
async fn function_handler(event: LambdaEvent<CloudWatchEvent>) -> Result<(), Error> {
    tracing::info!(
        "Termination sweep triggered at {:?}",
        event.payload.time
    );

    let config = aws_config::from_env()
        .retry_config(RetryConfig::standard().with_max_attempts(3))
        .load()
        .await;
    let dynamo_client = DynamoClient::new(&config);
    let sagemaker_client = SageMakerClient::new(&config);
    let emr_client = EmrClient::new(&config);

    let scheduler_table = std::env::var("RESOURCE_SCHEDULE_TABLE")
        .unwrap_or_else(|_| "mlspace-resource-schedule".to_string());
    let now = chrono::Utc::now().timestamp();

    let handled = sweep::run_sweep(
        &dynamo_client,
        &sagemaker_client,
        &emr_client,
        &scheduler_table,
        now,
    )
    .await?;
    tracing::info!("Termination sweep handled {} resource(s)", handled);
    Ok(())
}
