use aws_config::retry::RetryConfig;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_emr::Client as EmrClient;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sagemaker::Client as SageMakerClient;
use lambda_http::{run, service_fn, tracing, Error, Request};
use mlspace_shared::AppState;
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    // Initialize AWS clients once at startup
    let config = aws_config::from_env()
        .retry_config(RetryConfig::standard().with_max_attempts(3))
        .load()
        .await;

    let state = AppState::new(
        DynamoClient::new(&config),
        IamClient::new(&config),
        SageMakerClient::new(&config),
        EmrClient::new(&config),
        S3Client::new(&config),
    );

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state).await }
    }))
    .await
}
