pub mod types;
pub mod response;
pub mod store;
pub mod users;
pub mod projects;
pub mod resource_metadata;
pub mod resource_scheduler;
pub mod app_config;
pub mod config_profiles;
pub mod iam;
pub mod policy;
pub mod sweep;
pub mod compute;

use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_emr::Client as EmrClient;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_s3::Client as S3Client;
use aws_sdk_sagemaker::Client as SageMakerClient;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub dynamo_client: DynamoClient,
    pub iam_client: IamClient,
    pub sagemaker_client: SageMakerClient,
    pub emr_client: EmrClient,
    pub s3_client: S3Client,
}

impl AppState {
    pub fn new(
        dynamo_client: DynamoClient,
        iam_client: IamClient,
        sagemaker_client: SageMakerClient,
        emr_client: EmrClient,
        s3_client: S3Client,
    ) -> Arc<Self> {
        Arc::new(Self {
            dynamo_client,
            iam_client,
            sagemaker_client,
            emr_client,
            s3_client,
        })
    }
}
