use crate::iam::IamContext;
use crate::policy;
use crate::resource_scheduler;
use crate::response;
use crate::store;
use crate::types::{AppConfiguration, AppConfigurationRecord, UpdateAppConfigRequest};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_iam::Client as IamClient;
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::HashMap;

pub const GLOBAL_SCOPE: &str = "global";

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Option<AppConfigurationRecord> {
    let configuration: AppConfiguration =
        serde_json::from_str(&store::get_s(item, "configuration")).ok()?;
    Some(AppConfigurationRecord {
        config_scope: store::get_s(item, "configScope"),
        version_id: store::get_n(item, "versionId"),
        changed_by: store::get_s(item, "changedBy"),
        change_reason: store::get_s(item, "changeReason"),
        created_at: store::get_s(item, "createdAt"),
        configuration,
    })
}

/// Latest configuration version for a scope, if any has been written.
pub async fn get_latest(
    client: &DynamoClient,
    table_name: &str,
    scope: &str,
) -> Result<Option<AppConfigurationRecord>, Error> {
    let resp = client
        .query()
        .table_name(table_name)
        .key_condition_expression("configScope = :s")
        .expression_attribute_values(":s", AttributeValue::S(scope.to_string()))
        .scan_index_forward(false)
        .limit(1)
        .send()
        .await?;
    Ok(resp.items().first().and_then(record_from_item))
}

// ---------- HTTP handlers ----------

/// GET /app-config - latest global configuration
pub async fn get_app_config(
    client: &DynamoClient,
    table_name: &str,
) -> Result<Response<Body>, Error> {
    match get_latest(client, table_name, GLOBAL_SCOPE).await? {
        Some(record) => response::ok(&record),
        None => {
            // Fresh install: synthesize an all-defaults version 0.
            let record = AppConfigurationRecord {
                config_scope: GLOBAL_SCOPE.to_string(),
                version_id: 0,
                changed_by: "system".to_string(),
                change_reason: "Initial defaults".to_string(),
                created_at: chrono::Utc::now().to_rfc3339(),
                configuration: AppConfiguration::default(),
            };
            response::ok(&record)
        }
    }
}

/// POST /app-config - append a new configuration version
///
/// The request carries the version the caller read; we write version + 1
/// guarded by a does-not-exist condition, so two racing updaters cannot both
/// claim the same slot. The loser gets a 429 and must re-read.
pub async fn update_app_config(
    dynamo_client: &DynamoClient,
    iam_client: &IamClient,
    config_table: &str,
    scheduler_table: &str,
    user: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateAppConfigRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("App config parse error: {}", e);
            return response::missing_parameter("configuration");
        }
    };

    let previous = get_latest(dynamo_client, config_table, GLOBAL_SCOPE).await?;
    let new_version = req.version_id + 1;
    let record = AppConfigurationRecord {
        config_scope: GLOBAL_SCOPE.to_string(),
        version_id: new_version,
        changed_by: user.to_string(),
        change_reason: req.change_reason,
        created_at: chrono::Utc::now().to_rfc3339(),
        configuration: req.configuration,
    };

    let put = dynamo_client
        .put_item()
        .table_name(config_table)
        .item("configScope", AttributeValue::S(record.config_scope.clone()))
        .item("versionId", AttributeValue::N(new_version.to_string()))
        .item("changedBy", AttributeValue::S(record.changed_by.clone()))
        .item(
            "changeReason",
            AttributeValue::S(record.change_reason.clone()),
        )
        .item("createdAt", AttributeValue::S(record.created_at.clone()))
        .item(
            "configuration",
            AttributeValue::S(serde_json::to_string(&record.configuration)?),
        )
        .condition_expression("attribute_not_exists(versionId)")
        .send()
        .await;

    if let Err(e) = put {
        if response::is_conditional_check_failed(&e) {
            return response::error(
                StatusCode::TOO_MANY_REQUESTS,
                "The configuration was updated by another request. Refresh and try again.",
            );
        }
        return response::aws_error(&e);
    }

    // Service activation changed: rebuild the shared deny policy and pull the
    // schedules of any newly denied resource types forward to now.
    let services_changed = previous
        .as_ref()
        .map(|p| p.configuration.enabled_services != record.configuration.enabled_services)
        .unwrap_or(true);
    if services_changed {
        let ctx = IamContext::from_env();
        let suspend = policy::update_activated_services_policy(
            iam_client,
            &ctx.services_deny_policy_arn(),
            &record.configuration,
        )
        .await?;
        let now = chrono::Utc::now().timestamp();
        for resource_type in suspend {
            let count = resource_scheduler::suspend_resources_of_type(
                dynamo_client,
                scheduler_table,
                resource_type,
                now,
            )
            .await?;
            tracing::info!("Suspended {} in-flight {} resource(s)", count, resource_type);
        }
    }

    response::ok(&record)
}
