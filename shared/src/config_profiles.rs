use crate::iam;
use crate::iam::IamContext;
use crate::response;
use crate::store;
use crate::types::{ConfigProfileRecord, CreateConfigProfileRequest, UpdateConfigProfileRequest};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_iam::Client as IamClient;
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::HashMap;

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Option<ConfigProfileRecord> {
    let lists: HashMap<String, Vec<String>> =
        serde_json::from_str(&store::get_s(item, "instanceTypes")).ok()?;
    Some(ConfigProfileRecord {
        name: store::get_s(item, "profileName"),
        version_id: store::get_n(item, "versionId"),
        created_by: store::get_s(item, "createdBy"),
        created_at: store::get_s(item, "createdAt"),
        notebook_instance_types: lists.get("notebook").cloned().unwrap_or_default(),
        training_instance_types: lists.get("training").cloned().unwrap_or_default(),
        endpoint_instance_types: lists.get("endpoint").cloned().unwrap_or_default(),
    })
}

async fn put_version(
    client: &DynamoClient,
    table_name: &str,
    record: &ConfigProfileRecord,
) -> Result<Response<Body>, Error> {
    let lists = serde_json::json!({
        "notebook": record.notebook_instance_types,
        "training": record.training_instance_types,
        "endpoint": record.endpoint_instance_types,
    });
    let put = client
        .put_item()
        .table_name(table_name)
        .item("profileName", AttributeValue::S(record.name.clone()))
        .item("versionId", AttributeValue::N(record.version_id.to_string()))
        .item("createdBy", AttributeValue::S(record.created_by.clone()))
        .item("createdAt", AttributeValue::S(record.created_at.clone()))
        .item("instanceTypes", AttributeValue::S(lists.to_string()))
        .condition_expression("attribute_not_exists(versionId)")
        .send()
        .await;

    match put {
        Ok(_) => response::created(record),
        Err(e) if response::is_conditional_check_failed(&e) => response::error(
            StatusCode::TOO_MANY_REQUESTS,
            "The profile was updated by another request. Refresh and try again.",
        ),
        Err(e) => response::aws_error(&e),
    }
}

/// Latest version of a profile, if it exists.
pub async fn get_latest(
    client: &DynamoClient,
    table_name: &str,
    name: &str,
) -> Result<Option<ConfigProfileRecord>, Error> {
    let resp = client
        .query()
        .table_name(table_name)
        .key_condition_expression("profileName = :n")
        .expression_attribute_values(":n", AttributeValue::S(name.to_string()))
        .scan_index_forward(false)
        .limit(1)
        .send()
        .await?;
    Ok(resp.items().first().and_then(record_from_item))
}

// ---------- HTTP handlers ----------

/// POST /config-profiles
pub async fn create_profile(
    client: &DynamoClient,
    table_name: &str,
    user: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateConfigProfileRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Profile parse error: {}", e);
            return response::missing_parameter("name");
        }
    };
    if get_latest(client, table_name, &req.name).await?.is_some() {
        return response::error(
            StatusCode::CONFLICT,
            &format!("Config profile '{}' already exists", req.name),
        );
    }
    let record = ConfigProfileRecord {
        name: req.name,
        version_id: 1,
        created_by: user.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        notebook_instance_types: req.notebook_instance_types,
        training_instance_types: req.training_instance_types,
        endpoint_instance_types: req.endpoint_instance_types,
    };
    put_version(client, table_name, &record).await
}

/// GET /config-profiles - latest version of every profile
pub async fn list_profiles(
    client: &DynamoClient,
    table_name: &str,
) -> Result<Response<Body>, Error> {
    let mut latest: HashMap<String, ConfigProfileRecord> = HashMap::new();
    let mut start_key: Option<HashMap<String, AttributeValue>> = None;
    loop {
        let mut req = client.scan().table_name(table_name);
        if let Some(key) = start_key.take() {
            req = req.set_exclusive_start_key(Some(key));
        }
        let resp = req.send().await?;
        for record in resp.items().iter().filter_map(record_from_item) {
            match latest.get(&record.name) {
                Some(existing) if existing.version_id >= record.version_id => {}
                _ => {
                    latest.insert(record.name.clone(), record);
                }
            }
        }
        match resp.last_evaluated_key() {
            Some(key) if !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }
    let mut profiles: Vec<_> = latest.into_values().collect();
    profiles.sort_by(|a, b| a.name.cmp(&b.name));
    response::ok(&profiles)
}

/// GET /config-profiles/{name}
pub async fn get_profile(
    client: &DynamoClient,
    table_name: &str,
    name: &str,
) -> Result<Response<Body>, Error> {
    match get_latest(client, table_name, name).await? {
        Some(record) => response::ok(&record),
        None => response::not_found(&format!("Config profile '{}' not found", name)),
    }
}

/// PUT /config-profiles/{name} - append a new version (429 on version race)
pub async fn update_profile(
    client: &DynamoClient,
    table_name: &str,
    name: &str,
    user: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: UpdateConfigProfileRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Profile parse error: {}", e);
            return response::missing_parameter("version_id");
        }
    };
    let current = match get_latest(client, table_name, name).await? {
        Some(record) => record,
        None => return response::not_found(&format!("Config profile '{}' not found", name)),
    };
    let record = ConfigProfileRecord {
        name: name.to_string(),
        version_id: req.version_id + 1,
        created_by: user.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        notebook_instance_types: req
            .notebook_instance_types
            .unwrap_or(current.notebook_instance_types),
        training_instance_types: req
            .training_instance_types
            .unwrap_or(current.training_instance_types),
        endpoint_instance_types: req
            .endpoint_instance_types
            .unwrap_or(current.endpoint_instance_types),
    };
    put_version(client, table_name, &record).await
}

fn version_ids(items: &[HashMap<String, AttributeValue>]) -> Vec<i64> {
    items.iter().map(|item| store::get_n(item, "versionId")).collect()
}

/// DELETE /config-profiles/{name} - removes every version
pub async fn delete_profile(
    client: &DynamoClient,
    table_name: &str,
    name: &str,
) -> Result<Response<Body>, Error> {
    let mut versions = Vec::new();
    let mut start_key: Option<HashMap<String, AttributeValue>> = None;
    loop {
        let mut req = client
            .query()
            .table_name(table_name)
            .key_condition_expression("profileName = :n")
            .expression_attribute_values(":n", AttributeValue::S(name.to_string()));
        if let Some(key) = start_key.take() {
            req = req.set_exclusive_start_key(Some(key));
        }
        let resp = req.send().await?;
        versions.extend(version_ids(resp.items()));
        match resp.last_evaluated_key() {
            Some(key) if !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }
    if versions.is_empty() {
        return response::not_found(&format!("Config profile '{}' not found", name));
    }
    for version_id in versions {
        client
            .delete_item()
            .table_name(table_name)
            .key("profileName", AttributeValue::S(name.to_string()))
            .key("versionId", AttributeValue::N(version_id.to_string()))
            .send()
            .await?;
    }
    response::message(StatusCode::OK, "Config profile deleted")
}

/// PUT /projects/{name}/config-profile - constrain a project to a profile's
/// instance types by rotating its constraint policy.
pub async fn apply_profile_to_project(
    dynamo_client: &DynamoClient,
    iam_client: &IamClient,
    table_name: &str,
    project: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    #[derive(serde::Deserialize)]
    struct ApplyProfileRequest {
        profile: String,
    }
    let req: ApplyProfileRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => return response::missing_parameter("profile"),
    };
    let profile = match get_latest(dynamo_client, table_name, &req.profile).await? {
        Some(record) => record,
        None => {
            return response::not_found(&format!("Config profile '{}' not found", req.profile))
        }
    };

    let statements = iam::instance_constraint_statements(
        &profile.notebook_instance_types,
        &profile.training_instance_types,
        &profile.endpoint_instance_types,
    );
    let ctx = IamContext::from_env();
    if statements.is_empty() {
        return response::bad_request(&format!(
            "Config profile '{}' has no instance type constraints",
            req.profile
        ));
    }
    match iam::create_instance_constraint_policy_version(
        iam_client,
        &ctx.constraint_policy_arn(project),
        &statements,
    )
    .await
    {
        Ok(()) => response::message(
            StatusCode::OK,
            &format!("Applied config profile '{}' to {}", req.profile, project),
        ),
        Err(e) => {
            tracing::error!("Constraint rotation failed for {}: {}", project, e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ids_are_collected_across_every_item() {
        let items: Vec<HashMap<String, AttributeValue>> = (1..=3)
            .map(|v| {
                let mut item = HashMap::new();
                item.insert(
                    "profileName".to_string(),
                    AttributeValue::S("gpu-heavy".to_string()),
                );
                item.insert("versionId".to_string(), AttributeValue::N(v.to_string()));
                item
            })
            .collect();
        assert_eq!(version_ids(&items), vec![1, 2, 3]);
        assert!(version_ids(&[]).is_empty());
    }
}
