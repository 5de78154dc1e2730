use crate::response;
use crate::store;
use crate::types::{PagedRecords, ResourceMetadataRecord, ResourceType, SyncResourceRequest};
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::HashMap;
use std::str::FromStr;

const PROJECT_RESOURCES_INDEX: &str = "ProjectResources";
const USER_RESOURCES_INDEX: &str = "UserResources";
const DEFAULT_PAGE_SIZE: i32 = 100;

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Option<ResourceMetadataRecord> {
    let resource_type = ResourceType::from_str(&store::get_s(item, "resourceType")).ok()?;
    let metadata = serde_json::from_str(&store::get_s(item, "metadata"))
        .unwrap_or(serde_json::Value::Null);
    Some(ResourceMetadataRecord {
        resource_id: store::get_s(item, "resourceId"),
        resource_type,
        user: store::get_s(item, "user"),
        project: store::get_s(item, "project"),
        metadata,
    })
}

/// An update guarded by `attribute_exists` fails its conditional check
/// exactly when this is the first observation of the resource; only that
/// failure falls through to a create.
fn is_first_observation(code: Option<&str>) -> bool {
    code == Some("ConditionalCheckFailedException")
}

/// Update-or-create a metadata record.
///
/// First attempts a conditional update against an existing row; when the row
/// does not exist yet (first observation of the resource) the conditional
/// check fails and we fall back to a create.
pub async fn upsert_record(
    client: &DynamoClient,
    table_name: &str,
    record: &ResourceMetadataRecord,
) -> Result<(), Error> {
    let metadata_json = record.metadata.to_string();
    let update = client
        .update_item()
        .table_name(table_name)
        .key("resourceId", AttributeValue::S(record.resource_id.clone()))
        .key(
            "resourceType",
            AttributeValue::S(record.resource_type.to_string()),
        )
        .condition_expression("attribute_exists(resourceId)")
        .update_expression("SET #u = :u, project = :p, metadata = :m")
        .expression_attribute_names("#u", "user")
        .expression_attribute_values(":u", AttributeValue::S(record.user.clone()))
        .expression_attribute_values(":p", AttributeValue::S(record.project.clone()))
        .expression_attribute_values(":m", AttributeValue::S(metadata_json.clone()))
        .send()
        .await;

    match update {
        Ok(_) => Ok(()),
        Err(e) if is_first_observation(e.code()) => {
            client
                .put_item()
                .table_name(table_name)
                .item("resourceId", AttributeValue::S(record.resource_id.clone()))
                .item(
                    "resourceType",
                    AttributeValue::S(record.resource_type.to_string()),
                )
                .item("user", AttributeValue::S(record.user.clone()))
                .item("project", AttributeValue::S(record.project.clone()))
                .item("metadata", AttributeValue::S(metadata_json))
                .send()
                .await?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn get_record(
    client: &DynamoClient,
    table_name: &str,
    resource_id: &str,
    resource_type: ResourceType,
) -> Result<Option<ResourceMetadataRecord>, Error> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("resourceId", AttributeValue::S(resource_id.to_string()))
        .key(
            "resourceType",
            AttributeValue::S(resource_type.to_string()),
        )
        .send()
        .await?;
    Ok(result.item().and_then(record_from_item))
}

pub async fn delete_record(
    client: &DynamoClient,
    table_name: &str,
    resource_id: &str,
    resource_type: ResourceType,
) -> Result<(), Error> {
    client
        .delete_item()
        .table_name(table_name)
        .key("resourceId", AttributeValue::S(resource_id.to_string()))
        .key(
            "resourceType",
            AttributeValue::S(resource_type.to_string()),
        )
        .send()
        .await?;
    Ok(())
}

async fn query_index(
    client: &DynamoClient,
    table_name: &str,
    index_name: &str,
    key_attr: &str,
    key_value: &str,
    resource_type: ResourceType,
    limit: i32,
    next_token: Option<&str>,
) -> Result<PagedRecords, Error> {
    let mut req = client
        .query()
        .table_name(table_name)
        .index_name(index_name)
        .key_condition_expression("#k = :k AND resourceType = :rt")
        .expression_attribute_names("#k", key_attr)
        .expression_attribute_values(":k", AttributeValue::S(key_value.to_string()))
        .expression_attribute_values(":rt", AttributeValue::S(resource_type.to_string()))
        .limit(limit);
    if let Some(token) = next_token {
        let start_key = store::decode_pagination_token(token)
            .map_err(|e| Error::from(e.as_str()))?;
        req = req.set_exclusive_start_key(Some(start_key));
    }

    let resp = req.send().await?;
    let records = resp
        .items()
        .iter()
        .filter_map(record_from_item)
        .collect::<Vec<_>>();
    let next_token = resp
        .last_evaluated_key()
        .and_then(store::encode_pagination_token);
    Ok(PagedRecords {
        records,
        next_token,
    })
}

/// Every metadata row for a project, all types. Used by project deletion.
pub async fn list_project_records(
    client: &DynamoClient,
    table_name: &str,
    project: &str,
) -> Result<Vec<ResourceMetadataRecord>, Error> {
    let mut records = Vec::new();
    let mut start_key: Option<HashMap<String, AttributeValue>> = None;
    loop {
        let mut req = client
            .query()
            .table_name(table_name)
            .index_name(PROJECT_RESOURCES_INDEX)
            .key_condition_expression("#p = :p")
            .expression_attribute_names("#p", "project")
            .expression_attribute_values(":p", AttributeValue::S(project.to_string()));
        if let Some(key) = start_key.take() {
            req = req.set_exclusive_start_key(Some(key));
        }
        let resp = req.send().await?;
        records.extend(resp.items().iter().filter_map(record_from_item));
        match resp.last_evaluated_key() {
            Some(key) if !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }
    Ok(records)
}

// ---------- HTTP handlers ----------

fn parse_listing_params(
    resource_type: &str,
    limit: Option<&str>,
) -> Result<(ResourceType, i32), String> {
    let resource_type = ResourceType::from_str(resource_type)?;
    let limit = match limit {
        Some(raw) => raw
            .parse::<i32>()
            .ok()
            .filter(|n| (1..=1000).contains(n))
            .ok_or_else(|| format!("Invalid page size '{}'", raw))?,
        None => DEFAULT_PAGE_SIZE,
    };
    Ok((resource_type, limit))
}

/// GET /projects/{name}/resources/{type}
pub async fn list_for_project(
    client: &DynamoClient,
    table_name: &str,
    project: &str,
    resource_type: &str,
    limit: Option<&str>,
    next_token: Option<&str>,
) -> Result<Response<Body>, Error> {
    let (resource_type, limit) = match parse_listing_params(resource_type, limit) {
        Ok(v) => v,
        Err(e) => return response::bad_request(&e),
    };
    let page = query_index(
        client,
        table_name,
        PROJECT_RESOURCES_INDEX,
        "project",
        project,
        resource_type,
        limit,
        next_token,
    )
    .await?;
    response::ok(&page)
}

/// GET /users/{user}/resources/{type}
pub async fn list_for_user(
    client: &DynamoClient,
    table_name: &str,
    user: &str,
    resource_type: &str,
    limit: Option<&str>,
    next_token: Option<&str>,
) -> Result<Response<Body>, Error> {
    let (resource_type, limit) = match parse_listing_params(resource_type, limit) {
        Ok(v) => v,
        Err(e) => return response::bad_request(&e),
    };
    let page = query_index(
        client,
        table_name,
        USER_RESOURCES_INDEX,
        "user",
        user,
        resource_type,
        limit,
        next_token,
    )
    .await?;
    response::ok(&page)
}

/// PUT /resources/{type}/{id} - sync a resource's cached AWS-side state
pub async fn sync_record(
    client: &DynamoClient,
    table_name: &str,
    resource_type: &str,
    resource_id: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let resource_type = match ResourceType::from_str(resource_type) {
        Ok(rt) => rt,
        Err(e) => return response::bad_request(&e),
    };
    let req: SyncResourceRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Resource sync parse error: {}", e);
            return response::missing_parameter("user");
        }
    };
    let record = ResourceMetadataRecord {
        resource_id: resource_id.to_string(),
        resource_type,
        user: req.user,
        project: req.project,
        metadata: req.metadata,
    };
    upsert_record(client, table_name, &record).await?;
    response::ok(&record)
}

/// GET /resources/{type}/{id} - the cached metadata row
pub async fn get_resource(
    client: &DynamoClient,
    table_name: &str,
    resource_type: &str,
    resource_id: &str,
) -> Result<Response<Body>, Error> {
    let resource_type = match ResourceType::from_str(resource_type) {
        Ok(rt) => rt,
        Err(e) => return response::bad_request(&e),
    };
    match get_record(client, table_name, resource_id, resource_type).await? {
        Some(record) => response::ok(&record),
        None => response::not_found(&format!("Resource '{}' not found", resource_id)),
    }
}

/// DELETE /resources/{type}/{id} - drop the cached metadata row
pub async fn remove_record(
    client: &DynamoClient,
    table_name: &str,
    resource_type: &str,
    resource_id: &str,
) -> Result<Response<Body>, Error> {
    let resource_type = match ResourceType::from_str(resource_type) {
        Ok(rt) => rt,
        Err(e) => return response::bad_request(&e),
    };
    delete_record(client, table_name, resource_id, resource_type).await?;
    response::message(StatusCode::OK, "Resource metadata removed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_falls_back_to_create() {
        // No row yet: the attribute_exists guard fails and a create follows.
        assert!(is_first_observation(Some("ConditionalCheckFailedException")));
    }

    #[test]
    fn existing_rows_update_in_place() {
        // A clean update means the row existed; no create may follow, and
        // unrelated failures must propagate rather than create duplicates.
        assert!(!is_first_observation(None));
        assert!(!is_first_observation(Some("ThrottlingException")));
        assert!(!is_first_observation(Some(
            "ProvisionedThroughputExceededException"
        )));
    }

    #[test]
    fn listing_params_reject_bad_input() {
        assert!(parse_listing_params("notebook-instance", Some("50")).is_ok());
        assert!(parse_listing_params("warp-drive", None).is_err());
        assert!(parse_listing_params("endpoint", Some("0")).is_err());
        assert!(parse_listing_params("endpoint", Some("many")).is_err());
    }
}
