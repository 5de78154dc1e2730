use crate::response;
use crate::store;
use crate::types::{ResourceSchedulerRecord, ResourceType, SetScheduleRequest};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::HashMap;
use std::str::FromStr;

fn record_from_item(item: &HashMap<String, AttributeValue>) -> Option<ResourceSchedulerRecord> {
    let resource_type = ResourceType::from_str(&store::get_s(item, "resourceType")).ok()?;
    Some(ResourceSchedulerRecord {
        resource_id: store::get_s(item, "resourceId"),
        resource_type,
        termination_time: store::get_n(item, "terminationTime"),
        project: store::get_s(item, "project"),
    })
}

pub async fn put_schedule(
    client: &DynamoClient,
    table_name: &str,
    record: &ResourceSchedulerRecord,
) -> Result<(), Error> {
    client
        .put_item()
        .table_name(table_name)
        .item(
            "resourceId",
            AttributeValue::S(record.resource_id.clone()),
        )
        .item(
            "resourceType",
            AttributeValue::S(record.resource_type.to_string()),
        )
        .item(
            "terminationTime",
            AttributeValue::N(record.termination_time.to_string()),
        )
        .item("project", AttributeValue::S(record.project.clone()))
        .send()
        .await?;
    Ok(())
}

pub async fn get_schedule(
    client: &DynamoClient,
    table_name: &str,
    resource_id: &str,
    resource_type: ResourceType,
) -> Result<Option<ResourceSchedulerRecord>, Error> {
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

pub async fn delete_schedule(
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

pub async fn update_termination_time(
    client: &DynamoClient,
    table_name: &str,
    resource_id: &str,
    resource_type: ResourceType,
    termination_time: i64,
) -> Result<(), Error> {
    client
        .update_item()
        .table_name(table_name)
        .key("resourceId", AttributeValue::S(resource_id.to_string()))
        .key(
            "resourceType",
            AttributeValue::S(resource_type.to_string()),
        )
        .update_expression("SET terminationTime = :t")
        .expression_attribute_values(":t", AttributeValue::N(termination_time.to_string()))
        .send()
        .await?;
    Ok(())
}

/// All records whose termination time has passed. Paginates the scan.
pub async fn scan_past_due(
    client: &DynamoClient,
    table_name: &str,
    now: i64,
) -> Result<Vec<ResourceSchedulerRecord>, Error> {
    let mut records = Vec::new();
    let mut start_key: Option<HashMap<String, AttributeValue>> = None;
    loop {
        let mut req = client
            .scan()
            .table_name(table_name)
            .filter_expression("terminationTime < :now")
            .expression_attribute_values(":now", AttributeValue::N(now.to_string()));
        if let Some(key) = start_key.take() {
            req = req.set_exclusive_start_key(Some(key));
        }
        let resp = req.send().await?;
        for item in resp.items() {
            match record_from_item(item) {
                Some(record) => records.push(record),
                None => tracing::warn!(
                    "Skipping malformed scheduler row: {:?}",
                    item.get("resourceId")
                ),
            }
        }
        match resp.last_evaluated_key() {
            Some(key) if !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }
    Ok(records)
}

/// Pull every schedule of the given type forward to `now` so the next sweep
/// stops the resource. Used when a service is deactivated platform-wide.
pub async fn suspend_resources_of_type(
    client: &DynamoClient,
    table_name: &str,
    resource_type: ResourceType,
    now: i64,
) -> Result<usize, Error> {
    let mut suspended = 0;
    let mut start_key: Option<HashMap<String, AttributeValue>> = None;
    loop {
        let mut req = client
            .scan()
            .table_name(table_name)
            .filter_expression("resourceType = :rt")
            .expression_attribute_values(
                ":rt",
                AttributeValue::S(resource_type.to_string()),
            );
        if let Some(key) = start_key.take() {
            req = req.set_exclusive_start_key(Some(key));
        }
        let resp = req.send().await?;
        for item in resp.items() {
            let resource_id = store::get_s(item, "resourceId");
            update_termination_time(client, table_name, &resource_id, resource_type, now).await?;
            suspended += 1;
        }
        match resp.last_evaluated_key() {
            Some(key) if !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }
    Ok(suspended)
}

/// Every scheduler row belonging to a project. Used by project deletion.
pub async fn list_project_schedules(
    client: &DynamoClient,
    table_name: &str,
    project: &str,
) -> Result<Vec<ResourceSchedulerRecord>, Error> {
    let mut records = Vec::new();
    let mut start_key: Option<HashMap<String, AttributeValue>> = None;
    loop {
        let mut req = client
            .scan()
            .table_name(table_name)
            .filter_expression("#p = :p")
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

/// PUT /resources/{type}/{id}/schedule - set or change a termination time
pub async fn set_schedule(
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
    if !resource_type.is_schedulable() {
        return response::bad_request(&format!(
            "Resource type '{}' does not support termination schedules",
            resource_type
        ));
    }
    let req: SetScheduleRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Schedule parse error: {}", e);
            return response::missing_parameter("termination_time");
        }
    };
    if req.termination_time <= chrono::Utc::now().timestamp() {
        return response::bad_request("termination_time must be in the future");
    }

    let record = ResourceSchedulerRecord {
        resource_id: resource_id.to_string(),
        resource_type,
        termination_time: req.termination_time,
        project: req.project,
    };
    match put_schedule(client, table_name, &record).await {
        Ok(()) => response::ok(&record),
        Err(e) => {
            tracing::error!("Failed to store schedule for {}: {}", resource_id, e);
            Err(e)
        }
    }
}

/// GET /resources/{type}/{id}/schedule - the resource's pending stop time
pub async fn describe_schedule(
    client: &DynamoClient,
    table_name: &str,
    resource_type: &str,
    resource_id: &str,
) -> Result<Response<Body>, Error> {
    let resource_type = match ResourceType::from_str(resource_type) {
        Ok(rt) => rt,
        Err(e) => return response::bad_request(&e),
    };
    match get_schedule(client, table_name, resource_id, resource_type).await? {
        Some(record) => response::ok(&record),
        None => response::not_found(&format!("No schedule for resource '{}'", resource_id)),
    }
}

/// DELETE /resources/{type}/{id}/schedule - disable TTL for a resource
pub async fn remove_schedule(
    client: &DynamoClient,
    table_name: &str,
    resource_type: &str,
    resource_id: &str,
) -> Result<Response<Body>, Error> {
    let resource_type = match ResourceType::from_str(resource_type) {
        Ok(rt) => rt,
        Err(e) => return response::bad_request(&e),
    };
    delete_schedule(client, table_name, resource_id, resource_type).await?;
    response::message(StatusCode::OK, "Schedule removed")
}
