use crate::app_config;
use crate::iam;
use crate::iam::IamContext;
use crate::resource_metadata;
use crate::resource_scheduler;
use crate::response;
use crate::store;
use crate::types::{AddProjectUserRequest, CreateProjectRequest, Project, ProjectUser};
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_sdk_iam::Client as IamClient;
use aws_sdk_s3::Client as S3Client;
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde_json::json;
use std::collections::HashMap;
use std::env;

pub struct ProjectTables {
    pub projects: String,
    pub project_users: String,
    pub resource_metadata: String,
    pub resource_scheduler: String,
    pub app_config: String,
}

impl ProjectTables {
    pub fn from_env() -> Self {
        Self {
            projects: env::var("PROJECTS_TABLE").unwrap_or_else(|_| "mlspace-projects".to_string()),
            project_users: env::var("PROJECT_USERS_TABLE")
                .unwrap_or_else(|_| "mlspace-project-users".to_string()),
            resource_metadata: env::var("RESOURCE_METADATA_TABLE")
                .unwrap_or_else(|_| "mlspace-resource-metadata".to_string()),
            resource_scheduler: env::var("RESOURCE_SCHEDULE_TABLE")
                .unwrap_or_else(|_| "mlspace-resource-schedule".to_string()),
            app_config: env::var("APP_CONFIG_TABLE")
                .unwrap_or_else(|_| "mlspace-app-config".to_string()),
        }
    }
}

fn project_from_item(item: &HashMap<String, AttributeValue>) -> Project {
    Project {
        name: store::get_s(item, "name"),
        description: store::get_opt_s(item, "description"),
        suspended: store::get_bool(item, "suspended"),
        created_by: store::get_s(item, "createdBy"),
        created_at: store::get_s(item, "createdAt"),
    }
}

fn member_from_item(item: &HashMap<String, AttributeValue>) -> ProjectUser {
    ProjectUser {
        project: store::get_s(item, "project"),
        user: store::get_s(item, "username"),
        role: store::get_s(item, "role"),
    }
}

/// True when removing `user` would leave the project without an owner.
pub fn removal_leaves_no_owner(members: &[ProjectUser], user: &str) -> bool {
    !members
        .iter()
        .any(|m| m.role == "owner" && m.user != user)
}

/// Storage access statements stamped into each project's IAM policy.
fn project_policy_statements(bucket: &str, project: &str) -> Vec<serde_json::Value> {
    vec![
        json!({
            "Effect": "Allow",
            "Action": ["s3:GetObject", "s3:PutObject", "s3:DeleteObject"],
            "Resource": format!("arn:aws:s3:::{}/project/{}/*", bucket, project),
        }),
        json!({
            "Effect": "Allow",
            "Action": "s3:ListBucket",
            "Resource": format!("arn:aws:s3:::{}", bucket),
            "Condition": {
                "StringLike": { "s3:prefix": format!("project/{}/*", project) }
            }
        }),
    ]
}

async fn list_members(
    client: &DynamoClient,
    table_name: &str,
    project: &str,
) -> Result<Vec<ProjectUser>, Error> {
    let resp = client
        .query()
        .table_name(table_name)
        .key_condition_expression("#p = :p")
        .expression_attribute_names("#p", "project")
        .expression_attribute_values(":p", AttributeValue::S(project.to_string()))
        .send()
        .await?;
    Ok(resp.items().iter().map(member_from_item).collect())
}

async fn iam_roles_enabled(client: &DynamoClient, config_table: &str) -> Result<bool, Error> {
    Ok(app_config::get_latest(client, config_table, app_config::GLOBAL_SCOPE)
        .await?
        .map(|record| record.configuration.manage_iam_roles)
        .unwrap_or(false))
}

async fn put_membership(
    client: &DynamoClient,
    table_name: &str,
    member: &ProjectUser,
) -> Result<(), Error> {
    client
        .put_item()
        .table_name(table_name)
        .item("project", AttributeValue::S(member.project.clone()))
        .item("username", AttributeValue::S(member.user.clone()))
        .item("role", AttributeValue::S(member.role.clone()))
        .send()
        .await?;
    Ok(())
}

async fn delete_project_data_prefix(
    s3_client: &S3Client,
    bucket: &str,
    project: &str,
) -> Result<(), Error> {
    let prefix = format!("project/{}/", project);

    let mut continuation: Option<String> = None;
    loop {
        let mut req = s3_client.list_objects_v2().bucket(bucket).prefix(&prefix);
        if let Some(token) = continuation.as_ref() {
            req = req.continuation_token(token);
        }
        let resp = req.send().await.map_err(|e| {
            tracing::error!("S3 list_objects_v2 failed for prefix {}: {}", prefix, e);
            Error::from(format!("S3 list failed: {}", e))
        })?;

        let objects: Vec<_> = resp
            .contents()
            .iter()
            .filter_map(|o| o.key())
            .filter_map(|k| {
                aws_sdk_s3::types::ObjectIdentifier::builder()
                    .key(k)
                    .build()
                    .ok()
            })
            .collect();
        if !objects.is_empty() {
            let delete_payload = aws_sdk_s3::types::Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| Error::from(format!("Failed to build S3 delete payload: {:?}", e)))?;
            let _ = s3_client
                .delete_objects()
                .bucket(bucket)
                .delete(delete_payload)
                .send()
                .await;
        }

        if resp.is_truncated().unwrap_or(false) {
            continuation = resp.next_continuation_token().map(|s| s.to_string());
        } else {
            break;
        }
    }
    Ok(())
}

// ---------- HTTP handlers ----------

/// POST /projects
pub async fn create_project(
    dynamo_client: &DynamoClient,
    iam_client: &IamClient,
    tables: &ProjectTables,
    user: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateProjectRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Project parse error: {}", e);
            return response::missing_parameter("name");
        }
    };
    if req.name.is_empty() || !req.name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return response::bad_request(
            "Project names may only contain letters, numbers, and hyphens",
        );
    }

    let project = Project {
        name: req.name.clone(),
        description: req.description,
        suspended: false,
        created_by: user.to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
    };

    let mut put = dynamo_client
        .put_item()
        .table_name(&tables.projects)
        .item("name", AttributeValue::S(project.name.clone()))
        .item("suspended", AttributeValue::Bool(false))
        .item("createdBy", AttributeValue::S(project.created_by.clone()))
        .item("createdAt", AttributeValue::S(project.created_at.clone()))
        .condition_expression("attribute_not_exists(#n)")
        .expression_attribute_names("#n", "name");
    if let Some(description) = &project.description {
        put = put.item("description", AttributeValue::S(description.clone()));
    }
    if let Err(e) = put.send().await {
        if response::is_conditional_check_failed(&e) {
            return response::error(
                StatusCode::CONFLICT,
                &format!("Project '{}' already exists", project.name),
            );
        }
        return response::aws_error(&e);
    }

    // Project-scoped IAM policies: the storage policy dynamic roles attach,
    // and the instance constraint policy later rotated by config profiles.
    let ctx = IamContext::from_env();
    let bucket = env::var("DATA_BUCKET").unwrap_or_else(|_| "mlspace-data".to_string());
    for (name_suffix, statements) in [
        (
            format!("project-{}", project.name),
            project_policy_statements(&bucket, &project.name),
        ),
        (
            format!("constraint-{}", project.name),
            vec![crate::policy::filler_statement()],
        ),
    ] {
        let result = iam_client
            .create_policy()
            .policy_name(format!("{}-{}", ctx.role_prefix, name_suffix))
            .policy_document(
                json!({ "Version": "2012-10-17", "Statement": statements }).to_string(),
            )
            .send()
            .await;
        if let Err(e) = result {
            if e.code() != Some("EntityAlreadyExists") {
                tracing::error!("Failed to create policy {}: {}", name_suffix, e);
                return response::aws_error(&e);
            }
        }
    }

    // Creator becomes the first owner; membership rows are created last so a
    // partial failure leaves no orphaned members.
    let owner = ProjectUser {
        project: project.name.clone(),
        user: user.to_string(),
        role: "owner".to_string(),
    };
    put_membership(dynamo_client, &tables.project_users, &owner).await?;
    if iam_roles_enabled(dynamo_client, &tables.app_config).await? {
        iam::get_or_create_user_role(iam_client, &ctx, &project.name, user).await?;
    }

    response::created(&project)
}

/// GET /projects
pub async fn list_projects(
    client: &DynamoClient,
    tables: &ProjectTables,
) -> Result<Response<Body>, Error> {
    let mut projects = Vec::new();
    let mut start_key: Option<HashMap<String, AttributeValue>> = None;
    loop {
        let mut req = client.scan().table_name(&tables.projects);
        if let Some(key) = start_key.take() {
            req = req.set_exclusive_start_key(Some(key));
        }
        let resp = req.send().await?;
        projects.extend(resp.items().iter().map(project_from_item));
        match resp.last_evaluated_key() {
            Some(key) if !key.is_empty() => start_key = Some(key.clone()),
            _ => break,
        }
    }
    projects.sort_by(|a: &Project, b: &Project| a.name.cmp(&b.name));
    response::ok(&projects)
}

/// GET /projects/{name}
pub async fn get_project(
    client: &DynamoClient,
    tables: &ProjectTables,
    name: &str,
) -> Result<Response<Body>, Error> {
    let result = client
        .get_item()
        .table_name(&tables.projects)
        .key("name", AttributeValue::S(name.to_string()))
        .send()
        .await?;
    match result.item() {
        Some(item) => response::ok(&project_from_item(item)),
        None => response::not_found(&format!("Project '{}' not found", name)),
    }
}

/// DELETE /projects/{name}
///
/// Sequential cleanup, dependents first: schedules, metadata, memberships,
/// dynamic roles, the data prefix, and finally the project row itself. No
/// rollback; a partial failure is recovered by re-running the delete.
pub async fn delete_project(
    dynamo_client: &DynamoClient,
    iam_client: &IamClient,
    s3_client: &S3Client,
    tables: &ProjectTables,
    name: &str,
) -> Result<Response<Body>, Error> {
    tracing::info!("Deleting project {}", name);

    for record in
        resource_scheduler::list_project_schedules(dynamo_client, &tables.resource_scheduler, name)
            .await?
    {
        resource_scheduler::delete_schedule(
            dynamo_client,
            &tables.resource_scheduler,
            &record.resource_id,
            record.resource_type,
        )
        .await?;
    }

    for record in
        resource_metadata::list_project_records(dynamo_client, &tables.resource_metadata, name)
            .await?
    {
        resource_metadata::delete_record(
            dynamo_client,
            &tables.resource_metadata,
            &record.resource_id,
            record.resource_type,
        )
        .await?;
    }

    for member in list_members(dynamo_client, &tables.project_users, name).await? {
        dynamo_client
            .delete_item()
            .table_name(&tables.project_users)
            .key("project", AttributeValue::S(name.to_string()))
            .key("username", AttributeValue::S(member.user))
            .send()
            .await?;
    }

    let ctx = IamContext::from_env();
    let removed = iam::remove_project_roles(iam_client, &ctx, name).await?;
    tracing::info!("Removed {} dynamic role(s) for project {}", removed, name);

    let bucket = env::var("DATA_BUCKET").unwrap_or_else(|_| "mlspace-data".to_string());
    delete_project_data_prefix(s3_client, &bucket, name).await?;

    for policy_arn in [ctx.project_policy_arn(name), ctx.constraint_policy_arn(name)] {
        iam::delete_non_default_policy(iam_client, &policy_arn).await?;
        if let Err(e) = iam_client.delete_policy().policy_arn(&policy_arn).send().await {
            if e.code() != Some("NoSuchEntity") {
                return response::aws_error(&e);
            }
        }
    }

    dynamo_client
        .delete_item()
        .table_name(&tables.projects)
        .key("name", AttributeValue::S(name.to_string()))
        .send()
        .await?;

    response::message(StatusCode::OK, &format!("Project '{}' deleted", name))
}

/// GET /projects/{name}/users
pub async fn list_project_users(
    client: &DynamoClient,
    tables: &ProjectTables,
    name: &str,
) -> Result<Response<Body>, Error> {
    let members = list_members(client, &tables.project_users, name).await?;
    response::ok(&members)
}

/// PUT /projects/{name}/users/{user}
pub async fn add_project_user(
    dynamo_client: &DynamoClient,
    iam_client: &IamClient,
    tables: &ProjectTables,
    project: &str,
    user: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: AddProjectUserRequest = if body.is_empty() {
        AddProjectUserRequest {
            role: "member".to_string(),
        }
    } else {
        match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(_) => return response::missing_parameter("role"),
        }
    };
    if req.role != "owner" && req.role != "member" {
        return response::bad_request("Role must be 'owner' or 'member'");
    }

    let member = ProjectUser {
        project: project.to_string(),
        user: user.to_string(),
        role: req.role,
    };
    put_membership(dynamo_client, &tables.project_users, &member).await?;

    if iam_roles_enabled(dynamo_client, &tables.app_config).await? {
        let ctx = IamContext::from_env();
        iam::get_or_create_user_role(iam_client, &ctx, project, user).await?;
    }
    response::ok(&member)
}

/// DELETE /projects/{name}/users/{user}
pub async fn remove_project_user(
    dynamo_client: &DynamoClient,
    iam_client: &IamClient,
    tables: &ProjectTables,
    project: &str,
    user: &str,
) -> Result<Response<Body>, Error> {
    let members = list_members(dynamo_client, &tables.project_users, project).await?;
    let Some(member) = members.iter().find(|m| m.user == user) else {
        return response::not_found(&format!("'{}' is not a member of {}", user, project));
    };
    if member.role == "owner" && removal_leaves_no_owner(&members, user) {
        return response::bad_request("Cannot remove the last owner of a project");
    }

    dynamo_client
        .delete_item()
        .table_name(&tables.project_users)
        .key("project", AttributeValue::S(project.to_string()))
        .key("username", AttributeValue::S(user.to_string()))
        .send()
        .await?;

    if iam_roles_enabled(dynamo_client, &tables.app_config).await? {
        let ctx = IamContext::from_env();
        iam::remove_user_role(iam_client, &ctx, project, user).await?;
    }
    response::message(StatusCode::OK, &format!("Removed '{}' from {}", user, project))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(user: &str, role: &str) -> ProjectUser {
        ProjectUser {
            project: "proj".to_string(),
            user: user.to_string(),
            role: role.to_string(),
        }
    }

    #[test]
    fn removing_the_only_owner_is_blocked() {
        let members = vec![member("alice", "owner"), member("bob", "member")];
        assert!(removal_leaves_no_owner(&members, "alice"));
    }

    #[test]
    fn removing_an_owner_with_a_co_owner_is_fine() {
        let members = vec![member("alice", "owner"), member("bob", "owner")];
        assert!(!removal_leaves_no_owner(&members, "alice"));
    }

    #[test]
    fn removing_a_member_never_trips_the_owner_guard() {
        let members = vec![member("alice", "owner"), member("bob", "member")];
        assert!(!removal_leaves_no_owner(&members, "bob"));
    }

    #[test]
    fn project_policy_scopes_storage_to_the_project_prefix() {
        let statements = project_policy_statements("mlspace-data", "genomics");
        assert_eq!(
            statements[0]["Resource"],
            "arn:aws:s3:::mlspace-data/project/genomics/*"
        );
    }
}
