use aws_sdk_iam::error::ProvideErrorMetadata;
use aws_sdk_iam::types::{PolicyVersion, Tag};
use aws_sdk_iam::Client as IamClient;
use lambda_http::Error;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::env;

/// IAM role names are capped at 64 characters.
const MAX_ROLE_NAME_LEN: usize = 64;

/// Environment-derived settings for dynamic role management.
#[derive(Debug, Clone)]
pub struct IamContext {
    pub aws_account: String,
    pub role_prefix: String,
    pub permissions_boundary_arn: Option<String>,
    pub system_tag: String,
}

impl IamContext {
    pub fn from_env() -> Self {
        Self {
            aws_account: env::var("AWS_ACCOUNT").unwrap_or_default(),
            role_prefix: env::var("DYNAMIC_ROLE_PREFIX")
                .unwrap_or_else(|_| "MLSpace".to_string()),
            permissions_boundary_arn: env::var("PERMISSIONS_BOUNDARY_ARN").ok(),
            system_tag: env::var("SYSTEM_TAG").unwrap_or_else(|_| "MLSpace".to_string()),
        }
    }

    pub fn app_deny_policy_arn(&self) -> String {
        format!(
            "arn:aws:iam::{}:policy/{}-app-deny",
            self.aws_account, self.role_prefix
        )
    }

    pub fn services_deny_policy_arn(&self) -> String {
        format!(
            "arn:aws:iam::{}:policy/{}-services-deny",
            self.aws_account, self.role_prefix
        )
    }

    pub fn project_policy_arn(&self, project: &str) -> String {
        format!(
            "arn:aws:iam::{}:policy/{}-project-{}",
            self.aws_account, self.role_prefix, project
        )
    }

    pub fn user_policy_arn(&self, user: &str) -> String {
        format!(
            "arn:aws:iam::{}:policy/{}-user-{}",
            self.aws_account, self.role_prefix, user
        )
    }

    pub fn constraint_policy_arn(&self, project: &str) -> String {
        format!(
            "arn:aws:iam::{}:policy/{}-constraint-{}",
            self.aws_account, self.role_prefix, project
        )
    }
}

// ---------- policy version rotation ----------

/// Version ids that are safe to delete: everything except the default.
pub fn non_default_version_ids(versions: &[PolicyVersion]) -> Vec<String> {
    versions
        .iter()
        .filter(|v| !v.is_default_version())
        .filter_map(|v| v.version_id().map(|id| id.to_string()))
        .collect()
}

/// Delete every non-default version of a policy. IAM caps policies at five
/// versions, so this runs immediately after every version creation.
pub async fn delete_non_default_policy(
    client: &IamClient,
    policy_arn: &str,
) -> Result<(), Error> {
    let listed = client
        .list_policy_versions()
        .policy_arn(policy_arn)
        .send()
        .await?;
    for version_id in non_default_version_ids(listed.versions()) {
        tracing::info!("Deleting stale policy version {} of {}", version_id, policy_arn);
        client
            .delete_policy_version()
            .policy_arn(policy_arn)
            .version_id(version_id)
            .send()
            .await?;
    }
    Ok(())
}

/// Create a new default policy version from the given statements, then prune
/// all non-default versions. Throttling errors propagate to the caller.
pub async fn create_policy_version(
    client: &IamClient,
    policy_arn: &str,
    statements: &[Value],
) -> Result<(), Error> {
    let document = json!({
        "Version": "2012-10-17",
        "Statement": statements,
    });
    client
        .create_policy_version()
        .policy_arn(policy_arn)
        .policy_document(document.to_string())
        .set_as_default(true)
        .send()
        .await?;
    delete_non_default_policy(client, policy_arn).await
}

// ---------- instance constraint policies ----------

/// Deny statements restricting a project to the instance types its compute
/// profile allows.
pub fn instance_constraint_statements(
    notebook_instance_types: &[String],
    training_instance_types: &[String],
    endpoint_instance_types: &[String],
) -> Vec<Value> {
    let constrained: [(&[&str], &[String]); 3] = [
        (
            &["sagemaker:CreateNotebookInstance", "sagemaker:UpdateNotebookInstance"],
            notebook_instance_types,
        ),
        (
            &[
                "sagemaker:CreateTrainingJob",
                "sagemaker:CreateHyperParameterTuningJob",
                "sagemaker:CreateTransformJob",
            ],
            training_instance_types,
        ),
        (&["sagemaker:CreateEndpointConfig"], endpoint_instance_types),
    ];

    constrained
        .iter()
        .filter(|(_, allowed)| !allowed.is_empty())
        .map(|(actions, allowed)| {
            json!({
                "Effect": "Deny",
                "Action": actions,
                "Resource": "*",
                "Condition": {
                    "ForAnyValue:StringNotEquals": {
                        "sagemaker:InstanceTypes": allowed,
                    }
                }
            })
        })
        .collect()
}

/// Rotate a project's instance-constraint policy to a new statement set.
pub async fn create_instance_constraint_policy_version(
    client: &IamClient,
    policy_arn: &str,
    statements: &[Value],
) -> Result<(), Error> {
    create_policy_version(client, policy_arn, statements).await
}

// ---------- dynamic roles ----------

/// Deterministic role name for a project/user pair. Long names are truncated
/// and suffixed with a digest of the full name to stay unique under the
/// 64-character IAM limit. Every part is sanitized to ASCII, so truncation
/// can never split a character.
pub fn dynamic_role_name(prefix: &str, project: &str, user: &str) -> String {
    let full = format!(
        "{}-{}-{}",
        sanitize(prefix),
        sanitize(project),
        sanitize(user)
    );
    if full.len() <= MAX_ROLE_NAME_LEN {
        return full;
    }
    let digest = Sha256::digest(full.as_bytes());
    let suffix = format!("{:x}", digest);
    format!("{}-{}", &full[..MAX_ROLE_NAME_LEN - 13], &suffix[..12])
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn notebook_trust_policy() -> String {
    json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Service": "sagemaker.amazonaws.com" },
            "Action": "sts:AssumeRole"
        }]
    })
    .to_string()
}

fn tag(key: &str, value: &str) -> Result<Tag, Error> {
    Ok(Tag::builder().key(key).value(value).build()?)
}

/// Fetch the dynamic role for a project/user pair, creating and wiring it up
/// on first use. Returns the role name.
pub async fn get_or_create_user_role(
    client: &IamClient,
    ctx: &IamContext,
    project: &str,
    user: &str,
) -> Result<String, Error> {
    let role_name = dynamic_role_name(&ctx.role_prefix, project, user);

    match client.get_role().role_name(&role_name).send().await {
        Ok(_) => return Ok(role_name),
        Err(e) if e.code() == Some("NoSuchEntity") => {}
        Err(e) => return Err(e.into()),
    }

    tracing::info!("Provisioning dynamic role {} for {}/{}", role_name, project, user);
    let mut create = client
        .create_role()
        .role_name(&role_name)
        .assume_role_policy_document(notebook_trust_policy())
        .tags(tag(&ctx.system_tag, "true")?)
        .tags(tag("project", project)?)
        .tags(tag("user", user)?);
    if let Some(boundary) = &ctx.permissions_boundary_arn {
        create = create.permissions_boundary(boundary);
    }
    create.send().await?;

    for policy_arn in [
        ctx.project_policy_arn(project),
        ctx.user_policy_arn(user),
        ctx.app_deny_policy_arn(),
        ctx.services_deny_policy_arn(),
    ] {
        client
            .attach_role_policy()
            .role_name(&role_name)
            .policy_arn(policy_arn)
            .send()
            .await?;
    }
    Ok(role_name)
}

/// Detach everything and delete a dynamic role. Tolerates the role already
/// being gone.
pub async fn remove_user_role(
    client: &IamClient,
    ctx: &IamContext,
    project: &str,
    user: &str,
) -> Result<(), Error> {
    let role_name = dynamic_role_name(&ctx.role_prefix, project, user);
    remove_role_by_name(client, &role_name).await
}

async fn remove_role_by_name(client: &IamClient, role_name: &str) -> Result<(), Error> {
    let attached = match client
        .list_attached_role_policies()
        .role_name(role_name)
        .send()
        .await
    {
        Ok(resp) => resp,
        Err(e) if e.code() == Some("NoSuchEntity") => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for policy in attached.attached_policies() {
        if let Some(policy_arn) = policy.policy_arn() {
            client
                .detach_role_policy()
                .role_name(role_name)
                .policy_arn(policy_arn)
                .send()
                .await?;
        }
    }
    client.delete_role().role_name(role_name).send().await?;
    tracing::info!("Deleted dynamic role {}", role_name);
    Ok(())
}

/// Tear down every dynamic role belonging to a project. Roles are found by
/// the project tag stamped on them at creation.
pub async fn remove_project_roles(
    client: &IamClient,
    ctx: &IamContext,
    project: &str,
) -> Result<usize, Error> {
    let mut removed = 0;
    let mut marker: Option<String> = None;
    let name_prefix = sanitize(&ctx.role_prefix);
    loop {
        let mut req = client.list_roles();
        if let Some(m) = marker.take() {
            req = req.marker(m);
        }
        let resp = req.send().await?;
        for role in resp.roles() {
            let role_name = role.role_name();
            if !role_name.starts_with(&name_prefix) {
                continue;
            }
            let tags = client
                .list_role_tags()
                .role_name(role_name)
                .send()
                .await?;
            let is_project_role = tags
                .tags()
                .iter()
                .any(|t| t.key() == "project" && t.value() == project);
            if !is_project_role {
                continue;
            }

            remove_role_by_name(client, role_name).await?;
            removed += 1;
        }
        if resp.is_truncated() {
            marker = resp.marker().map(|m| m.to_string());
        } else {
            break;
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(id: &str, default: bool) -> PolicyVersion {
        PolicyVersion::builder()
            .version_id(id)
            .is_default_version(default)
            .build()
    }

    #[test]
    fn only_non_default_versions_are_pruned() {
        let versions = vec![
            version("v1", false),
            version("v2", false),
            version("v3", true),
            version("v4", false),
        ];
        assert_eq!(non_default_version_ids(&versions), vec!["v1", "v2", "v4"]);
    }

    #[test]
    fn single_default_version_prunes_nothing() {
        let versions = vec![version("v1", true)];
        assert!(non_default_version_ids(&versions).is_empty());
    }

    #[test]
    fn role_name_is_stable_and_fits_iam_limit() {
        let short = dynamic_role_name("MLSpace", "proj", "jdoe");
        assert_eq!(short, "MLSpace-proj-jdoe");

        let long_user = "a-user-with-an-extremely-long-federated-identity-name@example.com";
        let long = dynamic_role_name("MLSpace", "genomics-research", long_user);
        assert!(long.len() <= MAX_ROLE_NAME_LEN);
        // deterministic, and distinct from a near-identical name
        assert_eq!(
            long,
            dynamic_role_name("MLSpace", "genomics-research", long_user)
        );
        let sibling = format!("{}x", long_user);
        assert_ne!(
            long,
            dynamic_role_name("MLSpace", "genomics-research", &sibling)
        );
    }

    #[test]
    fn multibyte_prefix_truncates_cleanly() {
        // A prefix from the environment can contain non-ASCII characters;
        // truncation must still land on a character boundary.
        let prefix = "MLSpäce-Ünïcorn-Plätform-Prefix";
        let user = "user-with-a-very-long-identity-name@example.com";
        let name = dynamic_role_name(prefix, "genomics-research", user);
        assert!(name.len() <= MAX_ROLE_NAME_LEN);
        assert!(name.is_ascii());
        assert_eq!(name, dynamic_role_name(prefix, "genomics-research", user));
    }

    #[test]
    fn constraint_statements_skip_empty_lists() {
        let statements = instance_constraint_statements(
            &["ml.t3.medium".to_string()],
            &[],
            &["ml.m5.large".to_string()],
        );
        assert_eq!(statements.len(), 2);
        assert_eq!(
            statements[0]["Condition"]["ForAnyValue:StringNotEquals"]["sagemaker:InstanceTypes"],
            serde_json::json!(["ml.t3.medium"])
        );
    }
}
