use crate::iam;
use crate::types::{AppConfiguration, ResourceType};
use aws_sdk_iam::Client as IamClient;
use lambda_http::Error;
use serde_json::{json, Value};

/// Services the platform can deactivate, with the IAM deny statements that
/// enforce the deactivation inside every dynamic role.
struct ServiceDenyRule {
    service: &'static str,
    actions: &'static [&'static str],
    /// Resource type whose in-flight instances must be suspended when the
    /// service is turned off, if any.
    suspends: Option<ResourceType>,
}

const SERVICE_DENY_RULES: &[ServiceDenyRule] = &[
    ServiceDenyRule {
        service: "notebook",
        actions: &[
            "sagemaker:CreateNotebookInstance",
            "sagemaker:StartNotebookInstance",
            "sagemaker:CreatePresignedNotebookInstanceUrl",
        ],
        suspends: Some(ResourceType::NotebookInstance),
    },
    ServiceDenyRule {
        service: "endpoint",
        actions: &[
            "sagemaker:CreateEndpoint",
            "sagemaker:CreateEndpointConfig",
            "sagemaker:InvokeEndpoint",
        ],
        suspends: Some(ResourceType::Endpoint),
    },
    ServiceDenyRule {
        service: "emr",
        actions: &[
            "elasticmapreduce:RunJobFlow",
            "elasticmapreduce:AddJobFlowSteps",
        ],
        suspends: Some(ResourceType::EmrCluster),
    },
    ServiceDenyRule {
        service: "training-job",
        actions: &["sagemaker:CreateTrainingJob"],
        suspends: None,
    },
    ServiceDenyRule {
        service: "hpo-job",
        actions: &["sagemaker:CreateHyperParameterTuningJob"],
        suspends: None,
    },
    ServiceDenyRule {
        service: "transform-job",
        actions: &["sagemaker:CreateTransformJob"],
        suspends: None,
    },
    ServiceDenyRule {
        service: "labeling-job",
        actions: &["sagemaker:CreateLabelingJob"],
        suspends: None,
    },
    ServiceDenyRule {
        service: "realtime-translate",
        actions: &["translate:TranslateText", "translate:TranslateDocument"],
        suspends: None,
    },
    ServiceDenyRule {
        service: "batch-translate",
        actions: &["translate:StartTextTranslationJob"],
        suspends: None,
    },
];

/// Cross-cutting rules that only apply once every service in the group is off.
struct GroupDenyRule {
    members: &'static [&'static str],
    actions: &'static [&'static str],
}

const GROUP_DENY_RULES: &[GroupDenyRule] = &[
    GroupDenyRule {
        members: &["realtime-translate", "batch-translate"],
        actions: &[
            "translate:ListLanguages",
            "translate:ListTerminologies",
            "comprehend:DetectDominantLanguage",
        ],
    },
    GroupDenyRule {
        members: &["training-job", "hpo-job"],
        actions: &["sagemaker:DescribeTrainingJob", "sagemaker:StopTrainingJob"],
    },
];

fn deny_statement(actions: &[&str]) -> Value {
    json!({
        "Effect": "Deny",
        "Action": actions,
        "Resource": "*"
    })
}

/// An inert statement used when nothing is denied. IAM rejects empty policy
/// documents; keeping a harmless deny in place avoids detaching and
/// reattaching the policy across every dynamic role.
pub fn filler_statement() -> Value {
    json!({
        "Effect": "Deny",
        "Action": "dynamodb:DeleteBackup",
        "Resource": "arn:aws:dynamodb:*:*:table/mlspace-deny-placeholder"
    })
}

fn is_enabled(config: &AppConfiguration, service: &str) -> bool {
    // Services absent from the configuration default to enabled.
    config
        .enabled_services
        .get(service)
        .copied()
        .unwrap_or(true)
}

/// Aggregate deny statements for the current service activation map, and the
/// resource types whose in-flight instances should be suspended.
pub fn build_service_deny_statements(
    config: &AppConfiguration,
) -> (Vec<Value>, Vec<ResourceType>) {
    let mut statements = Vec::new();
    let mut suspend = Vec::new();

    for rule in SERVICE_DENY_RULES {
        if is_enabled(config, rule.service) {
            continue;
        }
        statements.push(deny_statement(rule.actions));
        if let Some(resource_type) = rule.suspends {
            suspend.push(resource_type);
        }
    }

    for group in GROUP_DENY_RULES {
        if group.members.iter().all(|m| !is_enabled(config, m)) {
            statements.push(deny_statement(group.actions));
        }
    }

    if statements.is_empty() {
        statements.push(filler_statement());
    }

    (statements, suspend)
}

/// Rebuild the shared services deny policy from the activation map and rotate
/// it onto the policy ARN. Returns the resource types to suspend.
pub async fn update_activated_services_policy(
    iam_client: &IamClient,
    services_policy_arn: &str,
    config: &AppConfiguration,
) -> Result<Vec<ResourceType>, Error> {
    let (statements, suspend) = build_service_deny_statements(config);
    tracing::info!(
        "Rotating services deny policy {} with {} statement(s)",
        services_policy_arn,
        statements.len()
    );
    iam::create_policy_version(iam_client, services_policy_arn, &statements).await?;
    Ok(suspend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(services: &[(&str, bool)]) -> AppConfiguration {
        AppConfiguration {
            enabled_services: services
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<HashMap<_, _>>(),
            manage_iam_roles: true,
            default_resource_ttl_hours: None,
        }
    }

    fn actions_of(statement: &Value) -> Vec<String> {
        match &statement["Action"] {
            Value::String(s) => vec![s.clone()],
            Value::Array(a) => a
                .iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
            _ => vec![],
        }
    }

    #[test]
    fn all_services_enabled_yields_only_the_filler() {
        let config = config_with(&[("notebook", true), ("emr", true)]);
        let (statements, suspend) = build_service_deny_statements(&config);
        assert_eq!(statements, vec![filler_statement()]);
        assert!(suspend.is_empty());
    }

    #[test]
    fn unlisted_services_default_to_enabled() {
        let config = config_with(&[]);
        let (statements, suspend) = build_service_deny_statements(&config);
        assert_eq!(statements, vec![filler_statement()]);
        assert!(suspend.is_empty());
    }

    #[test]
    fn disabled_service_contributes_its_statements_and_suspension() {
        let config = config_with(&[("emr", false)]);
        let (statements, suspend) = build_service_deny_statements(&config);
        assert_eq!(statements.len(), 1);
        assert!(actions_of(&statements[0])
            .contains(&"elasticmapreduce:RunJobFlow".to_string()));
        assert_eq!(suspend, vec![ResourceType::EmrCluster]);
    }

    #[test]
    fn group_statements_require_every_member_disabled() {
        let partial = config_with(&[("realtime-translate", false), ("batch-translate", true)]);
        let (statements, _) = build_service_deny_statements(&partial);
        assert!(statements
            .iter()
            .all(|s| !actions_of(s).contains(&"translate:ListLanguages".to_string())));

        let full = config_with(&[("realtime-translate", false), ("batch-translate", false)]);
        let (statements, suspend) = build_service_deny_statements(&full);
        assert!(statements
            .iter()
            .any(|s| actions_of(s).contains(&"translate:ListLanguages".to_string())));
        // translate services have no schedulable resources to suspend
        assert!(suspend.is_empty());
    }

    #[test]
    fn no_filler_when_any_deny_exists() {
        let config = config_with(&[("labeling-job", false)]);
        let (statements, _) = build_service_deny_statements(&config);
        assert!(!statements.contains(&filler_statement()));
    }
}
