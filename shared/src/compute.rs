use crate::response;
use lambda_http::{Body, Error, Response};
use serde::Serialize;
use std::sync::OnceLock;

#[derive(Debug, Serialize)]
pub struct ComputeTypes {
    pub notebook_instance_types: Vec<&'static str>,
    pub training_instance_types: Vec<&'static str>,
    pub endpoint_instance_types: Vec<&'static str>,
}

/// Warm-container memoization of the instance type listing. The set changes
/// only with SDK upgrades, so a cold start is the only refresh point.
static CACHED_COMPUTE_TYPES: OnceLock<ComputeTypes> = OnceLock::new();

fn compute_types() -> &'static ComputeTypes {
    CACHED_COMPUTE_TYPES.get_or_init(|| ComputeTypes {
        notebook_instance_types: vec![
            "ml.t3.medium",
            "ml.t3.large",
            "ml.t3.xlarge",
            "ml.m5.xlarge",
            "ml.m5.2xlarge",
            "ml.m5.4xlarge",
            "ml.c5.xlarge",
            "ml.c5.2xlarge",
            "ml.g4dn.xlarge",
            "ml.p3.2xlarge",
        ],
        training_instance_types: vec![
            "ml.m5.large",
            "ml.m5.xlarge",
            "ml.m5.2xlarge",
            "ml.m5.4xlarge",
            "ml.c5.xlarge",
            "ml.c5.2xlarge",
            "ml.c5.9xlarge",
            "ml.g4dn.xlarge",
            "ml.g4dn.12xlarge",
            "ml.p3.2xlarge",
            "ml.p3.8xlarge",
        ],
        endpoint_instance_types: vec![
            "ml.t2.medium",
            "ml.m5.large",
            "ml.m5.xlarge",
            "ml.c5.large",
            "ml.c5.xlarge",
            "ml.g4dn.xlarge",
            "ml.inf1.xlarge",
        ],
    })
}

/// GET /compute-types
pub async fn list_compute_types() -> Result<Response<Body>, Error> {
    response::ok(compute_types())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_returns_the_same_instance() {
        let a = compute_types() as *const ComputeTypes;
        let b = compute_types() as *const ComputeTypes;
        assert_eq!(a, b);
    }
}
