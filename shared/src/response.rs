use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use lambda_http::{http::StatusCode, Body, Error, Response};
use serde::Serialize;

/// Build a JSON success response with CORS headers.
pub fn json(status: StatusCode, value: &impl Serialize) -> Result<Response<Body>, Error> {
    let resp = Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(serde_json::to_string(value)?.into())
        .map_err(Box::new)?;
    Ok(resp)
}

pub fn ok(value: &impl Serialize) -> Result<Response<Body>, Error> {
    json(StatusCode::OK, value)
}

pub fn created(value: &impl Serialize) -> Result<Response<Body>, Error> {
    json(StatusCode::CREATED, value)
}

pub fn message(status: StatusCode, msg: &str) -> Result<Response<Body>, Error> {
    json(status, &serde_json::json!({ "message": msg }))
}

pub fn error(status: StatusCode, msg: &str) -> Result<Response<Body>, Error> {
    json(status, &serde_json::json!({ "error": msg }))
}

pub fn bad_request(msg: &str) -> Result<Response<Body>, Error> {
    error(StatusCode::BAD_REQUEST, msg)
}

pub fn not_found(msg: &str) -> Result<Response<Body>, Error> {
    error(StatusCode::NOT_FOUND, msg)
}

/// Missing or unparsable request body.
pub fn missing_parameter(detail: &str) -> Result<Response<Body>, Error> {
    error(
        StatusCode::BAD_REQUEST,
        &format!("Missing event parameter: {}", detail),
    )
}

/// HTTP status for an AWS service error code. Unknown codes fall through to 500.
pub fn status_for_code(code: &str) -> StatusCode {
    match code {
        "ConditionalCheckFailedException" => StatusCode::TOO_MANY_REQUESTS,
        "ResourceInUse" | "ResourceInUseException" | "EntityAlreadyExists" => StatusCode::CONFLICT,
        "ResourceNotFound" | "ResourceNotFoundException" | "NoSuchEntity" => StatusCode::NOT_FOUND,
        "AccessDenied" | "AccessDeniedException" => StatusCode::FORBIDDEN,
        "ValidationException" | "ValidationError" | "InvalidParameterValue" => {
            StatusCode::BAD_REQUEST
        }
        "ThrottlingException" | "TooManyRequestsException"
        | "ProvisionedThroughputExceededException" | "LimitExceeded" | "LimitExceededException"
        | "ResourceLimitExceeded" => StatusCode::TOO_MANY_REQUESTS,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Friendly overrides for the AWS error messages users hit most often.
pub fn friendly_message(code: &str, message: &str) -> String {
    match code {
        "ConditionalCheckFailedException" => {
            "The record was modified by another request. Refresh and try again.".to_string()
        }
        "ResourceInUse" | "ResourceInUseException" | "EntityAlreadyExists" => {
            "A resource with that name already exists.".to_string()
        }
        "AccessDenied" | "AccessDeniedException" => {
            "You do not have permission to perform this action.".to_string()
        }
        "ResourceLimitExceeded" => {
            "An AWS service limit was reached. Try again later or request a limit increase."
                .to_string()
        }
        "ThrottlingException" | "TooManyRequestsException" => {
            "AWS is throttling requests. Try again shortly.".to_string()
        }
        _ => message.to_string(),
    }
}

/// Map any AWS SDK error to an HTTP response.
pub fn aws_error(err: &impl ProvideErrorMetadata) -> Result<Response<Body>, Error> {
    let code = err.code().unwrap_or("Unknown");
    let raw = err.message().unwrap_or("An unexpected AWS error occurred");
    let status = status_for_code(code);
    tracing::error!("AWS error {} ({}): {}", code, status, raw);
    error(status, &friendly_message(code, raw))
}

pub fn is_conditional_check_failed(err: &impl ProvideErrorMetadata) -> bool {
    err.code() == Some("ConditionalCheckFailedException")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conditional_check_maps_to_429() {
        assert_eq!(
            status_for_code("ConditionalCheckFailedException"),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn duplicate_resource_maps_to_409_with_friendly_message() {
        assert_eq!(status_for_code("ResourceInUse"), StatusCode::CONFLICT);
        assert_eq!(
            friendly_message("ResourceInUse", "Notebook Instance abc already exists"),
            "A resource with that name already exists."
        );
    }

    #[test]
    fn unknown_codes_pass_through() {
        assert_eq!(
            status_for_code("SomethingNew"),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(friendly_message("SomethingNew", "raw detail"), "raw detail");
    }
}
