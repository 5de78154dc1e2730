use crate::response;
use crate::store;
use crate::types::{CreateUserRequest, User};
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use lambda_http::{http::StatusCode, Body, Error, Response};
use std::collections::HashMap;

fn user_from_item(item: &HashMap<String, AttributeValue>) -> User {
    User {
        username: store::get_s(item, "username"),
        email: store::get_s(item, "email"),
        display_name: store::get_opt_s(item, "displayName"),
        suspended: store::get_bool(item, "suspended"),
        created_at: store::get_s(item, "createdAt"),
    }
}

/// POST /users
pub async fn create_user(
    client: &DynamoClient,
    table_name: &str,
    body: &[u8],
) -> Result<Response<Body>, Error> {
    let req: CreateUserRequest = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("User parse error: {}", e);
            return response::missing_parameter("username");
        }
    };

    let user = User {
        username: req.username,
        email: req.email,
        display_name: req.display_name,
        suspended: false,
        created_at: chrono::Utc::now().to_rfc3339(),
    };
    let mut put = client
        .put_item()
        .table_name(table_name)
        .item("username", AttributeValue::S(user.username.clone()))
        .item("email", AttributeValue::S(user.email.clone()))
        .item("suspended", AttributeValue::Bool(false))
        .item("createdAt", AttributeValue::S(user.created_at.clone()))
        .condition_expression("attribute_not_exists(username)");
    if let Some(display_name) = &user.display_name {
        put = put.item("displayName", AttributeValue::S(display_name.clone()));
    }

    match put.send().await {
        Ok(_) => response::created(&user),
        Err(e) if response::is_conditional_check_failed(&e) => response::error(
            StatusCode::CONFLICT,
            &format!("User '{}' already exists", user.username),
        ),
        Err(e) => response::aws_error(&e),
    }
}

/// GET /users/{user}
pub async fn get_user(
    client: &DynamoClient,
    table_name: &str,
    username: &str,
) -> Result<Response<Body>, Error> {
    let result = client
        .get_item()
        .table_name(table_name)
        .key("username", AttributeValue::S(username.to_string()))
        .send()
        .await?;
    match result.item() {
        Some(item) => response::ok(&user_from_item(item)),
        None => response::not_found(&format!("User '{}' not found", username)),
    }
}

/// DELETE /users/{user}
pub async fn delete_user(
    client: &DynamoClient,
    table_name: &str,
    username: &str,
) -> Result<Response<Body>, Error> {
    client
        .delete_item()
        .table_name(table_name)
        .key("username", AttributeValue::S(username.to_string()))
        .send()
        .await?;
    response::message(StatusCode::OK, &format!("User '{}' deleted", username))
}
