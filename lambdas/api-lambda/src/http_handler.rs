use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use mlspace_shared::{
    app_config, compute, config_profiles, projects, projects::ProjectTables, resource_metadata,
    resource_scheduler, response, users, AppState,
};
use std::env;
use std::sync::Arc;

/// Main Lambda handler - routes API Gateway proxy requests to the shared handlers
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    tracing::info!("API invoked - Method: {} Path: {}", method, path);

    // Handle CORS preflight
    if method == "OPTIONS" {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header(
                "Access-Control-Allow-Methods",
                "GET,POST,PUT,PATCH,DELETE,OPTIONS",
            )
            .header(
                "Access-Control-Allow-Headers",
                "Content-Type,Authorization,X-User-Id",
            )
            .body(Body::Empty)
            .map_err(Box::new)?);
    }

    // Identity comes from the API Gateway JWT authorizer; allow an X-User-Id
    // header override for local development.
    let user_id = event
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .or_else(|| {
            event
                .request_context()
                .authorizer()
                .and_then(|auth| auth.jwt.as_ref())
                .and_then(|jwt| jwt.claims.get("sub"))
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| {
            tracing::warn!("Could not extract user ID from JWT or header, using fallback");
            "anonymous".to_string()
        });

    let tables = ProjectTables::from_env();
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    // Projects routes
    if path.starts_with("/projects") {
        return match (method, parts.as_slice()) {
            // POST /projects - create project
            (&Method::POST, ["projects"]) => {
                projects::create_project(
                    &state.dynamo_client,
                    &state.iam_client,
                    &tables,
                    &user_id,
                    body,
                )
                .await
            }
            // GET /projects - list projects
            (&Method::GET, ["projects"]) => {
                projects::list_projects(&state.dynamo_client, &tables).await
            }
            // GET /projects/{name} - get project
            (&Method::GET, ["projects", name]) => {
                projects::get_project(&state.dynamo_client, &tables, name).await
            }
            // DELETE /projects/{name} - delete project and everything under it
            (&Method::DELETE, ["projects", name]) => {
                projects::delete_project(
                    &state.dynamo_client,
                    &state.iam_client,
                    &state.s3_client,
                    &tables,
                    name,
                )
                .await
            }
            // GET /projects/{name}/users - list members
            (&Method::GET, ["projects", name, "users"]) => {
                projects::list_project_users(&state.dynamo_client, &tables, name).await
            }
            // PUT /projects/{name}/users/{user} - add member
            (&Method::PUT, ["projects", name, "users", user]) => {
                projects::add_project_user(
                    &state.dynamo_client,
                    &state.iam_client,
                    &tables,
                    name,
                    user,
                    body,
                )
                .await
            }
            // DELETE /projects/{name}/users/{user} - remove member
            (&Method::DELETE, ["projects", name, "users", user]) => {
                projects::remove_project_user(
                    &state.dynamo_client,
                    &state.iam_client,
                    &tables,
                    name,
                    user,
                )
                .await
            }
            // GET /projects/{name}/resources/{type} - paginated metadata listing
            (&Method::GET, ["projects", name, "resources", resource_type]) => {
                let params = event.query_string_parameters();
                resource_metadata::list_for_project(
                    &state.dynamo_client,
                    &tables.resource_metadata,
                    name,
                    resource_type,
                    params.first("pageSize"),
                    params.first("nextToken"),
                )
                .await
            }
            // PUT /projects/{name}/config-profile - apply a DCP to the project
            (&Method::PUT, ["projects", name, "config-profile"]) => {
                config_profiles::apply_profile_to_project(
                    &state.dynamo_client,
                    &state.iam_client,
                    &config_profiles_table(),
                    name,
                    body,
                )
                .await
            }
            _ => not_found(),
        };
    }

    // User routes
    if path.starts_with("/users") {
        return match (method, parts.as_slice()) {
            (&Method::POST, ["users"]) => {
                users::create_user(&state.dynamo_client, &users_table(), body).await
            }
            (&Method::GET, ["users", user]) => {
                users::get_user(&state.dynamo_client, &users_table(), user).await
            }
            (&Method::DELETE, ["users", user]) => {
                users::delete_user(&state.dynamo_client, &users_table(), user).await
            }
            // GET /users/{user}/resources/{type} - paginated metadata listing
            (&Method::GET, ["users", user, "resources", resource_type]) => {
                let params = event.query_string_parameters();
                resource_metadata::list_for_user(
                    &state.dynamo_client,
                    &tables.resource_metadata,
                    user,
                    resource_type,
                    params.first("pageSize"),
                    params.first("nextToken"),
                )
                .await
            }
            _ => not_found(),
        };
    }

    // Resource schedule / metadata routes
    if path.starts_with("/resources") {
        return match (method, parts.as_slice()) {
            // PUT /resources/{type}/{id} - upsert cached AWS-side state
            (&Method::PUT, ["resources", resource_type, resource_id]) => {
                resource_metadata::sync_record(
                    &state.dynamo_client,
                    &tables.resource_metadata,
                    resource_type,
                    resource_id,
                    body,
                )
                .await
            }
            // GET /resources/{type}/{id} - cached metadata for one resource
            (&Method::GET, ["resources", resource_type, resource_id]) => {
                resource_metadata::get_resource(
                    &state.dynamo_client,
                    &tables.resource_metadata,
                    resource_type,
                    resource_id,
                )
                .await
            }
            // GET /resources/{type}/{id}/schedule - pending stop time
            (&Method::GET, ["resources", resource_type, resource_id, "schedule"]) => {
                resource_scheduler::describe_schedule(
                    &state.dynamo_client,
                    &tables.resource_scheduler,
                    resource_type,
                    resource_id,
                )
                .await
            }
            // PUT /resources/{type}/{id}/schedule - set or move the stop time
            (&Method::PUT, ["resources", resource_type, resource_id, "schedule"]) => {
                resource_scheduler::set_schedule(
                    &state.dynamo_client,
                    &tables.resource_scheduler,
                    resource_type,
                    resource_id,
                    body,
                )
                .await
            }
            // DELETE /resources/{type}/{id}/schedule - disable TTL
            (&Method::DELETE, ["resources", resource_type, resource_id, "schedule"]) => {
                resource_scheduler::remove_schedule(
                    &state.dynamo_client,
                    &tables.resource_scheduler,
                    resource_type,
                    resource_id,
                )
                .await
            }
            // DELETE /resources/{type}/{id} - drop cached metadata
            (&Method::DELETE, ["resources", resource_type, resource_id]) => {
                resource_metadata::remove_record(
                    &state.dynamo_client,
                    &tables.resource_metadata,
                    resource_type,
                    resource_id,
                )
                .await
            }
            _ => not_found(),
        };
    }

    // App configuration routes
    if path.starts_with("/app-config") {
        return match (method, parts.as_slice()) {
            (&Method::GET, ["app-config"]) => {
                app_config::get_app_config(&state.dynamo_client, &tables.app_config).await
            }
            (&Method::POST, ["app-config"]) => {
                app_config::update_app_config(
                    &state.dynamo_client,
                    &state.iam_client,
                    &tables.app_config,
                    &tables.resource_scheduler,
                    &user_id,
                    body,
                )
                .await
            }
            _ => not_found(),
        };
    }

    // Config profile (DCP) routes
    if path.starts_with("/config-profiles") {
        let table_name = config_profiles_table();
        return match (method, parts.as_slice()) {
            (&Method::POST, ["config-profiles"]) => {
                config_profiles::create_profile(&state.dynamo_client, &table_name, &user_id, body)
                    .await
            }
            (&Method::GET, ["config-profiles"]) => {
                config_profiles::list_profiles(&state.dynamo_client, &table_name).await
            }
            (&Method::GET, ["config-profiles", name]) => {
                config_profiles::get_profile(&state.dynamo_client, &table_name, name).await
            }
            (&Method::PUT, ["config-profiles", name]) => {
                config_profiles::update_profile(
                    &state.dynamo_client,
                    &table_name,
                    name,
                    &user_id,
                    body,
                )
                .await
            }
            (&Method::DELETE, ["config-profiles", name]) => {
                config_profiles::delete_profile(&state.dynamo_client, &table_name, name).await
            }
            _ => not_found(),
        };
    }

    // GET /compute-types - memoized instance type listing
    if path == "/compute-types" && method == &Method::GET {
        return compute::list_compute_types().await;
    }

    // No matching route
    tracing::warn!("No route matched - Method: {} Path: {}", method, path);
    not_found()
}

fn users_table() -> String {
    env::var("USERS_TABLE").unwrap_or_else(|_| "mlspace-users".to_string())
}

fn config_profiles_table() -> String {
    env::var("CONFIG_PROFILES_TABLE").unwrap_or_else(|_| "mlspace-config-profiles".to_string())
}

fn not_found() -> Result<Response<Body>, Error> {
    response::error(StatusCode::NOT_FOUND, "Not found")
}
