//! Static OpenAPI document for agent clients.
//!
//! Agent platforms only accept HTTPS servers, so the `servers` entry is always
//! rewritten to `https://`.

use axum::http::HeaderMap;
use serde_json::{json, Value};

/// The https base URL advertised in the document.
///
/// Uses the configured public base URL when set, otherwise the forwarded or
/// direct `Host` header of the request.
pub fn server_url(public_base_url: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(base) = public_base_url {
        return force_https(base);
    }

    let host = ["x-forwarded-host", "host"]
        .iter()
        .find_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .unwrap_or("localhost");

    format!("https://{host}")
}

fn force_https(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    format!("https://{rest}")
}

fn query_param(name: &str, description: &str, required: bool, schema: Value) -> Value {
    json!({
        "name": name,
        "in": "query",
        "required": required,
        "description": description,
        "schema": schema,
    })
}

fn json_response(description: &str, schema: Value) -> Value {
    json!({
        "description": description,
        "content": { "application/json": { "schema": schema } },
    })
}

fn error_response(description: &str) -> Value {
    json_response(description, json!({ "$ref": "#/components/schemas/Error" }))
}

fn array_of(properties: Value) -> Value {
    json!({
        "type": "array",
        "items": { "type": "object", "properties": properties },
    })
}

fn plan_schema() -> Value {
    let string = json!({ "type": "string" });
    let integer = json!({ "type": "integer" });
    let date_time = json!({ "type": "string", "format": "date-time" });

    json!({
        "type": "object",
        "properties": {
            "plan_id": string,
            "dates": string,
            "title": string,
            "series_title": string,
            "times": array_of(json!({
                "name": string,
                "starts_at": date_time,
                "ends_at": date_time,
            })),
            "positions_needed": array_of(json!({
                "team_position_name": string,
                "quantity": integer,
                "assigned_count": integer,
            })),
            "team_members": array_of(json!({
                "person_id": string,
                "name": string,
                "team_position_name": string,
                "status": { "type": "string", "description": "C (confirmed), U (unconfirmed) or D (declined)" },
            })),
        },
        "required": ["plan_id", "times", "positions_needed", "team_members"],
    })
}

fn schemas() -> Value {
    json!({
        "Person": {
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "name": { "type": "string" },
                "first_name": { "type": "string" },
                "last_name": { "type": "string" },
                "emails": { "type": "array", "items": { "type": "string" } },
                "phones": { "type": "array", "items": { "type": "string" } },
            },
            "required": ["id", "emails", "phones"],
        },
        "ServiceType": {
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "name": { "type": "string" },
            },
            "required": ["id", "name"],
        },
        "Plan": plan_schema(),
        "Error": {
            "type": "object",
            "properties": {
                "error": {
                    "type": "object",
                    "properties": {
                        "code": { "type": "string" },
                        "message": { "type": "string" },
                    },
                    "required": ["code", "message"],
                },
            },
        },
    })
}

/// Build the OpenAPI 3.1 document.
pub fn document(server_url: &str) -> Value {
    let page_size = |default: u32| json!({ "type": "integer", "minimum": 1, "maximum": 100, "default": default });

    json!({
        "openapi": "3.1.0",
        "info": {
            "title": "Planning Center Connector",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Read-only access to Planning Center People and Services.",
        },
        "servers": [{ "url": server_url }],
        "paths": {
            "/health": {
                "get": {
                    "operationId": "health",
                    "summary": "Service health and credential store status",
                    "responses": {
                        "200": json_response("Health", json!({
                            "type": "object",
                            "properties": {
                                "ok": { "type": "boolean" },
                                "store_connected": { "type": "boolean" },
                            },
                            "required": ["ok", "store_connected"],
                        })),
                    },
                },
            },
            "/people/find": {
                "get": {
                    "operationId": "findPeople",
                    "summary": "Find people by full or partial name",
                    "parameters": [
                        query_param("name", "Full or partial name", true, json!({ "type": "string" })),
                        query_param("page_size", "Maximum people returned", false, page_size(5)),
                    ],
                    "responses": {
                        "200": json_response("Matching people", json!({
                            "type": "object",
                            "properties": {
                                "count": { "type": "integer" },
                                "people": { "type": "array", "items": { "$ref": "#/components/schemas/Person" } },
                            },
                        })),
                        "400": error_response("Missing or invalid parameter"),
                        "401": error_response("Upstream authorization failed"),
                        "502": error_response("Planning Center unavailable"),
                    },
                },
            },
            "/services/service-types": {
                "get": {
                    "operationId": "listServiceTypes",
                    "summary": "List service types",
                    "responses": {
                        "200": json_response("Service types", json!({
                            "type": "object",
                            "properties": {
                                "count": { "type": "integer" },
                                "service_types": { "type": "array", "items": { "$ref": "#/components/schemas/ServiceType" } },
                            },
                        })),
                        "502": error_response("Planning Center unavailable"),
                    },
                },
            },
            "/services/service-types/resolve": {
                "get": {
                    "operationId": "resolveServiceType",
                    "summary": "Resolve a service type name to its id",
                    "parameters": [
                        query_param("query", "Service type name or part of it", true, json!({ "type": "string" })),
                    ],
                    "responses": {
                        "200": json_response("Matched service type", json!({ "$ref": "#/components/schemas/ServiceType" })),
                        "404": error_response("No service type matches"),
                    },
                },
            },
            "/services/plans": {
                "get": {
                    "operationId": "listPlans",
                    "summary": "Plans for a service type given by id or name",
                    "parameters": [
                        query_param("service_type_id", "Service type id", false, json!({ "type": "string" })),
                        query_param("service_type_name", "Service type name, resolved when no id is given", false, json!({ "type": "string" })),
                        query_param("page_size", "Maximum plans returned", false, page_size(10)),
                        query_param("from_date", "Only plans on or after this date", false, json!({ "type": "string", "format": "date" })),
                        query_param("to_date", "Only plans on or before this date", false, json!({ "type": "string", "format": "date" })),
                    ],
                    "responses": {
                        "200": json_response("Plans", json!({
                            "type": "object",
                            "properties": {
                                "count": { "type": "integer" },
                                "service_type_id": { "type": "string" },
                                "plans": { "type": "array", "items": { "$ref": "#/components/schemas/Plan" } },
                            },
                        })),
                        "400": error_response("No service type given and no default configured"),
                        "404": error_response("Service type not found"),
                    },
                },
            },
            "/services/plan": {
                "get": {
                    "operationId": "getPlan",
                    "summary": "One plan with times, needed positions and scheduled team members",
                    "parameters": [
                        query_param("plan_id", "Plan id", true, json!({ "type": "string" })),
                    ],
                    "responses": {
                        "200": json_response("Plan", json!({ "$ref": "#/components/schemas/Plan" })),
                        "404": error_response("Plan not found"),
                    },
                },
            },
        },
        "components": { "schemas": schemas() },
    })
}
