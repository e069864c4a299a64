use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pkg_types::access::{AccessRequest, ResourceRef, Verdict};
use pkg_types::action::AuthzedAction;
use pkg_types::rbac::Subject;
use pkg_types::validate::{normalize_resource_ref, validate_access_request};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::AppState;

/// A subject as shorthand (`sa:<ns>:<name>`, `user:<name>`, ...) or spelled out.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubjectSpec {
    Shorthand(String),
    Full(Subject),
}

impl SubjectSpec {
    fn resolve(self) -> Result<Subject, String> {
        match self {
            SubjectSpec::Shorthand(s) => s.parse().map_err(|e| format!("{}", e)),
            SubjectSpec::Full(subject) => Ok(subject),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeBody {
    pub subject: SubjectSpec,
    #[serde(default)]
    pub groups: Vec<String>,
    pub verb: String,
    pub resource: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub api_group: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActionsBody {
    pub subject: SubjectSpec,
    #[serde(default)]
    pub groups: Vec<String>,
    pub actions: Vec<AuthzedAction>,
    pub resource: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub api_group: Option<String>,
    #[serde(default)]
    pub resource_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PermittedBody {
    pub subject: SubjectSpec,
    #[serde(default)]
    pub groups: Vec<String>,
    pub verb: String,
    pub resources: Vec<ResourceRef>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerdictResponse {
    pub verdict: Verdict,
    pub allowed: bool,
    /// Whether every watched kind has completed a list.
    pub synced: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PermittedResponse {
    pub resources: Vec<ResourceRef>,
}

fn bad_request(msg: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, msg.into()).into_response()
}

/// Verdicts are withheld while the service's own permissions are missing.
fn unauthorized_service(state: &AppState) -> Option<Response> {
    if state.health.state().authorized {
        return None;
    }
    warn!("Refusing authorization request: service lacks RBAC watch permissions");
    Some(
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "authorization unavailable: service lacks RBAC watch permissions",
        )
            .into_response(),
    )
}

fn verdict_response(state: &AppState, verdict: Verdict) -> Response {
    let body = VerdictResponse {
        verdict,
        allowed: verdict.is_allowed(),
        synced: state.health.state().synced(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn access_request(
    subject: SubjectSpec,
    groups: Vec<String>,
    verb: String,
    resource: String,
    namespace: Option<String>,
    api_group: Option<String>,
    resource_name: Option<String>,
) -> Result<AccessRequest, String> {
    let req = AccessRequest {
        subject: subject.resolve()?,
        groups,
        verb,
        resource,
        namespace: namespace.filter(|ns| !ns.is_empty()),
        api_group,
        resource_name,
    };
    validate_access_request(&req).map_err(|e| e.to_string())?;
    Ok(req)
}

/// POST /api/v1/authorize
pub async fn authorize(
    State(state): State<AppState>,
    Json(body): Json<AuthorizeBody>,
) -> impl IntoResponse {
    if let Some(resp) = unauthorized_service(&state) {
        return resp;
    }
    let req = match access_request(
        body.subject,
        body.groups,
        body.verb,
        body.resource,
        body.namespace,
        body.api_group,
        body.resource_name,
    ) {
        Ok(req) => req,
        Err(e) => return bad_request(e),
    };
    let verdict = state.authorizer.authorize(&req);
    verdict_response(&state, verdict)
}

/// POST /api/v1/authorize/actions
pub async fn authorize_actions(
    State(state): State<AppState>,
    Json(body): Json<ActionsBody>,
) -> impl IntoResponse {
    if let Some(resp) = unauthorized_service(&state) {
        return resp;
    }
    if body.actions.is_empty() {
        return bad_request("actions must not be empty");
    }
    // The verb is replaced per expanded action.
    let base = match access_request(
        body.subject,
        body.groups,
        "*".to_string(),
        body.resource,
        body.namespace,
        body.api_group,
        body.resource_name,
    ) {
        Ok(req) => req,
        Err(e) => return bad_request(e),
    };
    let verdict = state.authorizer.authorize_actions(&base, &body.actions);
    debug!(
        subject = %base.subject,
        actions = body.actions.len(),
        verdict = verdict.as_str(),
        "Authorized actions"
    );
    verdict_response(&state, verdict)
}

/// POST /api/v1/permitted
pub async fn permitted(
    State(state): State<AppState>,
    Json(body): Json<PermittedBody>,
) -> impl IntoResponse {
    if let Some(resp) = unauthorized_service(&state) {
        return resp;
    }
    let subject = match body.subject.resolve() {
        Ok(s) => s,
        Err(e) => return bad_request(e),
    };
    if body.verb.trim().is_empty() {
        return bad_request("verb must not be empty");
    }
    let resources = match body
        .resources
        .into_iter()
        .map(normalize_resource_ref)
        .collect::<anyhow::Result<Vec<_>>>()
    {
        Ok(resources) => resources,
        Err(e) => return bad_request(e.to_string()),
    };
    let base = AccessRequest::new(subject, body.verb, "").with_groups(body.groups);
    let resources = state.authorizer.permitted(&base, resources);
    (StatusCode::OK, Json(PermittedResponse { resources })).into_response()
}
