use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse};
use tracing::{debug, error, info, warn};

use crate::codec::{Review, ReviewCodec};
use crate::config::InjectionConfig;
use crate::metrics::{Decision, InjectorMetrics};
use crate::patch::build_patch;
use crate::policy::is_mutation_required;

pub const MUTATE_PATH: &str = "/mutate";

/// Room for an UPDATE review carrying both `object` and `oldObject` near the etcd size limit.
const MAX_BODY_BYTES: usize = 3 * 1024 * 1024;

pub struct AppState {
    pub config: InjectionConfig,
    pub codec: Box<dyn ReviewCodec>,
    pub metrics: InjectorMetrics,
}

pub type SharedState = Arc<AppState>;

/// Only the mutation endpoint is routed; anything else gets the router's 404.
pub fn webhook_router(state: SharedState) -> Router {
    Router::new()
        .route(MUTATE_PATH, post(handle_mutate))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

pub async fn handle_mutate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let start = Instant::now();

    if body.is_empty() {
        warn!("rejecting admission request with empty body");
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if content_type != "application/json" {
        warn!(%content_type, "rejecting admission request, expected application/json");
        return (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "invalid Content-Type, expect `application/json`",
        )
            .into_response();
    }

    let (response, decision) = match state.codec.decode(&body) {
        Ok(review) => mutate(&state, review),
        Err(e) => {
            let mut response = AdmissionResponse::invalid(e.to_string());
            if let Some(uid) = state.codec.request_uid(&body) {
                response.uid = uid;
            }
            warn!(uid = %response.uid, "{e}");
            (response, Decision::Error)
        }
    };

    state.metrics.record_decision(decision);
    state
        .metrics
        .record_response(response.allowed, decision == Decision::Patched);

    let encoded = state.codec.encode(&response.into_review());
    state
        .metrics
        .admission_request_duration_seconds
        .observe(start.elapsed().as_secs_f64());

    match encoded {
        Ok(bytes) => {
            debug!("writing admission response");
            ([(header::CONTENT_TYPE, "application/json")], bytes).into_response()
        }
        Err(e) => {
            error!("{e}");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Runs one decoded review through parse, policy and patch.
///
/// Failures after the envelope is decoded still echo the request UID.
fn mutate(state: &AppState, review: Review) -> (AdmissionResponse, Decision) {
    let req: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(r) => r,
        Err(e) => {
            warn!("AdmissionReview missing request field: {e}");
            return (
                AdmissionResponse::invalid(format!("missing request field in AdmissionReview: {e}")),
                Decision::Error,
            );
        }
    };

    info!(
        uid = %req.uid,
        kind = %req.kind.kind,
        namespace = ?req.namespace,
        name = %req.name,
        operation = ?req.operation,
        user = ?req.user_info.username,
        "received admission review"
    );
    state
        .metrics
        .record_request(format!("{:?}", req.operation).to_uppercase());

    let response = AdmissionResponse::from(&req);

    let Some(object) = req.object else {
        warn!(uid = %req.uid, "admission request carries no object");
        return (
            response.deny("admission request carries no object"),
            Decision::Error,
        );
    };

    let pod = match object.try_parse::<Pod>() {
        Ok(pod) => pod,
        Err(e) => {
            warn!(uid = %req.uid, "could not parse object as a pod: {e}");
            return (
                response.deny(format!("could not parse object as a pod: {e}")),
                Decision::Error,
            );
        }
    };

    let namespace = pod
        .metadata
        .namespace
        .as_deref()
        .or(req.namespace.as_deref())
        .unwrap_or_default();
    let name = pod
        .metadata
        .name
        .as_deref()
        .or(pod.metadata.generate_name.as_deref())
        .unwrap_or("<unknown>");

    if !is_mutation_required(&state.config, namespace, name, pod.metadata.labels.as_ref()) {
        debug!(uid = %req.uid, %namespace, %name, "skipping mutation due to policy check");
        return (response, Decision::Skipped);
    }

    let containers = pod
        .spec
        .as_ref()
        .map(|spec| spec.containers.as_slice())
        .unwrap_or_default();
    let patch = build_patch(&state.config, containers);
    let decision = if patch.0.is_empty() {
        Decision::NoTarget
    } else {
        Decision::Patched
    };

    match response.clone().with_patch(patch) {
        Ok(patched) => {
            info!(uid = %req.uid, %namespace, %name, decision = decision.as_str(), "admitted pod");
            (patched, decision)
        }
        Err(e) => {
            error!(uid = %req.uid, "failed to serialize patch: {e}");
            (response.deny(format!("failed to serialize patch: {e}")), Decision::Error)
        }
    }
}
