//! Validating admission for `NetworkPerformanceTest`
//!
//! Rejects writes whose spec the controller cannot run. Deletes carry no object and
//! are always allowed.

use axum::Json;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info};

use crate::crds::{NetworkPerformanceTest, NetworkPerformanceTestSpec};

/// Denial reason for any iteration count other than one
pub const ITERATIONS_DENIED_REASON: &str = "spec.iterations must be equal to 1 in current release";

/// Only single-iteration runs are supported
pub fn validate_spec(spec: &NetworkPerformanceTestSpec) -> Result<(), String> {
    if spec.iterations != 1 {
        return Err(ITERATIONS_DENIED_REASON.to_string());
    }
    Ok(())
}

/// Handle a validating admission review
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review_test(&req).into_review())
}

fn review_test(req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let Some(obj) = &req.object else {
        debug!(uid = %req.uid, operation = ?req.operation, "No object in request, allowing");
        return AdmissionResponse::from(req);
    };

    let test: NetworkPerformanceTest =
        match serde_json::to_value(obj).and_then(serde_json::from_value) {
            Ok(test) => test,
            Err(e) => {
                error!(uid = %req.uid, error = %e, "Could not decode NetworkPerformanceTest");
                let mut response =
                    AdmissionResponse::invalid(format!("invalid NetworkPerformanceTest: {e}"));
                response.uid.clone_from(&req.uid);
                return response;
            }
        };

    match validate_spec(&test.spec) {
        Ok(()) => AdmissionResponse::from(req),
        Err(reason) => {
            info!(
                uid = %req.uid,
                test = ?test.metadata.name,
                iterations = test.spec.iterations,
                "Denying NetworkPerformanceTest"
            );
            AdmissionResponse::from(req).deny(reason)
        }
    }
}
