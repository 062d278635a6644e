use actix_web::error::JsonPayloadError;
use actix_web::http::StatusCode;
use actix_web::{HttpRequest, HttpResponse, ResponseError, web};
use actix_multipart::Multipart;
use futures::{StreamExt, TryStreamExt};
use shared::{
    ClassifyRequest, ClassifyResponse, ErrorResponse, HealthResponse, ModelStatus, TriageResponse,
    UrgencyRequest, UrgencyResponse, round2,
};
use uuid::Uuid;

use crate::triage::error::{InputError, TriageError};
use crate::triage::normalizer::ImageSample;
use crate::triage::pipeline::{FinalVerdict, TriagePipeline};

/// Per-file cap for multipart uploads.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimit(pub usize);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Triage(#[from] TriageError),
    #[error("Malformed multipart body: {0}")]
    Multipart(String),
    #[error("Malformed JSON body: {0}")]
    MalformedBody(String),
    #[error("Uploaded file exceeds {0} bytes")]
    PayloadTooLarge(usize),
    #[error("Internal server error")]
    Internal,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Triage(TriageError::Input(_))
            | ApiError::Triage(TriageError::Decode(_))
            | ApiError::Multipart(_)
            | ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Triage(TriageError::Classification(_)) | ApiError::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Model and runtime failures are reported generically; the details are
    /// only in the server log.
    fn error_response(&self) -> HttpResponse {
        let (error, reason) = match self {
            ApiError::Triage(TriageError::Input(e)) => (e.to_string(), e.reason()),
            ApiError::Triage(TriageError::Decode(_)) => {
                ("Could not decode image".to_string(), "undecodable_image")
            }
            ApiError::Multipart(_) => ("Malformed upload".to_string(), "malformed_upload"),
            ApiError::MalformedBody(_) => ("Malformed JSON body".to_string(), "malformed_body"),
            ApiError::PayloadTooLarge(_) => (self.to_string(), "image_too_large"),
            ApiError::Triage(TriageError::Classification(_)) => {
                ("Model inference failed".to_string(), "inference_failed")
            }
            ApiError::Internal => ("Internal server error".to_string(), "internal"),
        };
        HttpResponse::build(self.status_code()).json(ErrorResponse {
            error,
            reason: Some(reason.to_string()),
        })
    }
}

/// JSON extractor settings shared by the server and the route tests, so a
/// bad body gets the same error shape as every other rejection.
pub fn json_config(limit: usize) -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(limit)
        .error_handler(json_error)
}

fn json_error(err: JsonPayloadError, req: &HttpRequest) -> actix_web::Error {
    log::warn!("Rejected JSON body on {}: {}", req.path(), err);
    match err {
        JsonPayloadError::Overflow { limit } | JsonPayloadError::OverflowKnownLength { limit, .. } => {
            ApiError::PayloadTooLarge(limit).into()
        }
        other => ApiError::MalformedBody(other.to_string()).into(),
    }
}

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/").route(web::get().to(home)))
        .service(web::resource("/health").route(web::get().to(health)))
        .service(web::resource("/predict").route(web::post().to(handle_predict)))
        .service(web::resource("/classify").route(web::post().to(handle_classify)))
        .service(web::resource("/predict_urgency").route(web::post().to(handle_predict_urgency)));
}

async fn home() -> HttpResponse {
    HttpResponse::Ok().body("Civic issue triage API is running")
}

async fn health(pipeline: web::Data<TriagePipeline>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".into(),
        models: ModelStatus {
            image_classification: "loaded".into(),
            urgency_detection: "loaded".into(),
        },
        label_source: pipeline.gate().labels().source().into(),
    })
}

/// Runs inference on the blocking pool and logs failures against the
/// request id.
async fn run_blocking<T, F>(request_id: Uuid, job: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, TriageError> + Send + 'static,
    T: Send + 'static,
{
    match web::block(job).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(TriageError::Input(e))) => {
            log::warn!("[{}] Rejected input: {}", request_id, e);
            Err(ApiError::Triage(e.into()))
        }
        Ok(Err(e)) => {
            log::error!("[{}] Request failed: {:?}", request_id, e);
            Err(ApiError::Triage(e))
        }
        Err(e) => {
            log::error!("[{}] Blocking task failed: {:?}", request_id, e);
            Err(ApiError::Internal)
        }
    }
}

async fn handle_predict(
    pipeline: web::Data<TriagePipeline>,
    limit: web::Data<UploadLimit>,
    mut payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let mut images = Vec::new();
    let mut description = String::new();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| ApiError::Multipart(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let mime = field.content_type().map(|m| m.essence_str().to_string());

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ApiError::Multipart(e.to_string()))?;
            if data.len() + chunk.len() > limit.0 {
                log::warn!("[{}] Field {} exceeds {} bytes", request_id, name, limit.0);
                return Err(ApiError::PayloadTooLarge(limit.0));
            }
            data.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "images" | "image" if !data.is_empty() => {
                images.push(ImageSample::from_upload(data, mime.as_deref()));
            }
            "description" => {
                description = String::from_utf8(data).map_err(|_| {
                    log::warn!("[{}] Description is not valid UTF-8", request_id);
                    TriageError::Input(InputError::InvalidDescription)
                })?;
            }
            other => log::debug!("[{}] Ignoring multipart field '{}'", request_id, other),
        }
    }

    log::info!("[{}] /predict with {} image(s)", request_id, images.len());
    let threshold = pipeline.gate().threshold();
    let pipeline = pipeline.into_inner();
    let verdict = run_blocking(request_id, move || pipeline.triage(&images, &description)).await?;
    Ok(verdict_response(verdict, threshold))
}

fn verdict_response(verdict: FinalVerdict, threshold: f32) -> HttpResponse {
    match verdict {
        FinalVerdict::Denied { reason } => {
            HttpResponse::BadRequest().json(TriageResponse::Denied { reason })
        }
        FinalVerdict::Resubmit {
            issue_type,
            confidence,
        } => HttpResponse::Ok().json(TriageResponse::Resubmit {
            issue_type,
            confidence: round2(confidence),
            message: format!(
                "Confidence below {:.0}%. Please re-upload clearer images.",
                threshold * 100.0
            ),
        }),
        FinalVerdict::Success {
            issue_type,
            issue_confidence,
            urgency,
            urgency_confidence,
        } => HttpResponse::Ok().json(TriageResponse::Success {
            issue_type,
            issue_confidence: round2(issue_confidence),
            urgency,
            urgency_confidence: urgency_confidence.map(round2),
        }),
    }
}

async fn handle_classify(
    pipeline: web::Data<TriagePipeline>,
    body: web::Json<ClassifyRequest>,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let payload = body
        .into_inner()
        .image
        .filter(|image| !image.trim().is_empty())
        .ok_or(TriageError::Input(InputError::NoImage))?;
    let sample = ImageSample::from_base64(&payload).map_err(TriageError::from)?;

    log::info!("[{}] /classify ({} bytes)", request_id, sample.len());
    let pipeline = pipeline.into_inner();
    let (result, scores) = run_blocking(request_id, move || pipeline.classify_image(&sample)).await?;
    Ok(HttpResponse::Ok().json(ClassifyResponse::new(result.label, result.confidence, scores)))
}

async fn handle_predict_urgency(
    pipeline: web::Data<TriagePipeline>,
    body: web::Json<UrgencyRequest>,
) -> Result<HttpResponse, ApiError> {
    let request_id = Uuid::new_v4();
    let text = body.into_inner().text;

    log::info!("[{}] /predict_urgency", request_id);
    let pipeline = pipeline.into_inner();
    let result = run_blocking(request_id, move || pipeline.predict_urgency(&text)).await?;
    Ok(HttpResponse::Ok().json(UrgencyResponse::new(result.urgency, result.confidence)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage::gate::tests::ScriptedClassifier;
    use crate::triage::normalizer::tests::solid_png;
    use crate::triage::pipeline::tests::{Harness, harness};
    use actix_web::http::header;
    use actix_web::{App, test};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde_json::Value;
    use std::sync::atomic::Ordering;

    const BOUNDARY: &str = "triage-test-boundary";

    fn multipart_body(images: &[Vec<u8>], description: Option<&[u8]>) -> Vec<u8> {
        let mut body = Vec::new();
        for (i, image) in images.iter().enumerate() {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"images\"; filename=\"photo{}.png\"\r\nContent-Type: image/png\r\n\r\n",
                    BOUNDARY, i
                )
                .as_bytes(),
            );
            body.extend_from_slice(image);
            body.extend_from_slice(b"\r\n");
        }
        if let Some(description) = description {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"description\"\r\n\r\n",
                    BOUNDARY
                )
                .as_bytes(),
            );
            body.extend_from_slice(description);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn predict_request(images: usize, description: Option<&str>) -> test::TestRequest {
        let photos: Vec<Vec<u8>> = (0..images).map(|_| solid_png(40, 30, [90, 90, 90])).collect();
        multipart_request(multipart_body(&photos, description.map(str::as_bytes)))
    }

    fn multipart_request(body: Vec<u8>) -> test::TestRequest {
        test::TestRequest::post()
            .uri("/predict")
            .insert_header((
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            ))
            .set_payload(body)
    }

    macro_rules! app {
        ($harness:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($harness.pipeline.clone()))
                    .app_data(web::Data::new(UploadLimit(1024 * 1024)))
                    .app_data(json_config(1024 * 1024))
                    .configure(configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_predict_success() {
        let h: Harness = harness(vec![
            ScriptedClassifier::peaked(5, 0.9),
            ScriptedClassifier::peaked(5, 0.75),
        ]);
        let app = app!(h);
        let resp = test::call_service(
            &app,
            predict_request(2, Some("large pothole blocking traffic")).to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["issue_type"], "potholes");
        assert_eq!(body["urgency"], "High");
        assert!(body["urgency_confidence"].is_number());
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_predict_denied_skips_urgency() {
        let h = harness(vec![
            ScriptedClassifier::peaked(5, 0.95),
            ScriptedClassifier::peaked(2, 0.95),
        ]);
        let app = app!(h);
        let resp = test::call_service(&app, predict_request(2, Some("trash everywhere")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "denied");
        assert!(body["reason"].as_str().unwrap().contains("different problems"));
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_predict_resubmit() {
        let h = harness(vec![ScriptedClassifier::peaked(0, 0.5)]);
        let app = app!(h);
        let resp = test::call_service(&app, predict_request(1, Some("light is out")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "resubmit");
        assert_eq!(body["issue_type"], "broken_street_light");
        assert!(body["message"].as_str().unwrap().contains("80%"));
        assert!(body.get("urgency").is_none());
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_predict_input_errors() {
        let h = harness(vec![ScriptedClassifier::peaked(0, 0.9)]);
        let app = app!(h);

        let resp = test::call_service(&app, predict_request(1, Some("   ")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["reason"], "no_description");

        let resp = test::call_service(&app, predict_request(0, Some("pothole")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["reason"], "no_images");

        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_model_failure_is_generic() {
        let h = harness(vec![]);
        let app = app!(h);
        let resp = test::call_service(&app, predict_request(1, Some("open manhole")).to_request()).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "Model inference failed");
        assert!(!body.to_string().contains("script exhausted"));
    }

    #[actix_web::test]
    async fn test_classify_base64() {
        let h = harness(vec![ScriptedClassifier::peaked(7, 0.93)]);
        let app = app!(h);
        let image = STANDARD.encode(solid_png(16, 16, [0, 0, 200]));
        let req = test::TestRequest::post()
            .uri("/classify")
            .set_json(serde_json::json!({ "image": image }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["category"], "water_leakage");
        assert_eq!(body["predicted_category"], "water_leakage");
        assert_eq!(body["confidence"], body["accuracy"]);
        let all = body["all_predictions"].as_object().unwrap();
        assert_eq!(all.len(), 8);
        assert_eq!(all["water_leakage"], body["confidence"]);
    }

    #[actix_web::test]
    async fn test_classify_rejects_bad_payloads() {
        let h = harness(vec![]);
        let app = app!(h);

        let req = test::TestRequest::post()
            .uri("/classify")
            .set_json(serde_json::json!({}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["reason"], "no_image");

        let req = test::TestRequest::post()
            .uri("/classify")
            .set_json(serde_json::json!({ "image": STANDARD.encode(b"not a picture") }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["reason"], "undecodable_image");
    }

    #[actix_web::test]
    async fn test_predict_urgency() {
        let h = harness(vec![]);
        let app = app!(h);
        let req = test::TestRequest::post()
            .uri("/predict_urgency")
            .set_json(serde_json::json!({ "text": "exposed live wire on sidewalk" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["urgency"], "High");
        assert_eq!(body["predicted_urgency"], "High");
        assert!(body["confidence"].is_number());

        let req = test::TestRequest::post()
            .uri("/predict_urgency")
            .set_json(serde_json::json!({ "text": "" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_non_utf8_description_is_rejected() {
        let h = harness(vec![ScriptedClassifier::peaked(0, 0.9)]);
        let app = app!(h);
        let photo = solid_png(40, 30, [90, 90, 90]);
        let body = multipart_body(&[photo], Some(&b"street light \xff\xfe out"[..]));
        let resp = test::call_service(&app, multipart_request(body).to_request()).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["reason"], "invalid_description");
        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_malformed_json_gets_error_shape() {
        let h = harness(vec![]);
        let app = app!(h);

        let req = test::TestRequest::post()
            .uri("/predict_urgency")
            .insert_header((header::CONTENT_TYPE, "application/json"))
            .set_payload("{not json")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["reason"], "malformed_body");
        assert_eq!(body["error"], "Malformed JSON body");

        let req = test::TestRequest::post()
            .uri("/classify")
            .set_json(serde_json::json!({ "image": 42 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["reason"], "malformed_body");
        assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[actix_web::test]
    async fn test_failing_request_does_not_affect_concurrent_one() {
        let h = harness(vec![ScriptedClassifier::peaked(5, 0.95)]);
        let app = app!(h);

        let good = test::call_service(&app, predict_request(1, Some("deep pothole")).to_request());
        let bad = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/classify")
                .set_json(serde_json::json!({ "image": STANDARD.encode(b"not a picture") }))
                .to_request(),
        );
        let (good, bad) = futures::join!(good, bad);

        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(good.status(), StatusCode::OK);
        let body: Value = test::read_body_json(good).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["issue_type"], "potholes");
        assert_eq!(h.classifier.calls.load(Ordering::SeqCst), 1);
    }

    #[actix_web::test]
    async fn test_health() {
        let h = harness(vec![]);
        let app = app!(h);
        let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["label_source"], "default_categories");
    }
}
