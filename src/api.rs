// API routes and handlers
use actix_multipart::{Multipart, MultipartError};
use actix_web::{get, http::header, post, route, web, HttpRequest, HttpResponse, Responder};
use futures_util::TryStreamExt;
use image::{DynamicImage, ImageDecoder, ImageFormat, ImageReader};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use crate::error::{Result, ServiceError};
use crate::state::AppState;
use crate::temp_files::TempUpload;
use crate::time::iso_now;
use crate::DEFAULT_MODEL;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub models_loaded: Vec<String>,
    pub models_directory: String,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct PreloadResponse {
    pub status: &'static str,
    pub model: String,
    pub downloaded: bool,
    pub path: String,
}

#[derive(Debug, Serialize)]
pub struct RouteInfo {
    pub endpoint: &'static str,
    pub methods: &'static [&'static str],
    pub path: &'static str,
}

#[derive(Deserialize)]
struct ModelParams {
    model: Option<String>,
}

/// Everything registered by [`configure`].
pub const ROUTES: &[RouteInfo] = &[
    RouteInfo { endpoint: "health", methods: &["GET", "POST"], path: "/health" },
    RouteInfo { endpoint: "debug_routes", methods: &["GET"], path: "/debug-routes" },
    RouteInfo { endpoint: "preload_model", methods: &["POST"], path: "/preload-model" },
    RouteInfo { endpoint: "remove_background", methods: &["POST"], path: "/remove-background" },
];

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(debug_routes)
        .service(preload_model)
        .service(remove_background);
}

#[route("/health", method = "GET", method = "POST")]
pub async fn health(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        models_loaded: state.models.loaded_models(),
        models_directory: state.models.models_dir().display().to_string(),
        timestamp: iso_now(),
    })
}

#[get("/debug-routes")]
pub async fn debug_routes() -> impl Responder {
    HttpResponse::Ok().json(ROUTES)
}

#[post("/preload-model")]
pub async fn preload_model(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse> {
    let form = FormData::read(&req, payload, state.max_upload_bytes).await?;
    let model_name = form
        .model()
        .or_else(|| query_model(&req))
        .unwrap_or_else(|| DEFAULT_MODEL.to_string());
    info!("/preload-model requested for: {model_name}");

    let loader = state.clone();
    let name = model_name.clone();
    run_blocking(move || loader.models.get_or_load(&name).map(|_| ()))
        .await
        .inspect_err(|e| error!("Error in /preload-model: {e}"))?;

    let path = state.models.weights_path(&model_name);
    Ok(HttpResponse::Ok().json(PreloadResponse {
        status: "ok",
        model: model_name,
        downloaded: path.exists(),
        path: path.display().to_string(),
    }))
}

#[post("/remove-background")]
pub async fn remove_background(
    state: web::Data<AppState>,
    req: HttpRequest,
    payload: web::Payload,
) -> Result<HttpResponse> {
    let mut form = FormData::read(&req, payload, state.max_upload_bytes).await?;
    let Some(image) = form.files.remove("image") else {
        warn!("Request missing image file");
        return Err(ServiceError::BadRequest("No image provided".to_string()));
    };
    let model_name = form.model().unwrap_or_else(|| DEFAULT_MODEL.to_string());
    info!("/remove-background called with model: {model_name}");

    let worker = state.clone();
    let name = model_name.clone();
    let png = run_blocking(move || process_upload(&worker, &name, &image))
        .await
        .inspect_err(|e| error!("Error in /remove-background: {e}"))?;

    info!("Successfully processed image with model {model_name}");
    Ok(HttpResponse::Ok().content_type("image/png").body(png))
}

/// Persists the upload, cuts out the background and returns PNG bytes.
/// The temp file is removed on every exit path.
pub fn process_upload(state: &AppState, model_name: &str, bytes: &[u8]) -> Result<Vec<u8>> {
    let upload = TempUpload::persist(&state.temp_files, bytes)
        .map_err(|e| ServiceError::processing(format!("failed to save upload: {e}")))?;

    let image = decode_upload(upload.path()).map_err(ServiceError::processing)?;

    let session = state.models.get_or_load(model_name)?;
    let cutout = session
        .remove_background(image)
        .map_err(|e| ServiceError::processing(format!("{e:#}")))?;

    let mut png = Vec::new();
    DynamicImage::ImageRgba8(cutout)
        .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
        .map_err(ServiceError::processing)?;
    Ok(png)
}

/// Decodes by content rather than extension and turns the image upright per its EXIF orientation.
pub fn decode_upload(path: &Path) -> image::ImageResult<DynamicImage> {
    let mut decoder = ImageReader::open(path)?.with_guessed_format()?.into_decoder()?;
    let orientation = decoder.orientation()?;
    let mut image = DynamicImage::from_decoder(decoder)?;
    image.apply_orientation(orientation);
    Ok(image)
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    web::block(f).await.map_err(ServiceError::processing)?
}

fn query_model(req: &HttpRequest) -> Option<String> {
    web::Query::<ModelParams>::from_query(req.query_string())
        .ok()
        .and_then(|params| params.into_inner().model)
        .filter(|model| !model.is_empty())
}

/// Text fields and uploaded files of a form body.
#[derive(Debug, Default)]
struct FormData {
    fields: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
}

impl FormData {
    /// Reads multipart or urlencoded bodies. Anything else yields an empty form.
    async fn read(req: &HttpRequest, payload: web::Payload, limit: usize) -> Result<Self> {
        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            Self::read_multipart(Multipart::new(req.headers(), payload), limit).await
        } else if content_type.starts_with("application/x-www-form-urlencoded") {
            let body = payload
                .to_bytes_limited(limit)
                .await
                .map_err(|_| upload_too_large(limit))?
                .map_err(|e| ServiceError::BadRequest(e.to_string()))?;
            let body = std::str::from_utf8(&body)
                .map_err(|e| ServiceError::BadRequest(format!("invalid form body: {e}")))?;
            let fields = web::Query::<HashMap<String, String>>::from_query(body)
                .map_err(|e| ServiceError::BadRequest(e.to_string()))?
                .into_inner();
            Ok(Self {
                fields,
                files: HashMap::new(),
            })
        } else {
            Ok(Self::default())
        }
    }

    async fn read_multipart(mut multipart: Multipart, limit: usize) -> Result<Self> {
        let mut form = Self::default();
        let mut total = 0usize;
        while let Some(mut field) = multipart.try_next().await.map_err(malformed)? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            let is_file = field
                .content_disposition()
                .and_then(|cd| cd.get_filename())
                .is_some();

            let mut data = Vec::new();
            while let Some(chunk) = field.try_next().await.map_err(malformed)? {
                total += chunk.len();
                if total > limit {
                    return Err(upload_too_large(limit));
                }
                data.extend_from_slice(&chunk);
            }

            if is_file {
                form.files.insert(name, data);
            } else {
                form.fields
                    .insert(name, String::from_utf8_lossy(&data).into_owned());
            }
        }
        Ok(form)
    }

    fn model(&self) -> Option<String> {
        self.fields
            .get("model")
            .map(|model| model.trim())
            .filter(|model| !model.is_empty())
            .map(str::to_owned)
    }
}

fn malformed(err: MultipartError) -> ServiceError {
    ServiceError::BadRequest(format!("invalid multipart body: {err}"))
}

fn upload_too_large(limit: usize) -> ServiceError {
    ServiceError::BadRequest(format!("Upload exceeds {} MB", limit / (1024 * 1024)))
}
