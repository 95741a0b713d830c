use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use log::{debug, error, info, warn};
use serde::Serialize;
use tower_http::services::ServeDir;

mod catalog;
use catalog::Catalog;
mod model;
use model::{Metrics, MockPredictor, ModelCategory, ModelIndex, PredictionSource};
mod page;
mod upload;
use upload::{UploadError, UploadStore, UploadedFile};
mod utils;
use utils::{ensure_catalog_exists, Config};

const STATIC_URL: &str = "/static";
const DEFAULT_MODEL_TYPE: &str = "custom_model";

/// Everything handlers need, built once before serving and never mutated.
struct AppState {
    catalog: Catalog,
    classes: Vec<String>,
    models: ModelIndex,
    predictor: Arc<dyn PredictionSource>,
    uploads: UploadStore,
    static_dir: PathBuf,
}

impl AppState {
    fn new(
        catalog: Catalog,
        models: ModelIndex,
        predictor: Arc<dyn PredictionSource>,
        static_dir: PathBuf,
        uploads_dir: PathBuf,
    ) -> Self {
        let uploads = UploadStore::new(uploads_dir, format!("{STATIC_URL}/uploads"));
        Self {
            classes: catalog.list_classes(),
            catalog,
            models,
            predictor,
            uploads,
            static_dir,
        }
    }
}

#[derive(Debug, Serialize)]
struct PredictResponse {
    success: bool,
    image_url: String,
    predicted_class: String,
    selected_class: String,
    model_used: String,
    confidence: String,
    #[serde(flatten)]
    metrics: Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    ensure_catalog_exists(&config).await?;

    let catalog = Catalog::load(&config.catalog_path)?;
    info!("Loaded {} classes from {}", catalog.len(), config.catalog_path.display());

    let models = ModelIndex::scan(&config.models_dir);
    for category in ModelCategory::ALL {
        info!(
            "{}: {} model file(s)",
            category.form_name(),
            models.files(category).len()
        );
    }

    let predictor = Arc::new(MockPredictor::new(models.clone()));
    let state = AppState::new(
        catalog,
        models,
        predictor,
        config.static_dir.clone(),
        config.uploads_dir(),
    );
    state
        .uploads
        .ensure_root()
        .await
        .with_context(|| format!("Failed to create {}", state.uploads.root().display()))?;

    let app = app(Arc::new(state), config.body_limit_bytes);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("Server error")
}

fn app(state: Arc<AppState>, body_limit_bytes: usize) -> Router {
    let static_files = ServeDir::new(&state.static_dir);

    Router::new()
        .route("/", get(index_handler))
        .route("/predict", post(predict_handler))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .with_state(state)
        .nest_service(STATIC_URL, static_files)
        .route("/health", get(health_check))
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    let sample_image = state
        .static_dir
        .join(page::SAMPLE_IMAGE)
        .exists()
        .then(|| format!("{STATIC_URL}/{}", page::SAMPLE_IMAGE));

    Html(page::render_landing(
        &state.classes,
        &state.catalog,
        sample_image.as_deref(),
        &state.models,
    ))
}

async fn predict_handler(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PredictResponse>, UploadError> {
    // a body that is not multipart carries no file field
    let mut multipart = multipart.map_err(|rejection| {
        warn!("Rejected upload: {rejection}");
        UploadError::NoFileProvided
    })?;

    let mut file = None;
    let mut selected_class = String::new();
    let mut model_type = DEFAULT_MODEL_TYPE.to_string();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                let bytes = field.bytes().await?.to_vec();
                file = Some(UploadedFile { file_name, bytes });
            }
            Some("selected_class") => selected_class = field.text().await?,
            Some("model_type") => model_type = field.text().await?,
            _ => {}
        }
    }

    let stored = state.uploads.accept(file).await.map_err(|err| {
        match &err {
            UploadError::Storage(source) => error!("Storing upload failed: {source}"),
            other => warn!("Rejected upload: {other}"),
        }
        err
    })?;

    debug!("Stored upload at {}", stored.path.display());

    let prediction = state
        .predictor
        .predict(&model_type, &selected_class, &state.classes);
    info!(
        "{} -> {} ({}, {}%)",
        stored.file_name, prediction.predicted_class, prediction.model_used, prediction.confidence
    );

    Ok(Json(PredictResponse {
        success: true,
        image_url: stored.url,
        predicted_class: prediction.predicted_class,
        selected_class,
        model_used: prediction.model_used,
        // shortest round-trip form, so 87.0 stays "87.0"
        confidence: format!("{:?}", prediction.confidence),
        metrics: prediction.metrics,
    }))
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "OK" }))
}
