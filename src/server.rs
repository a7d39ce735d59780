//! HTTP front end for sketch queries.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Error;
use crate::query::{Predictor, QueryResponse};

/// Form posted by the sketchpad page.
#[derive(Debug, Deserialize)]
pub struct SketchForm {
    /// Comma-separated ink intensities, row-major
    pub sketchpad_image: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub scenarios: usize,
}

pub struct AppError(Error);

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        AppError(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = if self.0.is_input_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        if status.is_server_error() {
            warn!(error = %self.0, "query failed");
        }

        let body = Json(serde_json::json!({
            "error": self.0.to_string()
        }));

        (status, body).into_response()
    }
}

pub async fn health(State(predictor): State<Arc<Predictor>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        scenarios: predictor.scenario_count(),
    })
}

/// Empty prediction state plus the stored scenario scores.
pub async fn initial(State(predictor): State<Arc<Predictor>>) -> Json<QueryResponse> {
    Json(predictor.initial_response())
}

pub async fn classify(
    State(predictor): State<Arc<Predictor>>,
    Form(form): Form<SketchForm>,
) -> Result<Json<QueryResponse>, AppError> {
    Ok(Json(predictor.process_pixels(&form.sketchpad_image)?))
}

pub fn create_router(predictor: Arc<Predictor>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/ANN", get(initial).post(classify))
        .with_state(predictor)
}

pub async fn serve(predictor: Predictor, addr: SocketAddr) -> anyhow::Result<()> {
    let app = create_router(Arc::new(predictor));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "serving sketch queries");
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ImageConfig, NetworkConfig, Scenario};
    use crate::network::Network;
    use axum::body::Body;
    use axum::http::{header, Request};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tower::ServiceExt;

    fn predictor() -> Arc<Predictor> {
        let config = Config {
            network: NetworkConfig {
                input_nodes: 4,
                hidden_nodes: 3,
                output_nodes: 10,
                learning_rate: 0.1,
            },
            image: ImageConfig {
                source_side: 4,
                target_side: 2,
            },
            scenarios: vec![Scenario::new(1, 1)],
            ..Config::default()
        };
        let net = Network::random(&config.network, &mut StdRng::seed_from_u64(1)).unwrap();
        Arc::new(Predictor::new(config, vec![net], vec!["50.00%".to_string()]))
    }

    fn post(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ANN")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_returns_initial_state() {
        let app = create_router(predictor());
        let response = app
            .oneshot(Request::builder().uri("/ANN").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_classifies_sketch() {
        let app = create_router(predictor());
        let pixels = "0%2C0%2C255%2C255%2C0%2C0%2C255%2C255%2C0%2C0%2C0%2C0%2C0%2C0%2C0%2C9";
        let response = app
            .oneshot(post(&format!("sketchpad_image={pixels}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_post_with_wrong_length_is_bad_request() {
        let app = create_router(predictor());
        let response = app.oneshot(post("sketchpad_image=1%2C2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
