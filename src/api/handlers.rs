use crate::api::AppState;
use crate::chatbot::ChatReply;
use crate::error::{AppError, InsufficientData, Result};
use crate::ml::{EvaluationMetrics, ModelInfo, RiskClass, RiskPrediction};
use crate::models::{
    LineStatus, TowerLocation, TransmissionLine, TrippingIncident, VoltageClass,
};
use crate::state::{IncidentFilter, LineFilter, TowerFilter};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        model_trained: state.registry.is_trained(),
    }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub model_trained: bool,
}

/// Prometheus metrics endpoint
///
/// Returns metrics in Prometheus text exposition format
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::gather_metrics(),
    )
}

// ---------------------------------------------------------------------------
// Risk model
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PredictionQuery {
    /// Lowest risk class to include (0, 1 or 2)
    pub min_risk: Option<u8>,
    pub limit: Option<usize>,
    /// Score as of this date instead of today
    pub as_of: Option<NaiveDate>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub predictions: Vec<RiskPrediction>,
    pub skipped: usize,
    pub generated_at: DateTime<Utc>,
    pub model_info: ModelInfo,
}

/// Risk predictions for all active lines, riskiest first
pub async fn predictive_maintenance(
    State(state): State<AppState>,
    Query(query): Query<PredictionQuery>,
) -> Result<Json<PredictionResponse>> {
    let min_risk = query
        .min_risk
        .map(RiskClass::try_from)
        .transpose()
        .map_err(AppError::Validation)?;
    let as_of = query.as_of.unwrap_or_else(|| Utc::now().date_naive());

    let batch = state.predictions.predict_batch(as_of).await?;

    let mut predictions: Vec<RiskPrediction> = batch
        .predictions
        .into_iter()
        .filter(|p| min_risk.map_or(true, |min| p.predicted_risk >= min))
        .collect();
    sort_predictions(&mut predictions);
    if let Some(limit) = query.limit {
        predictions.truncate(limit);
    }

    Ok(Json(PredictionResponse {
        predictions,
        skipped: batch.skipped,
        generated_at: batch.generated_at,
        model_info: ModelInfo::from_trained(&batch.model),
    }))
}

/// Risk class descending, then probability descending, then line id
pub fn sort_predictions(predictions: &mut [RiskPrediction]) {
    predictions.sort_by(|a, b| {
        b.predicted_risk
            .cmp(&a.predicted_risk)
            .then(b.risk_probability.total_cmp(&a.risk_probability))
            .then(a.line_id.cmp(&b.line_id))
    });
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrainModelResponse {
    Trained {
        metrics: EvaluationMetrics,
    },
    InsufficientData {
        #[serde(flatten)]
        details: InsufficientData,
    },
}

/// Retrain the risk model on the current store contents
pub async fn train_model(State(state): State<AppState>) -> Result<Json<TrainModelResponse>> {
    match state.trainer.train_all().await {
        Ok(metrics) => Ok(Json(TrainModelResponse::Trained { metrics })),
        Err(AppError::InsufficientSamples(details)) => {
            Ok(Json(TrainModelResponse::InsufficientData { details }))
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelMetricsResponse {
    Trained(EvaluationMetrics),
    Untrained(InsufficientData),
}

/// Evaluation metrics of the published model
pub async fn model_metrics(State(state): State<AppState>) -> Json<ModelMetricsResponse> {
    match state.reporter.get_metrics() {
        Ok(metrics) => Json(ModelMetricsResponse::Trained(metrics)),
        Err(details) => Json(ModelMetricsResponse::Untrained(details)),
    }
}

/// Name, version and hyperparameters of the published model
pub async fn model_info(State(state): State<AppState>) -> Result<Json<ModelInfo>> {
    state
        .reporter
        .model_info()
        .map(Json)
        .ok_or(AppError::ModelNotTrained)
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChatRequest {
    #[validate(length(min = 1, max = 1000))]
    pub message: String,
}

/// Keyword assistant
pub async fn chatbot(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>> {
    request.validate()?;
    Ok(Json(state.chatbot.respond(&request.message).await?))
}

// ---------------------------------------------------------------------------
// Transmission lines
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListLinesQuery {
    pub status: Option<LineStatus>,
    pub voltage_level: Option<VoltageClass>,
}

pub async fn list_lines(
    State(state): State<AppState>,
    Query(params): Query<ListLinesQuery>,
) -> Result<Json<Vec<TransmissionLine>>> {
    let filter = LineFilter {
        status: params.status,
        voltage_level: params.voltage_level,
    };
    Ok(Json(state.store.list_lines(&filter).await?))
}

pub async fn create_line(
    State(state): State<AppState>,
    Json(line): Json<TransmissionLine>,
) -> Result<(StatusCode, Json<TransmissionLine>)> {
    line.validate()?;
    let created = state.store.create_line(line).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_line(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<TransmissionLine>> {
    state
        .store
        .get_line(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Transmission line {} not found", id)))
}

/// Replace a line; the id in the path wins over the body
pub async fn update_line(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Json(mut line): Json<TransmissionLine>,
) -> Result<Json<TransmissionLine>> {
    line.validate()?;
    line.id = id;
    state.store.update_line(&line).await?;
    Ok(Json(line))
}

pub async fn delete_line(State(state): State<AppState>, Path(id): Path<u64>) -> Result<StatusCode> {
    state.store.delete_line(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Tripping incidents
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListIncidentsQuery {
    pub line_id: Option<u64>,
    pub since: Option<NaiveDate>,
}

pub async fn list_incidents(
    State(state): State<AppState>,
    Query(params): Query<ListIncidentsQuery>,
) -> Result<Json<Vec<TrippingIncident>>> {
    let filter = IncidentFilter {
        line_id: params.line_id,
        since: params.since,
    };
    Ok(Json(state.store.list_incidents(&filter).await?))
}

pub async fn create_incident(
    State(state): State<AppState>,
    Json(incident): Json<TrippingIncident>,
) -> Result<(StatusCode, Json<TrippingIncident>)> {
    incident.validate()?;
    let created = state.store.create_incident(incident).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<TrippingIncident>> {
    state
        .store
        .get_incident(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Tripping incident {} not found", id)))
}

pub async fn delete_incident(State(state): State<AppState>, Path(id): Path<u64>) -> Result<StatusCode> {
    state.store.delete_incident(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Tower locations
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct ListTowersQuery {
    pub line_id: Option<u64>,
    #[serde(default)]
    pub poor_only: bool,
}

pub async fn list_towers(
    State(state): State<AppState>,
    Query(params): Query<ListTowersQuery>,
) -> Result<Json<Vec<TowerLocation>>> {
    let filter = TowerFilter {
        line_id: params.line_id,
        poor_only: params.poor_only,
    };
    Ok(Json(state.store.list_towers(&filter).await?))
}

pub async fn create_tower(
    State(state): State<AppState>,
    Json(tower): Json<TowerLocation>,
) -> Result<(StatusCode, Json<TowerLocation>)> {
    tower.validate()?;
    let created = state.store.create_tower(tower).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_tower(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<TowerLocation>> {
    state
        .store
        .get_tower(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Tower {} not found", id)))
}

pub async fn delete_tower(State(state): State<AppState>, Path(id): Path<u64>) -> Result<StatusCode> {
    state.store.delete_tower(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VoltageClass;

    fn prediction(line_id: u64, risk: RiskClass, probability: f64) -> RiskPrediction {
        RiskPrediction {
            line_id,
            line_name: format!("LINE-{}", line_id),
            voltage_level: VoltageClass::Kv220,
            line_age: 10.0,
            recent_incidents: 0,
            predicted_risk: risk,
            risk_probability: probability,
        }
    }

    #[test]
    fn test_sort_predictions() {
        let mut predictions = vec![
            prediction(4, RiskClass::Low, 0.9),
            prediction(3, RiskClass::High, 0.6),
            prediction(2, RiskClass::High, 0.8),
            prediction(1, RiskClass::High, 0.6),
            prediction(5, RiskClass::Medium, 0.7),
        ];
        sort_predictions(&mut predictions);

        let order: Vec<u64> = predictions.iter().map(|p| p.line_id).collect();
        assert_eq!(order, vec![2, 1, 3, 5, 4]);
    }

    #[test]
    fn test_train_response_shapes() {
        let body = serde_json::to_value(TrainModelResponse::InsufficientData {
            details: InsufficientData::below_minimum(4, 10),
        })
        .unwrap();
        assert_eq!(body["status"], "insufficient_data");
        assert_eq!(body["current_samples"], 4);
        assert_eq!(body["error"], "Not enough data for training");

        let body = serde_json::to_value(ModelMetricsResponse::Untrained(
            InsufficientData::not_trained(0),
        ))
        .unwrap();
        assert_eq!(body["error"], "Model not trained");
        assert!(body.get("status").is_none());
    }
}
