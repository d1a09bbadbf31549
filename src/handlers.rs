use crate::ai::{self, AiError};
use crate::errors::AppError;
use crate::ingest::parse_upload;
use crate::models::{
    AskForm, AskRequest, AskResponse, Comparison, CompareQuery, Dataset, DatasetSummary,
    HealthResponse, MoversReport, Report, ReportFilter, ReportQuery, RevenueTrends, Section,
    SummaryRequest,
};
use crate::state::AppState;
use crate::stats::{
    action_center_top10, build_report, compare_windows, daily_movers, filter_options,
    revenue_trends, RecordView,
};
use crate::ui::{render_page, PageView};
use axum::{
    extract::{multipart::MultipartError, Multipart, Query, State},
    http::StatusCode,
    response::{Html, Redirect},
    Form, Json,
};
use std::sync::Arc;
use tracing::{info, warn};

const MAX_WINDOW_DAYS: i64 = 3650;

pub async fn index(State(state): State<AppState>, Query(query): Query<ReportQuery>) -> Html<String> {
    let dataset = state.current_dataset().await;
    let view = page_view(&state, dataset.as_deref(), query.filter());
    Html(render_page(&view))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        dataset_loaded: state.current_dataset().await.is_some(),
    })
}

pub async fn upload(State(state): State<AppState>, multipart: Multipart) -> Result<Redirect, AppError> {
    store_upload(&state, multipart).await?;
    Ok(Redirect::to("/"))
}

pub async fn api_upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DatasetSummary>, AppError> {
    let dataset = store_upload(&state, multipart).await?;
    Ok(Json(summarize(&dataset)))
}

pub async fn dataset_summary(State(state): State<AppState>) -> Result<Json<DatasetSummary>, AppError> {
    let dataset = state.require_dataset().await?;
    Ok(Json(summarize(&dataset)))
}

pub async fn report(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Report>, AppError> {
    let dataset = state.require_dataset().await?;
    let settings = &state.settings;
    Ok(Json(build_report(
        &dataset,
        &query.filter(),
        settings.window_days,
        &settings.rules,
    )))
}

pub async fn compare(
    State(state): State<AppState>,
    Query(query): Query<CompareQuery>,
) -> Result<Json<Section<Comparison>>, AppError> {
    let days = query.days.unwrap_or(state.settings.window_days);
    if !(1..=MAX_WINDOW_DAYS).contains(&days) {
        return Err(AppError::bad_request(format!(
            "days must be between 1 and {MAX_WINDOW_DAYS}"
        )));
    }

    let dataset = state.require_dataset().await?;
    let filter = query.filter();
    let view = RecordView::new(&dataset, &filter);
    Ok(Json(compare_windows(
        &view,
        query.dimension.unwrap_or_default(),
        query.metric.unwrap_or_default(),
        days,
        &state.settings.rules,
    )))
}

pub async fn trends(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Section<RevenueTrends>>, AppError> {
    let dataset = state.require_dataset().await?;
    let filter = query.filter();
    Ok(Json(revenue_trends(
        &dataset,
        filter.advertiser.as_deref(),
        state.settings.window_days,
        &state.settings.rules,
    )))
}

pub async fn movers(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> Result<Json<Section<MoversReport>>, AppError> {
    let dataset = state.require_dataset().await?;
    let filter = query.filter();
    Ok(Json(daily_movers(&RecordView::new(&dataset, &filter))))
}

pub async fn ask(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let dataset = state.require_dataset().await?;
    let result = answer_question(
        &state,
        &dataset,
        &payload.filter,
        &payload.question,
        payload.api_key.as_deref(),
    )
    .await;
    Ok(Json(to_response(result)))
}

pub async fn ask_form(State(state): State<AppState>, Form(form): Form<AskForm>) -> Html<String> {
    let filter = ReportFilter {
        advertiser: form.advertiser,
        channel: form.channel,
        ad_format: form.ad_format,
    }
    .normalized();

    let dataset = state.current_dataset().await;
    let mut view = page_view(&state, dataset.as_deref(), filter.clone());
    if let Some(dataset) = dataset.as_deref() {
        let result =
            answer_question(&state, dataset, &filter, &form.question, Some(form.api_key.as_str())).await;
        view.question = form.question;
        view.ask = Some(to_response(result));
    }
    Html(render_page(&view))
}

pub async fn summary(
    State(state): State<AppState>,
    Json(payload): Json<SummaryRequest>,
) -> Result<Json<AskResponse>, AppError> {
    let dataset = state.require_dataset().await?;
    let filter = payload.filter.normalized();
    let view = RecordView::new(&dataset, &filter);
    let settings = &state.settings;

    let comparison = match action_center_top10(&view, settings.window_days, &settings.rules) {
        Section::Ready(comparison) => comparison,
        Section::Warning(message) => {
            return Ok(Json(AskResponse {
                answer: None,
                error: Some(message),
            }));
        }
    };
    let movers = daily_movers(&view);
    let prompt = ai::build_summary_prompt(&comparison, movers.ready());

    let result = match state.chat.resolve_key(payload.api_key.as_deref()) {
        Ok(key) => state.chat.complete(key, &prompt).await,
        Err(err) => Err(err),
    };
    Ok(Json(to_response(result)))
}

async fn answer_question(
    state: &AppState,
    dataset: &Dataset,
    filter: &ReportFilter,
    question: &str,
    api_key: Option<&str>,
) -> Result<String, AiError> {
    let key = state.chat.resolve_key(api_key)?;
    let view = RecordView::new(dataset, filter);
    let sample = ai::sample_csv(view.columns, &view.records)?;
    let prompt = ai::build_question_prompt(&sample, question)?;
    state.chat.complete(key, &prompt).await
}

fn to_response(result: Result<String, AiError>) -> AskResponse {
    match result {
        Ok(answer) => AskResponse {
            answer: Some(answer),
            error: None,
        },
        Err(err) => {
            warn!("AI request failed: {err}");
            AskResponse {
                answer: None,
                error: Some(ai::failure_text(&err)),
            }
        }
    }
}

async fn store_upload(state: &AppState, multipart: Multipart) -> Result<Arc<Dataset>, AppError> {
    let (file_name, bytes) = read_upload(multipart).await?;
    let dataset = parse_upload(&file_name, &bytes)?;
    for warning in &dataset.warnings {
        warn!(source = %dataset.source, "{warning}");
    }
    let dataset = state.replace_dataset(dataset).await;
    info!(source = %dataset.source, rows = dataset.records.len(), "dataset replaced");
    Ok(dataset)
}

async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), AppError> {
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(upload_error)?;
        if bytes.is_empty() {
            return Err(AppError::bad_request("uploaded file is empty"));
        }
        return Ok((file_name, bytes.to_vec()));
    }
    Err(AppError::bad_request("multipart field 'file' is required"))
}

fn upload_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::payload_too_large(err.body_text())
    } else {
        AppError::bad_request(err.body_text())
    }
}

fn summarize(dataset: &Dataset) -> DatasetSummary {
    DatasetSummary {
        source: dataset.source.clone(),
        rows: dataset.records.len(),
        columns: dataset.columns.iter().copied().collect(),
        warnings: dataset.warnings.clone(),
        options: filter_options(dataset),
    }
}

fn page_view(state: &AppState, dataset: Option<&Dataset>, filter: ReportFilter) -> PageView {
    let settings = &state.settings;
    match dataset {
        Some(dataset) => PageView {
            summary: Some(summarize(dataset)),
            report: Some(build_report(
                dataset,
                &filter,
                settings.window_days,
                &settings.rules,
            )),
            trends: Some(revenue_trends(
                dataset,
                filter.advertiser.as_deref(),
                settings.window_days,
                &settings.rules,
            )),
            filter,
            question: String::new(),
            ask: None,
        },
        None => PageView {
            filter,
            ..PageView::default()
        },
    }
}
