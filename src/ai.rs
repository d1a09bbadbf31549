//! Chat-completion client for the "ask about your data" and summary panels.
//!
//! Speaks the OpenAI-compatible `/chat/completions` format. API keys arrive
//! per request and are never stored or logged.

use crate::config::Settings;
use crate::format;
use crate::models::{Column, Comparison, MoversReport, RevenueRecord};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use tracing::{info, warn};

pub const SAMPLE_ROWS: usize = 25;
const TEMPERATURE: f32 = 0.3;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("an API key is required")]
    MissingKey,
    #[error("the question is empty")]
    EmptyQuestion,
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response contained no answer")]
    EmptyResponse,
    #[error("failed to encode sample rows: {0}")]
    Sample(#[from] csv::Error),
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    fallback_key: Option<String>,
}

impl ChatClient {
    pub fn new(settings: &Settings) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(settings.ai_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: settings.openai_base_url.clone(),
            model: settings.openai_model.clone(),
            fallback_key: settings.openai_api_key.clone(),
        })
    }

    /// Picks the caller's key, falling back to the configured one.
    pub fn resolve_key<'a>(&'a self, supplied: Option<&'a str>) -> Result<&'a str, AiError> {
        supplied
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .or(self.fallback_key.as_deref())
            .ok_or(AiError::MissingKey)
    }

    pub async fn complete(&self, api_key: &str, prompt: &str) -> Result<String, AiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: TEMPERATURE,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "chat completion rejected");
            return Err(AiError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: ChatResponse = response.json().await?;
        let answer = extract_answer(payload)?;
        info!(model = %self.model, chars = answer.len(), "chat completion answered");
        Ok(answer)
    }
}

fn extract_answer(payload: ChatResponse) -> Result<String, AiError> {
    payload
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .ok_or(AiError::EmptyResponse)
}

/// The first rows of the filtered table as CSV, limited to the columns the
/// upload actually had.
pub fn sample_csv(columns: &BTreeSet<Column>, records: &[&RevenueRecord]) -> Result<String, AiError> {
    let present: Vec<Column> = Column::ALL
        .into_iter()
        .filter(|column| columns.contains(column))
        .collect();

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(present.iter().map(|column| column.label()))?;
    for record in records.iter().take(SAMPLE_ROWS) {
        writer.write_record(present.iter().map(|column| cell(record, *column)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| AiError::Sample(err.into_error().into()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn cell(record: &RevenueRecord, column: Column) -> String {
    let text = |value: &Option<String>| value.clone().unwrap_or_default();
    match column {
        Column::Date => record
            .date
            .map(|date| date.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        Column::Package => text(&record.package),
        Column::Advertiser => text(&record.advertiser),
        Column::Channel => text(&record.channel),
        Column::AdFormat => text(&record.ad_format),
        Column::GrossRevenue => record.gross_revenue.to_string(),
        Column::Cost => record.cost.to_string(),
        Column::Margin => record.margin.to_string(),
        Column::Impressions => record.impressions.to_string(),
        Column::Ecpm => record.ecpm.to_string(),
        Column::FillRate => record.fill_rate.to_string(),
        Column::Ivt => record.ivt.to_string(),
    }
}

pub fn build_question_prompt(sample: &str, question: &str) -> Result<String, AiError> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AiError::EmptyQuestion);
    }
    Ok(format!(
        "You are a business analyst. Here is sample data:\n{sample}\nQuestion: {question}\n\
         Give your answer in 2-4 sentences. Be specific and use numbers from the table if possible."
    ))
}

pub fn build_summary_prompt(comparison: &Comparison, movers: Option<&MoversReport>) -> String {
    let days = comparison.window_days;
    let mut prompt = format!(
        "You are a business analyst for an ad-monetization team. Revenue per package for the \
         last {days} days ({} to {}) against the previous {days} days ({} to {}):\n",
        comparison.current_window.start,
        comparison.current_window.end,
        comparison.previous_window.start,
        comparison.previous_window.end,
    );
    for row in &comparison.rows {
        prompt.push_str(&format!(
            "- {}: {} vs {} ({}), {}\n",
            row.key,
            format::money(row.current),
            format::money(row.previous),
            format::percent(row.pct_change),
            row.action.label(),
        ));
    }
    if let Some(movers) = movers {
        prompt.push_str(&format!(
            "Day-over-day movers for {} vs {}:\n",
            movers.current_date, movers.previous_date
        ));
        for mover in &movers.impact {
            prompt.push_str(&format!(
                "- {}: revenue {}, main driver {}\n",
                mover.package,
                format::signed_percent(mover.change_pct),
                mover.main_driver.describe(),
            ));
        }
    }
    prompt.push_str(
        "Summarize the main movements in 3-5 sentences and say which packages to scale up \
         and which to investigate. Use numbers from the data.",
    );
    prompt
}

/// User-facing text for a failed call, shown inline next to the form.
pub fn failure_text(err: &AiError) -> String {
    format!("AI request failed: {err}")
}
