use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const ALL_OPTION: &str = "(All)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    Date,
    Package,
    Advertiser,
    Channel,
    AdFormat,
    GrossRevenue,
    Cost,
    Margin,
    Impressions,
    Ecpm,
    FillRate,
    Ivt,
}

impl Column {
    pub const ALL: [Column; 12] = [
        Column::Date,
        Column::Package,
        Column::Advertiser,
        Column::Channel,
        Column::AdFormat,
        Column::GrossRevenue,
        Column::Cost,
        Column::Margin,
        Column::Impressions,
        Column::Ecpm,
        Column::FillRate,
        Column::Ivt,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Column::Date => "Date",
            Column::Package => "Package",
            Column::Advertiser => "Advertiser",
            Column::Channel => "Channel",
            Column::AdFormat => "Ad format",
            Column::GrossRevenue => "Gross Revenue",
            Column::Cost => "Cost",
            Column::Margin => "Margin",
            Column::Impressions => "Impressions",
            Column::Ecpm => "eCPM",
            Column::FillRate => "FillRate",
            Column::Ivt => "IVT",
        }
    }

    /// Columns whose cells hold a fraction (0.95) rather than an amount.
    pub fn is_rate(self) -> bool {
        matches!(self, Column::FillRate | Column::Ivt)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    #[default]
    Package,
    Advertiser,
    Channel,
    AdFormat,
}

impl Dimension {
    pub fn column(self) -> Column {
        match self {
            Dimension::Package => Column::Package,
            Dimension::Advertiser => Column::Advertiser,
            Dimension::Channel => Column::Channel,
            Dimension::AdFormat => Column::AdFormat,
        }
    }

    pub fn key(self, record: &RevenueRecord) -> Option<&str> {
        let value = match self {
            Dimension::Package => record.package.as_deref(),
            Dimension::Advertiser => record.advertiser.as_deref(),
            Dimension::Channel => record.channel.as_deref(),
            Dimension::AdFormat => record.ad_format.as_deref(),
        };
        value.filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    GrossRevenue,
    Cost,
    Margin,
    Impressions,
    Ecpm,
    FillRate,
    Ivt,
}

impl Metric {
    pub fn column(self) -> Column {
        match self {
            Metric::GrossRevenue => Column::GrossRevenue,
            Metric::Cost => Column::Cost,
            Metric::Margin => Column::Margin,
            Metric::Impressions => Column::Impressions,
            Metric::Ecpm => Column::Ecpm,
            Metric::FillRate => Column::FillRate,
            Metric::Ivt => Column::Ivt,
        }
    }

    pub fn value(self, record: &RevenueRecord) -> f64 {
        match self {
            Metric::GrossRevenue => record.gross_revenue,
            Metric::Cost => record.cost,
            Metric::Margin => record.margin,
            Metric::Impressions => record.impressions,
            Metric::Ecpm => record.ecpm,
            Metric::FillRate => record.fill_rate,
            Metric::Ivt => record.ivt,
        }
    }

    /// Additive metrics are summed over a window, the rest are averaged.
    pub fn is_additive(self) -> bool {
        matches!(
            self,
            Metric::GrossRevenue | Metric::Cost | Metric::Margin | Metric::Impressions
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RevenueRecord {
    pub date: Option<NaiveDate>,
    pub package: Option<String>,
    pub advertiser: Option<String>,
    pub channel: Option<String>,
    pub ad_format: Option<String>,
    pub gross_revenue: f64,
    pub cost: f64,
    pub margin: f64,
    pub impressions: f64,
    pub ecpm: f64,
    pub fill_rate: f64,
    pub ivt: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Dataset {
    pub source: String,
    pub columns: BTreeSet<Column>,
    pub records: Vec<RevenueRecord>,
    pub warnings: Vec<String>,
}

impl Dataset {
    pub fn has(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportFilter {
    #[serde(default)]
    pub advertiser: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ad_format: Option<String>,
}

impl ReportFilter {
    /// Drops empty and `(All)` selections so only real constraints remain.
    pub fn normalized(&self) -> Self {
        fn keep(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty() && *value != ALL_OPTION)
                .map(str::to_string)
        }

        Self {
            advertiser: keep(&self.advertiser),
            channel: keep(&self.channel),
            ad_format: keep(&self.ad_format),
        }
    }

    pub fn matches(&self, record: &RevenueRecord) -> bool {
        fn check(wanted: &Option<String>, actual: &Option<String>) -> bool {
            match wanted {
                Some(wanted) => actual.as_deref() == Some(wanted.as_str()),
                None => true,
            }
        }

        check(&self.advertiser, &record.advertiser)
            && check(&self.channel, &record.channel)
            && check(&self.ad_format, &record.ad_format)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "data", rename_all = "snake_case")]
pub enum Section<T> {
    Ready(T),
    Warning(String),
}

impl<T> Section<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            Section::Ready(value) => Some(value),
            Section::Warning(_) => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Section<U> {
        match self {
            Section::Ready(value) => Section::Ready(f(value)),
            Section::Warning(message) => Section::Warning(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdRules {
    pub scale_up_pct: f64,
    pub investigate_pct: f64,
    pub trend_pct: f64,
    pub drop_pct: f64,
}

impl Default for ThresholdRules {
    fn default() -> Self {
        Self {
            scale_up_pct: 20.0,
            investigate_pct: 0.0,
            trend_pct: 10.0,
            drop_pct: -50.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    New,
    High,
    Drop,
    Stable,
}

impl Trend {
    pub fn label(self) -> &'static str {
        match self {
            Trend::New => "New/High ↑",
            Trend::High => "High ↑",
            Trend::Drop => "Drop ↓",
            Trend::Stable => "Stable",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ScaleUp,
    Stable,
    Investigate,
}

impl Action {
    pub fn label(self) -> &'static str {
        match self {
            Action::ScaleUp => "Scale up",
            Action::Stable => "Stable",
            Action::Investigate => "Investigate",
        }
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonRow {
    pub key: String,
    pub current: f64,
    pub previous: f64,
    pub delta: f64,
    pub pct_change: Option<f64>,
    pub trend: Trend,
    pub action: Action,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonTotals {
    pub current: f64,
    pub previous: f64,
    pub delta: f64,
    pub pct_change: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Comparison {
    pub dimension: Dimension,
    pub metric: Metric,
    pub window_days: i64,
    pub current_window: DateWindow,
    pub previous_window: DateWindow,
    pub rows: Vec<ComparisonRow>,
    pub totals: ComparisonTotals,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormatSplit {
    pub best: Vec<ComparisonRow>,
    pub worst: Vec<ComparisonRow>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevenueTrends {
    pub advertiser: Option<String>,
    pub comparison: Comparison,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverMetric {
    FillRate,
    Ecpm,
    Impressions,
}

impl DriverMetric {
    pub fn label(self) -> &'static str {
        match self {
            DriverMetric::FillRate => "fill rate",
            DriverMetric::Ecpm => "eCPM",
            DriverMetric::Impressions => "impressions",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Driver {
    pub metric: DriverMetric,
    pub change_pct: i64,
}

impl Driver {
    pub fn describe(&self) -> String {
        let direction = if self.change_pct > 0 { "up" } else { "down" };
        format!(
            "{} {} {}%",
            self.metric.label(),
            direction,
            self.change_pct.abs()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mover {
    pub package: String,
    pub ad_format: Option<String>,
    pub previous_date: NaiveDate,
    pub current_date: NaiveDate,
    pub previous_revenue: f64,
    pub current_revenue: f64,
    /// `None` when the previous day earned nothing.
    pub change_pct: Option<i64>,
    pub previous_ecpm: f64,
    pub current_ecpm: f64,
    pub previous_fill_rate: f64,
    pub current_fill_rate: f64,
    pub previous_impressions: f64,
    pub current_impressions: f64,
    pub main_driver: Driver,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actionable {
    EnteredTopTen { package: String },
    FloorReview { package: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct MoversReport {
    pub current_date: NaiveDate,
    pub previous_date: NaiveDate,
    pub top_up: Vec<Mover>,
    pub top_down: Vec<Mover>,
    pub actionable: Vec<Actionable>,
    pub impact: Vec<Mover>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FilterOptions {
    pub advertisers: Vec<String>,
    pub channels: Vec<String>,
    pub ad_formats: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub filter: ReportFilter,
    pub rows: usize,
    pub action_center: Section<Comparison>,
    pub dropped_channels: Section<Vec<ComparisonRow>>,
    pub formats: Section<FormatSplit>,
    pub movers: Section<MoversReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub source: String,
    pub rows: usize,
    pub columns: Vec<Column>,
    pub warnings: Vec<String>,
    pub options: FilterOptions,
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub advertiser: Option<String>,
    pub channel: Option<String>,
    pub ad_format: Option<String>,
}

impl ReportQuery {
    pub fn filter(&self) -> ReportFilter {
        ReportFilter {
            advertiser: self.advertiser.clone(),
            channel: self.channel.clone(),
            ad_format: self.ad_format.clone(),
        }
        .normalized()
    }
}

#[derive(Debug, Deserialize)]
pub struct CompareQuery {
    pub dimension: Option<Dimension>,
    pub metric: Option<Metric>,
    pub days: Option<i64>,
    pub advertiser: Option<String>,
    pub channel: Option<String>,
    pub ad_format: Option<String>,
}

impl CompareQuery {
    pub fn filter(&self) -> ReportFilter {
        ReportFilter {
            advertiser: self.advertiser.clone(),
            channel: self.channel.clone(),
            ad_format: self.ad_format.clone(),
        }
        .normalized()
    }
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub filter: ReportFilter,
}

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub filter: ReportFilter,
}

#[derive(Debug, Deserialize)]
pub struct AskForm {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub advertiser: Option<String>,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub ad_format: Option<String>,
}

/// Exactly one of `answer` and `error` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub dataset_loaded: bool,
}
