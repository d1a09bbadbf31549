use crate::models::{
    Action, Actionable, Column, Comparison, ComparisonRow, ComparisonTotals, Dataset, DateWindow,
    Dimension, Driver, DriverMetric, FilterOptions, FormatSplit, Metric, Mover, MoversReport,
    Report, ReportFilter, RevenueRecord, RevenueTrends, Section, ThresholdRules, Trend, ALL_OPTION,
};
use chrono::{Days, NaiveDate};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

const TOP_N: usize = 10;
const MOVERS_N: usize = 5;
const FORMATS_N: usize = 3;
const FLOOR_REVIEW_FILL_PCT: f64 = 90.0;
const FLOOR_REVIEW_MAX_ECPM: f64 = 2.0;

/// Filtered rows of a dataset together with the columns the upload carried.
pub struct RecordView<'a> {
    pub columns: &'a BTreeSet<Column>,
    pub records: Vec<&'a RevenueRecord>,
}

impl<'a> RecordView<'a> {
    pub fn new(dataset: &'a Dataset, filter: &ReportFilter) -> Self {
        let filter = filter.normalized();
        Self {
            columns: &dataset.columns,
            records: dataset
                .records
                .iter()
                .filter(|record| filter.matches(record))
                .collect(),
        }
    }

    fn require(&self, needed: &[Column]) -> Result<(), String> {
        let missing: Vec<&str> = needed
            .iter()
            .filter(|column| !self.columns.contains(*column))
            .map(|column| column.label())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(format!("{} column missing.", missing.join(" or ")))
        }
    }

    fn last_date(&self) -> Option<NaiveDate> {
        self.records.iter().filter_map(|record| record.date).max()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Acc {
    sum: f64,
    count: u32,
}

impl Acc {
    fn push(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    fn value(self, additive: bool) -> f64 {
        if additive {
            self.sum
        } else if self.count == 0 {
            0.0
        } else {
            self.sum / f64::from(self.count)
        }
    }
}

/// Current window is the `days` ending on `last`, previous is the `days` before it.
///
/// `None` when the previous window would start before the earliest date chrono
/// can represent.
pub fn windows(last: NaiveDate, days: i64) -> Option<(DateWindow, DateWindow)> {
    let days = days.max(1).unsigned_abs();
    let back = |n: u64| last.checked_sub_days(Days::new(n));
    let current = DateWindow {
        start: back(days - 1)?,
        end: last,
    };
    let previous = DateWindow {
        start: back(days.checked_mul(2)? - 1)?,
        end: back(days)?,
    };
    Some((current, previous))
}

pub fn pct_change(current: f64, previous: f64) -> Option<f64> {
    if previous == 0.0 {
        None
    } else {
        Some(100.0 * (current - previous) / previous.abs())
    }
}

pub fn classify_trend(current: f64, pct: Option<f64>, rules: &ThresholdRules) -> Trend {
    match pct {
        None if current > 0.0 => Trend::New,
        None => Trend::Stable,
        Some(pct) if pct >= rules.trend_pct => Trend::High,
        Some(pct) if pct <= -rules.trend_pct => Trend::Drop,
        Some(_) => Trend::Stable,
    }
}

pub fn classify_action(current: f64, pct: Option<f64>, rules: &ThresholdRules) -> Action {
    match pct {
        None if current > 0.0 => Action::ScaleUp,
        None if current < 0.0 => Action::Investigate,
        None => Action::Stable,
        Some(pct) if pct >= rules.scale_up_pct => Action::ScaleUp,
        Some(pct) if pct <= rules.investigate_pct => Action::Investigate,
        Some(_) => Action::Stable,
    }
}

fn comparison_row(key: String, current: f64, previous: f64, rules: &ThresholdRules) -> ComparisonRow {
    let pct = pct_change(current, previous);
    ComparisonRow {
        key,
        current,
        previous,
        delta: current - previous,
        pct_change: pct,
        trend: classify_trend(current, pct, rules),
        action: classify_action(current, pct, rules),
    }
}

fn totals_of(current: f64, previous: f64) -> ComparisonTotals {
    ComparisonTotals {
        current,
        previous,
        delta: current - previous,
        pct_change: pct_change(current, previous),
    }
}

pub fn compare_windows(
    view: &RecordView<'_>,
    dimension: Dimension,
    metric: Metric,
    days: i64,
    rules: &ThresholdRules,
) -> Section<Comparison> {
    if let Err(message) = view.require(&[Column::Date, dimension.column(), metric.column()]) {
        return Section::Warning(message);
    }
    let Some(last) = view.last_date() else {
        return Section::Warning("No dated rows to compare.".to_string());
    };

    let days = days.max(1);
    let Some((current_window, previous_window)) = windows(last, days) else {
        return Section::Warning(format!("A {days}-day window reaches past the earliest supported date."));
    };
    let additive = metric.is_additive();

    let mut groups: BTreeMap<&str, (Acc, Acc)> = BTreeMap::new();
    let mut all_current = Acc::default();
    let mut all_previous = Acc::default();

    for record in &view.records {
        let (Some(date), Some(key)) = (record.date, dimension.key(record)) else {
            continue;
        };
        let value = metric.value(record);
        if current_window.contains(date) {
            groups.entry(key).or_default().0.push(value);
            all_current.push(value);
        } else if previous_window.contains(date) {
            groups.entry(key).or_default().1.push(value);
            all_previous.push(value);
        }
    }

    let rows: Vec<ComparisonRow> = groups
        .into_iter()
        .map(|(key, (current, previous))| {
            comparison_row(
                key.to_string(),
                current.value(additive),
                previous.value(additive),
                rules,
            )
        })
        .collect();

    debug!(?dimension, ?metric, keys = rows.len(), %last, "compared windows");

    Section::Ready(Comparison {
        dimension,
        metric,
        window_days: days,
        current_window,
        previous_window,
        rows,
        totals: totals_of(all_current.value(additive), all_previous.value(additive)),
    })
}

fn by_delta_desc(a: &ComparisonRow, b: &ComparisonRow) -> std::cmp::Ordering {
    b.delta.total_cmp(&a.delta).then_with(|| a.key.cmp(&b.key))
}

fn by_delta_asc(a: &ComparisonRow, b: &ComparisonRow) -> std::cmp::Ordering {
    a.delta.total_cmp(&b.delta).then_with(|| a.key.cmp(&b.key))
}

/// Packages ranked by revenue gained, best ten first.
pub fn action_center_top10(
    view: &RecordView<'_>,
    days: i64,
    rules: &ThresholdRules,
) -> Section<Comparison> {
    compare_windows(view, Dimension::Package, Metric::GrossRevenue, days, rules).map(
        |mut comparison| {
            comparison.rows.sort_by(by_delta_desc);
            comparison.rows.truncate(TOP_N);
            comparison
        },
    )
}

/// Top ten packages of one advertiser by current-window revenue, with totals
/// over the listed packages only.
pub fn revenue_trends(
    dataset: &Dataset,
    advertiser: Option<&str>,
    days: i64,
    rules: &ThresholdRules,
) -> Section<RevenueTrends> {
    let filter = ReportFilter {
        advertiser: advertiser.map(str::to_string),
        ..ReportFilter::default()
    }
    .normalized();
    let view = RecordView::new(dataset, &filter);

    compare_windows(&view, Dimension::Package, Metric::GrossRevenue, days, rules).map(
        |mut comparison| {
            comparison.rows.sort_by(|a, b| {
                b.current
                    .total_cmp(&a.current)
                    .then_with(|| a.key.cmp(&b.key))
            });
            comparison.rows.truncate(TOP_N);
            let current = comparison.rows.iter().map(|row| row.current).sum();
            let previous = comparison.rows.iter().map(|row| row.previous).sum();
            comparison.totals = totals_of(current, previous);
            RevenueTrends {
                advertiser: filter.advertiser.clone(),
                comparison,
            }
        },
    )
}

/// Channels that earned in the previous window and fell to or below the drop threshold.
pub fn dropped_channels(
    view: &RecordView<'_>,
    days: i64,
    rules: &ThresholdRules,
) -> Section<Vec<ComparisonRow>> {
    compare_windows(view, Dimension::Channel, Metric::GrossRevenue, days, rules).map(
        |comparison| {
            let mut dropped: Vec<ComparisonRow> = comparison
                .rows
                .into_iter()
                .filter(|row| {
                    row.previous > 0.0
                        && row.pct_change.is_some_and(|pct| pct <= rules.drop_pct)
                })
                .collect();
            dropped.sort_by(by_delta_asc);
            dropped
        },
    )
}

pub fn best_worst_formats(
    view: &RecordView<'_>,
    days: i64,
    rules: &ThresholdRules,
) -> Section<FormatSplit> {
    compare_windows(view, Dimension::AdFormat, Metric::GrossRevenue, days, rules).map(
        |comparison| {
            let mut best: Vec<ComparisonRow> = comparison
                .rows
                .iter()
                .filter(|row| row.delta > 0.0)
                .cloned()
                .collect();
            best.sort_by(by_delta_desc);
            best.truncate(FORMATS_N);

            let mut worst: Vec<ComparisonRow> = comparison
                .rows
                .into_iter()
                .filter(|row| row.delta < 0.0)
                .collect();
            worst.sort_by(by_delta_asc);
            worst.truncate(FORMATS_N);

            FormatSplit { best, worst }
        },
    )
}

#[derive(Debug, Clone, Default)]
struct DaySlice {
    revenue: f64,
    impressions: f64,
    ecpm: Acc,
    fill_rate: Acc,
    ad_format: Option<String>,
}

fn day_slices<'a>(
    records: &[&'a RevenueRecord],
    date: NaiveDate,
) -> HashMap<&'a str, DaySlice> {
    let mut slices: HashMap<&str, DaySlice> = HashMap::new();
    for &record in records.iter().filter(|record| record.date == Some(date)) {
        let Some(package) = Dimension::Package.key(record) else {
            continue;
        };
        let slice = slices.entry(package).or_default();
        slice.revenue += record.gross_revenue;
        slice.impressions += record.impressions;
        slice.ecpm.push(record.ecpm);
        slice.fill_rate.push(record.fill_rate);
        if slice.ad_format.is_none() {
            slice.ad_format = record.ad_format.clone();
        }
    }
    slices
}

fn top_packages<'a>(slices: &HashMap<&'a str, DaySlice>) -> Vec<&'a str> {
    let mut ranked: Vec<(&str, f64)> = slices
        .iter()
        .map(|(package, slice)| (*package, slice.revenue))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked.into_iter().take(TOP_N).map(|(package, _)| package).collect()
}

/// Whole-percent change, 0 when there is no base to compare against.
fn int_change(current: f64, previous: f64) -> i64 {
    if previous == 0.0 {
        0
    } else {
        (100.0 * (current - previous) / previous).round() as i64
    }
}

/// Largest absolute change wins; on ties the earlier candidate is kept.
pub fn main_driver(fill_rate: i64, ecpm: i64, impressions: i64) -> Driver {
    [
        (DriverMetric::FillRate, fill_rate),
        (DriverMetric::Ecpm, ecpm),
        (DriverMetric::Impressions, impressions),
    ]
    .into_iter()
    .fold(None::<Driver>, |best, (metric, change_pct)| match best {
        Some(best) if best.change_pct.abs() >= change_pct.abs() => Some(best),
        _ => Some(Driver { metric, change_pct }),
    })
    .unwrap_or(Driver {
        metric: DriverMetric::FillRate,
        change_pct: fill_rate,
    })
}

/// Day-over-day movers among the ten biggest earners of the latest date.
pub fn daily_movers(view: &RecordView<'_>) -> Section<MoversReport> {
    if let Err(message) = view.require(&[
        Column::Date,
        Column::Package,
        Column::GrossRevenue,
        Column::Ecpm,
        Column::FillRate,
        Column::Impressions,
    ]) {
        return Section::Warning(message);
    }

    let Some(current_date) = view.last_date() else {
        return Section::Warning("No dated rows to compare.".to_string());
    };
    let Some(previous_date) = view
        .records
        .iter()
        .filter_map(|record| record.date)
        .filter(|date| *date < current_date)
        .max()
    else {
        return Section::Warning("Need at least two dates to compare movers.".to_string());
    };

    let latest = day_slices(&view.records, current_date);
    let earlier = day_slices(&view.records, previous_date);
    let top_latest = top_packages(&latest);
    let top_earlier: HashSet<&str> = top_packages(&earlier).into_iter().collect();

    let mut movers = Vec::new();
    for package in &top_latest {
        let (Some(curr), Some(prev)) = (latest.get(package), earlier.get(package)) else {
            continue;
        };

        let change_pct = if prev.revenue == 0.0 {
            None
        } else {
            Some((100.0 * (curr.revenue - prev.revenue) / prev.revenue).round() as i64)
        };

        let current_ecpm = curr.ecpm.value(false);
        let previous_ecpm = prev.ecpm.value(false);
        let current_fill_rate = curr.fill_rate.value(false);
        let previous_fill_rate = prev.fill_rate.value(false);

        movers.push(Mover {
            package: package.to_string(),
            ad_format: curr.ad_format.clone(),
            previous_date,
            current_date,
            previous_revenue: prev.revenue,
            current_revenue: curr.revenue,
            change_pct,
            previous_ecpm,
            current_ecpm,
            previous_fill_rate,
            current_fill_rate,
            previous_impressions: prev.impressions,
            current_impressions: curr.impressions,
            main_driver: main_driver(
                int_change(current_fill_rate, previous_fill_rate),
                int_change(current_ecpm, previous_ecpm),
                int_change(curr.impressions, prev.impressions),
            ),
        });
    }

    if movers.is_empty() {
        return Section::Warning(
            "No packages found in the top 10 with data for both dates.".to_string(),
        );
    }

    // A jump from zero outranks every finite change.
    let rank = |mover: &Mover| mover.change_pct.unwrap_or(i64::MAX);

    let mut top_up = movers.clone();
    top_up.sort_by_key(|mover| std::cmp::Reverse(rank(mover)));
    top_up.truncate(MOVERS_N);

    let mut top_down = movers.clone();
    top_down.sort_by_key(rank);
    top_down.truncate(MOVERS_N);

    let recent: HashSet<&str> = top_up
        .iter()
        .chain(&top_down)
        .map(|mover| mover.package.as_str())
        .collect();

    let mut actionable: Vec<Actionable> = top_latest
        .iter()
        .filter(|package| !top_earlier.contains(*package))
        .map(|package| Actionable::EnteredTopTen {
            package: package.to_string(),
        })
        .collect();
    // Any package seen on both dates qualifies, not only the top ten, since
    // the up and down lists together already cover every top-ten mover.
    let mut floor_review: Vec<(&str, &DaySlice)> = latest
        .iter()
        .filter(|(package, _)| earlier.contains_key(*package) && !recent.contains(*package))
        .filter(|(_, slice)| {
            (slice.fill_rate.value(false) * 100.0).round() > FLOOR_REVIEW_FILL_PCT
                && slice.ecpm.value(false) < FLOOR_REVIEW_MAX_ECPM
        })
        .map(|(package, slice)| (*package, slice))
        .collect();
    floor_review.sort_by(|a, b| b.1.revenue.total_cmp(&a.1.revenue).then_with(|| a.0.cmp(b.0)));
    actionable.extend(floor_review.into_iter().map(|(package, _)| Actionable::FloorReview {
        package: package.to_string(),
    }));

    Section::Ready(MoversReport {
        current_date,
        previous_date,
        top_up,
        top_down,
        actionable,
        impact: movers,
    })
}

/// Distinct values in order of first appearance, each list led by `(All)`.
pub fn filter_options(dataset: &Dataset) -> FilterOptions {
    fn distinct<'a>(values: impl Iterator<Item = Option<&'a str>>) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = vec![ALL_OPTION.to_string()];
        for value in values.flatten() {
            if !value.is_empty() && seen.insert(value) {
                out.push(value.to_string());
            }
        }
        out
    }

    FilterOptions {
        advertisers: distinct(dataset.records.iter().map(|r| r.advertiser.as_deref())),
        channels: distinct(dataset.records.iter().map(|r| r.channel.as_deref())),
        ad_formats: distinct(dataset.records.iter().map(|r| r.ad_format.as_deref())),
    }
}

pub fn build_report(
    dataset: &Dataset,
    filter: &ReportFilter,
    days: i64,
    rules: &ThresholdRules,
) -> Report {
    let filter = filter.normalized();
    let view = RecordView::new(dataset, &filter);

    Report {
        rows: view.records.len(),
        action_center: action_center_top10(&view, days, rules),
        dropped_channels: dropped_channels(&view, days, rules),
        formats: best_worst_formats(&view, days, rules),
        movers: daily_movers(&view),
        filter,
    }
}
