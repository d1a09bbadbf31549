use crate::format;
use crate::models::{
    Action, Actionable, AskResponse, Comparison, ComparisonRow, DatasetSummary, FormatSplit, Mover,
    MoversReport, Report, ReportFilter, RevenueTrends, Section, Trend, ALL_OPTION,
};
use std::fmt::Write as _;

#[derive(Debug, Default)]
pub struct PageView {
    pub summary: Option<DatasetSummary>,
    pub filter: ReportFilter,
    pub report: Option<Report>,
    pub trends: Option<Section<RevenueTrends>>,
    pub question: String,
    pub ask: Option<AskResponse>,
}

pub fn render_page(view: &PageView) -> String {
    let (filters, sections, ask) = match (&view.summary, &view.report) {
        (Some(summary), Some(report)) => (
            render_filters(summary, &view.filter),
            render_report(report, view.trends.as_ref()),
            render_ask(view),
        ),
        _ => (
            String::new(),
            info_card("Please upload your Excel file to see all action items and enable filtering."),
            String::new(),
        ),
    };

    INDEX_HTML
        .replace("{{DATASET}}", &render_dataset(view.summary.as_ref()))
        .replace("{{FILTERS}}", &filters)
        .replace("{{SECTIONS}}", &sections)
        .replace("{{ASK}}", &ask)
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            // Keeps uploaded text from forming template placeholders.
            '{' => out.push_str("&#123;"),
            '}' => out.push_str("&#125;"),
            _ => out.push(ch),
        }
    }
    out
}

fn info_card(message: &str) -> String {
    format!(r#"<div class="notice info">{}</div>"#, escape(message))
}

fn warning_card(message: &str) -> String {
    format!(r#"<div class="notice warning">{}</div>"#, escape(message))
}

fn render_dataset(summary: Option<&DatasetSummary>) -> String {
    let mut html = String::from(
        r#"<form class="upload" method="post" action="/upload" enctype="multipart/form-data">
        <label for="file">Upload your Excel file</label>
        <input id="file" type="file" name="file" accept=".xlsx,.xls,.csv" required />
        <button type="submit">Upload</button>
      </form>"#,
    );

    if let Some(summary) = summary {
        let _ = write!(
            html,
            r#"<p class="subtitle">Loaded <strong>{}</strong>: {} rows.</p>"#,
            escape(&summary.source),
            format::comma(summary.rows as i64)
        );
        for warning in &summary.warnings {
            html.push_str(&warning_card(warning));
        }
    }
    html
}

fn render_filters(summary: &DatasetSummary, filter: &ReportFilter) -> String {
    let select = |name: &str, label: &str, options: &[String], selected: &Option<String>| {
        let selected = selected.as_deref().unwrap_or(ALL_OPTION);
        let mut html = format!(r#"<label>{label}<select name="{name}">"#);
        for option in options {
            let marker = if option == selected { " selected" } else { "" };
            let value = escape(option);
            let _ = write!(html, r#"<option value="{value}"{marker}>{value}</option>"#);
        }
        html.push_str("</select></label>");
        html
    };

    format!(
        r#"<form class="filters" method="get" action="/">{}{}{}<button type="submit">Apply</button></form>"#,
        select("advertiser", "Advertiser", &summary.options.advertisers, &filter.advertiser),
        select("channel", "Channel", &summary.options.channels, &filter.channel),
        select("ad_format", "Ad Format", &summary.options.ad_formats, &filter.ad_format),
    )
}

fn render_report(report: &Report, trends: Option<&Section<RevenueTrends>>) -> String {
    let mut html = String::new();

    html.push_str(r#"<section class="card"><h2>Dropped channels</h2>"#);
    match &report.dropped_channels {
        Section::Ready(rows) if rows.is_empty() => {
            html.push_str(r#"<p class="hint">No channel dropped below the threshold.</p>"#)
        }
        Section::Ready(rows) => html.push_str(&comparison_table("Channel", rows, false)),
        Section::Warning(message) => html.push_str(&warning_card(message)),
    }
    html.push_str("</section>");

    html.push_str(r#"<section class="card"><h2>Best and worst ad formats</h2>"#);
    match &report.formats {
        Section::Ready(split) => html.push_str(&render_formats(split)),
        Section::Warning(message) => html.push_str(&warning_card(message)),
    }
    html.push_str("</section>");

    html.push_str(r#"<section class="card"><h2>Action center: top 10 packages</h2>"#);
    match &report.action_center {
        Section::Ready(comparison) => {
            html.push_str(&window_caption(comparison));
            html.push_str(&comparison_table("Package", &comparison.rows, false));
        }
        Section::Warning(message) => html.push_str(&warning_card(message)),
    }
    html.push_str("</section>");

    match &report.movers {
        Section::Ready(movers) => html.push_str(&render_movers(movers)),
        Section::Warning(message) => {
            html.push_str(r#"<section class="card"><h2>Top movers</h2>"#);
            html.push_str(&warning_card(message));
            html.push_str("</section>");
        }
    }

    if let Some(trends) = trends {
        html.push_str(&render_trends(trends));
    }
    html
}

fn window_caption(comparison: &Comparison) -> String {
    let days = comparison.window_days;
    format!(
        r#"<p class="caption">Last {days}d: {} to {} | Prev {days}d: {} to {}</p>"#,
        comparison.current_window.start,
        comparison.current_window.end,
        comparison.previous_window.start,
        comparison.previous_window.end,
    )
}

fn comparison_table(key_label: &str, rows: &[ComparisonRow], with_trend: bool) -> String {
    let last_column = if with_trend { "Trend" } else { "Action" };
    let mut html = format!(
        "<table><thead><tr><th>{key_label}</th><th>Current</th><th>Previous</th>\
         <th>&Delta;</th><th>% Change</th><th>{last_column}</th></tr></thead><tbody>"
    );
    for row in rows {
        let (class, label) = if with_trend {
            (trend_class(row), row.trend.label())
        } else {
            (action_class(row), row.action.label())
        };
        let _ = write!(
            html,
            r#"<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td><span class="badge {class}">{label}</span></td></tr>"#,
            escape(&row.key),
            format::money(row.current),
            format::money(row.previous),
            format::money(row.delta),
            format::percent(row.pct_change),
        );
    }
    html.push_str("</tbody></table>");
    html
}

fn trend_class(row: &ComparisonRow) -> &'static str {
    match row.trend {
        Trend::New | Trend::High => "up",
        Trend::Drop => "down",
        Trend::Stable => "flat",
    }
}

fn action_class(row: &ComparisonRow) -> &'static str {
    match row.action {
        Action::ScaleUp => "up",
        Action::Investigate => "down",
        Action::Stable => "flat",
    }
}

fn render_formats(split: &FormatSplit) -> String {
    let mut html = String::from(r#"<div class="split"><div><h3>Best</h3>"#);
    if split.best.is_empty() {
        html.push_str(r#"<p class="hint">No format grew.</p>"#);
    } else {
        html.push_str(&comparison_table("Ad format", &split.best, false));
    }
    html.push_str("</div><div><h3>Worst</h3>");
    if split.worst.is_empty() {
        html.push_str(r#"<p class="hint">No format declined.</p>"#);
    } else {
        html.push_str(&comparison_table("Ad format", &split.worst, false));
    }
    html.push_str("</div></div>");
    html
}

fn mover_title(mover: &Mover) -> String {
    match &mover.ad_format {
        Some(format) => format!("{} ({})", escape(&mover.package), escape(format)),
        None => escape(&mover.package),
    }
}

fn mover_card(mover: &Mover, arrow: &str) -> String {
    format!(
        r#"<div class="mover"><p><strong>{arrow} {}</strong><br/>{}: Revenue {} (from {} to {})<br/><strong>Main driver:</strong> {}</p>
<p class="hint">eCPM: {} &rarr; {}<br/>Fill Rate: {} &rarr; {}<br/>Publisher Imps: {} &rarr; {}</p></div>"#,
        mover_title(mover),
        mover.current_date.format("%Y-%m-%d"),
        format::signed_percent(mover.change_pct),
        format::count(mover.previous_revenue),
        format::count(mover.current_revenue),
        mover.main_driver.describe(),
        format::ecpm(mover.previous_ecpm),
        format::ecpm(mover.current_ecpm),
        format::rate(mover.previous_fill_rate),
        format::rate(mover.current_fill_rate),
        format::count(mover.previous_impressions),
        format::count(mover.current_impressions),
    )
}

fn render_movers(movers: &MoversReport) -> String {
    let mut html = format!(
        r#"<section class="card"><h2>Top 5 Movers Up (from Top 10 by Revenue)</h2><p class="caption">{} vs {}</p>"#,
        movers.current_date, movers.previous_date
    );
    for mover in &movers.top_up {
        html.push_str(&mover_card(mover, "&uarr;"));
    }
    html.push_str("</section>");

    html.push_str(r#"<section class="card"><h2>Top 5 Movers Down (from Top 10 by Revenue)</h2>"#);
    for mover in &movers.top_down {
        html.push_str(&mover_card(mover, "&darr;"));
    }
    html.push_str("</section>");

    html.push_str(r#"<section class="card"><h2>Actionable</h2>"#);
    if movers.actionable.is_empty() {
        html.push_str("<p>No new actionable insights today.</p>");
    } else {
        html.push_str("<ul>");
        for item in &movers.actionable {
            let line = match item {
                Actionable::EnteredTopTen { package } => format!(
                    "<strong>{}</strong> entered the top 10. Monitor performance.",
                    escape(package)
                ),
                Actionable::FloorReview { package } => format!(
                    "<strong>{}</strong>: high fill rate, low eCPM. Suggest floor review.",
                    escape(package)
                ),
            };
            let _ = write!(html, "<li>{line}</li>");
        }
        html.push_str("</ul>");
    }
    html.push_str("</section>");

    html.push_str(r#"<section class="card"><h2>Top 10 Apps by Gross Revenue: Impact</h2>"#);
    for (index, mover) in movers.impact.iter().enumerate() {
        let class = match mover.change_pct {
            Some(change) if change <= 0 => "down",
            _ => "up",
        };
        let _ = write!(
            html,
            r#"<div class="mover"><p><strong>{}. {}</strong><br/>Date: {}<br/>Revenue: <b>{}</b> <i>(Current)</i> | <b>{}</b> <i>(Previous)</i> <span class="badge {class}">[{}]</span><br/>Main driver: {}</p></div>"#,
            index + 1,
            mover_title(mover),
            mover.current_date.format("%Y-%m-%d"),
            format::money(mover.current_revenue),
            format::money(mover.previous_revenue),
            format::signed_percent(mover.change_pct),
            mover.main_driver.describe(),
        );
    }
    html.push_str("</section>");
    html
}

fn render_trends(trends: &Section<RevenueTrends>) -> String {
    let mut html = String::from(r#"<section class="card">"#);
    match trends {
        Section::Ready(trends) => {
            let who = trends
                .advertiser
                .as_deref()
                .map(escape)
                .unwrap_or_else(|| "all advertisers".to_string());
            let _ = write!(html, "<h2>Top 10 Trending Packages for {who}</h2>");
            html.push_str(&window_caption(&trends.comparison));
            let mut table = comparison_table("Package Name", &trends.comparison.rows, true);
            let totals = &trends.comparison.totals;
            let total_row = format!(
                r#"<tr class="total"><td>TOTAL</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td></td></tr></tbody>"#,
                format::money(totals.current),
                format::money(totals.previous),
                format::money(totals.delta),
                format::percent(totals.pct_change),
            );
            table = table.replacen("</tbody>", &total_row, 1);
            html.push_str(&table);
        }
        Section::Warning(message) => {
            html.push_str("<h2>Top 10 Trending Packages</h2>");
            html.push_str(&warning_card(message));
        }
    }
    html.push_str("</section>");
    html
}

fn render_ask(view: &PageView) -> String {
    let hidden = |name: &str, value: &Option<String>| {
        value
            .as_deref()
            .map(|value| {
                format!(
                    r#"<input type="hidden" name="{name}" value="{}" />"#,
                    escape(value)
                )
            })
            .unwrap_or_default()
    };

    let mut html = format!(
        r#"<section class="card"><h2>Ask AI About Your Data (Optional)</h2>
      <form class="ask" method="post" action="/ask">
        <label>API key (used for this request only, never saved)<input type="password" name="api_key" autocomplete="off" /></label>
        <label>Ask a question about the filtered data (English only)<input type="text" name="question" value="{}" /></label>
        {}{}{}
        <button type="submit">Ask</button>
      </form>"#,
        escape(&view.question),
        hidden("advertiser", &view.filter.advertiser),
        hidden("channel", &view.filter.channel),
        hidden("ad_format", &view.filter.ad_format),
    );

    match &view.ask {
        Some(AskResponse {
            answer: Some(answer),
            ..
        }) => {
            let _ = write!(
                html,
                r#"<p><strong>AI Answer:</strong></p><div class="notice success">{}</div>"#,
                escape(answer)
            );
        }
        Some(AskResponse {
            error: Some(error), ..
        }) => html.push_str(&format!(r#"<div class="notice error">{}</div>"#, escape(error))),
        _ => html.push_str(&info_card(
            "Enter your OpenAI API key above to enable AI Q&A.",
        )),
    }
    html.push_str("</section>");
    html
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>AI Revenue Action Center</title>
  <style>
    :root {
      --bg: #f3f5f8;
      --ink: #1f2a37;
      --muted: #6b7280;
      --up: #22b573;
      --down: #e74c3c;
      --flat: #8b95a1;
      --card: #ffffff;
      --shadow: 0 18px 40px rgba(31, 42, 55, 0.08);
    }

    * {
      box-sizing: border-box;
    }

    body {
      margin: 0;
      background: var(--bg);
      color: var(--ink);
      font-family: "Inter", "Segoe UI", sans-serif;
      padding: 32px 18px 48px;
    }

    .app {
      width: min(1200px, 100%);
      margin: 0 auto;
      display: grid;
      gap: 20px;
    }

    h1 {
      margin: 0;
      font-size: clamp(1.8rem, 3vw, 2.4rem);
    }

    h2 {
      margin: 0 0 12px;
      font-size: 1.2rem;
    }

    .subtitle,
    .caption,
    .hint {
      color: var(--muted);
      margin: 6px 0;
      font-size: 0.92rem;
    }

    .card {
      background: var(--card);
      border-radius: 16px;
      box-shadow: var(--shadow);
      padding: 20px 24px;
      overflow-x: auto;
    }

    form.upload,
    form.filters,
    form.ask {
      display: flex;
      flex-wrap: wrap;
      align-items: end;
      gap: 12px;
    }

    form label {
      display: grid;
      gap: 4px;
      font-size: 0.85rem;
      color: var(--muted);
    }

    form.ask label {
      flex: 1 1 320px;
    }

    input,
    select {
      padding: 8px 10px;
      border: 1px solid #d4d9e0;
      border-radius: 8px;
      font-size: 0.95rem;
    }

    button {
      border: none;
      border-radius: 999px;
      padding: 10px 18px;
      font-weight: 600;
      background: var(--ink);
      color: white;
      cursor: pointer;
    }

    table {
      width: 100%;
      border-collapse: collapse;
      font-size: 0.92rem;
    }

    th,
    td {
      text-align: left;
      padding: 8px 10px;
      border-bottom: 1px solid #eef0f3;
    }

    tr.total td {
      font-weight: 700;
      border-top: 2px solid #d4d9e0;
    }

    .badge {
      font-weight: 700;
    }

    .badge.up {
      color: var(--up);
    }

    .badge.down {
      color: var(--down);
    }

    .badge.flat {
      color: var(--flat);
    }

    .split {
      display: grid;
      grid-template-columns: repeat(auto-fit, minmax(320px, 1fr));
      gap: 16px;
    }

    .mover {
      border-bottom: 1px solid #eef0f3;
      padding: 6px 0;
    }

    .notice {
      border-radius: 10px;
      padding: 12px 14px;
      margin: 8px 0;
    }

    .notice.info {
      background: #e8f1fb;
    }

    .notice.warning {
      background: #fff4d6;
    }

    .notice.error {
      background: #fde2df;
    }

    .notice.success {
      background: #dff5e9;
    }
  </style>
</head>
<body>
  <main class="app">
    <header>
      <h1>AI-Powered Revenue Action Center</h1>
      <p class="subtitle">Compare the latest days against the days before and see what to scale up or investigate.</p>
    </header>
    <section class="card">
      {{DATASET}}
      {{FILTERS}}
    </section>
    {{SECTIONS}}
    {{ASK}}
  </main>
</body>
</html>
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComparisonTotals, DateWindow, Dimension, FilterOptions, Metric};
    use chrono::NaiveDate;

    fn comparison(rows: Vec<ComparisonRow>) -> Comparison {
        let day = |d| NaiveDate::from_ymd_opt(2025, 5, d).unwrap();
        Comparison {
            dimension: Dimension::Package,
            metric: Metric::GrossRevenue,
            window_days: 3,
            current_window: DateWindow { start: day(4), end: day(6) },
            previous_window: DateWindow { start: day(1), end: day(3) },
            rows,
            totals: ComparisonTotals {
                current: 24000.0,
                previous: 7000.0,
                delta: 17000.0,
                pct_change: Some(242.857),
            },
        }
    }

    fn row(key: &str) -> ComparisonRow {
        ComparisonRow {
            key: key.to_string(),
            current: 24000.0,
            previous: 7000.0,
            delta: 17000.0,
            pct_change: Some(242.857),
            trend: Trend::High,
            action: Action::ScaleUp,
        }
    }

    fn summary() -> DatasetSummary {
        DatasetSummary {
            source: "may.xlsx".to_string(),
            rows: 1200,
            columns: Vec::new(),
            warnings: vec!["IVT column missing.".to_string()],
            options: FilterOptions {
                advertisers: vec!["(All)".to_string(), "Acme".to_string()],
                channels: vec!["(All)".to_string()],
                ad_formats: vec!["(All)".to_string()],
            },
        }
    }

    fn report() -> Report {
        Report {
            filter: ReportFilter::default(),
            rows: 1200,
            action_center: Section::Ready(comparison(vec![row("<script>pkg")])),
            dropped_channels: Section::Ready(Vec::new()),
            formats: Section::Warning("Ad format column missing.".to_string()),
            movers: Section::Warning("Need at least two dates to compare movers.".to_string()),
        }
    }

    #[test]
    fn empty_page_asks_for_upload() {
        let html = render_page(&PageView::default());
        assert!(html.contains("Please upload your Excel file"));
        assert!(html.contains(r#"action="/upload""#));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn report_page_renders_tables_and_escapes_keys() {
        let view = PageView {
            summary: Some(summary()),
            filter: ReportFilter {
                advertiser: Some("Acme".to_string()),
                ..ReportFilter::default()
            },
            report: Some(report()),
            trends: Some(Section::Ready(RevenueTrends {
                advertiser: Some("Acme".to_string()),
                comparison: comparison(vec![row("easy.sudoku")]),
            })),
            question: String::new(),
            ask: None,
        };
        let html = render_page(&view);

        assert!(html.contains("Loaded <strong>may.xlsx</strong>: 1,200 rows."));
        assert!(html.contains(r#"<option value="Acme" selected>Acme</option>"#));
        assert!(html.contains("&lt;script&gt;pkg"));
        assert!(!html.contains("<script>pkg"));
        assert!(html.contains("$24,000"));
        assert!(html.contains("243%"));
        assert!(html.contains("Scale up"));
        assert!(html.contains("Last 3d: 2025-05-04 to 2025-05-06 | Prev 3d: 2025-05-01 to 2025-05-03"));
        assert!(html.contains("Top 10 Trending Packages for Acme"));
        assert!(html.contains(r#"<tr class="total"><td>TOTAL</td>"#));
        assert!(html.contains("Ad format column missing."));
        assert!(html.contains("No channel dropped below the threshold."));
        assert!(html.contains(r#"<input type="hidden" name="advertiser" value="Acme" />"#));
        assert!(html.contains("Enter your OpenAI API key above"));
    }

    #[test]
    fn uploaded_text_cannot_expand_placeholders() {
        let mut summary = summary();
        summary.source = "{{SECTIONS}}.csv".to_string();
        let mut report = report();
        report.action_center = Section::Ready(comparison(vec![row("{{ASK}}")]));
        let view = PageView {
            summary: Some(summary),
            report: Some(report),
            question: "{{FILTERS}}".to_string(),
            ..PageView::default()
        };
        let html = render_page(&view);

        assert!(html.contains("Loaded <strong>&#123;&#123;SECTIONS&#125;&#125;.csv</strong>"));
        assert!(html.contains("&#123;&#123;ASK&#125;&#125;"));
        assert!(!html.contains("{{"));
        assert_eq!(html.matches("Action center: top 10 packages").count(), 1);
    }

    #[test]
    fn ask_outcome_is_shown_inline() {
        let mut view = PageView {
            summary: Some(summary()),
            report: Some(report()),
            question: "why?".to_string(),
            ask: Some(AskResponse {
                answer: None,
                error: Some("AI request failed: endpoint returned 401: nope".to_string()),
            }),
            ..PageView::default()
        };
        let html = render_page(&view);
        assert!(html.contains(r#"<div class="notice error">AI request failed: endpoint returned 401: nope</div>"#));
        assert!(html.contains(r#"name="question" value="why?""#));

        view.ask = Some(AskResponse {
            answer: Some("Revenue & fill rate rose.".to_string()),
            error: None,
        });
        let html = render_page(&view);
        assert!(html.contains("Revenue &amp; fill rate rose."));
    }
}
