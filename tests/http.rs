use axum::{http::HeaderMap, routing::post, Json, Router};
use once_cell::sync::Lazy;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::sleep;

const MAY_CSV: &str = "\
Date,Package,Advertiser,Channel,Ad format,Gross Revenue,eCPM,FillRate,Publisher Impressions
2025-05-06,com.alpha,Acme,Direct,Banner,1200,1.5,0.95,800000
2025-05-05,com.alpha,Acme,Direct,Banner,600,1.2,0.90,500000
2025-05-02,com.alpha,Acme,Direct,Banner,500,1.1,0.90,450000
2025-05-06,com.beta,Zeta,Programmatic,Video,100,9.0,0.40,11000
2025-05-05,com.beta,Zeta,Programmatic,Video,300,10.0,0.50,30000
2025-05-01,com.beta,Zeta,Programmatic,Video,900,12.0,0.60,75000
2025-05-02,com.gamma,Acme,Legacy,Banner,400,2.0,0.70,200000
";

struct TestServer {
    base_url: String,
    child: Child,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

static TEST_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));
static SERVER: Lazy<Mutex<Option<Arc<TestServer>>>> = Lazy::new(|| Mutex::new(None));

#[cfg(unix)]
mod cleanup {
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Once;

    static REGISTER: Once = Once::new();
    static PID: AtomicI32 = AtomicI32::new(0);

    pub fn register(pid: u32) {
        REGISTER.call_once(|| {
            PID.store(pid as i32, Ordering::SeqCst);
            unsafe {
                libc::atexit(on_exit);
            }
        });
    }

    extern "C" fn on_exit() {
        let pid = PID.load(Ordering::SeqCst);
        if pid > 0 {
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }
    }
}

fn pick_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind random port");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn wait_until_ready(base_url: &str) {
    let client = Client::new();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(resp) = client.get(format!("{base_url}/healthz")).send().await {
            if resp.status().is_success() {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("server did not become ready");
        }
        sleep(Duration::from_millis(100)).await;
    }
}

async fn spawn_server(openai_base_url: &str) -> TestServer {
    let port = pick_free_port();
    let child = Command::new(env!("CARGO_BIN_EXE_revenue_action_center"))
        .env("PORT", port.to_string())
        .env("OPENAI_BASE_URL", openai_base_url)
        .env("APP_AI_TIMEOUT_SECS", "5")
        .env_remove("OPENAI_API_KEY")
        .env("RUST_LOG", "info")
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .expect("failed to spawn server");

    #[cfg(unix)]
    cleanup::register(child.id());

    let base_url = format!("http://127.0.0.1:{port}");
    wait_until_ready(&base_url).await;

    TestServer { base_url, child }
}

/// Completion endpoint that nothing listens on, so AI calls fail fast.
fn unreachable_openai() -> String {
    format!("http://127.0.0.1:{}/v1", pick_free_port())
}

async fn shared_server() -> Arc<TestServer> {
    let mut guard = SERVER.lock().await;
    if let Some(server) = guard.as_ref() {
        return Arc::clone(server);
    }
    let server = Arc::new(spawn_server(&unreachable_openai()).await);
    *guard = Some(Arc::clone(&server));
    server
}

fn csv_form(file_name: &str, body: &str) -> Form {
    let part = Part::bytes(body.as_bytes().to_vec())
        .file_name(file_name.to_string())
        .mime_str("text/csv")
        .unwrap();
    Form::new().part("file", part)
}

async fn upload_may(client: &Client, base_url: &str) -> Value {
    let response = client
        .post(format!("{base_url}/api/upload"))
        .multipart(csv_form("may.csv", MAY_CSV))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    response.json().await.unwrap()
}

async fn get_json(client: &Client, url: String) -> Value {
    let response = client.get(url).send().await.unwrap();
    assert!(response.status().is_success(), "status {}", response.status());
    response.json().await.unwrap()
}

fn keys(rows: &Value) -> Vec<String> {
    rows.as_array()
        .unwrap()
        .iter()
        .map(|row| row["key"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn http_reports_need_an_upload() {
    let server = spawn_server(&unreachable_openai()).await;
    let client = Client::new();

    let response = client
        .get(format!("{}/api/report", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let page = client
        .get(format!("{}/", server.base_url))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(page.contains("Please upload your Excel file"));
}

#[tokio::test]
async fn http_upload_summarizes_dataset() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let summary = upload_may(&client, &server.base_url).await;
    assert_eq!(summary["source"], "may.csv");
    assert_eq!(summary["rows"], 7);
    assert_eq!(summary["options"]["advertisers"], json!(["(All)", "Acme", "Zeta"]));
    assert_eq!(
        summary["options"]["channels"],
        json!(["(All)", "Direct", "Programmatic", "Legacy"])
    );

    let again = get_json(&client, format!("{}/api/dataset", server.base_url)).await;
    assert_eq!(again["rows"], 7);
}

#[tokio::test]
async fn http_report_compares_last_three_days() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    upload_may(&client, &server.base_url).await;

    let report = get_json(&client, format!("{}/api/report", server.base_url)).await;

    let action_center = &report["action_center"];
    assert_eq!(action_center["status"], "ready");
    assert_eq!(action_center["data"]["current_window"]["start"], "2025-05-04");
    assert_eq!(action_center["data"]["previous_window"]["end"], "2025-05-03");
    assert_eq!(
        keys(&action_center["data"]["rows"]),
        vec!["com.alpha", "com.gamma", "com.beta"]
    );
    let alpha = &action_center["data"]["rows"][0];
    assert_eq!(alpha["current"], 1800.0);
    assert_eq!(alpha["previous"], 500.0);
    assert_eq!(alpha["action"], "scale_up");

    let dropped = &report["dropped_channels"];
    assert_eq!(dropped["status"], "ready");
    assert_eq!(keys(&dropped["data"]), vec!["Programmatic", "Legacy"]);

    let movers = &report["movers"]["data"];
    assert_eq!(movers["current_date"], "2025-05-06");
    assert_eq!(movers["previous_date"], "2025-05-05");
    assert_eq!(movers["top_up"][0]["package"], "com.alpha");
    assert_eq!(movers["top_up"][0]["change_pct"], 100);
}

#[tokio::test]
async fn http_filters_and_generic_comparison() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    upload_may(&client, &server.base_url).await;

    let zeta = get_json(
        &client,
        format!("{}/api/report?advertiser=Zeta&channel=(All)", server.base_url),
    )
    .await;
    assert_eq!(zeta["rows"], 3);
    assert_eq!(keys(&zeta["action_center"]["data"]["rows"]), vec!["com.beta"]);

    let channels = get_json(
        &client,
        format!(
            "{}/api/compare?dimension=channel&metric=gross_revenue&days=3",
            server.base_url
        ),
    )
    .await;
    assert_eq!(channels["status"], "ready");
    assert_eq!(
        keys(&channels["data"]["rows"]),
        vec!["Direct", "Legacy", "Programmatic"]
    );

    let response = client
        .get(format!("{}/api/compare?days=0", server.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let trends = get_json(&client, format!("{}/api/trends?advertiser=Acme", server.base_url)).await;
    assert_eq!(trends["data"]["advertiser"], "Acme");
    assert_eq!(trends["data"]["comparison"]["totals"]["current"], 1800.0);
}

#[tokio::test]
async fn http_html_upload_renders_dashboard() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let page = client
        .post(format!("{}/upload", server.base_url))
        .multipart(csv_form("may.csv", MAY_CSV))
        .send()
        .await
        .unwrap();
    assert!(page.status().is_success());
    let html = page.text().await.unwrap();

    assert!(html.contains("Action center: top 10 packages"));
    assert!(html.contains("com.alpha"));
    assert!(html.contains("Top 10 Trending Packages for all advertisers"));
    assert!(html.contains("Enter your OpenAI API key above"));
}

#[tokio::test]
async fn http_rejects_unsupported_upload() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let response = client
        .post(format!("{}/api/upload", server.base_url))
        .multipart(csv_form("notes.txt", "hello"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.text().await.unwrap().contains("unsupported file type"));
}

#[tokio::test]
async fn http_compare_rejects_out_of_range_days() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    upload_may(&client, &server.base_url).await;

    for days in ["3651", "1000000000", "9223372036854775807"] {
        let response = client
            .get(format!("{}/api/compare?days={days}", server.base_url))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "days={days}");
        assert!(response.text().await.unwrap().contains("between 1 and 3650"));
    }

    let widest = get_json(&client, format!("{}/api/compare?days=3650", server.base_url)).await;
    assert_eq!(widest["status"], "ready");
    assert_eq!(widest["data"]["window_days"], 3650);
}

#[tokio::test]
async fn http_xlsx_upload_scales_whole_percent_fill_rate() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();

    let part = Part::bytes(include_bytes!("fixtures/may_report.xlsx").to_vec())
        .file_name("may_report.xlsx")
        .mime_str("application/vnd.openxmlformats-officedocument.spreadsheetml.sheet")
        .unwrap();
    let response = client
        .post(format!("{}/api/upload", server.base_url))
        .multipart(Form::new().part("file", part))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let summary: Value = response.json().await.unwrap();
    assert_eq!(summary["rows"], 2);

    let fill = get_json(
        &client,
        format!(
            "{}/api/compare?dimension=package&metric=fill_rate&days=3",
            server.base_url
        ),
    )
    .await;
    assert_eq!(fill["status"], "ready");
    assert_eq!(fill["data"]["current_window"]["end"], "2025-05-06");
    let rows = &fill["data"]["rows"];
    assert_eq!(keys(rows), vec!["com.alpha", "com.beta"]);
    assert_eq!(rows[0]["current"], 0.95);
    assert_eq!(rows[1]["current"], 0.8);

    upload_may(&client, &server.base_url).await;
}

#[tokio::test]
async fn http_ask_failure_is_reported_inline() {
    let _guard = TEST_LOCK.lock().await;
    let server = shared_server().await;
    let client = Client::new();
    upload_may(&client, &server.base_url).await;

    let response = client
        .post(format!("{}/api/ask", server.base_url))
        .json(&json!({ "question": "Which package grew?", "api_key": "sk-test" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(body["answer"].is_null());
    assert!(body["error"].as_str().unwrap().starts_with("AI request failed: "));

    let no_key: Value = client
        .post(format!("{}/api/ask", server.base_url))
        .json(&json!({ "question": "Which package grew?" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(no_key["error"], "AI request failed: an API key is required");
}

async fn fake_completions(headers: HeaderMap, Json(body): Json<Value>) -> Json<Value> {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let prompt = body["messages"][0]["content"].as_str().unwrap_or_default();
    let content = format!(
        "auth={auth}; model={}; sees_data={}",
        body["model"].as_str().unwrap_or_default(),
        prompt.contains("com.alpha"),
    );
    Json(json!({
        "choices": [{ "message": { "role": "assistant", "content": content } }]
    }))
}

#[tokio::test]
async fn http_ask_and_summary_use_completion_endpoint() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let fake_port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let app = Router::new().route("/v1/chat/completions", post(fake_completions));
        axum::serve(listener, app).await.unwrap();
    });

    let server = spawn_server(&format!("http://127.0.0.1:{fake_port}/v1")).await;
    let client = Client::new();
    upload_may(&client, &server.base_url).await;

    let answer: Value = client
        .post(format!("{}/api/ask", server.base_url))
        .json(&json!({ "question": "Which package grew?", "api_key": "sk-test" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        answer["answer"],
        "auth=Bearer sk-test; model=gpt-3.5-turbo; sees_data=true"
    );
    assert!(answer["error"].is_null());

    let summary: Value = client
        .post(format!("{}/api/summary", server.base_url))
        .json(&json!({ "api_key": "sk-test", "filter": { "advertiser": "Acme" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        summary["answer"],
        "auth=Bearer sk-test; model=gpt-3.5-turbo; sees_data=true"
    );
}
