use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use sysmon::console::{ConsoleSource, LineSink};
use sysmon::hardware::NoGpuProbe;
use sysmon::metrics::NetworkCounters;
use sysmon::{server, DashboardConfig, DashboardFacade, MetricSampler, MetricSource};

struct FixedSource {
    counters: NetworkCounters,
}

impl MetricSource for FixedSource {
    fn cpu_percent(&mut self, _interval: Duration) -> Option<f64> {
        Some(12.5)
    }
    fn memory_percent(&mut self) -> Option<f64> {
        Some(40.0)
    }
    fn disk_percent(&mut self) -> Option<f64> {
        None
    }
    fn network_counters(&mut self) -> Option<NetworkCounters> {
        self.counters.sent_bytes += 1_000;
        self.counters.recv_bytes += 4_000;
        Some(self.counters)
    }
}

fn facade(config: DashboardConfig) -> Arc<DashboardFacade> {
    let sampler = MetricSampler::new(
        Box::new(FixedSource {
            counters: NetworkCounters::default(),
        }),
        Duration::ZERO,
    );
    let console = DashboardFacade::console_for(&config);
    Arc::new(DashboardFacade::new(config, sampler, console, Box::new(NoGpuProbe)))
}

async fn get_json(f: &Arc<DashboardFacade>, path: &str) -> Value {
    let res = warp::test::request()
        .method("GET")
        .path(path)
        .reply(&server::routes(f.clone()))
        .await;
    assert_eq!(res.status(), 200, "GET {path}");
    serde_json::from_slice(res.body()).unwrap()
}

#[tokio::test]
async fn update_data_returns_current_and_bounded_history() {
    let f = facade(DashboardConfig {
        max_history_points: 2,
        ..DashboardConfig::default()
    });

    let first = get_json(&f, "/update_data").await;
    assert_eq!(first["current"]["cpu_percent"], 12.5);
    assert_eq!(first["current"]["disk_percent"], "unavailable");
    assert_eq!(first["current"]["network"]["sent_bytes_per_sec"], 0.0);
    assert_eq!(first["history"].as_array().unwrap().len(), 1);

    get_json(&f, "/update_data").await;
    let third = get_json(&f, "/update_data").await;
    let history = third["history"].as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1], third["current"]);
}

#[tokio::test]
async fn console_output_and_clear() {
    let f = facade(DashboardConfig::default());
    f.console().write("hello from stdout\n", ConsoleSource::Stdout);
    f.console().write("oops", ConsoleSource::Stderr);

    let lines = get_json(&f, "/get-console-output").await;
    let lines = lines.as_array().unwrap();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["text"], "hello from stdout");
    assert_eq!(lines[0]["type"], "stdout");
    assert_eq!(lines[1]["type"], "stderr");
    assert!(lines[0]["timestamp"].as_str().unwrap().len() == 8);

    // peek: a second read still sees them
    assert_eq!(get_json(&f, "/get-console-output").await.as_array().unwrap().len(), 2);

    let status = get_json(&f, "/clear-console").await;
    assert_eq!(status, serde_json::json!({"status": "success"}));
    assert!(get_json(&f, "/get-console-output").await.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn get_config_has_exactly_documented_keys() {
    let f = facade(DashboardConfig::default());
    let cfg = get_json(&f, "/get-config").await;
    let keys: BTreeSet<String> = cfg.as_object().unwrap().keys().cloned().collect();
    let expected: BTreeSet<String> = [
        "refresh_rate_ms",
        "max_history_points",
        "idle_timeout_ms",
        "console_max_lines",
        "console_refresh_ms",
        "cpu_sample_interval_s",
        "console_filters",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(keys, expected);
    assert_eq!(cfg["max_history_points"], 30);
}

#[tokio::test]
async fn index_renders_hardware_and_client_config() {
    let f = facade(DashboardConfig {
        refresh_rate_ms: 1234,
        ..DashboardConfig::default()
    });
    let res = warp::test::request().path("/").reply(&server::routes(f)).await;
    assert_eq!(res.status(), 200);
    let body = String::from_utf8(res.body().to_vec()).unwrap();
    assert!(body.contains("const SYSMON_REFRESH_RATE = 1234;"));
    assert!(body.contains(" GB</dd>"));
    assert!(body.contains("not detected"));
    assert!(!body.contains("{{"));
}

#[tokio::test]
async fn serves_client_script() {
    let f = facade(DashboardConfig::default());
    let res = warp::test::request()
        .path("/static/dashboard.js")
        .reply(&server::routes(f))
        .await;
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["content-type"], "application/javascript");
    assert!(String::from_utf8_lossy(res.body()).contains("/update_data"));
}

#[tokio::test]
async fn unknown_path_is_404_json() {
    let f = facade(DashboardConfig::default());
    let res = warp::test::request().path("/nope").reply(&server::routes(f)).await;
    assert_eq!(res.status(), 404);
    let body: Value = serde_json::from_slice(res.body()).unwrap();
    assert_eq!(body["status"], 404);
}

#[tokio::test]
async fn post_is_rejected() {
    let f = facade(DashboardConfig::default());
    let res = warp::test::request()
        .method("POST")
        .path("/clear-console")
        .reply(&server::routes(f))
        .await;
    assert_eq!(res.status(), 405);
}
