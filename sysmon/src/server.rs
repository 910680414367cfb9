//! HTTP surface polled by the browser client.

use crate::dashboard::DashboardFacade;
use crate::logging::ACCESS_LOG_TARGET;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

const INDEX_TEMPLATE: &str = include_str!("../static/index.html");
const DASHBOARD_JS: &str = include_str!("../static/dashboard.js");

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: warp::Error,
    },
}

/// Sampling task failed to complete (panicked or was cancelled).
#[derive(Debug)]
struct SamplingFailed;

impl warp::reject::Reject for SamplingFailed {}

pub fn routes(
    facade: Arc<DashboardFacade>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let index = warp::path::end()
        .and(with_facade(facade.clone()))
        .map(|f: Arc<DashboardFacade>| warp::reply::html(render_index(&f)));

    let script = warp::path!("static" / "dashboard.js")
        .map(|| warp::reply::with_header(DASHBOARD_JS, "content-type", "application/javascript"));

    let update_data = warp::path!("update_data")
        .and(with_facade(facade.clone()))
        .and_then(update_data);

    let console_output = warp::path!("get-console-output")
        .and(with_facade(facade.clone()))
        .map(|f: Arc<DashboardFacade>| warp::reply::json(&f.get_console_lines()));

    let clear_console = warp::path!("clear-console")
        .and(with_facade(facade.clone()))
        .map(|f: Arc<DashboardFacade>| {
            f.clear_console();
            warp::reply::json(&json!({ "status": "success" }))
        });

    let get_config = warp::path!("get-config")
        .and(with_facade(facade))
        .map(|f: Arc<DashboardFacade>| warp::reply::json(&f.get_config()));

    warp::get()
        .and(
            index
                .or(script)
                .or(update_data)
                .or(console_output)
                .or(clear_console)
                .or(get_config),
        )
        .recover(handle_rejection)
        .with(warp::log::custom(access_log))
}

/// Bind `addr` and return the bound address plus the server future, which
/// resolves once `shutdown` does.
pub fn bind(
    facade: Arc<DashboardFacade>,
    addr: SocketAddr,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(SocketAddr, impl Future<Output = ()>), ServerError> {
    warp::serve(routes(facade))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|source| ServerError::Bind { addr, source })
}

fn with_facade(
    facade: Arc<DashboardFacade>,
) -> impl Filter<Extract = (Arc<DashboardFacade>,), Error = Infallible> + Clone {
    warp::any().map(move || facade.clone())
}

async fn update_data(facade: Arc<DashboardFacade>) -> Result<impl Reply, Rejection> {
    let snapshot = tokio::task::spawn_blocking(move || facade.get_current_and_history())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "metrics sampling task failed");
            warp::reject::custom(SamplingFailed)
        })?;
    Ok(warp::reply::json(&snapshot))
}

async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if err.find::<SamplingFailed>().is_some() {
        (StatusCode::INTERNAL_SERVER_ERROR, "Metrics sampling failed")
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };
    let body = warp::reply::json(&json!({
        "error": message,
        "status": status.as_u16(),
    }));
    Ok(warp::reply::with_status(body, status))
}

fn access_log(info: warp::log::Info<'_>) {
    let remote = info
        .remote_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());
    tracing::info!(
        target: ACCESS_LOG_TARGET,
        "{} - - \"{} {} {:?}\" {}",
        remote,
        info.method(),
        info.path(),
        info.version(),
        info.status().as_u16()
    );
}

fn render_index(facade: &DashboardFacade) -> String {
    let hw = facade.get_hardware_info();
    let cfg = facade.get_config();
    let gpu = if hw.has_discrete_gpu { "present" } else { "not detected" };
    [
        ("{{os_name}}", escape_html(&hw.os_name)),
        ("{{cpu_description}}", escape_html(&hw.cpu_description)),
        ("{{total_ram}}", escape_html(&hw.total_ram_formatted)),
        ("{{gpu}}", gpu.to_string()),
        ("{{refresh_rate_ms}}", cfg.refresh_rate_ms.to_string()),
        ("{{max_history_points}}", cfg.max_history_points.to_string()),
        ("{{idle_timeout_ms}}", cfg.idle_timeout_ms.to_string()),
        ("{{console_max_lines}}", cfg.console_max_lines.to_string()),
        ("{{console_refresh_ms}}", cfg.console_refresh_ms.to_string()),
    ]
    .iter()
    .fold(INDEX_TEMPLATE.to_string(), |page, (key, value)| page.replace(key, value))
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
