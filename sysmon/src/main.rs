use std::io;
use std::sync::Arc;
use sysmon::console::LineSink;
use sysmon::interceptor::OutputInterceptor;
use sysmon::{logging, server, DashboardFacade, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = match Settings::load_and_validate() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    let addr = settings.bind_addr()?;

    let console = DashboardFacade::console_for(&settings.dashboard);
    let sink: Arc<dyn LineSink> = console.clone();

    // Capture first so the terminal formatter can write to the real stderr
    // instead of the captured one.
    let intercepted = OutputInterceptor::install(sink.clone());
    match &intercepted {
        Ok(interceptor) => logging::init(&settings.log.level, sink, interceptor.real_stderr())?,
        Err(_) => logging::init(&settings.log.level, sink, StderrWriter)?,
    }
    if let Err(e) = &intercepted {
        tracing::warn!(error = %e, "console capture disabled");
    }

    println!("Starting system monitor...");
    settings.print_summary();

    let facade = Arc::new(DashboardFacade::for_host(settings.dashboard.clone(), console));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let (bound, serving) = server::bind(facade, addr, shutdown)?;
    println!("Dashboard available at http://{}", bound);
    tracing::info!(%bound, "listening");

    serving.await;
    tracing::info!("shut down");
    Ok(())
}

/// `io::stderr()` as a cloneable writer, for when capture is unavailable.
#[derive(Clone, Copy)]
struct StderrWriter;

impl io::Write for StderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}
