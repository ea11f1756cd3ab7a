use futures::{Future, FutureExt};
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "info";

pub fn setup_tracing() {
    let filter_layer =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = fmt::layer()
        .with_line_number(true)
        .compact()
        .with_writer(std::io::stdout);

    // A second call (tests, embedded use) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .try_init();
}

/// Installs tracing, runs the service and logs how it ended, panics included.
pub async fn run_with_tracing<F, Fut>(future: F) -> Result<(), anyhow::Error>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
{
    setup_tracing();

    let result = std::panic::AssertUnwindSafe(future()).catch_unwind().await;

    let outcome = match result {
        Ok(Ok(())) => {
            info!("Service stopped");
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = ?e, "Service failed");
            Err(e)
        }
        Err(panic) => {
            let message = capture_panic_details(panic);
            Err(anyhow::anyhow!("service panicked: {message}"))
        }
    };

    shutdown_tracing().await;
    outcome
}

fn capture_panic_details(e: Box<dyn std::any::Any + Send>) -> String {
    let backtrace = backtrace::Backtrace::new();
    if let Some(s) = e.downcast_ref::<&str>() {
        error!(panic_message = *s, backtrace = ?backtrace, "Panic occurred with message");
        s.to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        error!(panic_message = s, backtrace = ?backtrace, "Panic occurred with message");
        s.clone()
    } else {
        error!(backtrace = ?backtrace, "Panic occurred but the payload is not a string");
        "non-string panic payload".to_string()
    }
}

pub async fn shutdown_tracing() {
    // stdout is line buffered; give in-flight events a moment to land
    tokio::time::sleep(Duration::from_millis(100)).await;
}
