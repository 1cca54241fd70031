//! Fetch one URL with the fingerprinted transport and stream the body to
//! stdout. Exit status 0 on success, 1 on any failure.

use std::io::Write;
use std::process::ExitCode;
use std::time::Duration;

use guise::{Request, Transport};
use tracing_subscriber::EnvFilter;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args();
    let program = args.next().unwrap_or_else(|| "guise-get".into());
    let Some(url) = args.next() else {
        eprintln!("usage: {program} <url>");
        return ExitCode::FAILURE;
    };

    let result = tokio::select! {
        result = fetch(&url) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Error: interrupted");
            return ExitCode::FAILURE;
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn fetch(url: &str) -> guise::Result<()> {
    let transport = Transport::new();
    let req = Request::get(url)?.timeout(REQUEST_TIMEOUT);

    let mut res = transport.round_trip(req).await?;
    tracing::info!(
        status = res.status.as_u16(),
        version = res.version.as_str(),
        "response received"
    );

    let mut stdout = std::io::stdout().lock();
    loop {
        match res.body.chunk().await {
            Ok(Some(chunk)) => {
                if let Err(e) = stdout.write_all(&chunk) {
                    return Err(guise::Error::from(e).with_cleanup(res.body.close().await));
                }
            }
            Ok(None) => break,
            Err(e) => return Err(e.with_cleanup(res.body.close().await)),
        }
    }
    let _ = stdout.flush();
    res.body.close().await
}
