use anyhow::{bail, Result};
use clap::Parser;
use std::sync::{Arc, Mutex};

use mailreg::args::{Cli, Commands};
use mailreg::attempt::AttemptOutcome;
use mailreg::config::Config;
use mailreg::driver::BrowserSession;
use mailreg::export::AccountRow;
use mailreg::intent::{IntentBoard, Reporter, RunEvent};
use mailreg::run::{run_single, Orchestrator, RunPlan};
use mailreg::{export, logging};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();
    let config = Config::load(cli.config)?;
    config.validate()?;

    match cli.command {
        Commands::Register {
            local,
            password,
            phone,
        } => {
            let password = password.unwrap_or_else(|| config.default_password.clone());
            let phone = phone.unwrap_or_else(|| config.default_phone.clone());
            register_one(&config, &local, &password, &phone).await
        }
        Commands::Batch {
            start,
            end,
            password,
            phone,
        } => {
            let password = password.unwrap_or_else(|| config.default_password.clone());
            let phone = phone.unwrap_or_else(|| config.default_phone.clone());
            batch(&config, &start, &end, password, phone).await
        }
    }
}

#[cfg(feature = "browser")]
async fn launch_session(config: &Config) -> Result<Box<dyn BrowserSession>> {
    use mailreg::driver::cdp::CdpSession;
    Ok(Box::new(CdpSession::launch(config).await?))
}

#[cfg(not(feature = "browser"))]
async fn launch_session(_config: &Config) -> Result<Box<dyn BrowserSession>> {
    bail!("this build has no browser support; rebuild with the `browser` feature")
}

async fn register_one(config: &Config, local: &str, password: &str, phone: &str) -> Result<()> {
    println!("Registering {local}{} ...", config.domain);
    let session = launch_session(config).await?;

    let intents = Arc::new(IntentBoard::new());
    let (reporter, mut events) = Reporter::channel();

    // The human-done signal comes from Enter on stdin.
    spawn_stdin_controller(Arc::clone(&intents), None, config.export_dir.clone());
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let RunEvent::HumanNeeded { email } = event {
                println!(
                    "Complete the verification for {email} in the browser \
                     (captcha / agreement / submit / SMS or QR), then press Enter."
                );
            }
        }
    });

    let report = run_single(config, session, intents, reporter, local, password, phone).await?;
    match report.outcome {
        AttemptOutcome::Success => {
            println!("Registration succeeded.");
            Ok(())
        }
        AttemptOutcome::Failed => {
            bail!(
                "registration failed: {}",
                report.reason.unwrap_or_else(|| "unknown".to_string())
            )
        }
    }
}

async fn batch(
    config: &Config,
    start: &str,
    end: &str,
    password: String,
    phone: String,
) -> Result<()> {
    let plan = RunPlan::from_range(config, start, end, password, phone)?;
    println!(
        "Registering {} accounts ({} .. {}).",
        plan.emails.len(),
        plan.emails.first().map(String::as_str).unwrap_or(""),
        plan.emails.last().map(String::as_str).unwrap_or(""),
    );
    println!("Controls: Enter = verification done, s = skip, p = pause, r = resume, t N = switch tab, e = export.");

    let session = launch_session(config).await?;
    let intents = Arc::new(IntentBoard::new());
    let (reporter, mut events) = Reporter::channel();

    // Rows accumulated for on-demand export snapshots.
    let rows: Arc<Mutex<Vec<AccountRow>>> = Arc::new(Mutex::new(Vec::new()));

    spawn_stdin_controller(
        Arc::clone(&intents),
        Some(Arc::clone(&rows)),
        config.export_dir.clone(),
    );

    let display_rows = Arc::clone(&rows);
    let shared_password = plan.password.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RunEvent::HumanNeeded { email } => {
                    println!(
                        "[{email}] complete the verification in the browser, \
                         then press Enter (or 's' to skip)."
                    );
                }
                RunEvent::Progress { index, total } => {
                    println!("Progress: {index}/{total}");
                }
                RunEvent::AccountRecorded { email, success } => {
                    let status = if success { "success" } else { "failed" };
                    println!("[{email}] {status}");
                    if let Ok(mut rows) = display_rows.lock() {
                        rows.push(AccountRow {
                            email,
                            password: shared_password.clone(),
                            status: status.to_string(),
                            timestamp: chrono::Local::now()
                                .format("%Y-%m-%d %H:%M:%S")
                                .to_string(),
                        });
                    }
                }
                RunEvent::Error { message } => {
                    eprintln!("error: {message}");
                }
                RunEvent::Completed => {
                    println!("Run complete.");
                }
                RunEvent::StateChanged { .. } => {}
            }
        }
    });

    let orchestrator = Orchestrator::new(config.clone(), intents, reporter)?;
    let summary = orchestrator.execute(session, &plan).await?;
    println!(
        "Done: {} succeeded, {} failed, {} skipped (of {}).",
        summary.succeeded, summary.failed, summary.skipped, summary.total
    );
    Ok(())
}

/// Minimal stdin controller standing in for an external GUI: reads one
/// command per line and raises the matching intent. Runs on a plain thread
/// since stdin reads block.
fn spawn_stdin_controller(
    intents: Arc<IntentBoard>,
    rows: Option<Arc<Mutex<Vec<AccountRow>>>>,
    export_dir: std::path::PathBuf,
) {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut line = String::new();
        loop {
            line.clear();
            match stdin.read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let command = line.trim();
            match command {
                "" => intents.mark_done(),
                "s" => intents.request_skip(),
                "p" => intents.pause(),
                "r" => intents.resume(),
                "e" => {
                    if let Some(rows) = &rows {
                        let snapshot = rows.lock().map(|r| r.clone()).unwrap_or_default();
                        match export::export_snapshot(&snapshot, &export_dir) {
                            Ok(path) => println!("Exported to {}", path.display()),
                            Err(e) => eprintln!("export failed: {e}"),
                        }
                    }
                }
                other => {
                    if let Some(index) = other
                        .strip_prefix("t ")
                        .or_else(|| other.strip_prefix('t'))
                        .and_then(|n| n.trim().parse::<usize>().ok())
                    {
                        intents.request_switch_tab(index);
                    } else {
                        eprintln!("unknown command: {other}");
                    }
                }
            }
        }
    });
}
