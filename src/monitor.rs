use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{self as channel, Receiver};
use crossterm::{
    cursor::MoveTo,
    execute,
    terminal::{self, Clear, ClearType},
};
use tracing::{info, warn};

use crate::cli::{Config, OutputFormat};
use crate::ingest::{connect, run_ingest, Ingestor};
use crate::report::{build_report, log_summary};
use crate::state::{SharedTable, TrafficTable};
use crate::ui::overview::run_tui;
use crate::ui::plain::{self, rows_for_height};

const POLL: Duration = Duration::from_millis(200);
const FALLBACK_SIZE: (u16, u16) = (80, 24);

pub fn run_monitor(config: Config) -> Result<()> {
    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop = stop_flag.clone();
        let _ = ctrlc::set_handler(move || {
            stop.store(true, Ordering::Relaxed);
        });
    }

    run_monitor_with_shutdown(config, stop_flag)
}

pub(crate) fn run_monitor_with_shutdown(config: Config, stop_flag: Arc<AtomicBool>) -> Result<()> {
    info!(
        host = %config.broker.host,
        port = config.broker.port,
        topic = %config.subscription(),
        detail = config.detail_depth,
        ignore_bridge = config.ignore_bridge,
        "Starting z2m-traffic"
    );
    let deadline = config.duration.map(|d| Instant::now() + d);
    let table = SharedTable::new(TrafficTable::new());
    let (status_tx, status_rx) = channel::unbounded::<String>();

    // Ingestion thread: MQTT -> table
    let (client, connection) = connect(&config.broker);
    let ingestor = Ingestor::new(table.clone(), &config);
    let subscription = config.subscription();
    let stop_ingest = stop_flag.clone();
    let ingest_client = client.clone();
    let ingest = thread::spawn(move || {
        run_ingest(ingest_client, connection, ingestor, subscription, status_tx, stop_ingest)
    });

    let result = match config.output {
        OutputFormat::Tui => run_tui(table.clone(), &config, status_rx, stop_flag.clone(), deadline),
        OutputFormat::Plain | OutputFormat::Json => {
            run_printer(&table, &config, status_rx, &stop_flag, deadline)
        }
    };

    // Shutdown
    info!("Shutting down");
    stop_flag.store(true, Ordering::Relaxed);
    // wakes the connection iterator so the ingestion thread sees the stop flag
    if let Err(e) = client.try_disconnect() {
        warn!(error = %e, "Disconnect request failed");
    }
    let joined = ingest.join();

    let final_report = build_report(&table.snapshot(), 0, Instant::now());
    log_summary(&final_report);
    finish(result, joined)
}

/// Combines the sink and ingestion outcomes; the sink's error wins.
fn finish(sink: Result<()>, ingest: thread::Result<Result<()>>) -> Result<()> {
    let ingest = ingest.unwrap_or_else(|_| Err(anyhow!("Ingestion thread panicked")));
    match (sink, ingest) {
        (Err(e), Err(ingest_err)) => {
            warn!(error = ?ingest_err, "Ingestion error on shutdown");
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), ingest) => ingest.context("Ingestion stopped"),
    }
}

/// Prints a report every interval, as text or as JSON lines.
fn run_printer(
    table: &SharedTable,
    config: &Config,
    status: Receiver<String>,
    stop: &AtomicBool,
    deadline: Option<Instant>,
) -> Result<()> {
    let ticker = channel::tick(config.report_interval);
    let mut stdout = std::io::stdout();
    let interactive = stdout.is_terminal();
    let mut last_status: Option<String> = None;
    let mut ingest_alive = true;

    while ingest_alive && !stop.load(Ordering::Relaxed) {
        if deadline.map_or(false, |d| Instant::now() >= d) {
            break;
        }
        channel::select! {
            recv(ticker) -> _ => {
                let snapshot = table.snapshot();
                let now = Instant::now();
                match config.output {
                    OutputFormat::Json => {
                        let report = build_report(&snapshot, snapshot.records.len(), now);
                        log_summary(&report);
                        let line = report.to_json().context("Serializing report")?;
                        writeln!(stdout, "{line}").context("Writing report")?;
                    }
                    _ => {
                        let (columns, lines) = terminal::size().unwrap_or(FALLBACK_SIZE);
                        let report = build_report(&snapshot, rows_for_height(lines), now);
                        log_summary(&report);
                        if interactive {
                            execute!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;
                        }
                        let text = plain::render(&report, &crate::ui::clock(), columns, last_status.as_deref());
                        if interactive {
                            write!(stdout, "{text}")
                        } else {
                            writeln!(stdout, "{text}")
                        }
                        .context("Writing report")?;
                    }
                }
                stdout.flush()?;
            },
            recv(status) -> msg => match msg {
                Ok(m) => last_status = Some(m),
                // sender is dropped only when the ingestion thread exits
                Err(_) => ingest_alive = false,
            },
            default(POLL) => {}
        }
    }
    Ok(())
}
