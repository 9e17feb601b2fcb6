use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{self as channel, Receiver, TryRecvError};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Modifier, Style},
    widgets::{Block, Borders, Paragraph, Row, Table},
    Frame, Terminal,
};

use crate::cli::Config;
use crate::metrics::Horizon;
use crate::report::{build_report, format_age, format_bytes, format_rate, log_summary, Report};
use crate::state::{SharedTable, TableSnapshot};
use crate::ui::plain::{load_line, totals_line, truncate};

const POLL: Duration = Duration::from_millis(200);

/// Table rows that fit in `area` once borders and the column header are drawn.
pub fn rows_for_area(area: Rect) -> usize {
    area.height.saturating_sub(3) as usize
}

/// Keeps the newest status line. Returns `false` once the ingestion side has hung up.
fn drain_status(status: &Receiver<String>, latest: &mut Option<String>) -> bool {
    loop {
        match status.try_recv() {
            Ok(msg) => *latest = Some(msg),
            Err(TryRecvError::Empty) => return true,
            Err(TryRecvError::Disconnected) => return false,
        }
    }
}

struct View {
    snapshot: TableSnapshot,
    taken_at: Instant,
    clock: String,
    status: Option<String>,
}

pub fn run_tui(
    table: SharedTable,
    config: &Config,
    status: Receiver<String>,
    stop: Arc<AtomicBool>,
    deadline: Option<Instant>,
) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = event_loop(&mut terminal, table, config, status, &stop, deadline);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>,
    table: SharedTable,
    config: &Config,
    status: Receiver<String>,
    stop: &AtomicBool,
    deadline: Option<Instant>,
) -> Result<()> {
    let ticker = channel::tick(config.report_interval);
    let mut view = View {
        snapshot: table.snapshot(),
        taken_at: Instant::now(),
        clock: super::clock(),
        status: None,
    };

    while !stop.load(Ordering::Relaxed) {
        if deadline.map_or(false, |d| Instant::now() >= d) {
            stop.store(true, Ordering::Relaxed);
            break;
        }
        // sender is dropped only when the ingestion thread exits
        if !drain_status(&status, &mut view.status) {
            break;
        }
        if ticker.try_recv().is_ok() {
            view.snapshot = table.snapshot();
            view.taken_at = Instant::now();
            view.clock = super::clock();
            log_summary(&build_report(&view.snapshot, 0, view.taken_at));
        }

        terminal.draw(|f| draw(f, &view))?;

        if event::poll(POLL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press
                    && (matches!(key.code, KeyCode::Char('q') | KeyCode::Esc)
                        || (key.code == KeyCode::Char('c')
                            && key.modifiers.contains(KeyModifiers::CONTROL)))
                {
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }
    }
    Ok(())
}

fn draw(f: &mut Frame, view: &View) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(5), // summary
                Constraint::Min(0),    // top talkers
                Constraint::Length(1), // footer
            ]
            .as_ref(),
        )
        .split(f.size());

    // the row budget follows the terminal size on every frame
    let report = build_report(&view.snapshot, rows_for_area(outer[1]), view.taken_at);

    let summary = Paragraph::new(format!(
        "{}\n{}\n{}",
        view.clock,
        totals_line(&report),
        load_line(&report)
    ))
    .block(
        Block::default()
            .title("Zigbee2MQTT Network Monitor")
            .borders(Borders::ALL),
    );
    f.render_widget(summary, outer[0]);

    f.render_widget(talkers_table(&report), outer[1]);

    let footer = match &view.status {
        Some(s) => format!("q: quit | {s}"),
        None => "q: quit | waiting for broker...".to_string(),
    };
    f.render_widget(Paragraph::new(footer), outer[2]);
}

fn talkers_table(report: &Report) -> Table<'static> {
    let mut columns: Vec<String> = vec!["Device/Topic".into(), "Messages".into(), "Data Volume".into()];
    columns.extend(Horizon::ALL.iter().map(|h| format!("Msg/s {}", h.label())));
    columns.push(format!("Rate {}", Horizon::Short.label()));
    columns.push("First Seen".into());
    columns.push("Last Seen".into());
    let header = Row::new(columns).style(Style::default().add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = report
        .rows
        .iter()
        .map(|r| {
            Row::new(vec![
                truncate(r.key.as_str(), 40).to_string(),
                r.message_count.to_string(),
                format_bytes(r.byte_count),
                format!("{:.2}", r.message_rate(Horizon::Short)),
                format!("{:.2}", r.message_rate(Horizon::Medium)),
                format!("{:.2}", r.message_rate(Horizon::Long)),
                format_rate(r.byte_rate(Horizon::Short)),
                format_age(r.first_seen_secs),
                format_age(r.last_seen_secs),
            ])
        })
        .collect();

    let title = if report.rows.is_empty() {
        "Top talkers (waiting for messages...)".to_string()
    } else {
        format!("Top talkers ({} of {})", report.rows.len(), report.total_keys)
    };

    Table::new(
        rows,
        [
            Constraint::Min(20),
            Constraint::Length(10),
            Constraint::Length(12),
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(22),
            Constraint::Length(11),
            Constraint::Length(11),
        ],
    )
    .header(header)
    .block(Block::default().title(title).borders(Borders::ALL))
}
