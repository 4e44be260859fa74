//! Zone TUI - live occupancy dashboard
//!
//! Polls the service's `/status` endpoint and displays:
//! - Total / free / occupied zone counts
//! - Occupancy ratio gauge
//! - Recent operator actions and their HTTP result
//!
//! Keys: `r` remove last zone, `c` remove all zones, `a` toggle any-class
//! mode, `q`/`Esc` quit.

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, List, ListItem, Paragraph},
    Frame, Terminal,
};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use zone_occupancy::services::StatusSnapshot;

/// Maximum actions to keep in history
const MAX_ACTIONS: usize = 12;

/// Status older than this is shown as stale
const STALE_AFTER: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "zone-tui", version, about = "Live zone occupancy dashboard")]
struct Args {
    /// Base URL of the zone-occupancy HTTP surface
    #[arg(default_value = "http://localhost:8080")]
    url: String,

    /// Poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_ms: u64,
}

/// One operator action and how the service answered
#[derive(Debug, Clone)]
struct Action {
    at: Instant,
    label: &'static str,
    result: Result<u16, String>,
}

/// Dashboard state shared between the poller and the UI
#[derive(Debug, Default)]
struct DashboardState {
    status: Option<StatusSnapshot>,
    last_update: Option<Instant>,
    last_error: Option<String>,
    actions: VecDeque<Action>,
    polls: u64,
}

type SharedState = Arc<Mutex<DashboardState>>;

impl DashboardState {
    fn update_status(&mut self, status: StatusSnapshot) {
        self.status = Some(status);
        self.last_update = Some(Instant::now());
        self.last_error = None;
        self.polls += 1;
    }

    fn record_action(&mut self, action: Action) {
        self.actions.push_front(action);
        self.actions.truncate(MAX_ACTIONS);
    }

    /// Any-class mode as last reported by the service
    fn any_class(&self) -> Option<bool> {
        self.status.as_ref().map(|s| s.any_class)
    }

    fn connected(&self) -> bool {
        self.last_update.is_some_and(|t| t.elapsed() < STALE_AFTER)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let base_url = args.url.trim_end_matches('/').to_string();
    let client = reqwest::Client::builder().timeout(Duration::from_secs(2)).build()?;

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let state: SharedState = Arc::new(Mutex::new(DashboardState::default()));

    let poll_state = state.clone();
    let poll_client = client.clone();
    let poll_url = format!("{base_url}/status");
    let poll_interval = Duration::from_millis(args.poll_ms.max(50));
    let poll_handle = tokio::spawn(async move {
        run_status_poller(poll_client, poll_url, poll_interval, poll_state).await;
    });

    let result = run_ui(&mut terminal, state, client, base_url).await;

    poll_handle.abort();
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn fetch_status(client: &reqwest::Client, url: &str) -> Result<StatusSnapshot, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("HTTP {}", resp.status().as_u16()));
    }
    let body = resp.text().await.map_err(|e| e.to_string())?;
    serde_json::from_str(&body).map_err(|e| e.to_string())
}

async fn run_status_poller(client: reqwest::Client, url: String, interval: Duration, state: SharedState) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let result = fetch_status(&client, &url).await;
        let mut s = state.lock().await;
        match result {
            Ok(status) => s.update_status(status),
            Err(e) => s.last_error = Some(e),
        }
    }
}

/// Send one operator command and log the outcome in the dashboard
fn spawn_command(request: reqwest::RequestBuilder, label: &'static str, state: SharedState) {
    tokio::spawn(async move {
        let result = match request.send().await {
            Ok(resp) => Ok(resp.status().as_u16()),
            Err(e) => Err(e.to_string()),
        };
        state.lock().await.record_action(Action { at: Instant::now(), label, result });
    });
}

async fn run_ui(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: SharedState,
    client: reqwest::Client,
    base_url: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    loop {
        let s = state.lock().await;
        terminal.draw(|f| draw_ui(f, &s, &base_url))?;
        drop(s);

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                        KeyCode::Char('r') => {
                            let req = client.post(format!("{base_url}/zones/remove-last"));
                            spawn_command(req, "remove last", state.clone());
                        }
                        KeyCode::Char('c') => {
                            let req = client.delete(format!("{base_url}/zones"));
                            spawn_command(req, "remove all", state.clone());
                        }
                        KeyCode::Char('a') => {
                            // Toggle from the served mode; nothing to toggle before the first poll
                            let enabled = {
                                let mut s = state.lock().await;
                                match s.status.as_mut() {
                                    Some(status) => {
                                        status.any_class = !status.any_class;
                                        status.any_class
                                    }
                                    None => continue,
                                }
                            };
                            let body = serde_json::json!({ "enabled": enabled }).to_string();
                            let req = client
                                .post(format!("{base_url}/mode/any-class"))
                                .header("Content-Type", "application/json")
                                .body(body);
                            let label = if enabled { "any-class on" } else { "any-class off" };
                            spawn_command(req, label, state.clone());
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }
    }
}

fn draw_ui(f: &mut Frame, state: &DashboardState, base_url: &str) {
    let main_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header
            Constraint::Length(7), // Counts
            Constraint::Min(0),    // Actions
            Constraint::Length(1), // Key help
        ])
        .split(f.area());

    draw_header(f, main_chunks[0], state, base_url);
    draw_counts_panel(f, main_chunks[1], state);
    draw_actions_panel(f, main_chunks[2], state);

    let help = Paragraph::new(Line::from(vec![
        Span::styled(" r", Style::default().fg(Color::Yellow)),
        Span::raw(" remove last  "),
        Span::styled("c", Style::default().fg(Color::Yellow)),
        Span::raw(" remove all  "),
        Span::styled("a", Style::default().fg(Color::Yellow)),
        Span::raw(" any-class  "),
        Span::styled("q", Style::default().fg(Color::Yellow)),
        Span::raw(" quit"),
    ]));
    f.render_widget(help, main_chunks[3]);
}

fn draw_header(f: &mut Frame, area: Rect, state: &DashboardState, base_url: &str) {
    let (conn_text, conn_color) = if state.connected() {
        ("LIVE", Color::Green)
    } else if state.last_update.is_some() {
        ("STALE", Color::Yellow)
    } else {
        ("WAITING", Color::Red)
    };

    let mut spans = vec![
        Span::styled(" ZONE OCCUPANCY ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(format!(" {base_url} ")),
        Span::styled(format!("[{conn_text}]"), Style::default().fg(conn_color)),
        Span::raw(format!(
            "  any-class: {}",
            match state.any_class() {
                Some(true) => "on",
                Some(false) => "off",
                None => "-",
            }
        )),
    ];
    if let Some(err) = &state.last_error {
        spans.push(Span::styled(format!("  {err}"), Style::default().fg(Color::Red)));
    }

    let header = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    f.render_widget(header, area);
}

fn draw_counts_panel(f: &mut Frame, area: Rect, state: &DashboardState) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let (total, free, occupied, frame, ts) = match &state.status {
        Some(s) => (s.total, s.free, s.occupied, s.frame, s.timestamp.format("%H:%M:%S").to_string()),
        None => (0, 0, 0, 0, "-".to_string()),
    };

    let counts = Paragraph::new(vec![
        Line::from(format!("Total:     {total}")),
        Line::from(Span::styled(format!("Free:      {free}"), Style::default().fg(Color::Green))),
        Line::from(Span::styled(format!("Occupied:  {occupied}"), Style::default().fg(Color::Red))),
        Line::from(format!("Frame:     {frame}  ({ts} UTC)")),
        Line::from(format!("Polls:     {}", state.polls)),
    ])
    .block(
        Block::default()
            .title(" Zones ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );
    f.render_widget(counts, chunks[0]);

    let ratio = if total > 0 { occupied as f64 / total as f64 } else { 0.0 };
    let color = if ratio < 0.5 {
        Color::Green
    } else if ratio < 0.9 {
        Color::Yellow
    } else {
        Color::Red
    };
    let gauge = Gauge::default()
        .block(Block::default().title(" Occupancy ").borders(Borders::ALL))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(format!("{occupied}/{total}"));
    f.render_widget(gauge, chunks[1]);
}

fn draw_actions_panel(f: &mut Frame, area: Rect, state: &DashboardState) {
    let items: Vec<ListItem> = state
        .actions
        .iter()
        .map(|a| {
            let (text, color) = match &a.result {
                Ok(202) => ("accepted".to_string(), Color::Green),
                Ok(503) => ("busy (503)".to_string(), Color::Yellow),
                Ok(code) => (format!("HTTP {code}"), Color::Red),
                Err(e) => (e.clone(), Color::Red),
            };
            ListItem::new(Line::from(vec![
                Span::raw(format!("{:>4}s ago  ", a.at.elapsed().as_secs())),
                Span::styled(format!("{:<14}", a.label), Style::default().fg(Color::Cyan)),
                Span::styled(text, Style::default().fg(color)),
            ]))
        })
        .collect();

    let list = List::new(items).block(
        Block::default()
            .title(" Actions ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Magenta)),
    );
    f.render_widget(list, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_any_class_follows_served_status() {
        let mut state = DashboardState::default();
        assert_eq!(state.any_class(), None);

        state.update_status(StatusSnapshot {
            total: 2,
            free: 2,
            occupied: 0,
            timestamp: Utc::now(),
            frame: 5,
            any_class: true,
        });
        assert_eq!(state.any_class(), Some(true));
        assert!(state.connected());
    }
}
