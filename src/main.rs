use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::prelude::*;
use ratatui::style::{Modifier, Style};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};

use pl_predictor::badges::HttpBadgeFetcher;
use pl_predictor::config::Config;
use pl_predictor::delivery::{EnvCapabilityProbe, LocalDelivery};
use pl_predictor::export::{Exporter, KickoffDisplay};
use pl_predictor::fixtures::{format_kickoff, load_fixtures};
use pl_predictor::predictions::Side;
use pl_predictor::render::PngRasterizer;
use pl_predictor::state::AppState;
use pl_predictor::storage::Storage;
use pl_predictor::theme::Palette;

struct App {
    state: AppState,
    exporter: Exporter,
    kickoff: KickoffDisplay,
    should_quit: bool,
    pending_export: bool,
}

impl App {
    fn new(config: Config) -> Self {
        let storage = Arc::new(Storage::open_default(config.data_dir.as_deref()));
        let load = load_fixtures(&config.fixtures);
        let fetcher = Box::new(HttpBadgeFetcher::new(config.crest_proxy.clone()));
        let state = AppState::new(storage, load, fetcher, config.show_all_fixtures, Utc::now());

        let kickoff = KickoffDisplay {
            offset_hours: config.kickoff_offset_hours,
            tz_label: config.kickoff_tz_label.clone(),
        };
        let mut exporter = Exporter::new(
            Arc::new(PngRasterizer),
            Arc::new(LocalDelivery {
                export_dir: config.export_dir.clone(),
            }),
            Box::new(EnvCapabilityProbe {
                platform_override: config.platform.clone(),
            }),
        );
        exporter.share_url = config.share_url.clone();
        exporter.kickoff = kickoff.clone();

        Self {
            state,
            exporter,
            kickoff,
            should_quit: false,
            pending_export: false,
        }
    }

    fn on_key(&mut self, key: KeyEvent) {
        if self.state.help_overlay {
            if matches!(key.code, KeyCode::Char('?') | KeyCode::Esc | KeyCode::Char('q')) {
                self.state.help_overlay = false;
            }
            return;
        }
        match key.code {
            KeyCode::Char('q') => self.should_quit = true,
            KeyCode::Char('?') => self.state.help_overlay = true,
            KeyCode::Esc if self.state.debug.enabled() => self.state.toggle_debug(),
            KeyCode::Left | KeyCode::Char('h') => self.state.prev_week(),
            KeyCode::Right | KeyCode::Char('l') => self.state.next_week(),
            KeyCode::Down | KeyCode::Char('j') => self.state.select_next(),
            KeyCode::Up | KeyCode::Char('k') => self.state.select_prev(),
            KeyCode::Tab | KeyCode::BackTab => self.state.switch_side(),
            KeyCode::Char(c) if c.is_ascii_digit() => self.state.type_digit(c),
            KeyCode::Backspace => self.state.backspace(),
            KeyCode::Char('x') | KeyCode::Delete => self.state.clear_selected(),
            KeyCode::Char('t') => self.state.toggle_theme(),
            KeyCode::Char('g') => self.state.toggle_debug(),
            KeyCode::Char('c') => self.state.clear_debug(),
            KeyCode::Char('e') => {
                if self.state.active_week_data().is_some() && !self.exporter.is_busy() {
                    // Draw the busy state once before the blocking export runs.
                    self.state.export.busy = true;
                    self.pending_export = true;
                }
            }
            _ => {}
        }
    }

    fn run_pending_export(&mut self) {
        if !self.pending_export {
            return;
        }
        self.pending_export = false;
        self.state.export_active_week(&self.exporter, Utc::now());
    }
}

fn main() -> io::Result<()> {
    let config = Config::load();
    let mut app = App::new(config);

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = ratatui::backend::CrosstermBackend::new(stdout);
    let mut terminal = ratatui::Terminal::new(backend)?;

    let res = run_app(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        eprintln!("error: {err}");
    }
    Ok(())
}

fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> io::Result<()> {
    let tick_rate = Duration::from_millis(250);
    let mut last_tick = Instant::now();

    loop {
        terminal.draw(|f| ui(f, app))?;
        if app.pending_export {
            app.run_pending_export();
            continue;
        }

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.on_key(key);
                }
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(frame: &mut Frame, app: &App) {
    let palette = app.state.theme.palette();
    let base = Style::default().fg(palette.fg).bg(palette.bg);
    frame.render_widget(Block::default().style(base), frame.size());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(1),
            Constraint::Length(1),
        ])
        .split(frame.size());

    let header = Paragraph::new(header_lines(&app.state, &palette))
        .block(Block::default().borders(Borders::BOTTOM))
        .style(base);
    frame.render_widget(header, chunks[0]);

    let status = Paragraph::new(status_lines(&app.state, &palette)).style(base);
    frame.render_widget(status, chunks[1]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(40), Constraint::Length(44)])
        .split(chunks[2]);
    render_matches(frame, body[0], app, &palette);
    render_summary(frame, body[1], &app.state, &palette);

    let footer = Paragraph::new(
        "←/→ Week | j/k Move | Tab Side | 0-9 Score | x Clear | e Export | t Theme | g Debug | ? Help | q Quit",
    )
    .style(Style::default().fg(palette.muted).bg(palette.bg));
    frame.render_widget(footer, chunks[3]);

    if app.state.debug.enabled() {
        render_debug_overlay(frame, frame.size(), &app.state, &palette);
    }
    if app.state.help_overlay {
        render_help_overlay(frame, frame.size());
    }
}

fn header_lines(state: &AppState, palette: &Palette) -> Vec<Line<'static>> {
    let storage = if state.storage.is_persistent() {
        "saved locally"
    } else {
        "session only"
    };
    let title = Line::from(vec![
        Span::styled(
            "PREMIER LEAGUE MATCHWEEK PREDICTOR",
            Style::default().fg(palette.accent).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("  | Theme: {} | Predictions {storage}", state.theme.as_str()),
            Style::default().fg(palette.muted),
        ),
    ]);

    let weeks = state.weeks();
    let selector = if weeks.is_empty() {
        Line::from(Span::styled(
            "No fixtures available yet.",
            Style::default().fg(palette.muted),
        ))
    } else {
        let mut spans = vec![Span::raw("Matchweek: ")];
        for week in weeks {
            let label = format!(" GW {week} ");
            if state.active_week == Some(week) {
                spans.push(Span::styled(
                    label,
                    Style::default()
                        .fg(palette.bg)
                        .bg(palette.accent)
                        .add_modifier(Modifier::BOLD),
                ));
            } else {
                spans.push(Span::styled(label, Style::default().fg(palette.muted)));
            }
        }
        Line::from(spans)
    };
    vec![title, selector]
}

fn status_lines(state: &AppState, palette: &Palette) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    if let Some(notice) = &state.notice {
        lines.push(Line::from(Span::styled(
            notice.clone(),
            Style::default().fg(palette.highlight),
        )));
    }
    if let Some(line) = state.export.line() {
        let style = if state.export.error.is_some() {
            Style::default().fg(palette.error)
        } else {
            Style::default().fg(palette.accent)
        };
        lines.push(Line::from(Span::styled(line, style)));
    }
    lines
}

fn render_matches(frame: &mut Frame, area: Rect, app: &App, palette: &Palette) {
    let state = &app.state;
    let title = match state.active_week {
        Some(week) if state.has_predictions_this_week() => format!("GW {week} (predicted)"),
        Some(week) => format!("GW {week}"),
        None => "Matches".to_string(),
    };
    let block = Block::default().title(title).borders(Borders::ALL);

    let matches = state.active_matches();
    if state.active_week_data().is_none() || matches.is_empty() {
        let empty = Paragraph::new("Select a matchweek to start predicting.")
            .style(Style::default().fg(palette.muted))
            .block(block);
        frame.render_widget(empty, area);
        return;
    }

    const ROW_HEIGHT: usize = 2;
    let visible = (area.height.saturating_sub(2) as usize / ROW_HEIGHT).max(1);
    let (start, end) = visible_range(state.selected, matches.len(), visible);

    let mut lines = Vec::new();
    for (idx, (id, m)) in matches.iter().enumerate().take(end).skip(start) {
        let selected = idx == state.selected;
        let prediction = state.prediction_for(id);
        let score_style = |side: Side| {
            if selected && state.side == side {
                Style::default()
                    .fg(palette.bg)
                    .bg(palette.highlight)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(palette.fg).add_modifier(Modifier::BOLD)
            }
        };
        let score = |raw: &str| {
            if raw.is_empty() {
                " _ ".to_string()
            } else {
                format!("{raw:^3}")
            }
        };
        let prefix = if selected { "> " } else { "  " };
        lines.push(Line::from(vec![
            Span::raw(prefix),
            Span::raw(format!("{:>24} ", m.home)),
            Span::styled(score(&prediction.home), score_style(Side::Home)),
            Span::raw(" - "),
            Span::styled(score(&prediction.away), score_style(Side::Away)),
            Span::raw(format!(" {:<24}", m.away)),
        ]));
        let kickoff = format_kickoff(&m.kickoff, app.kickoff.offset_hours, &app.kickoff.tz_label);
        let meta = if m.venue.is_empty() {
            kickoff
        } else {
            format!("{kickoff} · {}", m.venue)
        };
        lines.push(Line::from(Span::styled(
            format!("    {meta}"),
            Style::default().fg(palette.muted),
        )));
    }

    let list = Paragraph::new(lines).block(block);
    frame.render_widget(list, area);
}

fn render_summary(frame: &mut Frame, area: Rect, state: &AppState, palette: &Palette) {
    let rows = state.summary_rows();
    let block = Block::default().title("Your predictions").borders(Borders::ALL);
    if rows.is_empty() {
        let empty = Paragraph::new("No predictions yet.")
            .style(Style::default().fg(palette.muted))
            .block(block);
        frame.render_widget(empty, area);
        return;
    }
    let lines: Vec<Line> = rows
        .iter()
        .map(|row| {
            Line::from(vec![
                Span::styled(format!("GW{:<3}", row.week), Style::default().fg(palette.muted)),
                Span::raw(row.label.clone()),
                Span::styled(format!(" ({})", row.result), Style::default().fg(palette.accent)),
            ])
        })
        .collect();
    let summary = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: true });
    frame.render_widget(summary, area);
}

fn visible_range(selected: usize, total: usize, visible: usize) -> (usize, usize) {
    if total == 0 {
        return (0, 0);
    }
    if total <= visible {
        return (0, total);
    }

    let mut start = selected.saturating_sub(visible / 2);
    if start + visible > total {
        start = total - visible;
    }
    (start, start + visible)
}

fn render_debug_overlay(frame: &mut Frame, area: Rect, state: &AppState, palette: &Palette) {
    let height = area.height.min(14);
    let popup = Rect {
        x: area.x,
        y: area.y + area.height - height,
        width: area.width,
        height,
    };
    frame.render_widget(Clear, popup);

    let shown = height.saturating_sub(2) as usize;
    let text = if state.debug.is_empty() {
        "No debug messages yet.".to_string()
    } else {
        let skip = state.debug.len().saturating_sub(shown);
        state.debug.entries().skip(skip).collect::<Vec<_>>().join("\n")
    };
    let debug = Paragraph::new(text)
        .block(
            Block::default()
                .title("Debug (g hide, c clear)")
                .borders(Borders::ALL),
        )
        .style(Style::default().fg(palette.fg).bg(palette.bg));
    frame.render_widget(debug, popup);
}

fn render_help_overlay(frame: &mut Frame, area: Rect) {
    let popup_area = centered_rect(60, 60, area);
    frame.render_widget(Clear, popup_area);

    let text = [
        "Matchweek Predictor - Help",
        "",
        "Weeks:",
        "  ←/→ or h/l   Previous / next matchweek",
        "",
        "Predictions:",
        "  j/k or ↑/↓   Move between matches",
        "  Tab          Switch home / away score",
        "  0-9          Type a score (max 20)",
        "  Backspace    Delete last digit",
        "  x            Clear the match",
        "",
        "Other:",
        "  e            Export matchweek graphic",
        "  t            Toggle light / dark theme",
        "  g            Toggle debug log, c clears it",
        "  ?            Toggle help",
        "  q            Quit",
    ]
    .join("\n");

    let help = Paragraph::new(text)
        .block(Block::default().title("Help").borders(Borders::ALL))
        .style(Style::default());
    frame.render_widget(help, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    let horizontal = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1]);

    horizontal[1]
}
