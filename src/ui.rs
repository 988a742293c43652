use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};

use crate::pipeline::{self, PipelineHandle, UiEvent};
use crate::session::{sanitize_issue_id, Session};
use crate::source::ArchiveSource;
use crate::status::StatusLog;

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_BG: Color = Color::Rgb(24, 24, 36);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_IDLE: Color = Color::Rgb(49, 50, 68);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);

const LOAD_ENTRY: &str = "load";
const MISSING_PAGE: &str = "Can't find file...";
const BODY_WIDTH: u16 = 86;
const STATUS_HEIGHT: u16 = 6;
const PAGE_STEP: u16 = 10;
const TICK_RATE: Duration = Duration::from_millis(100);

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pane {
    Pages,
    Body,
}

impl Pane {
    fn next(self) -> Self {
        match self {
            Pane::Pages => Pane::Body,
            Pane::Body => Pane::Pages,
        }
    }
}

#[derive(Clone)]
pub struct Options {
    pub issue_id: String,
    pub base_url: String,
    pub heartbeat: Duration,
    pub filler: String,
    pub source: Arc<dyn ArchiveSource>,
}

pub struct Model {
    base_url: String,
    heartbeat: Duration,
    filler: String,
    source: Arc<dyn ArchiveSource>,
    session: Option<Session>,
    pipeline: Option<PipelineHandle>,
    issue_id: String,
    pages: Vec<String>,
    selected: usize,
    body_title: String,
    body: String,
    body_scroll: u16,
    status: StatusLog,
    focused_pane: Pane,
    prompt: Option<String>,
    events_tx: Sender<UiEvent>,
    events_rx: Receiver<UiEvent>,
    needs_redraw: bool,
}

impl Model {
    /// Builds the model and starts loading `opts.issue_id` in the background.
    pub fn new(opts: Options) -> Result<Self> {
        let (events_tx, events_rx) = unbounded();
        let mut model = Self {
            base_url: opts.base_url,
            heartbeat: opts.heartbeat,
            filler: opts.filler,
            source: opts.source,
            session: Some(Session::new()),
            pipeline: None,
            issue_id: String::new(),
            pages: Vec::new(),
            selected: 0,
            body_title: String::new(),
            body: String::new(),
            body_scroll: 0,
            status: StatusLog::new(),
            focused_pane: Pane::Body,
            prompt: None,
            events_tx,
            events_rx,
            needs_redraw: true,
        };
        model.start_load(opts.issue_id)?;
        Ok(model)
    }

    pub fn run(&mut self) -> Result<()> {
        let mut stdout = io::stdout();
        enable_raw_mode()?;
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;

        let result = self.event_loop(&mut terminal);

        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        self.shutdown();
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            if self.poll_async()? {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            if event::poll(TICK_RATE)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press && self.handle_key(key)? {
                        break;
                    }
                }
                self.mark_dirty();
            }
        }
        Ok(())
    }

    /// Stops any in-flight load, waits for it, and releases the session.
    pub fn shutdown(&mut self) {
        if let Some(handle) = self.pipeline.take() {
            handle.cancel();
            match handle.join() {
                Ok(session) => self.session = Some(session),
                Err(err) => tracing::warn!(error = %err, "pipeline did not shut down cleanly"),
            }
        }
        if let Some(session) = self.session.as_mut() {
            session.release();
        }
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    pub fn is_loading(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Resets the session for `issue_id` and hands it to a new pipeline.
    /// Refused while another load is still running.
    pub fn start_load(&mut self, issue_id: String) -> Result<()> {
        if let Some(active) = &self.pipeline {
            tracing::info!(requested = %issue_id, active = %active.issue_id(), "reload refused");
            self.status.append(&format!(
                "\nIssue #{} is still loading, try again when it is done\n",
                active.issue_id()
            ));
            return Ok(());
        }

        let mut session = self.session.take().unwrap_or_default();
        session
            .reset(&issue_id, &self.base_url)
            .with_context(|| format!("prepare issue #{issue_id}"))?;

        self.status.clear();
        self.body_title = format!("Phrack Issue #{issue_id}");
        self.body.clear();
        self.body_scroll = 0;
        self.pages.clear();
        self.selected = 0;
        self.issue_id = issue_id;
        self.pipeline = Some(pipeline::spawn(
            session,
            self.source.clone(),
            self.events_tx.clone(),
            self.heartbeat,
        ));
        self.mark_dirty();
        Ok(())
    }

    /// Applies every pending pipeline event. Returns whether anything
    /// changed; a failed load comes back as an error.
    pub fn poll_async(&mut self) -> Result<bool> {
        let mut changed = false;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_ui_event(event)?;
            changed = true;
        }
        Ok(changed)
    }

    fn handle_ui_event(&mut self, event: UiEvent) -> Result<()> {
        match event {
            UiEvent::Status(text) => self.status.append(&text),
            UiEvent::Heartbeat => {
                let filler = self.filler.clone();
                self.status.append(&filler);
            }
            UiEvent::Indexed { page_count } => self.rebuild_pages(page_count),
            UiEvent::Finished(result) => {
                let handle = self
                    .pipeline
                    .take()
                    .ok_or_else(|| anyhow!("load finished without an active pipeline"))?;
                let issue_id = handle.issue_id().to_string();
                self.session = Some(handle.join()?);
                result.with_context(|| format!("load issue #{issue_id}"))?;
                if !self.pages.is_empty() {
                    self.show_page("1");
                }
            }
        }
        Ok(())
    }

    fn rebuild_pages(&mut self, page_count: usize) {
        self.pages = std::iter::once(LOAD_ENTRY.to_string())
            .chain((1..=page_count).map(|page| page.to_string()))
            .collect();
        self.selected = 0;
    }

    fn show_page(&mut self, page: &str) {
        let result = match self.session.as_ref() {
            Some(session) => session.read_page(page),
            None => Err(crate::error::PageError::NoIssue),
        };
        match result {
            Ok(text) => {
                self.body = text;
                self.body_scroll = 0;
                self.focused_pane = Pane::Body;
            }
            Err(err) => {
                tracing::debug!(page, error = %err, "page unavailable");
                self.body = MISSING_PAGE.to_string();
                self.body_scroll = 0;
            }
        }
    }

    fn open_prompt(&mut self) {
        self.prompt = Some(String::new());
    }

    fn submit_prompt(&mut self) -> Result<()> {
        let Some(input) = self.prompt.take() else {
            return Ok(());
        };
        self.focused_pane = Pane::Body;
        match sanitize_issue_id(&input) {
            Some(issue_id) => self.start_load(issue_id),
            None => {
                self.status
                    .append(&format!("\nIgnoring {input:?}: an issue number needs digits\n"));
                Ok(())
            }
        }
    }

    fn select_current(&mut self) -> Result<()> {
        let Some(line) = self.pages.get(self.selected).cloned() else {
            return Ok(());
        };
        if line == LOAD_ENTRY {
            self.open_prompt();
        } else {
            self.show_page(&line);
        }
        Ok(())
    }

    fn navigate(&mut self, delta: i32) {
        match self.focused_pane {
            Pane::Pages => {
                if self.pages.is_empty() {
                    return;
                }
                let last = self.pages.len() - 1;
                self.selected = if delta < 0 {
                    self.selected.saturating_sub(delta.unsigned_abs() as usize)
                } else {
                    (self.selected + delta as usize).min(last)
                };
            }
            Pane::Body => self.scroll_body(delta),
        }
    }

    fn scroll_body(&mut self, delta: i32) {
        let max = u16::try_from(self.body.lines().count().saturating_sub(1)).unwrap_or(u16::MAX);
        self.body_scroll = if delta < 0 {
            self.body_scroll.saturating_sub(delta.unsigned_abs() as u16)
        } else {
            self.body_scroll.saturating_add(delta as u16).min(max)
        };
    }

    /// Returns `true` when the application should quit.
    pub fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return Ok(true);
        }

        if let Some(input) = self.prompt.as_mut() {
            match key.code {
                KeyCode::Enter => self.submit_prompt()?,
                KeyCode::Esc => self.prompt = None,
                KeyCode::Backspace => {
                    input.pop();
                }
                KeyCode::Char(ch) => input.push(ch),
                _ => {}
            }
            return Ok(false);
        }

        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Tab | KeyCode::BackTab => self.focused_pane = self.focused_pane.next(),
            KeyCode::Up | KeyCode::Char('k') => self.navigate(-1),
            KeyCode::Down | KeyCode::Char('j') => self.navigate(1),
            KeyCode::PageUp => self.scroll_body(-(PAGE_STEP as i32)),
            KeyCode::PageDown => self.scroll_body(PAGE_STEP as i32),
            KeyCode::Enter if self.focused_pane == Pane::Pages => self.select_current()?,
            _ => {}
        }
        Ok(false)
    }

    fn pane_block(&self, pane: Pane, title: String) -> Block<'static> {
        let focused = self.focused_pane == pane && self.prompt.is_none();
        let border = if focused {
            COLOR_BORDER_FOCUSED
        } else {
            COLOR_BORDER_IDLE
        };
        let mut title_style = Style::default().fg(COLOR_TEXT_SECONDARY);
        if focused {
            title_style = title_style.fg(COLOR_ACCENT).add_modifier(Modifier::BOLD);
        }
        Block::default()
            .title(Span::styled(title, title_style))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(border))
            .style(Style::default().bg(COLOR_PANEL_BG).fg(COLOR_TEXT_PRIMARY))
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let full = frame.size();
        frame.render_widget(Block::default().style(Style::default().bg(COLOR_BG)), full);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(STATUS_HEIGHT)])
            .split(full);

        let body_width = BODY_WIDTH.min(rows[0].width.saturating_sub(12));
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(0), Constraint::Length(body_width)])
            .split(rows[0]);

        self.draw_pages(frame, columns[0]);
        self.draw_body(frame, columns[1]);
        self.draw_status(frame, rows[1]);

        if self.prompt.is_some() {
            self.draw_prompt(frame, full);
        }
    }

    fn draw_pages(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.pane_block(Pane::Pages, "Pages".to_string());
        if self.pages.is_empty() {
            let loading = Paragraph::new("Loading...")
                .block(block)
                .style(Style::default().fg(COLOR_TEXT_SECONDARY));
            frame.render_widget(loading, area);
            return;
        }

        let items: Vec<ListItem> = self
            .pages
            .iter()
            .map(|page| ListItem::new(Line::from(page.clone())))
            .collect();
        let list = List::new(items).block(block).highlight_style(
            Style::default()
                .bg(COLOR_PANEL_SELECTED_BG)
                .fg(COLOR_TEXT_PRIMARY)
                .add_modifier(Modifier::BOLD),
        );
        let mut state = ListState::default().with_selected(Some(self.selected));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn draw_body(&self, frame: &mut Frame<'_>, area: Rect) {
        let block = self.pane_block(Pane::Body, self.body_title.clone());
        let paragraph = Paragraph::new(self.body.as_str())
            .block(block)
            .wrap(Wrap { trim: false })
            .scroll((self.body_scroll, 0));
        frame.render_widget(paragraph, area);
    }

    fn draw_status(&mut self, frame: &mut Frame<'_>, area: Rect) {
        let block = Block::default()
            .title(Span::styled(
                "Status",
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ))
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_IDLE))
            .style(Style::default().bg(COLOR_PANEL_BG).fg(COLOR_TEXT_SECONDARY));
        self.status.set_visible_lines(block.inner(area).height);
        let paragraph = Paragraph::new(self.status.text())
            .block(block)
            .wrap(Wrap { trim: false })
            .scroll((self.status.origin(), 0));
        frame.render_widget(paragraph, area);
    }

    fn draw_prompt(&self, frame: &mut Frame<'_>, area: Rect) {
        let popup = centered_rect(60, 3, area);
        frame.render_widget(Clear, popup);
        let input = self.prompt.as_deref().unwrap_or_default();
        let prompt = Paragraph::new(Line::from(vec![
            Span::raw(input.to_string()),
            Span::styled("█", Style::default().fg(COLOR_ACCENT)),
        ]))
        .block(
            Block::default()
                .title(Span::styled(
                    "Issue Number To Load",
                    Style::default()
                        .fg(COLOR_ACCENT)
                        .add_modifier(Modifier::BOLD),
                ))
                .borders(Borders::ALL)
                .border_style(Style::default().fg(COLOR_ACCENT))
                .style(Style::default().bg(COLOR_PANEL_BG).fg(COLOR_TEXT_PRIMARY)),
        );
        frame.render_widget(prompt, popup);
    }
}

impl Drop for Model {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::testutil::{tar_gz_bytes, Item};
    use crate::source::testutil::{FailingSource, GatedSource, StubSource};
    use crossbeam_channel::bounded;
    use ratatui::backend::TestBackend;
    use std::thread;
    use std::time::Instant;

    fn two_page_issue() -> Vec<u8> {
        tar_gz_bytes(&[
            Item::File("1.txt", b"page one\nsecond line\nthird line", 0o644),
            Item::File("2.txt", b"page two", 0o644),
            Item::File("cover.nfo", b"not a page", 0o644),
        ])
    }

    fn options(issue: &str, source: Arc<dyn ArchiveSource>) -> Options {
        Options {
            issue_id: issue.to_string(),
            base_url: "http://stub.invalid/tgz".to_string(),
            heartbeat: Duration::from_millis(50),
            filler: ".".to_string(),
            source,
        }
    }

    fn wait_until_idle(model: &mut Model) -> Result<()> {
        let deadline = Instant::now() + Duration::from_secs(10);
        while model.is_loading() {
            model.poll_async()?;
            assert!(Instant::now() < deadline, "load did not finish");
            thread::sleep(Duration::from_millis(5));
        }
        Ok(())
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn type_text(model: &mut Model, text: &str) {
        for ch in text.chars() {
            model.handle_key(key(KeyCode::Char(ch))).unwrap();
        }
    }

    fn loaded_model(issue: &str) -> Model {
        let source = Arc::new(StubSource {
            body: two_page_issue(),
        });
        let mut model = Model::new(options(issue, source)).unwrap();
        wait_until_idle(&mut model).unwrap();
        model
    }

    #[test]
    fn initial_load_shows_first_page() {
        let model = loaded_model("20");
        assert_eq!(model.session().unwrap().page_count(), 2);
        assert_eq!(model.pages, vec!["load", "1", "2"]);
        assert_eq!(model.body_title, "Phrack Issue #20");
        assert!(model.body.starts_with("page one"));
        assert_eq!(model.focused_pane, Pane::Body);
        assert!(model.status.text().contains("Building UI"));
    }

    #[test]
    fn load_entry_opens_prompt_and_reloads_sanitized_issue() {
        let mut model = loaded_model("1");
        let old_scratch = model.session().unwrap().scratch_dir().unwrap().to_path_buf();

        model.handle_key(key(KeyCode::Tab)).unwrap();
        assert_eq!(model.focused_pane, Pane::Pages);
        assert_eq!(model.pages[model.selected], "load");
        model.handle_key(key(KeyCode::Enter)).unwrap();
        assert_eq!(model.prompt.as_deref(), Some(""));

        type_text(&mut model, "2a0");
        model.handle_key(key(KeyCode::Enter)).unwrap();
        assert!(model.prompt.is_none());
        assert!(model.is_loading());
        assert_eq!(model.issue_id, "20");

        wait_until_idle(&mut model).unwrap();
        let session = model.session().unwrap();
        assert_eq!(session.issue_id(), "20");
        assert!(session.source_url().ends_with("/phrack20.tar.gz"));
        assert!(!old_scratch.exists());
        assert!(model.body.starts_with("page one"));
    }

    #[test]
    fn prompt_without_digits_is_ignored() {
        let mut model = loaded_model("1");
        model.handle_key(key(KeyCode::Tab)).unwrap();
        model.handle_key(key(KeyCode::Enter)).unwrap();
        type_text(&mut model, "abc");
        model.handle_key(key(KeyCode::Backspace)).unwrap();
        model.handle_key(key(KeyCode::Enter)).unwrap();
        assert!(!model.is_loading());
        assert_eq!(model.session().unwrap().issue_id(), "1");
        assert!(model.status.text().contains("needs digits"));
    }

    #[test]
    fn escape_closes_prompt() {
        let mut model = loaded_model("1");
        model.handle_key(key(KeyCode::Tab)).unwrap();
        model.handle_key(key(KeyCode::Enter)).unwrap();
        type_text(&mut model, "q");
        assert!(model.prompt.is_some(), "q inside the prompt is input");
        model.handle_key(key(KeyCode::Esc)).unwrap();
        assert!(model.prompt.is_none());
        assert!(!model.is_loading());
    }

    #[test]
    fn selecting_pages_updates_body() {
        let mut model = loaded_model("1");
        model.handle_key(key(KeyCode::Tab)).unwrap();
        model.handle_key(key(KeyCode::Down)).unwrap();
        model.handle_key(key(KeyCode::Char('j'))).unwrap();
        assert_eq!(model.pages[model.selected], "2");
        model.handle_key(key(KeyCode::Enter)).unwrap();
        assert_eq!(model.body, "page two");
        assert_eq!(model.focused_pane, Pane::Body);

        model.handle_key(key(KeyCode::Tab)).unwrap();
        for _ in 0..5 {
            model.handle_key(key(KeyCode::Down)).unwrap();
        }
        assert_eq!(model.selected, 2);
        model.handle_key(key(KeyCode::Char('k'))).unwrap();
        assert_eq!(model.selected, 1);
    }

    #[test]
    fn missing_page_is_reported_inline() {
        let mut model = loaded_model("1");
        model.show_page("9");
        assert_eq!(model.body, MISSING_PAGE);
        assert!(model.session().unwrap().is_initialized());
    }

    #[test]
    fn body_scroll_is_clamped() {
        let mut model = loaded_model("1");
        assert_eq!(model.focused_pane, Pane::Body);
        for _ in 0..10 {
            model.handle_key(key(KeyCode::Down)).unwrap();
        }
        assert_eq!(model.body_scroll, 2);
        model.handle_key(key(KeyCode::PageUp)).unwrap();
        assert_eq!(model.body_scroll, 0);
    }

    #[test]
    fn body_scroll_reaches_end_of_very_long_page() {
        let mut model = loaded_model("1");
        model.body = "line\n".repeat(70_000);
        model.body_scroll = u16::MAX - 1;
        model.handle_key(key(KeyCode::PageDown)).unwrap();
        assert_eq!(model.body_scroll, u16::MAX);
    }

    #[test]
    fn reload_is_refused_while_loading() {
        let (gate_tx, gate_rx) = bounded(0);
        let source = Arc::new(GatedSource {
            gate: gate_rx,
            body: two_page_issue(),
        });
        let mut model = Model::new(options("1", source)).unwrap();
        assert!(model.is_loading());

        model.start_load("7".to_string()).unwrap();
        assert_eq!(model.issue_id, "1");
        assert!(model.status.text().contains("still loading"));

        gate_tx.send(()).unwrap();
        wait_until_idle(&mut model).unwrap();
        assert_eq!(model.session().unwrap().issue_id(), "1");
    }

    #[test]
    fn failed_load_surfaces_as_error() {
        let mut model = Model::new(options("3", Arc::new(FailingSource))).unwrap();
        let err = wait_until_idle(&mut model).unwrap_err();
        let text = format!("{err:#}");
        assert!(text.contains("load issue #3"), "got {text}");
        assert!(text.contains("connection refused"), "got {text}");
        assert!(!model.session().unwrap().is_initialized());
    }

    #[test]
    fn quit_keys() {
        let mut model = loaded_model("1");
        assert!(model
            .handle_key(KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL))
            .unwrap());
        assert!(model.handle_key(key(KeyCode::Char('q'))).unwrap());
    }

    #[test]
    fn shutdown_releases_scratch_dir() {
        let mut model = loaded_model("1");
        let scratch = model.session().unwrap().scratch_dir().unwrap().to_path_buf();
        model.shutdown();
        assert!(!scratch.exists());
        model.shutdown();
    }

    #[test]
    fn draw_renders_three_panes() {
        let mut model = loaded_model("20");
        let mut terminal = Terminal::new(TestBackend::new(120, 30)).unwrap();
        terminal.draw(|frame| model.draw(frame)).unwrap();
        let rendered: String = terminal
            .backend()
            .buffer()
            .content()
            .iter()
            .map(|cell| cell.symbol())
            .collect();
        assert!(rendered.contains("Pages"));
        assert!(rendered.contains("Phrack Issue #20"));
        assert!(rendered.contains("Status"));
        assert!(rendered.contains("page one"));
        assert!(rendered.contains("load"));
    }

    #[test]
    fn centered_rect_fits_area() {
        let area = Rect::new(0, 0, 40, 10);
        let rect = centered_rect(60, 3, area);
        assert_eq!(rect.width, 40);
        assert_eq!(rect.height, 3);
        assert_eq!(rect.y, 3);
    }
}
