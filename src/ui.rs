use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::cursor::Show;
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement, EnterAlternateScreen,
    LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use textwrap::wrap;

use crate::data::PageRequest;
use crate::feed::{FeedLoader, FeedStatus, TotalSource};
use crate::html;
use crate::page::{KeyInput, KeyPhase, KeyTrigger, PageController, PageKey};
use crate::post::{AuthorView, DisplayPost};

const COLOR_BG: Color = Color::Rgb(30, 30, 46);
const COLOR_PANEL_SELECTED_BG: Color = Color::Rgb(69, 71, 90);
const COLOR_BORDER_FOCUSED: Color = Color::Rgb(137, 180, 250);
const COLOR_TEXT_PRIMARY: Color = Color::Rgb(205, 214, 244);
const COLOR_TEXT_SECONDARY: Color = Color::Rgb(166, 173, 200);
const COLOR_ACCENT: Color = Color::Rgb(137, 180, 250);
const COLOR_SUCCESS: Color = Color::Rgb(166, 227, 161);
const COLOR_ERROR: Color = Color::Rgb(243, 139, 168);

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const TICK_RATE: Duration = Duration::from_millis(120);
const JUMP_TIMEOUT: Duration = Duration::from_millis(2500);
const MIN_WRAP_WIDTH: usize = 16;
const ICON_IMAGES: &str = "▣";
const ICON_VIDEO: &str = "▶";
const ICON_RETWEET: &str = "↻";
const QUOTE_PREFIX: &str = "│ ";

pub struct Options {
    pub controller: PageController,
    pub loader: FeedLoader,
    pub page_size: u32,
    pub status_message: String,
}

/// Digits typed so far for a pager jump.
struct PageJump {
    value: String,
    last_input: Instant,
}

struct Spinner {
    index: usize,
}

impl Spinner {
    fn new() -> Self {
        Self { index: 0 }
    }

    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.index % SPINNER_FRAMES.len()]
    }

    fn advance(&mut self) {
        self.index = (self.index + 1) % SPINNER_FRAMES.len();
    }

    fn reset(&mut self) {
        self.index = 0;
    }
}

/// Raw mode, alternate screen and key-release reporting for as long as the
/// feed view is on screen. Dropping it restores the terminal.
struct TerminalSession {
    keyboard_enhanced: bool,
}

impl TerminalSession {
    fn acquire() -> Result<Self> {
        enable_raw_mode().context("enable raw mode")?;
        let mut session = Self {
            keyboard_enhanced: false,
        };
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        if matches!(supports_keyboard_enhancement(), Ok(true)) {
            stdout.execute(PushKeyboardEnhancementFlags(
                KeyboardEnhancementFlags::REPORT_EVENT_TYPES,
            ))?;
            session.keyboard_enhanced = true;
        }
        Ok(session)
    }

    fn trigger(&self) -> KeyTrigger {
        if self.keyboard_enhanced {
            KeyTrigger::Edge
        } else {
            KeyTrigger::Level
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let mut stdout = io::stdout();
        if self.keyboard_enhanced {
            let _ = stdout.execute(PopKeyboardEnhancementFlags);
        }
        let _ = disable_raw_mode();
        let _ = stdout.execute(LeaveAlternateScreen);
        let _ = stdout.execute(Show);
    }
}

pub struct Model {
    controller: PageController,
    loader: FeedLoader,
    page_size: u32,
    status_message: String,
    list_state: ListState,
    shown: Option<PageRequest>,
    jump: Option<PageJump>,
    spinner: Spinner,
    needs_redraw: bool,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        Self {
            controller: opts.controller,
            loader: opts.loader,
            page_size: opts.page_size.max(1),
            status_message: opts.status_message,
            list_state: ListState::default(),
            shown: None,
            jump: None,
            spinner: Spinner::new(),
            needs_redraw: true,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let session = TerminalSession::acquire()?;
        let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))?;
        terminal.clear()?;

        self.attach(session.trigger());
        let result = self.event_loop(&mut terminal);
        self.detach();

        drop(session);
        result
    }

    /// Mounts the page controller and requests the page its URL names.
    fn attach(&mut self, trigger: KeyTrigger) {
        self.controller.set_trigger(trigger);
        if self.controller.mount() {
            tracing::debug!(
                location = %self.controller.location(),
                page = self.controller.page(),
                ?trigger,
                "ui: feed mounted"
            );
        }
        self.sync_feed();
    }

    fn detach(&mut self) {
        self.controller.unmount();
        self.jump = None;
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();

        loop {
            if self.poll_feed() {
                self.mark_dirty();
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = TICK_RATE
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                match event::read()? {
                    Event::Key(key) => match self.handle_key_event(key) {
                        Ok(true) => break,
                        Ok(false) => {}
                        Err(err) => {
                            self.status_message = format!("Error: {err}");
                            self.mark_dirty();
                        }
                    },
                    Event::Resize(_, _) => self.mark_dirty(),
                    _ => {}
                }
            }

            if last_tick.elapsed() >= TICK_RATE {
                last_tick = Instant::now();
                if self.loader.is_loading() {
                    self.spinner.advance();
                    self.mark_dirty();
                } else {
                    self.spinner.reset();
                }
                if self.expire_jump() {
                    self.mark_dirty();
                }
            }
        }

        Ok(())
    }

    fn mark_dirty(&mut self) {
        self.needs_redraw = true;
    }

    fn poll_feed(&mut self) -> bool {
        if !self.loader.poll() {
            return false;
        }
        let state = self.loader.state();
        if state.shown != self.shown {
            self.shown = state.shown;
            self.list_state.select(if state.posts.is_empty() { None } else { Some(0) });
            *self.list_state.offset_mut() = 0;
        }
        true
    }

    /// Requests whatever page the controller currently names.
    fn sync_feed(&mut self) {
        if self.loader.load(self.controller.page(), self.page_size) {
            self.spinner.reset();
            self.mark_dirty();
        }
    }

    fn handle_key_event(&mut self, key: KeyEvent) -> Result<bool> {
        if let Some(input) = page_key_input(&key) {
            if self.controller.on_key(input) {
                self.jump = None;
                self.sync_feed();
            }
            return Ok(false);
        }
        if key.kind != KeyEventKind::Press {
            return Ok(false);
        }
        self.handle_key(key.code)
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        match code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Esc => {
                if self.jump.take().is_none() {
                    return Ok(true);
                }
            }
            KeyCode::Char(ch) if ch.is_ascii_digit() => {
                let jump = self.jump.get_or_insert_with(|| PageJump {
                    value: String::new(),
                    last_input: Instant::now(),
                });
                if jump.value.len() < 9 {
                    jump.value.push(ch);
                }
                jump.last_input = Instant::now();
            }
            KeyCode::Backspace => {
                if let Some(jump) = self.jump.as_mut() {
                    jump.value.pop();
                    jump.last_input = Instant::now();
                    if jump.value.is_empty() {
                        self.jump = None;
                    }
                }
            }
            KeyCode::Enter => {
                if let Some(jump) = self.jump.take() {
                    let requested = jump.value.parse::<i64>().unwrap_or(1);
                    if self.controller.on_pager_change(requested) {
                        self.sync_feed();
                    }
                }
            }
            KeyCode::Char('[') => {
                if self.controller.back() {
                    self.sync_feed();
                }
            }
            KeyCode::Char(']') => {
                if self.controller.forward() {
                    self.sync_feed();
                }
            }
            KeyCode::Char('j') | KeyCode::Down => self.move_selection(1),
            KeyCode::Char('k') | KeyCode::Up => self.move_selection(-1),
            KeyCode::Char('r') => {
                if self.loader.reload() {
                    self.status_message = format!("Reloading page {}...", self.controller.page());
                }
            }
            KeyCode::Char('o') => self.open_selected()?,
            _ => return Ok(false),
        }
        self.mark_dirty();
        Ok(false)
    }

    fn move_selection(&mut self, delta: i32) {
        let len = self.loader.posts().len();
        if len == 0 {
            self.list_state.select(None);
            return;
        }
        let current = self.list_state.selected().unwrap_or(0) as i64;
        let next = (current + i64::from(delta)).clamp(0, len as i64 - 1);
        self.list_state.select(Some(next as usize));
    }

    fn open_selected(&mut self) -> Result<()> {
        let Some(post) = self
            .list_state
            .selected()
            .and_then(|index| self.loader.posts().get(index))
        else {
            return Ok(());
        };
        let Some(target) = open_target(post) else {
            self.status_message = "Nothing to open for this post.".to_string();
            return Ok(());
        };
        tracing::debug!(url = %target, "ui: open in browser");
        webbrowser::open(&target).with_context(|| format!("open {target}"))?;
        self.status_message = format!("Opened {target}");
        Ok(())
    }

    fn expire_jump(&mut self) -> bool {
        match &self.jump {
            Some(jump) if jump.last_input.elapsed() >= JUMP_TIMEOUT => {
                self.jump = None;
                true
            }
            _ => false,
        }
    }

    fn header_line(&self) -> Line<'static> {
        let state = self.loader.state();
        let pages = self.loader.page_count(self.page_size);
        let approx = if state.total_source == TotalSource::Fallback {
            "~"
        } else {
            ""
        };
        let mut spans = vec![
            Span::styled(
                " Archive ",
                Style::default()
                    .fg(COLOR_BG)
                    .bg(COLOR_ACCENT)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!(" page {} of {approx}{pages} ", self.controller.page()),
                Style::default().fg(COLOR_TEXT_PRIMARY),
            ),
        ];
        let status = match &state.status {
            FeedStatus::Idle => Span::raw(""),
            FeedStatus::Loading => Span::styled(
                format!("{} loading", self.spinner.frame()),
                Style::default().fg(COLOR_TEXT_SECONDARY),
            ),
            FeedStatus::Ready => Span::styled(
                format!("{} posts", state.posts.len()),
                Style::default().fg(COLOR_SUCCESS),
            ),
            FeedStatus::Error(message) => Span::styled(
                format!("failed: {message}"),
                Style::default().fg(COLOR_ERROR),
            ),
        };
        spans.push(status);
        Line::from(spans)
    }

    fn footer_line(&self) -> Line<'static> {
        if let Some(jump) = &self.jump {
            return Line::from(vec![
                Span::styled(" go to page: ", Style::default().fg(COLOR_ACCENT)),
                Span::styled(jump.value.clone(), Style::default().fg(COLOR_TEXT_PRIMARY)),
                Span::styled("  (Enter to jump, Esc to cancel)", Style::default().fg(COLOR_TEXT_SECONDARY)),
            ]);
        }
        Line::from(Span::styled(
            format!(" {}", self.status_message),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ))
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(1),
            ])
            .split(frame.size());

        frame.render_widget(Paragraph::new(self.header_line()), chunks[0]);

        let block = Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(COLOR_BORDER_FOCUSED))
            .title(format!(" {} ", self.controller.location()));
        let width = usize::from(chunks[1].width.saturating_sub(4)).max(MIN_WRAP_WIDTH);
        let posts = self.loader.posts();
        if posts.is_empty() {
            let message = match &self.loader.state().status {
                FeedStatus::Loading | FeedStatus::Idle => "Loading posts...",
                FeedStatus::Error(_) => "Could not load this page. Press r to retry.",
                FeedStatus::Ready => "No posts on this page.",
            };
            let body = Paragraph::new(message)
                .style(Style::default().fg(COLOR_TEXT_SECONDARY))
                .wrap(Wrap { trim: true })
                .block(block);
            frame.render_widget(body, chunks[1]);
        } else {
            let items: Vec<ListItem> = posts
                .iter()
                .map(|post| ListItem::new(Text::from(post_lines(post, width))))
                .collect();
            let list = List::new(items)
                .block(block)
                .highlight_style(Style::default().bg(COLOR_PANEL_SELECTED_BG));
            frame.render_stateful_widget(list, chunks[1], &mut self.list_state);
        }

        frame.render_widget(Paragraph::new(self.footer_line()), chunks[2]);
    }
}

fn page_key_input(event: &KeyEvent) -> Option<KeyInput> {
    let key = match event.code {
        KeyCode::Left => PageKey::Left,
        KeyCode::Right => PageKey::Right,
        _ => return None,
    };
    let phase = match event.kind {
        KeyEventKind::Press => KeyPhase::Press,
        KeyEventKind::Repeat => KeyPhase::Repeat,
        KeyEventKind::Release => KeyPhase::Release,
    };
    Some(KeyInput { key, phase })
}

fn open_target(post: &DisplayPost) -> Option<String> {
    post.video_url
        .clone()
        .or_else(|| post.images.first().map(|image| image.origin_url.clone()))
        .or_else(|| post.permalink.clone())
}

fn author_name(author: Option<&AuthorView>) -> String {
    author
        .map(|author| author.name.trim())
        .filter(|name| !name.is_empty())
        .unwrap_or("[deleted]")
        .to_string()
}

fn head_line(prefix: &str, author: Option<&AuthorView>, created_at: &str, id: &str) -> Line<'static> {
    let mut spans = Vec::new();
    if !prefix.is_empty() {
        spans.push(Span::styled(
            prefix.to_string(),
            Style::default().fg(COLOR_TEXT_SECONDARY),
        ));
    }
    spans.push(Span::styled(
        author_name(author),
        Style::default()
            .fg(COLOR_ACCENT)
            .add_modifier(Modifier::BOLD),
    ));
    let mut meta = String::new();
    if !created_at.is_empty() {
        meta.push_str(&format!("  {created_at}"));
    }
    if !id.is_empty() {
        meta.push_str(&format!("  #{id}"));
    }
    spans.push(Span::styled(meta, Style::default().fg(COLOR_TEXT_SECONDARY)));
    Line::from(spans)
}

fn push_wrapped(lines: &mut Vec<Line<'static>>, text: &str, width: usize, prefix: &str, style: Style) {
    let width = width.saturating_sub(prefix.chars().count()).max(MIN_WRAP_WIDTH);
    for paragraph in text.lines() {
        if paragraph.trim().is_empty() {
            lines.push(Line::from(Span::styled(prefix.to_string(), style)));
            continue;
        }
        for piece in wrap(paragraph, width) {
            lines.push(Line::from(Span::styled(format!("{prefix}{piece}"), style)));
        }
    }
}

/// Terminal rendering of one post: head, text, the retweeted original (if
/// any) and the resolved media.
fn post_lines(post: &DisplayPost, width: usize) -> Vec<Line<'static>> {
    let mut lines = vec![head_line(
        "",
        post.author.as_ref(),
        &post.created_at,
        &post.id,
    )];
    let primary = Style::default().fg(COLOR_TEXT_PRIMARY);
    let secondary = Style::default().fg(COLOR_TEXT_SECONDARY);
    push_wrapped(&mut lines, &html::to_plain_text(&post.text), width, "", primary);

    if let Some(quoted) = &post.quoted {
        lines.push(head_line(
            &format!("{QUOTE_PREFIX}{ICON_RETWEET} "),
            quoted.author.as_ref(),
            &quoted.created_at,
            &quoted.id,
        ));
        push_wrapped(
            &mut lines,
            &html::to_plain_text(&quoted.text),
            width,
            QUOTE_PREFIX,
            secondary,
        );
    }

    let media_prefix = if post.quoted.is_some() { QUOTE_PREFIX } else { "" };
    if !post.images.is_empty() {
        let label = if post.images.len() == 1 { "image" } else { "images" };
        lines.push(Line::from(Span::styled(
            format!("{media_prefix}{ICON_IMAGES} {} {label}", post.images.len()),
            Style::default().fg(COLOR_SUCCESS),
        )));
        for image in &post.images {
            lines.push(Line::from(Span::styled(
                format!("{media_prefix}  {}", image.origin_url),
                secondary,
            )));
        }
    }
    if let Some(video) = &post.video_url {
        lines.push(Line::from(Span::styled(
            format!("{media_prefix}{ICON_VIDEO} {video}"),
            Style::default().fg(COLOR_SUCCESS),
        )));
    }
    lines.push(Line::default());
    lines
}
