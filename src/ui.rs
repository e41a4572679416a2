use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::{unbounded, Receiver, Sender};
use crossterm::event::{self, Event as TermEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::{Frame, Terminal};
use unicode_width::UnicodeWidthStr;

use crate::patreon::{self, PostDetails, PostsPage};
use crate::storage;

pub const PAGE_SIZE: usize = 20;
const CLIPBOARD_PANEL_WIDTH: u16 = 45;
const SPINNER_FRAMES: [&str; 4] = ["|", "/", "-", "\\"];

/// Immutable styling passed into the draw functions.
#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub title: Style,
    pub status: Style,
    pub header: Style,
    pub selected: Style,
    pub cached: Style,
    pub muted: Style,
    pub url: Style,
    pub help: Style,
    pub error: Style,
    pub success: Style,
    pub access_ok: Style,
    pub access_no: Style,
    pub clipboard_selected: Style,
}

impl Theme {
    pub fn named(name: &str) -> Self {
        match name {
            "plain" => Self::plain(),
            _ => Self::colored(),
        }
    }

    fn colored() -> Self {
        Self {
            title: Style::default()
                .fg(Color::Rgb(0xff, 0x42, 0x4d))
                .add_modifier(Modifier::BOLD),
            status: Style::default().fg(Color::DarkGray),
            header: Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
            selected: Style::default()
                .fg(Color::Black)
                .bg(Color::Rgb(0xff, 0x42, 0x4d))
                .add_modifier(Modifier::BOLD),
            cached: Style::default().fg(Color::Green),
            muted: Style::default().fg(Color::DarkGray),
            url: Style::default()
                .fg(Color::Blue)
                .add_modifier(Modifier::UNDERLINED),
            help: Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
            error: Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
            success: Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
            access_ok: Style::default().fg(Color::Green),
            access_no: Style::default().fg(Color::Red),
            clipboard_selected: Style::default()
                .fg(Color::Black)
                .bg(Color::Blue)
                .add_modifier(Modifier::BOLD),
        }
    }

    fn plain() -> Self {
        let reversed = Style::default().add_modifier(Modifier::REVERSED);
        Self {
            title: Style::default().add_modifier(Modifier::BOLD),
            status: Style::default(),
            header: Style::default().add_modifier(Modifier::BOLD),
            selected: reversed,
            cached: Style::default(),
            muted: Style::default(),
            url: Style::default().add_modifier(Modifier::UNDERLINED),
            help: Style::default(),
            error: Style::default().add_modifier(Modifier::BOLD),
            success: Style::default(),
            access_ok: Style::default(),
            access_no: Style::default(),
            clipboard_selected: reversed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Input,
    Loading,
    List,
    Details,
    Error,
}

/// Everything the transition function reacts to: key presses plus fetch
/// results re-injected by the runner.
#[derive(Debug)]
pub enum Event {
    Key(KeyEvent),
    PageLoaded(patreon::Result<PostsPage>),
    DetailLoaded(patreon::Result<PostDetails>),
}

/// Side effects requested by a transition. The event loop executes them;
/// `apply` itself never touches the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    FetchPage { cursor: String },
    FetchDetail { post_id: String },
    CopySystemClipboard(String),
    OpenInBrowser(String),
    Quit,
}

#[derive(Debug, Clone)]
struct DetailView {
    id: String,
    title: String,
    description: String,
    links: Vec<String>,
}

#[derive(Clone)]
pub struct Options {
    pub client: Option<Arc<patreon::Client>>,
    pub store: Arc<storage::Store>,
    pub theme: Theme,
}

pub struct Model {
    screen: Screen,
    input: String,
    campaign_id: String,
    posts: Vec<patreon::Post>,
    cursor: usize,
    detail: Option<DetailView>,
    link_cursor: usize,
    clipboard_links: Vec<String>,
    clipboard_cursor: usize,
    status_message: String,
    loading_message: String,
    error_message: String,
    current_page: usize,
    next_cursor: String,
    has_more: bool,
    cursor_history: Vec<String>,
    theme: Theme,
    store: Arc<storage::Store>,
    client: Option<Arc<patreon::Client>>,
    response_tx: Sender<Event>,
    response_rx: Receiver<Event>,
    spinner_frame: usize,
    needs_redraw: bool,
}

impl Model {
    pub fn new(opts: Options) -> Self {
        let (response_tx, response_rx) = unbounded();
        Self {
            screen: Screen::Input,
            input: String::new(),
            campaign_id: String::new(),
            posts: Vec::new(),
            cursor: 0,
            detail: None,
            link_cursor: 0,
            clipboard_links: Vec::new(),
            clipboard_cursor: 0,
            status_message: String::new(),
            loading_message: String::new(),
            error_message: String::new(),
            current_page: 1,
            next_cursor: String::new(),
            has_more: false,
            cursor_history: Vec::new(),
            theme: opts.theme,
            store: opts.store,
            client: opts.client,
            response_tx,
            response_rx,
            spinner_frame: 0,
            needs_redraw: true,
        }
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

        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        let tick_rate = Duration::from_millis(120);

        loop {
            while let Ok(response) = self.response_rx.try_recv() {
                let effects = self.apply(response);
                if self.execute(effects) {
                    return Ok(());
                }
            }

            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let timeout = tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or_else(|| Duration::from_millis(16));

            if event::poll(timeout)? {
                if let TermEvent::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        let effects = self.apply(Event::Key(key));
                        if self.execute(effects) {
                            return Ok(());
                        }
                    }
                }
            }

            if last_tick.elapsed() >= tick_rate {
                last_tick = Instant::now();
                if self.screen == Screen::Loading {
                    self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAMES.len();
                    self.needs_redraw = true;
                }
            }
        }
    }

    /// The transition function: consumes one event, mutates in-memory state
    /// (and the cache store, synchronously), and returns the side effects the
    /// runner should execute. Network work never happens here.
    pub fn apply(&mut self, event: Event) -> Vec<Effect> {
        self.needs_redraw = true;
        match event {
            Event::Key(key) => {
                self.status_message.clear();
                self.apply_key(key)
            }
            Event::PageLoaded(result) => {
                self.apply_page(result);
                Vec::new()
            }
            Event::DetailLoaded(result) => {
                self.apply_detail(result);
                Vec::new()
            }
        }
    }

    fn apply_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            return vec![Effect::Quit];
        }

        // Quit and clipboard keys that apply across screens. Inside the
        // Input screen plain characters belong to the text buffer.
        if self.screen != Screen::Input && key.code == KeyCode::Char('q') {
            return vec![Effect::Quit];
        }
        if matches!(self.screen, Screen::List | Screen::Details) {
            match key.code {
                KeyCode::Char('c') | KeyCode::Char('y') => return self.copy_clipboard_effects(),
                KeyCode::Char('x') => {
                    self.clipboard_remove_at_cursor();
                    return Vec::new();
                }
                KeyCode::Char('X') => {
                    self.clipboard_links.clear();
                    self.clipboard_cursor = 0;
                    self.status_message = "Cleared clipboard".to_string();
                    return Vec::new();
                }
                KeyCode::Char('[') => {
                    self.clipboard_cursor = self.clipboard_cursor.saturating_sub(1);
                    return Vec::new();
                }
                KeyCode::Char(']') => {
                    if self.clipboard_cursor + 1 < self.clipboard_links.len() {
                        self.clipboard_cursor += 1;
                    }
                    return Vec::new();
                }
                _ => {}
            }
        }

        match self.screen {
            Screen::Input => self.input_key(key),
            Screen::Loading => Vec::new(),
            Screen::List => self.list_key(key),
            Screen::Details => self.details_key(key),
            Screen::Error => self.error_key(key),
        }
    }

    fn input_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        match key.code {
            KeyCode::Esc => vec![Effect::Quit],
            KeyCode::Enter if !self.input.is_empty() => {
                self.campaign_id = self.input.clone();
                self.current_page = 1;
                self.cursor_history.clear();
                self.start_page_fetch("Fetching posts...", String::new())
            }
            KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => {
                self.input.push(c);
                Vec::new()
            }
            KeyCode::Backspace => {
                self.input.pop();
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn list_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => {
                self.cursor = self.cursor.saturating_sub(1);
                Vec::new()
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if self.cursor + 1 < self.posts.len() {
                    self.cursor += 1;
                }
                Vec::new()
            }
            KeyCode::Enter => self.open_selected_post(),
            KeyCode::Char('r') => {
                let cursor = self.current_cursor();
                self.start_page_fetch("Refreshing posts...", cursor)
            }
            KeyCode::Char('R') => {
                self.current_page = 1;
                self.cursor_history.clear();
                self.start_page_fetch("Force refreshing posts...", String::new())
            }
            KeyCode::Char('n') | KeyCode::Right => {
                if self.has_more && !self.next_cursor.is_empty() {
                    if self.current_page == 1 && self.cursor_history.is_empty() {
                        self.cursor_history.push(String::new());
                    }
                    let next = self.next_cursor.clone();
                    self.cursor_history.push(next.clone());
                    self.current_page += 1;
                    let message = format!("Loading page {}...", self.current_page);
                    return self.start_page_fetch(&message, next);
                }
                Vec::new()
            }
            KeyCode::Char('p') | KeyCode::Left => {
                if self.current_page > 1 && !self.cursor_history.is_empty() {
                    self.current_page -= 1;
                    self.cursor_history.pop();
                    let cursor = self.cursor_history.last().cloned().unwrap_or_default();
                    let message = format!("Loading page {}...", self.current_page);
                    return self.start_page_fetch(&message, cursor);
                }
                Vec::new()
            }
            KeyCode::Char('o') => self.open_in_browser_effects(),
            KeyCode::Esc => {
                self.screen = Screen::Input;
                self.input.clear();
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn details_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        match key.code {
            KeyCode::Esc | KeyCode::Backspace => {
                self.screen = Screen::List;
                self.detail = None;
                self.link_cursor = 0;
                Vec::new()
            }
            KeyCode::Char('R') => self.force_refresh_detail(),
            KeyCode::Up | KeyCode::Char('k') => {
                self.link_cursor = self.link_cursor.saturating_sub(1);
                Vec::new()
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let len = self.detail.as_ref().map_or(0, |d| d.links.len());
                if self.link_cursor + 1 < len {
                    self.link_cursor += 1;
                }
                Vec::new()
            }
            KeyCode::Char('a') | KeyCode::Enter => {
                self.clipboard_add_selected();
                Vec::new()
            }
            KeyCode::Char('A') => {
                self.clipboard_add_all();
                Vec::new()
            }
            KeyCode::Char('o') => self.open_in_browser_effects(),
            _ => Vec::new(),
        }
    }

    fn error_key(&mut self, key: KeyEvent) -> Vec<Effect> {
        match key.code {
            KeyCode::Char('r') => {
                let cursor = self.current_cursor();
                self.start_page_fetch("Retrying...", cursor)
            }
            KeyCode::Esc => {
                self.screen = Screen::Input;
                self.input.clear();
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn start_page_fetch(&mut self, message: &str, cursor: String) -> Vec<Effect> {
        self.screen = Screen::Loading;
        self.loading_message = message.to_string();
        vec![Effect::FetchPage { cursor }]
    }

    /// Cursor that produced the page currently on screen: empty for page 1,
    /// otherwise the top of the history stack.
    fn current_cursor(&self) -> String {
        if self.current_page > 1 {
            self.cursor_history.last().cloned().unwrap_or_default()
        } else {
            String::new()
        }
    }

    fn open_selected_post(&mut self) -> Vec<Effect> {
        let Some(post) = self.posts.get(self.cursor).cloned() else {
            return Vec::new();
        };

        if post.details_cached {
            if let Ok(Some(cached)) = self.store.get_post(&post.id) {
                if cached.details_cached {
                    self.detail = Some(DetailView {
                        id: cached.id,
                        title: cached.title,
                        description: cached.description.unwrap_or_default(),
                        links: decode_links(cached.youtube_links.as_deref()),
                    });
                    self.link_cursor = 0;
                    self.screen = Screen::Details;
                    return Vec::new();
                }
            }
        }

        self.screen = Screen::Loading;
        self.loading_message = "Fetching post details...".to_string();
        vec![Effect::FetchDetail { post_id: post.id }]
    }

    fn force_refresh_detail(&mut self) -> Vec<Effect> {
        let Some(post) = self.posts.get(self.cursor) else {
            return Vec::new();
        };
        let post_id = post.id.clone();
        if let Err(err) = self.store.clear_detail(&post_id) {
            self.status_message = format!("Cache clear failed: {err:#}");
        }
        if let Some(post) = self.posts.get_mut(self.cursor) {
            post.details_cached = false;
        }
        self.screen = Screen::Loading;
        self.loading_message = "Force refreshing post details...".to_string();
        vec![Effect::FetchDetail { post_id }]
    }

    fn apply_page(&mut self, result: patreon::Result<PostsPage>) {
        let page = match result {
            Ok(page) => page,
            Err(err) => {
                self.screen = Screen::Error;
                self.error_message = err.to_string();
                return;
            }
        };

        // Cache writes are best effort; a failed write never blocks browsing.
        self.store.upsert_campaign(&self.campaign_id, "").ok();
        self.posts = page.posts;
        for post in &mut self.posts {
            let row = storage::CachedPost {
                id: post.id.clone(),
                campaign_id: self.campaign_id.clone(),
                kind: post.kind.clone(),
                post_type: post.post_type.clone(),
                title: post.title.clone(),
                patreon_url: post.patreon_url.clone(),
                current_user_can_view: post.current_user_can_view,
                published_at: post.published_at,
                description: None,
                youtube_links: None,
                cached_at: chrono::Utc::now(),
                details_cached: false,
            };
            self.store.upsert_post_summary(&row).ok();
            post.details_cached = self.store.is_details_cached(&post.id).unwrap_or(false);
        }

        self.next_cursor = page.next_cursor;
        self.has_more = page.has_more;
        self.cursor = 0;
        self.screen = Screen::List;
    }

    fn apply_detail(&mut self, result: patreon::Result<PostDetails>) {
        let details = match result {
            Ok(details) => details,
            Err(err) => {
                self.screen = Screen::Error;
                self.error_message = err.to_string();
                return;
            }
        };

        let links_json =
            serde_json::to_string(&details.youtube_links).unwrap_or_else(|_| "[]".into());
        if let Err(err) = self
            .store
            .save_detail(&details.id, &details.description, &links_json)
        {
            self.status_message = format!("Cache write failed: {err:#}");
        } else if let Some(post) = self.posts.iter_mut().find(|post| post.id == details.id) {
            post.details_cached = true;
        }

        self.detail = Some(DetailView {
            id: details.id,
            title: details.title,
            description: details.description,
            links: details.youtube_links,
        });
        self.link_cursor = 0;
        self.screen = Screen::Details;
    }

    fn clipboard_add_selected(&mut self) {
        let Some(link) = self
            .detail
            .as_ref()
            .and_then(|d| d.links.get(self.link_cursor))
            .cloned()
        else {
            return;
        };
        if self.clipboard_links.contains(&link) {
            self.status_message = "Link already in clipboard".to_string();
            return;
        }
        self.clipboard_links.push(link);
        self.status_message = "Added link to clipboard".to_string();
    }

    fn clipboard_add_all(&mut self) {
        let links: Vec<String> = self.detail.as_ref().map_or(Vec::new(), |d| d.links.clone());
        if links.is_empty() {
            return;
        }
        let mut added = 0usize;
        for link in links {
            if !self.clipboard_links.contains(&link) {
                self.clipboard_links.push(link);
                added += 1;
            }
        }
        self.status_message = if added > 0 {
            format!("Added {added} link(s) to clipboard")
        } else {
            "All links already in clipboard".to_string()
        };
    }

    fn clipboard_remove_at_cursor(&mut self) {
        if self.clipboard_links.is_empty() {
            return;
        }
        self.clipboard_links.remove(self.clipboard_cursor);
        if self.clipboard_cursor >= self.clipboard_links.len() && self.clipboard_cursor > 0 {
            self.clipboard_cursor -= 1;
        }
        self.status_message = "Removed link from clipboard".to_string();
    }

    fn copy_clipboard_effects(&mut self) -> Vec<Effect> {
        if self.clipboard_links.is_empty() {
            self.status_message = "Clipboard is empty".to_string();
            return Vec::new();
        }
        vec![Effect::CopySystemClipboard(self.clipboard_links.join("\n"))]
    }

    fn open_in_browser_effects(&mut self) -> Vec<Effect> {
        let Some(post) = self.posts.get(self.cursor) else {
            return Vec::new();
        };
        if post.patreon_url.is_empty() {
            return Vec::new();
        }
        let url = if post.patreon_url.starts_with("http") {
            post.patreon_url.clone()
        } else {
            format!("{}{}", patreon::WEB_BASE, post.patreon_url)
        };
        vec![Effect::OpenInBrowser(url)]
    }

    /// Executes the effects `apply` asked for. Returns true when the loop
    /// should exit. Fetches run on their own thread and report back through
    /// the response channel; results are applied whenever they arrive, even
    /// if the user has navigated elsewhere in the meantime.
    fn execute(&mut self, effects: Vec<Effect>) -> bool {
        for effect in effects {
            match effect {
                Effect::FetchPage { cursor } => {
                    let Some(client) = self.client.clone() else {
                        self.screen = Screen::Error;
                        self.error_message = "remote client unavailable".to_string();
                        continue;
                    };
                    let tx = self.response_tx.clone();
                    let campaign_id = self.campaign_id.clone();
                    thread::spawn(move || {
                        let result = client.posts_page(&campaign_id, PAGE_SIZE, &cursor);
                        let _ = tx.send(Event::PageLoaded(result));
                    });
                }
                Effect::FetchDetail { post_id } => {
                    let Some(client) = self.client.clone() else {
                        self.screen = Screen::Error;
                        self.error_message = "remote client unavailable".to_string();
                        continue;
                    };
                    let tx = self.response_tx.clone();
                    thread::spawn(move || {
                        let result = client.post_detail(&post_id);
                        let _ = tx.send(Event::DetailLoaded(result));
                    });
                }
                Effect::CopySystemClipboard(text) => {
                    let count = text.lines().count();
                    self.status_message = match copy_to_system_clipboard(&text) {
                        Ok(()) => format!("Copied {count} link(s) to system clipboard"),
                        Err(err) => format!("Copy failed: {err:#}"),
                    };
                }
                Effect::OpenInBrowser(url) => {
                    if let Err(err) = webbrowser::open(&url) {
                        self.status_message = format!("Failed to open browser: {err}");
                    }
                }
                Effect::Quit => return true,
            }
        }
        false
    }

    fn draw(&self, frame: &mut Frame) {
        match self.screen {
            Screen::Input => self.draw_input(frame),
            Screen::Loading => self.draw_loading(frame),
            Screen::List => self.draw_list(frame),
            Screen::Details => self.draw_details(frame),
            Screen::Error => self.draw_error(frame),
        }
    }

    fn draw_input(&self, frame: &mut Frame) {
        let theme = &self.theme;
        let lines = vec![
            Line::styled("Patreon Posts", theme.title),
            Line::raw(""),
            Line::raw("Enter the campaign ID to fetch posts:"),
            Line::raw(""),
            Line::from(vec![
                Span::raw("> "),
                Span::raw(self.input.clone()),
                Span::styled("_", theme.muted),
            ]),
            Line::raw(""),
            Line::styled("Enter fetch | Esc/Ctrl+C quit", theme.help),
        ];
        frame.render_widget(
            Paragraph::new(lines).wrap(Wrap { trim: false }),
            frame.size(),
        );
    }

    fn draw_loading(&self, frame: &mut Frame) {
        let theme = &self.theme;
        let spinner = SPINNER_FRAMES[self.spinner_frame % SPINNER_FRAMES.len()];
        let lines = vec![
            Line::styled("Patreon Posts", theme.title),
            Line::raw(""),
            Line::from(vec![
                Span::styled(spinner, theme.title),
                Span::raw(" "),
                Span::raw(self.loading_message.clone()),
            ]),
        ];
        frame.render_widget(Paragraph::new(lines), frame.size());
    }

    fn draw_error(&self, frame: &mut Frame) {
        let theme = &self.theme;
        let lines = vec![
            Line::styled("Patreon Posts", theme.title),
            Line::raw(""),
            Line::styled(format!("Error: {}", self.error_message), theme.error),
            Line::raw(""),
            Line::styled("r retry | Esc back | q quit", theme.help),
        ];
        frame.render_widget(
            Paragraph::new(lines).wrap(Wrap { trim: false }),
            frame.size(),
        );
    }

    fn split_main(&self, area: Rect) -> (Rect, Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(40), Constraint::Length(CLIPBOARD_PANEL_WIDTH)])
            .split(area);
        (chunks[0], chunks[1])
    }

    fn draw_list(&self, frame: &mut Frame) {
        let theme = &self.theme;
        let (main, side) = self.split_main(frame.size());

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(2),
                Constraint::Min(3),
                Constraint::Length(4),
            ])
            .split(main);

        let mut page_info = format!("Page {}", self.current_page);
        if self.current_page > 1 {
            page_info = format!("< {page_info}");
        }
        if self.has_more {
            page_info.push_str(" >");
        }
        let header = vec![
            Line::styled("Patreon Posts", theme.title),
            Line::styled(
                format!(
                    "Campaign: {} | {} ({} posts)",
                    self.campaign_id,
                    page_info,
                    self.posts.len()
                ),
                theme.status,
            ),
        ];
        frame.render_widget(Paragraph::new(header), chunks[0]);

        let title_width = (chunks[1].width as usize).saturating_sub(30).max(15);
        let items: Vec<ListItem> = self
            .posts
            .iter()
            .map(|post| {
                let cache_mark = if post.details_cached { "*" } else { " " };
                let cache_style = if post.details_cached {
                    theme.cached
                } else {
                    theme.muted
                };
                let access = if post.current_user_can_view {
                    Span::styled("yes", theme.access_ok)
                } else {
                    Span::styled(" no", theme.access_no)
                };
                ListItem::new(Line::from(vec![
                    Span::styled(cache_mark.to_string(), cache_style),
                    Span::raw(" "),
                    Span::styled(format!("{:<12}", truncate(&post.post_type, 12)), theme.muted),
                    Span::raw(" "),
                    Span::raw(format!(
                        "{:<width$}",
                        truncate(&post.title, title_width),
                        width = title_width
                    )),
                    Span::raw(" "),
                    access,
                ]))
            })
            .collect();
        let list = List::new(items).highlight_style(theme.selected);
        let mut state = ListState::default();
        if !self.posts.is_empty() {
            state.select(Some(self.cursor));
        }
        frame.render_stateful_widget(list, chunks[1], &mut state);

        let mut footer = Vec::new();
        if let Some(post) = self.posts.get(self.cursor) {
            footer.push(Line::from(vec![
                Span::raw("URL: "),
                Span::styled(
                    format!("{}{}", patreon::WEB_BASE, post.patreon_url),
                    theme.url,
                ),
            ]));
            footer.push(Line::styled(
                format!("Published: {}", post.published_at.format("%Y-%m-%d %H:%M")),
                theme.status,
            ));
        }
        footer.push(Line::styled(
            "j/k nav | Enter view | n/p pages | r/R refresh | o open | c copy | q quit",
            theme.help,
        ));
        frame.render_widget(Paragraph::new(footer), chunks[2]);

        self.draw_clipboard_panel(frame, side);
    }

    fn draw_details(&self, frame: &mut Frame) {
        let theme = &self.theme;
        let (main, side) = self.split_main(frame.size());

        let mut lines = Vec::new();
        match &self.detail {
            Some(detail) => {
                lines.push(Line::styled(detail.title.clone(), theme.header));
                lines.push(Line::raw(""));
                if detail.links.is_empty() {
                    lines.push(Line::styled("No YouTube links found", theme.muted));
                } else {
                    lines.push(Line::styled("YouTube links", theme.header));
                    for (idx, link) in detail.links.iter().enumerate() {
                        let in_clipboard = self.clipboard_links.contains(link);
                        let suffix = if in_clipboard { " *" } else { "" };
                        let style = if idx == self.link_cursor {
                            theme.selected
                        } else {
                            theme.url
                        };
                        lines.push(Line::from(vec![
                            Span::raw("  "),
                            Span::styled(format!("{link}{suffix}"), style),
                        ]));
                    }
                }
                lines.push(Line::raw(""));
                lines.push(Line::styled("Description", theme.header));
                if detail.description.is_empty() {
                    lines.push(Line::styled("No description available", theme.muted));
                } else {
                    let width = (main.width as usize).saturating_sub(4).max(20);
                    for row in textwrap::wrap(&detail.description, width) {
                        lines.push(Line::raw(row.into_owned()));
                    }
                }
            }
            None => lines.push(Line::styled("No details available", theme.muted)),
        }
        lines.push(Line::raw(""));
        lines.push(Line::styled(
            "j/k nav links | a add | A add all | R refetch | Esc back | q quit",
            theme.help,
        ));

        frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: false }), main);
        self.draw_clipboard_panel(frame, side);
    }

    fn draw_clipboard_panel(&self, frame: &mut Frame, area: Rect) {
        let theme = &self.theme;
        let block = Block::default()
            .borders(Borders::ALL)
            .title(format!("Clipboard ({})", self.clipboard_links.len()));
        let inner = block.inner(area);
        frame.render_widget(block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(3)])
            .split(inner);

        if self.clipboard_links.is_empty() {
            frame.render_widget(
                Paragraph::new(vec![
                    Line::styled("No links collected", theme.muted),
                    Line::styled("Use 'a' in the post view", theme.muted),
                ]),
                chunks[0],
            );
        } else {
            let width = (chunks[0].width as usize).saturating_sub(2).max(10);
            let items: Vec<ListItem> = self
                .clipboard_links
                .iter()
                .map(|link| ListItem::new(Line::styled(truncate(link, width), theme.url)))
                .collect();
            let list = List::new(items).highlight_style(theme.clipboard_selected);
            let mut state = ListState::default();
            state.select(Some(self.clipboard_cursor));
            frame.render_stateful_widget(list, chunks[0], &mut state);
        }

        let status_style = if self.status_message.starts_with("Copied")
            || self.status_message.starts_with("Added")
        {
            theme.success
        } else {
            theme.status
        };
        frame.render_widget(
            Paragraph::new(vec![
                Line::styled("[/] nav | x del | X clear | c/y copy", theme.help),
                Line::styled(self.status_message.clone(), status_style),
            ]),
            chunks[1],
        );
    }

    #[cfg(test)]
    fn screen(&self) -> Screen {
        self.screen
    }
}

fn decode_links(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default()
}

fn copy_to_system_clipboard(text: &str) -> Result<()> {
    let mut clipboard = arboard::Clipboard::new()?;
    clipboard.set_text(text.to_string())?;
    Ok(())
}

/// Truncates to a display width, appending an ellipsis when shortened.
fn truncate(text: &str, width: usize) -> String {
    if UnicodeWidthStr::width(text) <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let budget = width.saturating_sub(3);
    let mut used = 0usize;
    for c in text.chars() {
        let w = UnicodeWidthStr::width(c.to_string().as_str());
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push_str("...");
    out
}
