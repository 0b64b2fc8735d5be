//! In-process simulated browser.
//!
//! Serves pages from a [`SimulatedSite`], renders them into PNG screenshots
//! through [`Framebuffer`], and supports the interactions the harness uses
//! (navigate, click, fill, wait-for, visibility and text queries). Elements may
//! appear after a delay, which makes dynamic-loading flows reproducible.
//!
//! [`Faults`] lets tests make screenshots, HTML serialization or context close
//! fail on demand, and [`Environment::open_contexts`] doubles as a health
//! check for leaked contexts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use super::framebuffer::{Framebuffer, GLYPH_SIZE};
use super::types::{
    BrowserContext, ContextOptions, DriverError, DriverResult, Environment, LaunchOptions, Page,
    Viewport,
};

const SUPPORTED_KINDS: [&str; 3] = ["chromium", "firefox", "webkit"];
const ROW_HEIGHT: u32 = 20;
const HEADER_HEIGHT: u32 = 32;
const MARGIN: u32 = 12;
const BACKGROUND: [u8; 3] = [255, 255, 255];
const FOREGROUND: [u8; 3] = [20, 20, 20];
const HEADER: [u8; 3] = [36, 41, 47];
const ACCENT: [u8; 3] = [0, 102, 204];
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// What an element is and the state it carries
#[derive(Debug, Clone, PartialEq)]
pub enum ElementKind {
    Heading,
    Text,
    Link { href: String },
    Button,
    Checkbox { checked: bool },
    Input { value: String },
}

/// Effect of clicking an element
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Make a hidden element visible after a delay
    Show { selector: String, after: Duration },
    /// Replace the text of an element
    SetText { selector: String, text: String },
    /// Append a new element to the page
    Append(SimElement),
    /// Load another page
    Navigate(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimElement {
    /// Selector the element answers to (matched exactly)
    pub selector: String,
    pub kind: ElementKind,
    pub text: String,
    pub visible: bool,
    pub on_click: Vec<Effect>,
}

impl SimElement {
    fn new(selector: &str, kind: ElementKind, text: &str) -> Self {
        Self {
            selector: selector.to_string(),
            kind,
            text: text.to_string(),
            visible: true,
            on_click: Vec::new(),
        }
    }

    pub fn heading(selector: &str, text: &str) -> Self {
        Self::new(selector, ElementKind::Heading, text)
    }

    pub fn text(selector: &str, text: &str) -> Self {
        Self::new(selector, ElementKind::Text, text)
    }

    pub fn link(selector: &str, text: &str, href: &str) -> Self {
        Self::new(selector, ElementKind::Link { href: href.to_string() }, text)
    }

    pub fn button(selector: &str, label: &str) -> Self {
        Self::new(selector, ElementKind::Button, label)
    }

    pub fn checkbox(selector: &str, label: &str, checked: bool) -> Self {
        Self::new(selector, ElementKind::Checkbox { checked }, label)
    }

    pub fn input(selector: &str, label: &str) -> Self {
        Self::new(selector, ElementKind::Input { value: String::new() }, label)
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click.push(effect);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimPage {
    pub url: String,
    pub title: String,
    pub elements: Vec<SimElement>,
}

impl SimPage {
    pub fn new(url: &str, title: &str) -> Self {
        Self {
            url: url.to_string(),
            title: title.to_string(),
            elements: Vec::new(),
        }
    }

    pub fn with(mut self, element: SimElement) -> Self {
        self.elements.push(element);
        self
    }
}

/// The set of pages the simulated browser can load, keyed by URL
#[derive(Debug, Clone, Default)]
pub struct SimulatedSite {
    pages: HashMap<String, SimPage>,
}

impl SimulatedSite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: SimPage) -> Self {
        self.pages.insert(normalize_url(&page.url), page);
        self
    }

    pub fn page(&self, url: &str) -> Option<&SimPage> {
        self.pages.get(&normalize_url(url))
    }

    /// A small site modelled on common UI-testing playgrounds
    pub fn demo() -> Self {
        let base = "https://the-internet.test";
        Self::new()
            .with_page(
                SimPage::new(&format!("{base}/"), "The Internet")
                    .with(SimElement::heading("h1", "Welcome to the-internet"))
                    .with(SimElement::link("a[href='/checkboxes']", "Checkboxes", &format!("{base}/checkboxes")))
                    .with(SimElement::link("a[href='/login']", "Form Authentication", &format!("{base}/login"))),
            )
            .with_page(
                SimPage::new(&format!("{base}/checkboxes"), "Checkboxes")
                    .with(SimElement::heading("h3", "Checkboxes"))
                    .with(SimElement::checkbox("#checkbox1", "checkbox 1", false))
                    .with(SimElement::checkbox("#checkbox2", "checkbox 2", true)),
            )
            .with_page(
                SimPage::new(&format!("{base}/login"), "Login Page")
                    .with(SimElement::heading("h2", "Login Page"))
                    .with(SimElement::input("#username", "Username"))
                    .with(SimElement::input("#password", "Password"))
                    .with(SimElement::button("button[type='submit']", "Login").on_click(Effect::Show {
                        selector: "#flash".to_string(),
                        after: Duration::ZERO,
                    }))
                    .with(SimElement::text("#flash", "You logged into a secure area!").hidden()),
            )
            .with_page(
                SimPage::new(&format!("{base}/dynamic_loading/1"), "Dynamic Loading")
                    .with(SimElement::heading("h4", "Example 1: Element on page that is hidden"))
                    .with(SimElement::button("#start button", "Start").on_click(Effect::Show {
                        selector: "#finish".to_string(),
                        after: Duration::from_millis(150),
                    }))
                    .with(SimElement::text("#finish", "Hello World!").hidden()),
            )
            .with_page(
                SimPage::new(&format!("{base}/add_remove_elements/"), "Add/Remove Elements")
                    .with(SimElement::heading("h3", "Add/Remove Elements"))
                    .with(SimElement::button("button:text('Add Element')", "Add Element").on_click(
                        Effect::Append(SimElement::button("button.added-manually", "Delete")),
                    )),
            )
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Switches that make individual operations fail
#[derive(Debug, Default)]
pub struct Faults {
    pub screenshot: AtomicBool,
    pub content: AtomicBool,
    pub close_context: AtomicBool,
    pub new_context: AtomicBool,
}

impl Faults {
    pub fn set_screenshot(&self, fail: bool) {
        self.screenshot.store(fail, Ordering::SeqCst);
    }

    pub fn set_content(&self, fail: bool) {
        self.content.store(fail, Ordering::SeqCst);
    }

    pub fn set_close_context(&self, fail: bool) {
        self.close_context.store(fail, Ordering::SeqCst);
    }

    pub fn set_new_context(&self, fail: bool) {
        self.new_context.store(fail, Ordering::SeqCst);
    }
}

/// Simulated browser environment
pub struct SimulatedEnvironment {
    options: LaunchOptions,
    site: Arc<SimulatedSite>,
    faults: Arc<Faults>,
    open: Arc<AtomicUsize>,
    closed: AtomicBool,
}

impl SimulatedEnvironment {
    /// Launch a simulated browser serving `site`
    pub fn launch(options: LaunchOptions, site: SimulatedSite) -> DriverResult<Self> {
        if !SUPPORTED_KINDS.contains(&options.kind.as_str()) {
            return Err(DriverError::Launch(format!(
                "unsupported browser '{}' (expected one of {})",
                options.kind,
                SUPPORTED_KINDS.join(", ")
            )));
        }
        tracing::debug!(kind = %options.kind, headless = options.headless, "simulated browser launched");
        Ok(Self {
            options,
            site: Arc::new(site),
            faults: Arc::new(Faults::default()),
            open: Arc::new(AtomicUsize::new(0)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Environment for SimulatedEnvironment {
    fn kind(&self) -> &str {
        &self.options.kind
    }

    fn new_context(&self, options: &ContextOptions) -> DriverResult<Box<dyn BrowserContext>> {
        if self.is_closed() {
            return Err(DriverError::Closed);
        }
        if self.faults.new_context.load(Ordering::SeqCst) {
            return Err(DriverError::Protocol("context creation refused".to_string()));
        }
        self.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(SimulatedContext {
            site: Arc::clone(&self.site),
            faults: Arc::clone(&self.faults),
            open: Arc::clone(&self.open),
            viewport: options.viewport,
            timeout: options.default_timeout,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn open_contexts(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let leaked = self.open_contexts();
        if leaked > 0 {
            tracing::warn!(leaked, "simulated browser closed with open contexts");
        }
        Ok(())
    }
}

struct SimulatedContext {
    site: Arc<SimulatedSite>,
    faults: Arc<Faults>,
    open: Arc<AtomicUsize>,
    viewport: Viewport,
    timeout: Duration,
    closed: Arc<AtomicBool>,
}

impl BrowserContext for SimulatedContext {
    fn new_page(&mut self) -> DriverResult<Box<dyn Page>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        Ok(Box::new(SimulatedPage {
            site: Arc::clone(&self.site),
            faults: Arc::clone(&self.faults),
            context_closed: Arc::clone(&self.closed),
            viewport: self.viewport,
            timeout: self.timeout,
            tab: Mutex::new(Tab::default()),
        }))
    }

    fn close(&mut self) -> DriverResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.open.fetch_sub(1, Ordering::SeqCst);
        if self.faults.close_context.load(Ordering::SeqCst) {
            return Err(DriverError::Protocol("context close failed".to_string()));
        }
        Ok(())
    }
}

/// Document state of one page
#[derive(Debug, Default)]
struct Tab {
    page: Option<SimPage>,
    /// Hidden elements scheduled to appear
    reveals: HashMap<String, Instant>,
}

impl Tab {
    fn apply_reveals(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .reveals
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(selector, _)| selector.clone())
            .collect();
        for selector in due {
            self.reveals.remove(&selector);
            if let Some(element) = self.element_mut(&selector) {
                element.visible = true;
            }
        }
    }

    fn element(&self, selector: &str) -> Option<&SimElement> {
        self.page.as_ref()?.elements.iter().find(|e| e.selector == selector)
    }

    fn element_mut(&mut self, selector: &str) -> Option<&mut SimElement> {
        self.page.as_mut()?.elements.iter_mut().find(|e| e.selector == selector)
    }

    fn visible_element_mut(&mut self, selector: &str) -> DriverResult<&mut SimElement> {
        self.apply_reveals();
        match self.element_mut(selector) {
            Some(element) if element.visible => Ok(element),
            _ => Err(DriverError::ElementNotFound(selector.to_string())),
        }
    }
}

struct SimulatedPage {
    site: Arc<SimulatedSite>,
    faults: Arc<Faults>,
    context_closed: Arc<AtomicBool>,
    viewport: Viewport,
    timeout: Duration,
    tab: Mutex<Tab>,
}

impl SimulatedPage {
    fn tab(&self) -> DriverResult<MutexGuard<'_, Tab>> {
        if self.context_closed.load(Ordering::SeqCst) {
            return Err(DriverError::Closed);
        }
        self.tab
            .lock()
            .map_err(|_| DriverError::Protocol("page state poisoned".to_string()))
    }

    fn load(&self, tab: &mut Tab, url: &str) -> DriverResult<()> {
        let page = self
            .site
            .page(url)
            .cloned()
            .ok_or_else(|| DriverError::Protocol(format!("net::ERR_NAME_NOT_RESOLVED at {url}")))?;
        tab.page = Some(page);
        tab.reveals.clear();
        Ok(())
    }

    /// Elements scheduled to appear are waited for, up to the default timeout
    fn await_pending(&mut self, selector: &str) -> DriverResult<()> {
        let pending = self.tab()?.reveals.contains_key(selector);
        if pending {
            self.wait_for(selector, self.timeout)?;
        }
        Ok(())
    }

    fn render(&self, full_page: bool) -> DriverResult<Vec<u8>> {
        let mut tab = self.tab()?;
        tab.apply_reveals();

        let visible: Vec<&SimElement> = tab
            .page
            .as_ref()
            .map(|p| p.elements.iter().filter(|e| e.visible).collect())
            .unwrap_or_default();
        let content_height = HEADER_HEIGHT + MARGIN * 2 + visible.len() as u32 * ROW_HEIGHT;
        let height = if full_page {
            self.viewport.height.max(content_height)
        } else {
            self.viewport.height
        };

        let mut fb = Framebuffer::with_color(self.viewport.width, height, BACKGROUND);
        fb.draw_rect(0, 0, self.viewport.width, HEADER_HEIGHT, HEADER);
        let (title, url) = tab
            .page
            .as_ref()
            .map(|p| (p.title.as_str(), p.url.as_str()))
            .unwrap_or(("", "about:blank"));
        fb.draw_text(MARGIN, 6, title, BACKGROUND, HEADER);
        fb.draw_text(MARGIN, 18, url, [160, 170, 180], HEADER);

        let mut y = HEADER_HEIGHT + MARGIN;
        for element in visible {
            draw_element(&mut fb, MARGIN, y, element);
            y += ROW_HEIGHT;
        }
        fb.to_png()
    }
}

fn draw_element(fb: &mut Framebuffer, x: u32, y: u32, element: &SimElement) {
    match &element.kind {
        ElementKind::Heading => {
            fb.draw_text(x, y, &element.text, FOREGROUND, BACKGROUND);
            let width = element.text.chars().count() as u32 * GLYPH_SIZE;
            fb.draw_rect(x, y + GLYPH_SIZE + 1, width, 1, FOREGROUND);
        }
        ElementKind::Text => fb.draw_text(x, y, &element.text, FOREGROUND, BACKGROUND),
        ElementKind::Link { .. } => fb.draw_text(x, y, &element.text, ACCENT, BACKGROUND),
        ElementKind::Button => {
            let width = element.text.chars().count() as u32 * GLYPH_SIZE + 8;
            fb.draw_rect(x, y - 2, width, GLYPH_SIZE + 4, ACCENT);
            fb.draw_text(x + 4, y, &element.text, BACKGROUND, ACCENT);
        }
        ElementKind::Checkbox { checked } => {
            fb.draw_frame(x, y, GLYPH_SIZE, GLYPH_SIZE, FOREGROUND);
            if *checked {
                fb.draw_rect(x + 2, y + 2, GLYPH_SIZE - 4, GLYPH_SIZE - 4, FOREGROUND);
            }
            fb.draw_text(x + GLYPH_SIZE * 2, y, &element.text, FOREGROUND, BACKGROUND);
        }
        ElementKind::Input { value } => {
            let label_width = (element.text.chars().count() as u32 + 1) * GLYPH_SIZE;
            fb.draw_text(x, y, &element.text, FOREGROUND, BACKGROUND);
            fb.draw_frame(x + label_width, y - 2, 24 * GLYPH_SIZE, GLYPH_SIZE + 4, FOREGROUND);
            fb.draw_text(x + label_width + 4, y, value, FOREGROUND, BACKGROUND);
        }
    }
}

fn html_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn element_html(element: &SimElement) -> String {
    let selector = html_escape(&element.selector);
    let text = html_escape(&element.text);
    let hidden = if element.visible { "" } else { " hidden" };
    match &element.kind {
        ElementKind::Heading => format!("<h3 data-selector=\"{selector}\"{hidden}>{text}</h3>"),
        ElementKind::Text => format!("<div data-selector=\"{selector}\"{hidden}>{text}</div>"),
        ElementKind::Link { href } => format!(
            "<a data-selector=\"{selector}\" href=\"{}\"{hidden}>{text}</a>",
            html_escape(href)
        ),
        ElementKind::Button => format!("<button data-selector=\"{selector}\"{hidden}>{text}</button>"),
        ElementKind::Checkbox { checked } => format!(
            "<label{hidden}><input type=\"checkbox\" data-selector=\"{selector}\"{}> {text}</label>",
            if *checked { " checked" } else { "" }
        ),
        ElementKind::Input { value } => format!(
            "<label{hidden}>{text} <input data-selector=\"{selector}\" value=\"{}\"></label>",
            html_escape(value)
        ),
    }
}

impl Page for SimulatedPage {
    fn navigate(&mut self, url: &str) -> DriverResult<()> {
        let mut tab = self.tab()?;
        self.load(&mut tab, url)
    }

    fn click(&mut self, selector: &str) -> DriverResult<()> {
        self.await_pending(selector)?;
        let mut tab = self.tab()?;
        let element = tab.visible_element_mut(selector)?;
        match &mut element.kind {
            ElementKind::Checkbox { checked } => *checked = !*checked,
            ElementKind::Link { href } => {
                let href = href.clone();
                return self.load(&mut tab, &href);
            }
            _ => {}
        }
        let effects = element.on_click.clone();
        for effect in effects {
            match effect {
                Effect::Show { selector, after } => {
                    tab.reveals.insert(selector, Instant::now() + after);
                }
                Effect::SetText { selector, text } => {
                    if let Some(target) = tab.element_mut(&selector) {
                        target.text = text;
                    }
                }
                Effect::Append(element) => {
                    if let Some(page) = tab.page.as_mut() {
                        page.elements.push(element);
                    }
                }
                Effect::Navigate(url) => return self.load(&mut tab, &url),
            }
        }
        tab.apply_reveals();
        Ok(())
    }

    fn fill(&mut self, selector: &str, value: &str) -> DriverResult<()> {
        self.await_pending(selector)?;
        let mut tab = self.tab()?;
        let element = tab.visible_element_mut(selector)?;
        match &mut element.kind {
            ElementKind::Input { value: current } => {
                *current = value.to_string();
                Ok(())
            }
            _ => Err(DriverError::Protocol(format!(
                "element '{selector}' is not an <input>"
            ))),
        }
    }

    fn wait_for(&mut self, selector: &str, timeout: Duration) -> DriverResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_visible(selector)? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DriverError::Timeout {
                    what: format!("selector '{selector}' to be visible"),
                    timeout,
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn is_visible(&mut self, selector: &str) -> DriverResult<bool> {
        let mut tab = self.tab()?;
        tab.apply_reveals();
        Ok(tab.element(selector).map(|e| e.visible).unwrap_or(false))
    }

    fn text_content(&mut self, selector: &str) -> DriverResult<Option<String>> {
        let mut tab = self.tab()?;
        tab.apply_reveals();
        Ok(tab.element(selector).map(|e| match &e.kind {
            ElementKind::Input { value } => value.clone(),
            _ => e.text.clone(),
        }))
    }

    fn is_checked(&mut self, selector: &str) -> DriverResult<bool> {
        let tab = self.tab()?;
        match tab.element(selector) {
            Some(SimElement { kind: ElementKind::Checkbox { checked }, .. }) => Ok(*checked),
            Some(_) => Err(DriverError::Protocol(format!(
                "element '{selector}' is not a checkbox"
            ))),
            None => Err(DriverError::ElementNotFound(selector.to_string())),
        }
    }

    fn screenshot(&mut self, full_page: bool) -> DriverResult<Vec<u8>> {
        if self.faults.screenshot.load(Ordering::SeqCst) {
            return Err(DriverError::Protocol("screenshot failed: page crashed".to_string()));
        }
        self.render(full_page)
    }

    fn content(&mut self) -> DriverResult<String> {
        if self.faults.content.load(Ordering::SeqCst) {
            return Err(DriverError::Protocol("content unavailable: page crashed".to_string()));
        }
        let mut tab = self.tab()?;
        tab.apply_reveals();
        let Some(page) = tab.page.as_ref() else {
            return Ok("<html><head></head><body></body></html>".to_string());
        };
        let body: Vec<String> = page.elements.iter().map(element_html).collect();
        Ok(format!(
            "<html><head><title>{}</title></head><body>\n{}\n</body></html>",
            html_escape(&page.title),
            body.join("\n")
        ))
    }

    fn url(&mut self) -> DriverResult<String> {
        let tab = self.tab()?;
        Ok(tab
            .page
            .as_ref()
            .map(|p| p.url.clone())
            .unwrap_or_else(|| "about:blank".to_string()))
    }

    fn title(&mut self) -> DriverResult<String> {
        let tab = self.tab()?;
        Ok(tab.page.as_ref().map(|p| p.title.clone()).unwrap_or_default())
    }

    fn set_default_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}
