//! Saved timeline HTML rendered as a scrollable, virtualized page.
//!
//! A timeline is a sequence of HTML chunks. The first chunk is loaded up
//! front; each later chunk is appended when the viewport reaches the bottom,
//! the way an infinite-scroll feed fetches its next page. Only items near the
//! viewport are reported as rendered.

use crate::config::DEFAULT_ITEM_SELECTORS;
use crate::extractor::RenderedItem;
use crate::scanner::TimelinePage;
use crate::scroll::Viewport;
use scraper::{ElementRef, Html, Node, Selector};
use std::collections::VecDeque;
use std::io;
use std::path::Path;
use tracing::debug;

pub const DEFAULT_ITEM_HEIGHT: f64 = 400.0;

/// Tags whose start breaks the rendered text onto a new line.
const BLOCK_TAGS: &[&str] = &[
    "article", "blockquote", "br", "div", "footer", "h1", "h2", "h3", "header", "li", "p",
    "section", "ul", "ol",
];

/// One element of a parsed chunk.
#[derive(Clone, Copy)]
pub struct HtmlItem<'a> {
    element: ElementRef<'a>,
}

impl<'a> HtmlItem<'a> {
    pub fn new(element: ElementRef<'a>) -> Self {
        Self { element }
    }

    fn select_all(&self, selector: &str) -> Vec<ElementRef<'a>> {
        match Selector::parse(selector) {
            Ok(selector) => self.element.select(&selector).collect(),
            Err(_) => {
                debug!(selector, "Ignoring unparsable selector");
                Vec::new()
            }
        }
    }

    fn select_first(&self, selector: &str) -> Option<ElementRef<'a>> {
        let selector = Selector::parse(selector).ok()?;
        self.element.select(&selector).next()
    }
}

impl RenderedItem for HtmlItem<'_> {
    fn inner_text(&self) -> String {
        rendered_text(self.element)
    }

    fn texts(&self, selector: &str) -> Vec<String> {
        self.select_all(selector)
            .into_iter()
            .map(rendered_text)
            .collect()
    }

    fn attr(&self, selector: &str, name: &str) -> Option<String> {
        self.select_first(selector)?
            .value()
            .attr(name)
            .map(str::to_string)
    }

    fn contains(&self, selector: &str) -> bool {
        self.select_first(selector).is_some()
    }

    fn find(&self, selector: &str) -> Option<Box<dyn RenderedItem + '_>> {
        let element = self.select_first(selector)?;
        Some(Box::new(HtmlItem::new(element)))
    }

    fn previous_item(&self) -> Option<Box<dyn RenderedItem + '_>> {
        let sibling = self
            .element
            .prev_siblings()
            .find_map(ElementRef::wrap)
            .or_else(|| {
                // Wrapped items: look one level up.
                let parent = self.element.parent().and_then(ElementRef::wrap)?;
                parent.prev_siblings().find_map(ElementRef::wrap)
            })?;
        Some(Box::new(HtmlItem::new(sibling)))
    }
}

/// Text as a browser would lay it out: raw text nodes, with a line break
/// at the start of each nested block element.
fn rendered_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants().skip(1) {
        match node.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if BLOCK_TAGS.contains(&el.name()) => out.push('\n'),
            _ => {}
        }
    }
    out
}

pub struct HtmlTimeline {
    loaded: Vec<Html>,
    pending: VecDeque<String>,
    /// Cascade whose first matching selector lays out the page.
    layout_selectors: Vec<String>,
    viewport: f64,
    item_height: f64,
    top: f64,
}

impl HtmlTimeline {
    /// Builds a timeline whose first chunk is already loaded.
    pub fn from_chunks(chunks: Vec<String>, viewport: f64) -> Self {
        let mut pending: VecDeque<String> = chunks.into();
        let loaded = pending
            .pop_front()
            .map(|first| vec![Html::parse_document(&first)])
            .unwrap_or_default();
        Self {
            loaded,
            pending,
            layout_selectors: DEFAULT_ITEM_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            viewport: viewport.max(1.0),
            item_height: DEFAULT_ITEM_HEIGHT,
            top: 0.0,
        }
    }

    /// Reads one chunk per file, in the order given.
    pub fn from_files<P: AsRef<Path>>(paths: &[P], viewport: f64) -> io::Result<Self> {
        let chunks = paths
            .iter()
            .map(std::fs::read_to_string)
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Self::from_chunks(chunks, viewport))
    }

    pub fn with_item_height(mut self, item_height: f64) -> Self {
        self.item_height = item_height.max(1.0);
        self
    }

    /// Item selectors tried in order when measuring the page.
    ///
    /// Should match the cascade used to query items, so that every queried
    /// item has a slot in the scroll height.
    pub fn with_layout_selectors(mut self, selectors: Vec<String>) -> Self {
        self.layout_selectors = selectors;
        self
    }

    pub fn loaded_chunks(&self) -> usize {
        self.loaded.len()
    }

    pub fn pending_chunks(&self) -> usize {
        self.pending.len()
    }

    fn layout_items(&self) -> usize {
        self.layout_selectors
            .iter()
            .filter_map(|selector| Selector::parse(selector).ok())
            .map(|selector| {
                self.loaded
                    .iter()
                    .map(|doc| doc.select(&selector).count())
                    .sum::<usize>()
            })
            .find(|count| *count > 0)
            .unwrap_or(0)
    }

    fn max_top(&self) -> f64 {
        (self.scroll_height() - self.viewport).max(0.0)
    }

    fn load_next_chunk(&mut self) {
        if let Some(chunk) = self.pending.pop_front() {
            self.loaded.push(Html::parse_document(&chunk));
            debug!(
                loaded = self.loaded.len(),
                pending = self.pending.len(),
                "Loaded next timeline chunk"
            );
        }
    }

    /// Whether an item laid out at `index` lies inside the rendered band.
    fn is_rendered(&self, index: usize) -> bool {
        let start = index as f64 * self.item_height;
        let end = start + self.item_height;
        let band_start = self.top - self.viewport;
        let band_end = self.top + 2.0 * self.viewport;
        end > band_start && start < band_end
    }
}

impl Viewport for HtmlTimeline {
    fn scroll_height(&self) -> f64 {
        (self.layout_items() as f64 * self.item_height).max(self.viewport)
    }

    fn viewport_height(&self) -> f64 {
        self.viewport
    }

    fn scroll_top(&self) -> f64 {
        self.top
    }

    fn scroll_to(&mut self, top: f64) {
        self.top = top.clamp(0.0, self.max_top());
        if self.top >= self.max_top() {
            self.load_next_chunk();
        }
    }
}

impl TimelinePage for HtmlTimeline {
    /// Every matched item occupies one `item_height` slot, in document order
    /// across loaded chunks.
    fn query_items(&self, selector: &str) -> Vec<Box<dyn RenderedItem + '_>> {
        let Ok(selector) = Selector::parse(selector) else {
            debug!(selector, "Ignoring unparsable item selector");
            return Vec::new();
        };
        self.loaded
            .iter()
            .flat_map(|doc| doc.select(&selector))
            .enumerate()
            .filter(|(index, _)| self.is_rendered(*index))
            .map(|(_, element)| Box::new(HtmlItem::new(element)) as Box<dyn RenderedItem + '_>)
            .collect()
    }
}
