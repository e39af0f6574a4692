//! Turns one rendered timeline item into a [`Post`].
//!
//! The extractor never touches a live document. It works against the
//! [`RenderedItem`] capability, which the HTML adapter in [`crate::dom`]
//! implements and which tests can fake.

use crate::post::{Post, UNKNOWN};
use tracing::debug;

const TEXT_SELECTOR: &str = r#"[data-testid="tweetText"]"#;

/// Tried in order when an item has no primary text node.
const ALT_TEXT_SELECTORS: &[&str] = &["div[lang]", r#"span[dir="auto"]"#];

/// Alt-text fragments shorter than this are UI chrome, not content.
const ALT_TEXT_MIN_CHARS: usize = 10;

const AUTHOR_SELECTORS: &[&str] = &[r#"[data-testid="User-Name"]"#, r#"[data-testid="User-Names"]"#];

const TIME_SELECTOR: &str = "time";

const PERMALINK_SELECTOR: &str = r#"a[href*="/status/"]"#;

const AD_MARKER_SELECTORS: &[&str] = &[r#"[data-testid="promoted"]"#, r#"[data-testid="ad"]"#];

const SPONSOR_KEYWORDS: &[&str] = &["Promoted", "广告"];

const QUOTED_SELECTORS: &[&str] = &[
    r#"[data-testid="card.wrapper"]"#,
    r#"[data-testid="tweet"] [data-testid="tweet"]"#,
    r#"div[role="link"]"#,
];

const REPLY_INDICATOR_SELECTORS: &[&str] = &[r#"[data-testid="reply"]"#, r#"span[dir="ltr"]"#];

const REPLY_MARKERS: &[&str] = &["Replying to", "回复"];

/// Characters of raw item text used as an id when there is no permalink.
const FALLBACK_ID_CHARS: usize = 50;

/// Query surface of one rendered timeline item.
///
/// Text is returned as rendered: block-level boundaries become newlines,
/// nothing is trimmed.
pub trait RenderedItem {
    fn inner_text(&self) -> String;

    /// Rendered text of every descendant matching `selector`, in document order.
    fn texts(&self, selector: &str) -> Vec<String>;

    /// Attribute `name` of the first descendant matching `selector`.
    fn attr(&self, selector: &str, name: &str) -> Option<String>;

    fn contains(&self, selector: &str) -> bool;

    /// First descendant matching `selector`, as an item of its own.
    fn find(&self, selector: &str) -> Option<Box<dyn RenderedItem + '_>>;

    /// The item rendered just before this one, if any.
    fn previous_item(&self) -> Option<Box<dyn RenderedItem + '_>>;
}

/// Text and author of an embedded or referenced item.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ContextItem {
    author: String,
    content: String,
}

#[derive(Debug, Clone)]
pub struct Extractor {
    permalink_origin: String,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new("https://x.com")
    }
}

impl Extractor {
    pub fn new(permalink_origin: impl Into<String>) -> Self {
        Self {
            permalink_origin: permalink_origin.into().trim_end_matches('/').to_string(),
        }
    }

    /// Returns `None` when no usable text is left after every fallback.
    pub fn extract(&self, item: &dyn RenderedItem) -> Option<Post> {
        let body = extract_body(item);
        let author = extract_author(item).unwrap_or_else(|| UNKNOWN.to_string());
        let timestamp = extract_timestamp(item);
        let is_ad = timestamp == UNKNOWN || is_sponsored(item);

        let href = item.attr(PERMALINK_SELECTOR, "href");
        let raw_text = item.inner_text();
        let id = match href.as_deref() {
            Some(href) => status_id(href),
            None => {
                let prefix: String = raw_text.chars().take(FALLBACK_ID_CHARS).collect();
                (!prefix.is_empty()).then_some(prefix)
            }
        };
        let url = href.map(|href| self.absolute_url(&href));

        let quoted = extract_quoted(item);
        let reply = extract_reply_context(item);

        let mut content = body;
        if let Some(reply) = &reply {
            content = format!(
                "Replying to {}: \"{}\"\n\n{}",
                reply.author, reply.content, content
            );
        }
        if let Some(quoted) = &quoted {
            content = format!(
                "{}\n\nQuoting {}: \"{}\"",
                content, quoted.author, quoted.content
            );
        }

        let content = tidy_lines(&content);
        if content.is_empty() {
            debug!(raw_chars = raw_text.chars().count(), "No content in timeline item");
            return None;
        }

        Some(Post {
            content,
            author,
            timestamp,
            id,
            url,
            has_quoted: quoted.is_some(),
            has_reply: reply.is_some(),
            is_ad,
        })
    }

    fn absolute_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else if href.starts_with('/') {
            format!("{}{}", self.permalink_origin, href)
        } else {
            format!("{}/{}", self.permalink_origin, href)
        }
    }
}

fn extract_body(item: &dyn RenderedItem) -> String {
    let primary = join_fragments(item.texts(TEXT_SELECTOR).iter().map(|t| clean_fragment(t)));
    if !primary.is_empty() {
        return primary;
    }

    // Markup without tweetText: take the first alternative that matches at all.
    for selector in ALT_TEXT_SELECTORS {
        let texts = item.texts(selector);
        if texts.is_empty() {
            continue;
        }
        debug!(selector, "Falling back to alternative text selector");
        return join_fragments(
            texts
                .iter()
                .map(|t| clean_fragment(t))
                .filter(|t| t.chars().count() > ALT_TEXT_MIN_CHARS),
        );
    }

    String::new()
}

fn extract_author(item: &dyn RenderedItem) -> Option<String> {
    AUTHOR_SELECTORS.iter().find_map(|selector| {
        item.texts(selector)
            .into_iter()
            .map(|t| clean_fragment(&t))
            .find(|t| !t.is_empty())
    })
}

fn extract_timestamp(item: &dyn RenderedItem) -> String {
    if let Some(datetime) = item.attr(TIME_SELECTOR, "datetime") {
        let datetime = datetime.trim();
        if !datetime.is_empty() {
            return datetime.to_string();
        }
    }
    item.texts(TIME_SELECTOR)
        .into_iter()
        .map(|t| clean_fragment(&t))
        .find(|t| !t.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string())
}

fn is_sponsored(item: &dyn RenderedItem) -> bool {
    if AD_MARKER_SELECTORS.iter().any(|s| item.contains(s)) {
        return true;
    }
    let text = item.inner_text();
    SPONSOR_KEYWORDS.iter().any(|k| text.contains(k))
}

fn extract_quoted(item: &dyn RenderedItem) -> Option<ContextItem> {
    QUOTED_SELECTORS.iter().find_map(|selector| {
        let container = item.find(selector)?;
        context_from(container.as_ref())
    })
}

fn extract_reply_context(item: &dyn RenderedItem) -> Option<ContextItem> {
    // Only the first match of each indicator selector counts.
    let has_indicator = REPLY_INDICATOR_SELECTORS.iter().any(|selector| {
        item.texts(selector)
            .first()
            .is_some_and(|t| REPLY_MARKERS.iter().any(|m| t.contains(m)))
    });
    if !has_indicator {
        return None;
    }
    let previous = item.previous_item()?;
    context_from(previous.as_ref())
}

fn context_from(item: &dyn RenderedItem) -> Option<ContextItem> {
    let content = join_fragments(item.texts(TEXT_SELECTOR).iter().map(|t| clean_fragment(t)));
    if content.is_empty() {
        return None;
    }
    Some(ContextItem {
        author: extract_author(item).unwrap_or_else(|| UNKNOWN.to_string()),
        content,
    })
}

/// Parses the numeric status id out of a permalink such as `/ada/status/1917?s=20`.
pub fn status_id(href: &str) -> Option<String> {
    let after = href.split("/status/").nth(1)?;
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// Collapses one rendered text node into a single line.
pub fn clean_fragment(raw: &str) -> String {
    raw.replace('\t', "")
        .replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_fragments(fragments: impl Iterator<Item = String>) -> String {
    fragments
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Trims every line and folds runs of blank lines into one.
pub fn tidy_lines(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    let mut pending_blank = false;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            pending_blank = !lines.is_empty();
            continue;
        }
        if pending_blank {
            lines.push("");
            pending_blank = false;
        }
        lines.push(line);
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::HtmlTimeline;
    use crate::scanner::TimelinePage;

    const ITEM: &str = r#"article[data-testid="tweet"]"#;

    fn extract_all(html: &str) -> Vec<Option<Post>> {
        let page = HtmlTimeline::from_chunks(vec![html.to_string()], 800.0);
        let extractor = Extractor::default();
        let posts = page
            .query_items(ITEM)
            .iter()
            .map(|item| extractor.extract(item.as_ref()))
            .collect();
        posts
    }

    fn extract_one(html: &str) -> Option<Post> {
        extract_all(html).into_iter().next().flatten()
    }

    #[test]
    fn test_extract_full_item() {
        let html = r#"
            <article data-testid="tweet">
              <div data-testid="User-Name"><span>Ada</span> <span>@ada</span></div>
              <a href="/ada/status/1917"><time datetime="2025-05-01T10:00:00.000Z">May 1</time></a>
              <div data-testid="tweetText">  Shipping   the new
                 parser&nbsp;today	</div>
            </article>"#;
        let post = extract_one(html).unwrap();
        assert_eq!(post.content, "Shipping the new parser today");
        assert_eq!(post.author, "Ada @ada");
        assert_eq!(post.timestamp, "2025-05-01T10:00:00.000Z");
        assert_eq!(post.id.as_deref(), Some("1917"));
        assert_eq!(post.url.as_deref(), Some("https://x.com/ada/status/1917"));
        assert!(!post.is_ad);
        assert!(!post.has_quoted);
        assert!(!post.has_reply);
    }

    #[test]
    fn test_multiple_text_nodes_are_joined() {
        let html = r#"
            <article data-testid="tweet">
              <time datetime="2025-05-01T10:00:00Z"></time>
              <div data-testid="tweetText">first part</div>
              <div data-testid="tweetText">second part</div>
            </article>"#;
        assert_eq!(extract_one(html).unwrap().content, "first part second part");
    }

    #[test]
    fn test_missing_author_and_time_use_sentinel() {
        let html = r#"<article data-testid="tweet"><div data-testid="tweetText">hello timeline</div></article>"#;
        let post = extract_one(html).unwrap();
        assert_eq!(post.author, UNKNOWN);
        assert_eq!(post.timestamp, UNKNOWN);
        assert!(post.is_ad, "no timestamp marks the item as an ad");
    }

    #[test]
    fn test_time_text_used_without_datetime() {
        let html = r#"<article data-testid="tweet"><time>3h</time><div data-testid="tweetText">body</div></article>"#;
        assert_eq!(extract_one(html).unwrap().timestamp, "3h");
    }

    #[test]
    fn test_id_falls_back_to_raw_text_prefix() {
        let long = "x".repeat(80);
        let html = format!(
            r#"<article data-testid="tweet"><time datetime="2025-05-01T10:00:00Z"></time><div data-testid="tweetText">{}</div></article>"#,
            long
        );
        let post = extract_one(&html).unwrap();
        assert_eq!(post.id.as_deref().map(|id| id.chars().count()), Some(50));
        assert_eq!(post.url, None);
    }

    #[test]
    fn test_promoted_marker_and_keyword() {
        let marker = r#"<article data-testid="tweet"><time datetime="2025-05-01T10:00:00Z"></time><div data-testid="promoted"></div><div data-testid="tweetText">buy now</div></article>"#;
        assert!(extract_one(marker).unwrap().is_ad);

        let keyword = r#"<article data-testid="tweet"><time datetime="2025-05-01T10:00:00Z"></time><div data-testid="tweetText">buy now</div><span>Promoted</span></article>"#;
        assert!(extract_one(keyword).unwrap().is_ad);
    }

    #[test]
    fn test_quoted_item_is_appended() {
        let html = r#"
            <article data-testid="tweet">
              <time datetime="2025-05-01T10:00:00Z"></time>
              <div data-testid="tweetText">Worth reading</div>
              <div data-testid="card.wrapper">
                <div data-testid="User-Name">Grace</div>
                <div data-testid="tweetText">Compilers are fun</div>
              </div>
            </article>"#;
        let post = extract_one(html).unwrap();
        assert!(post.has_quoted);
        assert!(post
            .content
            .ends_with("\n\nQuoting Grace: \"Compilers are fun\""));
    }

    #[test]
    fn test_reply_context_is_prepended() {
        let html = r#"
            <div>
              <article data-testid="tweet">
                <div data-testid="User-Name">Linus</div>
                <time datetime="2025-05-01T09:00:00Z"></time>
                <div data-testid="tweetText">Original thought</div>
              </article>
              <article data-testid="tweet">
                <time datetime="2025-05-01T10:00:00Z"></time>
                <span dir="ltr">Replying to @linus</span>
                <div data-testid="tweetText">Agreed</div>
              </article>
            </div>"#;
        let posts = extract_all(html);
        let reply = posts[1].as_ref().unwrap();
        assert!(reply.has_reply);
        assert_eq!(reply.content, "Replying to Linus: \"Original thought\"\n\nAgreed");
        assert!(!posts[0].as_ref().unwrap().has_reply);
    }

    #[test]
    fn test_reply_marker_in_body_is_not_a_reply() {
        let html = r#"
            <div>
              <article data-testid="tweet">
                <div data-testid="User-Name">Linus</div>
                <time datetime="2025-05-01T09:00:00Z"></time>
                <div data-testid="tweetText">Unrelated post</div>
              </article>
              <article data-testid="tweet">
                <div data-testid="User-Name"><span dir="ltr">@ada</span></div>
                <time datetime="2025-05-01T10:00:00Z"></time>
                <div data-testid="tweetText"><span dir="ltr">Replying to threads is an art</span></div>
              </article>
            </div>"#;
        let posts = extract_all(html);
        let post = posts[1].as_ref().unwrap();
        assert!(!post.has_reply);
        assert_eq!(post.content, "Replying to threads is an art");
    }

    #[test]
    fn test_alt_text_fallback_keeps_long_fragments() {
        let html = r#"
            <article data-testid="tweet">
              <time datetime="2025-05-01T10:00:00Z"></time>
              <div lang="en">short</div>
              <div lang="en">this fragment is long enough</div>
            </article>"#;
        assert_eq!(extract_one(html).unwrap().content, "this fragment is long enough");
    }

    #[test]
    fn test_empty_and_malformed_items_yield_none() {
        for html in [
            r#"<article data-testid="tweet"></article>"#,
            r#"<article data-testid="tweet"><div data-testid="tweetText">   </div></article>"#,
            r#"<article data-testid="tweet"><div lang="en">tiny</div></article>"#,
            r#"<article data-testid="tweet"><div data-testid="tweetText"><span></span></article>"#,
        ] {
            assert_eq!(extract_one(html), None, "{html}");
        }
    }

    #[test]
    fn test_status_id() {
        assert_eq!(status_id("/ada/status/1917"), Some("1917".to_string()));
        assert_eq!(
            status_id("https://x.com/ada/status/42/photo/1"),
            Some("42".to_string())
        );
        assert_eq!(status_id("/ada/status/"), None);
        assert_eq!(status_id("/ada/likes"), None);
    }

    #[test]
    fn test_absolute_url() {
        let extractor = Extractor::new("https://twitter.com/");
        assert_eq!(
            extractor.absolute_url("/a/status/1"),
            "https://twitter.com/a/status/1"
        );
        assert_eq!(
            extractor.absolute_url("https://x.com/a/status/1"),
            "https://x.com/a/status/1"
        );
    }

    #[test]
    fn test_tidy_lines() {
        assert_eq!(tidy_lines("  a  \n\n\n   b\n"), "a\n\nb");
        assert_eq!(tidy_lines("\n\n a"), "a");
        assert_eq!(tidy_lines("   "), "");
    }

    #[test]
    fn test_clean_fragment() {
        assert_eq!(clean_fragment("a\u{a0}\u{a0}b\t\n c"), "a b c");
    }
}
