use serde::{Deserialize, Serialize};

/// Sentinel used for author and timestamp when the rendered item has none.
pub const UNKNOWN: &str = "Unknown";

/// One scraped timeline item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub content: String,
    pub author: String,
    pub timestamp: String,
    pub id: Option<String>,
    pub url: Option<String>,
    pub has_quoted: bool,
    pub has_reply: bool,
    pub is_ad: bool,
}

impl Post {
    pub fn has_known_timestamp(&self) -> bool {
        !self.timestamp.is_empty() && self.timestamp != UNKNOWN
    }

    /// The `Author / Content / Time / URL` block sent to the model.
    pub fn to_prompt_block(&self) -> String {
        format!(
            "Author: {}\nContent: {}\nTime: {}\nURL: {}\n---",
            self.author,
            self.content,
            self.timestamp,
            self.url.as_deref().unwrap_or("N/A")
        )
    }
}

/// Counts reported after each extraction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub added: usize,
    pub duplicate: usize,
    pub failed: usize,
    pub total_collected: usize,
}
