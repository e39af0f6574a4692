//! Built-in system prompts for the analysis request.

pub const DEFAULT_TEMPLATE: &str = "hot_topics";
pub const CUSTOM_TEMPLATE: &str = "custom";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptTemplate {
    pub id: &'static str,
    pub title: &'static str,
    pub description: &'static str,
    pub prompt: &'static str,
}

impl PromptTemplate {
    pub fn is_custom(&self) -> bool {
        self.id == CUSTOM_TEMPLATE
    }
}

pub const TEMPLATES: &[PromptTemplate] = &[
    PromptTemplate {
        id: "hot_topics",
        title: "Topic digest",
        description: "Concrete events people are discussing, grouped by topic",
        prompt: "From the posts below, find the topics people are actively discussing and give me insights.

Process:
1. Read every post first.
2. Pick out hot topics. A topic must be a concrete event (\"the new Qwen3 model release\"), not a vague theme (\"AI progress\").
3. Group the related discussion under each topic.
4. For each discussion, list every participant's core point.
5. Order topics by how many people discuss them, most discussed first.

Output format (markdown, clickable links on the author and the post, none on the point itself):

### Topic
@[Author name](author link) [core point in under 20 words] [View post](post link)
@[Author name](author link) [core point in under 20 words] [View post](post link)

Leave out:
1. Personal life, daily chores, emotional venting
2. Ads and pure marketing
3. Political opinions and controversies
4. Posts too short to mean anything",
    },
    PromptTemplate {
        id: "tech_insights",
        title: "In-depth viewpoints",
        description: "Substantive opinions from the feed, summarized",
        prompt: "Select the valuable posts and present them in markdown:

### Discussion theme
[Author name](author link) [10-word core point]: [post text, translated to English if needed] [View post](post link)

Arrangement:
1. Focus on internet products and new AI technology.
2. Keep posts on the same theme together.
3. Rewrite non-English posts in English.
4. Merge repeated points from the same person.

Leave out:
1. Personal life, daily chores, emotional venting
2. Ads and pure marketing
3. Political opinions and controversies
4. Posts too short to mean anything",
    },
    PromptTemplate {
        id: "product_discovery",
        title: "New product discovery",
        description: "New products and features mentioned in the feed, grouped and assessed",
        prompt: "From the posts below, extract the new products people mention or use.

Process:
1. Read every post first.
2. Pick out new products or new features under discussion.
3. Group products by what users care about.
4. For every product explain what it does, which problem it solves, and who uses it and what they think.

Output format: markdown with the link placed on the product name, never as bare text.

# AI applications
### Product [original post]
Introduction:
Problem solved:
User feedback:

# Developer tools
### Product [original post]
Introduction:
Problem solved:
User feedback:",
    },
    PromptTemplate {
        id: "crypto_analysis",
        title: "Token background",
        description: "Background of a token from search results",
        prompt: "These posts are search results about a crypto meme token. Summarize what people say about it.

Process:
1. Read every post.
2. Summarize the token across project background, issuer, KOL opinions and overall sentiment.
3. Write an analysis report.

Output format: markdown, links clickable and never shown as bare text.

## Project
... [original post]

## Developer
... [original post]",
    },
    PromptTemplate {
        id: CUSTOM_TEMPLATE,
        title: "Custom prompt",
        description: "Uses the systemPrompt setting",
        prompt: "",
    },
];

pub fn find(id: &str) -> Option<&'static PromptTemplate> {
    TEMPLATES.iter().find(|t| t.id == id)
}

pub fn default_template() -> &'static PromptTemplate {
    &TEMPLATES[0]
}

/// Picks the system prompt for `selected`.
///
/// `custom` uses `custom_prompt` when it is non-blank; anything unresolvable
/// falls back to the default template.
pub fn resolve_prompt(selected: &str, custom_prompt: Option<&str>) -> String {
    let Some(template) = find(selected) else {
        return default_template().prompt.to_string();
    };
    if template.is_custom() {
        return custom_prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or(default_template().prompt)
            .to_string();
    }
    if template.prompt.is_empty() {
        return default_template().prompt.to_string();
    }
    template.prompt.to_string()
}
