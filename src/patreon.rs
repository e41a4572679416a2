use std::time::Duration;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONNECTION, CONTENT_TYPE, COOKIE, REFERER,
    USER_AGENT,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const API_BASE: &str = "https://www.patreon.com/api";
pub const WEB_BASE: &str = "https://www.patreon.com";

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:146.0) Gecko/20100101 Firefox/146.0";

#[derive(Debug, Error)]
pub enum Error {
    #[error("patreon: request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("patreon: API returned status {status}: {body}")]
    Remote { status: u16, body: String },
    #[error("patreon: failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Post summary as returned by the campaign listing endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Post {
    pub id: String,
    pub kind: String,
    pub post_type: String,
    pub title: String,
    pub patreon_url: String,
    pub current_user_can_view: bool,
    pub published_at: DateTime<Utc>,
    pub details_cached: bool,
}

#[derive(Debug, Clone)]
pub struct PostsPage {
    pub posts: Vec<Post>,
    pub next_cursor: String,
    pub has_more: bool,
}

#[derive(Debug, Clone)]
pub struct PostDetails {
    pub id: String,
    pub title: String,
    pub content: String,
    /// HTML-stripped content.
    pub description: String,
    pub post_type: String,
    pub published_at: DateTime<Utc>,
    pub youtube_links: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub cookies: String,
    pub http_client: Option<HttpClient>,
}

pub struct Client {
    http: HttpClient,
    cookies: String,
    base_url: String,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(Duration::from_secs(20))
                .build()?,
        };

        Ok(Client {
            http,
            cookies: config.cookies,
            base_url: API_BASE.to_string(),
        })
    }

    /// Fetches one page of posts for a campaign. An empty `cursor` requests the
    /// first page; the API expects the literal string "null" for that case.
    pub fn posts_page(&self, campaign_id: &str, count: usize, cursor: &str) -> Result<PostsPage> {
        let url = format!("{}/campaigns/{}/posts", self.base_url, campaign_id);
        let page_cursor = if cursor.is_empty() { "null" } else { cursor };
        let count = count.to_string();

        let query: Vec<(&str, &str)> = vec![
            (
                "include",
                "user.campaign.current_user_pledge,access_rules.tier.null,moderator_actions,primary_image",
            ),
            (
                "fields[post]",
                "commenter_count,current_user_can_view,image,thumbnail,insights_last_updated_at,patreon_url,post_type,published_at,title,upgrade_url,view_count,is_preview_blurred",
            ),
            ("fields[access_rule]", "access_rule_type"),
            ("fields[reward]", "amount_cents,id"),
            ("fields[user]", "[]"),
            ("fields[campaign]", "[]"),
            ("fields[pledge]", "amount_cents"),
            (
                "fields[primary-image]",
                "image_icon,image_small,image_medium,image_large,primary_image_type,alt_text,image_colors,is_fallback,prefer_alternate_display,id",
            ),
            ("page[cursor]", page_cursor),
            ("page[count]", &count),
            ("filter[is_by_creator]", "true"),
            ("filter[contains_exclusive_posts]", "true"),
            ("sort", "-recency_weighted_engagement"),
            ("json-api-use-default-includes", "false"),
            ("json-api-version", "1.0"),
        ];

        let body = self.get(&url, &query)?;
        parse_posts_body(&body)
    }

    /// Fetches the full content of a single post and extracts YouTube links
    /// from its body and embed URL.
    pub fn post_detail(&self, post_id: &str) -> Result<PostDetails> {
        let url = format!("{}/posts/{}", self.base_url, post_id);
        let query: Vec<(&str, &str)> = vec![
            (
                "fields[post]",
                "content,embed,title,post_type,published_at,patreon_url",
            ),
            ("json-api-version", "1.0"),
        ];

        let body = self.get(&url, &query)?;
        parse_detail_body(&body)
    }

    fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<String> {
        let response = self
            .http
            .get(url)
            .query(query)
            .headers(self.headers())
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(Error::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/vnd.api+json"),
        );
        headers.insert(REFERER, HeaderValue::from_static("https://www.patreon.com/"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("empty"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("cors"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
        if !self.cookies.is_empty() {
            if let Ok(value) = HeaderValue::from_str(&self.cookies) {
                headers.insert(COOKIE, value);
            }
        }
        headers
    }
}

#[derive(Debug, Deserialize)]
struct PostsEnvelope {
    #[serde(default)]
    data: Vec<PostData>,
    #[serde(default)]
    links: PageLinks,
}

#[derive(Debug, Default, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    attributes: PostAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct PostAttributes {
    #[serde(default)]
    post_type: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    patreon_url: String,
    #[serde(default)]
    current_user_can_view: bool,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct DetailEnvelope {
    data: DetailData,
}

#[derive(Debug, Deserialize)]
struct DetailData {
    id: String,
    #[serde(default)]
    attributes: DetailAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct DetailAttributes {
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    post_type: String,
    #[serde(default)]
    published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    embed: Embed,
}

#[derive(Debug, Default, Deserialize)]
struct Embed {
    #[serde(default)]
    url: String,
}

fn parse_posts_body(body: &str) -> Result<PostsPage> {
    let envelope: PostsEnvelope = serde_json::from_str(body)?;

    let posts = envelope
        .data
        .into_iter()
        .map(|data| Post {
            id: data.id,
            kind: data.kind,
            post_type: data.attributes.post_type,
            title: data.attributes.title,
            patreon_url: data.attributes.patreon_url,
            current_user_can_view: data.attributes.current_user_can_view,
            published_at: data.attributes.published_at.unwrap_or(DateTime::UNIX_EPOCH),
            details_cached: false,
        })
        .collect();

    let next = envelope.links.next.unwrap_or_default();
    Ok(PostsPage {
        posts,
        next_cursor: cursor_from_next_url(&next),
        has_more: !next.is_empty(),
    })
}

fn parse_detail_body(body: &str) -> Result<PostDetails> {
    let envelope: DetailEnvelope = serde_json::from_str(body)?;
    let data = envelope.data;

    let mut all_content = data.attributes.content.clone();
    if !data.attributes.embed.url.is_empty() {
        all_content.push(' ');
        all_content.push_str(&data.attributes.embed.url);
    }

    Ok(PostDetails {
        id: data.id,
        title: data.attributes.title,
        description: strip_html(&data.attributes.content),
        content: data.attributes.content,
        post_type: data.attributes.post_type,
        published_at: data.attributes.published_at.unwrap_or(DateTime::UNIX_EPOCH),
        youtube_links: extract_youtube_links(&all_content),
    })
}

/// Pulls the `page[cursor]` query parameter out of a `links.next` URL.
/// Anything unparseable counts as "no further pages".
fn cursor_from_next_url(next_url: &str) -> String {
    if next_url.is_empty() {
        return String::new();
    }
    let Ok(parsed) = url::Url::parse(next_url) else {
        return String::new();
    };
    parsed
        .query_pairs()
        .find(|(key, _)| key == "page[cursor]")
        .map(|(_, value)| value.into_owned())
        .unwrap_or_default()
}

static YOUTUBE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"https?://(?:www\.)?youtube\.com/watch\?v=([A-Za-z0-9_-]{11})",
        r"https?://(?:www\.)?youtube\.com/embed/([A-Za-z0-9_-]{11})",
        r"https?://youtu\.be/([A-Za-z0-9_-]{11})",
        r"https?://(?:www\.)?youtube\.com/v/([A-Za-z0-9_-]{11})",
        r"https?://(?:www\.)?youtube\.com/shorts/([A-Za-z0-9_-]{11})",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("youtube pattern is valid"))
    .collect()
});

/// Finds all YouTube video URLs in the text and canonicalizes them to
/// `https://www.youtube.com/watch?v=<id>`, deduplicated by video id in
/// first-seen order across the pattern list.
pub fn extract_youtube_links(content: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for pattern in YOUTUBE_PATTERNS.iter() {
        for captures in pattern.captures_iter(content) {
            let Some(video_id) = captures.get(1) else {
                continue;
            };
            let video_id = video_id.as_str();
            if seen.insert(video_id.to_string()) {
                links.push(format!("https://www.youtube.com/watch?v={}", video_id));
            }
        }
    }

    links
}

static SCRIPT_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script[^>]*>.*?</script>").expect("script regex"));
static STYLE_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<style[^>]*>.*?</style>").expect("style regex"));
static HTML_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("tag regex"));
static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));

/// Removes HTML markup: script/style blocks go entirely, remaining tags are
/// stripped, a fixed entity set is decoded, and whitespace runs collapse.
pub fn strip_html(html: &str) -> String {
    let text = SCRIPT_TAG_RE.replace_all(html, "");
    let text = STYLE_TAG_RE.replace_all(&text, "");
    let text = HTML_TAG_RE.replace_all(&text, "");

    let text = text
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    WHITESPACE_RE.replace_all(&text, " ").trim().to_string()
}
