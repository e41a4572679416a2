use std::collections::HashSet;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use indicatif::ProgressBar;
use rand::Rng;

use crate::config::CampaignSeed;
use crate::patreon::{self, PostDetails, PostsPage};
use crate::storage;

pub const PAGE_SIZE: usize = 50;

/// Seam over the remote client so the workflow can be exercised without a
/// network connection.
pub trait PostSource {
    fn posts_page(
        &self,
        campaign_id: &str,
        count: usize,
        cursor: &str,
    ) -> patreon::Result<PostsPage>;
    fn post_detail(&self, post_id: &str) -> patreon::Result<PostDetails>;
}

impl PostSource for patreon::Client {
    fn posts_page(
        &self,
        campaign_id: &str,
        count: usize,
        cursor: &str,
    ) -> patreon::Result<PostsPage> {
        patreon::Client::posts_page(self, campaign_id, count, cursor)
    }

    fn post_detail(&self, post_id: &str) -> patreon::Result<PostDetails> {
        patreon::Client::post_detail(self, post_id)
    }
}

pub struct Options<'a> {
    pub campaigns: &'a [CampaignSeed],
    /// Optional YYYY-MM-DD cutoff; posts published before it are skipped.
    pub published_after: &'a str,
    pub delay_min: Duration,
    pub delay_max: Duration,
}

/// Walks every configured campaign, collects YouTube links from posts at or
/// after the cutoff, and returns them globally deduplicated in first-seen
/// order. A failing campaign or post is reported and skipped; only an empty
/// campaign list or a malformed cutoff date aborts the run.
pub fn run(source: &dyn PostSource, store: &storage::Store, opts: &Options) -> Result<Vec<String>> {
    if opts.campaigns.is_empty() {
        bail!("no campaigns configured; add them to the config file first");
    }

    let cutoff = parse_cutoff(opts.published_after)?;
    if let Some(cutoff) = cutoff {
        println!("Filtering posts published after {}", cutoff.format("%Y-%m-%d"));
    }
    println!(
        "Request delays: {}ms - {}ms",
        opts.delay_min.as_millis(),
        opts.delay_max.as_millis()
    );
    println!("Processing {} campaign(s)...", opts.campaigns.len());

    let mut seen: HashSet<String> = HashSet::new();
    let mut all_links: Vec<String> = Vec::new();

    for campaign in opts.campaigns {
        let display = if campaign.name.is_empty() {
            campaign.id.as_str()
        } else {
            campaign.name.as_str()
        };

        let progress = ProgressBar::new_spinner();
        progress.enable_steady_tick(Duration::from_millis(120));
        progress.set_message(format!("Campaign {display}: fetching"));

        let links = campaign_links(source, store, campaign, cutoff, opts, &progress);
        progress.finish_and_clear();

        match links {
            Ok(links) => {
                let found = links.len();
                for link in links {
                    if seen.insert(link.clone()) {
                        all_links.push(link);
                    }
                }
                println!("Campaign {display}: {found} link(s) found");
            }
            Err(err) => {
                eprintln!("Campaign {display}: skipped: {err:#}");
            }
        }

        random_delay(opts.delay_min, opts.delay_max);
    }

    Ok(all_links)
}

fn parse_cutoff(after: &str) -> Result<Option<DateTime<Utc>>> {
    if after.is_empty() {
        return Ok(None);
    }
    let date = NaiveDate::parse_from_str(after, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{after}', expected YYYY-MM-DD"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .context("date has no midnight representation")?;
    Ok(Some(midnight.and_utc()))
}

/// Paginates one campaign. Posts arrive in publish-time descending order, so
/// the first post older than the cutoff ends the whole campaign, not just
/// the current page.
fn campaign_links(
    source: &dyn PostSource,
    store: &storage::Store,
    campaign: &CampaignSeed,
    cutoff: Option<DateTime<Utc>>,
    opts: &Options,
    progress: &ProgressBar,
) -> Result<Vec<String>> {
    let mut links: Vec<String> = Vec::new();
    let mut cursor = String::new();
    let mut page_number = 0usize;

    loop {
        page_number += 1;
        progress.set_message(format!("Campaign {}: page {page_number}", campaign.id));

        let page = source
            .posts_page(&campaign.id, PAGE_SIZE, &cursor)
            .with_context(|| format!("fetch posts page {page_number}"))?;
        random_delay(opts.delay_min, opts.delay_max);

        record_page(store, &campaign.id, &cursor, &page);

        for post in &page.posts {
            if let Some(cutoff) = cutoff {
                if post.published_at < cutoff {
                    return Ok(links);
                }
            }

            if store.is_details_cached(&post.id).unwrap_or(false) {
                if let Ok(Some(cached)) = store.get_post(&post.id) {
                    links.extend(decode_links(cached.youtube_links.as_deref()));
                }
                continue;
            }

            match source.post_detail(&post.id) {
                Ok(details) => {
                    save_details(store, &details);
                    links.extend(details.youtube_links);
                }
                Err(err) => {
                    eprintln!("Post {}: skipped: {err}", post.id);
                }
            }
            random_delay(opts.delay_min, opts.delay_max);
        }

        if !page.has_more || page.next_cursor.is_empty() {
            return Ok(links);
        }
        cursor = page.next_cursor;
    }
}

/// Cache writes are best effort here; a persistence hiccup must not abort
/// the extraction pass.
fn save_details(store: &storage::Store, details: &PostDetails) {
    let links_json = serde_json::to_string(&details.youtube_links).unwrap_or_else(|_| "[]".into());
    if let Err(err) = store.save_detail(&details.id, &details.description, &links_json) {
        eprintln!("Post {}: cache write failed: {err:#}", details.id);
    }
}

fn record_page(store: &storage::Store, campaign_id: &str, cursor: &str, page: &PostsPage) {
    for post in &page.posts {
        let row = storage::CachedPost {
            id: post.id.clone(),
            campaign_id: campaign_id.to_string(),
            kind: post.kind.clone(),
            post_type: post.post_type.clone(),
            title: post.title.clone(),
            patreon_url: post.patreon_url.clone(),
            current_user_can_view: post.current_user_can_view,
            published_at: post.published_at,
            description: None,
            youtube_links: None,
            cached_at: Utc::now(),
            details_cached: false,
        };
        if let Err(err) = store.upsert_post_summary(&row) {
            eprintln!("Post {}: cache write failed: {err:#}", post.id);
        }
    }

    let posts_json = serde_json::to_string(&page.posts).unwrap_or_else(|_| "[]".into());
    let record = storage::CachedPage {
        campaign_id: campaign_id.to_string(),
        cursor: cursor.to_string(),
        posts_json,
        next_cursor: if page.next_cursor.is_empty() {
            None
        } else {
            Some(page.next_cursor.clone())
        },
        has_more: page.has_more,
        cached_at: Utc::now(),
    };
    if let Err(err) = store.save_page(&record) {
        eprintln!(
            "Campaign {campaign_id}: page cache write failed: {err:#}"
        );
    }
}

/// Malformed cached JSON contributes zero links rather than failing the run.
fn decode_links(raw: Option<&str>) -> Vec<String> {
    raw.and_then(|json| serde_json::from_str(json).ok())
        .unwrap_or_default()
}

fn random_delay(min: Duration, max: Duration) {
    if min.is_zero() && max.is_zero() {
        return;
    }
    if max <= min {
        thread::sleep(min);
        return;
    }
    let delay = rand::thread_rng().gen_range(min..max);
    thread::sleep(delay);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use tempfile::tempdir;

    struct StubSource {
        pages: RefCell<HashMap<String, Vec<PostsPage>>>,
        page_calls: RefCell<Vec<(String, String)>>,
        details: HashMap<String, PostDetails>,
        detail_calls: RefCell<Vec<String>>,
    }

    impl StubSource {
        fn new() -> Self {
            Self {
                pages: RefCell::new(HashMap::new()),
                page_calls: RefCell::new(Vec::new()),
                details: HashMap::new(),
                detail_calls: RefCell::new(Vec::new()),
            }
        }

        fn push_page(&mut self, campaign_id: &str, page: PostsPage) {
            self.pages
                .borrow_mut()
                .entry(campaign_id.to_string())
                .or_default()
                .push(page);
        }

        fn add_detail(&mut self, post_id: &str, links: &[&str]) {
            self.details.insert(
                post_id.to_string(),
                PostDetails {
                    id: post_id.to_string(),
                    title: format!("Post {post_id}"),
                    content: String::new(),
                    description: format!("description {post_id}"),
                    post_type: "video_embed".to_string(),
                    published_at: Utc::now(),
                    youtube_links: links.iter().map(|s| s.to_string()).collect(),
                },
            );
        }
    }

    impl PostSource for StubSource {
        fn posts_page(
            &self,
            campaign_id: &str,
            _count: usize,
            cursor: &str,
        ) -> patreon::Result<PostsPage> {
            self.page_calls
                .borrow_mut()
                .push((campaign_id.to_string(), cursor.to_string()));
            let mut pages = self.pages.borrow_mut();
            let queue = pages.get_mut(campaign_id);
            match queue.and_then(|q| if q.is_empty() { None } else { Some(q.remove(0)) }) {
                Some(page) => Ok(page),
                None => Err(patreon::Error::Remote {
                    status: 404,
                    body: "no page queued".to_string(),
                }),
            }
        }

        fn post_detail(&self, post_id: &str) -> patreon::Result<PostDetails> {
            self.detail_calls.borrow_mut().push(post_id.to_string());
            self.details
                .get(post_id)
                .cloned()
                .ok_or(patreon::Error::Remote {
                    status: 404,
                    body: "unknown post".to_string(),
                })
        }
    }

    fn post(id: &str, year: i32, month: u32, day: u32) -> patreon::Post {
        patreon::Post {
            id: id.to_string(),
            kind: "post".to_string(),
            post_type: "video_embed".to_string(),
            title: format!("Post {id}"),
            patreon_url: format!("/posts/{id}"),
            current_user_can_view: true,
            published_at: Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap(),
            details_cached: false,
        }
    }

    fn page(posts: Vec<patreon::Post>, next_cursor: &str) -> PostsPage {
        PostsPage {
            posts,
            next_cursor: next_cursor.to_string(),
            has_more: !next_cursor.is_empty(),
        }
    }

    fn seeds(ids: &[&str]) -> Vec<CampaignSeed> {
        ids.iter()
            .map(|id| CampaignSeed {
                id: id.to_string(),
                name: String::new(),
            })
            .collect()
    }

    fn options<'a>(campaigns: &'a [CampaignSeed], after: &'a str) -> Options<'a> {
        Options {
            campaigns,
            published_after: after,
            delay_min: Duration::ZERO,
            delay_max: Duration::ZERO,
        }
    }

    fn open_store(dir: &tempfile::TempDir) -> storage::Store {
        storage::Store::open(storage::Options {
            path: Some(dir.path().join("cache.db")),
        })
        .unwrap()
    }

    #[test]
    fn rejects_empty_campaign_list() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let source = StubSource::new();
        let campaigns = seeds(&[]);
        assert!(run(&source, &store, &options(&campaigns, "")).is_err());
    }

    #[test]
    fn rejects_bad_cutoff_before_any_fetch() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        let source = StubSource::new();
        let campaigns = seeds(&["1"]);
        assert!(run(&source, &store, &options(&campaigns, "01-2024")).is_err());
        assert!(source.page_calls.borrow().is_empty());
    }

    #[test]
    fn cutoff_stops_campaign_after_first_older_post() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let mut source = StubSource::new();
        // First page advertises more, but its second post predates the
        // cutoff; page two must never be requested.
        source.push_page(
            "1",
            page(vec![post("p1", 2024, 6, 1), post("p2", 2023, 12, 1)], "c2"),
        );
        source.add_detail("p1", &["https://www.youtube.com/watch?v=aaaaaaaaaaa"]);

        let campaigns = seeds(&["1"]);
        let links = run(&source, &store, &options(&campaigns, "2024-01-01")).unwrap();

        assert_eq!(links, vec!["https://www.youtube.com/watch?v=aaaaaaaaaaa"]);
        assert_eq!(source.page_calls.borrow().len(), 1);
        assert_eq!(source.detail_calls.borrow().as_slice(), ["p1"]);
    }

    #[test]
    fn follows_cursor_across_pages() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let mut source = StubSource::new();
        source.push_page("1", page(vec![post("p1", 2024, 6, 1)], "c2"));
        source.push_page("1", page(vec![post("p2", 2024, 5, 1)], ""));
        source.add_detail("p1", &["https://www.youtube.com/watch?v=aaaaaaaaaaa"]);
        source.add_detail("p2", &["https://www.youtube.com/watch?v=bbbbbbbbbbb"]);

        let campaigns = seeds(&["1"]);
        let links = run(&source, &store, &options(&campaigns, "")).unwrap();

        assert_eq!(links.len(), 2);
        let calls = source.page_calls.borrow();
        assert_eq!(
            calls.as_slice(),
            [
                ("1".to_string(), String::new()),
                ("1".to_string(), "c2".to_string())
            ]
        );
    }

    #[test]
    fn reuses_cached_details_without_refetching() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.upsert_campaign("1", "").unwrap();

        let mut source = StubSource::new();
        source.push_page("1", page(vec![post("p1", 2024, 6, 1)], ""));

        // Prime the cache the way a previous run would have.
        let summary = post("p1", 2024, 6, 1);
        store
            .upsert_post_summary(&storage::CachedPost {
                id: summary.id.clone(),
                campaign_id: "1".to_string(),
                kind: summary.kind.clone(),
                post_type: summary.post_type.clone(),
                title: summary.title.clone(),
                patreon_url: summary.patreon_url.clone(),
                current_user_can_view: true,
                published_at: summary.published_at,
                description: None,
                youtube_links: None,
                cached_at: Utc::now(),
                details_cached: false,
            })
            .unwrap();
        store
            .save_detail(
                "p1",
                "cached",
                r#"["https://www.youtube.com/watch?v=ccccccccccc"]"#,
            )
            .unwrap();

        let campaigns = seeds(&["1"]);
        let links = run(&source, &store, &options(&campaigns, "")).unwrap();

        assert_eq!(links, vec!["https://www.youtube.com/watch?v=ccccccccccc"]);
        assert!(source.detail_calls.borrow().is_empty());
    }

    #[test]
    fn malformed_cached_links_degrade_to_empty() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.upsert_campaign("1", "").unwrap();

        let mut source = StubSource::new();
        source.push_page("1", page(vec![post("p1", 2024, 6, 1)], ""));

        let summary = post("p1", 2024, 6, 1);
        store
            .upsert_post_summary(&storage::CachedPost {
                id: summary.id.clone(),
                campaign_id: "1".to_string(),
                kind: summary.kind.clone(),
                post_type: summary.post_type.clone(),
                title: summary.title.clone(),
                patreon_url: summary.patreon_url.clone(),
                current_user_can_view: true,
                published_at: summary.published_at,
                description: None,
                youtube_links: None,
                cached_at: Utc::now(),
                details_cached: false,
            })
            .unwrap();
        store.save_detail("p1", "cached", "{corrupted").unwrap();

        let campaigns = seeds(&["1"]);
        let links = run(&source, &store, &options(&campaigns, "")).unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn campaign_failure_does_not_abort_the_run() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let mut source = StubSource::new();
        // Campaign "bad" has nothing queued and fails; "good" still runs.
        source.push_page("good", page(vec![post("p1", 2024, 6, 1)], ""));
        source.add_detail("p1", &["https://www.youtube.com/watch?v=aaaaaaaaaaa"]);

        let campaigns = seeds(&["bad", "good"]);
        let links = run(&source, &store, &options(&campaigns, "")).unwrap();
        assert_eq!(links, vec!["https://www.youtube.com/watch?v=aaaaaaaaaaa"]);
    }

    #[test]
    fn merged_links_are_globally_deduplicated() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let mut source = StubSource::new();
        source.push_page("1", page(vec![post("p1", 2024, 6, 1)], ""));
        source.push_page("2", page(vec![post("p2", 2024, 6, 1)], ""));
        source.add_detail(
            "p1",
            &[
                "https://www.youtube.com/watch?v=aaaaaaaaaaa",
                "https://www.youtube.com/watch?v=bbbbbbbbbbb",
            ],
        );
        source.add_detail(
            "p2",
            &[
                "https://www.youtube.com/watch?v=bbbbbbbbbbb",
                "https://www.youtube.com/watch?v=ddddddddddd",
            ],
        );

        let campaigns = seeds(&["1", "2"]);
        let links = run(&source, &store, &options(&campaigns, "")).unwrap();
        assert_eq!(
            links,
            vec![
                "https://www.youtube.com/watch?v=aaaaaaaaaaa",
                "https://www.youtube.com/watch?v=bbbbbbbbbbb",
                "https://www.youtube.com/watch?v=ddddddddddd",
            ]
        );
    }

    #[test]
    fn fetched_details_land_in_the_cache() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let mut source = StubSource::new();
        source.push_page("1", page(vec![post("p1", 2024, 6, 1)], ""));
        source.add_detail("p1", &["https://www.youtube.com/watch?v=aaaaaaaaaaa"]);

        let campaigns = seeds(&["1"]);
        run(&source, &store, &options(&campaigns, "")).unwrap();

        assert!(store.is_details_cached("p1").unwrap());
        let row = store.get_post("p1").unwrap().unwrap();
        assert_eq!(row.description.as_deref(), Some("description p1"));
        // The fetched page is also logged to the page cache.
        assert!(store.get_page("1", "").unwrap().is_some());
    }
}
