use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};

#[derive(Debug, Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

#[derive(Debug, Clone)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CachedPost {
    pub id: String,
    pub campaign_id: String,
    pub kind: String,
    pub post_type: String,
    pub title: String,
    pub patreon_url: String,
    pub current_user_can_view: bool,
    pub published_at: DateTime<Utc>,
    pub description: Option<String>,
    pub youtube_links: Option<String>,
    pub cached_at: DateTime<Utc>,
    pub details_cached: bool,
}

/// One fetched listing page, keyed by (campaign_id, cursor). Written as a
/// fetch log; the interactive browser never reads it back.
#[derive(Debug, Clone)]
pub struct CachedPage {
    pub campaign_id: String,
    pub cursor: String,
    pub posts_json: String,
    pub next_cursor: Option<String>,
    pub has_more: bool,
    pub cached_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone)]
pub struct Options {
    pub path: Option<PathBuf>,
}

impl Store {
    pub fn open(opts: Options) -> Result<Self> {
        let path = if let Some(path) = opts.path {
            path
        } else {
            default_path().context("storage: resolve default path")?
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("storage: create directory {}", parent.display()))?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("storage: open database at {}", path.display()))?;
        conn.pragma_update(None, "journal_mode", &"WAL")
            .context("storage: set WAL")?;
        conn.pragma_update(None, "busy_timeout", &5000)
            .context("storage: set busy timeout")?;
        migrate(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn close(self) -> Result<()> {
        let conn = Arc::try_unwrap(self.conn)
            .map_err(|_| anyhow!("storage: connection still in use"))?
            .into_inner();
        conn.close()
            .map_err(|(_, err)| err)
            .context("storage: close connection")
    }

    pub fn upsert_campaign(&self, id: &str, name: &str) -> Result<()> {
        if id.is_empty() {
            bail!("storage: campaign id required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO campaigns (id, name, cached_at)
VALUES (?1, ?2, ?3)
ON CONFLICT(id) DO UPDATE SET
  name = excluded.name,
  cached_at = excluded.cached_at
"#,
            params![id, name, Utc::now().timestamp()],
        )
        .context("storage: upsert campaign")?;
        Ok(())
    }

    pub fn get_campaign(&self, id: &str) -> Result<Option<Campaign>> {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT id, name, cached_at FROM campaigns WHERE id = ?1",
            params![id],
            |row| {
                let cached: i64 = row.get(2)?;
                Ok(Campaign {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    cached_at: timestamp(cached),
                })
            },
        )
        .optional()
        .context("storage: query campaign")
    }

    /// Inserts or refreshes a post's summary fields. Detail columns
    /// (description, youtube_links, details_cached) are left untouched on
    /// conflict and default to absent/false for new rows.
    pub fn upsert_post_summary(&self, post: &CachedPost) -> Result<()> {
        if post.id.is_empty() {
            bail!("storage: post id required");
        }
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO posts (id, campaign_id, kind, post_type, title, patreon_url,
                   current_user_can_view, published_at, cached_at, details_cached)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 0)
ON CONFLICT(id) DO UPDATE SET
  campaign_id = excluded.campaign_id,
  kind = excluded.kind,
  post_type = excluded.post_type,
  title = excluded.title,
  patreon_url = excluded.patreon_url,
  current_user_can_view = excluded.current_user_can_view,
  published_at = excluded.published_at,
  cached_at = excluded.cached_at
"#,
            params![
                post.id,
                post.campaign_id,
                post.kind,
                post.post_type,
                post.title,
                post.patreon_url,
                post.current_user_can_view,
                post.published_at.timestamp(),
                Utc::now().timestamp(),
            ],
        )
        .context("storage: upsert post summary")?;
        Ok(())
    }

    /// Stores fetched detail content and flips the cached flag. Updating a
    /// post that was never listed affects zero rows; that is not an error.
    pub fn save_detail(&self, post_id: &str, description: &str, links_json: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
UPDATE posts SET
  description = ?1,
  youtube_links = ?2,
  details_cached = 1
WHERE id = ?3
"#,
            params![description, links_json, post_id],
        )
        .context("storage: save post detail")?;
        Ok(())
    }

    pub fn get_post(&self, post_id: &str) -> Result<Option<CachedPost>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT id, campaign_id, kind, post_type, title, patreon_url,
       current_user_can_view, published_at, description, youtube_links,
       cached_at, details_cached
FROM posts
WHERE id = ?1
"#,
            params![post_id],
            post_from_row,
        )
        .optional()
        .context("storage: query post")
    }

    pub fn posts_for_campaign(&self, campaign_id: &str) -> Result<Vec<CachedPost>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
SELECT id, campaign_id, kind, post_type, title, patreon_url,
       current_user_can_view, published_at, description, youtube_links,
       cached_at, details_cached
FROM posts
WHERE campaign_id = ?1
ORDER BY published_at DESC
"#,
        )?;
        let rows = stmt
            .query_map(params![campaign_id], post_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn is_details_cached(&self, post_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let cached: Option<bool> = conn
            .query_row(
                "SELECT details_cached FROM posts WHERE id = ?1",
                params![post_id],
                |row| row.get(0),
            )
            .optional()
            .context("storage: query cached flag")?;
        Ok(cached.unwrap_or(false))
    }

    /// Nulls the detail columns and resets the cached flag; the summary row
    /// itself stays.
    pub fn clear_detail(&self, post_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
UPDATE posts SET
  description = NULL,
  youtube_links = NULL,
  details_cached = 0
WHERE id = ?1
"#,
            params![post_id],
        )
        .context("storage: clear post detail")?;
        Ok(())
    }

    /// Deletes a campaign and everything cached under it, posts first to
    /// respect the soft foreign key.
    pub fn clear_campaign(&self, campaign_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM posts WHERE campaign_id = ?1",
            params![campaign_id],
        )
        .context("storage: delete campaign posts")?;
        conn.execute(
            "DELETE FROM pages WHERE campaign_id = ?1",
            params![campaign_id],
        )
        .context("storage: delete campaign pages")?;
        conn.execute("DELETE FROM campaigns WHERE id = ?1", params![campaign_id])
            .context("storage: delete campaign")?;
        Ok(())
    }

    pub fn save_page(&self, page: &CachedPage) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            r#"
INSERT INTO pages (campaign_id, cursor, posts_json, next_cursor, has_more, cached_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
ON CONFLICT(campaign_id, cursor) DO UPDATE SET
  posts_json = excluded.posts_json,
  next_cursor = excluded.next_cursor,
  has_more = excluded.has_more,
  cached_at = excluded.cached_at
"#,
            params![
                page.campaign_id,
                page.cursor,
                page.posts_json,
                page.next_cursor,
                page.has_more,
                Utc::now().timestamp(),
            ],
        )
        .context("storage: save page")?;
        Ok(())
    }

    pub fn get_page(&self, campaign_id: &str, cursor: &str) -> Result<Option<CachedPage>> {
        let conn = self.conn.lock();
        conn.query_row(
            r#"
SELECT campaign_id, cursor, posts_json, next_cursor, has_more, cached_at
FROM pages
WHERE campaign_id = ?1 AND cursor = ?2
"#,
            params![campaign_id, cursor],
            |row| {
                let cached: i64 = row.get(5)?;
                Ok(CachedPage {
                    campaign_id: row.get(0)?,
                    cursor: row.get(1)?,
                    posts_json: row.get(2)?,
                    next_cursor: row.get(3)?,
                    has_more: row.get(4)?,
                    cached_at: timestamp(cached),
                })
            },
        )
        .optional()
        .context("storage: query page")
    }
}

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<CachedPost> {
    let published: i64 = row.get(7)?;
    let cached: i64 = row.get(10)?;
    Ok(CachedPost {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        kind: row.get(2)?,
        post_type: row.get(3)?,
        title: row.get(4)?,
        patreon_url: row.get(5)?,
        current_user_can_view: row.get(6)?,
        published_at: timestamp(published),
        description: row.get(8)?,
        youtube_links: row.get(9)?,
        cached_at: timestamp(cached),
        details_cached: row.get(11)?,
    })
}

fn timestamp(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(seconds, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at INTEGER NOT NULL
)
"#,
        [],
    )?;

    let current: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let migrations = migrations();
    for (idx, sql) in migrations.iter().enumerate() {
        let version = (idx + 1) as i64;
        if version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
            params![
                version,
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .unwrap_or(Duration::from_secs(0))
                    .as_secs() as i64,
            ],
        )?;
    }
    Ok(())
}

fn migrations() -> Vec<&'static str> {
    vec![
        r#"
CREATE TABLE IF NOT EXISTS campaigns (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL DEFAULT '',
  cached_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS posts (
  id TEXT PRIMARY KEY,
  campaign_id TEXT NOT NULL,
  kind TEXT NOT NULL DEFAULT '',
  post_type TEXT NOT NULL DEFAULT '',
  title TEXT NOT NULL DEFAULT '',
  patreon_url TEXT NOT NULL DEFAULT '',
  current_user_can_view INTEGER NOT NULL DEFAULT 0,
  published_at INTEGER NOT NULL DEFAULT 0,
  description TEXT,
  youtube_links TEXT,
  cached_at INTEGER NOT NULL,
  details_cached INTEGER NOT NULL DEFAULT 0,
  FOREIGN KEY (campaign_id) REFERENCES campaigns(id)
);

CREATE INDEX IF NOT EXISTS idx_posts_campaign ON posts(campaign_id);

CREATE TABLE IF NOT EXISTS pages (
  campaign_id TEXT NOT NULL,
  cursor TEXT NOT NULL,
  posts_json TEXT NOT NULL,
  next_cursor TEXT,
  has_more INTEGER NOT NULL DEFAULT 0,
  cached_at INTEGER NOT NULL,
  PRIMARY KEY (campaign_id, cursor)
);
"#,
    ]
}

pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("patreon-tui").join("cache.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_store(dir: &tempfile::TempDir) -> Store {
        Store::open(Options {
            path: Some(dir.path().join("cache.db")),
        })
        .unwrap()
    }

    fn sample_post(id: &str, campaign_id: &str) -> CachedPost {
        CachedPost {
            id: id.to_string(),
            campaign_id: campaign_id.to_string(),
            kind: "post".to_string(),
            post_type: "video_embed".to_string(),
            title: format!("Post {id}"),
            patreon_url: format!("/posts/{id}"),
            current_user_can_view: true,
            published_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
            description: None,
            youtube_links: None,
            cached_at: Utc::now(),
            details_cached: false,
        }
    }

    #[test]
    fn open_creates_database() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(dir.path().join("cache.db").exists());
        store.close().unwrap();
    }

    #[test]
    fn upsert_campaign_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        store.upsert_campaign("42", "").unwrap();
        store.upsert_campaign("42", "Channel").unwrap();

        let campaign = store.get_campaign("42").unwrap().unwrap();
        assert_eq!(campaign.name, "Channel");
    }

    #[test]
    fn upsert_summary_preserves_detail_columns() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.upsert_campaign("42", "Channel").unwrap();

        let mut post = sample_post("p1", "42");
        store.upsert_post_summary(&post).unwrap();
        store
            .save_detail(
                "p1",
                "hello",
                r#"["https://www.youtube.com/watch?v=dQw4w9WgXcQ"]"#,
            )
            .unwrap();

        post.title = "Updated title".to_string();
        store.upsert_post_summary(&post).unwrap();

        let row = store.get_post("p1").unwrap().unwrap();
        assert_eq!(row.title, "Updated title");
        assert!(row.details_cached);
        assert_eq!(row.description.as_deref(), Some("hello"));
    }

    #[test]
    fn detail_round_trip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.upsert_campaign("42", "").unwrap();
        store.upsert_post_summary(&sample_post("p1", "42")).unwrap();

        let links = vec![
            "https://www.youtube.com/watch?v=aaaaaaaaaaa".to_string(),
            "https://www.youtube.com/watch?v=bbbbbbbbbbb".to_string(),
        ];
        let links_json = serde_json::to_string(&links).unwrap();
        store.save_detail("p1", "a description", &links_json).unwrap();

        let row = store.get_post("p1").unwrap().unwrap();
        assert_eq!(row.description.as_deref(), Some("a description"));
        let decoded: Vec<String> =
            serde_json::from_str(row.youtube_links.as_deref().unwrap()).unwrap();
        assert_eq!(decoded, links);
        assert!(store.is_details_cached("p1").unwrap());
    }

    #[test]
    fn save_detail_for_unknown_post_is_not_fatal() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.save_detail("ghost", "text", "[]").unwrap();
        assert!(store.get_post("ghost").unwrap().is_none());
    }

    #[test]
    fn unknown_post_reads_as_absent_and_uncached() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        assert!(store.get_post("never-seen").unwrap().is_none());
        assert!(!store.is_details_cached("never-seen").unwrap());
    }

    #[test]
    fn clear_detail_resets_flag_and_columns() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.upsert_campaign("42", "").unwrap();
        store.upsert_post_summary(&sample_post("p1", "42")).unwrap();
        store.save_detail("p1", "text", "[]").unwrap();

        store.clear_detail("p1").unwrap();

        assert!(!store.is_details_cached("p1").unwrap());
        let row = store.get_post("p1").unwrap().unwrap();
        assert!(row.description.is_none());
        assert!(row.youtube_links.is_none());
        assert_eq!(row.title, "Post p1");
    }

    #[test]
    fn posts_ordered_by_publish_time_descending() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.upsert_campaign("42", "").unwrap();

        let mut older = sample_post("old", "42");
        older.published_at = Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap();
        let newer = sample_post("new", "42");
        store.upsert_post_summary(&older).unwrap();
        store.upsert_post_summary(&newer).unwrap();

        let posts = store.posts_for_campaign("42").unwrap();
        let ids: Vec<&str> = posts.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[test]
    fn clear_campaign_removes_posts_then_campaign() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);
        store.upsert_campaign("42", "Channel").unwrap();
        store.upsert_post_summary(&sample_post("p1", "42")).unwrap();

        store.clear_campaign("42").unwrap();

        assert!(store.get_post("p1").unwrap().is_none());
        assert!(store.get_campaign("42").unwrap().is_none());
    }

    #[test]
    fn page_cache_round_trip() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir);

        let page = CachedPage {
            campaign_id: "42".to_string(),
            cursor: String::new(),
            posts_json: r#"[{"id":"p1"}]"#.to_string(),
            next_cursor: Some("abc".to_string()),
            has_more: true,
            cached_at: Utc::now(),
        };
        store.save_page(&page).unwrap();
        store.save_page(&page).unwrap();

        let row = store.get_page("42", "").unwrap().unwrap();
        assert_eq!(row.posts_json, page.posts_json);
        assert_eq!(row.next_cursor.as_deref(), Some("abc"));
        assert!(row.has_more);
        assert!(store.get_page("42", "other").unwrap().is_none());
    }
}
