use sqlx::{sqlite::SqliteRow, QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;

use crate::{
    models::{MediaFilters, MediaId, MediaItem, MediaSort, MediaType, NewMediaItem, Page, PageParams,
        SortDir, SortField, VrStereo},
    Result,
};

const COLUMNS: &str = "id, rel_path, filename, title, ext, media_type, size_bytes, modified_ms, \
     duration_ms, width, height, has_funscript, funscript_action_count, funscript_avg_speed, \
     is_vr, vr_fov, vr_stereo, vr_projection";

/// Media catalog repository
///
/// All reads are concurrency-safe; writes only originate from the scanner.
#[derive(Clone)]
pub struct MediaRepository {
    pool: SqlitePool,
}

impl MediaRepository {
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the catalog table and indexes if they do not exist yet
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS media_items (
                 id TEXT PRIMARY KEY,
                 rel_path TEXT NOT NULL UNIQUE,
                 filename TEXT NOT NULL,
                 title TEXT NOT NULL,
                 ext TEXT NOT NULL,
                 media_type TEXT NOT NULL,
                 size_bytes INTEGER NOT NULL,
                 modified_ms INTEGER NOT NULL,
                 duration_ms INTEGER,
                 width INTEGER,
                 height INTEGER,
                 has_funscript INTEGER NOT NULL DEFAULT 0,
                 funscript_action_count INTEGER,
                 funscript_avg_speed REAL,
                 is_vr INTEGER NOT NULL DEFAULT 0,
                 vr_fov INTEGER,
                 vr_stereo TEXT,
                 vr_projection TEXT
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_media_items_modified ON media_items (modified_ms DESC)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_media_items_vr ON media_items (is_vr, media_type)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert or update a scanned file, keyed by `rel_path`.
    ///
    /// The row id is assigned on first insert and survives updates, so media
    /// ids stay stable across rescans.
    pub async fn upsert(&self, item: &NewMediaItem) -> Result<MediaItem> {
        let id = MediaId::new();
        let row = sqlx::query(&format!(
            "INSERT INTO media_items ({COLUMNS})
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(rel_path) DO UPDATE SET
                 filename = excluded.filename,
                 title = excluded.title,
                 ext = excluded.ext,
                 media_type = excluded.media_type,
                 size_bytes = excluded.size_bytes,
                 modified_ms = excluded.modified_ms,
                 duration_ms = excluded.duration_ms,
                 width = excluded.width,
                 height = excluded.height,
                 has_funscript = excluded.has_funscript,
                 funscript_action_count = excluded.funscript_action_count,
                 funscript_avg_speed = excluded.funscript_avg_speed,
                 is_vr = excluded.is_vr,
                 vr_fov = excluded.vr_fov,
                 vr_stereo = excluded.vr_stereo,
                 vr_projection = excluded.vr_projection
             RETURNING {COLUMNS}"
        ))
        .bind(id.as_str())
        .bind(&item.rel_path)
        .bind(&item.filename)
        .bind(&item.title)
        .bind(&item.ext)
        .bind(item.media_type.to_string())
        .bind(item.size_bytes)
        .bind(item.modified_ms)
        .bind(item.duration_ms)
        .bind(item.width)
        .bind(item.height)
        .bind(item.has_funscript)
        .bind(item.funscript_action_count)
        .bind(item.funscript_avg_speed)
        .bind(item.is_vr)
        .bind(item.vr_fov.map(i64::from))
        .bind(item.vr_stereo.map(|s| s.to_string()))
        .bind(&item.vr_projection)
        .fetch_one(&self.pool)
        .await?;

        row_to_item(&row)
    }

    pub async fn get(&self, id: &MediaId) -> Result<Option<MediaItem>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM media_items WHERE id = ?"))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_item).transpose()
    }

    pub async fn get_by_rel_path(&self, rel_path: &str) -> Result<Option<MediaItem>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM media_items WHERE rel_path = ?"))
            .bind(rel_path)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_item).transpose()
    }

    /// Most-recently-modified VR videos, capped at `limit`
    pub async fn list_vr(&self, limit: u32) -> Result<Vec<MediaItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM media_items
             WHERE is_vr = 1 AND media_type = 'video'
             ORDER BY modified_ms DESC
             LIMIT ?"
        ))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_item).collect()
    }

    /// Paginated catalog search
    pub async fn search(
        &self,
        filters: &MediaFilters,
        sort: MediaSort,
        page: PageParams,
    ) -> Result<Page<MediaItem>> {
        let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM media_items");
        push_filters(&mut count_qb, filters);
        let total: i64 = count_qb.build_query_scalar().fetch_one(&self.pool).await?;

        let mut qb = QueryBuilder::new(format!("SELECT {COLUMNS} FROM media_items"));
        push_filters(&mut qb, filters);
        qb.push(format!(" ORDER BY {}", order_clause(sort)));
        qb.push(" LIMIT ");
        qb.push_bind(page.limit() as i64);
        qb.push(" OFFSET ");
        qb.push_bind(page.offset() as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        let items = rows.iter().map(row_to_item).collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total as u64, page))
    }

    /// All `rel_path`s of catalog rows for video and image media.
    ///
    /// Used by scan cleanup to find rows whose files vanished.
    pub async fn list_rel_paths(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT rel_path FROM media_items WHERE media_type IN ('video', 'image')",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("rel_path").map_err(Into::into))
            .collect()
    }

    /// Delete rows by `rel_path`. The caller chunks the input.
    pub async fn delete_by_rel_paths(&self, rel_paths: &[String]) -> Result<u64> {
        if rel_paths.is_empty() {
            return Ok(0);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM media_items WHERE rel_path IN (");
        let mut sep = qb.separated(", ");
        for path in rel_paths {
            sep.push_bind(path);
        }
        qb.push(")");

        let result = qb.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM media_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(total as u64)
    }
}

fn push_filters(qb: &mut QueryBuilder<'_, Sqlite>, filters: &MediaFilters) {
    qb.push(" WHERE 1=1");

    if let Some(query) = &filters.query {
        let pattern = format!("%{}%", query.to_lowercase());
        qb.push(" AND (LOWER(filename) LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" OR LOWER(title) LIKE ");
        qb.push_bind(pattern);
        qb.push(")");
    }
    if let Some(media_type) = filters.media_type {
        qb.push(" AND media_type = ");
        qb.push_bind(media_type.to_string());
    }
    if let Some(has_funscript) = filters.has_funscript {
        qb.push(" AND has_funscript = ");
        qb.push_bind(has_funscript);
    }
    if let Some(is_vr) = filters.is_vr {
        qb.push(" AND is_vr = ");
        qb.push_bind(is_vr);
    }
    if let Some((lo, hi)) = filters.duration_ms {
        qb.push(" AND duration_ms BETWEEN ");
        qb.push_bind(lo);
        qb.push(" AND ");
        qb.push_bind(hi);
    }
    if let Some((lo, hi)) = filters.funscript_avg_speed {
        qb.push(" AND funscript_avg_speed BETWEEN ");
        qb.push_bind(lo);
        qb.push(" AND ");
        qb.push_bind(hi);
    }
    if let Some((lo, hi)) = filters.width {
        qb.push(" AND width BETWEEN ");
        qb.push_bind(lo);
        qb.push(" AND ");
        qb.push_bind(hi);
    }
    if let Some((lo, hi)) = filters.height {
        qb.push(" AND height BETWEEN ");
        qb.push_bind(lo);
        qb.push(" AND ");
        qb.push_bind(hi);
    }
}

/// ORDER BY clause for a sort: NULL-last, requested direction, then
/// `modified_ms DESC` as the tiebreaker.
fn order_clause(sort: MediaSort) -> String {
    let (expr, nullable) = match sort.field {
        SortField::Modified => ("modified_ms", false),
        SortField::Title => ("title COLLATE NOCASE", false),
        SortField::Filename => ("filename COLLATE NOCASE", false),
        SortField::Duration => ("duration_ms", true),
        SortField::Speed => ("funscript_avg_speed", true),
        SortField::Resolution => ("(width * height)", true),
    };
    let dir = match sort.dir {
        SortDir::Asc => "ASC",
        SortDir::Desc => "DESC",
    };

    if nullable {
        format!("({expr} IS NULL) ASC, {expr} {dir}, modified_ms DESC")
    } else {
        format!("{expr} {dir}, modified_ms DESC")
    }
}

fn row_to_item(row: &SqliteRow) -> Result<MediaItem> {
    let media_type: String = row.try_get("media_type")?;
    let vr_stereo: Option<String> = row.try_get("vr_stereo")?;

    Ok(MediaItem {
        id: row.try_get("id")?,
        rel_path: row.try_get("rel_path")?,
        filename: row.try_get("filename")?,
        title: row.try_get("title")?,
        ext: row.try_get("ext")?,
        media_type: MediaType::from_str(&media_type)
            .map_err(crate::Error::InvalidInput)?,
        size_bytes: row.try_get("size_bytes")?,
        modified_ms: row.try_get("modified_ms")?,
        duration_ms: row.try_get("duration_ms")?,
        width: row.try_get("width")?,
        height: row.try_get("height")?,
        has_funscript: row.try_get("has_funscript")?,
        funscript_action_count: row.try_get("funscript_action_count")?,
        funscript_avg_speed: row.try_get("funscript_avg_speed")?,
        is_vr: row.try_get("is_vr")?,
        vr_fov: row.try_get::<Option<i64>, _>("vr_fov")?.map(|v| v as u32),
        vr_stereo: vr_stereo
            .as_deref()
            .map(VrStereo::from_str)
            .transpose()
            .map_err(crate::Error::InvalidInput)?,
        vr_projection: row.try_get("vr_projection")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_repo() -> MediaRepository {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let repo = MediaRepository::new(pool);
        repo.init_schema().await.unwrap();
        repo
    }

    fn new_item(rel_path: &str) -> NewMediaItem {
        let filename = rel_path.rsplit('/').next().unwrap().to_string();
        let (stem, ext) = filename.rsplit_once('.').unwrap();
        NewMediaItem {
            rel_path: rel_path.to_string(),
            filename: filename.clone(),
            title: stem.to_string(),
            ext: ext.to_string(),
            media_type: MediaType::Video,
            size_bytes: 1024,
            modified_ms: 1_700_000_000_000,
            duration_ms: None,
            width: None,
            height: None,
            has_funscript: false,
            funscript_action_count: None,
            funscript_avg_speed: None,
            is_vr: false,
            vr_fov: None,
            vr_stereo: None,
            vr_projection: None,
        }
    }

    #[tokio::test]
    async fn test_upsert_preserves_id() {
        let repo = test_repo().await;

        let first = repo.upsert(&new_item("a/b.mp4")).await.unwrap();

        let mut updated = new_item("a/b.mp4");
        updated.size_bytes = 2048;
        let second = repo.upsert(&updated).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.size_bytes, 2048);
        assert_eq!(repo.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_get_by_id_and_rel_path() {
        let repo = test_repo().await;
        let stored = repo.upsert(&new_item("clips/one.mp4")).await.unwrap();

        let by_id = repo.get(&stored.id).await.unwrap().unwrap();
        assert_eq!(by_id.rel_path, "clips/one.mp4");

        let by_path = repo.get_by_rel_path("clips/one.mp4").await.unwrap().unwrap();
        assert_eq!(by_path.id, stored.id);

        assert!(repo.get(&MediaId::from("missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_substring_and_type() {
        let repo = test_repo().await;
        repo.upsert(&new_item("a/Beach_Day.mp4")).await.unwrap();
        repo.upsert(&new_item("a/mountain.mp4")).await.unwrap();
        let mut img = new_item("a/photo.png");
        img.media_type = MediaType::Image;
        repo.upsert(&img).await.unwrap();

        let filters = MediaFilters {
            query: Some("beach".to_string()),
            ..Default::default()
        };
        let page = repo
            .search(&filters, MediaSort::default(), PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].filename, "Beach_Day.mp4");

        let filters = MediaFilters {
            media_type: Some(MediaType::Image),
            ..Default::default()
        };
        let page = repo
            .search(&filters, MediaSort::default(), PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].filename, "photo.png");
    }

    #[tokio::test]
    async fn test_search_duration_range_and_null_last_sort() {
        let repo = test_repo().await;

        let mut short = new_item("a/short.mp4");
        short.duration_ms = Some(60_000);
        repo.upsert(&short).await.unwrap();

        let mut long = new_item("a/long.mp4");
        long.duration_ms = Some(600_000);
        repo.upsert(&long).await.unwrap();

        // No probed duration at all
        repo.upsert(&new_item("a/unknown.mp4")).await.unwrap();

        let filters = MediaFilters {
            duration_ms: Some((0, 120_000)),
            ..Default::default()
        };
        let page = repo
            .search(&filters, MediaSort::default(), PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].filename, "short.mp4");

        // Ascending duration sort puts the NULL row last
        let sort = MediaSort {
            field: SortField::Duration,
            dir: SortDir::Asc,
        };
        let page = repo
            .search(&MediaFilters::default(), sort, PageParams::default())
            .await
            .unwrap();
        let names: Vec<_> = page.items.iter().map(|m| m.filename.as_str()).collect();
        assert_eq!(names, vec!["short.mp4", "long.mp4", "unknown.mp4"]);
    }

    #[tokio::test]
    async fn test_list_vr_ordering_and_limit() {
        let repo = test_repo().await;

        for (i, name) in ["a/v1.mp4", "a/v2.mp4", "a/v3.mp4"].iter().enumerate() {
            let mut item = new_item(name);
            item.is_vr = true;
            item.vr_fov = Some(180);
            item.modified_ms = 1_000 + i as i64;
            repo.upsert(&item).await.unwrap();
        }
        repo.upsert(&new_item("a/flat.mp4")).await.unwrap();

        let vr = repo.list_vr(2).await.unwrap();
        assert_eq!(vr.len(), 2);
        assert_eq!(vr[0].filename, "v3.mp4");
        assert_eq!(vr[1].filename, "v2.mp4");
    }

    #[tokio::test]
    async fn test_cleanup_deletes_by_rel_path() {
        let repo = test_repo().await;
        repo.upsert(&new_item("a/keep.mp4")).await.unwrap();
        repo.upsert(&new_item("a/gone.mp4")).await.unwrap();

        let paths = repo.list_rel_paths().await.unwrap();
        assert_eq!(paths.len(), 2);

        let deleted = repo
            .delete_by_rel_paths(&["a/gone.mp4".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(repo.get_by_rel_path("a/gone.mp4").await.unwrap().is_none());
        assert!(repo.get_by_rel_path("a/keep.mp4").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_vr_fields_round_trip() {
        let repo = test_repo().await;
        let mut item = new_item("vr/clip_180_LR.mp4");
        item.is_vr = true;
        item.vr_fov = Some(180);
        item.vr_stereo = Some(VrStereo::Sbs);
        item.vr_projection = Some("equirectangular".to_string());

        let stored = repo.upsert(&item).await.unwrap();
        assert!(stored.is_vr);
        assert_eq!(stored.vr_fov, Some(180));
        assert_eq!(stored.vr_stereo, Some(VrStereo::Sbs));
        assert_eq!(stored.vr_projection.as_deref(), Some("equirectangular"));
    }
}
