//! PostgreSQL-backed `LinkStore`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::model::{Link, LinkId, SourceRef, Url, UrlId};

use super::LinkStore;

pub struct PostgresLinkStore {
    pool: PgPool,
}

impl PostgresLinkStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self::new(pool))
    }

    /// Apply the crate's schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

const URL_COLUMNS: &str = "id, url, last_checked, status, status_code, redirect_status_code, \
     anchor_status, ssl_status, message, error_message, redirect_to";

fn url_from_row(row: &PgRow) -> Url {
    Url {
        id: UrlId(row.get("id")),
        url: row.get("url"),
        last_checked: row.get("last_checked"),
        status: row.get("status"),
        status_code: row.get("status_code"),
        redirect_status_code: row.get("redirect_status_code"),
        anchor_status: row.get("anchor_status"),
        ssl_status: row.get("ssl_status"),
        message: row.get("message"),
        error_message: row.get("error_message"),
        redirect_to: row.get("redirect_to"),
    }
}

fn link_from_row(row: &PgRow) -> Link {
    Link {
        id: LinkId(row.get("id")),
        source: SourceRef {
            type_tag: row.get("content_type"),
            object_id: row.get("object_id"),
        },
        field: row.get("field"),
        url_id: UrlId(row.get("url_id")),
        text: row.get("text"),
        ignore: row.get("ignore"),
    }
}

#[async_trait]
impl LinkStore for PostgresLinkStore {
    async fn get_or_create_url(&self, url: &str) -> Result<(Url, bool)> {
        let id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO linkpatrol_urls (id, url)
            VALUES ($1, $2)
            ON CONFLICT (url) DO NOTHING
            RETURNING id, url, last_checked, status, status_code, redirect_status_code,
                      anchor_status, ssl_status, message, error_message, redirect_to
            "#,
        )
        .bind(id)
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = inserted {
            return Ok((url_from_row(&row), true));
        }

        let row = sqlx::query(&format!(
            "SELECT {URL_COLUMNS} FROM linkpatrol_urls WHERE url = $1"
        ))
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok((url_from_row(&row), false))
    }

    async fn save_url(&self, url: &Url) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE linkpatrol_urls
            SET last_checked = $1,
                status = $2,
                status_code = $3,
                redirect_status_code = $4,
                anchor_status = $5,
                ssl_status = $6,
                message = $7,
                error_message = $8,
                redirect_to = $9
            WHERE id = $10
            "#,
        )
        .bind(url.last_checked)
        .bind(url.status)
        .bind(url.status_code)
        .bind(url.redirect_status_code)
        .bind(url.anchor_status)
        .bind(url.ssl_status)
        .bind(&url.message)
        .bind(&url.error_message)
        .bind(&url.redirect_to)
        .bind(url.id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn url_by_id(&self, id: UrlId) -> Result<Option<Url>> {
        let row = sqlx::query(&format!(
            "SELECT {URL_COLUMNS} FROM linkpatrol_urls WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|row| url_from_row(&row)))
    }

    async fn list_urls(&self, limit: Option<i64>) -> Result<Vec<Url>> {
        // Never-checked first, then stalest first.
        let base = format!(
            "SELECT {URL_COLUMNS} FROM linkpatrol_urls ORDER BY last_checked ASC NULLS FIRST"
        );
        let rows = match limit {
            Some(limit) => {
                sqlx::query(&format!("{base} LIMIT $1"))
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query(&base).fetch_all(&self.pool).await?,
        };
        Ok(rows.iter().map(url_from_row).collect())
    }

    async fn urls_with_prefix(&self, prefix: &str) -> Result<Vec<Url>> {
        let rows = sqlx::query(&format!(
            "SELECT {URL_COLUMNS} FROM linkpatrol_urls WHERE url LIKE $1 || '%'"
        ))
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(url_from_row).collect())
    }

    async fn get_or_create_link(
        &self,
        source: &SourceRef,
        field: &str,
        text: &str,
        url_id: UrlId,
    ) -> Result<(Link, bool)> {
        let text = crate::model::truncate_text(text);
        let existing = sqlx::query(
            r#"
            SELECT id, content_type, object_id, field, url_id, text, ignore
            FROM linkpatrol_links
            WHERE content_type = $1 AND object_id = $2 AND field = $3
              AND text = $4 AND url_id = $5
            LIMIT 1
            "#,
        )
        .bind(&source.type_tag)
        .bind(&source.object_id)
        .bind(field)
        .bind(&text)
        .bind(url_id.0)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            return Ok((link_from_row(&row), false));
        }

        let row = sqlx::query(
            r#"
            INSERT INTO linkpatrol_links (id, content_type, object_id, field, url_id, text)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, content_type, object_id, field, url_id, text, ignore
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&source.type_tag)
        .bind(&source.object_id)
        .bind(field)
        .bind(url_id.0)
        .bind(&text)
        .fetch_one(&self.pool)
        .await?;
        Ok((link_from_row(&row), true))
    }

    async fn links_for_object(&self, source: &SourceRef) -> Result<Vec<Link>> {
        let rows = sqlx::query(
            r#"
            SELECT id, content_type, object_id, field, url_id, text, ignore
            FROM linkpatrol_links
            WHERE content_type = $1 AND object_id = $2
            "#,
        )
        .bind(&source.type_tag)
        .bind(&source.object_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(link_from_row).collect())
    }

    async fn delete_links(&self, ids: &[LinkId]) -> Result<u64> {
        let raw: Vec<Uuid> = ids.iter().map(|id| id.0).collect();
        let result = sqlx::query("DELETE FROM linkpatrol_links WHERE id = ANY($1)")
            .bind(&raw)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_links_for_object(&self, source: &SourceRef) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM linkpatrol_links WHERE content_type = $1 AND object_id = $2",
        )
        .bind(&source.type_tag)
        .bind(&source.object_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_links_except(&self, type_tag: &str, keep: &[LinkId]) -> Result<u64> {
        let raw: Vec<Uuid> = keep.iter().map(|id| id.0).collect();
        let result = sqlx::query(
            "DELETE FROM linkpatrol_links WHERE content_type = $1 AND NOT (id = ANY($2))",
        )
        .bind(type_tag)
        .bind(&raw)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_links_not_of_types(&self, type_tags: &[String]) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM linkpatrol_links WHERE content_type <> ALL($1)")
                .bind(type_tags)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn delete_orphaned_urls(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM linkpatrol_urls u
            WHERE NOT EXISTS (
                SELECT 1 FROM linkpatrol_links l WHERE l.url_id = u.id
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_ignore(&self, id: LinkId, ignore: bool) -> Result<bool> {
        let result = sqlx::query("UPDATE linkpatrol_links SET ignore = $1 WHERE id = $2")
            .bind(ignore)
            .bind(id.0)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn unignore_all(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE linkpatrol_links SET ignore = FALSE WHERE ignore")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_urls(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM linkpatrol_urls")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn count_links(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM linkpatrol_links")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn count_broken_links(&self) -> Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n
            FROM linkpatrol_links l
            JOIN linkpatrol_urls u ON u.id = l.url_id
            WHERE NOT l.ignore AND u.status = FALSE
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }
}
