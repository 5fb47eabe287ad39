use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    query, query_as,
    sqlite::{SqlitePool, SqliteRow},
    FromRow, Row,
};

/// Domains the user exempted from blocking. Entries are only ever added.
#[derive(Clone)]
pub struct WhitelistRepository {
    pool: SqlitePool,
}

impl WhitelistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Returns `true` when the domain was not yet whitelisted.
    pub async fn add(&self, domain: &str) -> Result<bool> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            bail!("cannot whitelist an empty domain");
        }
        let affected = query(r#"INSERT OR IGNORE INTO whitelist (domain) VALUES (?1)"#)
            .bind(&domain)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if affected > 0 {
            tracing::info!(target: "db", domain = %domain, "domain whitelisted");
        }
        Ok(affected > 0)
    }

    pub async fn contains(&self, domain: &str) -> Result<bool> {
        let domain = normalize_domain(domain);
        if domain.is_empty() {
            return Ok(false);
        }
        let result: Option<(String,)> =
            query_as(r#"SELECT domain FROM whitelist WHERE domain = ?1"#)
                .bind(domain)
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    pub async fn list(&self) -> Result<Vec<WhitelistRow>> {
        let rows = query_as::<_, WhitelistRow>(
            r#"SELECT domain, added_at FROM whitelist ORDER BY added_at DESC, domain ASC"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

pub fn normalize_domain(domain: &str) -> String {
    domain.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[derive(Debug, Clone)]
pub struct WhitelistRow {
    pub domain: String,
    pub added_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for WhitelistRow {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(Self {
            domain: row.try_get("domain")?,
            added_at: row.try_get("added_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_pool;

    async fn repository(dir: &tempfile::TempDir) -> WhitelistRepository {
        let pool = init_pool(&dir.path().join("test.db")).await.unwrap();
        WhitelistRepository::new(pool)
    }

    #[tokio::test]
    async fn add_is_idempotent_and_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let whitelist = repository(&dir).await;

        assert!(whitelist.add("Example.com").await.unwrap());
        assert!(!whitelist.add("example.com").await.unwrap());
        assert!(whitelist.contains("EXAMPLE.COM").await.unwrap());
        assert!(!whitelist.contains("other.org").await.unwrap());

        let rows = whitelist.list().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].domain, "example.com");
    }

    #[tokio::test]
    async fn empty_domain_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let whitelist = repository(&dir).await;

        assert!(whitelist.add("   ").await.is_err());
        assert!(!whitelist.contains("").await.unwrap());
    }

    #[tokio::test]
    async fn entries_survive_reopening_the_database() {
        let dir = tempfile::tempdir().unwrap();
        {
            let whitelist = repository(&dir).await;
            whitelist.add("docs.rs").await.unwrap();
            whitelist.close().await;
        }
        let whitelist = repository(&dir).await;
        assert!(whitelist.contains("docs.rs").await.unwrap());
    }
}
