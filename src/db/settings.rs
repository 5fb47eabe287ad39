use anyhow::{bail, Context, Result};
use sqlx::{query, query_as, sqlite::SqlitePool};

use crate::{config::SettingsOverrides, domain::Settings};

const SETTINGS_KEY: &str = "settings";

/// Whole-value access to the persisted [`Settings`] singleton.
#[derive(Clone)]
pub struct SettingsRepository {
    pool: SqlitePool,
}

impl SettingsRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Writes the defaults unless settings were already stored.
    pub async fn seed_defaults(&self) -> Result<bool> {
        let value = serde_json::to_string(&Settings::default())?;
        let affected = query(r#"INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)"#)
            .bind(SETTINGS_KEY)
            .bind(value)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(affected > 0)
    }

    pub async fn get(&self) -> Result<Settings> {
        let row: Option<(String,)> = query_as(r#"SELECT value FROM settings WHERE key = ?1"#)
            .bind(SETTINGS_KEY)
            .fetch_optional(&self.pool)
            .await?;

        let Some((value,)) = row else {
            return Ok(Settings::default());
        };

        match serde_json::from_str::<Settings>(&value) {
            Ok(settings) if settings.snippet_max_chars > 0 => Ok(settings),
            Ok(_) => {
                tracing::warn!(target: "db", "stored snippetMaxChars is zero; using defaults");
                Ok(Settings::default())
            }
            Err(err) => {
                tracing::warn!(target: "db", error = %err, "stored settings unreadable; using defaults");
                Ok(Settings::default())
            }
        }
    }

    pub async fn set(&self, settings: &Settings) -> Result<()> {
        if settings.snippet_max_chars == 0 {
            bail!("snippetMaxChars must be a positive integer");
        }
        let value = serde_json::to_string(settings)?;
        query(r#"INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)"#)
            .bind(SETTINGS_KEY)
            .bind(value)
            .execute(&self.pool)
            .await
            .context("failed to persist settings")?;
        Ok(())
    }

    /// The consent toggle: include page text in classification requests or not.
    pub async fn set_send_snippet(&self, enabled: bool) -> Result<Settings> {
        let mut settings = self.get().await?;
        settings.send_snippet = enabled;
        self.set(&settings).await?;
        Ok(settings)
    }

    pub async fn apply_overrides(&self, overrides: &SettingsOverrides) -> Result<Settings> {
        let mut settings = self.get().await?;
        if let Some(send_snippet) = overrides.send_snippet {
            settings.send_snippet = send_snippet;
        }
        if let Some(max_chars) = overrides.snippet_max_chars {
            settings.snippet_max_chars = max_chars;
        }
        self.set(&settings).await?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_pool;

    async fn repository(dir: &tempfile::TempDir) -> SettingsRepository {
        let pool = init_pool(&dir.path().join("test.db")).await.unwrap();
        SettingsRepository::new(pool)
    }

    #[tokio::test]
    async fn defaults_withhold_snippet() {
        let dir = tempfile::tempdir().unwrap();
        let settings = repository(&dir).await;

        let current = settings.get().await.unwrap();
        assert!(!current.send_snippet);
        assert_eq!(current.snippet_max_chars, 300);
    }

    #[tokio::test]
    async fn seeding_does_not_overwrite_user_choice() {
        let dir = tempfile::tempdir().unwrap();
        let settings = repository(&dir).await;

        assert!(settings.seed_defaults().await.unwrap());
        settings.set_send_snippet(true).await.unwrap();
        assert!(!settings.seed_defaults().await.unwrap());
        assert!(settings.get().await.unwrap().send_snippet);
    }

    #[tokio::test]
    async fn zero_max_chars_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = repository(&dir).await;

        let invalid = Settings {
            send_snippet: true,
            snippet_max_chars: 0,
        };
        assert!(settings.set(&invalid).await.is_err());
    }

    #[tokio::test]
    async fn overrides_only_touch_given_fields() {
        let dir = tempfile::tempdir().unwrap();
        let settings = repository(&dir).await;
        settings
            .set(&Settings {
                send_snippet: false,
                snippet_max_chars: 120,
            })
            .await
            .unwrap();

        let applied = settings
            .apply_overrides(&SettingsOverrides {
                send_snippet: Some(true),
                snippet_max_chars: None,
            })
            .await
            .unwrap();
        assert_eq!(
            applied,
            Settings {
                send_snippet: true,
                snippet_max_chars: 120
            }
        );
        assert_eq!(settings.get().await.unwrap(), applied);
    }

    #[tokio::test]
    async fn corrupt_document_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = repository(&dir).await;
        query(r#"INSERT INTO settings (key, value) VALUES ('settings', 'not json')"#)
            .execute(&settings.pool)
            .await
            .unwrap();

        assert_eq!(settings.get().await.unwrap(), Settings::default());
    }
}
