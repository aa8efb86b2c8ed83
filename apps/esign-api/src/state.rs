//! Application state: database pool, migrations and runtime config.

use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;

pub struct AppState {
    pub db: SqlitePool,
    pub jwt_secret: String,
    /// Base URL prefixed to publish links in responses.
    pub public_url: String,
}

impl AppState {
    pub async fn new() -> Result<Self> {
        // Get database path from env or use default
        let db_path = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            let data_dir = dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("esign-api");
            std::fs::create_dir_all(&data_dir).ok();
            format!("sqlite:{}/esign.db?mode=rwc", data_dir.display())
        });

        tracing::info!("Connecting to database: {}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_path)
            .await?;

        Self::run_migrations(&pool).await?;

        let jwt_secret = std::env::var("ESIGN_JWT_SECRET")
            .unwrap_or_else(|_| "dev-secret-change-me".to_string());
        let public_url = std::env::var("ESIGN_PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3001".to_string());

        Ok(Self {
            db: pool,
            jwt_secret,
            public_url,
        })
    }

    pub(crate) async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        tracing::info!("Running database migrations...");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                address TEXT NOT NULL DEFAULT '',
                email TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signatures (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL UNIQUE REFERENCES users(id),
                signature_type TEXT NOT NULL,
                signature_data TEXT NOT NULL,
                initials_data TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL REFERENCES users(id),
                name TEXT NOT NULL,
                original_filename TEXT NOT NULL,
                file_type TEXT NOT NULL,
                file_data BLOB NOT NULL,
                status TEXT NOT NULL DEFAULT 'draft',
                published_status TEXT NOT NULL DEFAULT 'draft',
                publish_link TEXT UNIQUE,
                publish_link_expires_at TEXT,
                published_at TEXT,
                completed_at TEXT,
                cancelled_by TEXT,
                cancelled_at TEXT,
                cancellation_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_recipients (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                email TEXT NOT NULL,
                name TEXT NOT NULL,
                token TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL DEFAULT 'pending',
                signing_order INTEGER NOT NULL DEFAULT 0,
                viewed_at TEXT,
                signed_at TEXT,
                last_accessed_at TEXT,
                access_count INTEGER NOT NULL DEFAULT 0,
                reminders_sent INTEGER NOT NULL DEFAULT 0,
                decline_reason TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (document_id, email)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_tools (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
                tool_id TEXT NOT NULL,
                tool_type TEXT NOT NULL,
                label TEXT NOT NULL DEFAULT '',
                page INTEGER NOT NULL,
                x REAL NOT NULL,
                y REAL NOT NULL,
                width REAL NOT NULL,
                height REAL NOT NULL,
                style_json TEXT NOT NULL DEFAULT '{}',
                value_json TEXT,
                assigned_recipients_json TEXT NOT NULL DEFAULT '[]',
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE (document_id, tool_id)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS activity (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                document_id TEXT,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        // Indexes for the hot lookups
        for stmt in [
            "CREATE INDEX IF NOT EXISTS idx_documents_user ON documents(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)",
            "CREATE INDEX IF NOT EXISTS idx_documents_user_expiry ON documents(user_id, publish_link_expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_recipients_document ON document_recipients(document_id)",
            "CREATE INDEX IF NOT EXISTS idx_recipients_email ON document_recipients(email)",
            "CREATE INDEX IF NOT EXISTS idx_tools_document ON document_tools(document_id)",
            "CREATE INDEX IF NOT EXISTS idx_activity_user ON activity(user_id, created_at)",
        ] {
            sqlx::query(stmt).execute(pool).await?;
        }

        tracing::info!("Migrations complete");
        Ok(())
    }
}

/// Get platform-specific data directory
mod dirs {
    use std::path::PathBuf;

    pub fn data_dir() -> Option<PathBuf> {
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(target_os = "windows")]
        {
            std::env::var("APPDATA").ok().map(PathBuf::from)
        }
        #[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
        {
            None
        }
    }
}
