//! Subscriber store on SQLite: subscriber records with their delivery
//! cursors, plus the subject UPC-code cache used for notice links.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::instrument;

use crate::model::Subscriber;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/` and ensure the
/// parent directory exists. Leaves in-memory URLs untouched.
fn prepare_sqlite_url(url: &str) -> String {
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };
    if path_part.is_empty() {
        return url.to_string();
    }

    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    if let Some(q) = query_part {
        rebuilt.push('?');
        rebuilt.push_str(q);
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn get_subscriber(pool: &Pool, id: i64) -> Result<Option<Subscriber>> {
    let subscriber = sqlx::query_as::<_, Subscriber>(
        "SELECT id, access_token, refresh_token, token_expiry, language_code, \
         last_notices_digest, last_notice_timestamp, mute_banner_notices \
         FROM subscribers WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(subscriber)
}

#[instrument(skip_all)]
pub async fn put_subscriber(pool: &Pool, s: &Subscriber) -> Result<()> {
    sqlx::query(
        "INSERT INTO subscribers \
         (id, access_token, refresh_token, token_expiry, language_code, \
          last_notices_digest, last_notice_timestamp, mute_banner_notices) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
           access_token = excluded.access_token, \
           refresh_token = excluded.refresh_token, \
           token_expiry = excluded.token_expiry, \
           language_code = excluded.language_code, \
           last_notices_digest = excluded.last_notices_digest, \
           last_notice_timestamp = excluded.last_notice_timestamp, \
           mute_banner_notices = excluded.mute_banner_notices",
    )
    .bind(s.id)
    .bind(&s.access_token)
    .bind(&s.refresh_token)
    .bind(s.token_expiry)
    .bind(&s.language_code)
    .bind(&s.last_notices_digest)
    .bind(s.last_notice_timestamp)
    .bind(s.mute_banner_notices)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn delete_subscriber(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM subscribers WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn all_subscriber_ids(pool: &Pool) -> Result<Vec<i64>> {
    let ids = sqlx::query_scalar::<_, i64>("SELECT id FROM subscribers ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

/// Persists the delivery cursor. Called once per run per subscriber, after
/// all of their new notices have been sent.
#[instrument(skip_all)]
pub async fn update_cursor(pool: &Pool, id: i64, digest: &str, timestamp: i64) -> Result<()> {
    sqlx::query(
        "UPDATE subscribers SET last_notices_digest = ?, last_notice_timestamp = ? WHERE id = ?",
    )
    .bind(digest)
    .bind(timestamp)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn set_language(pool: &Pool, id: i64, language_code: &str) -> Result<()> {
    sqlx::query("UPDATE subscribers SET language_code = ? WHERE id = ?")
        .bind(language_code)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Flips the banner-notice mute flag and returns its new value.
#[instrument(skip_all)]
pub async fn toggle_mute_banner_notices(pool: &Pool, id: i64) -> Result<bool> {
    let muted = sqlx::query_scalar::<_, bool>(
        "UPDATE subscribers SET mute_banner_notices = NOT mute_banner_notices \
         WHERE id = ? RETURNING mute_banner_notices",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;
    Ok(muted)
}

#[instrument(skip_all)]
pub async fn subject_upc_code(pool: &Pool, acronym: &str) -> Result<Option<i64>> {
    let code = sqlx::query_scalar::<_, i64>("SELECT upc_code FROM subject_codes WHERE acronym = ?")
        .bind(acronym)
        .fetch_optional(pool)
        .await?;
    Ok(code)
}

#[instrument(skip_all)]
pub async fn put_subject_upc_code(pool: &Pool, acronym: &str, upc_code: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO subject_codes (acronym, upc_code) VALUES (?, ?) \
         ON CONFLICT(acronym) DO UPDATE SET upc_code = excluded.upc_code",
    )
    .bind(acronym)
    .bind(upc_code)
    .execute(pool)
    .await?;
    Ok(())
}
