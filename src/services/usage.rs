// Usage store: message persistence plus the count-in-window query that
// feeds the quota policy. Window-sensitive operations take a plain
// connection so they can run inside the caller's transaction.

use crate::models::chat::{Chat, Message};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgConnection, PgPool};

/// User-authored messages since `since`. Bot replies never count toward
/// the quota.
pub async fn count_user_messages_since(
    conn: &mut PgConnection,
    user_id: i32,
    since: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM messages
         WHERE user_id = $1 AND is_bot = FALSE AND created_at >= $2",
    )
    .bind(user_id)
    .bind(since)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

pub async fn insert_message(
    conn: &mut PgConnection,
    user_id: i32,
    chat_id: Option<i32>,
    content: &str,
    is_bot: bool,
) -> Result<Message, sqlx::Error> {
    sqlx::query_as(
        "INSERT INTO messages (user_id, chat_id, content, is_bot, created_at)
         VALUES ($1, $2, $3, $4, NOW())
         RETURNING id, user_id, chat_id, content, is_bot, created_at",
    )
    .bind(user_id)
    .bind(chat_id)
    .bind(content)
    .bind(is_bot)
    .fetch_one(&mut *conn)
    .await
}

/// Atomic increment of the per-day aggregate. Secondary path only: the
/// sliding-window COUNT above is what admission decisions read.
pub async fn bump_daily_count(
    conn: &mut PgConnection,
    user_id: i32,
    day: NaiveDate,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO daily_message_counts (user_id, day, count)
         VALUES ($1, $2, 1)
         ON CONFLICT (user_id, day) DO UPDATE
         SET count = daily_message_counts.count + 1",
    )
    .bind(user_id)
    .bind(day)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn count_in_current_window(
    pool: &PgPool,
    user_id: i32,
    since: DateTime<Utc>,
) -> Result<i64, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    count_user_messages_since(&mut conn, user_id, since).await
}

pub async fn list_user_messages(pool: &PgPool, user_id: i32) -> Result<Vec<Message>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, user_id, chat_id, content, is_bot, created_at
         FROM messages WHERE user_id = $1 ORDER BY created_at ASC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

pub async fn list_chat_messages(pool: &PgPool, chat_id: i32) -> Result<Vec<Message>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, user_id, chat_id, content, is_bot, created_at
         FROM messages WHERE chat_id = $1 ORDER BY created_at ASC",
    )
    .bind(chat_id)
    .fetch_all(pool)
    .await
}

/// Most recent messages of a chat, oldest first, for generator context.
pub async fn recent_chat_messages(
    pool: &PgPool,
    chat_id: i32,
    limit: i64,
) -> Result<Vec<Message>, sqlx::Error> {
    let mut messages: Vec<Message> = sqlx::query_as(
        "SELECT id, user_id, chat_id, content, is_bot, created_at
         FROM messages WHERE chat_id = $1 ORDER BY created_at DESC LIMIT $2",
    )
    .bind(chat_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    messages.reverse();
    Ok(messages)
}

pub async fn create_chat(pool: &PgPool, user_id: i32, title: &str) -> Result<Chat, sqlx::Error> {
    sqlx::query_as(
        "INSERT INTO chats (user_id, title, created_at)
         VALUES ($1, $2, NOW())
         RETURNING id, user_id, title, created_at",
    )
    .bind(user_id)
    .bind(title)
    .fetch_one(pool)
    .await
}

pub async fn list_user_chats(pool: &PgPool, user_id: i32) -> Result<Vec<Chat>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, user_id, title, created_at
         FROM chats WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Chat by id, only if owned by `user_id`.
pub async fn find_owned_chat(
    pool: &PgPool,
    chat_id: i32,
    user_id: i32,
) -> Result<Option<Chat>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, user_id, title, created_at
         FROM chats WHERE id = $1 AND user_id = $2",
    )
    .bind(chat_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn rename_chat(pool: &PgPool, chat_id: i32, title: &str) -> Result<Chat, sqlx::Error> {
    sqlx::query_as(
        "UPDATE chats SET title = $2 WHERE id = $1
         RETURNING id, user_id, title, created_at",
    )
    .bind(chat_id)
    .bind(title)
    .fetch_one(pool)
    .await
}

/// Deletes the chat; messages cascade at the schema level.
pub async fn delete_chat(pool: &PgPool, chat_id: i32) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM chats WHERE id = $1")
        .bind(chat_id)
        .execute(pool)
        .await?;

    Ok(())
}
