// Chat turn orchestration.
//
// One turn = validate ownership, check quota, persist the user message,
// generate a reply, persist the bot message. Both writes plus the window
// count live inside a single transaction, with a per-user advisory lock
// serializing the check-then-act sequence, so concurrent turns at the
// limit admit at most one and a failed turn leaves nothing behind.

use crate::models::auth::User;
use crate::openai_client::{ChatTurnMessage, ResponseGenerator, FALLBACK_REPLY};
use crate::services::quota::QuotaPolicy;
use crate::services::usage;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use thiserror::Error;

// Keyspace for pg_advisory_xact_lock so quota locks cannot collide with
// other advisory-lock users of the same database.
const QUOTA_LOCK_NAMESPACE: i32 = 0x43_48_41;

// Prior messages handed to the generator for chat-bound turns.
const HISTORY_CONTEXT_LIMIT: i64 = 20;

#[derive(Error, Debug)]
pub enum TurnError {
    #[error("Chat not found")]
    ChatNotFound,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// How a turn ended. `LimitReached` is a normal, user-facing outcome,
/// not a failure.
#[derive(Debug)]
pub enum TurnOutcome {
    Completed {
        bot_message: String,
        current_count: i64,
        remaining: Option<i64>,
        time_frame: &'static str,
    },
    LimitReached {
        current_count: i64,
        time_frame: &'static str,
    },
}

pub struct TurnService {
    pool: PgPool,
    policy: QuotaPolicy,
    generator: Option<Arc<dyn ResponseGenerator>>,
}

impl TurnService {
    pub fn new(
        pool: PgPool,
        policy: QuotaPolicy,
        generator: Option<Arc<dyn ResponseGenerator>>,
    ) -> Self {
        Self {
            pool,
            policy,
            generator,
        }
    }

    pub fn policy(&self) -> &QuotaPolicy {
        &self.policy
    }

    pub async fn run_turn(
        &self,
        user: &User,
        chat_id: Option<i32>,
        content: &str,
    ) -> Result<TurnOutcome, TurnError> {
        // Validating: chat must exist and be owned by the caller
        if let Some(chat_id) = chat_id {
            if usage::find_owned_chat(&self.pool, chat_id, user.id)
                .await?
                .is_none()
            {
                return Err(TurnError::ChatNotFound);
            }
        }

        let history = match chat_id {
            Some(chat_id) => {
                usage::recent_chat_messages(&self.pool, chat_id, HISTORY_CONTEXT_LIMIT)
                    .await?
                    .into_iter()
                    .map(|msg| {
                        if msg.is_bot {
                            ChatTurnMessage::assistant(msg.content)
                        } else {
                            ChatTurnMessage::user(msg.content)
                        }
                    })
                    .collect()
            }
            None => Vec::new(),
        };

        let time_frame = self.policy.time_frame().label();
        let mut tx = self.pool.begin().await?;

        // QuotaCheck: premium bypasses both the lock and the count
        let decision = if user.is_premium {
            self.policy.evaluate(true, 0)
        } else {
            // Serializes count + insert for this user; released with the
            // transaction on every exit path.
            sqlx::query("SELECT pg_advisory_xact_lock($1, $2)")
                .bind(QUOTA_LOCK_NAMESPACE)
                .bind(user.id)
                .execute(&mut *tx)
                .await?;

            let window_start = self.policy.window_start(Utc::now());
            let count =
                usage::count_user_messages_since(&mut tx, user.id, window_start).await?;
            self.policy.evaluate(false, count)
        };

        if !decision.allowed {
            tx.rollback().await?;
            tracing::warn!(
                user_id = user.id,
                current_count = decision.current_count,
                "message limit reached"
            );
            return Ok(TurnOutcome::LimitReached {
                current_count: decision.current_count,
                time_frame,
            });
        }

        // PersistUserMessage
        let user_message =
            usage::insert_message(&mut tx, user.id, chat_id, content, false).await?;

        // GenerateResponse: a generator failure degrades to the fallback
        // string inside the same transaction scope
        let bot_content = self.generate_reply(&history, content).await;

        // PersistBotMessage
        usage::insert_message(&mut tx, user.id, chat_id, &bot_content, true).await?;

        usage::bump_daily_count(&mut tx, user.id, user_message.created_at.date_naive()).await?;

        tx.commit().await?;

        let (current_count, remaining) = if user.is_premium {
            (0, None)
        } else {
            (
                decision.current_count + 1,
                decision.remaining.map(|r| (r - 1).max(0)),
            )
        };

        tracing::info!(
            user_id = user.id,
            chat_id = ?chat_id,
            current_count,
            "chat turn completed"
        );

        Ok(TurnOutcome::Completed {
            bot_message: bot_content,
            current_count,
            remaining,
            time_frame,
        })
    }

    async fn generate_reply(&self, history: &[ChatTurnMessage], user_text: &str) -> String {
        let Some(generator) = &self.generator else {
            return FALLBACK_REPLY.to_string();
        };

        match generator.generate(history, user_text).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Response generation failed, using fallback: {}", e);
                FALLBACK_REPLY.to_string()
            }
        }
    }
}

// Database-backed tests. Run with a disposable Postgres instance:
//   DATABASE_URL=postgres://... cargo test -- --ignored
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimeFrame;
    use crate::models::auth::User;
    use sqlx::postgres::PgPoolOptions;

    async fn test_pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for DB tests");
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(&url)
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        pool
    }

    async fn create_user(pool: &PgPool, is_premium: bool) -> User {
        let email = format!("turn-test-{}@example.com", uuid::Uuid::new_v4());
        sqlx::query_as(
            "INSERT INTO users (email, password_hash, is_premium, created_at, updated_at)
             VALUES ($1, 'x', $2, NOW(), NOW())
             RETURNING id, email, password_hash, is_premium, stripe_customer_id,
                       created_at, updated_at",
        )
        .bind(email)
        .bind(is_premium)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    async fn test_concurrent_turns_at_limit_admit_exactly_one() {
        let pool = test_pool().await;
        let user = Arc::new(create_user(&pool, false).await);
        let policy = QuotaPolicy::new(5, TimeFrame::Hour);
        let service = Arc::new(TurnService::new(pool.clone(), policy, None));

        // Bring the user to one message under the limit
        for _ in 0..4 {
            let mut conn = pool.acquire().await.unwrap();
            usage::insert_message(&mut conn, user.id, None, "hello", false)
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let service = service.clone();
            let user = user.clone();
            handles.push(tokio::spawn(async move {
                service.run_turn(&user, None, "one more").await.unwrap()
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), TurnOutcome::Completed { .. }) {
                admitted += 1;
            }
        }

        // The advisory lock serializes check-then-act per user
        assert_eq!(admitted, 1);

        let mut conn = pool.acquire().await.unwrap();
        let count = usage::count_user_messages_since(
            &mut conn,
            user.id,
            Utc::now() - TimeFrame::Hour.window(),
        )
        .await
        .unwrap();
        assert_eq!(count, 5);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    async fn test_turn_rejected_at_limit_with_structured_outcome() {
        let pool = test_pool().await;
        let user = create_user(&pool, false).await;
        let policy = QuotaPolicy::new(10, TimeFrame::Minute);
        let service = TurnService::new(pool.clone(), policy, None);

        for _ in 0..10 {
            let mut conn = pool.acquire().await.unwrap();
            usage::insert_message(&mut conn, user.id, None, "hi", false)
                .await
                .unwrap();
        }

        match service.run_turn(&user, None, "one too many").await.unwrap() {
            TurnOutcome::LimitReached {
                current_count,
                time_frame,
            } => {
                assert_eq!(current_count, 10);
                assert_eq!(time_frame, "minute");
            }
            other => panic!("expected limit rejection, got {:?}", other),
        }

        // The rejected turn persisted nothing
        let mut conn = pool.acquire().await.unwrap();
        let count = usage::count_user_messages_since(
            &mut conn,
            user.id,
            Utc::now() - TimeFrame::Minute.window(),
        )
        .await
        .unwrap();
        assert_eq!(count, 10);
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    async fn test_expired_messages_fall_out_of_window() {
        let pool = test_pool().await;
        let user = create_user(&pool, false).await;
        let policy = QuotaPolicy::new(10, TimeFrame::Minute);
        let service = TurnService::new(pool.clone(), policy, None);

        // A full window's worth of messages, all older than one minute
        for _ in 0..10 {
            sqlx::query(
                "INSERT INTO messages (user_id, content, is_bot, created_at)
                 VALUES ($1, 'old', FALSE, NOW() - INTERVAL '61 seconds')",
            )
            .bind(user.id)
            .execute(&pool)
            .await
            .unwrap();
        }

        match service.run_turn(&user, None, "fresh").await.unwrap() {
            TurnOutcome::Completed {
                bot_message,
                current_count,
                remaining,
                ..
            } => {
                assert_eq!(current_count, 1);
                assert_eq!(remaining, Some(9));
                assert_eq!(bot_message, FALLBACK_REPLY);
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[tokio::test]
    #[ignore = "requires DATABASE_URL pointing at a Postgres instance"]
    async fn test_premium_user_bypasses_full_window() {
        let pool = test_pool().await;
        let user = create_user(&pool, true).await;
        let policy = QuotaPolicy::new(2, TimeFrame::Minute);
        let service = TurnService::new(pool.clone(), policy, None);

        for _ in 0..5 {
            match service.run_turn(&user, None, "hello").await.unwrap() {
                TurnOutcome::Completed {
                    current_count,
                    remaining,
                    ..
                } => {
                    assert_eq!(current_count, 0);
                    assert_eq!(remaining, None);
                }
                other => panic!("expected completion, got {:?}", other),
            }
        }
    }
}
