//! Authentication Module
//!
//! Handles user signup, login, profile updates and session management.
//! Users and sessions live in the shared SQLite database.

pub mod handlers;
pub mod middleware;

use crate::core::error::{Error, Result};
use crate::core::models::{from_db_time, non_empty, to_db_time, UserProfile};
use anyhow::Context;
use bcrypt::{hash, verify};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

type UserRow = (String, String, String, Option<String>, Option<String>, String);

const PASSWORD_COST: u32 = 10;

const USER_COLUMNS: &str = "id, email, full_name, bio, profile_pic, created_at";

fn row_to_profile(row: UserRow) -> Result<UserProfile> {
    let (id, email, full_name, bio, profile_pic, created_at) = row;
    Ok(UserProfile {
        created_at: from_db_time(&created_at)
            .with_context(|| format!("Unreadable user {}", id))?,
        id,
        email,
        full_name,
        bio,
        profile_pic,
    })
}

/// Session token for authenticated requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Fields a user may change on their own profile
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub profile_pic: Option<String>,
}

/// Auth manager handles all authentication
pub struct AuthManager {
    pool: SqlitePool,
    session_ttl: chrono::Duration,
    /// In-memory session cache
    sessions: RwLock<HashMap<String, Session>>,
}

impl AuthManager {
    pub fn new(pool: SqlitePool, session_ttl_days: i64) -> Self {
        Self {
            pool,
            session_ttl: chrono::Duration::days(session_ttl_days),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new user and open a session for them
    pub async fn signup(
        &self,
        email: &str,
        full_name: &str,
        password: &str,
        bio: Option<String>,
    ) -> Result<(UserProfile, Session)> {
        let email = email.trim().to_lowercase();
        let full_name = full_name.trim();
        if email.is_empty() || full_name.is_empty() || password.is_empty() {
            return Err(Error::MissingFields);
        }

        let existing: Option<(String,)> = sqlx::query_as("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?;

        if existing.is_some() {
            return Err(Error::UserAlreadyExists);
        }

        let password_hash = hash(password, PASSWORD_COST).context("Failed to hash password")?;

        let user = UserProfile {
            id: Uuid::new_v4().to_string(),
            email,
            full_name: full_name.to_string(),
            bio: non_empty(bio),
            profile_pic: None,
            created_at: Utc::now().trunc_subsecs(6),
        };

        sqlx::query(
            "INSERT INTO users (id, email, full_name, password_hash, bio, created_at, is_active) VALUES (?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(&user.id)
        .bind(&user.email)
        .bind(&user.full_name)
        .bind(&password_hash)
        .bind(&user.bio)
        .bind(to_db_time(user.created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            // Lost a race with a concurrent signup for the same email.
            sqlx::Error::Database(db) if db.is_unique_violation() => Error::UserAlreadyExists,
            other => other.into(),
        })?;

        let session = self.create_session(&user.id).await?;

        info!("[Auth] User registered: {} ({})", user.full_name, user.email);

        Ok((user, session))
    }

    /// Login user and create session
    pub async fn login(&self, email: &str, password: &str) -> Result<(UserProfile, Session)> {
        let email = email.trim().to_lowercase();
        if email.is_empty() || password.is_empty() {
            return Err(Error::MissingFields);
        }

        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT id, password_hash FROM users WHERE email = ? AND is_active = 1",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let (user_id, password_hash) = row.ok_or(Error::InvalidCredentials)?;

        let valid = verify(password, &password_hash).context("Failed to verify password")?;
        if !valid {
            warn!("[Auth] Failed login attempt for {}", email);
            return Err(Error::InvalidCredentials);
        }

        let session = self.create_session(&user_id).await?;
        let user = self.get_user(&user_id).await?;

        info!("[Auth] User logged in: {}", user.full_name);

        Ok((user, session))
    }

    async fn create_session(&self, user_id: &str) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            token: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + self.session_ttl,
        };

        sqlx::query(
            "INSERT INTO sessions (token, user_id, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(&session.user_id)
        .bind(to_db_time(session.created_at))
        .bind(to_db_time(session.expires_at))
        .execute(&self.pool)
        .await?;

        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, cached| cached.expires_at > now);
        sessions.insert(session.token.clone(), session.clone());

        Ok(session)
    }

    /// Resolve a session token to its user id
    pub async fn validate_session(&self, token: &str) -> Result<String> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(token) {
                if session.expires_at > Utc::now() {
                    return Ok(session.user_id.clone());
                }
            }
        }

        let row: Option<(String, String, String)> = sqlx::query_as(
            "SELECT user_id, created_at, expires_at FROM sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        let Some((user_id, created_at, expires_at)) = row else {
            return Err(Error::AuthFailInvalidToken);
        };

        let expires_at = from_db_time(&expires_at)?;
        if expires_at <= Utc::now() {
            self.sessions.write().await.remove(token);
            return Err(Error::AuthFailInvalidToken);
        }

        self.sessions.write().await.insert(
            token.to_string(),
            Session {
                token: token.to_string(),
                user_id: user_id.clone(),
                created_at: from_db_time(&created_at)?,
                expires_at,
            },
        );

        Ok(user_id)
    }

    /// Logout user (invalidate session)
    pub async fn logout(&self, token: &str) -> Result<()> {
        self.sessions.write().await.remove(token);

        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;

        info!("[Auth] Session invalidated");

        Ok(())
    }

    /// Get user by ID
    pub async fn get_user(&self, user_id: &str) -> Result<UserProfile> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ? AND is_active = 1");
        let row: Option<UserRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(row_to_profile)
            .transpose()?
            .ok_or(Error::UserNotFound)
    }

    /// Every active user except `user_id` (the contact sidebar)
    pub async fn list_users_except(&self, user_id: &str) -> Result<Vec<UserProfile>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active = 1 AND id != ? ORDER BY full_name"
        );
        let rows: Vec<UserRow> = sqlx::query_as(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(row_to_profile).collect()
    }

    /// Update user profile. Absent fields are left unchanged.
    pub async fn update_profile(&self, user_id: &str, update: ProfileUpdate) -> Result<UserProfile> {
        if let Some(full_name) = non_empty(update.full_name) {
            sqlx::query("UPDATE users SET full_name = ? WHERE id = ?")
                .bind(full_name.trim())
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }

        if let Some(bio) = update.bio {
            sqlx::query("UPDATE users SET bio = ? WHERE id = ?")
                .bind(non_empty(Some(bio)))
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }

        if let Some(profile_pic) = non_empty(update.profile_pic) {
            sqlx::query("UPDATE users SET profile_pic = ? WHERE id = ?")
                .bind(profile_pic)
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }

        let user = self.get_user(user_id).await?;
        info!("[Auth] Profile updated: {}", user.id);
        Ok(user)
    }
}
