//! Row types and the handful of queries the socket layer needs.
//!
//! All functions are synchronous; async callers run them inside
//! `tokio::task::spawn_blocking` while holding the `DbPool` lock.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::auth::Identity;
use crate::codec::ObjectId;

/// User record in the users table
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
}

impl From<UserRow> for Identity {
    fn from(row: UserRow) -> Self {
        Identity {
            id: row.id,
            username: row.username,
            display_name: row.display_name,
            avatar_url: row.avatar_url,
        }
    }
}

/// Room record in the rooms table. Ids are object ids in hex form.
#[derive(Debug, Clone)]
pub struct RoomRow {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

pub fn insert_user(
    conn: &Connection,
    username: &str,
    display_name: Option<&str>,
    avatar_url: Option<&str>,
) -> rusqlite::Result<UserRow> {
    let row = UserRow {
        id: ObjectId::new().to_hex(),
        username: username.to_string(),
        display_name: display_name.map(str::to_string),
        avatar_url: avatar_url.map(str::to_string),
        created_at: Utc::now().to_rfc3339(),
    };
    conn.execute(
        "INSERT INTO users (id, username, display_name, avatar_url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![row.id, row.username, row.display_name, row.avatar_url, row.created_at],
    )?;
    Ok(row)
}

pub fn find_user(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<UserRow>> {
    conn.query_row(
        "SELECT id, username, display_name, avatar_url, created_at FROM users WHERE id = ?1",
        params![user_id],
        |row| {
            Ok(UserRow {
                id: row.get(0)?,
                username: row.get(1)?,
                display_name: row.get(2)?,
                avatar_url: row.get(3)?,
                created_at: row.get(4)?,
            })
        },
    )
    .optional()
}

pub fn insert_room(conn: &Connection, name: &str) -> rusqlite::Result<RoomRow> {
    let row = RoomRow {
        id: ObjectId::new().to_hex(),
        name: name.to_string(),
        created_at: Utc::now().to_rfc3339(),
    };
    conn.execute(
        "INSERT INTO rooms (id, name, created_at) VALUES (?1, ?2, ?3)",
        params![row.id, row.name, row.created_at],
    )?;
    Ok(row)
}

/// Add a persisted membership. Re-adding an existing member is a no-op.
pub fn add_room_member(conn: &Connection, room_id: &str, user_id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO room_members (room_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        params![room_id, user_id, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

pub fn room_exists(conn: &Connection, room_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM rooms WHERE id = ?1)",
        params![room_id],
        |row| row.get(0),
    )
}

pub fn is_room_member(conn: &Connection, room_id: &str, user_id: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM room_members WHERE room_id = ?1 AND user_id = ?2)",
        params![room_id, user_id],
        |row| row.get(0),
    )
}
