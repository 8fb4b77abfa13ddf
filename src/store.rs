//! SQLite-backed room store.
//!
//! Every mutation that must be race-free is a single SQL statement whose
//! `WHERE` clause carries the predicate. SQLite takes the write lock before
//! the statement reads, so the predicate and the write are indivisible.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::{debug, instrument};

use crate::error::{not_found, AppErr, AppResult};
use crate::models::{EventLog, LoggedEvent, MemberStatus, Room, RoomEvent, RoomHeader};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS rooms (
        id          TEXT PRIMARY KEY,
        name        TEXT NOT NULL,
        capacity    INTEGER NOT NULL CHECK (capacity > 0),
        active      INTEGER NOT NULL DEFAULT 0,
        created_at  TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS room_members (
        seq       INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id   TEXT NOT NULL REFERENCES rooms(id),
        identity  TEXT NOT NULL,
        status    TEXT NOT NULL CHECK (status IN ('participant', 'waitlisted')),
        UNIQUE (room_id, identity)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_room_members_status ON room_members (room_id, status)",
    r#"
    CREATE TABLE IF NOT EXISTS room_events (
        seq      INTEGER PRIMARY KEY AUTOINCREMENT,
        room_id  TEXT NOT NULL REFERENCES rooms(id),
        log      TEXT NOT NULL CHECK (log IN ('board', 'chat')),
        payload  TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_room_events_log ON room_events (room_id, log, seq)",
];

type HeaderRow = (String, String, i64, bool, String);

#[derive(Clone)]
pub struct RoomStore {
    pool: SqlitePool,
}

impl RoomStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database behind `url`.
    pub async fn connect(url: &str, max_connections: u32) -> AppResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create tables and indexes if they are missing.
    pub async fn migrate(&self) -> AppResult<()> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    /* ---------------- rooms ---------------- */

    #[instrument(skip(self))]
    pub async fn create_room(&self, name: &str, capacity: u32) -> AppResult<Room> {
        if capacity == 0 {
            return Err(AppErr::Bad("capacity must be positive".into()));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let created_at = Utc::now();

        sqlx::query(
            "INSERT INTO rooms (id, name, capacity, active, created_at) VALUES (?1, ?2, ?3, 0, ?4)",
        )
        .bind(&id)
        .bind(name)
        .bind(i64::from(capacity))
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        debug!(room_id = %id, "room created");
        Ok(Room {
            id,
            name: name.to_string(),
            capacity,
            active: false,
            participants: Vec::new(),
            waitlist: Vec::new(),
            created_at,
        })
    }

    pub async fn room_header(&self, id: &str) -> AppResult<Option<RoomHeader>> {
        let row: Option<HeaderRow> = sqlx::query_as(
            "SELECT id, name, capacity, active, created_at FROM rooms WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(header_from_row).transpose()
    }

    /// Full snapshot; header and membership are read in one transaction.
    pub async fn find_room(&self, id: &str) -> AppResult<Option<Room>> {
        let mut tx = self.pool.begin().await?;

        let row: Option<HeaderRow> = sqlx::query_as(
            "SELECT id, name, capacity, active, created_at FROM rooms WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let header = header_from_row(row)?;

        let members: Vec<(String, String)> = sqlx::query_as(
            "SELECT identity, status FROM room_members WHERE room_id = ?1 ORDER BY seq",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let mut participants = Vec::new();
        let mut waitlist = Vec::new();
        for (identity, status) in members {
            match MemberStatus::parse(&status) {
                Some(MemberStatus::Participant) => participants.push(identity),
                Some(MemberStatus::Waitlisted) => waitlist.push(identity),
                None => return Err(AppErr::Db(sqlx::Error::Decode(
                    format!("unknown member status '{status}'").into(),
                ))),
            }
        }

        Ok(Some(Room {
            id: header.id,
            name: header.name,
            capacity: header.capacity,
            active: header.active,
            participants,
            waitlist,
            created_at: header.created_at,
        }))
    }

    /// Flip `active`. A transition to the state the room is already in is
    /// rejected with `InvalidState`.
    #[instrument(skip(self))]
    pub async fn set_active(&self, id: &str, active: bool) -> AppResult<()> {
        let done = sqlx::query("UPDATE rooms SET active = ?2 WHERE id = ?1 AND active = ?3")
            .bind(id)
            .bind(active)
            .bind(!active)
            .execute(&self.pool)
            .await?;
        if done.rows_affected() == 1 {
            return Ok(());
        }
        match self.room_header(id).await? {
            None => Err(not_found("class not found")),
            Some(_) if active => Err(AppErr::InvalidState("class is already active".into())),
            Some(_) => Err(AppErr::InvalidState("class is not active".into())),
        }
    }

    /* ---------------- membership ---------------- */

    /// Add `identity` as a participant iff the room is active, the identity
    /// holds no membership yet and a seat is free. Returns whether the row
    /// was inserted.
    #[instrument(skip(self))]
    pub async fn try_admit(&self, id: &str, identity: &str) -> AppResult<bool> {
        let done = sqlx::query(
            r#"
            INSERT INTO room_members (room_id, identity, status)
            SELECT r.id, ?2, 'participant'
            FROM rooms r
            WHERE r.id = ?1
              AND r.active = 1
              AND NOT EXISTS (
                  SELECT 1 FROM room_members m WHERE m.room_id = r.id AND m.identity = ?2
              )
              AND (
                  SELECT COUNT(*) FROM room_members m
                  WHERE m.room_id = r.id AND m.status = 'participant'
              ) < r.capacity
            "#,
        )
        .bind(id)
        .bind(identity)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    /// Append `identity` to the waitlist iff the room is active and the
    /// identity holds no membership yet.
    #[instrument(skip(self))]
    pub async fn try_waitlist(&self, id: &str, identity: &str) -> AppResult<bool> {
        let done = sqlx::query(
            r#"
            INSERT INTO room_members (room_id, identity, status)
            SELECT r.id, ?2, 'waitlisted'
            FROM rooms r
            WHERE r.id = ?1
              AND r.active = 1
              AND NOT EXISTS (
                  SELECT 1 FROM room_members m WHERE m.room_id = r.id AND m.identity = ?2
              )
            "#,
        )
        .bind(id)
        .bind(identity)
        .execute(&self.pool)
        .await?;
        Ok(done.rows_affected() == 1)
    }

    pub async fn member_status(&self, id: &str, identity: &str) -> AppResult<Option<MemberStatus>> {
        let status: Option<String> = sqlx::query_scalar(
            "SELECT status FROM room_members WHERE room_id = ?1 AND identity = ?2",
        )
        .bind(id)
        .bind(identity)
        .fetch_optional(&self.pool)
        .await?;
        Ok(status.as_deref().and_then(MemberStatus::parse))
    }

    /// 1-based place in the waitlist, `None` if not waitlisted.
    pub async fn waitlist_position(&self, id: &str, identity: &str) -> AppResult<Option<usize>> {
        let ahead: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM room_members w
            WHERE w.room_id = ?1
              AND w.status = 'waitlisted'
              AND w.seq <= (
                  SELECT seq FROM room_members
                  WHERE room_id = ?1 AND identity = ?2 AND status = 'waitlisted'
              )
            "#,
        )
        .bind(id)
        .bind(identity)
        .fetch_one(&self.pool)
        .await?;
        Ok(usize::try_from(ahead).ok().filter(|n| *n > 0))
    }

    /// Drop whatever membership `identity` holds. Nobody is promoted.
    #[instrument(skip(self))]
    pub async fn remove_member(&self, id: &str, identity: &str) -> AppResult<Option<MemberStatus>> {
        // fetch_all steps the statement to completion so the delete commits
        // before this returns
        let removed: Vec<String> = sqlx::query_scalar(
            "DELETE FROM room_members WHERE room_id = ?1 AND identity = ?2 RETURNING status",
        )
        .bind(id)
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;
        Ok(removed.first().map(String::as_str).and_then(MemberStatus::parse))
    }

    /* ---------------- event logs ---------------- */

    /// Append to the board or chat log of the room. Returns the global
    /// append sequence.
    pub async fn append_event(&self, id: &str, event: &RoomEvent) -> AppResult<i64> {
        let payload = serde_json::to_string(event)?;
        let done = sqlx::query(
            r#"
            INSERT INTO room_events (room_id, log, payload)
            SELECT id, ?2, ?3 FROM rooms WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(event.log().as_str())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Err(not_found("class not found"));
        }
        Ok(done.last_insert_rowid())
    }

    /// One log in append order.
    pub async fn event_log(&self, id: &str, log: EventLog) -> AppResult<Vec<LoggedEvent>> {
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT seq, payload FROM room_events WHERE room_id = ?1 AND log = ?2 ORDER BY seq",
        )
        .bind(id)
        .bind(log.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|(seq, payload)| -> AppResult<LoggedEvent> {
                let event = serde_json::from_str(&payload)?;
                Ok(LoggedEvent { seq, event })
            })
            .collect()
    }
}

fn header_from_row((id, name, capacity, active, created_at): HeaderRow) -> AppResult<RoomHeader> {
    let capacity = u32::try_from(capacity)
        .map_err(|e| AppErr::Db(sqlx::Error::Decode(Box::new(e))))?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| AppErr::Db(sqlx::Error::Decode(Box::new(e))))?
        .with_timezone(&Utc);
    Ok(RoomHeader { id, name, capacity, active, created_at })
}
