// SQLite persistence layer for drafts, participants, items, and picks.

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::draft::pick::{PickOrigin, PickRecord};
use crate::draft::roster::{Item, Participant, ParticipantStatus};
use crate::draft::state::{DraftInfo, DraftStatus, OrderPolicy, StoredDraft};
use crate::persistence::{DraftChange, ParticipantUpdate};

/// SQLite-backed storage for drafts and their pick history.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure all tables
    /// exist. Pass `":memory:"` for an ephemeral in-memory database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS drafts (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                description  TEXT,
                start_time   TEXT,
                pick_seconds INTEGER NOT NULL,
                rounds       INTEGER NOT NULL DEFAULT 1,
                order_policy TEXT NOT NULL DEFAULT 'linear',
                status       TEXT NOT NULL DEFAULT 'pending',
                created_at   TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE TABLE IF NOT EXISTS participants (
                draft_id   TEXT NOT NULL REFERENCES drafts(id) ON DELETE CASCADE,
                id         TEXT NOT NULL,
                name       TEXT NOT NULL,
                pick_order INTEGER NOT NULL,
                status     TEXT NOT NULL DEFAULT 'waiting',
                PRIMARY KEY (draft_id, id),
                UNIQUE (draft_id, pick_order)
            );

            CREATE TABLE IF NOT EXISTS items (
                draft_id      TEXT NOT NULL REFERENCES drafts(id) ON DELETE CASCADE,
                id            TEXT NOT NULL,
                name          TEXT NOT NULL,
                image_url     TEXT,
                taken         INTEGER NOT NULL DEFAULT 0,
                fallback_rank INTEGER,
                position      INTEGER NOT NULL,
                PRIMARY KEY (draft_id, id)
            );

            CREATE TABLE IF NOT EXISTS picks (
                draft_id         TEXT NOT NULL REFERENCES drafts(id) ON DELETE CASCADE,
                pick_number      INTEGER NOT NULL,
                participant_id   TEXT NOT NULL,
                participant_name TEXT NOT NULL,
                item_id          TEXT NOT NULL,
                item_name        TEXT NOT NULL,
                round            INTEGER NOT NULL,
                is_auto_pick     INTEGER NOT NULL,
                origin           TEXT NOT NULL,
                timestamp        TEXT NOT NULL,
                PRIMARY KEY (pick_number, draft_id)
            );

            CREATE INDEX IF NOT EXISTS idx_picks_draft_id ON picks(draft_id);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Insert a new draft row. Fails if a draft with the same id exists.
    pub fn create_draft(&self, draft: &DraftInfo) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO drafts
                (id, name, description, start_time, pick_seconds, rounds, order_policy, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                draft.id,
                draft.name,
                draft.description,
                draft.start_time.map(|t| t.to_rfc3339()),
                draft.pick_seconds,
                draft.rounds,
                draft.order.as_str(),
                draft.status.as_str(),
            ],
        )
        .with_context(|| format!("failed to create draft {}", draft.id))?;
        Ok(())
    }

    pub fn add_participant(&self, draft_id: &str, participant: &Participant) -> Result<()> {
        let conn = self.conn()?;
        insert_participant(&conn, draft_id, participant)
    }

    /// Append an item to the end of the draft's pool.
    pub fn add_item(&self, draft_id: &str, item: &Item) -> Result<()> {
        let conn = self.conn()?;
        let position: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM items WHERE draft_id = ?1",
                params![draft_id],
                |row| row.get(0),
            )
            .context("failed to count items")?;
        insert_item(&conn, draft_id, item, position)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Load a draft with its participants (by pick order), items (in pool
    /// order), and picks (by pick number). `None` if the draft does not
    /// exist.
    pub fn load_draft(&self, draft_id: &str) -> Result<Option<StoredDraft>> {
        let conn = self.conn()?;

        let row = conn
            .query_row(
                "SELECT id, name, description, start_time, pick_seconds, rounds, order_policy, status
                 FROM drafts WHERE id = ?1",
                params![draft_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, u32>(4)?,
                        row.get::<_, u32>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                },
            )
            .optional()
            .context("failed to query draft")?;

        let Some((id, name, description, start_time, pick_seconds, rounds, order, status)) = row
        else {
            return Ok(None);
        };

        let draft = DraftInfo {
            id,
            name,
            description,
            start_time: start_time.as_deref().map(parse_timestamp).transpose()?,
            pick_seconds,
            rounds,
            order: OrderPolicy::parse(&order)
                .ok_or_else(|| anyhow!("unknown order policy `{order}`"))?,
            status: DraftStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown draft status `{status}`"))?,
        };

        let participants = load_participants(&conn, draft_id)?;
        let items = load_items(&conn, draft_id)?;
        let picks = query_picks(&conn, draft_id)?;

        Ok(Some(StoredDraft {
            draft,
            participants,
            items,
            picks,
        }))
    }

    /// Load the pick history of a draft, ordered by pick number.
    pub fn load_picks(&self, draft_id: &str) -> Result<Vec<PickRecord>> {
        let conn = self.conn()?;
        query_picks(&conn, draft_id)
    }

    pub fn draft_status(&self, draft_id: &str) -> Result<Option<DraftStatus>> {
        let conn = self.conn()?;
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM drafts WHERE id = ?1",
                params![draft_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query draft status")?;
        status
            .map(|s| DraftStatus::parse(&s).ok_or_else(|| anyhow!("unknown draft status `{s}`")))
            .transpose()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Apply one committed change in a single transaction.
    pub fn apply_change(&self, change: &DraftChange) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction()
            .context("failed to begin transaction")?;

        match change {
            DraftChange::Activated {
                draft_id,
                roster,
                participants,
                status,
            } => {
                if let Some(roster) = roster {
                    tx.execute("DELETE FROM participants WHERE draft_id = ?1", params![draft_id])
                        .context("failed to clear participants")?;
                    tx.execute("DELETE FROM items WHERE draft_id = ?1", params![draft_id])
                        .context("failed to clear items")?;
                    for p in &roster.participants {
                        insert_participant(&tx, draft_id, p)?;
                    }
                    for (position, item) in roster.items.iter().enumerate() {
                        insert_item(&tx, draft_id, item, position as i64)?;
                    }
                }
                update_statuses(&tx, draft_id, participants)?;
                update_draft_status(&tx, draft_id, *status)?;
            }
            DraftChange::PickCommitted {
                pick,
                participants,
                status,
            } => {
                tx.execute(
                    "INSERT OR IGNORE INTO picks
                        (draft_id, pick_number, participant_id, participant_name, item_id,
                         item_name, round, is_auto_pick, origin, timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        pick.draft_id,
                        pick.pick_number,
                        pick.participant_id,
                        pick.participant_name,
                        pick.item_id,
                        pick.item_name,
                        pick.round,
                        pick.automatic,
                        pick.origin.as_str(),
                        pick.timestamp.to_rfc3339(),
                    ],
                )
                .context("failed to record pick")?;
                tx.execute(
                    "UPDATE items SET taken = 1 WHERE draft_id = ?1 AND id = ?2",
                    params![pick.draft_id, pick.item_id],
                )
                .context("failed to mark item taken")?;
                update_statuses(&tx, &pick.draft_id, participants)?;
                update_draft_status(&tx, &pick.draft_id, *status)?;
            }
        }

        tx.commit().context("failed to commit transaction")?;
        Ok(())
    }
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp `{s}`"))?
        .with_timezone(&Utc))
}

fn insert_participant(conn: &Connection, draft_id: &str, p: &Participant) -> Result<()> {
    conn.execute(
        "INSERT INTO participants (draft_id, id, name, pick_order, status)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![draft_id, p.id, p.name, p.pick_order, p.status.as_str()],
    )
    .with_context(|| format!("failed to add participant {} to draft {draft_id}", p.id))?;
    Ok(())
}

fn insert_item(conn: &Connection, draft_id: &str, item: &Item, position: i64) -> Result<()> {
    conn.execute(
        "INSERT INTO items (draft_id, id, name, image_url, taken, fallback_rank, position)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            draft_id,
            item.id,
            item.name,
            item.image_url,
            item.taken,
            item.fallback_rank,
            position,
        ],
    )
    .with_context(|| format!("failed to add item {} to draft {draft_id}", item.id))?;
    Ok(())
}

fn update_statuses(tx: &Transaction<'_>, draft_id: &str, updates: &[ParticipantUpdate]) -> Result<()> {
    for u in updates {
        tx.execute(
            "UPDATE participants SET status = ?1 WHERE draft_id = ?2 AND id = ?3",
            params![u.status.as_str(), draft_id, u.participant_id],
        )
        .context("failed to update participant status")?;
    }
    Ok(())
}

fn update_draft_status(tx: &Transaction<'_>, draft_id: &str, status: DraftStatus) -> Result<()> {
    let updated = tx
        .execute(
            "UPDATE drafts SET status = ?1 WHERE id = ?2",
            params![status.as_str(), draft_id],
        )
        .context("failed to update draft status")?;
    if updated == 0 {
        bail!("draft {draft_id} does not exist");
    }
    Ok(())
}

fn load_participants(conn: &Connection, draft_id: &str) -> Result<Vec<Participant>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, pick_order, status FROM participants
             WHERE draft_id = ?1 ORDER BY pick_order",
        )
        .context("failed to prepare participants query")?;
    let rows = stmt
        .query_map(params![draft_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .context("failed to query participants")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map participant rows")?;

    rows.into_iter()
        .map(|(id, name, pick_order, status)| {
            Ok(Participant {
                status: ParticipantStatus::parse(&status)
                    .ok_or_else(|| anyhow!("unknown participant status `{status}`"))?,
                id,
                name,
                pick_order,
            })
        })
        .collect()
}

fn load_items(conn: &Connection, draft_id: &str) -> Result<Vec<Item>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, name, image_url, taken, fallback_rank FROM items
             WHERE draft_id = ?1 ORDER BY position",
        )
        .context("failed to prepare items query")?;
    let items = stmt
        .query_map(params![draft_id], |row| {
            Ok(Item {
                id: row.get(0)?,
                name: row.get(1)?,
                image_url: row.get(2)?,
                taken: row.get(3)?,
                fallback_rank: row.get(4)?,
            })
        })
        .context("failed to query items")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map item rows")?;
    Ok(items)
}

fn query_picks(conn: &Connection, draft_id: &str) -> Result<Vec<PickRecord>> {
    let mut stmt = conn
        .prepare(
            "SELECT pick_number, participant_id, participant_name, item_id, item_name,
                    round, is_auto_pick, origin, timestamp
             FROM picks WHERE draft_id = ?1 ORDER BY pick_number",
        )
        .context("failed to prepare picks query")?;
    let rows = stmt
        .query_map(params![draft_id], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, u32>(5)?,
                row.get::<_, bool>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
            ))
        })
        .context("failed to query picks")?
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed to map pick rows")?;

    rows.into_iter()
        .map(
            |(pick_number, participant_id, participant_name, item_id, item_name, round, automatic, origin, timestamp)| {
                Ok(PickRecord {
                    draft_id: draft_id.to_string(),
                    pick_number,
                    participant_id,
                    participant_name,
                    item_id,
                    item_name,
                    round,
                    timestamp: parse_timestamp(&timestamp)?,
                    automatic,
                    origin: PickOrigin::parse(&origin)
                        .ok_or_else(|| anyhow!("unknown pick origin `{origin}`"))?,
                })
            },
        )
        .collect()
}
