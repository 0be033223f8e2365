//! Triple Memory: structural, semantic, and evolutionary stores over one
//! `rusqlite` (bundled SQLite) backend.
//!
//! Modeled directly on `factory/db.rs`: `new`/`new_in_memory`
//! constructors, `init()` + `PRAGMA foreign_keys`, one `execute_batch`
//! migration, and row-struct→domain-struct conversion helpers.

use crate::errors::MemoryError;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A world. Exactly one per job (invariant 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct World {
    pub id: String,
    pub job_id: String,
    pub rules_of_reality: Vec<String>,
    pub boundaries: Vec<String>,
    pub anomalies: Vec<String>,
    pub core_conflict: String,
    pub existential_theme: String,
}

/// A character. FK to `world_id` — cannot be
/// inserted without an existing world (invariant enforced at the store
/// boundary).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub world_id: String,
    pub name: String,
    pub internal_trajectory: String,
    pub contradictions: Vec<String>,
    pub cognitive_limits: Vec<String>,
    pub evolution_capacity: f64,
}

/// A semantic event. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub world_id: String,
    pub participants: Vec<String>,
    pub location: String,
    pub description: String,
    pub consequences: String,
    pub story_timestamp: String,
}

/// An evolutionary timeline entry. References an existing
/// structural entity and an existing triggering event (invariant 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: String,
    pub entity_id: String,
    pub change_type: String,
    pub before_state: String,
    pub after_state: String,
    pub trigger_event_id: String,
    pub significance: f64,
}

/// A typed, directed, weighted relationship between two structural/semantic
/// entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: String,
    pub from_id: String,
    pub to_id: String,
    pub relation: String,
    pub weight: f64,
}

fn join_list(items: &[String]) -> String {
    items.join("\u{1f}")
}

fn split_list(joined: &str) -> Vec<String> {
    if joined.is_empty() {
        Vec::new()
    } else {
        joined.split('\u{1f}').map(|s| s.to_string()).collect()
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4())
}

/// The Triple Memory store. One instance is shared by every stage within a
/// job; writes are single-writer-per-job by construction (the orchestrator
/// serialises stages).
pub struct MemoryStore {
    conn: Connection,
}

impl MemoryStore {
    pub fn new(path: &Path) -> Result<Self, MemoryError> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    pub fn new_in_memory() -> Result<Self, MemoryError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), MemoryError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.run_migrations()?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<(), MemoryError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS worlds (
                id TEXT PRIMARY KEY,
                job_id TEXT NOT NULL,
                rules_of_reality TEXT NOT NULL DEFAULT '',
                boundaries TEXT NOT NULL DEFAULT '',
                anomalies TEXT NOT NULL DEFAULT '',
                core_conflict TEXT NOT NULL,
                existential_theme TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS characters (
                id TEXT PRIMARY KEY,
                world_id TEXT NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                internal_trajectory TEXT NOT NULL,
                contradictions TEXT NOT NULL DEFAULT '',
                cognitive_limits TEXT NOT NULL DEFAULT '',
                evolution_capacity REAL NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS rule_systems (
                id TEXT PRIMARY KEY,
                world_id TEXT NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS archetypes (
                id TEXT PRIMARY KEY,
                world_id TEXT NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                world_id TEXT NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
                participants TEXT NOT NULL DEFAULT '',
                location TEXT NOT NULL,
                description TEXT NOT NULL,
                consequences TEXT NOT NULL DEFAULT '',
                story_timestamp TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS motifs (
                id TEXT PRIMARY KEY,
                world_id TEXT NOT NULL REFERENCES worlds(id) ON DELETE CASCADE,
                description TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relationships (
                id TEXT PRIMARY KEY,
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                relation TEXT NOT NULL,
                weight REAL NOT NULL DEFAULT 1.0
            );

            CREATE TABLE IF NOT EXISTS timeline_entries (
                id TEXT PRIMARY KEY,
                entity_id TEXT NOT NULL,
                change_type TEXT NOT NULL,
                before_state TEXT NOT NULL,
                after_state TEXT NOT NULL,
                trigger_event_id TEXT NOT NULL REFERENCES events(id),
                significance REAL NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS cost_ledger (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                stage INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                prompt_tokens INTEGER NOT NULL,
                completion_tokens INTEGER NOT NULL,
                usd_cost REAL NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS checkpoints (
                job_id TEXT NOT NULL,
                stage INTEGER NOT NULL,
                context_json TEXT NOT NULL,
                cumulative_cost REAL NOT NULL,
                cumulative_prompt_tokens INTEGER NOT NULL,
                cumulative_completion_tokens INTEGER NOT NULL,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (job_id, stage)
            );

            CREATE INDEX IF NOT EXISTS idx_characters_world ON characters(world_id);
            CREATE INDEX IF NOT EXISTS idx_events_world ON events(world_id);
            CREATE INDEX IF NOT EXISTS idx_timeline_entity ON timeline_entries(entity_id);
            CREATE INDEX IF NOT EXISTS idx_cost_ledger_job ON cost_ledger(job_id, stage);
            ",
        )?;
        Ok(())
    }

    /// Runs `f` with every write it performs against this store wrapped in
    /// one SQLite transaction, committed together or rolled back together —
    /// never a partial write. Used by the orchestrator to make a stage's
    /// memory-entity writes and its checkpoint row land atomically, per the
    /// "memory + checkpoint together or neither" resume rule.
    pub fn atomically<T>(&self, f: impl FnOnce(&MemoryStore) -> Result<T, MemoryError>) -> Result<T, MemoryError> {
        self.conn.execute_batch("BEGIN IMMEDIATE").map_err(MemoryError::from)?;
        match f(self) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT").map_err(MemoryError::from)?;
                Ok(value)
            }
            Err(err) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(err)
            }
        }
    }

    // ---- Structural: worlds ----

    pub fn put_world(&self, job_id: &str, w: NewWorld) -> Result<String, MemoryError> {
        let id = new_id("world");
        self.conn.execute(
            "INSERT INTO worlds (id, job_id, rules_of_reality, boundaries, anomalies, core_conflict, existential_theme)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                job_id,
                join_list(&w.rules_of_reality),
                join_list(&w.boundaries),
                join_list(&w.anomalies),
                w.core_conflict,
                w.existential_theme,
            ],
        )?;
        Ok(id)
    }

    pub fn get_world(&self, id: &str) -> Result<Option<World>, MemoryError> {
        self.conn
            .query_row(
                "SELECT id, job_id, rules_of_reality, boundaries, anomalies, core_conflict, existential_theme
                 FROM worlds WHERE id = ?1",
                params![id],
                |row| {
                    Ok(World {
                        id: row.get(0)?,
                        job_id: row.get(1)?,
                        rules_of_reality: split_list(&row.get::<_, String>(2)?),
                        boundaries: split_list(&row.get::<_, String>(3)?),
                        anomalies: split_list(&row.get::<_, String>(4)?),
                        core_conflict: row.get(5)?,
                        existential_theme: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(MemoryError::from)
    }

    pub fn list_worlds(&self, job_id: &str) -> Result<Vec<World>, MemoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, job_id, rules_of_reality, boundaries, anomalies, core_conflict, existential_theme
             FROM worlds WHERE job_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![job_id], |row| {
            Ok(World {
                id: row.get(0)?,
                job_id: row.get(1)?,
                rules_of_reality: split_list(&row.get::<_, String>(2)?),
                boundaries: split_list(&row.get::<_, String>(3)?),
                anomalies: split_list(&row.get::<_, String>(4)?),
                core_conflict: row.get(5)?,
                existential_theme: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::from)
    }

    // ---- Structural: characters ----

    pub fn put_character(&self, c: NewCharacter) -> Result<String, MemoryError> {
        if self.get_world(&c.world_id)?.is_none() {
            return Err(MemoryError::NotFound { store: "structural", id: c.world_id.clone() });
        }
        let id = new_id("character");
        self.conn.execute(
            "INSERT INTO characters (id, world_id, name, internal_trajectory, contradictions, cognitive_limits, evolution_capacity)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                c.world_id,
                c.name,
                c.internal_trajectory,
                join_list(&c.contradictions),
                join_list(&c.cognitive_limits),
                c.evolution_capacity,
            ],
        )?;
        Ok(id)
    }

    pub fn list_characters(&self, world_id: &str) -> Result<Vec<Character>, MemoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, world_id, name, internal_trajectory, contradictions, cognitive_limits, evolution_capacity
             FROM characters WHERE world_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![world_id], |row| {
            Ok(Character {
                id: row.get(0)?,
                world_id: row.get(1)?,
                name: row.get(2)?,
                internal_trajectory: row.get(3)?,
                contradictions: split_list(&row.get::<_, String>(4)?),
                cognitive_limits: split_list(&row.get::<_, String>(5)?),
                evolution_capacity: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::from)
    }

    pub fn get_character(&self, id: &str) -> Result<Option<Character>, MemoryError> {
        self.conn
            .query_row(
                "SELECT id, world_id, name, internal_trajectory, contradictions, cognitive_limits, evolution_capacity
                 FROM characters WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Character {
                        id: row.get(0)?,
                        world_id: row.get(1)?,
                        name: row.get(2)?,
                        internal_trajectory: row.get(3)?,
                        contradictions: split_list(&row.get::<_, String>(4)?),
                        cognitive_limits: split_list(&row.get::<_, String>(5)?),
                        evolution_capacity: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(MemoryError::from)
    }

    // ---- Semantic: events ----

    pub fn put_event(&self, e: NewEvent) -> Result<String, MemoryError> {
        let id = new_id("event");
        self.conn.execute(
            "INSERT INTO events (id, world_id, participants, location, description, consequences, story_timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                e.world_id,
                join_list(&e.participants),
                e.location,
                e.description,
                e.consequences,
                e.story_timestamp,
            ],
        )?;
        Ok(id)
    }

    pub fn get_event(&self, id: &str) -> Result<Option<Event>, MemoryError> {
        self.conn
            .query_row(
                "SELECT id, world_id, participants, location, description, consequences, story_timestamp
                 FROM events WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Event {
                        id: row.get(0)?,
                        world_id: row.get(1)?,
                        participants: split_list(&row.get::<_, String>(2)?),
                        location: row.get(3)?,
                        description: row.get(4)?,
                        consequences: row.get(5)?,
                        story_timestamp: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(MemoryError::from)
    }

    pub fn list_events(&self, world_id: &str) -> Result<Vec<Event>, MemoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, world_id, participants, location, description, consequences, story_timestamp
             FROM events WHERE world_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![world_id], |row| {
            Ok(Event {
                id: row.get(0)?,
                world_id: row.get(1)?,
                participants: split_list(&row.get::<_, String>(2)?),
                location: row.get(3)?,
                description: row.get(4)?,
                consequences: row.get(5)?,
                story_timestamp: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::from)
    }

    // ---- Semantic: relationships (link) ----

    pub fn link(&self, from_id: &str, to_id: &str, relation: &str, weight: f64) -> Result<String, MemoryError> {
        let id = new_id("relationship");
        self.conn.execute(
            "INSERT INTO relationships (id, from_id, to_id, relation, weight) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, from_id, to_id, relation, weight],
        )?;
        Ok(id)
    }

    pub fn list_relationships(&self, entity_id: &str) -> Result<Vec<Relationship>, MemoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, from_id, to_id, relation, weight FROM relationships WHERE from_id = ?1 OR to_id = ?1",
        )?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok(Relationship {
                id: row.get(0)?,
                from_id: row.get(1)?,
                to_id: row.get(2)?,
                relation: row.get(3)?,
                weight: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::from)
    }

    // ---- Evolutionary: timeline entries ----

    /// Insert a timeline entry. Enforces invariant 2: both the
    /// referenced entity and the triggering event must already exist.
    pub fn put_timeline_entry(&self, t: NewTimelineEntry) -> Result<String, MemoryError> {
        if self.get_character(&t.entity_id)?.is_none() && self.get_world(&t.entity_id)?.is_none() {
            return Err(MemoryError::DanglingLink { target: t.entity_id.clone() });
        }
        if self.get_event(&t.trigger_event_id)?.is_none() {
            return Err(MemoryError::DanglingLink { target: t.trigger_event_id.clone() });
        }
        let id = new_id("timeline");
        self.conn.execute(
            "INSERT INTO timeline_entries (id, entity_id, change_type, before_state, after_state, trigger_event_id, significance)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                t.entity_id,
                t.change_type,
                t.before_state,
                t.after_state,
                t.trigger_event_id,
                t.significance,
            ],
        )?;
        Ok(id)
    }

    pub fn list_timeline(&self, entity_id: &str) -> Result<Vec<TimelineEntry>, MemoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, entity_id, change_type, before_state, after_state, trigger_event_id, significance
             FROM timeline_entries WHERE entity_id = ?1 ORDER BY created_at",
        )?;
        let rows = stmt.query_map(params![entity_id], |row| {
            Ok(TimelineEntry {
                id: row.get(0)?,
                entity_id: row.get(1)?,
                change_type: row.get(2)?,
                before_state: row.get(3)?,
                after_state: row.get(4)?,
                trigger_event_id: row.get(5)?,
                significance: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::from)
    }

    // ---- Cost ledger ----

    pub fn record_cost(
        &self,
        job_id: &str,
        stage: u8,
        model_id: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        usd_cost: f64,
    ) -> Result<(), MemoryError> {
        self.conn.execute(
            "INSERT INTO cost_ledger (job_id, stage, model_id, prompt_tokens, completion_tokens, usd_cost)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![job_id, stage, model_id, prompt_tokens as i64, completion_tokens as i64, usd_cost],
        )?;
        Ok(())
    }

    pub fn total_cost(&self, job_id: &str) -> Result<f64, MemoryError> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(usd_cost), 0.0) FROM cost_ledger WHERE job_id = ?1",
                params![job_id],
                |row| row.get(0),
            )
            .map_err(MemoryError::from)
    }

    // ---- Checkpoints ----
    //
    // Addressable by (job_id, stage), immutable once written.
    // `context_json` is an opaque serialized `PipelineContext` snapshot —
    // the store has no dependency on `narraforge-common`'s context shape,
    // it just persists and returns bytes the Checkpoint Manager serializes.

    pub fn write_checkpoint(
        &self,
        job_id: &str,
        stage: u8,
        context_json: &str,
        cumulative_cost: f64,
        cumulative_prompt_tokens: u64,
        cumulative_completion_tokens: u64,
    ) -> Result<(), MemoryError> {
        self.conn.execute(
            "INSERT INTO checkpoints (job_id, stage, context_json, cumulative_cost, cumulative_prompt_tokens, cumulative_completion_tokens)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(job_id, stage) DO NOTHING",
            params![
                job_id,
                stage,
                context_json,
                cumulative_cost,
                cumulative_prompt_tokens as i64,
                cumulative_completion_tokens as i64,
            ],
        )?;
        Ok(())
    }

    pub fn read_checkpoint(&self, job_id: &str, stage: u8) -> Result<Option<CheckpointRow>, MemoryError> {
        self.conn
            .query_row(
                "SELECT context_json, cumulative_cost, cumulative_prompt_tokens, cumulative_completion_tokens
                 FROM checkpoints WHERE job_id = ?1 AND stage = ?2",
                params![job_id, stage],
                |row| {
                    Ok(CheckpointRow {
                        stage,
                        context_json: row.get(0)?,
                        cumulative_cost: row.get(1)?,
                        cumulative_prompt_tokens: row.get::<_, i64>(2)? as u64,
                        cumulative_completion_tokens: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()
            .map_err(MemoryError::from)
    }

    /// The highest-numbered stage with a persisted checkpoint for `job_id`,
    /// or `None` if the job has no checkpoints at all.
    pub fn latest_checkpoint(&self, job_id: &str) -> Result<Option<CheckpointRow>, MemoryError> {
        let max_stage: Option<u8> = self
            .conn
            .query_row("SELECT MAX(stage) FROM checkpoints WHERE job_id = ?1", params![job_id], |row| row.get(0))
            .optional()
            .map_err(MemoryError::from)?
            .flatten();
        match max_stage {
            Some(stage) => self.read_checkpoint(job_id, stage),
            None => Ok(None),
        }
    }

    /// Delete all checkpoints for `job_id`.
    pub fn delete_checkpoints(&self, job_id: &str) -> Result<(), MemoryError> {
        self.conn.execute("DELETE FROM checkpoints WHERE job_id = ?1", params![job_id])?;
        Ok(())
    }

    /// All distinct job ids with at least one checkpoint older than
    /// `older_than_seconds`, used by the retention sweep at job-start time.
    pub fn jobs_with_stale_checkpoints(&self, older_than_seconds: i64) -> Result<Vec<String>, MemoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT job_id FROM checkpoints
             WHERE created_at < datetime('now', ?1 || ' seconds')",
        )?;
        let rows = stmt.query_map(params![format!("-{older_than_seconds}")], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(MemoryError::from)
    }

    // ---- Export / import (expansion.json seeding a continuation job) ----

    /// Snapshots a world's entire structural/semantic/evolutionary graph:
    /// the world itself, its characters, its events, every relationship
    /// touching any of those entities, and the full evolutionary timeline.
    /// Ids are carried verbatim so `import_world` into a fresh store
    /// reproduces an isomorphic graph rather than a renamed copy.
    pub fn export_world(&self, world_id: &str) -> Result<WorldExport, MemoryError> {
        let world = self.get_world(world_id)?.ok_or_else(|| MemoryError::NotFound { store: "structural", id: world_id.to_string() })?;
        let characters = self.list_characters(world_id)?;
        let events = self.list_events(world_id)?;

        let mut entity_ids: Vec<String> = vec![world.id.clone()];
        entity_ids.extend(characters.iter().map(|c| c.id.clone()));
        entity_ids.extend(events.iter().map(|e| e.id.clone()));

        let mut relationships = Vec::new();
        let mut seen_relationship_ids = std::collections::HashSet::new();
        for entity_id in &entity_ids {
            for rel in self.list_relationships(entity_id)? {
                if seen_relationship_ids.insert(rel.id.clone()) {
                    relationships.push(rel);
                }
            }
        }

        let mut timeline_entries = Vec::new();
        let mut seen_timeline_ids = std::collections::HashSet::new();
        for entity_id in &entity_ids {
            for entry in self.list_timeline(entity_id)? {
                if seen_timeline_ids.insert(entry.id.clone()) {
                    timeline_entries.push(entry);
                }
            }
        }

        Ok(WorldExport { world, characters, events, relationships, timeline_entries })
    }

    /// Re-inserts a previously exported world graph into this store,
    /// preserving every id, so the result is isomorphic to the original
    /// rather than a fresh-id copy. Errors if any id already exists (the
    /// caller is expected to import into a fresh memory, per the testable
    /// property in the spec: "re-importing into a fresh memory").
    pub fn import_world(&self, export: &WorldExport) -> Result<(), MemoryError> {
        self.atomically(|store| {
            store.conn.execute(
                "INSERT INTO worlds (id, job_id, rules_of_reality, boundaries, anomalies, core_conflict, existential_theme)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    export.world.id,
                    export.world.job_id,
                    join_list(&export.world.rules_of_reality),
                    join_list(&export.world.boundaries),
                    join_list(&export.world.anomalies),
                    export.world.core_conflict,
                    export.world.existential_theme,
                ],
            )?;
            for c in &export.characters {
                store.conn.execute(
                    "INSERT INTO characters (id, world_id, name, internal_trajectory, contradictions, cognitive_limits, evolution_capacity)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        c.id,
                        c.world_id,
                        c.name,
                        c.internal_trajectory,
                        join_list(&c.contradictions),
                        join_list(&c.cognitive_limits),
                        c.evolution_capacity,
                    ],
                )?;
            }
            for e in &export.events {
                store.conn.execute(
                    "INSERT INTO events (id, world_id, participants, location, description, consequences, story_timestamp)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![e.id, e.world_id, join_list(&e.participants), e.location, e.description, e.consequences, e.story_timestamp],
                )?;
            }
            for r in &export.relationships {
                store.conn.execute(
                    "INSERT INTO relationships (id, from_id, to_id, relation, weight) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![r.id, r.from_id, r.to_id, r.relation, r.weight],
                )?;
            }
            for t in &export.timeline_entries {
                store.conn.execute(
                    "INSERT INTO timeline_entries (id, entity_id, change_type, before_state, after_state, trigger_event_id, significance)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![t.id, t.entity_id, t.change_type, t.before_state, t.after_state, t.trigger_event_id, t.significance],
                )?;
            }
            Ok(())
        })
    }
}

/// A fully self-contained snapshot of one world's structural, semantic, and
/// evolutionary state, suitable for serialising into `expansion.json` (spec
/// §6 output manifest) and re-importing to seed a continuation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldExport {
    pub world: World,
    pub characters: Vec<Character>,
    pub events: Vec<Event>,
    pub relationships: Vec<Relationship>,
    pub timeline_entries: Vec<TimelineEntry>,
}

#[derive(Debug, Clone)]
pub struct CheckpointRow {
    pub stage: u8,
    pub context_json: String,
    pub cumulative_cost: f64,
    pub cumulative_prompt_tokens: u64,
    pub cumulative_completion_tokens: u64,
}

/// Construction payloads (the "put" argument), kept separate from the
/// stored domain type since `id` is generated by the store, not the caller.
#[derive(Debug, Clone, Default)]
pub struct NewWorld {
    pub rules_of_reality: Vec<String>,
    pub boundaries: Vec<String>,
    pub anomalies: Vec<String>,
    pub core_conflict: String,
    pub existential_theme: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewCharacter {
    pub world_id: String,
    pub name: String,
    pub internal_trajectory: String,
    pub contradictions: Vec<String>,
    pub cognitive_limits: Vec<String>,
    pub evolution_capacity: f64,
}

#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub world_id: String,
    pub participants: Vec<String>,
    pub location: String,
    pub description: String,
    pub consequences: String,
    pub story_timestamp: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewTimelineEntry {
    pub entity_id: String,
    pub change_type: String,
    pub before_state: String,
    pub after_state: String,
    pub trigger_event_id: String,
    pub significance: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_fixture(store: &MemoryStore) -> String {
        store
            .put_world(
                "job-1",
                NewWorld {
                    rules_of_reality: vec!["magic costs memory".into()],
                    boundaries: vec!["the Veil".into()],
                    anomalies: vec![],
                    core_conflict: "order vs. chaos".into(),
                    existential_theme: "the price of knowledge".into(),
                },
            )
            .unwrap()
    }

    #[test]
    fn put_and_get_world_round_trips() {
        let store = MemoryStore::new_in_memory().unwrap();
        let id = world_fixture(&store);
        let world = store.get_world(&id).unwrap().unwrap();
        assert_eq!(world.core_conflict, "order vs. chaos");
        assert_eq!(world.rules_of_reality, vec!["magic costs memory".to_string()]);
    }

    #[test]
    fn character_requires_existing_world() {
        let store = MemoryStore::new_in_memory().unwrap();
        let err = store
            .put_character(NewCharacter { world_id: "nonexistent".into(), evolution_capacity: 0.5, ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
    }

    #[test]
    fn character_count_matches_list_after_inserts() {
        let store = MemoryStore::new_in_memory().unwrap();
        let world_id = world_fixture(&store);
        store
            .put_character(NewCharacter {
                world_id: world_id.clone(),
                name: "Aris".into(),
                internal_trajectory: "grows".into(),
                contradictions: vec!["wants peace but craves power".into()],
                cognitive_limits: vec!["overconfidence".into()],
                evolution_capacity: 0.6,
            })
            .unwrap();
        store
            .put_character(NewCharacter {
                world_id: world_id.clone(),
                name: "Belor".into(),
                internal_trajectory: "falls".into(),
                contradictions: vec!["loyal but envious".into()],
                cognitive_limits: vec!["pride".into()],
                evolution_capacity: 0.3,
            })
            .unwrap();
        assert_eq!(store.list_characters(&world_id).unwrap().len(), 2);
    }

    #[test]
    fn timeline_entry_requires_existing_event() {
        let store = MemoryStore::new_in_memory().unwrap();
        let world_id = world_fixture(&store);
        let character_id = store
            .put_character(NewCharacter {
                world_id: world_id.clone(),
                name: "Aris".into(),
                internal_trajectory: "grows".into(),
                contradictions: vec!["x".into()],
                cognitive_limits: vec!["y".into()],
                evolution_capacity: 0.5,
            })
            .unwrap();
        let err = store
            .put_timeline_entry(NewTimelineEntry {
                entity_id: character_id,
                change_type: "betrayal".into(),
                before_state: "trusting".into(),
                after_state: "wary".into(),
                trigger_event_id: "nonexistent-event".into(),
                significance: 0.8,
            })
            .unwrap_err();
        assert!(matches!(err, MemoryError::DanglingLink { .. }));
    }

    #[test]
    fn timeline_entry_succeeds_with_real_entity_and_event() {
        let store = MemoryStore::new_in_memory().unwrap();
        let world_id = world_fixture(&store);
        let character_id = store
            .put_character(NewCharacter {
                world_id: world_id.clone(),
                name: "Aris".into(),
                internal_trajectory: "grows".into(),
                contradictions: vec!["x".into()],
                cognitive_limits: vec!["y".into()],
                evolution_capacity: 0.5,
            })
            .unwrap();
        let event_id = store
            .put_event(NewEvent {
                world_id: world_id.clone(),
                participants: vec![character_id.clone()],
                location: "the Spire".into(),
                description: "the betrayal at dawn".into(),
                consequences: "alliance broken".into(),
                story_timestamp: "day 3".into(),
            })
            .unwrap();
        let entry_id = store
            .put_timeline_entry(NewTimelineEntry {
                entity_id: character_id,
                change_type: "betrayal".into(),
                before_state: "trusting".into(),
                after_state: "wary".into(),
                trigger_event_id: event_id,
                significance: 0.8,
            })
            .unwrap();
        assert!(!entry_id.is_empty());
    }

    #[test]
    fn link_creates_queryable_relationship() {
        let store = MemoryStore::new_in_memory().unwrap();
        store.link("char-a", "char-b", "rival_of", 0.7).unwrap();
        let rels = store.list_relationships("char-a").unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].relation, "rival_of");
    }

    #[test]
    fn checkpoint_round_trips_and_is_immutable() {
        let store = MemoryStore::new_in_memory().unwrap();
        store.write_checkpoint("job-1", 3, "{\"k\":1}", 0.5, 100, 50).unwrap();
        // Second write for the same (job, stage) is a no-op, not an overwrite.
        store.write_checkpoint("job-1", 3, "{\"k\":2}", 9.9, 1, 1).unwrap();
        let row = store.read_checkpoint("job-1", 3).unwrap().unwrap();
        assert_eq!(row.context_json, "{\"k\":1}");
        assert_eq!(row.cumulative_cost, 0.5);
    }

    #[test]
    fn latest_checkpoint_returns_highest_stage() {
        let store = MemoryStore::new_in_memory().unwrap();
        store.write_checkpoint("job-1", 1, "{}", 0.1, 10, 5).unwrap();
        store.write_checkpoint("job-1", 2, "{}", 0.2, 20, 10).unwrap();
        let latest = store.latest_checkpoint("job-1").unwrap().unwrap();
        assert_eq!(latest.stage, 2);
    }

    #[test]
    fn latest_checkpoint_is_none_for_unknown_job() {
        let store = MemoryStore::new_in_memory().unwrap();
        assert!(store.latest_checkpoint("nope").unwrap().is_none());
    }

    #[test]
    fn delete_checkpoints_clears_all_stages_for_job() {
        let store = MemoryStore::new_in_memory().unwrap();
        store.write_checkpoint("job-1", 1, "{}", 0.1, 10, 5).unwrap();
        store.delete_checkpoints("job-1").unwrap();
        assert!(store.latest_checkpoint("job-1").unwrap().is_none());
    }

    #[test]
    fn cost_ledger_accumulates_per_job() {
        let store = MemoryStore::new_in_memory().unwrap();
        store.record_cost("job-1", 6, "advanced-model", 1000, 500, 0.01).unwrap();
        store.record_cost("job-1", 6, "advanced-model", 800, 400, 0.008).unwrap();
        let total = store.total_cost("job-1").unwrap();
        assert!((total - 0.018).abs() < 1e-9);
    }

    #[test]
    fn export_world_then_import_into_fresh_store_is_isomorphic() {
        let source = MemoryStore::new_in_memory().unwrap();
        let world_id = world_fixture(&source);
        let character_id = source
            .put_character(NewCharacter {
                world_id: world_id.clone(),
                name: "Aris".into(),
                internal_trajectory: "grows".into(),
                contradictions: vec!["wants peace but craves power".into()],
                cognitive_limits: vec!["overconfidence".into()],
                evolution_capacity: 0.6,
            })
            .unwrap();
        let event_id = source
            .put_event(NewEvent {
                world_id: world_id.clone(),
                participants: vec![character_id.clone()],
                location: "the Spire".into(),
                description: "the betrayal at dawn".into(),
                consequences: "alliance broken".into(),
                story_timestamp: "day 3".into(),
            })
            .unwrap();
        source.link(&character_id, &world_id, "bound_to", 1.0).unwrap();
        source
            .put_timeline_entry(NewTimelineEntry {
                entity_id: character_id.clone(),
                change_type: "betrayal".into(),
                before_state: "trusting".into(),
                after_state: "wary".into(),
                trigger_event_id: event_id.clone(),
                significance: 0.8,
            })
            .unwrap();

        let export = source.export_world(&world_id).unwrap();
        assert_eq!(export.characters.len(), 1);
        assert_eq!(export.events.len(), 1);
        assert_eq!(export.relationships.len(), 1);
        assert_eq!(export.timeline_entries.len(), 1);

        // Round-trips through JSON the way `expansion.json` would.
        let json = serde_json::to_string(&export).unwrap();
        let reloaded: WorldExport = serde_json::from_str(&json).unwrap();

        let target = MemoryStore::new_in_memory().unwrap();
        target.import_world(&reloaded).unwrap();

        let imported_world = target.get_world(&world_id).unwrap().unwrap();
        assert_eq!(imported_world, source.get_world(&world_id).unwrap().unwrap());

        let imported_characters = target.list_characters(&world_id).unwrap();
        assert_eq!(imported_characters, source.list_characters(&world_id).unwrap());

        let imported_events = target.list_events(&world_id).unwrap();
        assert_eq!(imported_events, source.list_events(&world_id).unwrap());

        let imported_rels = target.list_relationships(&character_id).unwrap();
        assert_eq!(imported_rels, source.list_relationships(&character_id).unwrap());

        let imported_timeline = target.list_timeline(&character_id).unwrap();
        assert_eq!(imported_timeline, source.list_timeline(&character_id).unwrap());
    }

    #[test]
    fn export_world_errors_for_unknown_world() {
        let store = MemoryStore::new_in_memory().unwrap();
        let err = store.export_world("nonexistent").unwrap_err();
        assert!(matches!(err, MemoryError::NotFound { .. }));
    }
}
