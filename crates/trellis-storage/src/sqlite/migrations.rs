//! Versioned schema migrations.
//!
//! The runner ensures a `_migrations(version, name, applied_at)` table, then
//! applies each unseen script inside its own transaction and records it.
//! Already-applied migrations stay applied when a later one fails.
//!
//! Timestamps are stored as TEXT in ISO 8601 format (SQLite has no native
//! datetime type). Booleans are INTEGER 0/1. JSON arrays are TEXT.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::sqlite::store::format_datetime;

/// One migration script.
pub(crate) struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
    /// Set for full-table rebuilds: referential checks are toggled off
    /// around the migration's transaction and restored before returning.
    pub toggles_foreign_keys: bool,
}

/// The static ordered migration list. Append-only.
pub(crate) const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: INITIAL_SCHEMA,
        toggles_foreign_keys: false,
    },
    Migration {
        version: 2,
        name: "knowledge_graph",
        sql: KNOWLEDGE_GRAPH,
        toggles_foreign_keys: false,
    },
    Migration {
        version: 3,
        name: "pipeline_v3",
        sql: PIPELINE_V3,
        toggles_foreign_keys: true,
    },
];

/// Applies all pending migrations on the given connection.
pub(crate) fn run_on_conn(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version    INTEGER PRIMARY KEY,
            name       TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
    )
    .map_err(|e| StoreError::Migration {
        name: "_migrations".into(),
        reason: e.to_string(),
    })?;

    for migration in MIGRATIONS {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM _migrations WHERE version = ?1",
                [migration.version],
                |row| row.get::<_, i64>(0),
            )
            .unwrap_or(0)
            > 0;

        if already_applied {
            debug!(version = migration.version, name = migration.name, "migration already applied");
            continue;
        }

        if migration.toggles_foreign_keys {
            set_foreign_keys(conn, false, migration.name)?;
        }
        let result = apply_one(conn, migration);
        if migration.toggles_foreign_keys {
            // Restore referential checks even when the migration failed.
            set_foreign_keys(conn, true, migration.name)?;
        }
        result?;

        info!(version = migration.version, name = migration.name, "migration applied");
    }

    Ok(())
}

fn apply_one(conn: &Connection, migration: &Migration) -> Result<()> {
    let tx = conn.unchecked_transaction().map_err(|e| StoreError::Migration {
        name: migration.name.to_string(),
        reason: format!("failed to begin: {e}"),
    })?;

    tx.execute_batch(migration.sql)
        .map_err(|e| StoreError::Migration {
            name: migration.name.to_string(),
            reason: e.to_string(),
        })?;

    tx.execute(
        "INSERT INTO _migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.name,
            format_datetime(&chrono::Utc::now()),
        ],
    )
    .map_err(|e| StoreError::Migration {
        name: migration.name.to_string(),
        reason: format!("failed to record: {e}"),
    })?;

    tx.commit().map_err(|e| StoreError::Migration {
        name: migration.name.to_string(),
        reason: format!("failed to commit: {e}"),
    })
}

fn set_foreign_keys(conn: &Connection, on: bool, migration: &str) -> Result<()> {
    let sql = if on {
        "PRAGMA foreign_keys = ON"
    } else {
        "PRAGMA foreign_keys = OFF"
    };
    conn.execute_batch(sql).map_err(|e| StoreError::Migration {
        name: migration.to_string(),
        reason: format!("failed to toggle foreign_keys: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Migration 1: the v2 workflow schema
// ---------------------------------------------------------------------------

const INITIAL_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id            TEXT PRIMARY KEY,
    name          TEXT NOT NULL UNIQUE,
    summary       TEXT NOT NULL,
    description   TEXT,
    -- Legacy v2 status; carried for old data, never validated.
    status        TEXT,
    search_vector TEXT NOT NULL DEFAULT '',
    version       INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    modified_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS features (
    id            TEXT PRIMARY KEY,
    project_id    TEXT REFERENCES projects(id),
    name          TEXT NOT NULL,
    summary       TEXT NOT NULL,
    description   TEXT,
    status        TEXT NOT NULL DEFAULT 'NEW',
    priority      TEXT NOT NULL DEFAULT 'MEDIUM',
    search_vector TEXT NOT NULL DEFAULT '',
    version       INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    modified_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_features_project ON features(project_id);
CREATE INDEX IF NOT EXISTS idx_features_status ON features(status);

CREATE TABLE IF NOT EXISTS tasks (
    id            TEXT PRIMARY KEY,
    feature_id    TEXT REFERENCES features(id),
    project_id    TEXT REFERENCES projects(id),
    title         TEXT NOT NULL,
    summary       TEXT NOT NULL,
    description   TEXT,
    status        TEXT NOT NULL DEFAULT 'NEW',
    priority      TEXT NOT NULL DEFAULT 'MEDIUM',
    complexity    INTEGER NOT NULL DEFAULT 5,
    search_vector TEXT NOT NULL DEFAULT '',
    version       INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    modified_at   TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_tasks_feature ON tasks(feature_id);
CREATE INDEX IF NOT EXISTS idx_tasks_project ON tasks(project_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

-- v2 BLOCKS edges; folded into blocked_by arrays by migration 3.
CREATE TABLE IF NOT EXISTS dependencies (
    entity_id     TEXT NOT NULL,
    depends_on_id TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    PRIMARY KEY (entity_id, depends_on_id)
);

CREATE TABLE IF NOT EXISTS sections (
    id                TEXT PRIMARY KEY,
    entity_type       TEXT NOT NULL,
    entity_id         TEXT NOT NULL,
    title             TEXT NOT NULL,
    usage_description TEXT NOT NULL DEFAULT '',
    content           TEXT NOT NULL DEFAULT '',
    content_format    TEXT NOT NULL DEFAULT 'MARKDOWN',
    ordinal           INTEGER NOT NULL,
    tags              TEXT NOT NULL DEFAULT '',
    version           INTEGER NOT NULL DEFAULT 1,
    created_at        TEXT NOT NULL,
    modified_at       TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_sections_owner_ordinal
    ON sections(entity_type, entity_id, ordinal);

CREATE TABLE IF NOT EXISTS entity_tags (
    entity_type TEXT NOT NULL,
    entity_id   TEXT NOT NULL,
    tag         TEXT NOT NULL,
    PRIMARY KEY (entity_type, entity_id, tag)
);
CREATE INDEX IF NOT EXISTS idx_entity_tags_tag ON entity_tags(tag);

CREATE TABLE IF NOT EXISTS templates (
    id           TEXT PRIMARY KEY,
    name         TEXT NOT NULL UNIQUE,
    description  TEXT NOT NULL DEFAULT '',
    is_built_in  INTEGER NOT NULL DEFAULT 0,
    is_protected INTEGER NOT NULL DEFAULT 0,
    is_enabled   INTEGER NOT NULL DEFAULT 1,
    version      INTEGER NOT NULL DEFAULT 1,
    created_at   TEXT NOT NULL,
    modified_at  TEXT NOT NULL
);
"#;

// ---------------------------------------------------------------------------
// Migration 2: the knowledge graph
// ---------------------------------------------------------------------------

const KNOWLEDGE_GRAPH: &str = r#"
CREATE TABLE IF NOT EXISTS molecules (
    id                TEXT PRIMARY KEY,
    project_id        TEXT NOT NULL REFERENCES projects(id),
    name              TEXT NOT NULL,
    knowledge         TEXT,
    related_molecules TEXT NOT NULL DEFAULT '[]',
    version           INTEGER NOT NULL DEFAULT 1,
    created_at        TEXT NOT NULL,
    modified_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_molecules_project ON molecules(project_id);

CREATE TABLE IF NOT EXISTS atoms (
    id              TEXT PRIMARY KEY,
    project_id      TEXT NOT NULL REFERENCES projects(id),
    paths           TEXT NOT NULL,
    knowledge       TEXT,
    related_atoms   TEXT NOT NULL DEFAULT '[]',
    molecule_id     TEXT REFERENCES molecules(id),
    created_by_task TEXT,
    updated_by_task TEXT,
    version         INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL,
    modified_at     TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_atoms_project ON atoms(project_id);
CREATE INDEX IF NOT EXISTS idx_atoms_molecule ON atoms(molecule_id);

CREATE TABLE IF NOT EXISTS changelog (
    id          TEXT PRIMARY KEY,
    parent_type TEXT NOT NULL,
    parent_id   TEXT NOT NULL,
    task_id     TEXT NOT NULL,
    summary     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_changelog_parent ON changelog(parent_type, parent_id);
"#;

// ---------------------------------------------------------------------------
// Migration 3: the v3 pipeline refactor
// ---------------------------------------------------------------------------
//
// Rebuilds features and tasks with blocker columns, folds open v2 BLOCKS
// edges into the new blocked_by arrays (only where the array is empty --
// populated arrays always win), drops the edge table, and creates the
// pipeline lock row's table. Runs with referential checks disabled because
// the child tables are dropped and recreated wholesale.

const PIPELINE_V3: &str = r#"
CREATE TABLE features_v3 (
    id             TEXT PRIMARY KEY,
    project_id     TEXT REFERENCES projects(id),
    name           TEXT NOT NULL,
    summary        TEXT NOT NULL,
    description    TEXT,
    status         TEXT NOT NULL DEFAULT 'NEW',
    priority       TEXT NOT NULL DEFAULT 'MEDIUM',
    blocked_by     TEXT NOT NULL DEFAULT '[]',
    blocked_reason TEXT,
    related_to     TEXT NOT NULL DEFAULT '[]',
    search_vector  TEXT NOT NULL DEFAULT '',
    version        INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT NOT NULL,
    modified_at    TEXT NOT NULL
);

INSERT INTO features_v3 (id, project_id, name, summary, description, status, priority,
                         blocked_by, blocked_reason, related_to, search_vector, version,
                         created_at, modified_at)
SELECT id, project_id, name, summary, description, status, priority,
       '[]', NULL, '[]', search_vector, version, created_at, modified_at
FROM features;

UPDATE features_v3 SET blocked_by = (
    SELECT json_group_array(d.depends_on_id)
    FROM dependencies d WHERE d.entity_id = features_v3.id
)
WHERE blocked_by = '[]'
  AND EXISTS (SELECT 1 FROM dependencies d WHERE d.entity_id = features_v3.id);

DROP TABLE features;
ALTER TABLE features_v3 RENAME TO features;
CREATE INDEX idx_features_project ON features(project_id);
CREATE INDEX idx_features_status ON features(status);

CREATE TABLE tasks_v3 (
    id             TEXT PRIMARY KEY,
    feature_id     TEXT REFERENCES features(id),
    project_id     TEXT REFERENCES projects(id),
    title          TEXT NOT NULL,
    summary        TEXT NOT NULL,
    description    TEXT,
    status         TEXT NOT NULL DEFAULT 'NEW',
    priority       TEXT NOT NULL DEFAULT 'MEDIUM',
    complexity     INTEGER NOT NULL DEFAULT 5,
    blocked_by     TEXT NOT NULL DEFAULT '[]',
    blocked_reason TEXT,
    related_to     TEXT NOT NULL DEFAULT '[]',
    search_vector  TEXT NOT NULL DEFAULT '',
    version        INTEGER NOT NULL DEFAULT 1,
    created_at     TEXT NOT NULL,
    modified_at    TEXT NOT NULL
);

INSERT INTO tasks_v3 (id, feature_id, project_id, title, summary, description, status,
                      priority, complexity, blocked_by, blocked_reason, related_to,
                      search_vector, version, created_at, modified_at)
SELECT id, feature_id, project_id, title, summary, description, status,
       priority, complexity, '[]', NULL, '[]', search_vector, version,
       created_at, modified_at
FROM tasks;

UPDATE tasks_v3 SET blocked_by = (
    SELECT json_group_array(d.depends_on_id)
    FROM dependencies d WHERE d.entity_id = tasks_v3.id
)
WHERE blocked_by = '[]'
  AND EXISTS (SELECT 1 FROM dependencies d WHERE d.entity_id = tasks_v3.id);

DROP TABLE tasks;
ALTER TABLE tasks_v3 RENAME TO tasks;
CREATE INDEX idx_tasks_feature ON tasks(feature_id);
CREATE INDEX idx_tasks_project ON tasks(project_id);
CREATE INDEX idx_tasks_status ON tasks(status);

DROP TABLE dependencies;

CREATE TABLE _pipeline_config (
    id          INTEGER PRIMARY KEY CHECK (id = 1),
    config_json TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
"#;
