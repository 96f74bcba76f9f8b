//! Database schema definition for the graph store.

/// Database schema definition.
pub(crate) const SCHEMA: &str = r"
-- Entities. properties and metrics are JSON objects.
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    display_label TEXT NOT NULL,
    properties TEXT NOT NULL DEFAULT '{}',
    metrics TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type);

-- Tag assignments, normalized for indexed AND/OR queries
CREATE TABLE IF NOT EXISTS tags (
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    tag TEXT NOT NULL,
    PRIMARY KEY (node_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_tags_tag ON tags(tag);

-- Typed relationships. Identity is (source, target, type).
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY,
    source TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    metadata TEXT,
    UNIQUE (source, target, type)
);

CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target);
CREATE INDEX IF NOT EXISTS idx_edges_type ON edges(type);

-- Completion ledger: which unit finished on which entity
CREATE TABLE IF NOT EXISTS unit_runs (
    unit TEXT NOT NULL,
    node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    outcome TEXT NOT NULL,
    pass INTEGER NOT NULL,
    message TEXT,
    PRIMARY KEY (unit, node_id)
);
";
