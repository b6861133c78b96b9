//! SQL migration definitions for the ContentForge database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: feeds, items, clusters, pipeline_runs, generated_articles",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Syndication sources
CREATE TABLE IF NOT EXISTS feeds (
    id                 TEXT PRIMARY KEY,
    site_id            TEXT NOT NULL,
    url                TEXT NOT NULL,
    poll_interval_mins INTEGER NOT NULL,
    last_polled_at     TEXT,
    last_poll_count    INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,
    UNIQUE(site_id, url)
);

CREATE INDEX IF NOT EXISTS idx_feeds_site ON feeds(site_id);

-- Topic clusters (membership lives on items.cluster_id)
CREATE TABLE IF NOT EXISTS clusters (
    id         TEXT PRIMARY KEY,
    site_id    TEXT,
    label      TEXT,
    summary    TEXT,
    created_at TEXT NOT NULL
);

-- Candidate items; (feed_id, guid) is the ingestion identity
CREATE TABLE IF NOT EXISTS items (
    id                TEXT PRIMARY KEY,
    feed_id           TEXT NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
    guid              TEXT NOT NULL,
    title             TEXT NOT NULL,
    link              TEXT,
    content           TEXT NOT NULL,
    published_at      TEXT,
    status            TEXT NOT NULL,
    seo_score         INTEGER,
    viral_score       INTEGER,
    combined_score    INTEGER,
    score_rationale   TEXT,
    facts_json        TEXT,
    keywords_json     TEXT,
    verification_json TEXT,
    embedding_json    TEXT,
    cluster_id        TEXT REFERENCES clusters(id),
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    UNIQUE(feed_id, guid)
);

CREATE INDEX IF NOT EXISTS idx_items_status ON items(status);
CREATE INDEX IF NOT EXISTS idx_items_combined_score ON items(combined_score);
CREATE INDEX IF NOT EXISTS idx_items_cluster ON items(cluster_id);

-- Audit record of generation -> assembly -> publish
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id                   TEXT PRIMARY KEY,
    site_id              TEXT NOT NULL,
    preset               TEXT NOT NULL,
    persona              TEXT,
    status               TEXT NOT NULL,
    source_item_ids_json TEXT NOT NULL,
    sections_json        TEXT NOT NULL DEFAULT '{}',
    assembled_html       TEXT,
    seo_json             TEXT,
    article_id           TEXT,
    remote_post_id       TEXT,
    remote_url           TEXT,
    error                TEXT,
    created_at           TEXT NOT NULL,
    updated_at           TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_site ON pipeline_runs(site_id);

-- One article per run
CREATE TABLE IF NOT EXISTS generated_articles (
    id         TEXT PRIMARY KEY,
    run_id     TEXT NOT NULL UNIQUE REFERENCES pipeline_runs(id),
    site_id    TEXT NOT NULL,
    title      TEXT NOT NULL,
    html       TEXT NOT NULL,
    seo_json   TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Per-site pipeline leases",
            sql: r#"
CREATE TABLE IF NOT EXISTS site_leases (
    site_id     TEXT PRIMARY KEY,
    holder      TEXT NOT NULL,
    acquired_at TEXT NOT NULL,
    expires_at  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
