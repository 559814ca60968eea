use rusqlite::Connection;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS identities (
    id          INTEGER PRIMARY KEY,
    name        TEXT UNIQUE NOT NULL,
    kind        TEXT NOT NULL,
    admin       INTEGER NOT NULL DEFAULT 0,
    provenance  TEXT NOT NULL,
    provider_id INTEGER,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS credentials (
    identity_id   INTEGER PRIMARY KEY,
    password_hash TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS access_keys (
    id              INTEGER PRIMARY KEY,
    key_id          TEXT UNIQUE NOT NULL,
    name            TEXT,
    secret_checksum BLOB NOT NULL,
    issued_for      INTEGER NOT NULL,
    expires_at      TEXT,
    provenance      TEXT NOT NULL DEFAULT 'runtime',
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS session_tokens (
    id              INTEGER PRIMARY KEY,
    token_id        TEXT UNIQUE NOT NULL,
    secret_checksum BLOB NOT NULL,
    identity_id     INTEGER NOT NULL,
    expires_at      TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS providers (
    id                  INTEGER PRIMARY KEY,
    name                TEXT UNIQUE NOT NULL,
    url                 TEXT NOT NULL,
    client_id           TEXT NOT NULL,
    client_secret       TEXT,
    client_secret_nonce TEXT,
    kind                TEXT NOT NULL,
    provenance          TEXT NOT NULL,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS groups (
    id         INTEGER PRIMARY KEY,
    name       TEXT UNIQUE NOT NULL,
    provenance TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id    INTEGER NOT NULL,
    identity_id INTEGER NOT NULL,
    PRIMARY KEY (group_id, identity_id)
);

CREATE TABLE IF NOT EXISTS grants (
    id         INTEGER PRIMARY KEY,
    subject    TEXT NOT NULL,
    resource   TEXT NOT NULL,
    privilege  TEXT NOT NULL,
    origin     TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(subject, resource, privilege)
);

CREATE TABLE IF NOT EXISTS destinations (
    id         INTEGER PRIMARY KEY,
    name       TEXT UNIQUE NOT NULL,
    kind       TEXT NOT NULL,
    endpoint   TEXT NOT NULL,
    ca         TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_access_keys_issued_for ON access_keys(issued_for);
CREATE INDEX IF NOT EXISTS idx_session_tokens_identity ON session_tokens(identity_id);
CREATE INDEX IF NOT EXISTS idx_grants_resource ON grants(resource);
CREATE INDEX IF NOT EXISTS idx_group_members_identity ON group_members(identity_id);
"#;

pub(super) fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA)
}
