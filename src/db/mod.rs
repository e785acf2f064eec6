//! The bundle file: schema, session pragmas, and index creation.

use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::Connection;

pub mod batch;

const TABLE_DEFINITIONS: &str = "
    CREATE TABLE \"meta\" (
        \"id\" integer PRIMARY KEY NOT NULL,
        \"lsifVersion\" text NOT NULL,
        \"sourcegraphVersion\" text NOT NULL,
        \"numResultChunks\" integer NOT NULL
    );

    CREATE TABLE \"documents\" (
        \"path\" text PRIMARY KEY NOT NULL,
        \"data\" blob NOT NULL
    );

    CREATE TABLE \"resultChunks\" (
        \"id\" integer PRIMARY KEY NOT NULL,
        \"data\" blob NOT NULL
    );

    CREATE TABLE \"definitions\" (
        \"id\" integer PRIMARY KEY NOT NULL,
        \"scheme\" text NOT NULL,
        \"identifier\" text NOT NULL,
        \"documentPath\" text NOT NULL,
        \"startLine\" integer NOT NULL,
        \"endLine\" integer NOT NULL,
        \"startCharacter\" integer NOT NULL,
        \"endCharacter\" integer NOT NULL
    );

    CREATE TABLE \"references\" (
        \"id\" integer PRIMARY KEY NOT NULL,
        \"scheme\" text NOT NULL,
        \"identifier\" text NOT NULL,
        \"documentPath\" text NOT NULL,
        \"startLine\" integer NOT NULL,
        \"endLine\" integer NOT NULL,
        \"startCharacter\" integer NOT NULL,
        \"endCharacter\" integer NOT NULL
    );
";

const INDEX_DEFINITIONS: &str = "
    CREATE INDEX \"idx_definitions\" ON \"definitions\" (\"scheme\", \"identifier\");
    CREATE INDEX \"idx_references\" ON \"references\" (\"scheme\", \"identifier\");
";

/// Open the bundle file, apply the durability-off session pragmas,
/// and create the tables. The bundle is written once into a scratch
/// path and discarded on any failure.
pub fn open_bundle(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)
        .with_context(|| format!("open bundle at {}", path.display()))?;
    conn.execute_batch(
        "
        PRAGMA synchronous = OFF;
        PRAGMA journal_mode = OFF;
        ",
    )
    .context("apply session pragmas")?;
    conn.execute_batch(TABLE_DEFINITIONS).context("create tables")?;
    Ok(conn)
}

/// Create the covering indexes. Runs after the data load commits; a
/// bundle is only valid once this has completed.
pub fn create_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(INDEX_DEFINITIONS).context("create indexes")
}
