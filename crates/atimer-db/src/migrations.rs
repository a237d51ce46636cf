use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS connections (
            connection_id   TEXT PRIMARY KEY,
            member_id       TEXT NOT NULL,
            api_id          TEXT NOT NULL,
            region          TEXT NOT NULL,
            stage           TEXT NOT NULL,
            connected_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_connections_member
            ON connections(member_id);
        ",
    )?;

    info!("Registry migrations complete");
    Ok(())
}
