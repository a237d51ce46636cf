use crate::Database;
use crate::models::ConnectionRow;
use anyhow::Result;
use atimer_types::models::{ConnectionRecord, EndpointCoords};
use rusqlite::Connection;

impl Database {
    // -- Connections --

    /// Upsert by connection id. `INSERT OR REPLACE` gives the row a fresh
    /// rowid, which is what `find_connections_by_member` orders on.
    pub fn put_connection(&self, record: &ConnectionRecord) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO connections (connection_id, member_id, api_id, region, stage)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    record.connection_id,
                    record.member_id,
                    record.endpoint.api_id,
                    record.endpoint.region,
                    record.endpoint.stage,
                ],
            )?;
            Ok(())
        })
    }

    /// Returns whether a row was actually removed. Absent ids are not an error.
    pub fn delete_connection(&self, connection_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM connections WHERE connection_id = ?1",
                [connection_id],
            )?;
            Ok(removed > 0)
        })
    }

    /// Most recently written rows first.
    pub fn find_connections_by_member(&self, member_id: &str, limit: u32) -> Result<Vec<ConnectionRow>> {
        self.with_conn(|conn| query_connections_by_member(conn, member_id, limit))
    }

    pub fn get_connection(&self, connection_id: &str) -> Result<Option<ConnectionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT connection_id, member_id, api_id, region, stage, connected_at
                 FROM connections WHERE connection_id = ?1",
            )?;
            let mut rows = stmt.query_map([connection_id], map_connection_row)?;
            Ok(rows.next().transpose()?)
        })
    }

    /// Drop every row owned by one gateway node. Returns the number removed.
    pub fn delete_connections_for_endpoint(&self, endpoint: &EndpointCoords) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM connections WHERE api_id = ?1 AND region = ?2 AND stage = ?3",
                rusqlite::params![endpoint.api_id, endpoint.region, endpoint.stage],
            )?;
            Ok(removed)
        })
    }
}

fn query_connections_by_member(conn: &Connection, member_id: &str, limit: u32) -> Result<Vec<ConnectionRow>> {
    // Served by idx_connections_member; rowid breaks ties towards the newest write.
    let mut stmt = conn.prepare(
        "SELECT connection_id, member_id, api_id, region, stage, connected_at
         FROM connections
         WHERE member_id = ?1
         ORDER BY rowid DESC
         LIMIT ?2",
    )?;

    let rows = stmt
        .query_map(rusqlite::params![member_id, limit], map_connection_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn map_connection_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConnectionRow> {
    Ok(ConnectionRow {
        connection_id: row.get(0)?,
        member_id: row.get(1)?,
        api_id: row.get(2)?,
        region: row.get(3)?,
        stage: row.get(4)?,
        connected_at: row.get(5)?,
    })
}
