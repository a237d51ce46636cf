use atimer_types::models::{ConnectionRecord, EndpointCoords};

/// Registry row as stored in SQLite. Distinct from the wire-level
/// `ConnectionRecord` so the column layout can change independently.
pub struct ConnectionRow {
    pub connection_id: String,
    pub member_id: String,
    pub api_id: String,
    pub region: String,
    pub stage: String,
    pub connected_at: String,
}

impl From<ConnectionRow> for ConnectionRecord {
    fn from(row: ConnectionRow) -> Self {
        ConnectionRecord {
            connection_id: row.connection_id,
            member_id: row.member_id,
            endpoint: EndpointCoords {
                region: row.region,
                api_id: row.api_id,
                stage: row.stage,
            },
        }
    }
}
