use serde::{Deserialize, Serialize};

/// Where a push for a connection must be sent: the gateway node that owns the socket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointCoords {
    pub region: String,
    pub api_id: String,
    pub stage: String,
}

impl EndpointCoords {
    pub fn new(
        region: impl Into<String>,
        api_id: impl Into<String>,
        stage: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            api_id: api_id.into(),
            stage: stage.into(),
        }
    }
}

/// One row per open realtime connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connection_id: String,
    pub member_id: String,
    pub endpoint: EndpointCoords,
}
