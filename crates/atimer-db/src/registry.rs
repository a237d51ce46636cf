use std::sync::Arc;

use anyhow::Result;
use atimer_types::models::ConnectionRecord;

use crate::Database;

/// Directory of open realtime connections, keyed by connection id and
/// searchable by member id.
pub trait ConnectionRegistry: Send + Sync {
    /// Upsert by `connection_id`.
    fn put(&self, record: &ConnectionRecord) -> Result<()>;

    /// Idempotent; removing an absent id succeeds.
    fn delete_by_connection_id(&self, connection_id: &str) -> Result<()>;

    /// At most `limit` records for the member, most recent write first.
    fn find_by_member_id(&self, member_id: &str, limit: u32) -> Result<Vec<ConnectionRecord>>;
}

impl ConnectionRegistry for Database {
    fn put(&self, record: &ConnectionRecord) -> Result<()> {
        self.put_connection(record)
    }

    fn delete_by_connection_id(&self, connection_id: &str) -> Result<()> {
        self.delete_connection(connection_id).map(|_| ())
    }

    fn find_by_member_id(&self, member_id: &str, limit: u32) -> Result<Vec<ConnectionRecord>> {
        let rows = self.find_connections_by_member(member_id, limit)?;
        Ok(rows.into_iter().map(ConnectionRecord::from).collect())
    }
}

impl<T: ConnectionRegistry + ?Sized> ConnectionRegistry for Arc<T> {
    fn put(&self, record: &ConnectionRecord) -> Result<()> {
        (**self).put(record)
    }

    fn delete_by_connection_id(&self, connection_id: &str) -> Result<()> {
        (**self).delete_by_connection_id(connection_id)
    }

    fn find_by_member_id(&self, member_id: &str, limit: u32) -> Result<Vec<ConnectionRecord>> {
        (**self).find_by_member_id(member_id, limit)
    }
}

impl<T: ConnectionRegistry + ?Sized> ConnectionRegistry for &T {
    fn put(&self, record: &ConnectionRecord) -> Result<()> {
        (**self).put(record)
    }

    fn delete_by_connection_id(&self, connection_id: &str) -> Result<()> {
        (**self).delete_by_connection_id(connection_id)
    }

    fn find_by_member_id(&self, member_id: &str, limit: u32) -> Result<Vec<ConnectionRecord>> {
        (**self).find_by_member_id(member_id, limit)
    }
}
