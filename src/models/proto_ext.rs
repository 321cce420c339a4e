use crate::models::proto::{bulk_item_response::Outcome, BulkItemResponse, OpType, ReplicaStats};

impl BulkItemResponse {
    /// A response for an item which the primary applied with the given version.
    pub fn success(item_id: u32, op_type: OpType, doc_type: &str, id: &str, version: u64) -> Self {
        Self {
            item_id,
            op_type: op_type as i32,
            doc_type: doc_type.into(),
            id: id.into(),
            outcome: Some(Outcome::Version(version)),
        }
    }

    /// A response for an item which failed on the primary.
    pub fn failure(item_id: u32, op_type: OpType, doc_type: &str, id: &str, message: String) -> Self {
        Self {
            item_id,
            op_type: op_type as i32,
            doc_type: doc_type.into(),
            id: id.into(),
            outcome: Some(Outcome::Failure(message)),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(&self.outcome, Some(Outcome::Failure(_)))
    }

    /// The version assigned by the primary, if the item was applied.
    pub fn version(&self) -> Option<u64> {
        match &self.outcome {
            Some(Outcome::Version(version)) => Some(*version),
            _ => None,
        }
    }

    /// The failure message, if the item failed.
    pub fn failure_message(&self) -> Option<&str> {
        match &self.outcome {
            Some(Outcome::Failure(message)) => Some(message.as_str()),
            _ => None,
        }
    }
}

impl ReplicaStats {
    /// Stats for a fan out to `total` replicas whose outcomes were all awaited.
    pub fn awaited(total: u32, failed: u32) -> Self {
        Self {
            total,
            successful: total.saturating_sub(failed),
            failed,
            pending: 0,
        }
    }

    /// Stats for a fan out to `total` replicas whose outcomes were not awaited.
    pub fn pending(total: u32) -> Self {
        Self {
            total,
            successful: 0,
            failed: 0,
            pending: total,
        }
    }
}
