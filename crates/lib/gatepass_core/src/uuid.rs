// Helper for generating UUIDv7 (timestamp-sortable UUIDs).
//
// Applications, tokens and audit entries are ordered by creation time, so
// their ids are generated app-side as UUIDv7.

use uuid::Uuid;

/// Generate a new UUIDv7 (timestamp-sortable).
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
