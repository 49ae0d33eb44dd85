use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies the database an export run operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseTarget {
    pub account_id: String,
    pub database_id: String,
}

impl DatabaseTarget {
    pub fn new(account_id: impl Into<String>, database_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            database_id: database_id.into(),
        }
    }
}

impl fmt::Display for DatabaseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account_id, self.database_id)
    }
}
