use mongodb::error::Error as MongoError;
use thiserror::Error;

/// Result alias for MongoDB backend internals.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised by the MongoDB backend before they are folded into storage errors.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection string did not parse.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// URI as configured.
        uri: String,
        /// Driver parse error.
        #[source]
        source: MongoError,
    },
    /// The driver rejected the parsed options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Every startup ping failed.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Pings attempted before giving up.
        attempts: u32,
        /// Last ping error.
        #[source]
        source: MongoError,
    },
    /// A periodic ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// Index creation failed at startup.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Collection the index belongs to.
        collection: &'static str,
        /// Index name.
        index: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A single-collection read or write failed.
    #[error("failed to {action} in collection `{collection}`")]
    Operation {
        /// Collection addressed.
        collection: &'static str,
        /// What was attempted.
        action: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// The submission transaction failed or ran out of retries.
    #[error("transaction failed while {step}")]
    Transaction {
        /// Step that failed last.
        step: &'static str,
        /// Driver error.
        #[source]
        source: MongoError,
    },
    /// A stored `_id` is not a UUID.
    #[error("document `{id}` in collection `{collection}` has a malformed identifier")]
    MalformedId {
        /// Collection the document came from.
        collection: &'static str,
        /// Raw `_id` value.
        id: String,
        /// Parse error.
        #[source]
        source: uuid::Error,
    },
}
