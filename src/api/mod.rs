pub mod client;
pub mod request;

pub use client::{PreparedQuery, QueryClient, QueryOutcome, QUERY_PATH};
pub use request::{build_payload, DatasourceRef, QueryRequest};
