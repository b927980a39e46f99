pub mod api;
pub mod backend;
pub mod config;
pub mod diagnostics;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod logging;
pub mod materialize;
pub mod metrics;
pub mod resolver;

pub use api::{DatasourceRef, QueryClient, QueryOutcome, QueryRequest};
pub use backend::BackendKind;
pub use config::ClientConfig;
pub use error::{QueryError, Result};
pub use materialize::{LogMode, MaterializedResult, QueryShape};
