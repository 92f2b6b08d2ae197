pub mod catalog;
pub mod config;
pub mod controller;
pub mod delta;
pub mod error;
pub mod handler;
pub mod load;
pub mod pool;
pub mod replication;
pub mod session;

pub use catalog::{Catalog, Comment, TableInfo, TypeMeta};
pub use config::{DataDir, EngineDsn, SystemVariables};
pub use controller::{delete_statement, insert_statement, DeltaController, TableKey};
pub use delta::{DeltaAppender, META_COLUMNS};
pub use error::{FrontendError, Result};
pub use handler::{
    apply_modifiers, rewrite_query, HandlerShim, ResultChunk, ResultField, ResultModifier,
    WireHandler,
};
pub use load::{
    build_statement, BulkLoad, DuplicateHandling, FifoJob, LoadResult, TargetTable,
};
pub use pool::{ConnectionPool, PooledConnection};
pub use replication::{
    arrow_schema, ColumnDef, ColumnKind, DeltaAction, EventValue, TxnPosition,
};
pub use session::{value_to_text, SessionContext};
