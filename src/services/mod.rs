// Storage primitives
pub mod location_stock;
pub mod stock_ledger;

// Jobs
pub mod backfill;
pub mod reindex;

// Writers funnelling into the ledger
pub mod distribution;
pub mod order_sync;

// Catalog identities and the stock facade used by handlers
pub mod catalog;
pub mod stock;

use crate::errors::ServiceError;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionError, TransactionTrait};
use std::future::Future;
use std::pin::Pin;

/// Runs `f` inside a database transaction, flattening the transaction error.
pub(crate) async fn in_transaction<T, F>(db: &DatabaseConnection, f: F) -> Result<T, ServiceError>
where
    F: for<'c> FnOnce(
            &'c DatabaseTransaction,
        ) -> Pin<Box<dyn Future<Output = Result<T, ServiceError>> + Send + 'c>>
        + Send,
    T: Send,
{
    db.transaction::<_, T, ServiceError>(f)
        .await
        .map_err(|e| match e {
            TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
            TransactionError::Transaction(service_err) => service_err,
        })
}
