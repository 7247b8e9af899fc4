pub mod catalog_item;
pub mod item_stock_snapshot;
pub mod job_lock;
pub mod location_stock;
pub mod order_stock_flag;
pub mod stock_ledger_entry;
pub mod stock_location;
