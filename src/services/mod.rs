pub mod carts;
pub mod catalog;
pub mod co_purchase;
pub mod orders;
pub mod recommendations;
pub mod stock_monitor;
