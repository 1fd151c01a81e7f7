pub mod index;
pub mod orchestrator;
pub mod parser;
pub mod payment;
pub mod retry;

pub use index::{RebuildReport, RowRejection, ServiceIndex, SharedServiceIndex};
pub use orchestrator::OrderProcessor;
pub use parser::{parse_line, parse_product, parse_raw_orders, split_order_lines, ParseFailure};
pub use payment::{calculated_price, classify, dispatch_quantity, is_payed};
pub use retry::RetryPolicy;
