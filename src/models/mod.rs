pub mod common;
pub mod order;
pub mod pagination;
pub mod seckill;

pub use common::*;
pub use order::*;
pub use pagination::*;
pub use seckill::*;
