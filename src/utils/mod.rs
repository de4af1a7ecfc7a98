pub mod bloom;
pub mod order_num;

pub use bloom::{BloomDecodeError, BloomFilter};
pub use order_num::OrderNumGenerator;
