//! Application services layer.

pub mod context;
pub mod error;
pub mod flash_sale;
pub mod repos;
pub mod shops;
pub mod worker;
