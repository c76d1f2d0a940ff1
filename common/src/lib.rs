#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod cache;
pub mod error;
pub mod messages;
pub mod storage;
pub mod utils;
