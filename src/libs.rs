pub mod core;
pub mod fanout;
pub mod notify;
pub mod storage;
