pub mod connectivity;
pub mod database;
pub mod http;
pub mod storage;
