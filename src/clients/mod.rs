pub mod judge_client;
pub mod session_store_client;
