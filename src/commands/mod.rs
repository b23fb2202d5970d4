pub mod health;
pub mod log_stream;
pub mod trading_session;
