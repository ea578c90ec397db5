pub mod id;
pub mod sqlite;
pub mod time;
