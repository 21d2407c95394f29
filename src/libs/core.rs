pub mod directory;
pub mod models;
pub mod read_state;
pub mod reply;
