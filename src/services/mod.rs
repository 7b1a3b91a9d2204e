pub mod library;
pub mod player;
