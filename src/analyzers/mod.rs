pub mod identity;
pub mod quality;
