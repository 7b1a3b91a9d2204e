pub mod metadata;
pub mod tagging;
