pub mod segment;
pub mod selector;
