pub mod data;
pub mod range;
