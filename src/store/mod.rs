pub mod cache;
pub mod orders;
pub mod positions;
pub mod vendors;
