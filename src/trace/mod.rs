pub mod endpoints;
pub mod generic;
pub mod interface;
