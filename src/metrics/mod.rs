pub mod collector;
pub mod instrumented;
pub mod printer;
