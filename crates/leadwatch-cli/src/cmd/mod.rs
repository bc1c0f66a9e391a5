pub mod actions;
pub mod config;
pub mod digest;
pub mod leads;
pub mod poll;
pub mod run;
