pub mod actions;
pub mod views;
