pub mod poll;
pub mod status;
