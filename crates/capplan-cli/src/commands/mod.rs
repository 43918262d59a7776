pub mod convert;
pub mod provision;
