pub mod poll;
pub mod record;
pub mod run;
pub mod upload;
