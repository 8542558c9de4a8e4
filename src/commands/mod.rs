pub mod record;
pub mod setup;
