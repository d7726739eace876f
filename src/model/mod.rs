pub mod drug;
pub mod user;
