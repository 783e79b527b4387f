pub mod crypto;
pub mod postgres;
