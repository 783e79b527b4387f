pub mod api_errors;
pub mod asaas;
pub mod pix_qr;
