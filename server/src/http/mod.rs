pub mod api;
pub mod error;
pub mod stream;
pub mod svc;
