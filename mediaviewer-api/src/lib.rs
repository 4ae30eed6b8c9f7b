pub mod http;
pub mod vr;
pub mod ws;

pub use http::{create_router, AppState};
