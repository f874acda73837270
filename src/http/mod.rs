//! HTTPS surface: issuance endpoint and the mTLS-protected operation.

pub mod router;
pub mod server;

pub use router::{AppState, CsrRequest, CsrResponse, ISSUANCE_ERROR_MESSAGE, create_router};
pub use server::Server;
