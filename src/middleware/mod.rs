pub mod auth;
pub mod cors;
pub mod recover;
pub mod request_id;

pub use auth::{auth_middleware, ClientAddress};
pub use cors::cors_middleware;
pub use recover::recover_middleware;
pub use request_id::{request_id_middleware, RequestId, REQUEST_ID_HEADER};
