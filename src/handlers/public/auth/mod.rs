pub mod login;

pub use login::{login, LoginRequest};
