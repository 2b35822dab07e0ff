mod admin;

pub use admin::{admin_auth_middleware, ADMIN_API_KEY_HEADER};
