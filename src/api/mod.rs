//! HTTP handlers, split by port: [`client`] serves callers on the client
//! port, [`admin`] serves operators on the admin port. The rest are shared
//! middleware/utilities threaded through both.

pub mod admin;
pub mod admin_auth;
pub mod client;
pub mod health;
pub mod metrics;
pub mod rate_limit;
pub mod request_id;
