pub mod http;
pub mod logging;
pub mod timing;

pub use http::get_http_client;
