pub mod client;
pub mod credentials;
pub mod membership;
pub mod rate_limit;
