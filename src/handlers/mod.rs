mod fallback;
mod health;
mod launch;
mod proxy;
mod scan;
mod swap;

pub use fallback::{method_not_allowed, not_found};
pub use health::health_check;
pub use launch::{IDEMPOTENCY_KEY_HEADER, apply_launch, simulate_launch};
pub use proxy::{bags_get, bags_post, helius_rpc};
pub use scan::scan_token;
pub use swap::swap;
