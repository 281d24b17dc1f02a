//! Fuzz testing for request validation.
//!
//! Feeds a structured input through the same pipeline a request takes: the
//! body through safe JSON and each payload schema, and independent strings
//! through the header, path, query and URL validators. None of them may
//! panic.
//!
//! # Running
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_validation
//! cargo +nightly fuzz coverage fuzz_validation
//! ```

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use tokenscan_api::models::{
    ApplyRequest, HeliusRpcRequest, ScanRequest, SwapRequest, TokenDraft,
};
use tokenscan_api::safe_json::{self, JsonLimits};
use tokenscan_api::sanitize::{sanitize_text, validate_pubkey};
use tokenscan_api::ssrf::SsrfGuard;
use tokenscan_api::validation::{
    ValidationContext, validate, validate_idempotency_key, validate_proxy_path,
    validate_query_pairs,
};

/// One request's worth of client-controlled input.
#[derive(Debug, Arbitrary)]
struct RequestInput {
    body: Vec<u8>,
    idempotency_key: String,
    proxy_path: String,
    query: Option<String>,
    url: String,
    text: String,
}

fuzz_target!(|input: RequestInput| {
    let guard = SsrfGuard::default();
    let ctx = ValidationContext { ssrf: &guard };

    if let Ok(value) = safe_json::parse_bytes(&input.body, &JsonLimits::default()) {
        let _ = validate::<TokenDraft>(&value, ctx);
        let _ = validate::<ApplyRequest>(&value, ctx);
        let _ = validate::<ScanRequest>(&value, ctx);
        let _ = validate::<SwapRequest>(&value, ctx);
        let _ = validate::<HeliusRpcRequest>(&value, ctx);
    }

    let _ = sanitize_text(&input.text);
    let _ = validate_pubkey(&input.text);
    let _ = validate_idempotency_key(&input.idempotency_key);
    let _ = validate_proxy_path(&input.proxy_path);
    let _ = validate_query_pairs(input.query.as_deref());
    let _ = guard.check(&input.url);
});
