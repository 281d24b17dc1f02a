//! Validated request payloads.
//!
//! Each type implements [`Validate`]: fields are read through a strict
//! [`FieldReader`], so unknown keys are rejected and every issue is
//! reported at once. Field names on the wire are camelCase.

use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Value, json};

use crate::validation::{
    ContainerRule, DESCRIPTION, DecimalRule, FieldReader, IntegerRule, OneOfRule, PubkeyRule,
    RpcIdRule, SOCIAL_HANDLE, TOKEN_NAME, TOKEN_SYMBOL, UrlRule, Validate,
};

/// Largest initial buy accepted at launch, in SOL.
pub const MAX_INITIAL_BUY_SOL: Decimal = Decimal::ONE_THOUSAND;

/// Default Jupiter slippage in basis points.
pub const DEFAULT_SLIPPAGE_BPS: u64 = 50;

/// Read-only Helius methods the RPC proxy forwards.
pub const HELIUS_RPC_METHODS: &[&str] = &[
    "getAsset",
    "getAssetBatch",
    "getAssetsByOwner",
    "getAssetsByCreator",
    "getAssetsByAuthority",
    "getTokenAccounts",
    "getAccountInfo",
    "getBalance",
    "getTokenSupply",
    "getTokenLargestAccounts",
    "getSignaturesForAddress",
    "getLatestBlockhash",
];

const INITIAL_BUY_SOL: DecimalRule = DecimalRule {
    min: Decimal::ZERO,
    max: MAX_INITIAL_BUY_SOL,
    // lamport precision
    max_scale: 9,
};

const SWAP_AMOUNT: IntegerRule = IntegerRule {
    min: 1,
    max: u64::MAX,
};

const SLIPPAGE_BPS: IntegerRule = IntegerRule { min: 1, max: 5000 };

const JSONRPC_VERSION: OneOfRule = OneOfRule { allowed: &["2.0"] };

const RPC_METHOD: OneOfRule = OneOfRule {
    allowed: HELIUS_RPC_METHODS,
};

// =============================================================================
// Token draft
// =============================================================================

/// Token metadata drafted in the launch wizard.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenDraft {
    pub name: String,
    /// Upper-cased ticker.
    pub symbol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twitter: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telegram: Option<String>,
    pub initial_buy_sol: Decimal,
}

impl TokenDraft {
    /// Read the draft fields; shared with [`ApplyRequest`].
    fn read(fields: &mut FieldReader<'_>) -> Option<Self> {
        let name = fields.required("name", &TOKEN_NAME);
        let symbol = fields.required("symbol", &TOKEN_SYMBOL);
        let description = fields.optional("description", &DESCRIPTION);
        let image_url = fields.optional("imageUrl", &UrlRule);
        let website = fields.optional("website", &UrlRule);
        let twitter = fields.optional("twitter", &SOCIAL_HANDLE);
        let telegram = fields.optional("telegram", &SOCIAL_HANDLE);
        let initial_buy_sol = fields.optional("initialBuySol", &INITIAL_BUY_SOL);

        Some(Self {
            name: name?,
            symbol: symbol?.to_ascii_uppercase(),
            description: description?.filter(|d| !d.is_empty()),
            image_url: image_url?,
            website: website?,
            twitter: twitter?,
            telegram: telegram?,
            initial_buy_sol: initial_buy_sol?.unwrap_or(Decimal::ZERO),
        })
    }

    pub fn has_socials(&self) -> bool {
        self.website.is_some() || self.twitter.is_some() || self.telegram.is_some()
    }
}

impl Validate for TokenDraft {
    fn from_fields(fields: &mut FieldReader<'_>) -> Option<Self> {
        Self::read(fields)
    }
}

// =============================================================================
// Apply
// =============================================================================

/// Token launch submission: the draft plus the creator's wallet.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyRequest {
    pub draft: TokenDraft,
    pub creator_wallet: String,
}

impl ApplyRequest {
    /// Body for the Bags token-info endpoint.
    pub fn to_upstream_body(&self) -> Value {
        let mut body = json!(self.draft);
        if let Some(object) = body.as_object_mut() {
            object.remove("initialBuySol");
            object.insert("creatorWallet".to_string(), json!(self.creator_wallet));
        }
        body
    }
}

impl Validate for ApplyRequest {
    fn from_fields(fields: &mut FieldReader<'_>) -> Option<Self> {
        let draft = TokenDraft::read(fields);
        let creator_wallet = fields.required("creatorWallet", &PubkeyRule);

        Some(Self {
            draft: draft?,
            creator_wallet: creator_wallet?,
        })
    }
}

// =============================================================================
// Scan
// =============================================================================

/// Token to look up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    pub mint: String,
}

impl Validate for ScanRequest {
    fn from_fields(fields: &mut FieldReader<'_>) -> Option<Self> {
        let mint = fields.required("mint", &PubkeyRule);
        Some(Self { mint: mint? })
    }
}

// =============================================================================
// Swap
// =============================================================================

/// Jupiter swap parameters. `amount` is in the input token's base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapRequest {
    pub input_mint: String,
    pub output_mint: String,
    pub amount: u64,
    pub slippage_bps: u64,
    pub user_public_key: String,
}

impl SwapRequest {
    /// Query string for the Jupiter quote endpoint.
    pub fn quote_query(&self) -> Vec<(String, String)> {
        vec![
            ("inputMint".to_string(), self.input_mint.clone()),
            ("outputMint".to_string(), self.output_mint.clone()),
            ("amount".to_string(), self.amount.to_string()),
            ("slippageBps".to_string(), self.slippage_bps.to_string()),
        ]
    }

    /// Body for the Jupiter swap endpoint.
    pub fn swap_body(&self, quote: &Value) -> Value {
        json!({
            "quoteResponse": quote,
            "userPublicKey": self.user_public_key,
            "wrapAndUnwrapSol": true,
            "dynamicComputeUnitLimit": true,
        })
    }
}

impl Validate for SwapRequest {
    fn from_fields(fields: &mut FieldReader<'_>) -> Option<Self> {
        let input_mint = fields.required("inputMint", &PubkeyRule);
        let output_mint = fields.required("outputMint", &PubkeyRule);
        let amount = fields.required("amount", &SWAP_AMOUNT);
        let slippage_bps = fields.optional("slippageBps", &SLIPPAGE_BPS);
        let user_public_key = fields.required("userPublicKey", &PubkeyRule);

        let (input_mint, output_mint) = (input_mint?, output_mint?);
        if input_mint == output_mint {
            fields.issue("outputMint", "Must differ from inputMint");
            return None;
        }

        Some(Self {
            input_mint,
            output_mint,
            amount: amount?,
            slippage_bps: slippage_bps?.unwrap_or(DEFAULT_SLIPPAGE_BPS),
            user_public_key: user_public_key?,
        })
    }
}

// =============================================================================
// Helius RPC
// =============================================================================

/// JSON-RPC 2.0 call restricted to [`HELIUS_RPC_METHODS`].
#[derive(Debug, Clone, PartialEq)]
pub struct HeliusRpcRequest {
    pub id: Value,
    pub method: &'static str,
    pub params: Option<Value>,
}

impl HeliusRpcRequest {
    pub fn to_upstream_body(&self) -> Value {
        let mut body = json!({
            "jsonrpc": "2.0",
            "id": self.id,
            "method": self.method,
        });
        if let (Some(params), Some(object)) = (&self.params, body.as_object_mut()) {
            object.insert("params".to_string(), params.clone());
        }
        body
    }
}

impl Validate for HeliusRpcRequest {
    fn from_fields(fields: &mut FieldReader<'_>) -> Option<Self> {
        let jsonrpc = fields.required("jsonrpc", &JSONRPC_VERSION);
        let id = fields.required("id", &RpcIdRule);
        let method = fields.required("method", &RPC_METHOD);
        let params = fields.optional("params", &ContainerRule);

        jsonrpc?;
        Some(Self {
            id: id?,
            method: method?,
            params: params?,
        })
    }
}
