//! HMAC-SHA256 request signing for the MEXC v3 API.
//!
//! The venue verifies a lowercase hex HMAC-SHA256 digest computed over the
//! request's query string with `timestamp` as the final parameter; the
//! signature itself is appended after that. The API key travels in the
//! `x-mexc-apikey` header, not in the signed payload.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use mexc_core::{MexcError, MexcResult};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the API key on authenticated requests.
pub const API_KEY_HEADER: &str = "x-mexc-apikey";

/// A canonical query string with its signature appended.
///
/// The query is final once signed: the signature covers exactly the bytes
/// preceding it, so the string must be sent verbatim.
#[derive(Debug, Clone)]
pub struct SignedQuery {
    query: String,
    signature: String,
}

impl SignedQuery {
    /// Full query string including the trailing `signature` parameter.
    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }
}

/// Deterministic signer over a secret key. No clock, no randomness: the
/// timestamp is a caller-supplied request field.
#[derive(Clone)]
pub struct Signer {
    secret: String,
}

impl Signer {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Sign `params` with the given request timestamp (venue millis).
    ///
    /// Fails with `InvalidRequest` if the secret is empty or a caller tries
    /// to smuggle in `timestamp`/`signature` parameters — both are appended
    /// here, last, so the signed bytes and the sent bytes cannot diverge.
    pub fn sign(&self, params: &[(String, String)], timestamp: i64) -> MexcResult<SignedQuery> {
        if self.secret.is_empty() {
            return Err(MexcError::InvalidRequest("signing secret is empty".into()));
        }
        for (key, _) in params {
            if key.is_empty() {
                return Err(MexcError::InvalidRequest(
                    "request parameter with empty name".into(),
                ));
            }
            if key == "timestamp" || key == "signature" {
                return Err(MexcError::InvalidRequest(format!(
                    "parameter `{key}` is reserved and appended at signing time"
                )));
            }
        }

        let canonical = build_query_string(params);
        let payload = if canonical.is_empty() {
            format!("timestamp={timestamp}")
        } else {
            format!("{canonical}&timestamp={timestamp}")
        };

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| MexcError::InvalidRequest("signing secret rejected by HMAC".into()))?;
        mac.update(payload.as_bytes());
        let signature = hex::encode(mac.finalize().into_bytes());

        Ok(SignedQuery {
            query: format!("{payload}&signature={signature}"),
            signature,
        })
    }
}

/// Join parameters into the canonical `k=v&k=v` form the venue signs.
pub fn build_query_string(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn known_vector() {
        // HMAC-SHA256 test vector for the Binance-compatible query format.
        let signer = Signer::new("NhqPtmdSJYdKjVHjA7PZj4Mge3R5YNiP1e3UZjInClVN65XAbvqqM6A7H5fATj0j");
        let signed = signer
            .sign(
                &params(&[
                    ("symbol", "LTCBTC"),
                    ("side", "BUY"),
                    ("type", "LIMIT"),
                    ("timeInForce", "GTC"),
                    ("quantity", "1"),
                    ("price", "0.1"),
                    ("recvWindow", "5000"),
                ]),
                1499827319559,
            )
            .unwrap();

        assert_eq!(
            signed.signature(),
            "c8db56825ae71d6d79447849e617115f4a920fa2acdcab2b053c4b2838bd6b71"
        );
        assert!(signed.query().ends_with(&format!(
            "timestamp=1499827319559&signature={}",
            signed.signature()
        )));
    }

    #[test]
    fn deterministic_across_calls() {
        let signer = Signer::new("secret");
        let input = params(&[("symbol", "BTCUSDT"), ("side", "SELL")]);
        let a = signer.sign(&input, 1700000000000).unwrap();
        let b = signer.sign(&input, 1700000000000).unwrap();
        assert_eq!(a.query(), b.query());
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn empty_params_sign_timestamp_only() {
        let signer = Signer::new("secret");
        let signed = signer.sign(&[], 1700000000000).unwrap();
        assert!(signed.query().starts_with("timestamp=1700000000000&signature="));
    }

    #[test]
    fn empty_secret_is_invalid() {
        let signer = Signer::new("");
        let err = signer.sign(&params(&[("a", "1")]), 1).unwrap_err();
        assert!(matches!(err, MexcError::InvalidRequest(_)));
    }

    #[test]
    fn reserved_parameters_are_rejected() {
        let signer = Signer::new("secret");
        for key in ["timestamp", "signature"] {
            let err = signer.sign(&params(&[(key, "1")]), 1).unwrap_err();
            assert!(matches!(err, MexcError::InvalidRequest(_)), "key {key}");
        }
    }

    #[test]
    fn signature_is_lowercase_hex() {
        let signer = Signer::new("secret");
        let signed = signer.sign(&params(&[("a", "1")]), 42).unwrap();
        assert_eq!(signed.signature().len(), 64);
        assert!(signed
            .signature()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
