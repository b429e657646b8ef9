//! Access token codec.
//!
//! An access token is a three-part, dot-separated, base64url-framed blob:
//! `<header>.<claims>.<signature>`. Only the middle segment is interpreted
//! here; the header and trailing signature are opaque to this crate (the
//! facilitator verifies the signature).

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as b64url;
use serde::Deserialize;
use serde_json::Value;

/// Claims decoded from the middle segment of an access token.
#[derive(Debug, Clone, Default)]
pub struct DecodedToken {
    /// The plan this token was issued against, when present.
    pub accepted_plan_id: Option<String>,
    /// The subscriber's wallet address, from `payload.authorization.from`.
    pub subscriber_address: Option<String>,
    /// Payment scheme identifier.
    pub scheme: Option<String>,
    /// Network identifier.
    pub network: Option<String>,
    /// Opaque signature payload, passed through unexamined.
    pub signature: Option<Value>,
    /// Opaque session keys, passed through unexamined.
    pub session_keys: Option<Value>,
}

impl DecodedToken {
    /// A decoded token is usable only if both the plan id and the
    /// subscriber address resolved.
    #[must_use]
    pub const fn is_usable(&self) -> bool {
        self.accepted_plan_id.is_some() && self.subscriber_address.is_some()
    }
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default, rename = "acceptedPlanId")]
    accepted_plan_id: Option<String>,
    #[serde(default)]
    payload: Option<Payload>,
    #[serde(default)]
    scheme: Option<String>,
    #[serde(default)]
    network: Option<String>,
    #[serde(default)]
    signature: Option<Value>,
    #[serde(default, rename = "sessionKeys")]
    session_keys: Option<Value>,
}

#[derive(Deserialize)]
struct Payload {
    #[serde(default)]
    authorization: Option<Authorization>,
}

#[derive(Deserialize)]
struct Authorization {
    #[serde(default)]
    from: Option<String>,
}

/// Errors raised while decoding an access token.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum TokenCodecError {
    /// The token did not split into exactly three dot-separated segments.
    #[error("access token is missing a required segment")]
    MissingSegment,
    /// The claims segment was not valid base64url.
    #[error("access token claims segment is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
    /// The decoded claims segment was not valid JSON.
    #[error("access token claims segment is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

/// Decodes a three-part dot-separated access token.
///
/// Does not validate the signature; that is the facilitator's job.
///
/// # Errors
///
/// Returns [`TokenCodecError`] if the token is malformed.
pub fn decode(token: &str) -> Result<DecodedToken, TokenCodecError> {
    let mut segments = token.split('.');
    let _header = segments.next().ok_or(TokenCodecError::MissingSegment)?;
    let claims_segment = segments.next().ok_or(TokenCodecError::MissingSegment)?;
    let _signature = segments.next().ok_or(TokenCodecError::MissingSegment)?;
    if segments.next().is_some() {
        return Err(TokenCodecError::MissingSegment);
    }

    let claims_bytes = b64url.decode(claims_segment)?;
    let claims: Claims = serde_json::from_slice(&claims_bytes)?;

    Ok(DecodedToken {
        accepted_plan_id: claims.accepted_plan_id,
        subscriber_address: claims.payload.and_then(|p| p.authorization).and_then(|a| a.from),
        scheme: claims.scheme,
        network: claims.network,
        signature: claims.signature,
        session_keys: claims.session_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_claims(claims: &serde_json::Value) -> String {
        let json = serde_json::to_vec(claims).unwrap();
        b64url.encode(json)
    }

    #[test]
    fn decodes_usable_token() {
        let claims = serde_json::json!({
            "acceptedPlanId": "p1",
            "payload": { "authorization": { "from": "0xabc" } },
            "scheme": "nvm:erc4337",
            "network": "eip155:84532",
        });
        let token = format!("header.{}.sig", encode_claims(&claims));
        let decoded = decode(&token).unwrap();
        assert!(decoded.is_usable());
        assert_eq!(decoded.accepted_plan_id.as_deref(), Some("p1"));
        assert_eq!(decoded.subscriber_address.as_deref(), Some("0xabc"));
    }

    #[test]
    fn missing_segment_errors() {
        let err = decode("only.two").unwrap_err();
        assert!(matches!(err, TokenCodecError::MissingSegment));
    }

    #[test]
    fn too_many_segments_errors() {
        let err = decode("a.b.c.d").unwrap_err();
        assert!(matches!(err, TokenCodecError::MissingSegment));
    }

    #[test]
    fn invalid_base64_errors() {
        let err = decode("header.not base64!!.sig").unwrap_err();
        assert!(matches!(err, TokenCodecError::InvalidBase64(_)));
    }

    #[test]
    fn missing_claims_fields_leave_token_unusable() {
        let claims = serde_json::json!({});
        let token = format!("header.{}.sig", encode_claims(&claims));
        let decoded = decode(&token).unwrap();
        assert!(!decoded.is_usable());
    }
}
