//! 会话令牌校验
//!
//! 令牌签发属于外部协作者，网关只在 WebSocket 首帧握手时做校验，
//! 所以这里只保留一个窄接口和 JWT 的默认实现。

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::config::JwtConfig;
use crate::error::{GatewayError, Result};

pub trait TokenVerifier: Send + Sync {
    /// 校验令牌并解析出用户 id
    fn verify(&self, token: &str) -> Result<u64>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    exp: i64,
}

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(cfg: &JwtConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[cfg.issuer.clone()]);
        Self {
            key: DecodingKey::from_secret(cfg.secret.as_bytes()),
            validation,
        }
    }
}

impl TokenVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<u64> {
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| GatewayError::Session(format!("invalid token: {e}")))?;
        data.claims
            .sub
            .parse()
            .map_err(|_| GatewayError::Session("token subject is not a user id".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn token(cfg: &JwtConfig, sub: &str, exp_offset: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            iss: cfg.issuer.clone(),
            exp: chrono::Utc::now().timestamp() + exp_offset,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(cfg.secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_valid_token_resolves_user() {
        let cfg = JwtConfig::default();
        let verifier = JwtVerifier::new(&cfg);
        assert_eq!(verifier.verify(&token(&cfg, "42", 3600)).unwrap(), 42);
    }

    #[test]
    fn test_expired_token_rejected() {
        let cfg = JwtConfig::default();
        let verifier = JwtVerifier::new(&cfg);
        assert!(verifier.verify(&token(&cfg, "42", -3600)).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let verifier = JwtVerifier::new(&JwtConfig::default());
        assert!(verifier.verify("not-a-jwt").is_err());
    }
}
