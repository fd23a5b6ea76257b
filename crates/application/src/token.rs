//! 令牌编解码
//!
//! 访问令牌是 HS256 签名的 JWT，服务端不持久化；刷新令牌是 32 字节随机数，
//! 只以 SHA-256 摘要的形式落库。

use data_encoding::BASE64URL_NOPAD;
use domain::{Timestamp, UserId};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use ring::{
    digest,
    rand::{SecureRandom, SystemRandom},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const REFRESH_TOKEN_BYTES: usize = 32;

/// 访问令牌中的声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// 用户 ID（UUID 字符串）
    pub sub: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token signing failed: {0}")]
    Signing(String),
    #[error("token expired")]
    Expired,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("secure random generator failure")]
    Random,
}

/// 访问令牌签发与校验
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    access_ttl: time::Duration,
}

impl TokenCodec {
    pub fn new(secret: &[u8], issuer: impl Into<String>, access_ttl: std::time::Duration) -> Self {
        let issuer = issuer.into();

        // 只接受 HS256；exp/sub/iss 缺一不可，且不留时钟容差。
        // 过期时间由 verify 按注入的时钟判断，不读系统时间
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.validate_exp = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer,
            access_ttl: time::Duration::try_from(access_ttl).unwrap_or(time::Duration::MAX),
        }
    }

    /// 为用户签发访问令牌，`now` 作为签发时间
    pub fn sign(&self, user_id: UserId, now: Timestamp) -> Result<String, TokenError> {
        let expires_at = now
            .checked_add(self.access_ttl)
            .ok_or_else(|| TokenError::Signing("access token expiry out of range".to_string()))?;
        let claims = AccessClaims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|err| TokenError::Signing(err.to_string()))
    }

    /// 校验签名、签发者与过期时间，返回令牌主体；`now` 到达 exp 即视为过期
    pub fn verify(&self, token: &str, now: Timestamp) -> Result<UserId, TokenError> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &self.validation).map_err(
            |err| match err.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid(err.to_string()),
            },
        )?;

        if data.claims.exp <= now.unix_timestamp() {
            return Err(TokenError::Expired);
        }

        UserId::parse(&data.claims.sub)
            .map_err(|_| TokenError::Invalid("subject is not a user id".to_string()))
    }
}

/// 刷新令牌明文生成与哈希
pub struct RefreshTokenGenerator {
    rng: SystemRandom,
}

impl Default for RefreshTokenGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshTokenGenerator {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    /// 生成新的不透明刷新令牌（base64url，无填充）
    pub fn generate(&self) -> Result<String, TokenError> {
        let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
        self.rng.fill(&mut bytes).map_err(|_| TokenError::Random)?;
        Ok(BASE64URL_NOPAD.encode(&bytes))
    }
}

/// 刷新令牌落库用的单向摘要
pub fn hash_refresh_token(token: &str) -> String {
    let digest = digest::digest(&digest::SHA256, token.as_bytes());
    BASE64URL_NOPAD.encode(digest.as_ref())
}
