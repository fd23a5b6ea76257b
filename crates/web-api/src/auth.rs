//! 请求认证与来源识别
//!
//! - `AuthUser`：从 `Authorization: Bearer <token>` 中解析并校验访问令牌
//! - `ClientInfo`：提取客户端 IP 与 User-Agent 用于审计
//! - `login_rate_limit`：登录接口按 IP 限流

use std::net::{IpAddr, SocketAddr};

use application::ClientMeta;
use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{header, request::Parts, Extensions, HeaderMap, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};
use domain::UserId;

use crate::{error::ApiError, state::AppState};

/// 从 headers 中提取 Bearer token
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthorized("Authentication is required."))?;

    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Invalid authorization header format"))
}

/// 已认证的用户
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let user_id = state
            .token_service
            .verify_access_token(token)
            .map_err(|_| ApiError::unauthorized("Authentication is required."))?;
        Ok(AuthUser(user_id))
    }
}

/// 客户端 IP
///
/// 只有直连对端在 `trusted_proxies` 中时才读取代理头：X-Forwarded-For 从右往左
/// 取第一个非可信代理地址，其次 X-Real-IP；其余情况一律使用连接地址。
pub fn client_ip(headers: &HeaderMap, extensions: &Extensions, trusted_proxies: &[IpAddr]) -> String {
    let Some(peer) = extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
    else {
        return "unknown".to_owned();
    };
    if !trusted_proxies.contains(&peer) {
        return peer.to_string();
    }

    let forwarded: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|entry| entry.trim().parse().ok())
        .collect();
    if let Some(ip) = forwarded
        .iter()
        .rev()
        .find(|ip| !trusted_proxies.contains(ip))
    {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<IpAddr>().ok());
    real_ip.unwrap_or(peer).to_string()
}

/// 审计用的请求来源
#[derive(Debug, Clone)]
pub struct ClientInfo(pub ClientMeta);

impl FromRequestParts<AppState> for ClientInfo {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let ip = client_ip(&parts.headers, &parts.extensions, &state.trusted_proxies);
        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        Ok(ClientInfo(ClientMeta::new(ip, user_agent)))
    }
}

/// 登录限流中间件，令牌耗尽时返回 429
pub async fn login_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(request.headers(), request.extensions(), &state.trusted_proxies);
    match state.login_limiter.check(&ip) {
        Ok(()) => next.run(request).await,
        Err(err) => {
            tracing::warn!(client_ip = %ip, error = %err, "登录请求被限流");
            let retry_after = match err {
                application::RateLimitError::Exhausted { retry_after } => retry_after,
            };
            let mut response =
                ApiError::too_many_requests("Too many requests. Please try again later.")
                    .into_response();
            let seconds = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert!(bearer_token(&headers).is_err());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc");
    }

    fn peer(ip: [u8; 4]) -> Extensions {
        let mut extensions = Extensions::new();
        extensions.insert(ConnectInfo(SocketAddr::from((ip, 4000))));
        extensions
    }

    #[test]
    fn untrusted_peer_cannot_choose_its_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.8"));

        assert_eq!(client_ip(&headers, &peer([192, 168, 1, 9]), &[]), "192.168.1.9");

        let trusted: [IpAddr; 1] = ["10.0.0.1".parse().unwrap()];
        assert_eq!(
            client_ip(&headers, &peer([192, 168, 1, 9]), &trusted),
            "192.168.1.9"
        );
        assert_eq!(client_ip(&headers, &Extensions::new(), &trusted), "unknown");
    }

    #[test]
    fn trusted_proxy_forwards_the_nearest_untrusted_hop() {
        let trusted: Vec<IpAddr> = vec!["10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap()];
        let proxy = peer([10, 0, 0, 1]);

        // 最左侧的条目由客户端自填，不可信
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.1.1.1, 203.0.113.7, 10.0.0.2"),
        );
        assert_eq!(client_ip(&headers, &proxy, &trusted), "203.0.113.7");

        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.9"));
        assert_eq!(client_ip(&headers, &proxy, &trusted), "203.0.113.9");

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("not-an-ip"));
        assert_eq!(client_ip(&headers, &proxy, &trusted), "10.0.0.1");
    }
}
