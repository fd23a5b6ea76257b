use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        ws::{rejection::WebSocketUpgradeRejection, WebSocketUpgrade},
        FromRequest, Path, Query, Request, State,
    },
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use validator::Validate;

use application::{ApplicationError, RegisterUserRequest};
use domain::{ConversationId, User, UserId};

use crate::{
    auth::{bearer_token, login_rate_limit, AuthUser, ClientInfo},
    error::ApiError,
    frames::OutboundFrame,
    state::AppState,
    ws_connection::{publish, ConnectionSession},
};

/// JSON 请求体提取器，解析失败与字段校验失败统一返回 400
pub struct ValidJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|err| ApiError::bad_request(err.body_text()))?;
        value
            .validate()
            .map_err(|err| ApiError::bad_request(err.to_string()))?;
        Ok(ValidJson(value))
    }
}

#[derive(Debug, Deserialize, Validate)]
struct RegisterPayload {
    #[validate(length(min = 2, max = 50))]
    username: String,
    #[validate(email)]
    email: String,
    #[validate(length(min = 8, max = 72))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct LoginPayload {
    #[validate(email)]
    email: String,
    #[validate(length(min = 1))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
struct RefreshPayload {
    #[validate(length(min = 1))]
    refresh_token: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct DirectConversationPayload {
    user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate)]
struct SendMessagePayload {
    #[validate(length(min = 1, max = 4000))]
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagesQuery {
    limit: Option<i64>,
    before_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectQuery {
    conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct AuthResponse {
    access_token: String,
    refresh_token: String,
}

#[derive(Debug, Serialize)]
struct UserSummary {
    id: UserId,
    username: String,
    email: String,
}

impl From<&User> for UserSummary {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.as_str().to_owned(),
            email: user.email.as_str().to_owned(),
        }
    }
}

#[derive(Debug, Serialize)]
struct UserProfile {
    id: UserId,
    username: String,
    email: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
}

pub fn router(state: AppState) -> Router {
    let login = post(login_user).layer(middleware::from_fn_with_state(
        state.clone(),
        login_rate_limit,
    ));

    Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(register_user))
        .route("/auth/login", login)
        .route("/auth/refresh", post(refresh_tokens))
        .route("/auth/logout", post(logout))
        .route("/ws", get(connect))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(current_user))
        .route("/conversations", get(list_conversations))
        .route("/conversations/direct", post(create_direct_conversation))
        .route(
            "/conversations/{conversation_id}/messages",
            get(list_messages).post(send_message),
        )
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn register_user(
    State(state): State<AppState>,
    ValidJson(payload): ValidJson<RegisterPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let user = state
        .user_service
        .register(RegisterUserRequest {
            username: payload.username,
            email: payload.email,
            password: payload.password,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Registered successfully.",
            "user": UserSummary::from(&user),
        })),
    ))
}

async fn login_user(
    State(state): State<AppState>,
    ClientInfo(meta): ClientInfo,
    ValidJson(payload): ValidJson<LoginPayload>,
) -> Result<Json<AuthResponse>, ApiError> {
    let pair = state
        .token_service
        .login(&payload.email, &payload.password, &meta)
        .await
        .map_err(|err| match err {
            ApplicationError::InvalidCredentials => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_CREDENTIALS",
                "Invalid email or password.",
            ),
            other => other.into(),
        })?;

    Ok(Json(AuthResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    }))
}

async fn refresh_tokens(
    State(state): State<AppState>,
    ClientInfo(meta): ClientInfo,
    ValidJson(payload): ValidJson<RefreshPayload>,
) -> Result<Json<AuthResponse>, ApiError> {
    let pair = state
        .token_service
        .refresh(&payload.refresh_token, &meta)
        .await
        .map_err(|err| match err {
            ApplicationError::InvalidCredentials => ApiError::new(
                StatusCode::UNAUTHORIZED,
                "INVALID_REFRESH_TOKEN",
                "Invalid or expired refresh token.",
            ),
            other => other.into(),
        })?;

    Ok(Json(AuthResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    }))
}

async fn logout(
    State(state): State<AppState>,
    ClientInfo(meta): ClientInfo,
    ValidJson(payload): ValidJson<RefreshPayload>,
) -> Json<serde_json::Value> {
    state.token_service.logout(&payload.refresh_token, &meta).await;
    Json(json!({ "message": "ok" }))
}

async fn current_user(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = state.user_service.profile(user_id).await?;
    Ok(Json(json!({
        "user": UserProfile {
            id: user.id,
            username: user.username.as_str().to_owned(),
            email: user.email.as_str().to_owned(),
            created_at: user.created_at,
        }
    })))
}

async fn list_conversations(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversations = state.chat_service.list_conversations(user_id).await?;
    Ok(Json(json!({ "conversations": conversations })))
}

async fn create_direct_conversation(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    ValidJson(payload): ValidJson<DirectConversationPayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let other = UserId::from(payload.user_id);
    // 对方必须存在
    state.user_service.profile(other).await?;

    let conversation = state
        .chat_service
        .create_direct_conversation(user_id, other)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "conversation": conversation })),
    ))
}

fn conversation_path(path: Result<Path<i64>, PathRejection>) -> Result<ConversationId, ApiError> {
    match path {
        Ok(Path(id)) if id > 0 => Ok(ConversationId::new(id)),
        _ => Err(ApiError::bad_request("Invalid conversation id.")),
    }
}

async fn list_messages(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    path: Result<Path<i64>, PathRejection>,
    query: Result<Query<MessagesQuery>, QueryRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let conversation_id = conversation_path(path)?;
    let Query(query) = query.map_err(|err| ApiError::bad_request(err.body_text()))?;

    let messages = state
        .chat_service
        .get_messages(
            user_id,
            conversation_id,
            query.limit.unwrap_or_default(),
            query.before_id,
        )
        .await?;
    Ok(Json(json!({ "messages": messages })))
}

async fn send_message(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    path: Result<Path<i64>, PathRejection>,
    ValidJson(payload): ValidJson<SendMessagePayload>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let conversation_id = conversation_path(path)?;

    let message = state
        .chat_service
        .send_message(user_id, conversation_id, &payload.content)
        .await?;

    publish(
        &state.hub,
        conversation_id,
        OutboundFrame::Message { message: &message },
    )
    .await;

    Ok((StatusCode::CREATED, Json(json!({ "message": message }))))
}

/// WebSocket 入口：先校验房间号、令牌与成员资格，再升级连接
async fn connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ConnectQuery>, QueryRejection>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let room = match query
        .ok()
        .and_then(|Query(query)| query.conversation_id)
        .and_then(|raw| raw.parse::<i64>().ok())
        .filter(|id| *id > 0)
    {
        Some(id) => ConversationId::new(id),
        None => {
            return ApiError::bad_request("conversationId query parameter is required.")
                .into_response()
        }
    };

    let user_id = match bearer_token(&headers)
        .and_then(|token| {
            state
                .token_service
                .verify_access_token(token)
                .map_err(|_| ApiError::unauthorized("Authentication is required."))
        }) {
        Ok(user_id) => user_id,
        Err(err) => return err.into_response(),
    };

    // 复用读消息的成员资格校验
    if let Err(err) = state.chat_service.get_messages(user_id, room, 1, None).await {
        return ApiError::from(err).into_response();
    }

    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    upgrade.on_upgrade(move |socket| ConnectionSession::new(state, user_id, room).run(socket))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use application::{MemoryStore, MessagingHub, SystemClock};
    use axum::{body::Body, http::Request as HttpRequest};
    use infrastructure::BcryptPasswordHasher;
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::state::Repositories;

    fn app() -> Router {
        let (hub, _task) = MessagingHub::spawn(16);
        let state = AppState::build(
            &config::AppConfig::default(),
            Repositories::memory(Arc::new(MemoryStore::new())),
            Arc::new(BcryptPasswordHasher::new(4)),
            Arc::new(SystemClock),
            hub,
        );
        router(state)
    }

    async fn call(request: HttpRequest<Body>) -> (StatusCode, Value) {
        let response = app().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_is_public() {
        let (status, body) = call(
            HttpRequest::get("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn protected_routes_require_bearer_token() {
        let (status, body) = call(
            HttpRequest::get("/api/me")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, _) = call(
            HttpRequest::get("/api/conversations")
                .header("authorization", "Bearer not-a-jwt")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_validates_payload() {
        let (status, body) = call(
            HttpRequest::post("/auth/register")
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"username":"al","email":"al@x.com","password":"short"}"#,
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn websocket_admission_checks_room_before_token() {
        let (status, body) = call(
            HttpRequest::get("/ws?conversationId=abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "conversationId query parameter is required.");

        let (status, _) = call(
            HttpRequest::get("/ws?conversationId=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
