#![allow(dead_code)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use application::{MemoryStore, MessagingHub, SystemClock};
use config::AppConfig;
use domain::ConversationId;
use futures_util::StreamExt;
use infrastructure::BcryptPasswordHasher;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::{net::TcpListener, net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, Message as TungsteniteMessage},
    MaybeTlsStream, WebSocketStream,
};
use web_api::{router, AppState, Repositories};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// 跑在随机端口上的完整服务，使用内存存储
pub struct TestApp {
    pub addr: SocketAddr,
    pub client: Client,
    pub hub: MessagingHub,
    pub store: Arc<MemoryStore>,
}

/// 已登录的测试用户
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(AppConfig::default()).await
}

pub async fn spawn_app_with(config: AppConfig) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let (hub, _hub_task) = MessagingHub::spawn(config.realtime.hub_queue_capacity);
    let state = AppState::build(
        &config,
        Repositories::memory(store.clone()),
        Arc::new(BcryptPasswordHasher::new(4)),
        Arc::new(SystemClock),
        hub.clone(),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let app = router(state);

    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .ok();
    });

    TestApp {
        addr,
        client: Client::new(),
        hub,
        store,
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn register(&self, name: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/register"))
            .json(&json!({
                "username": name,
                "email": format!("{name}@example.com"),
                "password": "password123",
            }))
            .send()
            .await
            .expect("register request")
    }

    pub async fn login(&self, email: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/auth/login"))
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await
            .expect("login request")
    }

    /// 注册并登录
    pub async fn sign_up(&self, name: &str) -> TestUser {
        let registered: Value = self.register(name).await.json().await.expect("register json");
        let id = registered["user"]["id"]
            .as_str()
            .expect("user id")
            .to_string();
        let email = format!("{name}@example.com");

        let tokens: Value = self
            .login(&email, "password123")
            .await
            .json()
            .await
            .expect("login json");

        TestUser {
            id,
            email,
            access_token: tokens["access_token"].as_str().expect("access").to_string(),
            refresh_token: tokens["refresh_token"]
                .as_str()
                .expect("refresh")
                .to_string(),
        }
    }

    pub async fn direct_conversation(&self, user: &TestUser, other: &TestUser) -> i64 {
        let body: Value = self
            .client
            .post(self.url("/api/conversations/direct"))
            .bearer_auth(&user.access_token)
            .json(&json!({ "userId": other.id }))
            .send()
            .await
            .expect("create conversation")
            .json()
            .await
            .expect("conversation json");
        body["conversation"]["id"].as_i64().expect("conversation id")
    }

    pub async fn connect_ws(
        &self,
        token: Option<&str>,
        conversation: &str,
    ) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
        let mut request = format!("ws://{}/ws?conversationId={}", self.addr, conversation)
            .into_client_request()
            .expect("ws request");
        if let Some(token) = token {
            request.headers_mut().insert(
                "authorization",
                format!("Bearer {token}").parse().expect("header"),
            );
        }
        connect_async(request).await.map(|(stream, _)| stream)
    }

    /// 等到房间内的会话数达到预期
    pub async fn wait_for_room(&self, conversation: i64, expected: usize) {
        let room = ConversationId::new(conversation);
        for _ in 0..100 {
            if self.hub.room_size(room).await.expect("hub alive") == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("room {conversation} never reached {expected} sessions");
    }
}

/// 读取下一帧 JSON 文本，忽略控制帧
pub async fn next_json(ws: &mut WsStream) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame in time")
            .expect("stream open")
            .expect("frame ok");
        if let TungsteniteMessage::Text(text) = frame {
            return serde_json::from_str(text.as_str()).expect("json frame");
        }
    }
}

pub fn text_frame(value: Value) -> TungsteniteMessage {
    TungsteniteMessage::Text(value.to_string().into())
}
