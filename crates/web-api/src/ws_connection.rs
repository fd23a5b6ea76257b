use std::{sync::Arc, time::Duration};

use application::{MessagingHub, SessionHandle};
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::{ConversationId, UserId};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    sync::mpsc,
    time::{interval_at, timeout, Instant},
};

use crate::{
    frames::{InboundFrame, OutboundFrame},
    state::AppState,
};

/// 把一帧序列化后交给中枢广播，失败只记录日志
pub(crate) async fn publish(hub: &MessagingHub, room: ConversationId, frame: OutboundFrame<'_>) {
    let payload = match frame.to_json() {
        Ok(json) => json,
        Err(err) => {
            tracing::warn!(error = %err, "failed to serialize websocket payload");
            return;
        }
    };
    if let Err(err) = hub.broadcast(room, payload).await {
        tracing::warn!(room_id = %room, error = %err, "广播失败");
    }
}

#[derive(Debug, thiserror::Error)]
enum WriteFailure {
    #[error("transport error: {0}")]
    Transport(#[from] axum::Error),
    #[error("write deadline elapsed")]
    Deadline,
}

/// 单个 WebSocket 连接
///
/// 读循环在当前任务中运行，写循环是独立任务：
/// - 写循环独占出站接收端，按期发送 Ping，出站通道关闭后发送 Close
/// - 读循环解析入站帧，持久化后通过中枢广播
/// - 任一循环结束都会注销会话并关闭连接
pub struct ConnectionSession {
    state: AppState,
    user_id: UserId,
    room: ConversationId,
}

impl ConnectionSession {
    /// 调用方须已完成令牌与成员资格校验
    pub fn new(state: AppState, user_id: UserId, room: ConversationId) -> Self {
        Self {
            state,
            user_id,
            room,
        }
    }

    pub async fn run(self, socket: WebSocket) {
        let realtime = self.state.realtime.clone();
        let (handle, outbound) =
            SessionHandle::new(self.room, self.user_id, realtime.outbound_buffer);
        let session_id = handle.id();

        if let Err(err) = self.state.hub.register(handle).await {
            tracing::error!(error = %err, "会话注册失败");
            return;
        }
        tracing::info!(user_id = %self.user_id, room_id = %self.room, session_id, "WebSocket 连接已建立");

        let (sink, mut stream) = socket.split();
        let mut write_task = tokio::spawn(write_loop(
            sink,
            outbound,
            realtime.write_wait(),
            realtime.ping_period(),
        ));

        let write_finished = tokio::select! {
            _ = self.read_loop(&mut stream) => false,
            _ = &mut write_task => true,
        };

        if let Err(err) = self.state.hub.unregister(self.room, session_id).await {
            tracing::warn!(error = %err, "会话注销失败");
        }

        // 注销后中枢丢弃发送端，写循环发送 Close 后退出
        if !write_finished && timeout(realtime.write_wait(), &mut write_task).await.is_err() {
            write_task.abort();
        }

        tracing::info!(user_id = %self.user_id, room_id = %self.room, session_id, "WebSocket 连接已关闭");
    }

    async fn read_loop(&self, stream: &mut SplitStream<WebSocket>) {
        let pong_wait = self.state.realtime.pong_wait();
        let mut last_typing: Option<Instant> = None;

        loop {
            let message = match timeout(pong_wait, stream.next()).await {
                Ok(Some(Ok(message))) => message,
                Ok(Some(Err(err))) => {
                    tracing::debug!(error = %err, "读取失败");
                    break;
                }
                Ok(None) => break,
                Err(_) => {
                    tracing::debug!(user_id = %self.user_id, "连接空闲超时");
                    break;
                }
            };

            match message {
                WsMessage::Text(text) => self.handle_text(text.as_str(), &mut last_typing).await,
                WsMessage::Close(_) => break,
                // Ping 由底层自动回复，Pong 只用于刷新空闲计时
                _ => {}
            }
        }
    }

    async fn handle_text(&self, text: &str, last_typing: &mut Option<Instant>) {
        let Some(frame) = InboundFrame::parse(text) else {
            return;
        };
        if frame.conversation_id() != self.room {
            return;
        }

        match frame {
            InboundFrame::Typing { is_typing, .. } => {
                let now = Instant::now();
                let throttle = self.state.realtime.typing_throttle();
                if last_typing.is_some_and(|last| now.duration_since(last) < throttle) {
                    return;
                }
                *last_typing = Some(now);

                publish(
                    &self.state.hub,
                    self.room,
                    OutboundFrame::Typing {
                        conversation_id: self.room,
                        user_id: self.user_id,
                        is_typing,
                    },
                )
                .await;
            }
            InboundFrame::Message { content, .. } => {
                if content.trim().is_empty() {
                    return;
                }
                match self
                    .state
                    .chat_service
                    .send_message(self.user_id, self.room, &content)
                    .await
                {
                    Ok(message) => {
                        publish(
                            &self.state.hub,
                            self.room,
                            OutboundFrame::Message { message: &message },
                        )
                        .await;
                    }
                    Err(err) => {
                        tracing::debug!(user_id = %self.user_id, room_id = %self.room, error = %err, "丢弃无法保存的消息帧");
                    }
                }
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    write_wait: Duration,
    ping_period: Duration,
) {
    let mut ping = interval_at(Instant::now() + ping_period, ping_period);

    loop {
        let result = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(payload) => write_frame(&mut sink, WsMessage::Text(payload.to_string().into()), write_wait).await,
                None => {
                    let _ = write_frame(&mut sink, WsMessage::Close(None), write_wait).await;
                    break;
                }
            },
            _ = ping.tick() => write_frame(&mut sink, WsMessage::Ping(Default::default()), write_wait).await,
        };

        if let Err(err) = result {
            tracing::debug!(error = %err, "写循环结束");
            break;
        }
    }

    let _ = timeout(write_wait, sink.close()).await;
}

async fn write_frame(
    sink: &mut SplitSink<WebSocket, WsMessage>,
    frame: WsMessage,
    write_wait: Duration,
) -> Result<(), WriteFailure> {
    match timeout(write_wait, sink.send(frame)).await {
        Ok(result) => result.map_err(WriteFailure::from),
        Err(_) => Err(WriteFailure::Deadline),
    }
}
