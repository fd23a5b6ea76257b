//! 实时消息中枢
//!
//! 进程内单例，维护 房间 -> 在线会话 的注册表。注册表只由 [`run`] 所在的任务持有，
//! 其它组件通过命令队列与之交互，因此注册、注销与广播之间不需要额外加锁。
//!
//! 背压策略：广播对每个会话都是非阻塞投递，出站缓冲已满的会话直接被移出房间并关闭
//! 其出站通道，慢消费者不会拖慢整个房间。

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use domain::{ConversationId, UserId};
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// 会话在进程内的唯一编号
pub type SessionId = u64;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    #[error("messaging hub is closed")]
    Closed,
}

/// 注册到中枢的会话句柄。
///
/// 出站发送端只存在于这里，中枢丢弃句柄即关闭该会话的出站通道，
/// 因此通道至多被关闭一次。
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    room: ConversationId,
    user_id: UserId,
    outbound: mpsc::Sender<Arc<str>>,
}

impl SessionHandle {
    /// 创建会话句柄以及对应的出站接收端，`buffer` 为出站缓冲帧数
    pub fn new(
        room: ConversationId,
        user_id: UserId,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<Arc<str>>) {
        let (outbound, receiver) = mpsc::channel(buffer.max(1));
        let handle = Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            room,
            user_id,
            outbound,
        };
        (handle, receiver)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn room(&self) -> ConversationId {
        self.room
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }
}

enum HubCommand {
    Register {
        session: SessionHandle,
        ack: oneshot::Sender<()>,
    },
    Unregister {
        room: ConversationId,
        session_id: SessionId,
    },
    Broadcast {
        room: ConversationId,
        payload: Arc<str>,
    },
    RoomSize {
        room: ConversationId,
        reply: oneshot::Sender<usize>,
    },
}

/// 中枢的发送端，可随意克隆；所有克隆被丢弃后中枢任务退出
#[derive(Clone)]
pub struct MessagingHub {
    commands: mpsc::Sender<HubCommand>,
}

impl MessagingHub {
    /// 启动中枢任务
    pub fn spawn(queue_capacity: usize) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(queue_capacity.max(1));
        let task = tokio::spawn(run(receiver));
        (Self { commands }, task)
    }

    /// 注册会话，返回时会话已在房间内
    pub async fn register(&self, session: SessionHandle) -> Result<(), HubError> {
        let (ack, done) = oneshot::channel();
        self.send(HubCommand::Register { session, ack }).await?;
        done.await.map_err(|_| HubError::Closed)
    }

    pub async fn unregister(
        &self,
        room: ConversationId,
        session_id: SessionId,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Unregister { room, session_id }).await
    }

    /// 把一帧投递给房间内的全部会话
    pub async fn broadcast(
        &self,
        room: ConversationId,
        payload: impl Into<Arc<str>>,
    ) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast {
            room,
            payload: payload.into(),
        })
        .await
    }

    /// 房间当前的在线会话数，房间不存在时为 0
    pub async fn room_size(&self, room: ConversationId) -> Result<usize, HubError> {
        let (reply, answer) = oneshot::channel();
        self.send(HubCommand::RoomSize { room, reply }).await?;
        answer.await.map_err(|_| HubError::Closed)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }
}

async fn run(mut commands: mpsc::Receiver<HubCommand>) {
    let mut rooms: HashMap<ConversationId, HashMap<SessionId, SessionHandle>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register { session, ack } => {
                debug!(room_id = %session.room, user_id = %session.user_id, session_id = session.id, "会话加入房间");
                rooms
                    .entry(session.room)
                    .or_default()
                    .insert(session.id, session);
                let _ = ack.send(());
            }
            HubCommand::Unregister { room, session_id } => {
                if let Some(sessions) = rooms.get_mut(&room) {
                    if sessions.remove(&session_id).is_some() {
                        debug!(room_id = %room, session_id, "会话离开房间");
                    }
                    if sessions.is_empty() {
                        rooms.remove(&room);
                    }
                }
            }
            HubCommand::Broadcast { room, payload } => {
                let Some(sessions) = rooms.get_mut(&room) else {
                    continue;
                };

                let mut dropped = Vec::new();
                for (id, session) in sessions.iter() {
                    match session.outbound.try_send(Arc::clone(&payload)) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            warn!(room_id = %room, user_id = %session.user_id, session_id = id, "出站缓冲已满，断开慢消费者");
                            dropped.push(*id);
                        }
                        Err(TrySendError::Closed(_)) => dropped.push(*id),
                    }
                }

                for id in dropped {
                    sessions.remove(&id);
                }
                if sessions.is_empty() {
                    rooms.remove(&room);
                }
            }
            HubCommand::RoomSize { room, reply } => {
                let _ = reply.send(rooms.get(&room).map_or(0, HashMap::len));
            }
        }
    }

    info!("messaging hub stopped");
}
