//! 会话服务单元测试

use std::sync::Arc;

use domain::ConversationId;

use super::test_support::{clock, seed_user};
use crate::{
    error::ApplicationError,
    memory::MemoryStore,
    services::{ChatService, ChatServiceDependencies, DEFAULT_PAGE_SIZE},
};

fn service(store: Arc<MemoryStore>) -> ChatService {
    ChatService::new(ChatServiceDependencies {
        conversation_repository: store.clone(),
        message_repository: store,
        clock: clock(),
    })
}

#[tokio::test]
async fn direct_conversation_is_idempotent() {
    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let alice = seed_user(&store, &clock, "alice@x.com", "pw").await;
    let bob = seed_user(&store, &clock, "bob@x.com", "pw").await;
    let chat = service(store.clone());

    let first = chat.create_direct_conversation(alice.id, bob.id).await.unwrap();
    let second = chat.create_direct_conversation(alice.id, bob.id).await.unwrap();
    let reversed = chat.create_direct_conversation(bob.id, alice.id).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(first.id, reversed.id);
    assert!(!first.is_group);
    assert_eq!(store.members(first.id).await.len(), 2);
}

#[tokio::test]
async fn non_members_cannot_send_or_read() {
    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let alice = seed_user(&store, &clock, "alice@x.com", "pw").await;
    let bob = seed_user(&store, &clock, "bob@x.com", "pw").await;
    let mallory = seed_user(&store, &clock, "mallory@x.com", "pw").await;
    let chat = service(store);

    let conversation = chat.create_direct_conversation(alice.id, bob.id).await.unwrap();

    let send = chat.send_message(mallory.id, conversation.id, "hi").await;
    assert!(matches!(send, Err(ApplicationError::Forbidden)));

    let read = chat.get_messages(mallory.id, conversation.id, 10, None).await;
    assert!(matches!(read, Err(ApplicationError::Forbidden)));

    let missing = chat
        .get_messages(alice.id, ConversationId::new(999), 10, None)
        .await;
    assert!(matches!(missing, Err(ApplicationError::Forbidden)));
}

#[tokio::test]
async fn blank_content_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let alice = seed_user(&store, &clock, "alice@x.com", "pw").await;
    let bob = seed_user(&store, &clock, "bob@x.com", "pw").await;
    let chat = service(store);
    let conversation = chat.create_direct_conversation(alice.id, bob.id).await.unwrap();

    let result = chat.send_message(alice.id, conversation.id, "   ").await;
    assert!(matches!(result, Err(ApplicationError::Domain(_))));
}

#[tokio::test]
async fn pagination_is_descending_and_respects_cursor() {
    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let alice = seed_user(&store, &clock, "alice@x.com", "pw").await;
    let bob = seed_user(&store, &clock, "bob@x.com", "pw").await;
    let chat = service(store);
    let conversation = chat.create_direct_conversation(alice.id, bob.id).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..40 {
        let sender = if i % 2 == 0 { alice.id } else { bob.id };
        let message = chat
            .send_message(sender, conversation.id, &format!("m{i}"))
            .await
            .unwrap();
        ids.push(message.id);
    }

    let newest = chat
        .get_messages(alice.id, conversation.id, 5, None)
        .await
        .unwrap();
    let newest_ids: Vec<_> = newest.iter().map(|m| m.id).collect();
    let expected: Vec<_> = ids.iter().rev().take(5).copied().collect();
    assert_eq!(newest_ids, expected);

    let cursor = ids[10];
    let older = chat
        .get_messages(bob.id, conversation.id, 100, Some(cursor.get()))
        .await
        .unwrap();
    assert_eq!(older.len(), 10);
    assert!(older.iter().all(|m| m.id < cursor));
    assert!(older.windows(2).all(|w| w[0].id > w[1].id));

    // 非法 limit 回退到默认值，非正游标被忽略
    let fallback = chat
        .get_messages(alice.id, conversation.id, 0, Some(0))
        .await
        .unwrap();
    assert_eq!(fallback.len(), DEFAULT_PAGE_SIZE as usize);
    assert_eq!(fallback[0].id, *ids.last().unwrap());
}

#[tokio::test]
async fn conversations_are_listed_per_member() {
    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let alice = seed_user(&store, &clock, "alice@x.com", "pw").await;
    let bob = seed_user(&store, &clock, "bob@x.com", "pw").await;
    let carol = seed_user(&store, &clock, "carol@x.com", "pw").await;
    let chat = service(store);

    chat.create_direct_conversation(alice.id, bob.id).await.unwrap();
    chat.create_direct_conversation(alice.id, carol.id).await.unwrap();

    assert_eq!(chat.list_conversations(alice.id).await.unwrap().len(), 2);
    assert_eq!(chat.list_conversations(bob.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn conversation_with_self_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let clock = clock();
    let alice = seed_user(&store, &clock, "alice@x.com", "pw").await;
    let chat = service(store);

    let result = chat.create_direct_conversation(alice.id, alice.id).await;
    assert!(matches!(result, Err(ApplicationError::Domain(_))));
}
