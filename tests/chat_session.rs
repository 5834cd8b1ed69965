mod common;

use std::sync::Arc;

use opencode_manager::error::ErrorKind;
use opencode_manager::hydrate::{ChatSession, NO_CONTENT_PREVIEW};
use opencode_manager::model::LOADING_PREVIEW;
use opencode_manager::search::{candidates, filter_tokens, fuzzy_search, SearchOptions};
use opencode_manager::store::{FileStore, MetadataStore, SqliteOptions, SqliteStore};

use common::{collector, file_tree, sqlite_db};

fn stores(dir: &std::path::Path) -> Vec<Arc<dyn MetadataStore>> {
    let worktree = dir.join("alpha");
    std::fs::create_dir_all(&worktree).unwrap();
    let root = dir.join("storage");
    file_tree(&root, &worktree);
    let db = dir.join("opencode.db");
    sqlite_db(&db, &worktree);

    let (_, files_warn) = collector();
    let (_, sql_warn) = collector();
    vec![
        Arc::new(FileStore::new(root, files_warn)),
        Arc::new(SqliteStore::open(db, SqliteOptions::default(), sql_warn)),
    ]
}

#[tokio::test]
async fn test_both_backends_hydrate_alike() {
    let dir = tempfile::tempdir().unwrap();
    let mut hydrated = vec![];

    for store in stores(dir.path()) {
        let chat = ChatSession::open(store, "ses_one").await.unwrap();
        assert!(chat
            .messages()
            .iter()
            .all(|m| m.preview_text == LOADING_PREVIEW));

        let all = chat.hydrate_all().await.unwrap();
        assert_eq!(all[0].preview_text, "please fix the login form");
        assert_eq!(all[1].preview_text, "Looking at it now.");
        assert_eq!(all[1].parts.as_ref().map(Vec::len), Some(2));
        chat.close();
        hydrated.push(all);
    }

    assert_eq!(hydrated[0], hydrated[1]);
}

#[tokio::test]
async fn test_message_without_parts_previews_no_content() {
    let dir = tempfile::tempdir().unwrap();
    for store in stores(dir.path()) {
        let chat = ChatSession::open(store, "ses_two").await.unwrap();
        let message = chat.hydrate("msg_c").await.unwrap();
        assert_eq!(message.preview_text, NO_CONTENT_PREVIEW);
        assert_eq!(message.parts, Some(vec![]));
    }
}

#[tokio::test]
async fn test_cancelled_token_stops_hydration() {
    let dir = tempfile::tempdir().unwrap();
    let store = stores(dir.path()).remove(0);
    let chat = ChatSession::open(store, "ses_one").await.unwrap();

    chat.cancellation().cancel();
    let err = chat.hydrate("msg_a").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cancelled);
    assert!(chat.messages().iter().all(|m| m.parts.is_none()));
}

#[tokio::test]
async fn test_open_unknown_session() {
    let dir = tempfile::tempdir().unwrap();
    let store = stores(dir.path()).remove(0);
    let err = ChatSession::open(store, "ses_missing").await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_session_search_over_store() {
    let dir = tempfile::tempdir().unwrap();
    for store in stores(dir.path()) {
        let sessions = store.load_sessions(None).unwrap();
        let result = fuzzy_search(candidates(sessions), "login", &SearchOptions::default());
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].item.session_id, "ses_one");
    }
}

#[tokio::test]
async fn test_message_search_matches_chat_content() {
    let dir = tempfile::tempdir().unwrap();
    for store in stores(dir.path()) {
        let chat = ChatSession::open(store, "ses_one").await.unwrap();
        let messages = chat.hydrate_all().await.unwrap();
        chat.close();

        let result = fuzzy_search(candidates(messages.clone()), "login form", &SearchOptions::default());
        let ids: Vec<_> = result.items.iter().map(|h| h.item.message_id.as_str()).collect();
        assert_eq!(ids, vec!["msg_a"]);

        let hits = filter_tokens(messages, "tests passed");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].message_id, "msg_b");
    }
}
