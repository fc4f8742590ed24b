use std::{sync::Arc, time::Duration};

use super::{RtcSession, RtcSessionTable};
use crate::test_support::{FakePeer, candidate};

fn session(id: &str) -> Arc<RtcSession> {
    Arc::new(RtcSession::new(id, Arc::new(FakePeer::default())))
}

#[tokio::test]
async fn test_queued_candidates_return_immediately() {
    let session = session("s");
    session.push_local_candidate(candidate(1));
    session.push_local_candidate(candidate(2));

    assert_eq!(session.next_candidates().await, vec![candidate(1), candidate(2)]);
    assert_eq!(session.pending_len(), 0);
}

#[tokio::test]
async fn test_waiter_wakes_on_first_candidate() -> anyhow::Result<()> {
    let session = session("s");
    let waiting = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.next_candidates().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!waiting.is_finished());

    session.push_local_candidate(candidate(7));
    let got = tokio::time::timeout(Duration::from_secs(2), waiting).await??;
    assert_eq!(got, vec![candidate(7)]);
    assert_eq!(session.pending_len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_newer_waiter_displaces_older() -> anyhow::Result<()> {
    let session = session("s");
    let first = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.next_candidates().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.next_candidates().await })
    };

    let displaced = tokio::time::timeout(Duration::from_secs(2), first).await??;
    assert!(displaced.is_empty());

    session.push_local_candidate(candidate(1));
    let got = tokio::time::timeout(Duration::from_secs(2), second).await??;
    assert_eq!(got, vec![candidate(1)]);
    Ok(())
}

#[tokio::test]
async fn test_gathering_complete_releases_waiter() -> anyhow::Result<()> {
    let session = session("s");
    let waiting = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.next_candidates().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    session.gathering_complete();
    let got = tokio::time::timeout(Duration::from_secs(2), waiting).await??;
    assert!(got.is_empty());
    // nothing more is coming, so later callers do not block either
    assert!(session.next_candidates().await.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_close_releases_waiter() -> anyhow::Result<()> {
    let session = session("s");
    let waiting = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.next_candidates().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;

    session.close();
    let got = tokio::time::timeout(Duration::from_secs(2), waiting).await??;
    assert!(got.is_empty());
    Ok(())
}

#[test]
fn test_table() {
    let table = RtcSessionTable::new();
    assert!(table.is_empty());
    table.insert(session("a"));
    table.insert(session("b"));
    assert_eq!(table.len(), 2);
    assert_eq!(table.get("a").map(|s| s.id().to_string()), Some("a".to_string()));

    let shared = table.clone();
    assert!(shared.remove("a").is_some());
    assert!(table.get("a").is_none());
    assert!(table.remove("a").is_none());
    assert_eq!(table.ids(), vec!["b".to_string()]);
}
