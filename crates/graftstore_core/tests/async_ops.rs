mod common;

use common::{item, open_store, owner, seed_owner_with_items, Owner};
use graftstore_core::{RepoError, Repository, SqliteContext};

#[tokio::test]
async fn find_async_matches_find() {
    let context = open_store();
    seed_owner_with_items(context.connection());
    let mut repo: Repository<Owner, SqliteContext> = Repository::try_new(context).unwrap();

    let found = repo.find_async(1_i64).await.unwrap().unwrap();

    assert_eq!(found.name, "owner");
    assert!(repo.find_async(77_i64).await.unwrap().is_none());
}

#[tokio::test]
async fn save_changes_async_commits_pending_work() {
    let mut repo: Repository<Owner, SqliteContext> = Repository::try_new(open_store()).unwrap();
    repo.create(owner(0, "async", vec![item(0, "member")]))
        .unwrap();

    let written = repo.save_changes_async().await.unwrap();

    assert_eq!(written, 2);
    let stored = repo.all(&["items"]).unwrap();
    assert_eq!(stored[0].items.len(), 1);
}

#[tokio::test]
async fn async_operations_fail_after_dispose() {
    let mut repo: Repository<Owner, SqliteContext> = Repository::try_new(open_store()).unwrap();
    repo.dispose();

    assert!(matches!(
        repo.save_changes_async().await,
        Err(RepoError::Disposed)
    ));
    assert!(matches!(
        repo.find_async(1_i64).await,
        Err(RepoError::Disposed)
    ));
}
