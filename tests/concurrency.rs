//! Tests for concurrent writers sharing one database file.

use rowgit::{CommitRequest, Hash, Repository, RepositoryConfig, Row, VcError};
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;

fn setup(path: &Path) {
    let repo = Repository::open(RepositoryConfig::at(path)).unwrap();
    repo.apply_schema("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT);")
        .unwrap();
    repo.init("system", "master").unwrap();
    repo.track_table("products").unwrap();
    repo.connection_for("master")
        .unwrap()
        .insert("products", Row::new().with("name", "boots"))
        .unwrap();
}

#[test]
fn test_racing_commits_on_one_parent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("race.db");
    setup(&path);
    let head = Repository::open(RepositoryConfig::at(&path))
        .unwrap()
        .default_branch()
        .unwrap()
        .head;

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["josh", "lucy"]
        .into_iter()
        .map(|author| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let repo = Repository::open(RepositoryConfig::at(&path)).unwrap();
                barrier.wait();
                repo.create_commit(
                    CommitRequest::new(author, format!("{author} commits"))
                        .expecting_parent(head),
                )
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    let conflicts = results
        .iter()
        .filter(|r| matches!(r, Err(VcError::Conflict { .. })))
        .count();

    assert_eq!(winners.len(), 1);
    assert_eq!(conflicts, 1);

    let repo = Repository::open(RepositoryConfig::at(&path)).unwrap();
    assert_eq!(repo.default_branch().unwrap().head, winners[0].hash);
    assert_eq!(winners[0].parent, Some(head));
}

#[test]
fn test_serialized_commits_form_one_chain() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chain.db");
    setup(&path);
    let per_thread = 5;

    let handles: Vec<_> = ["josh", "lucy"]
        .into_iter()
        .map(|author| {
            let path = path.clone();
            thread::spawn(move || {
                let repo = Repository::open(RepositoryConfig::at(&path)).unwrap();
                for i in 0..per_thread {
                    repo.create_commit(CommitRequest::new(author, format!("{author} #{i}")))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let repo = Repository::open(RepositoryConfig::at(&path)).unwrap();
    let mut chain: Vec<Hash> = Vec::new();
    let mut cursor = Some(repo.default_branch().unwrap().head);
    while let Some(hash) = cursor {
        chain.push(hash);
        cursor = repo.get_commit(&hash).unwrap().parent;
    }

    // every commit plus the root, each exactly once
    assert_eq!(chain.len(), 2 * per_thread + 1);
    let mut unique = chain.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), chain.len());
}

#[test]
fn test_identical_rows_from_parallel_branches_share_object() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dedup.db");
    setup(&path);
    {
        let repo = Repository::open(RepositoryConfig::at(&path)).unwrap();
        repo.fork_branch("master", "left", "josh").unwrap();
        repo.fork_branch("master", "right", "lucy").unwrap();
    }

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|branch| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let repo = Repository::open(RepositoryConfig::at(&path)).unwrap();
                let handle = repo.connection_for(branch).unwrap();
                barrier.wait();
                handle
                    .insert("products", Row::new().with("name", "shoes"))
                    .unwrap()
                    .digest()
                    .unwrap()
            })
        })
        .collect();
    let digests: Vec<Hash> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(digests[0], digests[1]);
    let repo = Repository::open(RepositoryConfig::at(&path)).unwrap();
    assert_eq!(repo.objects().unwrap().len(), 2);
}

#[test]
fn test_shared_repository_across_threads() {
    let repo = Arc::new(Repository::open_in_memory().unwrap());
    repo.apply_schema("CREATE TABLE counters (id INTEGER PRIMARY KEY, n INTEGER);")
        .unwrap();
    repo.init("system", "master").unwrap();
    repo.track_table("counters").unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                let master = repo.connection_for("master").unwrap();
                for i in 0..10 {
                    master
                        .insert("counters", Row::new().with("n", t * 100 + i))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(repo.connection_for("master").unwrap().count("counters").unwrap(), 40);
    assert_eq!(repo.snapshot("counters", "master").unwrap().len(), 40);
    assert_eq!(repo.objects().unwrap().len(), 40);
}
