//! Tests for error handling and edge cases.

use rowgit::{CommitEngine, CommitRequest, Filter, Hash, Repository, Row, VcError};

fn test_repo() -> Repository {
    let repo = Repository::open_in_memory().unwrap();
    repo.apply_schema("CREATE TABLE products (id INTEGER PRIMARY KEY, name TEXT NOT NULL);")
        .unwrap();
    repo.init("system", "master").unwrap();
    repo.track_table("products").unwrap();
    repo
}

// --- Lookups ---

#[test]
fn test_unknown_branch() {
    let repo = test_repo();

    assert!(matches!(
        repo.get_branch("nonexistent"),
        Err(VcError::NotFound { kind: "branch", .. })
    ));
    assert!(matches!(
        repo.switch_branch("josh", "nonexistent"),
        Err(VcError::NotFound { .. })
    ));
    assert!(matches!(
        repo.connection_for("nonexistent"),
        Err(VcError::NotFound { .. })
    ));
    assert!(matches!(
        repo.fork_branch("nonexistent", "copy", "josh"),
        Err(VcError::NotFound { .. })
    ));
    assert!(matches!(
        repo.create_commit(CommitRequest::new("josh", "lost").on_branch("nonexistent")),
        Err(VcError::NotFound { .. })
    ));
}

#[test]
fn test_unknown_commit() {
    let repo = test_repo();
    let result = repo.get_commit(&Hash::from_bytes(b"never committed"));
    assert!(matches!(result, Err(VcError::NotFound { kind: "commit", .. })));
}

#[test]
fn test_unknown_object() {
    let repo = test_repo();
    assert!(repo.get_object(&Hash::from_bytes(b"nothing")).unwrap().is_none());
}

// --- Names ---

#[test]
fn test_duplicate_branch_name() {
    let repo = test_repo();
    repo.create_branch("feature", "josh").unwrap();

    assert!(matches!(
        repo.create_branch("feature", "lucy"),
        Err(VcError::DuplicateName(name)) if name == "feature"
    ));
    assert!(matches!(
        repo.create_branch("master", "lucy"),
        Err(VcError::DuplicateName(_))
    ));
    assert_eq!(repo.list_branches().unwrap().len(), 2);
}

#[test]
fn test_invalid_branch_names() {
    let repo = test_repo();
    for name in ["", "   ", " padded", "line\nbreak"] {
        assert!(
            matches!(repo.create_branch(name, "josh"), Err(VcError::InvalidIdentifier(_))),
            "{name:?} should be rejected"
        );
    }
}

#[test]
fn test_invalid_table_names() {
    let repo = test_repo();
    for name in ["", "vc_commits", "sqlite_master", "b1__products", "drop table;"] {
        assert!(
            matches!(repo.track_table(name), Err(VcError::InvalidIdentifier(_))),
            "{name:?} should be rejected"
        );
    }
}

// --- Tracking ---

#[test]
fn test_track_missing_table() {
    let repo = test_repo();
    assert!(matches!(
        repo.track_table("missing"),
        Err(VcError::NotFound { kind: "table", .. })
    ));
    assert_eq!(repo.tracked_tables().unwrap().len(), 1);
}

#[test]
fn test_track_composite_key_table() {
    let repo = test_repo();
    repo.apply_schema("CREATE TABLE pairs (a INTEGER, b INTEGER, PRIMARY KEY (a, b));")
        .unwrap();

    assert!(matches!(
        repo.track_table("pairs"),
        Err(VcError::UnsupportedTable { .. })
    ));
}

#[test]
fn test_snapshot_untracked_table() {
    let repo = test_repo();
    repo.apply_schema("CREATE TABLE notes (body TEXT);").unwrap();

    assert!(matches!(
        repo.snapshot("notes", "master"),
        Err(VcError::UntrackedTable(_))
    ));

    repo.untrack_table("products").unwrap();
    assert!(matches!(
        repo.snapshot("products", "master"),
        Err(VcError::UntrackedTable(_))
    ));
    assert!(matches!(
        repo.untrack_table("notes"),
        Err(VcError::UntrackedTable(_))
    ));
}

// --- Writes ---

#[test]
fn test_unknown_column() {
    let repo = test_repo();
    let master = repo.connection_for("master").unwrap();

    assert!(matches!(
        master.insert("products", Row::new().with("name", "boots").with("size", 9)),
        Err(VcError::InvalidOperation(_))
    ));
    assert!(matches!(
        master.delete("products", Filter::eq("size", 9)),
        Err(VcError::InvalidOperation(_))
    ));
}

#[test]
fn test_key_column_is_immutable() {
    let repo = test_repo();
    let master = repo.connection_for("master").unwrap();
    master.insert("products", Row::new().with("name", "boots")).unwrap();

    assert!(matches!(
        master.update("products", Filter::key(1), Row::new().with("id", 5)),
        Err(VcError::InvalidOperation(_))
    ));
    assert!(matches!(
        master.update("products", Filter::key(1), Row::new()),
        Err(VcError::InvalidOperation(_))
    ));
}

#[test]
fn test_constraint_violation_leaves_no_object() {
    let repo = test_repo();
    let master = repo.connection_for("master").unwrap();
    master.insert("products", Row::new().with("name", "boots")).unwrap();

    assert!(matches!(
        master.insert("products", Row::new().with("id", 1).with("name", "clash")),
        Err(VcError::StoreConstraintViolation(_))
    ));
    assert!(matches!(
        master.update("products", Filter::key(1), Row::new().with("name", rowgit::Value::Null)),
        Err(VcError::StoreConstraintViolation(_))
    ));

    assert_eq!(master.count("products").unwrap(), 1);
    assert_eq!(repo.objects().unwrap().len(), 1);
}

#[test]
fn test_tracked_rows_need_a_key() {
    let repo = test_repo();
    repo.apply_schema("CREATE TABLE codes (code TEXT PRIMARY KEY, label TEXT);")
        .unwrap();
    repo.track_table("codes").unwrap();
    let master = repo.connection_for("master").unwrap();

    assert!(matches!(
        master.insert("codes", Row::new().with("label", "x")),
        Err(VcError::InvalidOperation(_))
    ));
    assert_eq!(master.count("codes").unwrap(), 0);

    let stored = master
        .insert("codes", Row::new().with("code", "A1").with("label", "x"))
        .unwrap();
    assert_eq!(master.get("codes", "A1").unwrap().unwrap(), stored);
    assert_eq!(repo.snapshot("codes", "master").unwrap().len(), 1);
    assert!(repo.create_commit(CommitRequest::new("josh", "codes")).is_ok());
}

#[test]
fn test_track_rejects_existing_null_keys() {
    let repo = test_repo();
    repo.apply_schema(
        "CREATE TABLE codes (code TEXT PRIMARY KEY, label TEXT);
         INSERT INTO codes (label) VALUES ('orphan');",
    )
    .unwrap();

    assert!(matches!(
        repo.track_table("codes"),
        Err(VcError::InvalidOperation(_))
    ));
    assert!(matches!(
        repo.snapshot("codes", "master"),
        Err(VcError::UntrackedTable(_))
    ));
    assert!(repo.create_commit(CommitRequest::new("josh", "still fine")).is_ok());
}

// --- Commits ---

#[test]
fn test_stale_parent_is_a_conflict() {
    let repo = test_repo();
    let stale = repo.default_branch().unwrap().head;
    let winner = repo
        .create_commit(CommitRequest::new("josh", "first").expecting_parent(stale))
        .unwrap();

    let result = repo.create_commit(CommitRequest::new("lucy", "second").expecting_parent(stale));

    match result {
        Err(VcError::Conflict {
            branch,
            expected,
            actual,
        }) => {
            assert_eq!(branch, "master");
            assert_eq!(expected, stale);
            assert_eq!(actual, winner.hash);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert_eq!(repo.default_branch().unwrap().head, winner.hash);
}

#[test]
fn test_failed_commit_leaves_no_commit() {
    let repo = test_repo();
    let stale = repo.default_branch().unwrap().head;
    repo.create_commit(CommitRequest::new("josh", "first")).unwrap();
    let created_at = rowgit::Timestamp(42);

    let result = repo.create_commit(
        CommitRequest::new("lucy", "second")
            .created_at(created_at)
            .expecting_parent(stale),
    );
    assert!(matches!(result, Err(VcError::Conflict { .. })));

    let would_be = CommitEngine::build(
        Some(stale),
        repo.manifest("master").unwrap().hash().unwrap(),
        "lucy".into(),
        "second".into(),
        String::new(),
        created_at,
    )
    .unwrap();
    assert!(matches!(
        repo.get_commit(&would_be.hash),
        Err(VcError::NotFound { .. })
    ));
}

// --- Lifecycle ---

#[test]
fn test_double_init() {
    let repo = test_repo();
    assert!(matches!(
        repo.init("system", "other"),
        Err(VcError::AlreadyInitialized)
    ));
    assert_eq!(repo.list_branches().unwrap().len(), 1);
}

#[test]
fn test_uninitialized_repository() {
    let repo = Repository::open_in_memory().unwrap();
    assert!(matches!(
        repo.track_table("products"),
        Err(VcError::NotInitialized)
    ));
    assert!(matches!(
        repo.connection_for("master"),
        Err(VcError::NotInitialized)
    ));
}
