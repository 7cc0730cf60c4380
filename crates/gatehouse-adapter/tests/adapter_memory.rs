use casbin::{DefaultModel, Model};
use gatehouse_adapter::store::RuleStore;
use gatehouse_adapter::{AdapterConfig, AdapterError, DatabaseAdapter, Filter, RuleEvent};

const MODEL: &str = r#"
[request_definition]
r = sub, obj, act

[policy_definition]
p = sub, obj, act

[role_definition]
g = _, _

[policy_effect]
e = some(where (p.eft == allow))

[matchers]
m = g(r.sub, p.sub) && r.obj == p.obj && r.act == p.act
"#;

fn rule(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

async fn empty_model() -> DefaultModel {
    DefaultModel::from_str(MODEL).await.expect("model")
}

fn adapter() -> DatabaseAdapter {
    DatabaseAdapter::in_memory(&AdapterConfig::default())
}

async fn stored(adapter: &DatabaseAdapter) -> Vec<(String, Vec<String>)> {
    adapter
        .store()
        .load_rules()
        .await
        .expect("load")
        .into_iter()
        .map(|row| (row.rule.ptype.clone(), row.rule.to_tuple()))
        .collect()
}

async fn seed_alice_and_bob(adapter: &DatabaseAdapter) {
    adapter
        .add_policies(
            "p",
            "p",
            &[rule(&["alice", "data1", "read"]), rule(&["bob", "data2", "write"])],
        )
        .await
        .expect("seed");
}

#[tokio::test]
async fn added_rule_loads_into_empty_model() {
    let adapter = adapter();
    adapter
        .add_policy("p", "p", &rule(&["alice", "data1", "read"]))
        .await
        .expect("add");

    let mut model = empty_model().await;
    adapter.load_policy(&mut model).await.expect("load");
    assert_eq!(
        model.get_policy("p", "p"),
        vec![rule(&["alice", "data1", "read"])]
    );
    assert!(!adapter.is_filtered());
}

#[tokio::test]
async fn load_keeps_storage_order_and_sections() {
    let adapter = adapter();
    seed_alice_and_bob(&adapter).await;
    adapter
        .add_policy("g", "g", &rule(&["alice", "admin"]))
        .await
        .expect("add");

    let mut model = empty_model().await;
    adapter.load_policy(&mut model).await.expect("load");
    assert_eq!(
        model.get_policy("p", "p"),
        vec![rule(&["alice", "data1", "read"]), rule(&["bob", "data2", "write"])]
    );
    assert_eq!(model.get_policy("g", "g"), vec![rule(&["alice", "admin"])]);
}

#[tokio::test]
async fn load_skips_undeclared_ptypes() {
    let adapter = adapter();
    adapter
        .add_policy("p", "p2", &rule(&["alice", "data1"]))
        .await
        .expect("add");
    adapter
        .add_policy("p", "p", &rule(&["bob", "data2", "write"]))
        .await
        .expect("add");

    let mut model = empty_model().await;
    adapter.load_policy(&mut model).await.expect("load");
    assert_eq!(
        model.get_policy("p", "p"),
        vec![rule(&["bob", "data2", "write"])]
    );
}

#[tokio::test]
async fn filtered_removal_returns_removed_rules() {
    let adapter = adapter();
    seed_alice_and_bob(&adapter).await;

    let removed = adapter
        .remove_filtered_policy("p", "p", 1, &rule(&["data1"]))
        .await
        .expect("remove");
    assert_eq!(removed, vec![rule(&["alice", "data1", "read"])]);
    assert_eq!(
        stored(&adapter).await,
        vec![("p".to_string(), rule(&["bob", "data2", "write"]))]
    );
}

#[tokio::test]
async fn filtered_update_replaces_selected_rows() {
    let adapter = adapter();
    adapter
        .add_policy("p", "p", &rule(&["alice", "data1", "read"]))
        .await
        .expect("add");

    let old = adapter
        .update_filtered_policies(
            "p",
            "p",
            &[rule(&["carol", "data3", "read"])],
            0,
            &rule(&["alice"]),
        )
        .await
        .expect("update");
    assert_eq!(old, vec![rule(&["alice", "data1", "read"])]);
    assert_eq!(
        stored(&adapter).await,
        vec![("p".to_string(), rule(&["carol", "data3", "read"]))]
    );
}

#[tokio::test]
async fn partial_rule_removes_every_match() {
    let adapter = adapter();
    adapter
        .add_policies(
            "p",
            "p",
            &[
                rule(&["alice", "data1", "read"]),
                rule(&["alice", "data2", "write"]),
                rule(&["bob", "data1", "read"]),
            ],
        )
        .await
        .expect("seed");
    adapter
        .add_policy("g", "g", &rule(&["alice", "admin"]))
        .await
        .expect("add");

    let removed = adapter
        .remove_policy("p", "p", &rule(&["alice"]))
        .await
        .expect("remove");
    assert_eq!(removed, 2);
    assert_eq!(
        stored(&adapter).await,
        vec![
            ("p".to_string(), rule(&["bob", "data1", "read"])),
            ("g".to_string(), rule(&["alice", "admin"])),
        ]
    );
}

#[tokio::test]
async fn wide_filtered_removal_stays_within_ptype() {
    let adapter = adapter();
    seed_alice_and_bob(&adapter).await;
    adapter
        .add_policy("g", "g", &rule(&["alice", "admin"]))
        .await
        .expect("add");

    let removed = adapter
        .remove_filtered_policy("p", "p", 0, &[])
        .await
        .expect("remove");
    assert_eq!(removed.len(), 2);
    assert_eq!(
        stored(&adapter).await,
        vec![("g".to_string(), rule(&["alice", "admin"]))]
    );
}

#[tokio::test]
async fn batch_update_is_all_or_nothing() {
    let adapter = adapter();
    seed_alice_and_bob(&adapter).await;
    let before = stored(&adapter).await;

    let err = adapter
        .update_policies(
            "p",
            "p",
            &[
                rule(&["alice", "data1", "read"]),
                rule(&["nobody", "data9", "read"]),
                rule(&["bob", "data2", "write"]),
            ],
            &[
                rule(&["alice", "data1", "write"]),
                rule(&["nobody", "data9", "write"]),
                rule(&["bob", "data2", "read"]),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::RuleNotFound { .. }));
    assert_eq!(stored(&adapter).await, before);
}

#[tokio::test]
async fn batch_update_applies_every_pair() {
    let adapter = adapter();
    seed_alice_and_bob(&adapter).await;

    adapter
        .update_policies(
            "p",
            "p",
            &[rule(&["alice", "data1", "read"]), rule(&["bob", "data2", "write"])],
            &[rule(&["alice", "data1", "write"]), rule(&["bob", "data2", "read"])],
        )
        .await
        .expect("update");
    assert_eq!(
        stored(&adapter).await,
        vec![
            ("p".to_string(), rule(&["alice", "data1", "write"])),
            ("p".to_string(), rule(&["bob", "data2", "read"])),
        ]
    );
}

#[tokio::test]
async fn update_overwrites_only_given_positions() {
    let adapter = adapter();
    seed_alice_and_bob(&adapter).await;

    let (before, after) = adapter
        .update_policy("p", "p", &rule(&["bob"]), &rule(&["carol"]))
        .await
        .expect("update");
    assert_eq!(before, rule(&["bob", "data2", "write"]));
    assert_eq!(after, rule(&["carol", "data2", "write"]));
    assert_eq!(
        stored(&adapter).await[1],
        ("p".to_string(), rule(&["carol", "data2", "write"]))
    );

    let err = adapter
        .update_policy("p", "p", &rule(&["bob"]), &rule(&["dave"]))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::RuleNotFound { .. }));
}

#[tokio::test]
async fn overlong_rules_never_reach_storage() {
    let adapter = adapter();
    let err = adapter
        .add_policies(
            "p",
            "p",
            &[
                rule(&["alice", "data1", "read"]),
                rule(&["1", "2", "3", "4", "5", "6", "7"]),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::TupleTooLong { len: 7 }));
    assert!(stored(&adapter).await.is_empty());
}

#[tokio::test]
async fn batch_removal_counts_every_row() {
    let adapter = adapter();
    seed_alice_and_bob(&adapter).await;
    let removed = adapter
        .remove_policies(
            "p",
            "p",
            &[rule(&["alice", "data1", "read"]), rule(&["bob", "data2", "write"])],
        )
        .await
        .expect("remove");
    assert_eq!(removed, 2);
    assert!(stored(&adapter).await.is_empty());
}

#[tokio::test]
async fn filtered_load_includes_groupings_and_sets_flag() {
    let adapter = adapter();
    seed_alice_and_bob(&adapter).await;
    adapter
        .add_policy("g", "g", &rule(&["alice", "admin"]))
        .await
        .expect("add");

    let mut model = empty_model().await;
    adapter
        .load_filtered_policy(&mut model, &Filter::fields([("v0", "alice")]))
        .await
        .expect("load");
    assert!(adapter.is_filtered());
    assert_eq!(
        model.get_policy("p", "p"),
        vec![rule(&["alice", "data1", "read"])]
    );
    assert_eq!(model.get_policy("g", "g"), vec![rule(&["alice", "admin"])]);

    adapter.load_policy(&mut model).await.expect("reload");
    assert!(!adapter.is_filtered());
}

#[tokio::test]
async fn filtered_load_with_no_matches_still_sets_flag() {
    let adapter = adapter();
    seed_alice_and_bob(&adapter).await;

    let mut model = empty_model().await;
    adapter
        .load_filtered_policy(&mut model, &Filter::fields([("v0", "nobody")]))
        .await
        .expect("load");
    assert!(adapter.is_filtered());
    assert!(model.get_policy("p", "p").is_empty());
}

#[tokio::test]
async fn filtered_load_rejects_unknown_fields() {
    let adapter = adapter();
    let mut model = empty_model().await;
    let err = adapter
        .load_filtered_policy(&mut model, &Filter::fields([("owner", "alice")]))
        .await
        .unwrap_err();
    assert!(matches!(err, AdapterError::UnknownField(_)));
    assert!(!adapter.is_filtered());
}

#[tokio::test]
async fn save_then_clear_round_trip() {
    let source = adapter();
    seed_alice_and_bob(&source).await;
    let mut model = empty_model().await;
    source.load_policy(&mut model).await.expect("load");

    let target = adapter();
    target.save_policy(&model).await.expect("save");
    assert_eq!(stored(&target).await, stored(&source).await);

    target.clear_policy().await.expect("clear");
    assert!(stored(&target).await.is_empty());
}

#[tokio::test]
async fn mutations_broadcast_events() {
    let adapter = adapter();
    let mut events = adapter.subscribe();
    seed_alice_and_bob(&adapter).await;
    adapter
        .remove_policy("p", "p", &rule(&["alice"]))
        .await
        .expect("remove");

    assert_eq!(events.recv().await.expect("event"), RuleEvent::Saved);
    assert_eq!(events.recv().await.expect("event"), RuleEvent::Deleted);
}

#[tokio::test]
async fn cached_loads_see_later_writes() {
    let adapter = DatabaseAdapter::in_memory(&AdapterConfig { cache_rules: true });
    seed_alice_and_bob(&adapter).await;

    let mut first = empty_model().await;
    adapter.load_policy(&mut first).await.expect("load");
    assert_eq!(first.get_policy("p", "p").len(), 2);

    adapter
        .remove_policy("p", "p", &rule(&["bob"]))
        .await
        .expect("remove");
    let mut second = empty_model().await;
    adapter.load_policy(&mut second).await.expect("load");
    assert_eq!(
        second.get_policy("p", "p"),
        vec![rule(&["alice", "data1", "read"])]
    );
}
