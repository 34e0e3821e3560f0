//! Integration tests for relational mappings, against scripted and SQLite
//! datasources.

use nodestore_core::sql::SqliteDataSource;
use nodestore_core::{
    Constraint, CoreError, DataSource, IdStrategy, Key, MappingConfig, NodeState, Relation, Schema,
    SqlType, SqlValue, Value,
};
use nodestore_testkit::prelude::*;
use nodestore_testkit::scenarios::{grouped_schema, shop_schema, DDL};
use std::sync::Arc;
use tempfile::TempDir;

const SEED: &str = "\
    INSERT INTO USERS (ID, NAME, EMAIL, AGE) VALUES (41, 'zed', 'zed@example.com', 40);\n\
    INSERT INTO ORDERS (ID, USER_ID, STATUS, TOTAL) VALUES (1, 41, 'open', 10.0);\n\
    INSERT INTO ORDERS (ID, USER_ID, STATUS, TOTAL) VALUES (2, 41, 'shipped', 5.5);\n\
    INSERT INTO ORDERS (ID, USER_ID, STATUS, TOTAL) VALUES (3, 41, 'open', 7.25);";

struct Shop {
    test: TestManager,
    sqlite: Arc<SqliteDataSource>,
    recorder: Arc<RecordingDataSource>,
    _dir: TempDir,
}

fn shop(schema: Schema) -> Shop {
    let dir = TempDir::new().unwrap();
    let sqlite = Arc::new(SqliteDataSource::open("main", dir.path().join("shop.db")).unwrap());
    sqlite.execute_batch(DDL).unwrap();
    sqlite.execute_batch(SEED).unwrap();
    let recorder = Arc::new(RecordingDataSource::new(sqlite.clone()));
    let test = TestManager::memory_with(Default::default(), schema);
    test.register_datasource(recorder.clone());
    Shop {
        test,
        sqlite,
        recorder,
        _dir: dir,
    }
}

fn user_key(id: &str) -> Key {
    Key::db(Some("user"), id)
}

fn order_key(id: &str) -> Key {
    Key::db(Some("order"), id)
}

#[test]
fn insert_binds_generated_id_and_name() {
    let shop = shop(shop_schema("main"));
    let mut tx = shop.test.transactor();
    tx.begin("signup").unwrap();
    let user = tx.create("user", Some("alice")).unwrap();
    assert_eq!(user.id(), "42");
    assert_eq!(user.key(), user_key("42"));
    shop.recorder.clear();
    tx.commit().unwrap();

    let inserts = shop.recorder.statements_of("INSERT");
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].sql, "INSERT INTO USERS (ID, AGE, EMAIL, NAME) VALUES (?, ?, ?, ?)");
    assert_eq!(
        inserts[0].params,
        vec![
            SqlValue::Integer(42),
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Text("alice".to_string()),
        ]
    );

    let mut conn = shop.sqlite.connect().unwrap();
    let rows = conn.query("SELECT NAME FROM USERS WHERE ID = 42", &[], 0).unwrap();
    assert_eq!(rows, vec![vec![SqlValue::Text("alice".to_string())]]);
}

#[test]
fn committed_user_reloads_from_the_table() {
    let shop = shop(shop_schema("main"));
    let mut tx = shop.test.transactor();
    tx.begin("signup").unwrap();
    let user = tx.create("user", Some("alice")).unwrap();
    tx.set(&user, "email", Value::from("alice@example.com")).unwrap();
    tx.set(&user, "age", Value::Integer(30)).unwrap();
    tx.commit().unwrap();
    assert_eq!(shop.recorder.statements_of("INSERT").len(), 1);

    shop.test.cache().clear();
    shop.recorder.clear();

    let mut tx = shop.test.transactor();
    tx.begin("reload").unwrap();
    let loaded = tx.get(&user_key("42")).unwrap().unwrap();
    assert!(!Arc::ptr_eq(&user, &loaded));
    assert_eq!(shop.recorder.statements_of("SELECT").len(), 1);

    assert_eq!(loaded.key(), user.key());
    assert_eq!(loaded.name(), "alice");
    assert_eq!(loaded.prototype(), "user");
    assert_eq!(loaded.state(), NodeState::Clean);
    assert!(loaded.dirty_properties().is_empty());
    for prop in user.properties() {
        assert_eq!(loaded.get(&prop.name), Some(prop.value), "property {}", prop.name);
    }
    tx.commit().unwrap();
}

#[test]
fn rows_load_into_typed_properties() {
    let shop = shop(shop_schema("main"));
    let mut tx = shop.test.transactor();
    tx.begin("load").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    assert_eq!(user.name(), "zed");
    assert_eq!(user.get("age"), Some(Value::Integer(40)));
    assert_eq!(user.get("email"), Some(Value::from("zed@example.com")));
    assert_eq!(user.state(), NodeState::Clean);
    assert!(user.dirty_properties().is_empty());

    let order = tx.get(&order_key("2")).unwrap().unwrap();
    assert_eq!(order.get("total"), Some(Value::Float(5.5)));
    assert_eq!(order.get("user"), Some(Value::Node(user_key("41"))));
    let owner = tx.get_reference(&order, "user").unwrap().unwrap();
    assert!(Arc::ptr_eq(&owner, &user));

    assert!(tx.get(&user_key("999")).unwrap().is_none());
    tx.commit().unwrap();
}

#[test]
fn update_writes_only_dirty_columns() {
    let shop = shop(shop_schema("main"));
    let mut tx = shop.test.transactor();
    tx.begin("edit").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    tx.set(&user, "email", Value::from("new@example.com")).unwrap();
    shop.recorder.clear();
    tx.commit().unwrap();

    let updates = shop.recorder.statements_of("UPDATE");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].sql, "UPDATE USERS SET EMAIL = ? WHERE ID = ?");
    assert_eq!(
        updates[0].params,
        vec![SqlValue::Text("new@example.com".to_string()), SqlValue::Integer(41)]
    );
    assert!(user.dirty_properties().is_empty());

    tx.begin("touch nothing").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    tx.set(&user, "unmapped", Value::from("memory only")).unwrap();
    shop.recorder.clear();
    tx.commit().unwrap();
    assert!(shop.recorder.statements_of("UPDATE").is_empty());
}

#[test]
fn delete_removes_the_row() {
    let shop = shop(shop_schema("main"));
    let mut tx = shop.test.transactor();
    tx.begin("cancel").unwrap();
    let order = tx.get(&order_key("3")).unwrap().unwrap();
    tx.delete(&order).unwrap();
    tx.commit().unwrap();
    assert_eq!(order.state(), NodeState::Invalid);

    let deletes = shop.recorder.statements_of("DELETE");
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].sql, "DELETE FROM ORDERS WHERE ID = ?");

    tx.begin("check").unwrap();
    assert!(tx.get(&order_key("3")).unwrap().is_none());
    tx.commit().unwrap();
}

#[test]
fn children_are_listed_and_cached() {
    let shop = shop(shop_schema("main"));
    let mut tx = shop.test.transactor();
    tx.begin("list").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    let orders = tx.children(&user).unwrap();
    let ids: Vec<_> = orders.iter().map(|o| o.id()).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert_eq!(user.subnodes(), vec![order_key("1"), order_key("2"), order_key("3")]);
    assert_eq!(tx.count_children(&user).unwrap(), 3);

    shop.recorder.clear();
    let second = tx.get_child(&user, "2").unwrap().unwrap();
    assert!(Arc::ptr_eq(&second, &orders[1]));
    assert!(shop.recorder.statements().is_empty());
    tx.commit().unwrap();
}

#[test]
fn missing_children_are_remembered_until_data_changes() {
    let shop = shop(shop_schema("main"));
    let mut tx = shop.test.transactor();
    tx.begin("miss").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    shop.recorder.clear();
    assert!(tx.get_child(&user, "77").unwrap().is_none());
    assert_eq!(shop.recorder.statements_of("SELECT").len(), 1);
    tx.commit().unwrap();

    tx.begin("miss again").unwrap();
    assert!(tx.get_child(&user, "77").unwrap().is_none());
    assert!(tx.get(&order_key("77")).unwrap().is_none());
    assert_eq!(shop.recorder.statements_of("SELECT").len(), 1);
    tx.commit().unwrap();

    shop.sqlite
        .execute_batch("INSERT INTO ORDERS (ID, USER_ID, STATUS, TOTAL) VALUES (77, 41, 'open', 1.0)")
        .unwrap();
    shop.test.schema().get("order").unwrap().notify_data_change();

    tx.begin("found").unwrap();
    let order = tx.get_child(&user, "77").unwrap().unwrap();
    assert_eq!(order.get("status"), Some(Value::from("open")));
    assert_eq!(shop.recorder.statements_of("SELECT").len(), 2);
    tx.commit().unwrap();
}

#[test]
fn writes_bump_the_data_watermark() {
    let shop = shop(shop_schema("main"));
    let before = shop.test.schema().get("order").unwrap().last_data_change();
    let mut tx = shop.test.transactor();
    tx.begin("new order").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    let order = tx.create("order", None).unwrap();
    assert_eq!(order.id(), "4");
    tx.set(&order, "status", Value::from("open")).unwrap();
    tx.add_child(&user, &order).unwrap();
    assert_eq!(order.get("user"), Some(Value::Node(user_key("41"))));
    tx.commit().unwrap();
    assert!(shop.test.schema().get("order").unwrap().last_data_change() > before);

    let mut conn = shop.sqlite.connect().unwrap();
    let rows = conn.query("SELECT USER_ID, STATUS FROM ORDERS WHERE ID = 4", &[], 0).unwrap();
    assert_eq!(
        rows,
        vec![vec![SqlValue::Integer(41), SqlValue::Text("open".to_string())]]
    );
}

#[test]
fn groups_become_virtual_nodes() {
    let shop = shop(grouped_schema("main"));
    let mut tx = shop.test.transactor();
    tx.begin("groups").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    let groups = tx.children(&user).unwrap();
    let names: Vec<_> = groups.iter().map(|g| g.name()).collect();
    assert_eq!(names, vec!["open", "shipped"]);
    assert!(groups.iter().all(|g| g.is_virtual()));
    assert_eq!(groups[0].prototype(), "hopobject");
    assert_eq!(groups[0].key(), Key::synthetic(user.key(), "open"));
    assert_eq!(tx.count_children(&user).unwrap(), 2);

    let open = tx.get_child(&user, "open").unwrap().unwrap();
    assert!(Arc::ptr_eq(&open, &groups[0]));
    let members: Vec<_> = tx.children(&open).unwrap().iter().map(|o| o.id()).collect();
    assert_eq!(members, vec!["1", "3"]);
    assert_eq!(tx.count_children(&open).unwrap(), 2);

    assert!(tx.get_child(&user, "returned").unwrap().is_none());
    tx.commit().unwrap();
}

#[test]
fn prefetch_loads_missing_children_in_one_query() {
    let shop = shop(shop_schema("main"));
    let nmgr = Arc::clone(&shop.test.nmgr);
    let mut tx = nmgr.transactor();
    tx.begin("prefetch").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    let rel = nmgr.schema().get("user").unwrap().subnode_relation().unwrap();
    let keys = [order_key("1"), order_key("2"), order_key("3")];

    shop.recorder.clear();
    nmgr.prefetch_nodes(&mut tx, &user, &rel, &keys).unwrap();
    let selects = shop.recorder.statements_of("SELECT");
    assert_eq!(selects.len(), 1);
    assert!(selects[0].sql.contains("ORDERS.ID IN (?, ?, ?)"));
    assert!(keys.iter().all(|k| nmgr.cache().contains(k)));

    shop.recorder.clear();
    nmgr.prefetch_nodes(&mut tx, &user, &rel, &keys).unwrap();
    for key in &keys {
        tx.get(key).unwrap().unwrap();
    }
    assert!(shop.recorder.statements().is_empty());
    tx.commit().unwrap();
}

#[test]
fn prefetch_builds_groups_of_a_grouped_property() {
    let schema = shop_schema("main");
    schema
        .register(
            "user",
            MappingConfig::relational("USERS", "main")
                .id_column("ID")
                .name_column("NAME")
                .property("name", Relation::primitive("NAME", SqlType::Varchar))
                .property(
                    "orders",
                    Relation::collection("order")
                        .constraint(Constraint::columns("ID", "USER_ID"))
                        .group_by("STATUS")
                        .order("ID"),
                ),
        )
        .unwrap();
    let shop = shop(schema);
    let nmgr = Arc::clone(&shop.test.nmgr);
    let mut tx = nmgr.transactor();
    tx.begin("prefetch groups").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    let rel = nmgr.schema().get("user").unwrap().property_relation("orders").unwrap();
    let keys = [Key::synthetic(user.key(), "open"), Key::synthetic(user.key(), "shipped")];

    shop.recorder.clear();
    nmgr.prefetch_nodes(&mut tx, &user, &rel, &keys).unwrap();
    assert_eq!(shop.recorder.statements_of("SELECT").len(), 1);

    let open = nmgr.cache().get(&keys[0]).unwrap();
    assert!(open.is_virtual());
    assert_eq!(open.subnodes(), vec![order_key("1"), order_key("3")]);
    let shipped = nmgr.cache().get(&keys[1]).unwrap();
    assert_eq!(shipped.subnodes(), vec![order_key("2")]);
    assert!(nmgr.cache().contains(&order_key("2")));
    tx.commit().unwrap();
}

fn accessor_schema() -> Schema {
    let schema = shop_schema("main");
    schema
        .register(
            "user",
            MappingConfig::relational("USERS", "main")
                .name_column("NAME")
                .property("name", Relation::primitive("NAME", SqlType::Varchar))
                .subnodes(
                    Relation::collection("order")
                        .constraint(Constraint::columns("ID", "USER_ID"))
                        .accessor("STATUS"),
                ),
        )
        .unwrap();
    schema
}

#[test]
fn secondary_keys_share_the_primary_instance() {
    let shop = shop(accessor_schema());
    let mut tx = shop.test.transactor();
    tx.begin("by name").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    let shipped = tx.get_child(&user, "shipped").unwrap().unwrap();
    assert_eq!(shipped.key(), order_key("2"));
    let by_id = tx.get(&order_key("2")).unwrap().unwrap();
    assert!(Arc::ptr_eq(&shipped, &by_id));
    tx.commit().unwrap();

    shop.recorder.clear();
    tx.begin("again").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    let again = tx.get_child(&user, "shipped").unwrap().unwrap();
    assert!(Arc::ptr_eq(&again, &shipped));
    let secondary = Key::synthetic(user.key(), "shipped");
    assert!(shop.test.cache().contains(&secondary));
    assert!(shop.recorder.statements().is_empty());
    tx.commit().unwrap();
}

#[test]
fn ambiguous_accessor_is_an_error() {
    let shop = shop(accessor_schema());
    let mut tx = shop.test.transactor();
    tx.begin("ambiguous").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    let err = tx.get_child(&user, "open").unwrap_err();
    assert!(matches!(err, CoreError::MultipleRows { .. }));
    tx.abort().unwrap();
}

#[test]
fn sequence_ids_come_from_the_database() {
    let schema = shop_schema("main");
    schema
        .register(
            "order",
            MappingConfig::relational("ORDERS", "main")
                .id_strategy(IdStrategy::Sequence("ORDER_SEQ".to_string()))
                .property("status", Relation::primitive("STATUS", SqlType::Varchar)),
        )
        .unwrap();
    let shop = shop(schema);
    let mut tx = shop.test.transactor();
    tx.begin("sequence").unwrap();
    let a = tx.create("order", None).unwrap();
    let b = tx.create("order", None).unwrap();
    assert_eq!(a.id(), "1");
    assert_eq!(b.id(), "2");
    tx.abort().unwrap();
}

#[test]
fn scripted_failure_aborts_the_commit() {
    let ds = ScriptedDataSource::new("main")
        .respond(
            "FROM USERS WHERE",
            vec![vec![
                SqlValue::Integer(7),
                SqlValue::Integer(30),
                SqlValue::Text("a@example.com".to_string()),
                SqlValue::Text("ann".to_string()),
            ]],
        )
        .fail_on("UPDATE");
    let test = TestManager::memory_with(Default::default(), shop_schema("main"));
    test.register_datasource(Arc::new(ds.clone()));

    let mut tx = test.transactor();
    tx.begin("doomed").unwrap();
    let user = tx.get(&user_key("7")).unwrap().unwrap();
    assert_eq!(user.name(), "ann");
    tx.set(&user, "age", Value::Integer(31)).unwrap();
    let err = tx.commit().unwrap_err();
    assert!(matches!(err, CoreError::Sql(_)));
    assert!(!tx.is_active());
    assert_eq!(user.state(), NodeState::Invalid);
    assert_eq!(ds.statements_of("UPDATE").len(), 1);
    assert_eq!(test.stats().aborts(), 1);
}

#[test]
fn export_copies_a_row_elsewhere() {
    let shop = shop(shop_schema("main"));
    let target = ScriptedDataSource::new("archive");
    let mut tx = shop.test.transactor();
    tx.begin("export").unwrap();
    let user = tx.get(&user_key("41")).unwrap().unwrap();
    shop.test.export_node(&user, &target).unwrap();
    tx.commit().unwrap();

    let inserts = target.statements_of("INSERT");
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].params[0], SqlValue::Integer(41));
    assert_eq!(inserts[0].params[3], SqlValue::Text("zed".to_string()));
}
