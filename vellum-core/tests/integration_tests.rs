// End-to-end tests driving the public database API.

use serde_json::{json, Value};
use tempfile::TempDir;
use vellum_core::{Command, Database, IndexKind, OpenMode};

fn open_db(dir: &TempDir) -> Database {
    Database::open(dir.path(), OpenMode::writer_create()).unwrap()
}

fn names(docs: &[vellum_core::Document]) -> Vec<String> {
    docs.iter()
        .map(|d| d.get_path("name").unwrap().as_str().unwrap().to_string())
        .collect()
}

#[test]
fn adults_query_returns_matching_people() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let people = db.collection("people").unwrap();
    people.save(&json!({"name": "Anna", "age": 27})).unwrap();
    people.save(&json!({"name": "Kolya", "age": 15})).unwrap();
    people.save(&json!({"name": "Ivan", "age": 18})).unwrap();

    let docs = people
        .find(&json!({"age": {"$gte": 18}}), &json!({}))
        .unwrap()
        .collect_remaining()
        .unwrap();
    assert_eq!(names(&docs), vec!["Anna", "Ivan"]);

    // Same answer through an index
    people.ensure_index("age", IndexKind::Number).unwrap();
    let indexed = people
        .find(&json!({"age": {"$gte": 18}}), &json!({}))
        .unwrap()
        .collect_remaining()
        .unwrap();
    assert_eq!(names(&indexed), vec!["Anna", "Ivan"]);
}

#[test]
fn case_insensitive_update_touches_one_document() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let parrots = db.collection("parrots").unwrap();
    parrots.save(&json!({"name": "Covi", "age": 7})).unwrap();
    parrots.save(&json!({"name": "Bianca", "age": 4})).unwrap();

    let updated = parrots
        .update(&json!({"name": {"$icase": "COVI"}, "$set": {"age": 8}}))
        .unwrap();
    assert_eq!(updated, 1);
    let covi = parrots.find_one(&json!({"name": "Covi"})).unwrap().unwrap();
    assert_eq!(covi.get_path("age").unwrap(), &json!(8));
}

#[test]
fn upsert_inserts_once_and_never_duplicates() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let stock = db.collection("stock").unwrap();
    let expr = json!({"sku": "tea-001", "$upsert": {"sku": "tea-001", "qty": 5}});

    for _ in 0..3 {
        stock.update(&expr).unwrap();
    }
    assert_eq!(stock.count(&json!({"sku": "tea-001"})).unwrap(), 1);
    let doc = stock.find_one(&json!({"sku": "tea-001"})).unwrap().unwrap();
    assert_eq!(doc.get_path("qty").unwrap(), &json!(5));
}

#[test]
fn unset_drops_fields_across_matches() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let coll = db.collection("people").unwrap();
    coll.save(&json!({"name": "Anna", "draft": true})).unwrap();
    coll.save(&json!({"name": "Ivan", "draft": true})).unwrap();
    coll.save(&json!({"name": "Olga"})).unwrap();

    let n = coll.update(&json!({"$unset": {"draft": ""}})).unwrap();
    assert_eq!(n, 2);
    assert_eq!(coll.count(&json!({"draft": {"$exists": true}})).unwrap(), 0);
}

#[test]
fn cursor_rewinds_and_repositions() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let coll = db.collection("rows").unwrap();
    for i in 0..4 {
        coll.save(&json!({"n": i})).unwrap();
    }

    let mut cursor = coll.find(&json!({}), &json!({})).unwrap();
    while cursor.next_doc().unwrap().is_some() {}
    cursor.reset().unwrap();
    assert_eq!(cursor.next_doc().unwrap().unwrap().get_path("n").unwrap(), &json!(0));

    cursor.set_pos(3).unwrap();
    assert_eq!(cursor.next_doc().unwrap().unwrap().get_path("n").unwrap(), &json!(3));
    assert!(cursor.set_pos(4).is_err());
}

#[test]
fn skip_and_max_slice_the_result_window() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let coll = db.collection("rows").unwrap();
    for i in 0..6 {
        coll.save(&json!({"n": i})).unwrap();
    }

    let docs = coll
        .find(&json!({}), &json!({"$skip": 1, "$max": 2}))
        .unwrap()
        .collect_remaining()
        .unwrap();
    let ns: Vec<&Value> = docs.iter().map(|d| d.get_path("n").unwrap()).collect();
    assert_eq!(ns, vec![&json!(1), &json!(2)]);
}

#[test]
fn orderby_fields_and_onlycount() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let coll = db.collection("people").unwrap();
    coll.save(&json!({"name": "Clara", "age": 35, "city": "Omsk"})).unwrap();
    coll.save(&json!({"name": "Anna", "age": 27, "city": "Tomsk"})).unwrap();
    coll.save(&json!({"name": "Boris", "age": 44, "city": "Omsk"})).unwrap();

    let docs = coll
        .find(
            &json!({}),
            &json!({"$orderby": {"age": -1}, "$fields": {"name": 1}}),
        )
        .unwrap()
        .collect_remaining()
        .unwrap();
    assert_eq!(names(&docs), vec!["Boris", "Clara", "Anna"]);
    // The $orderby field survives an include projection; others go
    assert_eq!(docs[0].get_path("age").unwrap(), &json!(44));
    assert!(docs[0].get_path("city").is_none());

    let counter = coll
        .find(&json!({"city": "Omsk"}), &json!({"$onlycount": true}))
        .unwrap();
    assert_eq!(counter.count(), 2);
    assert!(!counter.has_next());
}

#[test]
fn positional_update_addresses_matched_element() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let posts = db.collection("posts").unwrap();
    posts
        .save(&json!({
            "title": "hello",
            "comments": [
                {"author": "bob", "flagged": false},
                {"author": "eve", "flagged": false}
            ]
        }))
        .unwrap();

    let n = posts
        .update(&json!({
            "comments.author": "eve",
            "$set": {"comments.$.flagged": true}
        }))
        .unwrap();
    assert_eq!(n, 1);

    let doc = posts.find_one(&json!({})).unwrap().unwrap();
    assert_eq!(doc.get_path("comments.0.flagged").unwrap(), &json!(false));
    assert_eq!(doc.get_path("comments.1.flagged").unwrap(), &json!(true));
}

#[test]
fn elem_match_binds_conditions_to_one_element() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let orders = db.collection("orders").unwrap();
    orders
        .save(&json!({"items": [{"sku": "a", "qty": 1}, {"sku": "b", "qty": 9}]}))
        .unwrap();

    assert_eq!(
        orders
            .count(&json!({"items": {"$elemMatch": {"sku": "b", "qty": {"$gt": 5}}}}))
            .unwrap(),
        1
    );
    assert_eq!(
        orders
            .count(&json!({"items": {"$elemMatch": {"sku": "a", "qty": {"$gt": 5}}}}))
            .unwrap(),
        0
    );
}

#[test]
fn token_operators_on_string_arrays() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let coll = db.collection("articles").unwrap();
    coll.save(&json!({"name": "a", "tags": ["db", "rust", "embedded"]})).unwrap();
    coll.save(&json!({"name": "b", "tags": ["db", "go"]})).unwrap();

    assert_eq!(
        coll.count(&json!({"tags": {"$strand": ["db", "rust"]}})).unwrap(),
        1
    );
    assert_eq!(
        coll.count(&json!({"tags": {"$stror": ["go", "rust"]}})).unwrap(),
        2
    );

    // Array index narrows the same queries without changing answers
    coll.ensure_index("tags", IndexKind::Array).unwrap();
    assert_eq!(
        coll.count(&json!({"tags": {"$strand": ["db", "rust"]}})).unwrap(),
        1
    );
    assert_eq!(
        coll.count(&json!({"tags": {"$stror": ["go", "rust"]}})).unwrap(),
        2
    );
}

#[test]
fn data_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let oid = {
        let db = open_db(&dir);
        let coll = db.collection("pets").unwrap();
        coll.ensure_index("name", IndexKind::String).unwrap();
        let oid = coll.save(&json!({"name": "Covi"})).unwrap();
        coll.save(&json!({"name": "Rex"})).unwrap();
        coll.remove(&json!({"name": "Rex"})).unwrap();
        oid
    };

    let db = open_db(&dir);
    let coll = db.get_collection("pets").unwrap();
    assert_eq!(coll.count(&json!({})).unwrap(), 1);
    assert_eq!(coll.load(&oid).unwrap().get_path("name").unwrap(), &json!("Covi"));
    // The index came back from metadata and still answers
    assert_eq!(coll.count(&json!({"name": "Covi"})).unwrap(), 1);
}

#[test]
fn export_import_through_commands() {
    let db_dir = TempDir::new().unwrap();
    let dump_dir = TempDir::new().unwrap();
    let other_dir = TempDir::new().unwrap();

    let db = open_db(&db_dir);
    db.collection("pets")
        .unwrap()
        .save(&json!({"name": "Covi"}))
        .unwrap();

    let cmd = Command::parse(&json!({
        "export": {"path": dump_dir.path().to_str().unwrap()}
    }))
    .unwrap();
    let response = vellum_core::execute_command(&db, cmd);
    assert!(response.is_ok(), "{:?}", response.error);

    let db2 = open_db(&other_dir);
    let cmd = Command::parse(&json!({
        "import": {"path": dump_dir.path().to_str().unwrap(), "mode": "replace"}
    }))
    .unwrap();
    let response = vellum_core::execute_command(&db2, cmd);
    assert!(response.is_ok(), "{:?}", response.error);
    assert_eq!(
        db2.get_collection("pets").unwrap().count(&json!({})).unwrap(),
        1
    );
}

#[test]
fn dbmeta_reports_collections_and_indexes() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let coll = db.collection("pets").unwrap();
    coll.save(&json!({"name": "Covi"})).unwrap();
    coll.ensure_index("name", IndexKind::IString).unwrap();

    let response = vellum_core::execute_command(&db, Command::DbMeta);
    let meta = response.result.unwrap();
    assert_eq!(meta["collections"][0]["name"], json!("pets"));
    assert_eq!(meta["collections"][0]["indexes"][0]["kind"], json!("IString"));
}

#[test]
fn prune_keeps_answers_stable() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);
    let coll = db.collection("counters").unwrap();
    let oid = coll.save(&json!({"hits": 0})).unwrap();
    for _ in 0..100 {
        coll.update(&json!({"_id": oid.to_hex(), "$inc": {"hits": 1}}))
            .unwrap();
    }
    assert_eq!(
        coll.load(&oid).unwrap().get_path("hits").unwrap(),
        &json!(100)
    );

    let before = coll.stats().data_bytes;
    coll.prune().unwrap();
    assert!(coll.stats().data_bytes < before);
    assert_eq!(
        coll.load(&oid).unwrap().get_path("hits").unwrap(),
        &json!(100)
    );
}
