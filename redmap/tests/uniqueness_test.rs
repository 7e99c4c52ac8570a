use redmap::{AppError, Database, FieldDef, MemoryStore, Model, ModelDef, Store};
use std::sync::{Arc, Barrier};
use std::thread;

fn singers(store: Arc<dyn Store>) -> Model {
    let db = Database::new(store);
    db.register(
        ModelDef::builder("Singer")
            .field(FieldDef::string("name").unique())
            .field(FieldDef::hash("nickname").unique())
            .field(FieldDef::string("band").indexable())
            .build()
            .expect("Singer model must be valid"),
    )
    .expect("Failed to register Singer")
}

#[test]
fn test_duplicate_value_is_rejected() {
    let store = Arc::new(MemoryStore::new());
    let singers = singers(store.clone());
    singers.create([("name", "Joe".into()), ("band", "Clash".into())]).expect("first create");
    let result = singers.create([("name", "Joe".into()), ("band", "Pogues".into())]);
    assert!(matches!(result, Err(AppError::Uniqueness(_))));
    assert_eq!(singers.collection().into_vec().expect("evaluate"), vec!["1"]);
    assert_eq!(store.get("singer:name:Joe").expect("get"), Some("1".to_string()));
    assert!(!singers.exists_by("band", "Pogues").expect("exists"));
}

#[test]
fn test_failed_update_keeps_previous_value() {
    let store = Arc::new(MemoryStore::new());
    let singers = singers(store.clone());
    let joe = singers.create([("name", "Joe".into()), ("nickname", "Woody".into())]).expect("create");
    let shane = singers.create([("name", "Shane".into()), ("nickname", "Spider".into())]).expect("create");

    let name = shane.string("name").expect("field");
    assert!(matches!(name.set("Joe"), Err(AppError::Uniqueness(_))));
    assert_eq!(name.get().expect("get"), Some("Shane".to_string()));
    assert_eq!(joe.string("name").expect("field").get().expect("get"), Some("Joe".to_string()));
    assert_eq!(singers.get_by("name", "Joe").expect("get_by").pk().expect("pk"), Some("1".to_string()));
    assert_eq!(singers.get_by("name", "Shane").expect("get_by").pk().expect("pk"), Some("2".to_string()));

    let nickname = shane.hash("nickname").expect("field");
    assert!(matches!(nickname.set("Woody"), Err(AppError::Uniqueness(_))));
    assert_eq!(nickname.get().expect("get"), Some("Spider".to_string()));
    assert_eq!(store.get("singer:nickname:Woody").expect("get"), Some("1".to_string()));
}

#[test]
fn test_value_is_released_on_change_and_delete() {
    let store = Arc::new(MemoryStore::new());
    let singers = singers(store.clone());
    let joe = singers.create([("name", "Joe".into())]).expect("create");
    joe.string("name").expect("field").set("Joe Strummer").expect("rename");
    assert_eq!(store.get("singer:name:Joe").expect("get"), None);
    singers.create([("name", "Joe".into())]).expect("old value is free again");
    joe.delete().expect("delete");
    singers.create([("name", "Joe Strummer".into())]).expect("deleted value is free again");
    assert_eq!(singers.collection().len().expect("evaluate"), 2);
}

#[test]
fn test_setting_the_same_value_again() {
    let store = Arc::new(MemoryStore::new());
    let singers = singers(store.clone());
    let joe = singers.create([("name", "Joe".into())]).expect("create");
    joe.string("name").expect("field").set("Joe").expect("own value");
    assert_eq!(store.get("singer:name:Joe").expect("get"), Some("1".to_string()));
}

#[test]
fn test_concurrent_claims_yield_one_winner() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let singers = singers(store.clone());
    let contenders = 8;
    let barrier = Arc::new(Barrier::new(contenders));
    let handles: Vec<_> = (0..contenders)
        .map(|i| {
            let singers = singers.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                singers.create([("name", "Joe".into()), ("band", format!("band-{}", i).into())]).map(|_| ())
            })
        })
        .collect();
    let results: Vec<Result<(), AppError>> = handles.into_iter().map(|h| h.join().expect("thread panicked")).collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    let losers = results.iter().filter(|r| matches!(r, Err(AppError::Uniqueness(_)))).count();
    assert_eq!(winners, 1);
    assert_eq!(losers, contenders - 1);

    let living = singers.collection().into_vec().expect("evaluate");
    assert_eq!(living.len(), 1);
    let owner = store.get("singer:name:Joe").expect("get");
    assert_eq!(owner.as_ref(), living.first());
    let band = singers.get(living[0].as_str()).expect("get").string("band").expect("field").get().expect("get");
    assert!(band.is_some_and(|b| singers.exists_by("band", b.as_str()).expect("exists")));
}
