use redmap::settings::{CollectionSettings, StoreSettings};
use redmap::{Database, FieldDef, ModelDef, RedmapSettings, Sort, StoreBackend};
use std::env;

fn boat_def() -> ModelDef {
    ModelDef::builder("Boat")
        .field(FieldDef::string("name").unique())
        .field(FieldDef::string("length"))
        .field(FieldDef::list("crew"))
        .build()
        .expect("Boat model must be valid")
}

fn redb_settings(name: &str) -> RedmapSettings {
    let db_path = env::temp_dir().join("redmap").join(name).join(format!("{}_{}.db", name, rand::random::<u64>()));
    RedmapSettings {
        store: StoreSettings { backend: StoreBackend::Redb, db_path: db_path.to_string_lossy().into_owned(), db_cache_size_mb: 1 },
        collection: CollectionSettings { temp_key_prefix: "test:tmp".to_string() },
    }
}

#[test]
fn test_data_survives_reopening() {
    let settings = redb_settings("reopen");
    {
        let db = Database::from_settings(&settings).expect("Failed to open database");
        let boats = db.register(boat_def()).expect("register");
        for (name, length) in [("Pen Duick", 15.1), ("Smolt", 13.6), ("Rainbow", 17.45)] {
            let boat = boats.create([("name", name.into()), ("length", length.into())]).expect("create");
            boat.list("crew").expect("field").push_back(&["Eric", "Olivier"]).expect("push");
        }
    }
    let db = Database::from_settings(&settings).expect("Failed to reopen database");
    let boats = db.register(boat_def()).expect("register");
    assert_eq!(boats.collection().sort(Sort::by("length")).expect("sort").into_vec().expect("evaluate"), vec!["2", "1", "3"]);
    let smolt = boats.get_by("name", "Smolt").expect("get_by");
    assert_eq!(smolt.list("crew").expect("field").range(0, -1).expect("range"), vec!["Eric", "Olivier"]);
    let next = boats.create([("name", "Queen".into())]).expect("create");
    assert_eq!(next.pk().expect("pk"), Some("4".to_string()));
}

#[test]
fn test_sort_through_temp_key() {
    let settings = redb_settings("temp_prefix");
    let db = Database::from_settings(&settings).expect("Failed to open database");
    let boats = db.register(boat_def()).expect("register");
    for (name, length) in [("Pen Duick", 15.1), ("Smolt", 13.6), ("Rainbow", 17.45)] {
        boats.create([("name", name.into()), ("length", length.into())]).expect("create");
    }
    let keys_before = db.store().key_count().expect("count");
    let sorted = boats.collection().intersect([1, 3]).sort(Sort::by("-length")).expect("sort");
    assert_eq!(sorted.into_vec().expect("evaluate"), vec!["3", "1"]);
    assert_eq!(db.store().key_count().expect("count"), keys_before);
}
