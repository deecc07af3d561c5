#![forbid(unsafe_code)]

use std::collections::HashSet;
use std::sync::Arc;

use mirador_core::{ObjectRef, ObjectState};
use mirador_store::Store;

fn obj(name: &str, ns: Option<&str>, rv: &str) -> Arc<ObjectState> {
    let mut meta = serde_json::json!({ "name": name, "resourceVersion": rv });
    if let Some(ns) = ns {
        meta["namespace"] = serde_json::Value::String(ns.to_string());
    }
    Arc::new(ObjectState::from_raw(serde_json::json!({ "metadata": meta })).unwrap())
}

#[test]
fn replay_final_state_is_last_non_delete() {
    let store = Store::new();

    // add a, duplicate add a (replaces), add b, update a, delete b
    store.put(obj("a", Some("ns"), "1"));
    store.put(obj("a", Some("ns"), "1"));
    store.put(obj("b", None, "2"));
    store.put(obj("a", Some("ns"), "3"));
    store.delete(&ObjectRef::cluster("b"));

    assert_eq!(store.len(), 1);
    let a = store.get(&ObjectRef::namespaced("ns", "a")).unwrap();
    assert_eq!(a.version.as_str(), "3");
    assert!(store.get(&ObjectRef::cluster("b")).is_none());
}

#[test]
fn put_returns_displaced_entry() {
    let store = Store::new();
    assert!(store.put(obj("a", Some("ns"), "1")).is_none());
    let prev = store.put(obj("a", Some("ns"), "2")).unwrap();
    assert_eq!(prev.version.as_str(), "1");
}

#[test]
fn delete_returns_last_known_state() {
    let store = Store::new();
    store.put(obj("a", Some("ns"), "1"));
    let removed = store.delete(&ObjectRef::namespaced("ns", "a")).unwrap();
    assert_eq!(removed.version.as_str(), "1");
    assert!(store.delete(&ObjectRef::namespaced("ns", "a")).is_none());
    assert!(store.is_empty());
}

#[test]
fn retain_prunes_everything_not_listed() {
    let store = Store::new();
    store.put(obj("a", Some("ns"), "1"));
    store.put(obj("b", Some("ns"), "2"));
    store.put(obj("c", None, "3"));

    let keep: HashSet<ObjectRef> =
        [ObjectRef::namespaced("ns", "a")].into_iter().collect();
    let mut removed: Vec<String> =
        store.retain(&keep).iter().map(|o| o.id.to_string()).collect();
    removed.sort();

    assert_eq!(removed, vec!["c".to_string(), "ns/b".to_string()]);
    assert_eq!(store.len(), 1);
    assert!(store.get(&ObjectRef::namespaced("ns", "a")).is_some());
}

#[test]
fn readers_see_whole_entries_across_replacement() {
    let store = Store::new();
    store.put(obj("a", Some("ns"), "1"));
    let before = store.get(&ObjectRef::namespaced("ns", "a")).unwrap();
    store.put(obj("a", Some("ns"), "2"));
    // The old Arc is still a complete, coherent snapshot.
    assert_eq!(before.version.as_str(), "1");
    assert_eq!(
        store.get(&ObjectRef::namespaced("ns", "a")).unwrap().version.as_str(),
        "2"
    );
}
