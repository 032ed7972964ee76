mod common;

use serde_json::{Value, json};

use common::{Harness, error_code};

#[tokio::test]
async fn emulation_in_one_scope_is_invisible_in_another() {
    let h = Harness::new();

    let set = h.call("s1", "emulate", json!({"networkConditions": "Slow 3G"})).await;
    assert!(!set.is_error, "{}", set.text());

    let other = h.call("s2", "get_emulation", json!({})).await;
    assert!(!other.is_error);
    assert_eq!(other.field("emulation").unwrap()["network"], Value::Null);
    assert!(other.text().contains("No emulation active"));

    let same = h.call("s1", "get_emulation", json!({})).await;
    assert_eq!(same.field("emulation").unwrap()["network"]["name"], json!("Slow 3G"));

    let applied = h.browser.calls_to("Network.emulateNetworkConditions");
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].params["latency"], json!(2000.0));
}

#[tokio::test]
async fn calls_without_a_scope_share_nothing() {
    let h = Harness::new();
    let ephemeral = h.scopes.resolve(None);
    h.dispatcher
        .dispatch("emulate", json!({"cpuThrottlingRate": 4}), ephemeral)
        .await;

    let later = h.dispatcher.dispatch("get_emulation", json!({}), h.scopes.resolve(None)).await;
    assert_eq!(later.field("emulation").unwrap()["cpuThrottlingRate"], Value::Null);
    assert!(h.scopes.is_empty());
}

#[tokio::test]
async fn bad_emulation_arguments_never_reach_the_browser() {
    let h = Harness::new();
    let out = h.call("s1", "emulate", json!({"cpuThrottlingRate": 50})).await;
    assert_eq!(error_code(&out), Some("validation_error"));
    assert!(h.browser.calls_to("Emulation.setCPUThrottlingRate").is_empty());
}

#[tokio::test]
async fn switched_window_is_remembered_per_scope() {
    let h = Harness::new();

    let switched = h.call("s1", "switch_tab", json!({"tabId": 12})).await;
    assert!(!switched.is_error, "{}", switched.text());
    assert_eq!(switched.field("windowId"), Some(&json!(7)));

    h.call("s1", "list_tabs", json!({})).await;
    h.call("s2", "list_tabs", json!({})).await;

    let actions = h.extension.actions.lock().clone();
    let tabs: Vec<&Value> = actions
        .iter()
        .filter(|(action, _)| action == "getTabs")
        .map(|(_, payload)| payload)
        .collect();
    assert_eq!(tabs.len(), 2);
    assert_eq!(tabs[0]["windowId"], json!(7));
    assert!(tabs[1].get("windowId").is_none());
}

#[tokio::test]
async fn extension_inventory_lands_in_scope_state() {
    let h = Harness::new();
    let out = h.call("s1", "list_extensions", json!({})).await;
    assert!(out.text().contains("Bridge 1.2.0"));

    let state = h.scopes.resolve(Some("s1")).snapshot().await;
    assert_eq!(state.extensions.len(), 1);
    assert_eq!(state.extensions[0].id, "abc");
    assert!(h.scopes.resolve(Some("s2")).snapshot().await.extensions.is_empty());
}
