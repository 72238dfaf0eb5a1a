//! End-to-end scenarios for the extension registry
//!
//! These drive the registry only through its public API, the way the
//! ExtensionConfig controller and hook callers do.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use tether_common::crd::{ExtensionConfig, ExtensionConfigSpec, ExtensionHandler, RequestHook};
use tether_registry::{ExtensionRegistry, RegistryError};

fn handler(name: &str, api_version: &str, hook: &str) -> ExtensionHandler {
    ExtensionHandler {
        name: name.to_string(),
        request_hook: RequestHook {
            api_version: api_version.to_string(),
            hook: hook.to_string(),
        },
        timeout_seconds: None,
        failure_policy: None,
    }
}

fn config(name: &str, handlers: Vec<ExtensionHandler>) -> ExtensionConfig {
    let mut config = ExtensionConfig::new(name, ExtensionConfigSpec::default());
    config.set_handlers(handlers);
    config
}

fn names(registry: &ExtensionRegistry, group: &str, hook: &str) -> BTreeSet<String> {
    registry
        .list(group, hook)
        .expect("list should succeed")
        .into_iter()
        .map(|r| r.name)
        .collect()
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn warm_up_then_lookup_by_hook_and_name() {
    let a = config("a", vec![handler("h1", "g/v1alpha1", "BeforeScale")]);
    let b = config("b", vec![handler("h2", "g/v1alpha1", "AfterProvision")]);

    let registry = ExtensionRegistry::new();
    registry.warm_up(&[a, b]).expect("warm-up");

    assert!(registry.is_ready());
    assert_eq!(names(&registry, "g", "BeforeScale"), set(&["h1"]));

    let h2 = registry.get("h2").expect("h2 registered");
    assert_eq!(h2.extension_config_name, "b");
}

#[test]
fn moving_a_handler_to_another_hook() {
    let a = config("a", vec![handler("h1", "g/v1alpha1", "BeforeScale")]);
    let b = config("b", vec![handler("h2", "g/v1alpha1", "AfterProvision")]);

    let registry = ExtensionRegistry::new();
    registry.warm_up(&[a, b]).expect("warm-up");

    let a_moved = config("a", vec![handler("h1", "g/v1alpha1", "AfterProvision")]);
    registry.add(&a_moved).expect("re-add a");

    assert!(names(&registry, "g", "BeforeScale").is_empty());
    assert_eq!(names(&registry, "g", "AfterProvision"), set(&["h1", "h2"]));
}

#[test]
fn add_is_idempotent() {
    let registry = ExtensionRegistry::new();
    registry.warm_up(&[]).expect("warm-up");

    let a = config(
        "a",
        vec![
            handler("h1", "g/v1", "BeforeScale"),
            handler("h2", "g/v1", "AfterProvision"),
        ],
    );
    registry.add(&a).expect("first add");
    let once = (
        names(&registry, "g", "BeforeScale"),
        names(&registry, "g", "AfterProvision"),
        registry.len(),
    );

    registry.add(&a).expect("second add");
    let twice = (
        names(&registry, "g", "BeforeScale"),
        names(&registry, "g", "AfterProvision"),
        registry.len(),
    );

    assert_eq!(once, twice);
}

#[test]
fn remove_only_touches_the_owner() {
    let registry = ExtensionRegistry::new();
    registry
        .warm_up(&[
            config("a", vec![handler("a-1", "g/v1", "BeforeScale")]),
            config("b", vec![handler("b-1", "g/v1", "BeforeScale")]),
        ])
        .expect("warm-up");

    registry
        .remove(&config("a", vec![]))
        .expect("remove a");

    assert_eq!(names(&registry, "g", "BeforeScale"), set(&["b-1"]));
    assert!(matches!(
        registry.get("a-1"),
        Err(RegistryError::NotFound { .. })
    ));
}

#[test]
fn list_filters_group_and_hook_but_not_version() {
    let registry = ExtensionRegistry::new();
    registry
        .warm_up(&[config(
            "a",
            vec![
                handler("v1", "g/v1", "BeforeScale"),
                handler("v2", "g/v2", "BeforeScale"),
                handler("other-group", "h/v1", "BeforeScale"),
                handler("other-hook", "g/v1", "AfterProvision"),
            ],
        )])
        .expect("warm-up");

    assert_eq!(names(&registry, "g", "BeforeScale"), set(&["v1", "v2"]));
    for r in registry.list("g", "BeforeScale").expect("list") {
        assert_eq!(r.group_version_hook.group, "g");
        assert_eq!(r.group_version_hook.hook, "BeforeScale");
    }
}

#[test]
fn one_malformed_handler_registers_nothing_for_that_owner() {
    let registry = ExtensionRegistry::new();
    registry
        .warm_up(&[config("other", vec![handler("keep", "g/v1", "BeforeScale")])])
        .expect("warm-up");

    let broken = config(
        "a",
        vec![
            handler("ok-1", "g/v1", "BeforeScale"),
            handler("ok-2", "g/v1", "BeforeScale"),
            handler("bad", "g/v1/oops", "BeforeScale"),
        ],
    );
    assert!(registry.add(&broken).is_err());

    assert_eq!(names(&registry, "g", "BeforeScale"), set(&["keep"]));
}

#[test]
fn failed_add_drops_handlers_the_owner_no_longer_declares() {
    let registry = ExtensionRegistry::new();
    registry
        .warm_up(&[
            config("b", vec![handler("old", "g/v1", "BeforeScale")]),
            config("other", vec![handler("keep", "g/v1", "BeforeScale")]),
        ])
        .expect("warm-up");

    let updated = config(
        "b",
        vec![
            handler("new", "g/v1", "BeforeScale"),
            handler("bad", "g/v1/x", "BeforeScale"),
        ],
    );
    assert!(registry.add(&updated).expect_err("malformed").is_validation());

    assert!(matches!(registry.get("old"), Err(RegistryError::NotFound { .. })));
    assert!(matches!(registry.get("new"), Err(RegistryError::NotFound { .. })));
    assert_eq!(names(&registry, "g", "BeforeScale"), set(&["keep"]));
}

#[test]
fn failed_warm_up_keeps_every_operation_gated() {
    let registry = ExtensionRegistry::new();
    let err = registry
        .warm_up(&[
            config("a", vec![handler("h1", "g/v1", "BeforeScale")]),
            config("b", vec![handler("h2", "not/a/version", "BeforeScale")]),
        ])
        .expect_err("b is malformed");
    assert!(err.is_validation());

    assert!(!registry.is_ready());
    let owner = config("a", vec![]);
    assert!(registry.add(&owner).expect_err("add").is_invalid_operation());
    assert!(registry.remove(&owner).expect_err("remove").is_invalid_operation());
    assert!(registry.get("h1").expect_err("get").is_invalid_operation());
    assert!(registry
        .list("g", "BeforeScale")
        .expect_err("list")
        .is_invalid_operation());
}

#[test]
fn concurrent_owners_do_not_interfere() {
    let registry = Arc::new(ExtensionRegistry::new());
    registry.warm_up(&[]).expect("warm-up");

    thread::scope(|scope| {
        for owner in 0..8 {
            let registry = registry.clone();
            scope.spawn(move || {
                let name = format!("owner-{owner}");
                for round in 0..50 {
                    let handlers = (0..3)
                        .map(|i| handler(&format!("{name}-{round}-{i}"), "g/v1", "BeforeScale"))
                        .collect();
                    registry.add(&config(&name, handlers)).expect("add");
                    let _ = registry.list("g", "BeforeScale").expect("list");
                }
            });
        }
    });

    // Each owner keeps exactly its last round
    assert_eq!(registry.len(), 8 * 3);
    for owner in 0..8 {
        let r = registry
            .get(&format!("owner-{owner}-49-0"))
            .expect("last round registered");
        assert_eq!(r.extension_config_name, format!("owner-{owner}"));
    }
}
