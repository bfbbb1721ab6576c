//! Applying HMR update results to a live module graph.

use fob_protocol::{HmrUpdateResult, Resource};
use fob_runtime::{
    Initializer, ModuleError, ModuleSystem, UpdateOutcome, Value, apply_update, initializer,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

type Log = Rc<RefCell<Vec<String>>>;

fn versioned(version: i32, log: &Log) -> Initializer {
    let log = log.clone();
    initializer(move |_s, m| {
        log.borrow_mut().push(format!("init {} v{version}", m.id()));
        m.exports_object().unwrap().set("version", version);
        let on_dispose = log.clone();
        let id = m.id().to_string();
        m.hot()
            .dispose(move |_data| on_dispose.borrow_mut().push(format!("dispose {id}")));
        Ok(())
    })
}

fn changed(id: &str, boundaries: &[&str], code: &str) -> HmrUpdateResult {
    let mut result = HmrUpdateResult {
        changed: vec![id.to_string()],
        mutable_modules: code.to_string(),
        ..Default::default()
    };
    result.boundaries.insert(
        id.to_string(),
        boundaries.iter().map(|b| b.to_string()).collect(),
    );
    result
}

#[test]
fn test_self_accepting_module_is_replaced() {
    let log: Log = Rc::default();
    let system = ModuleSystem::default();

    let accepted: Rc<RefCell<Option<Value>>> = Rc::default();
    let base = versioned(1, &log);
    let slot = accepted.clone();
    system
        .register("app", initializer(move |s, m| {
            base(s, m)?;
            let slot = slot.clone();
            m.hot()
                .accept_with(move |exports| *slot.borrow_mut() = Some(exports.clone()));
            Ok(())
        }))
        .unwrap();
    let old = system.require("app").unwrap();

    let update_log = log.clone();
    let evaluator = move |system: &ModuleSystem, code: &str| -> fob_runtime::Result<()> {
        update_log.borrow_mut().push(format!("evaluate {code}"));
        system.update("app", versioned(2, &update_log));
        Ok(())
    };

    let outcome = apply_update(&system, &changed("app", &["app"], "app@2"), &evaluator);
    assert_eq!(
        outcome,
        UpdateOutcome::Applied {
            updated: vec!["app".to_string()]
        }
    );

    let new = system.require("app").unwrap();
    assert!(!new.strict_equals(&old));
    assert_eq!(new.get("version").as_number(), Some(2.0));
    assert!(accepted.borrow().as_ref().unwrap().strict_equals(&new));
    assert_eq!(
        *log.borrow(),
        vec!["init app v1", "dispose app", "evaluate app@2", "init app v2"]
    );
}

#[test]
fn test_dependency_accept_keeps_parent_instance() {
    let log: Log = Rc::default();
    let system = ModuleSystem::default();
    system.register("child", versioned(1, &log)).unwrap();

    let parent_runs = Rc::new(Cell::new(0));
    let received: Rc<RefCell<Vec<Value>>> = Rc::default();
    let runs = parent_runs.clone();
    let sink = received.clone();
    system
        .register("parent", initializer(move |system, m| {
            runs.set(runs.get() + 1);
            system.require("child")?;
            let sink = sink.clone();
            m.hot()
                .accept_deps(["child"], move |deps| *sink.borrow_mut() = deps.to_vec());
            Ok(())
        }))
        .unwrap();
    system.require("parent").unwrap();

    let update_log = log.clone();
    let evaluator = move |system: &ModuleSystem, _code: &str| -> fob_runtime::Result<()> {
        system.update("child", versioned(2, &update_log));
        Ok(())
    };
    let outcome =
        apply_update(&system, &changed("child", &["parent"], "child@2"), &evaluator);

    assert_eq!(
        outcome,
        UpdateOutcome::Applied {
            updated: vec!["parent".to_string()]
        }
    );
    assert_eq!(parent_runs.get(), 1);
    assert_eq!(received.borrow().len(), 1);
    assert_eq!(received.borrow()[0].get("version").as_number(), Some(2.0));
    assert!(log.borrow().contains(&"dispose child".to_string()));
}

#[test]
fn test_transitive_chain_is_reinstantiated() {
    let log: Log = Rc::default();
    let system = ModuleSystem::default();
    system.register("leaf", versioned(1, &log)).unwrap();
    system
        .register("middle", initializer(|system, m| {
            let leaf = system.require("leaf")?;
            m.exports_object().unwrap().set("leafVersion", leaf.get("version"));
            Ok(())
        }))
        .unwrap();
    system
        .register("root", initializer(|system, m| {
            system.require("middle")?;
            m.hot().accept_deps(["middle"], |_deps| {});
            Ok(())
        }))
        .unwrap();
    system.require("root").unwrap();

    let update_log = log.clone();
    let evaluator = move |system: &ModuleSystem, _code: &str| -> fob_runtime::Result<()> {
        system.update("leaf", versioned(2, &update_log));
        Ok(())
    };
    apply_update(&system, &changed("leaf", &["root"], "leaf@2"), &evaluator);

    let middle = system.require("middle").unwrap();
    assert_eq!(middle.get("leafVersion").as_number(), Some(2.0));
}

#[test]
fn test_missing_boundary_requests_reload() {
    let log: Log = Rc::default();
    let system = ModuleSystem::default();
    system.register("lonely", versioned(1, &log)).unwrap();
    system.require("lonely").unwrap();

    let evaluated = Rc::new(Cell::new(false));
    let flag = evaluated.clone();
    let evaluator = move |_system: &ModuleSystem, _code: &str| -> fob_runtime::Result<()> {
        flag.set(true);
        Ok(())
    };

    let outcome = apply_update(&system, &changed("lonely", &[], "lonely@2"), &evaluator);
    assert!(matches!(outcome, UpdateOutcome::Reload { .. }));
    assert!(!evaluated.get());
    assert!(system.has_module("lonely"));
}

#[test]
fn test_declined_or_non_accepting_boundary_requests_reload() {
    let log: Log = Rc::default();
    let system = ModuleSystem::default();
    system.register("dep", versioned(1, &log)).unwrap();
    system
        .register("declines", initializer(|system, m| {
            system.require("dep")?;
            m.hot().decline();
            Ok(())
        }))
        .unwrap();
    system
        .register("ignores", initializer(|system, _m| {
            system.require("dep")?;
            Ok(())
        }))
        .unwrap();
    system.require("declines").unwrap();
    system.require("ignores").unwrap();

    let evaluator = |_system: &ModuleSystem, _code: &str| -> fob_runtime::Result<()> { Ok(()) };

    let outcome = apply_update(&system, &changed("dep", &["declines"], ""), &evaluator);
    let UpdateOutcome::Reload { reason } = outcome else {
        panic!("expected reload");
    };
    assert!(reason.contains("declined"));

    let outcome = apply_update(&system, &changed("dep", &["ignores"], ""), &evaluator);
    assert!(matches!(outcome, UpdateOutcome::Reload { .. }));
}

#[test]
fn test_uninstantiated_change_only_swaps_initializer() {
    let log: Log = Rc::default();
    let system = ModuleSystem::default();
    system.register("later", versioned(1, &log)).unwrap();

    let update_log = log.clone();
    let evaluator = move |system: &ModuleSystem, _code: &str| -> fob_runtime::Result<()> {
        system.update("later", versioned(2, &update_log));
        Ok(())
    };
    let outcome = apply_update(&system, &changed("later", &[], "later@2"), &evaluator);

    assert_eq!(outcome, UpdateOutcome::Applied { updated: vec![] });
    assert_eq!(
        system.require("later").unwrap().get("version").as_number(),
        Some(2.0)
    );
}

#[test]
fn test_removed_modules_are_pruned_and_map_replaced() {
    let system = ModuleSystem::default();
    let pruned = Rc::new(Cell::new(false));
    let flag = pruned.clone();
    system
        .register("old", initializer(move |_s, m| {
            let flag = flag.clone();
            m.hot().prune(move |_data| flag.set(true));
            Ok(())
        }))
        .unwrap();
    system.require("old").unwrap();

    let mut result = HmrUpdateResult {
        removed: vec!["old".to_string()],
        ..Default::default()
    };
    result
        .dynamic_resources_map
        .insert("page".to_string(), vec![Resource::script("page.js")]);

    let evaluator = |_system: &ModuleSystem, _code: &str| -> fob_runtime::Result<()> { Ok(()) };
    apply_update(&system, &result, &evaluator);

    assert!(pruned.get());
    assert!(!system.is_registered("old"));
    assert_eq!(
        system.dynamic_resources().get("page"),
        Some(&vec![Resource::script("page.js")])
    );
}

#[test]
fn test_failed_evaluation_requests_reload() {
    let log: Log = Rc::default();
    let system = ModuleSystem::default();
    let base = versioned(1, &log);
    system
        .register("app", initializer(move |s, m| {
            base(s, m)?;
            m.hot().accept();
            Ok(())
        }))
        .unwrap();
    system.require("app").unwrap();

    let evaluator = |_system: &ModuleSystem, _code: &str| -> fob_runtime::Result<()> {
        Err(ModuleError::Evaluation("Unexpected token".to_string()))
    };
    let outcome = apply_update(&system, &changed("app", &["app"], "app@2"), &evaluator);

    match outcome {
        UpdateOutcome::Reload { reason } => assert!(reason.contains("Unexpected token")),
        other => panic!("expected reload, got {other:?}"),
    }
    assert!(log.borrow().contains(&"dispose app".to_string()));
}
