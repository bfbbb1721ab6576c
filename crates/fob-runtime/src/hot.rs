//! Hot module replacement on the runtime side.
//!
//! Modules register callbacks through [`HotContext`]; they are stored as a
//! [`HotHook`] list on the module record and drained by [`apply_update`] in a
//! fixed order: dispose old instances, swap initializers, re-instantiate
//! accepting boundaries, prune removed modules.

use fob_protocol::HmrUpdateResult;
use rustc_hash::FxHashSet;
use std::rc::Rc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::module::Module;
use crate::system::ModuleSystem;
use crate::value::{Object, Value};

pub type AcceptCallback = Rc<dyn Fn(&Value)>;
pub type AcceptDepsCallback = Rc<dyn Fn(&[Value])>;
pub type DataCallback = Rc<dyn Fn(&Object)>;

/// One hot-update registration made by module code.
#[derive(Clone)]
pub enum HotHook {
    /// Module re-runs itself on update; the callback sees the new exports.
    SelfAccept(Option<AcceptCallback>),
    /// Module handles updates of `deps` without re-running.
    AcceptDeps {
        deps: Vec<String>,
        callback: AcceptDepsCallback,
    },
    /// Runs before the instance is replaced; may stash state in `data`.
    Dispose(DataCallback),
    /// Runs when the module is removed from the graph entirely.
    Prune(DataCallback),
    /// Any update reaching this module forces a full reload.
    Decline,
}

/// `module.hot` for one module instance.
pub struct HotContext<'a> {
    module: &'a Module,
}

impl<'a> HotContext<'a> {
    pub(crate) fn new(module: &'a Module) -> Self {
        Self { module }
    }

    pub fn accept(&self) {
        self.module.push_hook(HotHook::SelfAccept(None));
    }

    pub fn accept_with(&self, callback: impl Fn(&Value) + 'static) {
        self.module
            .push_hook(HotHook::SelfAccept(Some(Rc::new(callback))));
    }

    pub fn accept_deps<I, S>(&self, deps: I, callback: impl Fn(&[Value]) + 'static)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.module.push_hook(HotHook::AcceptDeps {
            deps: deps.into_iter().map(Into::into).collect(),
            callback: Rc::new(callback),
        });
    }

    pub fn dispose(&self, callback: impl Fn(&Object) + 'static) {
        self.module.push_hook(HotHook::Dispose(Rc::new(callback)));
    }

    pub fn prune(&self, callback: impl Fn(&Object) + 'static) {
        self.module.push_hook(HotHook::Prune(Rc::new(callback)));
    }

    pub fn decline(&self) {
        self.module.push_hook(HotHook::Decline);
    }

    /// Data left behind by the previous instance's dispose callbacks.
    pub fn data(&self) -> &Object {
        self.module.data()
    }
}

/// Executes the module code shipped in an update.
///
/// Implementations run `immutableModules`/`mutableModules` source, which calls
/// back into [`ModuleSystem::update`] and [`ModuleSystem::register`].
pub trait UpdateEvaluator {
    fn evaluate(&self, system: &ModuleSystem, code: &str) -> Result<()>;
}

impl<F> UpdateEvaluator for F
where
    F: Fn(&ModuleSystem, &str) -> Result<()>,
{
    fn evaluate(&self, system: &ModuleSystem, code: &str) -> Result<()> {
        self(system, code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Boundaries that were re-instantiated or notified, in order.
    Applied { updated: Vec<String> },
    /// The update cannot be applied in place.
    Reload { reason: String },
}

enum Acceptance {
    SelfAccept(Vec<AcceptCallback>),
    Deps(Vec<(Vec<String>, AcceptDepsCallback)>),
}

struct BoundaryPlan {
    boundary: String,
    /// Modules between the changed module and the boundary, boundary excluded.
    chain: Vec<String>,
    acceptance: Acceptance,
}

/// Apply one compile cycle's result to the live module graph.
///
/// Once old instances are disposed there is no going back: a failure while
/// evaluating new code or re-instantiating a boundary yields
/// [`UpdateOutcome::Reload`].
pub fn apply_update(
    system: &ModuleSystem,
    result: &HmrUpdateResult,
    evaluator: &dyn UpdateEvaluator,
) -> UpdateOutcome {
    let plans = match plan(system, result) {
        Ok(plans) => plans,
        Err(reason) => {
            info!(%reason, "hot update requires a full reload");
            return UpdateOutcome::Reload { reason };
        }
    };

    // dispose
    let mut disposed = FxHashSet::default();
    for plan in &plans {
        let boundary = matches!(plan.acceptance, Acceptance::SelfAccept(_))
            .then_some(&plan.boundary);
        for id in plan.chain.iter().chain(boundary) {
            if disposed.insert(id.clone()) {
                system.invalidate_module(id);
            }
        }
    }

    let updated = match swap_and_accept(system, result, evaluator, &plans) {
        Ok(updated) => updated,
        Err(err) => {
            warn!(error = %err, "hot update failed after dispose");
            return UpdateOutcome::Reload {
                reason: format!("hot update failed: {err}"),
            };
        }
    };

    // prune
    for id in &result.removed {
        system.remove_module(id);
    }

    system.set_dynamic_resources_map(result.dynamic_resources_map.clone());

    UpdateOutcome::Applied { updated }
}

fn swap_and_accept(
    system: &ModuleSystem,
    result: &HmrUpdateResult,
    evaluator: &dyn UpdateEvaluator,
    plans: &[BoundaryPlan],
) -> Result<Vec<String>> {
    for code in [&result.immutable_modules, &result.mutable_modules] {
        if !code.is_empty() {
            evaluator.evaluate(system, code)?;
        }
    }

    let mut updated = Vec::new();
    for plan in plans {
        if updated.contains(&plan.boundary) {
            continue;
        }
        match &plan.acceptance {
            Acceptance::SelfAccept(callbacks) => {
                let exports = system.require(&plan.boundary)?;
                for callback in callbacks {
                    callback(&exports);
                }
            }
            Acceptance::Deps(handlers) => {
                for (deps, callback) in handlers {
                    let exports = deps
                        .iter()
                        .map(|dep| system.require(dep))
                        .collect::<Result<Vec<_>>>()?;
                    callback(&exports);
                }
            }
        }
        debug!(boundary = %plan.boundary, "hot update accepted");
        updated.push(plan.boundary.clone());
    }
    Ok(updated)
}

fn plan(system: &ModuleSystem, result: &HmrUpdateResult) -> Result<Vec<BoundaryPlan>, String> {
    let mut plans = Vec::new();

    for changed in &result.changed {
        // Never instantiated: swapping the initializer is enough.
        if system.module(changed).is_none() {
            continue;
        }

        let boundaries = result.boundaries_of(changed);
        if boundaries.is_empty() {
            return Err(format!("no boundary accepts changes to \"{changed}\""));
        }

        for boundary in boundaries {
            let Some(module) = system.module(boundary) else {
                continue;
            };
            let hooks = module.hooks();
            if hooks.iter().any(|hook| matches!(hook, HotHook::Decline)) {
                return Err(format!("\"{boundary}\" declined hot updates"));
            }

            let chain = if boundary == changed {
                Vec::new()
            } else {
                chain_between(system, changed, boundary)
            };

            let self_accepts: Vec<_> = hooks
                .iter()
                .filter_map(|hook| match hook {
                    HotHook::SelfAccept(callback) => Some(callback.clone()),
                    _ => None,
                })
                .collect();

            let acceptance = if !self_accepts.is_empty() {
                Acceptance::SelfAccept(self_accepts.into_iter().flatten().collect())
            } else {
                let handlers: Vec<_> = hooks
                    .iter()
                    .filter_map(|hook| match hook {
                        HotHook::AcceptDeps { deps, callback }
                            if deps.iter().any(|dep| dep == changed || chain.contains(dep)) =>
                        {
                            Some((deps.clone(), callback.clone()))
                        }
                        _ => None,
                    })
                    .collect();
                if handlers.is_empty() {
                    return Err(format!(
                        "\"{boundary}\" does not accept changes to \"{changed}\""
                    ));
                }
                Acceptance::Deps(handlers)
            };

            plans.push(BoundaryPlan {
                boundary: boundary.clone(),
                chain,
                acceptance,
            });
        }
    }

    Ok(plans)
}

/// Every module on an importer path from `from` up to `to`, `to` excluded,
/// `from` first.
fn chain_between(system: &ModuleSystem, from: &str, to: &str) -> Vec<String> {
    fn walk(
        system: &ModuleSystem,
        id: &str,
        to: &str,
        visiting: &mut FxHashSet<String>,
        chain: &mut Vec<String>,
    ) -> bool {
        if id == to {
            return true;
        }
        if chain.iter().any(|c| c == id) {
            return true;
        }
        if !visiting.insert(id.to_string()) {
            return false;
        }
        let mut reaches = false;
        for importer in system.importers_of(id) {
            reaches |= walk(system, &importer, to, visiting, chain);
        }
        if reaches {
            chain.push(id.to_string());
        }
        reaches
    }

    let mut chain = Vec::new();
    walk(system, from, to, &mut FxHashSet::default(), &mut chain);
    // Post-order puts `from` last.
    chain.reverse();
    if chain.is_empty() {
        chain.push(from.to_string());
    }
    chain
}
