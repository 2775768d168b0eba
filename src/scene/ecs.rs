//! System Scheduler
//!
//! Drives per-frame component updates in dependency order. Systems declare
//! what they run after; the registry computes a stable topological order
//! (ties resolve by registration order) and replays it every logic tick.
//!
//! The standard schedule:
//! `Transform → Animation, Bounds`; `Bounds → Rendering`;
//! `Bounds → DirectionalLight → PointLight → SpotLight`;
//! `Transform → Unit → Navigation`; `Animation → IK`;
//! `Ragdoll → RigidBody → Networking`;
//! `Unit → Script, Selection, EnvironmentProbe`.

use log::{error, warn};
use rustc_hash::FxHashMap;

use crate::scene::components::ComponentMask;
use crate::scene::graph::SceneGraph;

/// System identifiers; one per component kind that updates per frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemKind {
    Transform,
    Animation,
    Bounds,
    Rendering,
    DirectionalLight,
    PointLight,
    SpotLight,
    Unit,
    Navigation,
    Ik,
    Ragdoll,
    RigidBody,
    Networking,
    Script,
    Selection,
    EnvironmentProbe,
}

type SystemFn = Box<dyn FnMut(&mut SceneGraph, f32) + Send>;

struct SystemEntry {
    kind: SystemKind,
    run: SystemFn,
}

/// Dependency-ordered system registry.
pub struct SystemRegistry {
    systems: Vec<SystemEntry>,
    /// `(system, runs_after)` edges.
    dependencies: Vec<(SystemKind, SystemKind)>,
    cached_order: Option<Vec<usize>>,
}

impl Default for SystemRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl SystemRegistry {
    /// An empty registry, for tests that wire their own systems.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            systems: Vec::new(),
            dependencies: Vec::new(),
            cached_order: None,
        }
    }

    /// Registers a system. Re-registering a kind replaces its function.
    pub fn add_system<F>(&mut self, kind: SystemKind, run: F)
    where
        F: FnMut(&mut SceneGraph, f32) + Send + 'static,
    {
        if let Some(existing) = self.systems.iter_mut().find(|entry| entry.kind == kind) {
            existing.run = Box::new(run);
        } else {
            self.systems.push(SystemEntry {
                kind,
                run: Box::new(run),
            });
            self.cached_order = None;
        }
    }

    /// Declares that `system` runs after `runs_after`.
    pub fn add_dependency(&mut self, system: SystemKind, runs_after: SystemKind) {
        self.dependencies.push((system, runs_after));
        self.cached_order = None;
    }

    /// Stable topological order over the registered systems. Cycles are
    /// reported and fall back to registration order.
    fn order(&mut self) -> Vec<usize> {
        if let Some(order) = &self.cached_order {
            return order.clone();
        }

        let index_of: FxHashMap<SystemKind, usize> = self
            .systems
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.kind, i))
            .collect();

        let n = self.systems.len();
        let mut in_degree = vec![0usize; n];
        let mut edges: Vec<Vec<usize>> = vec![Vec::new(); n];
        for &(system, runs_after) in &self.dependencies {
            let (Some(&to), Some(&from)) = (index_of.get(&system), index_of.get(&runs_after))
            else {
                continue; // dependency on an unregistered system is inert
            };
            edges[from].push(to);
            in_degree[to] += 1;
        }

        // Kahn's algorithm; the ready set is kept sorted by registration
        // index so the order is deterministic.
        let mut ready: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(&next) = ready.iter().min() {
            ready.retain(|&i| i != next);
            order.push(next);
            for &to in &edges[next] {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    ready.push(to);
                }
            }
        }

        if order.len() != n {
            error!("system dependency cycle detected; falling back to registration order");
            order = (0..n).collect();
        }

        self.cached_order = Some(order.clone());
        order
    }

    /// Runs all systems once, in dependency order.
    pub fn run_update(&mut self, graph: &mut SceneGraph, dt_seconds: f32) {
        let order = self.order();
        for index in order {
            (self.systems[index].run)(graph, dt_seconds);
        }
    }

    /// Execution order by kind, for introspection and tests.
    pub fn execution_order(&mut self) -> Vec<SystemKind> {
        self.order()
            .into_iter()
            .map(|i| self.systems[i].kind)
            .collect()
    }

    /// The standard engine schedule: all sixteen systems with the stock
    /// dependency graph.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();

        registry.add_system(SystemKind::Transform, |graph, _dt| {
            graph.update_transforms();
        });

        registry.add_system(SystemKind::Animation, |graph, dt| {
            for (_, animation) in graph.components.animation.iter_mut() {
                if animation.playing {
                    animation.time += dt;
                }
            }
        });

        registry.add_system(SystemKind::Bounds, |graph, _dt| {
            graph.refresh_bounds();
        });

        registry.add_system(SystemKind::Rendering, |graph, _dt| {
            // Consistency pass: a renderable node without bounds cannot be
            // culled or drawn; log and leave it to be skipped downstream.
            let mut missing: Vec<String> = Vec::new();
            for (handle, _) in &graph.components.rendering {
                let Some(node) = graph.get(handle) else {
                    continue;
                };
                if node.node_type() != crate::scene::node::NodeType::Sky
                    && !node.has_component(ComponentMask::BOUNDS)
                {
                    missing.push(node.name.clone());
                }
            }
            for name in missing {
                warn!("renderable node '{name}' has no bounds component; it will be skipped");
            }
        });

        for (kind, wanted) in [
            (SystemKind::DirectionalLight, 0u32),
            (SystemKind::PointLight, 1u32),
            (SystemKind::SpotLight, 2u32),
        ] {
            registry.add_system(kind, move |graph, _dt| {
                for (_, light) in graph.components.lights.iter_mut() {
                    if light.kind.type_index() == wanted && light.is_degenerate() {
                        light.shadow_index = -1;
                    }
                }
            });
        }

        registry.add_system(SystemKind::Unit, |_graph, _dt| {});

        registry.add_system(SystemKind::Navigation, |graph, dt| {
            // Steer units toward their targets; path planning itself is a
            // collaborator concern.
            let targets: Vec<_> = graph
                .components
                .navigation
                .iter()
                .filter_map(|(handle, nav)| nav.target.map(|t| (handle, t)))
                .collect();
            for (handle, target) in targets {
                if let Some(transform) = graph.components.transforms.get_mut(handle) {
                    let position = transform.position();
                    let to_target = target - position;
                    let step = to_target.clamp_length_max(dt);
                    if step.length_squared() > 0.0 {
                        transform.set_position(position + step);
                    }
                }
            }
        });

        registry.add_system(SystemKind::Ik, |_graph, _dt| {});
        registry.add_system(SystemKind::Ragdoll, |_graph, _dt| {});
        registry.add_system(SystemKind::RigidBody, |_graph, _dt| {});
        registry.add_system(SystemKind::Networking, |_graph, _dt| {});
        registry.add_system(SystemKind::Script, |_graph, _dt| {});

        registry.add_system(SystemKind::Selection, |graph, _dt| {
            for (_, selection) in graph.components.selection.iter_mut() {
                selection.hovered = false;
            }
        });

        registry.add_system(SystemKind::EnvironmentProbe, |_graph, _dt| {});

        // Transforms feed everything spatial; lights chain after bounds.
        registry.add_dependency(SystemKind::Animation, SystemKind::Transform);
        registry.add_dependency(SystemKind::Bounds, SystemKind::Transform);
        registry.add_dependency(SystemKind::Rendering, SystemKind::Bounds);
        registry.add_dependency(SystemKind::DirectionalLight, SystemKind::Bounds);
        registry.add_dependency(SystemKind::PointLight, SystemKind::DirectionalLight);
        registry.add_dependency(SystemKind::SpotLight, SystemKind::PointLight);
        registry.add_dependency(SystemKind::Unit, SystemKind::Transform);
        registry.add_dependency(SystemKind::Navigation, SystemKind::Unit);
        registry.add_dependency(SystemKind::Ik, SystemKind::Animation);
        registry.add_dependency(SystemKind::Ragdoll, SystemKind::Animation);
        registry.add_dependency(SystemKind::RigidBody, SystemKind::Ragdoll);
        registry.add_dependency(SystemKind::Networking, SystemKind::RigidBody);
        registry.add_dependency(SystemKind::Script, SystemKind::Unit);
        registry.add_dependency(SystemKind::Selection, SystemKind::Unit);
        registry.add_dependency(SystemKind::EnvironmentProbe, SystemKind::Unit);

        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position_of(order: &[SystemKind], kind: SystemKind) -> usize {
        order.iter().position(|&k| k == kind).unwrap()
    }

    #[test]
    fn standard_order_respects_all_dependencies() {
        let mut registry = SystemRegistry::standard();
        let order = registry.execution_order();
        assert_eq!(order.len(), 16);

        let pairs = [
            (SystemKind::Transform, SystemKind::Animation),
            (SystemKind::Transform, SystemKind::Bounds),
            (SystemKind::Bounds, SystemKind::Rendering),
            (SystemKind::Bounds, SystemKind::DirectionalLight),
            (SystemKind::DirectionalLight, SystemKind::PointLight),
            (SystemKind::PointLight, SystemKind::SpotLight),
            (SystemKind::Transform, SystemKind::Unit),
            (SystemKind::Unit, SystemKind::Navigation),
            (SystemKind::Animation, SystemKind::Ik),
            (SystemKind::Ragdoll, SystemKind::RigidBody),
            (SystemKind::RigidBody, SystemKind::Networking),
            (SystemKind::Unit, SystemKind::Script),
            (SystemKind::Unit, SystemKind::Selection),
            (SystemKind::Unit, SystemKind::EnvironmentProbe),
        ];
        for (before, after) in pairs {
            assert!(
                position_of(&order, before) < position_of(&order, after),
                "{before:?} must run before {after:?}"
            );
        }
    }

    #[test]
    fn cycle_falls_back_to_registration_order() {
        let mut registry = SystemRegistry::empty();
        registry.add_system(SystemKind::Transform, |_, _| {});
        registry.add_system(SystemKind::Bounds, |_, _| {});
        registry.add_dependency(SystemKind::Transform, SystemKind::Bounds);
        registry.add_dependency(SystemKind::Bounds, SystemKind::Transform);
        let order = registry.execution_order();
        assert_eq!(order, vec![SystemKind::Transform, SystemKind::Bounds]);
    }

    #[test]
    fn update_advances_animation_time() {
        let mut registry = SystemRegistry::standard();
        let mut graph = SceneGraph::new();
        let node = graph
            .add_child(
                graph.root(),
                crate::scene::graph::NodeDescriptor::new("animated"),
            )
            .unwrap();
        graph.components.animation.insert(
            node,
            crate::scene::components::AnimationComponent {
                clip: Some("walk".into()),
                time: 0.0,
                playing: true,
                blend_weight: 1.0,
            },
        );

        registry.run_update(&mut graph, 0.5);
        assert!((graph.components.animation.get(node).unwrap().time - 0.5).abs() < 1e-6);
    }
}
