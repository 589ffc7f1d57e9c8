//! Archetypes: named behavior profiles declared as data.
//!
//! An [`Archetype`] only names actions; [`Archetype::resolve`] binds those names
//! against an [`ActionRegistry`] into a [`Behavior`], which is what run-loops
//! share (read-only) at runtime.
use std::sync::Arc;

use rand::{
    Rng,
    distr::{Distribution, weighted::WeightedIndex},
};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{action::ActionRef, error::ConfigError, registry::ActionRegistry, wait::WaitTime};

/// How the next task is picked from the task list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Selection {
    /// Independent weighted random choice on every iteration.
    #[default]
    Weighted,
    /// Tasks run in declaration order, wrapping around after the last one.
    /// Task weights are ignored.
    Sequential,
}

/// A reference to a registered action inside an archetype.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub action: String,
    pub weight: f64,
    pub repeat: u32,
}

impl Task {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            weight: 1.0,
            repeat: 1,
        }
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Static sub-step count handed to the action (e.g. "view 3 products").
    pub fn repeat(mut self, repeat: u32) -> Self {
        self.repeat = repeat;
        self
    }
}

/// A named behavior profile.
///
/// ```rust
/// use manada::{Archetype, Selection, Task, WaitTime};
///
/// let visitor = Archetype::builder()
///     .name("visitor")
///     .weight(10.0)
///     .wait_time(WaitTime::between_secs(2, 5).unwrap())
///     .tasks(vec![Task::new("listing").weight(3.0), Task::new("search").weight(2.0)])
///     .build();
///
/// assert_eq!(visitor.selection, Selection::Weighted);
/// ```
#[derive(Debug, Clone, TypedBuilder, Serialize, Deserialize)]
pub struct Archetype {
    #[builder(setter(into))]
    pub name: String,
    /// Relative share of the population.
    #[builder(default = 1.0)]
    pub weight: f64,
    /// Run exactly this many instances regardless of weights.
    #[builder(default, setter(strip_option))]
    pub fixed_count: Option<usize>,
    #[builder(default)]
    pub wait_time: WaitTime,
    #[builder(default)]
    pub selection: Selection,
    pub tasks: Vec<Task>,
    /// Run once, in order, before the main loop. A failure ends the instance.
    #[builder(default)]
    pub on_start: Vec<Task>,
    /// Run once, in order, after the stop signal.
    #[builder(default)]
    pub on_stop: Vec<Task>,
    /// Sessions of this archetype may only check out while logged in.
    #[builder(default)]
    pub requires_auth: bool,
}

impl Archetype {
    /// Return a copy with a different population weight.
    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    /// Validate the declaration and bind every task to the registry.
    pub fn resolve(&self, registry: &ActionRegistry) -> Result<Behavior, ConfigError> {
        if self.tasks.is_empty() {
            return Err(ConfigError::EmptyTaskList {
                archetype: self.name.clone(),
            });
        }
        self.wait_time.validate()?;

        let bind = |tasks: &[Task]| -> Result<Vec<ActionRef>, ConfigError> {
            tasks
                .iter()
                .map(|task| {
                    registry
                        .resolve(&task.action, task.repeat)
                        .ok_or_else(|| ConfigError::UnknownAction {
                            archetype: self.name.clone(),
                            action: task.action.clone(),
                        })
                })
                .collect()
        };

        let tasks = bind(&self.tasks)?;
        let dist = match self.selection {
            Selection::Sequential => None,
            Selection::Weighted => {
                if let Some(bad) = self.tasks.iter().find(|t| !(t.weight.is_finite() && t.weight > 0.0)) {
                    return Err(ConfigError::InvalidTaskWeight {
                        archetype: self.name.clone(),
                        action: bad.action.clone(),
                        weight: bad.weight,
                    });
                }
                let dist = WeightedIndex::new(self.tasks.iter().map(|t| t.weight)).map_err(|_| {
                    ConfigError::InvalidTaskWeight {
                        archetype: self.name.clone(),
                        action: self.tasks[0].action.clone(),
                        weight: self.tasks[0].weight,
                    }
                })?;
                Some(dist)
            }
        };

        Ok(Behavior {
            name: Arc::from(self.name.as_str()),
            wait_time: self.wait_time,
            tasks,
            dist,
            on_start: bind(&self.on_start)?,
            on_stop: bind(&self.on_stop)?,
            requires_auth: self.requires_auth,
        })
    }
}

/// A resolved archetype, shared read-only by all of its running instances.
#[derive(Debug)]
pub struct Behavior {
    pub name: Arc<str>,
    pub wait_time: WaitTime,
    pub tasks: Vec<ActionRef>,
    dist: Option<WeightedIndex<f64>>,
    pub on_start: Vec<ActionRef>,
    pub on_stop: Vec<ActionRef>,
    pub requires_auth: bool,
}

impl Behavior {
    pub fn selection(&self) -> Selection {
        match self.dist {
            Some(_) => Selection::Weighted,
            None => Selection::Sequential,
        }
    }

    /// Pick the next task. `cursor` is the per-instance position used by
    /// sequential archetypes; weighted archetypes leave it untouched.
    pub fn select<R: Rng>(&self, cursor: &mut usize, rng: &mut R) -> &ActionRef {
        match &self.dist {
            Some(dist) => &self.tasks[dist.sample(rng)],
            None => {
                let task = &self.tasks[*cursor % self.tasks.len()];
                *cursor = (*cursor + 1) % self.tasks.len();
                task
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{action_fn, error::ActionError};
    use futures::FutureExt;
    use rand::{SeedableRng, rngs::StdRng};

    fn registry(names: &[&str]) -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        for name in names {
            registry
                .register(*name, action_fn(|_, _, _| async { Ok::<(), ActionError>(()) }.boxed()))
                .unwrap();
        }
        registry
    }

    #[test]
    fn weighted_selection_converges_to_ratios() {
        let registry = registry(&["listing", "search", "checkout"]);
        let behavior = Archetype::builder()
            .name("visitor")
            .tasks(vec![
                Task::new("listing").weight(3.0),
                Task::new("search").weight(2.0),
                Task::new("checkout").weight(5.0),
            ])
            .build()
            .resolve(&registry)
            .unwrap();

        let mut rng = StdRng::seed_from_u64(42);
        let mut cursor = 0;
        let n = 100_000;
        let mut counts = [0usize; 3];
        for _ in 0..n {
            let picked = behavior.select(&mut cursor, &mut rng);
            let idx = ["listing", "search", "checkout"]
                .iter()
                .position(|name| **name == *picked.name)
                .unwrap();
            counts[idx] += 1;
        }

        for (count, expected) in counts.iter().zip([0.3, 0.2, 0.5]) {
            let ratio = *count as f64 / n as f64;
            assert!((ratio - expected).abs() < 0.01, "{ratio} vs {expected}");
        }
        assert_eq!(cursor, 0);
    }

    #[test]
    fn sequential_selection_follows_declaration_and_wraps() {
        let registry = registry(&["register", "browse", "order", "logout"]);
        let behavior = Archetype::builder()
            .name("surf_with_order")
            .selection(Selection::Sequential)
            .tasks(vec![
                Task::new("register"),
                Task::new("browse").repeat(2),
                Task::new("order"),
                Task::new("logout"),
            ])
            .build()
            .resolve(&registry)
            .unwrap();

        let mut rng = StdRng::seed_from_u64(1);
        let mut cursor = 0;
        let picked: Vec<String> = (0..10)
            .map(|_| behavior.select(&mut cursor, &mut rng).name.to_string())
            .collect();
        assert_eq!(
            picked,
            [
                "register", "browse", "order", "logout", "register", "browse", "order", "logout",
                "register", "browse"
            ]
        );
        assert_eq!(behavior.tasks[1].repeat, 2);
        assert_eq!(behavior.selection(), Selection::Sequential);
    }

    #[test]
    fn unknown_action_is_a_config_error() {
        let registry = registry(&["listing"]);
        let err = Archetype::builder()
            .name("visitor")
            .tasks(vec![Task::new("listing")])
            .on_start(vec![Task::new("register")])
            .build()
            .resolve(&registry)
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::UnknownAction {
                archetype: "visitor".into(),
                action: "register".into()
            }
        );
    }

    #[test]
    fn empty_tasks_and_bad_weights_are_rejected() {
        let registry = registry(&["listing"]);
        let empty = Archetype::builder().name("idle").tasks(vec![]).build();
        assert!(matches!(empty.resolve(&registry), Err(ConfigError::EmptyTaskList { .. })));

        let zero = Archetype::builder()
            .name("visitor")
            .tasks(vec![Task::new("listing").weight(0.0)])
            .build();
        assert!(matches!(zero.resolve(&registry), Err(ConfigError::InvalidTaskWeight { .. })));

        // sequential archetypes ignore task weights
        let seq = Archetype::builder()
            .name("script")
            .selection(Selection::Sequential)
            .tasks(vec![Task::new("listing").weight(0.0)])
            .build();
        assert!(seq.resolve(&registry).is_ok());
    }
}
