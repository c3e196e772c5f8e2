// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

//! Naming-collision resolution shared by every operation that introduces a
//! name into a group (or a file into a directory).

use diagnostics::{log_debug, log_warn};
use std::collections::VecDeque;

use crate::error::{GroveError, Result};

/// Upper bound on resolver round-trips before the mutation is abandoned.
const MAX_ATTEMPTS: usize = 64;

/// What the resolver decided for a colliding name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Try this name instead.
    Rename(String),
    /// Keep the candidate and replace the existing sibling.
    Overwrite,
    /// Abandon the whole mutation.
    Cancel,
}

/// Where the collision happened, for presentation.
#[derive(Debug, Clone, Copy)]
pub struct CollisionContext<'a> {
    pub operation: &'static str,
    pub parent: &'a str,
}

/// Decides what to do when a name is already taken.
///
/// This is the seam to whatever asks the user.
pub trait CollisionResolver: Send {
    fn resolve(
        &mut self,
        candidate: &str,
        siblings: &[String],
        context: &CollisionContext<'_>,
    ) -> Resolution;
}

/// Adapts a closure into a resolver.
pub struct FnResolver<F>(F);

pub fn from_fn<F>(f: F) -> FnResolver<F>
where
    F: FnMut(&str, &[String], &CollisionContext<'_>) -> Resolution + Send,
{
    FnResolver(f)
}

impl<F> CollisionResolver for FnResolver<F>
where
    F: FnMut(&str, &[String], &CollisionContext<'_>) -> Resolution + Send,
{
    fn resolve(
        &mut self,
        candidate: &str,
        siblings: &[String],
        context: &CollisionContext<'_>,
    ) -> Resolution {
        (self.0)(candidate, siblings, context)
    }
}

/// Always cancels.
#[derive(Debug, Default, Clone, Copy)]
pub struct CancelOnCollision;

impl CollisionResolver for CancelOnCollision {
    fn resolve(&mut self, _: &str, _: &[String], _: &CollisionContext<'_>) -> Resolution {
        Resolution::Cancel
    }
}

/// Always overwrites.
#[derive(Debug, Default, Clone, Copy)]
pub struct OverwriteOnCollision;

impl CollisionResolver for OverwriteOnCollision {
    fn resolve(&mut self, _: &str, _: &[String], _: &CollisionContext<'_>) -> Resolution {
        Resolution::Overwrite
    }
}

/// Picks the first free `name_N`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoRename;

impl CollisionResolver for AutoRename {
    fn resolve(
        &mut self,
        candidate: &str,
        siblings: &[String],
        _: &CollisionContext<'_>,
    ) -> Resolution {
        let (stem, ext) = match candidate.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (candidate, None),
        };
        let free = (1..)
            .map(|n| match ext {
                Some(ext) => format!("{stem}_{n}.{ext}"),
                None => format!("{stem}_{n}"),
            })
            .find(|name| !siblings.iter().any(|s| s == name));
        match free {
            Some(name) => Resolution::Rename(name),
            None => Resolution::Cancel,
        }
    }
}

/// Replays a fixed list of decisions, then cancels.
#[derive(Debug, Default, Clone)]
pub struct Scripted(VecDeque<Resolution>);

impl Scripted {
    pub fn new<I: IntoIterator<Item = Resolution>>(decisions: I) -> Self {
        Self(decisions.into_iter().collect())
    }
}

impl CollisionResolver for Scripted {
    fn resolve(&mut self, _: &str, _: &[String], _: &CollisionContext<'_>) -> Resolution {
        self.0.pop_front().unwrap_or(Resolution::Cancel)
    }
}

/// Outcome of the resolution loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub name: String,
    /// The sibling called `name` must be removed before proceeding.
    pub overwrite: bool,
}

/// A name acceptable for a node inside a store.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty()
        || name.contains('/')
        || name == "."
        || name == ".."
        || hstore::path::is_hidden(name)
    {
        return Err(GroveError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Run the collision protocol.
///
/// `siblings` is the true sibling set. `current` is the name the node
/// already has, if it is being renamed in place; it never counts as a
/// collision. A name in `siblings` is accepted only together with
/// `overwrite = true`.
pub fn resolve_name(
    candidate: &str,
    siblings: &[String],
    current: Option<&str>,
    resolver: &mut dyn CollisionResolver,
    context: &CollisionContext<'_>,
) -> Result<Resolved> {
    let mut candidate = candidate.to_string();
    for _ in 0..MAX_ATTEMPTS {
        validate_name(&candidate)?;
        let taken = current != Some(candidate.as_str()) && siblings.iter().any(|s| *s == candidate);
        if !taken {
            return Ok(Resolved {
                name: candidate,
                overwrite: false,
            });
        }
        let decision = resolver.resolve(&candidate, siblings, context);
        log_debug!(
            "collision on {name} under {parent} during {op}: {decision}",
            name: candidate.as_str(),
            parent: context.parent,
            op: context.operation,
            decision: format!("{decision:?}")
        );
        match decision {
            Resolution::Rename(next) => candidate = next,
            Resolution::Overwrite => {
                return Ok(Resolved {
                    name: candidate,
                    overwrite: true,
                });
            }
            Resolution::Cancel => {
                return Err(GroveError::NameCollisionAbandoned {
                    parent: context.parent.to_string(),
                    name: candidate,
                });
            }
        }
    }
    log_warn!(
        "giving up on collision for {name} after repeated attempts",
        name: candidate.as_str()
    );
    Err(GroveError::NameCollisionAbandoned {
        parent: context.parent.to_string(),
        name: candidate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CX: CollisionContext<'static> = CollisionContext {
        operation: "test",
        parent: "/",
    };

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_free_name_accepted_without_asking() {
        let mut resolver = from_fn(|_, _, _| panic!("resolver must not be consulted"));
        let resolved = resolve_name("g2", &names(&["g1"]), None, &mut resolver, &CX).expect("free");
        assert_eq!(resolved, Resolved { name: "g2".into(), overwrite: false });
    }

    #[test]
    fn test_current_name_is_not_a_collision() {
        let resolved = resolve_name("g1", &names(&["g1"]), Some("g1"), &mut CancelOnCollision, &CX)
            .expect("self");
        assert!(!resolved.overwrite);
    }

    #[test]
    fn test_rename_loops_until_free() {
        let mut resolver = Scripted::new([
            Resolution::Rename("g2".into()),
            Resolution::Rename("g3".into()),
        ]);
        let resolved =
            resolve_name("g1", &names(&["g1", "g2"]), None, &mut resolver, &CX).expect("g3");
        assert_eq!(resolved.name, "g3");
        assert!(!resolved.overwrite);
    }

    #[test]
    fn test_taken_name_only_with_overwrite() {
        let resolved =
            resolve_name("g1", &names(&["g1"]), None, &mut OverwriteOnCollision, &CX).expect("ow");
        assert_eq!(resolved, Resolved { name: "g1".into(), overwrite: true });

        let err = resolve_name("g1", &names(&["g1"]), None, &mut CancelOnCollision, &CX)
            .expect_err("cancel");
        assert!(matches!(err, GroveError::NameCollisionAbandoned { .. }));
    }

    #[test]
    fn test_stubborn_resolver_terminates() {
        let mut resolver = from_fn(|c, _, _| Resolution::Rename(c.to_string()));
        let err = resolve_name("g1", &names(&["g1"]), None, &mut resolver, &CX)
            .expect_err("gives up");
        assert!(matches!(err, GroveError::NameCollisionAbandoned { .. }));
    }

    #[test]
    fn test_auto_rename() {
        let resolved =
            resolve_name("t", &names(&["t", "t_1"]), None, &mut AutoRename, &CX).expect("auto");
        assert_eq!(resolved.name, "t_2");
        let resolved =
            resolve_name("a.grove", &names(&["a.grove"]), None, &mut AutoRename, &CX).expect("ext");
        assert_eq!(resolved.name, "a_1.grove");
    }

    #[test]
    fn test_invalid_names() {
        for bad in ["", "a/b", "..", "_p_hidden"] {
            assert!(matches!(validate_name(bad), Err(GroveError::InvalidName(_))));
        }
    }
}
