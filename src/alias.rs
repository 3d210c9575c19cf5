//! Alias registry
//!
//! Maps alias names onto the names they stand for. Chains are allowed
//! (`a -> b -> c`) but cycles never are: every insert is checked first.
//! Readers go straight to the DashMap; writers are serialized by a mutex so a
//! cycle check and the insert that follows it cannot interleave with another
//! writer.

use crate::error::{ResolveError, Result};
use crate::storage::name_map;
use ahash::{AHashMap, RandomState};
use dashmap::DashMap;
use parking_lot::Mutex;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Thread-safe alias to name mapping
pub struct AliasRegistry {
    aliases: DashMap<String, String, RandomState>,
    writer: Mutex<()>,
    allow_overriding: bool,
}

impl AliasRegistry {
    /// Empty registry that allows re-pointing an existing alias
    pub fn new() -> Self {
        Self::with_overriding(true)
    }

    /// Empty registry with explicit overriding policy
    pub fn with_overriding(allow_overriding: bool) -> Self {
        Self {
            aliases: name_map(0),
            writer: Mutex::new(()),
            allow_overriding,
        }
    }

    /// Register `alias` for `name`.
    ///
    /// An alias equal to its name removes any mapping for it. Re-registering an
    /// identical pair is a no-op. Nothing is changed when an error is returned.
    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        let _writer = self.writer.lock();

        if alias == name {
            self.aliases.remove(alias);
            #[cfg(feature = "logging")]
            debug!(
                target: "component_resolver",
                alias = alias,
                "Alias equals its name, mapping removed"
            );
            return Ok(());
        }

        let existing = self.aliases.get(alias).map(|r| r.value().clone());
        if let Some(existing) = existing {
            if existing == name {
                return Ok(());
            }
            if !self.allow_overriding {
                return Err(ResolveError::AliasConflict {
                    alias: alias.to_owned(),
                    name: name.to_owned(),
                    existing,
                });
            }
            #[cfg(feature = "logging")]
            debug!(
                target: "component_resolver",
                alias = alias,
                previous = %existing,
                component = name,
                "Overriding alias"
            );
        }

        self.check_for_alias_circle(name, alias)?;
        self.aliases.insert(alias.to_owned(), name.to_owned());

        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            alias = alias,
            component = name,
            "Registered alias"
        );

        Ok(())
    }

    /// Whether `alias` reaches `name`, directly or through a chain of aliases
    pub fn has_alias(&self, name: &str, alias: &str) -> bool {
        // Collect before recursing so no shard guard is held across the walk.
        let direct: Vec<String> = self
            .aliases
            .iter()
            .filter(|r| r.value() == name)
            .map(|r| r.key().clone())
            .collect();

        direct
            .iter()
            .any(|registered| registered == alias || self.has_alias(registered, alias))
    }

    /// Remove an alias; `UnknownAlias` when it was never registered
    pub fn remove_alias(&self, alias: &str) -> Result<()> {
        let _writer = self.writer.lock();
        match self.aliases.remove(alias) {
            Some(_) => Ok(()),
            None => Err(ResolveError::UnknownAlias {
                alias: alias.to_owned(),
            }),
        }
    }

    /// Whether `name` is registered as an alias
    #[inline]
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Every alias that leads to `name`, transitively
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        let mut result = Vec::new();
        self.retrieve_aliases(name, &mut result);
        result
    }

    fn retrieve_aliases(&self, name: &str, result: &mut Vec<String>) {
        let direct: Vec<String> = self
            .aliases
            .iter()
            .filter(|r| r.value() == name)
            .map(|r| r.key().clone())
            .collect();

        for alias in direct {
            if result.contains(&alias) {
                continue;
            }
            result.push(alias.clone());
            self.retrieve_aliases(&alias, result);
        }
    }

    /// Rewrite every alias and target through `resolver`.
    ///
    /// A `None` result, or an alias that collapses onto its own name, drops the
    /// entry. A rewritten alias that already points at the same name replaces
    /// the placeholder; one that points elsewhere is an `AliasConflict`, and a
    /// rewrite that would close a chain is a `CircularAlias`. The rewritten
    /// mapping is only installed when every entry passes.
    pub fn resolve_aliases<F>(&self, resolver: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let _writer = self.writer.lock();

        let mut entries: Vec<(String, String)> = self
            .aliases
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect();
        entries.sort();
        let mut rewritten: AHashMap<String, String> = entries.iter().cloned().collect();

        for (alias, registered) in entries {
            let resolved_alias = resolver(&alias);
            let resolved_name = resolver(&registered);

            let (resolved_alias, resolved_name) = match (resolved_alias, resolved_name) {
                (Some(a), Some(n)) if a != n => (a, n),
                _ => {
                    rewritten.remove(&alias);
                    continue;
                }
            };

            if resolved_alias != alias {
                if let Some(existing) = rewritten.get(&resolved_alias).cloned() {
                    if existing == resolved_name {
                        rewritten.remove(&alias);
                        continue;
                    }
                    return Err(ResolveError::AliasConflict {
                        alias: resolved_alias,
                        name: resolved_name,
                        existing,
                    });
                }
                rewritten.remove(&alias);
            } else if registered == resolved_name {
                continue;
            }

            if chain_reaches(&rewritten, &resolved_name, &resolved_alias) {
                return Err(ResolveError::CircularAlias {
                    alias: resolved_alias,
                    name: resolved_name,
                });
            }
            rewritten.insert(resolved_alias, resolved_name);
        }

        self.aliases.retain(|alias, _| rewritten.contains_key(alias));
        for (alias, name) in rewritten {
            self.aliases.insert(alias, name);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_resolver",
            aliases = self.aliases.len(),
            "Resolved alias placeholders"
        );

        Ok(())
    }

    /// `CircularAlias` when `name` already reaches `alias` through the map
    pub fn check_for_alias_circle(&self, name: &str, alias: &str) -> Result<()> {
        if self.has_alias(alias, name) {
            return Err(ResolveError::CircularAlias {
                alias: alias.to_owned(),
                name: name.to_owned(),
            });
        }
        Ok(())
    }

    /// Follow the alias chain to the name it ends at
    pub fn canonical_name(&self, name: &str) -> String {
        let mut canonical = name.to_owned();
        while let Some(next) = self.aliases.get(&canonical).map(|r| r.value().clone()) {
            canonical = next;
        }

        #[cfg(feature = "logging")]
        if canonical != name {
            trace!(
                target: "component_resolver",
                alias = name,
                component = %canonical,
                "Canonicalized alias"
            );
        }

        canonical
    }

    /// Number of registered aliases
    #[inline]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}

/// Whether following `map` from `from` arrives at `to`
fn chain_reaches(map: &AHashMap<String, String>, from: &str, to: &str) -> bool {
    let mut current = from;
    for _ in 0..=map.len() {
        if current == to {
            return true;
        }
        match map.get(current) {
            Some(next) => current = next.as_str(),
            None => return false,
        }
    }
    false
}

impl Default for AliasRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AliasRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AliasRegistry")
            .field("count", &self.len())
            .field("allow_overriding", &self.allow_overriding)
            .finish()
    }
}
