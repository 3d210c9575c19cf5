#![no_main]

//! Fuzz target for the alias registry
//!
//! Random registrations and removals must never leave a cycle behind, so
//! canonicalization always terminates.

use arbitrary::Arbitrary;
use component_resolver::AliasRegistry;
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
enum AliasOp {
    Register { name: u8, alias: u8 },
    Remove { alias: u8 },
    Canonical { name: u8 },
    AliasesOf { name: u8 },
    Rewrite { shift: u8 },
}

#[derive(Debug, Arbitrary)]
struct AliasScenario {
    allow_overriding: bool,
    ops: Vec<AliasOp>,
}

// A small name space makes chains and collisions likely
fn name(n: u8) -> String {
    format!("c{}", n % 16)
}

fuzz_target!(|scenario: AliasScenario| {
    let registry = AliasRegistry::with_overriding(scenario.allow_overriding);

    for op in scenario.ops.into_iter().take(200) {
        match op {
            AliasOp::Register { name: n, alias } => {
                let _ = registry.register_alias(&name(n), &name(alias));
            }
            AliasOp::Remove { alias } => {
                let _ = registry.remove_alias(&name(alias));
            }
            AliasOp::Canonical { name: n } => {
                let canonical = registry.canonical_name(&name(n));
                assert!(!registry.is_alias(&canonical));
            }
            AliasOp::AliasesOf { name: n } => {
                let name = name(n);
                for alias in registry.aliases_of(&name) {
                    assert_ne!(alias, name);
                    assert!(registry.has_alias(&name, &alias));
                }
            }
            AliasOp::Rewrite { shift } => {
                let _ = registry.resolve_aliases(|value| {
                    let n: u8 = value.trim_start_matches('c').parse().ok()?;
                    Some(name(n.wrapping_add(shift)))
                });
            }
        }
    }

    for n in 0..16 {
        let _ = registry.canonical_name(&name(n));
    }
});
