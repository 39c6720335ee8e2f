// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! The permission store (C2): a process-wide, mutable set of granted
//! capabilities. Singleton per server process, no persistence, cleared only
//! by explicit `clear()` or process exit.

use parking_lot::Mutex;
use tracing::info;

use crate::capability::{check_any, Capability, CapabilityError};

/// Structural equality used by `revoke`: same type tag, same scalar fields,
/// multiset equality of method/op/variable lists (order does not matter).
fn structurally_equal(a: &Capability, b: &Capability) -> bool {
    match (a, b) {
        (
            Capability::Http {
                host: ah,
                path_pattern: ap,
                methods: am,
                ..
            },
            Capability::Http {
                host: bh,
                path_pattern: bp,
                methods: bm,
                ..
            },
        ) => ah == bh && ap == bp && multiset_eq_opt(am, bm),
        (
            Capability::File {
                path: ap,
                operations: ao,
                ..
            },
            Capability::File {
                path: bp,
                operations: bo,
                ..
            },
        ) => ap == bp && multiset_eq(ao, bo),
        (
            Capability::Env {
                variables: av, ..
            },
            Capability::Env {
                variables: bv, ..
            },
        ) => multiset_eq(av, bv),
        _ => false,
    }
}

fn multiset_eq<T: Eq + Clone + std::hash::Hash>(a: &[T], b: &[T]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut remaining: Vec<&T> = b.iter().collect();
    for item in a {
        match remaining.iter().position(|r| *r == item) {
            Some(idx) => {
                remaining.remove(idx);
            }
            None => return false,
        }
    }
    true
}

fn multiset_eq_opt(a: &Option<Vec<String>>, b: &Option<Vec<String>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => multiset_eq(a, b),
        _ => false,
    }
}

/// Process-wide permission store. All operations are serialized under a
/// single mutex (spec §4.2 concurrency: readers need only per-call, not
/// cross-call, consistency).
#[derive(Default)]
pub struct PermissionStore {
    inner: Mutex<Vec<Capability>>,
}

impl PermissionStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    /// Validates `cap` against the grammar; on success, appends it and emits
    /// an audit line. Returns the same validation error the caller should
    /// relay back to the tool surface.
    pub fn grant(&self, cap: Capability) -> Result<(), CapabilityError> {
        cap.validate()?;
        info!("GRANTED {}", cap.describe());
        self.inner.lock().push(cap);
        Ok(())
    }

    /// Removes the first capability structurally equal to `cap`. Returns
    /// whether anything was removed.
    pub fn revoke(&self, cap: &Capability) -> bool {
        let mut guard = self.inner.lock();
        if let Some(idx) = guard.iter().position(|c| structurally_equal(c, cap)) {
            let removed = guard.remove(idx);
            info!("REVOKED {}", removed.describe());
            true
        } else {
            false
        }
    }

    /// True iff any granted capability matches `required` per §4.1.
    pub fn check(&self, required: &Capability) -> bool {
        let guard = self.inner.lock();
        check_any(required, guard.iter())
    }

    /// A snapshot copy, safe to hand out.
    pub fn list(&self) -> Vec<Capability> {
        self.inner.lock().clone()
    }

    /// Empties the store.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn http_cap(host: &str) -> Capability {
        Capability::Http {
            host: host.to_string(),
            path_pattern: None,
            methods: None,
            description: "x".to_string(),
        }
    }

    #[test]
    fn grant_then_check_succeeds() {
        let store = PermissionStore::new();
        store.grant(http_cap("example.com")).unwrap();
        assert!(store.check(&http_cap("example.com")));
        assert!(!store.check(&http_cap("other.com")));
    }

    #[test]
    fn revoke_is_undo_for_structural_equals() {
        let store = PermissionStore::new();
        let cap = http_cap("example.com");
        store.grant(cap.clone()).unwrap();
        assert!(store.revoke(&cap));
        assert!(!store.check(&cap));
    }

    #[test]
    fn clear_then_grant_list_is_singleton() {
        let store = PermissionStore::new();
        store.clear();
        let cap = http_cap("example.com");
        store.grant(cap.clone()).unwrap();
        assert_eq!(store.list(), vec![cap]);
    }

    #[test]
    fn grant_rejects_malformed_capability() {
        let store = PermissionStore::new();
        let bad = Capability::Http {
            host: String::new(),
            path_pattern: None,
            methods: None,
            description: "x".to_string(),
        };
        assert!(store.grant(bad).is_err());
        assert!(store.list().is_empty());
    }

    #[test]
    fn revoke_ignores_order_in_method_list() {
        let store = PermissionStore::new();
        let granted = Capability::Http {
            host: "example.com".to_string(),
            path_pattern: None,
            methods: Some(vec!["GET".to_string(), "POST".to_string()]),
            description: "x".to_string(),
        };
        store.grant(granted).unwrap();
        let to_revoke = Capability::Http {
            host: "example.com".to_string(),
            path_pattern: None,
            methods: Some(vec!["POST".to_string(), "GET".to_string()]),
            description: "different description ok".to_string(),
        };
        assert!(store.revoke(&to_revoke));
    }
}
