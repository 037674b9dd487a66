//! Type relationship extraction
//!
//! Given one type definition, the [`Reflector`] lists every other type it
//! derives from, implements, references through member signatures or calls
//! into from method bodies. Results are produced lazily from the metadata and
//! are not cached; asking twice re-derives them.

use crate::config::DEFAULT_PLATFORM_NAMESPACES;
use crate::metadata::{TypeDef, TypeSignature};
use stratum_core::{EdgeKind, NodeId};

/// Separator between declaring type and member in a call target.
const MEMBER_SEPARATOR: &str = "::";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectorOptions {
    /// Drop targets that live in the platform's base library.
    pub ignore_platform_types: bool,
    pub platform_namespaces: Vec<String>,
}

impl ReflectorOptions {
    pub fn new(ignore_platform_types: bool) -> Self {
        ReflectorOptions {
            ignore_platform_types,
            platform_namespaces: DEFAULT_PLATFORM_NAMESPACES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn is_platform_type(&self, full_name: &str) -> bool {
        self.platform_namespaces.iter().any(|ns| {
            full_name
                .strip_prefix(ns.as_str())
                .is_some_and(|rest| rest.is_empty() || rest.starts_with('.'))
        })
    }
}

impl Default for ReflectorOptions {
    fn default() -> Self {
        Self::new(false)
    }
}

/// One discovered relationship from the reflected type to `target`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// Full name of the target type.
    pub target: String,
    pub kind: EdgeKind,
}

impl Dependency {
    fn new(target: &str, kind: EdgeKind) -> Self {
        Dependency {
            target: target.to_string(),
            kind,
        }
    }

    pub fn target_id(&self) -> NodeId {
        NodeId::from_full_name(&self.target)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Reflector<'a> {
    ty: &'a TypeDef,
    options: &'a ReflectorOptions,
}

impl<'a> Reflector<'a> {
    pub fn new(ty: &'a TypeDef, options: &'a ReflectorOptions) -> Self {
        Reflector { ty, options }
    }

    /// Base type and interfaces only (plus the generic arguments they close
    /// over, as references).
    pub fn structural(self) -> impl Iterator<Item = Dependency> + 'a {
        self.structural_unfiltered().filter(move |d| self.keep(d))
    }

    /// Every type this one uses, in discovery order. The same target may
    /// appear several times, once per relationship.
    pub fn used_types(self) -> impl Iterator<Item = Dependency> + 'a {
        let ty = self.ty;

        let generic_arguments = ty
            .generic_arguments
            .iter()
            .flat_map(move |sig| self.references(sig, "generic argument"));
        let members = ty
            .fields
            .iter()
            .chain(ty.properties.iter())
            .flat_map(move |member| self.references(&member.type_name, "member"));
        let signatures = ty.methods.iter().flat_map(move |method| {
            method
                .parameters
                .iter()
                .chain(method.return_type.iter())
                .flat_map(move |sig| self.references(sig, "method signature"))
        });
        let calls = ty
            .methods
            .iter()
            .flat_map(|method| method.calls.iter())
            .flat_map(move |call| self.call_target(call));

        self.structural_unfiltered()
            .chain(generic_arguments)
            .chain(members)
            .chain(signatures)
            .chain(calls)
            .filter(move |d| self.keep(d))
    }

    fn structural_unfiltered(self) -> impl Iterator<Item = Dependency> + 'a {
        let base = self
            .ty
            .base
            .iter()
            .flat_map(move |sig| self.classify(sig, EdgeKind::DerivesFrom, "base type"));
        let interfaces = self
            .ty
            .interfaces
            .iter()
            .flat_map(move |sig| self.classify(sig, EdgeKind::Implements, "interface"));
        base.chain(interfaces)
    }

    /// Head of the signature gets `kind`, generic arguments are references.
    fn classify(self, signature: &str, kind: EdgeKind, role: &str) -> Vec<Dependency> {
        match TypeSignature::parse(signature) {
            Ok(parsed) => {
                let mut deps = vec![Dependency::new(&parsed.name, kind)];
                deps.extend(
                    parsed
                        .argument_names()
                        .into_iter()
                        .map(|name| Dependency::new(name, EdgeKind::References)),
                );
                deps
            }
            Err(e) => {
                self.unresolved(signature, role, &e);
                Vec::new()
            }
        }
    }

    fn references(self, signature: &str, role: &str) -> Vec<Dependency> {
        self.classify(signature, EdgeKind::References, role)
    }

    /// `Core.Parser::Parse` -> calls `Core.Parser`.
    fn call_target(self, call: &str) -> Vec<Dependency> {
        let Some((declaring, member)) = call.rsplit_once(MEMBER_SEPARATOR) else {
            tracing::trace!("Skipping call target without member: {}", call);
            return Vec::new();
        };
        if member.trim().is_empty() {
            tracing::trace!("Skipping call target with empty member: {}", call);
            return Vec::new();
        }
        self.classify(declaring, EdgeKind::Calls, "call target")
    }

    fn keep(&self, dep: &Dependency) -> bool {
        if self.ty.is_generic_parameter(&dep.target) {
            return false;
        }
        !(self.options.ignore_platform_types && self.options.is_platform_type(&dep.target))
    }

    fn unresolved(&self, signature: &str, role: &str, error: &dyn std::fmt::Display) {
        tracing::trace!(
            "Skipping unresolvable {} '{}' on {}: {}",
            role,
            signature,
            self.ty.full_name(),
            error
        );
    }
}
