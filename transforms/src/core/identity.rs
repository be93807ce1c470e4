//! Identity values determining cache equivalence between transform invocations.
//!
//! Two shapes exist: immutable identities for artifacts produced outside the
//! build (content-addressed), and mutable identities for artifacts a local
//! project can rewrite during the build (path-addressed).

use crate::core::hashing::{HashCode, Hasher};

/// Opaque snapshot of an identity input, supplied by the host.
///
/// The contract is structural equality plus [`append_to`](Self::append_to).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueSnapshot {
    Text(String),
    Hash(HashCode),
}

impl ValueSnapshot {
    pub fn append_to(&self, hasher: &mut Hasher) {
        match self {
            ValueSnapshot::Text(value) => hasher.put_str(value),
            ValueSnapshot::Hash(hash) => hasher.put_hash(hash),
        }
    }
}

/// Identity of a transform applied to an artifact that is immutable at a
/// given content address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImmutableWorkspaceIdentity {
    pub input_artifact_path: ValueSnapshot,
    pub input_artifact_snapshot: ValueSnapshot,
    pub secondary_inputs: ValueSnapshot,
    pub dependencies_hash: HashCode,
}

impl ImmutableWorkspaceIdentity {
    pub fn unique_id(&self) -> String {
        let mut hasher = Hasher::new();
        self.input_artifact_path.append_to(&mut hasher);
        self.input_artifact_snapshot.append_to(&mut hasher);
        self.secondary_inputs.append_to(&mut hasher);
        hasher.put_hash(&self.dependencies_hash);
        hasher.finish().to_string()
    }
}

/// Identity of a transform applied to an artifact a producer project can
/// rewrite during the build. Keyed by path; re-use is gated on the regular
/// inputs instead of the content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MutableWorkspaceIdentity {
    pub input_artifact_absolute_path: String,
    pub secondary_inputs: ValueSnapshot,
    pub dependencies_hash: HashCode,
}

impl MutableWorkspaceIdentity {
    pub fn unique_id(&self) -> String {
        let mut hasher = Hasher::new();
        hasher.put_str(&self.input_artifact_absolute_path);
        self.secondary_inputs.append_to(&mut hasher);
        hasher.put_hash(&self.dependencies_hash);
        hasher.finish().to_string()
    }
}

/// Identity of one transform invocation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WorkspaceIdentity {
    Immutable(ImmutableWorkspaceIdentity),
    Mutable(MutableWorkspaceIdentity),
}

impl WorkspaceIdentity {
    /// Hex digest over all fields in fixed order. Equal identities produce
    /// equal ids; distinct identities must not collide.
    pub fn unique_id(&self) -> String {
        match self {
            WorkspaceIdentity::Immutable(identity) => identity.unique_id(),
            WorkspaceIdentity::Mutable(identity) => identity.unique_id(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn immutable() -> ImmutableWorkspaceIdentity {
        ImmutableWorkspaceIdentity {
            input_artifact_path: ValueSnapshot::Text("lib.jar".to_string()),
            input_artifact_snapshot: ValueSnapshot::Hash(HashCode::of(b"content")),
            secondary_inputs: ValueSnapshot::Hash(HashCode::of(b"secondary")),
            dependencies_hash: HashCode::of(b"deps"),
        }
    }

    fn mutable() -> MutableWorkspaceIdentity {
        MutableWorkspaceIdentity {
            input_artifact_absolute_path: "/ws/proj/build/out/a.o".to_string(),
            secondary_inputs: ValueSnapshot::Hash(HashCode::of(b"secondary")),
            dependencies_hash: HashCode::of(b"deps"),
        }
    }

    #[test]
    fn equal_fields_produce_equal_unique_ids() {
        assert_eq!(immutable(), immutable());
        assert_eq!(immutable().unique_id(), immutable().unique_id());
        assert_eq!(mutable(), mutable());
        assert_eq!(mutable().unique_id(), mutable().unique_id());
    }

    #[test]
    fn each_immutable_field_is_identity_relevant() {
        let base = immutable().unique_id();

        let mut changed = immutable();
        changed.input_artifact_path = ValueSnapshot::Text("other.jar".to_string());
        assert_ne!(changed.unique_id(), base);

        let mut changed = immutable();
        changed.input_artifact_snapshot = ValueSnapshot::Hash(HashCode::of(b"other"));
        assert_ne!(changed.unique_id(), base);

        let mut changed = immutable();
        changed.secondary_inputs = ValueSnapshot::Hash(HashCode::of(b"other"));
        assert_ne!(changed.unique_id(), base);

        let mut changed = immutable();
        changed.dependencies_hash = HashCode::of(b"other");
        assert_ne!(changed.unique_id(), base);
    }

    #[test]
    fn each_mutable_field_is_identity_relevant() {
        let base = mutable().unique_id();

        let mut changed = mutable();
        changed.input_artifact_absolute_path = "/ws/proj/build/out/b.o".to_string();
        assert_ne!(changed.unique_id(), base);

        let mut changed = mutable();
        changed.secondary_inputs = ValueSnapshot::Text("other".to_string());
        assert_ne!(changed.unique_id(), base);

        let mut changed = mutable();
        changed.dependencies_hash = HashCode::of(b"other");
        assert_ne!(changed.unique_id(), base);
    }

    #[test]
    fn immutable_and_mutable_identities_differ_for_the_same_artifact() {
        let path = "/repo/.cache/lib.jar";
        let immutable = ImmutableWorkspaceIdentity {
            input_artifact_path: ValueSnapshot::Text(path.to_string()),
            input_artifact_snapshot: ValueSnapshot::Hash(HashCode::of(b"content")),
            secondary_inputs: ValueSnapshot::Hash(HashCode::of(b"secondary")),
            dependencies_hash: HashCode::of(b"deps"),
        };
        let mutable = MutableWorkspaceIdentity {
            input_artifact_absolute_path: path.to_string(),
            secondary_inputs: ValueSnapshot::Hash(HashCode::of(b"secondary")),
            dependencies_hash: HashCode::of(b"deps"),
        };
        assert_ne!(immutable.unique_id(), mutable.unique_id());
    }
}
