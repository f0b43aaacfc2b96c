//! Object reference helpers
//!
//! Builds and compares `ObjectReference`s pointing at other resources, used for
//! `ByoHost.status.machineRef`, secret references and Cluster API refs.

use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};

/// Reference to `obj` with apiVersion, kind, namespace, name and uid filled in.
pub fn object_reference<K>(obj: &K) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    ObjectReference {
        api_version: Some(K::api_version(&()).to_string()),
        kind: Some(K::kind(&()).to_string()),
        namespace: obj.namespace(),
        name: Some(obj.name_any()),
        uid: obj.uid(),
        ..Default::default()
    }
}

/// Reference to a Secret by namespace and name.
pub fn secret_reference(namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some("v1".to_string()),
        kind: Some("Secret".to_string()),
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

/// True when the reference names `obj`: same kind, namespace and name.
pub fn references<K>(reference: &ObjectReference, obj: &K) -> bool
where
    K: Resource<DynamicType = ()>,
{
    reference.kind.as_deref() == Some(K::kind(&()).as_ref())
        && reference.name.as_deref() == obj.meta().name.as_deref()
        && reference.namespace == obj.namespace()
}

/// Name and namespace of a reference, falling back to `default_ns`.
pub fn name_and_namespace<'a>(
    reference: &'a ObjectReference,
    default_ns: &'a str,
) -> Option<(&'a str, &'a str)> {
    let name = reference.name.as_deref().filter(|n| !n.is_empty())?;
    let ns = reference.namespace.as_deref().filter(|n| !n.is_empty()).unwrap_or(default_ns);
    Some((ns, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ByoMachine, ByoMachineSpec};

    fn machine(ns: &str, name: &str) -> ByoMachine {
        let mut m = ByoMachine::new(name, ByoMachineSpec::default());
        m.metadata.namespace = Some(ns.to_string());
        m.metadata.uid = Some("uid-1".to_string());
        m
    }

    #[test]
    fn test_object_reference() {
        let r = object_reference(&machine("default", "m0"));
        assert_eq!(r.kind.as_deref(), Some("ByoMachine"));
        assert_eq!(r.api_version.as_deref(), Some("infrastructure.cluster.x-k8s.io/v1beta1"));
        assert_eq!(r.namespace.as_deref(), Some("default"));
        assert_eq!(r.name.as_deref(), Some("m0"));
        assert_eq!(r.uid.as_deref(), Some("uid-1"));
    }

    #[test]
    fn test_references() {
        let m = machine("default", "m0");
        let r = object_reference(&m);
        assert!(references(&r, &m));
        assert!(!references(&r, &machine("other", "m0")));
        assert!(!references(&secret_reference("default", "m0"), &m));
    }

    #[test]
    fn test_name_and_namespace() {
        let r = ObjectReference { name: Some("s".into()), ..Default::default() };
        assert_eq!(name_and_namespace(&r, "ns"), Some(("ns", "s")));
        assert_eq!(name_and_namespace(&ObjectReference::default(), "ns"), None);
    }
}
