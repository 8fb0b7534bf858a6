//! Method lookup across an interface hierarchy.
//!
//! Method names are the routing key, so a name may resolve to only one
//! signature anywhere in the hierarchy. The same signature re-declared on a
//! base interface is the same method and the more-derived declaration wins.

use std::collections::{BTreeMap, HashSet, VecDeque};

use crate::descriptor::MethodDecl;
use crate::error::DescriptorError;
use crate::registry::ServiceRegistry;

/// Name → method map for `type_name` and everything it extends.
pub fn locate<'r>(
    registry: &'r ServiceRegistry,
    type_name: &str,
) -> Result<BTreeMap<&'r str, &'r MethodDecl>, DescriptorError> {
    let mut methods: BTreeMap<&'r str, &'r MethodDecl> = BTreeMap::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut work: VecDeque<&str> = VecDeque::new();

    let root = registry
        .interface(type_name)
        .ok_or_else(|| DescriptorError::UnknownInterface(type_name.to_string()))?;
    work.push_back(root.type_name.as_str());

    while let Some(current) = work.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        let decl = registry
            .interface(current)
            .ok_or_else(|| DescriptorError::UnknownInterface(current.to_string()))?;

        let mut declared_here: HashSet<&str> = HashSet::new();
        for method in &decl.methods {
            if !declared_here.insert(method.name.as_str()) {
                return Err(ambiguous(type_name, &method.name));
            }
            match methods.get(method.name.as_str()) {
                Some(existing) if existing.signature() == method.signature() => {}
                Some(_) => return Err(ambiguous(type_name, &method.name)),
                None => {
                    methods.insert(method.name.as_str(), method);
                }
            }
        }

        for base in &decl.extends {
            if !visited.contains(base.as_str()) {
                work.push_back(base.as_str());
            }
        }
    }

    Ok(methods)
}

/// Find one method: exact name first, then a unique case-insensitive match.
pub fn get_method<'r>(
    registry: &'r ServiceRegistry,
    type_name: &str,
    name: &str,
) -> Result<&'r MethodDecl, DescriptorError> {
    let methods = locate(registry, type_name)?;
    if let Some(method) = methods.get(name) {
        return Ok(*method);
    }

    let mut matches = methods
        .iter()
        .filter(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
        .map(|(_, method)| *method);
    match (matches.next(), matches.next()) {
        (Some(method), None) => Ok(method),
        (Some(_), Some(_)) => Err(ambiguous(type_name, name)),
        (None, _) => Err(DescriptorError::UnknownMethod {
            type_name: type_name.to_string(),
            method: name.to_string(),
        }),
    }
}

fn ambiguous(type_name: &str, method: &str) -> DescriptorError {
    DescriptorError::AmbiguousMethod {
        type_name: type_name.to_string(),
        method: method.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{DbType, HttpVerb, InterfaceDecl, ParamDecl, ParamDescriptor};

    fn method(name: &str) -> MethodDecl {
        MethodDecl::new(name, "Json").http(HttpVerb::Get)
    }

    fn registry(decls: Vec<InterfaceDecl>) -> ServiceRegistry {
        decls
            .into_iter()
            .fold(ServiceRegistry::builder(), |b, d| b.interface(d))
            .build()
            .unwrap()
    }

    #[test]
    fn test_locate_merges_hierarchy() {
        let reg = registry(vec![
            InterfaceDecl::new("IChild")
                .extends("IBase")
                .extends("IOther")
                .method(method("A")),
            InterfaceDecl::new("IBase").method(method("B")).method(method("C")),
            InterfaceDecl::new("IOther").extends("IBase").method(method("D")),
        ]);
        let methods = locate(&reg, "IChild").unwrap();
        assert_eq!(methods.keys().copied().collect::<Vec<_>>(), vec!["A", "B", "C", "D"]);
    }

    #[test]
    fn test_same_signature_override_is_skipped() {
        let reg = registry(vec![
            InterfaceDecl::new("IChild").extends("IBase").method(method("A")),
            InterfaceDecl::new("IBase").method(method("A")),
        ]);
        assert_eq!(locate(&reg, "IChild").unwrap().len(), 1);
    }

    #[test]
    fn test_overloads_are_ambiguous() {
        let with_param = method("A").param(ParamDecl::new("id", ParamDescriptor::new(DbType::Int)));
        let reg = registry(vec![
            InterfaceDecl::new("IChild").extends("IBase").method(method("A")),
            InterfaceDecl::new("IBase").method(with_param.clone()),
            InterfaceDecl::new("ISame").method(method("A")).method(with_param),
        ]);
        assert!(matches!(
            locate(&reg, "IChild"),
            Err(DescriptorError::AmbiguousMethod { .. })
        ));
        assert!(matches!(
            locate(&reg, "ISame"),
            Err(DescriptorError::AmbiguousMethod { .. })
        ));
    }

    #[test]
    fn test_get_method_case_insensitive_fallback() {
        let reg = registry(vec![InterfaceDecl::new("IA")
            .method(method("GetUser"))
            .extends("IMissing")]);
        assert!(matches!(
            get_method(&reg, "IA", "GetUser"),
            Err(DescriptorError::UnknownInterface(t)) if t == "IMissing"
        ));

        let reg = registry(vec![InterfaceDecl::new("IA").method(method("GetUser"))]);
        assert_eq!(get_method(&reg, "IA", "getuser").unwrap().name, "GetUser");
        assert!(matches!(
            get_method(&reg, "IA", "Nope"),
            Err(DescriptorError::UnknownMethod { .. })
        ));
    }
}
