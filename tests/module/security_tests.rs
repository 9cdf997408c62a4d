//! Trust and isolation tests
//!
//! Sandbox partitioning properties and loader hierarchy containment.

use proptest::prelude::*;
use std::collections::{BTreeSet, HashSet};

use super::test_utils::*;
use tierload::config::ExhaustedPolicy;
use tierload::module::loader::{LoadedModule, LoaderHierarchy, LoaderKind, LoaderMode};
use tierload::module::sandbox::TrustSandbox;
use tierload::module::security::Privilege;
use tierload::module::{Coordinate, ModuleDescriptor};

const SHARED: [&str; 3] = ["shared.Util", "shared.Codec", "shared.Cache"];

/// One archive per entry of (has initializer, shared classes bundled)
fn build_candidates(
    fixture: &ModuleTestFixture,
    specs: &[(bool, BTreeSet<usize>)],
) -> Vec<ModuleDescriptor> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (has_init, shared))| {
            let own = format!("app.m{}.Own", i);
            let init = format!("tierload.m{}.M{}Initializer", i, i);
            let mut classes: Vec<&str> = vec![own.as_str()];
            if *has_init {
                classes.push(init.as_str());
            }
            classes.extend(shared.iter().map(|&s| SHARED[s]));
            let path = fixture.add_module(&format!("m{}.jar", i), &classes, None);
            ModuleDescriptor::new(Coordinate::new("app", format!("m{}", i), "1"), Some(path))
        })
        .collect()
}

fn artifacts(list: &[ModuleDescriptor]) -> Vec<String> {
    list.iter().map(|d| d.coordinate.artifact.clone()).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn test_partition_invariants(
        specs in prop::collection::vec(
            (any::<bool>(), prop::collection::btree_set(0usize..3, 0..=2)),
            1..6,
        )
    ) {
        let fixture = ModuleTestFixture::new().unwrap();
        let candidates = build_candidates(&fixture, &specs);
        let sandbox = TrustSandbox::new(fixture.platform(&[]), fixture.inspector.clone());
        let partition = sandbox.partition(&candidates);

        // every candidate lands in exactly one list, order preserved
        prop_assert_eq!(partition.trusted.len() + partition.untrusted.len(), candidates.len());
        let verdicts: Vec<String> = candidates
            .iter()
            .filter(|c| partition.trusted.iter().any(|t| t.coordinate == c.coordinate))
            .map(|c| c.coordinate.artifact.clone())
            .collect();
        prop_assert_eq!(artifacts(&partition.trusted), verdicts);

        // trusted modules have initializers and share no classes
        let mut seen = HashSet::new();
        for (i, (has_init, shared)) in specs.iter().enumerate() {
            let name = format!("m{}", i);
            if !partition.trusted.iter().any(|t| t.coordinate.artifact == name) {
                continue;
            }
            prop_assert!(*has_init);
            for s in shared {
                prop_assert!(seen.insert(*s), "shared class {} trusted twice", SHARED[*s]);
            }
        }

        // a module that loads cleanly with everything trusted before it is trusted
        let mut taken = HashSet::new();
        for (i, (has_init, shared)) in specs.iter().enumerate() {
            let expect_trusted = *has_init && shared.iter().all(|s| !taken.contains(s));
            if expect_trusted {
                taken.extend(shared.iter().copied());
            }
            let name = format!("m{}", i);
            let trusted = partition.trusted.iter().any(|t| t.coordinate.artifact == name);
            prop_assert_eq!(trusted, expect_trusted, "verdict for {}", name);
        }

        // the trusted set alone is fully trusted again
        let replay = sandbox.partition(&partition.trusted);
        prop_assert!(replay.untrusted.is_empty());

        // verdicts on a prefix do not depend on what follows it
        let cut = candidates.len() / 2;
        let prefix = sandbox.partition(&candidates[..cut]);
        let full_prefix: Vec<String> = artifacts(&partition.trusted)
            .into_iter()
            .filter(|name| artifacts(&candidates[..cut]).contains(name))
            .collect();
        prop_assert_eq!(artifacts(&prefix.trusted), full_prefix);
    }
}

#[test]
fn test_untrusted_sees_trusted_but_not_the_reverse() {
    let fixture = ModuleTestFixture::new().unwrap();
    let trusted = build_candidates(&fixture, &[(true, BTreeSet::from([0]))]);
    let untrusted_path = fixture.add_module("guest.jar", &["app.guest.Guest"], None);
    let untrusted = vec![ModuleDescriptor::new(
        Coordinate::new("app", "guest", "1"),
        Some(untrusted_path),
    )];

    let platform = fixture.platform(&["host.Api"]);
    let sandbox = TrustSandbox::new(platform.clone(), fixture.inspector.clone());
    let partition = sandbox.partition(&trusted);
    let hierarchy = LoaderHierarchy::build(
        platform,
        fixture.inspector.clone(),
        &partition.trusted,
        &untrusted,
    );

    let top = hierarchy.loader(LoaderMode::Untrusted);
    assert_eq!(top.defining_loader("host.Api"), Some(LoaderKind::Platform));
    assert_eq!(top.defining_loader("shared.Util"), Some(LoaderKind::Trusted));
    assert_eq!(top.defining_loader("app.guest.Guest"), Some(LoaderKind::Untrusted));

    let middle = hierarchy.loader(LoaderMode::Trusted);
    assert_eq!(middle.defining_loader("shared.Util"), Some(LoaderKind::Trusted));
    assert_eq!(middle.defining_loader("app.guest.Guest"), None);

    let bottom = hierarchy.loader(LoaderMode::Custom);
    assert_eq!(bottom.defining_loader("host.Api"), Some(LoaderKind::Platform));
    assert_eq!(bottom.defining_loader("shared.Util"), None);
}

#[test]
fn test_untrusted_module_cannot_shadow_platform_or_trusted_classes() {
    let fixture = ModuleTestFixture::new().unwrap();
    let trusted = build_candidates(&fixture, &[(true, BTreeSet::from([1]))]);
    let shadow_path = fixture.add_module("shadow.jar", &["shared.Codec"], None);
    let host_path = fixture.add_module("host.jar", &["host.Api"], None);
    let untrusted = vec![
        ModuleDescriptor::new(Coordinate::new("app", "shadow", "1"), Some(shadow_path)),
        ModuleDescriptor::new(Coordinate::new("app", "host", "1"), Some(host_path)),
    ];

    let platform = fixture.platform(&["host.Api"]);
    let hierarchy =
        LoaderHierarchy::build(platform, fixture.inspector.clone(), &trusted, &untrusted);

    // both modules are still held, their duplicate classes are not
    let held: Vec<_> = artifacts_of(hierarchy.untrusted().modules());
    assert_eq!(held, vec!["shadow", "host"]);
    assert_eq!(hierarchy.untrusted().class_names().count(), 0);

    let top = hierarchy.loader(LoaderMode::Untrusted);
    let class = top.load_class("shared.Codec").unwrap();
    assert_eq!(class.defined_by, LoaderKind::Trusted);
    assert_eq!(class.owner, trusted[0].coordinate);
    assert_eq!(top.defining_loader("host.Api"), Some(LoaderKind::Platform));
}

fn artifacts_of(modules: &[LoadedModule]) -> Vec<String> {
    modules.iter().map(|m| m.coordinate.artifact.clone()).collect()
}

#[tokio::test]
async fn test_module_losing_a_class_conflict_is_served_untrusted() {
    let fixture = ModuleTestFixture::new().unwrap();
    fixture.add_module("first.jar", &["tierload.first.FirstInitializer", "shared.Util"], None);
    fixture.add_module("second.jar", &["tierload.second.SecondInitializer", "shared.Util"], None);
    let orchestrator = fixture.orchestrator(
        fast_reload_config(ExhaustedPolicy::Halt),
        ScriptedFactory::healthy(),
    );
    orchestrator.start().await.unwrap();

    let hierarchy = orchestrator.hierarchy().unwrap();
    assert_eq!(artifacts_of(hierarchy.trusted().modules()), vec!["first"]);
    assert_eq!(artifacts_of(hierarchy.untrusted().modules()), vec!["second"]);
    let top = hierarchy.loader(LoaderMode::Untrusted);
    assert_eq!(
        top.defining_loader("tierload.second.SecondInitializer"),
        Some(LoaderKind::Untrusted)
    );
    assert_eq!(top.defining_loader("shared.Util"), Some(LoaderKind::Trusted));

    let status = orchestrator.status().await;
    let second = status
        .modules
        .iter()
        .find(|m| m.coordinate.artifact == "second")
        .unwrap();
    assert!(!second.trusted);
    assert_eq!(second.loader, Some(LoaderKind::Untrusted));
}

#[test]
fn test_privilege_follows_hosting_node() {
    let fixture = ModuleTestFixture::new().unwrap();
    let specs = [(true, BTreeSet::new()), (false, BTreeSet::new())];
    let candidates = build_candidates(&fixture, &specs);
    let platform = fixture.platform(&[]);
    let partition = TrustSandbox::new(platform.clone(), fixture.inspector.clone())
        .partition(&candidates);
    let hierarchy = LoaderHierarchy::build(
        platform,
        fixture.inspector.clone(),
        &partition.trusted,
        &partition.untrusted,
    );

    let top = hierarchy.loader(LoaderMode::Untrusted);
    assert_eq!(top.privilege_of(&candidates[0].coordinate), Some(Privilege::Full));
    assert_eq!(
        top.privilege_of(&candidates[1].coordinate),
        Some(Privilege::Restricted)
    );
    assert_eq!(
        hierarchy.loader(LoaderMode::Trusted).privilege_of(&candidates[1].coordinate),
        None
    );
}
