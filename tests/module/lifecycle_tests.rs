//! Registry lifecycle tests
//!
//! Discovery, dependency download, reconciliation and the descriptor file.

use std::fs;

use super::test_utils::*;
use tierload::module::loader::{LoaderHierarchy, LoaderKind, LoaderMode};
use tierload::module::sandbox::TrustSandbox;
use tierload::module::Coordinate;

fn names(modules: &[tierload::module::ModuleDescriptor]) -> Vec<String> {
    modules.iter().map(|d| d.coordinate.artifact.clone()).collect()
}

#[tokio::test]
async fn test_mixed_modules_directory_builds_expected_hierarchy() {
    let fixture = ModuleTestFixture::new().unwrap();
    let a = Coordinate::new("app", "A", "1.0");
    let core = Coordinate::new("lib", "core", "1.0");
    fixture.publish(&core, &["lib.core.Core"], &[]);
    fixture.add_module(
        "A.jar",
        &["app.a.Service"],
        Some(&descriptor_toml(&a, &["lib:core:1.0"])),
    );
    fixture.add_module("B.jar", &["tierload.b.BInitializer", "app.b.Handler"], None);

    let registry = fixture.registry();
    let loadable = registry.reconcile().await.unwrap();
    assert_eq!(loadable.len(), 2);
    assert!(fixture.descriptor_path.exists());

    let a_entry = loadable.iter().find(|d| d.coordinate == a).unwrap();
    assert_eq!(a_entry.dependencies.len(), 1);
    assert_eq!(a_entry.dependencies[0].coordinate, core);
    let core_archive = a_entry.dependencies[0].archive.clone().unwrap();
    assert!(core_archive.starts_with(&fixture.cache_dir));
    assert!(core_archive.is_file());

    let sandbox = TrustSandbox::new(fixture.platform(&[]), fixture.inspector.clone());
    let partition = sandbox.partition(&loadable);
    assert_eq!(names(&partition.trusted), vec!["B"]);
    assert_eq!(names(&partition.untrusted), vec!["A"]);

    let hierarchy = LoaderHierarchy::build(
        fixture.platform(&[]),
        fixture.inspector.clone(),
        &partition.trusted,
        &partition.untrusted,
    );
    assert!(hierarchy.trusted().holds(&partition.trusted[0].coordinate));
    assert!(hierarchy.untrusted().holds(&a));

    let untrusted = hierarchy.loader(LoaderMode::Untrusted);
    let core_class = untrusted.load_class("lib.core.Core").unwrap();
    assert_eq!(core_class.defined_by, LoaderKind::Untrusted);
    assert_eq!(core_class.owner, core);
    assert!(hierarchy
        .loader(LoaderMode::Trusted)
        .load_class("lib.core.Core")
        .is_err());

    registry.record_trust(&partition.all()).await.unwrap();
    let snapshot = registry.snapshot().await;
    let b_entry = snapshot.iter().find(|d| d.coordinate.artifact == "B").unwrap();
    assert!(b_entry.trusted);
    assert_eq!(b_entry.initializer.as_deref(), Some("tierload.b.BInitializer"));
}

#[tokio::test]
async fn test_reconcile_is_idempotent() {
    let fixture = ModuleTestFixture::new().unwrap();
    fixture.publish(&Coordinate::new("lib", "core", "1.0"), &["lib.core.Core"], &[]);
    fixture.add_module(
        "a.jar",
        &["app.a.Service"],
        Some(&descriptor_toml(&Coordinate::new("app", "a", "1"), &["lib:core:1.0"])),
    );
    fixture.add_module("b.jar", &["tierload.b.BInitializer"], None);

    let registry = fixture.registry();
    let first = registry.reconcile().await.unwrap();
    let written = fs::read_to_string(&fixture.descriptor_path).unwrap();

    let second = registry.reconcile().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&fixture.descriptor_path).unwrap(), written);

    // a fresh process reading the same file agrees
    let reopened = fixture.registry();
    assert_eq!(reopened.reconcile().await.unwrap(), first);
}

#[tokio::test]
async fn test_removed_archive_is_purged() {
    let fixture = ModuleTestFixture::new().unwrap();
    let a = fixture.add_module("a.jar", &["tierload.a.AInitializer"], None);
    fixture.add_module("b.jar", &["tierload.b.BInitializer"], None);

    let registry = fixture.registry();
    assert_eq!(registry.reconcile().await.unwrap().len(), 2);

    fs::remove_file(&a).unwrap();
    let loadable = registry.reconcile().await.unwrap();
    assert_eq!(names(&loadable), vec!["b"]);
    assert_eq!(registry.snapshot().await.len(), 1);
}

#[tokio::test]
async fn test_missing_dependency_archive_is_downloaded_again() {
    let fixture = ModuleTestFixture::new().unwrap();
    fixture.publish(&Coordinate::new("lib", "core", "1.0"), &["lib.core.Core"], &[]);
    fixture.add_module(
        "a.jar",
        &["app.a.Service"],
        Some(&descriptor_toml(&Coordinate::new("app", "a", "1"), &["lib:core:1.0"])),
    );

    let registry = fixture.registry();
    let loadable = registry.reconcile().await.unwrap();
    let cached = loadable[0].dependencies[0].archive.clone().unwrap();
    fs::remove_file(&cached).unwrap();

    let loadable = registry.reconcile().await.unwrap();
    assert_eq!(loadable.len(), 1);
    assert!(cached.is_file());
}

#[tokio::test]
async fn test_unfetchable_dependency_excludes_module() {
    let fixture = ModuleTestFixture::new().unwrap();
    fixture.add_module(
        "d.jar",
        &["tierload.d.DInitializer"],
        Some(&descriptor_toml(&Coordinate::new("app", "d", "1"), &["lib:missing:1"])),
    );
    fixture.add_module("e.jar", &["tierload.e.EInitializer"], None);

    let registry = fixture.registry();
    let loadable = registry.reconcile().await.unwrap();
    assert_eq!(names(&loadable), vec!["e"]);

    let snapshot = registry.snapshot().await;
    let d = snapshot.iter().find(|m| m.coordinate.artifact == "d").unwrap();
    assert!(!d.should_load);
    assert!(d.dependencies[0].archive.is_none());
}

#[tokio::test]
async fn test_declared_module_is_downloaded_and_loaded() {
    let fixture = ModuleTestFixture::new().unwrap();
    let remote = Coordinate::new("app", "remote", "2.0");
    fixture.publish(&remote, &["tierload.remote.RemoteInitializer"], &[]);

    let registry = fixture.registry();
    let declared = registry.declare(&remote).await.unwrap();
    assert!(declared.pinned);
    assert!(declared.archive.as_ref().is_some_and(|p| p.is_file()));

    let loadable = registry.reconcile().await.unwrap();
    assert_eq!(loadable.len(), 1);
    assert_eq!(loadable[0].coordinate, remote);

    registry.set_should_load(&remote, false).await.unwrap();
    assert!(registry.reconcile().await.unwrap().is_empty());
    // still pinned, so the descriptor file stays
    assert!(fixture.descriptor_path.exists());

    let removed = registry.remove(&remote).await.unwrap();
    assert_eq!(removed.coordinate, remote);
    assert!(registry.snapshot().await.is_empty());
    assert!(!fixture.descriptor_path.exists());
}

#[tokio::test]
async fn test_empty_modules_directory_leaves_no_descriptor_file() {
    let fixture = ModuleTestFixture::new().unwrap();
    let registry = fixture.registry();
    assert!(registry.reconcile().await.unwrap().is_empty());
    assert!(!fixture.descriptor_path.exists());
}

#[tokio::test]
async fn test_disabled_module_stays_disabled_after_redownload() {
    let fixture = ModuleTestFixture::new().unwrap();
    let remote = Coordinate::new("app", "m", "1");
    fixture.publish(&remote, &["tierload.m.MInitializer"], &[]);

    let registry = fixture.registry();
    let declared = registry.declare(&remote).await.unwrap();
    registry.set_should_load(&remote, false).await.unwrap();

    let cached = declared.archive.unwrap();
    fs::remove_file(&cached).unwrap();
    assert!(registry.reconcile().await.unwrap().is_empty());

    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert!(snapshot[0].has_archive());
    assert!(!snapshot[0].should_load);

    registry.set_should_load(&remote, true).await.unwrap();
    assert_eq!(names(&registry.reconcile().await.unwrap()), vec!["m"]);
}

#[tokio::test]
async fn test_module_also_used_as_dependency_is_held_and_mounted() {
    let fixture = ModuleTestFixture::new().unwrap();
    let a = Coordinate::new("app", "a", "1");
    let core = Coordinate::new("lib", "core", "1");
    let core_classes = ["lib.core.Core", "tierload.core.CoreInitializer"];
    fixture.publish(&core, &core_classes, &[]);
    fixture.add_module(
        "a.jar",
        &["tierload.a.AInitializer"],
        Some(&descriptor_toml(&a, &["lib:core:1"])),
    );
    fixture.add_module("core.jar", &core_classes, Some(&descriptor_toml(&core, &[])));

    let registry = fixture.registry();
    let loadable = registry.reconcile().await.unwrap();
    assert_eq!(names(&loadable), vec!["a", "core"]);

    let platform = fixture.platform(&[]);
    let partition =
        TrustSandbox::new(platform.clone(), fixture.inspector.clone()).partition(&loadable);
    assert_eq!(names(&partition.trusted), vec!["a", "core"]);

    let hierarchy = LoaderHierarchy::build(
        platform,
        fixture.inspector.clone(),
        &partition.trusted,
        &partition.untrusted,
    );
    let untrusted_loader = hierarchy.loader(LoaderMode::Untrusted);
    let held = untrusted_loader.visible_modules();
    let core_entry = held
        .iter()
        .find(|(_, m)| m.coordinate == core)
        .expect("core held as a module");
    assert_eq!(core_entry.0, LoaderKind::Trusted);
    assert_eq!(
        core_entry.1.initializer.as_deref(),
        Some("tierload.core.CoreInitializer")
    );
}
