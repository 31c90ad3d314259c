//! Integration tests for settings loading and local documents.

use confcenter::prelude::*;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_settings_file_drives_local_registry() {
    let temp_dir = TempDir::new().unwrap();
    let docs = temp_dir.path().join("docs");
    fs::create_dir_all(&docs).unwrap();
    fs::write(
        docs.join("app.ini"),
        "# server settings\nserver.port = 9090\nserver.tls=TRUE\nratio=0.25\n",
    )
    .unwrap();

    let settings_path = temp_dir.path().join("confcenter.toml");
    fs::write(
        &settings_path,
        format!(
            "[process]\nname = \"orders\"\n\n[cache]\ndir = \"{}\"\n",
            docs.display().to_string().replace('\\', "/")
        ),
    )
    .unwrap();

    let settings = Settings::load(Some(&settings_path)).unwrap();
    assert_eq!(settings.deployment_hint(), DeploymentMode::Local);

    let registry = ConfigRegistry::builder()
        .with_settings(settings)
        .build()
        .unwrap();
    let app = registry.get_config("app.ini");
    assert_eq!(app.get_int("server.port", 8080), 9090);
    assert!(app.get_bool("server.tls", false));
    assert_eq!(app.get_double("ratio", 1.0), 0.25);
    assert_eq!(app.get_lines(true), vec!["server.port = 9090", "server.tls=TRUE", "ratio=0.25"]);
}

#[test]
fn test_local_composite_view() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("override.ini"), "pool.size=50\n").unwrap();
    fs::write(
        temp_dir.path().join("defaults.ini"),
        "pool.size=10\npool.timeout=30\n",
    )
    .unwrap();

    let registry = ConfigRegistry::builder()
        .with_cache_dir(temp_dir.path())
        .build()
        .unwrap();
    let merged = registry.get_config("override.ini defaults.ini");
    assert_eq!(merged.get_int("pool.size", 0), 50);
    assert_eq!(merged.get_int("pool.timeout", 0), 30);
    assert_eq!(
        registry.names(),
        vec!["defaults.ini", "override.ini", "override.ini,defaults.ini"]
    );
}

#[test]
fn test_raw_bytes_survive_for_other_encodings() {
    let temp_dir = TempDir::new().unwrap();
    // "名称" in GBK
    let gbk = vec![0xc3, 0xfb, 0xb3, 0xc6];
    fs::write(temp_dir.path().join("names.txt"), &gbk).unwrap();

    let registry = ConfigRegistry::builder()
        .with_cache_dir(temp_dir.path())
        .build()
        .unwrap();
    let doc = registry.get_config("names.txt");
    assert_eq!(doc.content(), gbk);
    assert!(doc.get_string().contains('\u{fffd}'));
}

#[test]
fn test_listener_registered_through_registry() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(temp_dir.path().join("app.ini"), "a=1").unwrap();
    let registry = ConfigRegistry::builder()
        .with_cache_dir(temp_dir.path())
        .build()
        .unwrap();

    let seen = Arc::new(std::sync::atomic::AtomicI32::new(0));
    let inner = Arc::clone(&seen);
    let doc = registry.get_config_with(
        "app.ini",
        Arc::new(move |doc: &Document| {
            inner.store(doc.get_int("a", -1), std::sync::atomic::Ordering::SeqCst);
        }),
        true,
    );
    assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);

    doc.offer(b"a=2".to_vec());
    assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 2);
}
