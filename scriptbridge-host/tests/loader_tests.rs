//! Integration tests for the script loader.
//!
//! Covers the update policy (blocking, fallback, background, safe mode) and
//! what a prepared plan hands the script runtime.

mod fixtures;

use anyhow::Result;
use scriptbridge_host::config::DataPaths;
use scriptbridge_host::loader::{BootPayload, BUNDLE_SOURCE_URL, LOADER_GLOBAL};
use serde_json::json;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fixtures::{
    create_test_loader, descriptor, loader_config, mount_bundle, mount_descriptor, read_cache,
    seed_cache, RecordingRuntime,
};

async fn unavailable_origin() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_first_load_waits_for_download() -> Result<()> {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor(&["bundle.js"], Some("abc"), "1.0")).await;
    mount_bundle(&server, "/bundle.js", "main()").await;

    let temp = TempDir::new()?;
    let (loader, _updater) = create_test_loader(loader_config(&server), &temp);

    let plan = loader.prepare().await?;
    assert!(plan.background_fetch.is_none());
    let staged = plan.bundle.as_ref().expect("bundle staged");
    assert_eq!(staged, &DataPaths::new(temp.path()).staged_bundle());
    assert_eq!(fs::read_to_string(staged)?, "main()");

    let mut runtime = RecordingRuntime::default();
    plan.apply(&mut runtime)?;
    assert_eq!(
        runtime.scripts,
        vec![(BUNDLE_SOURCE_URL.to_string(), "main()".to_string())]
    );

    let (key, json) = runtime.globals.last().expect("boot global");
    assert_eq!(key, LOADER_GLOBAL);
    let boot: BootPayload = serde_json::from_str(json)?;
    assert_eq!(boot.loader.modules["Updater"].functions["checkForUpdates"], 0);
    assert_eq!(boot.loader.modules["Kv"].functions["set"], 1);
    assert_eq!(boot.loader.init_config.base_url, format!("{}/", server.uri()));
    Ok(())
}

#[tokio::test]
async fn test_first_load_failure_is_fatal() -> Result<()> {
    let server = unavailable_origin().await;
    let temp = TempDir::new()?;
    let (loader, _updater) = create_test_loader(loader_config(&server), &temp);

    let err = loader.prepare().await.unwrap_err();
    assert!(format!("{err:#}").contains("script may not load"));
    Ok(())
}

#[tokio::test]
async fn test_skip_update_loads_cache_and_survives_failed_fetch() -> Result<()> {
    let server = unavailable_origin().await;
    let temp = TempDir::new()?;
    seed_cache(&temp, "cached()", "1.0#old")?;

    let mut config = loader_config(&server);
    config.skip_update = true;
    config.force_update = true;
    let (loader, updater) = create_test_loader(config, &temp);

    let plan = loader.prepare().await?;
    let staged = plan.bundle.as_ref().expect("cached bundle staged");
    assert_eq!(fs::read_to_string(staged)?, "cached()");

    // The background fetch fails quietly.
    plan.background_fetch.expect("background fetch").await?;
    assert_eq!(
        read_cache(&temp),
        (Some(b"cached()".to_vec()), Some("1.0#old".to_string()))
    );
    assert_eq!(updater.state().await.error_count, 1);
    Ok(())
}

#[tokio::test]
async fn test_background_update_applies_on_next_load() -> Result<()> {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor(&["bundle.js"], Some("new"), "2.0")).await;
    Mock::given(method("GET"))
        .and(path("/bundle.js"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("fresh()")
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;

    let temp = TempDir::new()?;
    seed_cache(&temp, "cached()", "1.0#old")?;
    let (loader, _updater) = create_test_loader(loader_config(&server), &temp);

    let plan = loader.prepare().await?;
    assert_eq!(fs::read_to_string(plan.bundle.as_ref().unwrap())?, "cached()");
    plan.background_fetch.expect("background fetch").await?;

    let next = loader.prepare().await?;
    assert_eq!(fs::read_to_string(next.bundle.as_ref().unwrap())?, "fresh()");
    if let Some(fetch) = next.background_fetch {
        fetch.await?;
    }
    Ok(())
}

#[tokio::test]
async fn test_force_update_waits_for_new_bundle() -> Result<()> {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor(&["bundle.js"], Some("new"), "2.0")).await;
    mount_bundle(&server, "/bundle.js", "fresh()").await;

    let temp = TempDir::new()?;
    seed_cache(&temp, "cached()", "1.0#old")?;
    let mut config = loader_config(&server);
    config.force_update = true;
    let (loader, _updater) = create_test_loader(config, &temp);

    let plan = loader.prepare().await?;
    assert!(plan.background_fetch.is_none());
    assert_eq!(fs::read_to_string(plan.bundle.as_ref().unwrap())?, "fresh()");
    Ok(())
}

#[tokio::test]
async fn test_force_update_falls_back_to_cache() -> Result<()> {
    let server = unavailable_origin().await;
    let temp = TempDir::new()?;
    seed_cache(&temp, "cached()", "1.0#old")?;

    let mut config = loader_config(&server);
    config.force_update = true;
    let (loader, _updater) = create_test_loader(config, &temp);

    let plan = loader.prepare().await?;
    assert_eq!(fs::read_to_string(plan.bundle.as_ref().unwrap())?, "cached()");
    Ok(())
}

#[tokio::test]
async fn test_safe_mode_loads_nothing() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let temp = TempDir::new()?;
    seed_cache(&temp, "cached()", "1.0#old")?;
    let paths = DataPaths::new(temp.path());
    fs::create_dir_all(paths.kv_dir())?;
    fs::write(paths.kv_dir().join("token"), "abc")?;

    let mut config = loader_config(&server);
    config.safe_mode = true;
    let (loader, _updater) = create_test_loader(config, &temp);

    let plan = loader.prepare().await?;
    assert!(plan.is_empty());

    let mut runtime = RecordingRuntime::default();
    plan.apply(&mut runtime)?;
    assert!(runtime.globals.is_empty());
    assert!(runtime.scripts.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_preload_scripts_kv_and_preload_files() -> Result<()> {
    let server = MockServer::start().await;
    mount_descriptor(&server, descriptor(&["bundle.js"], Some("abc"), "1.0")).await;

    let temp = TempDir::new()?;
    seed_cache(&temp, "main()", "1.0#abc")?;
    let paths = DataPaths::new(temp.path());

    fs::create_dir_all(paths.preload_scripts_dir())?;
    fs::write(paths.preload_scripts_dir().join("b.js"), "second()")?;
    fs::write(paths.preload_scripts_dir().join("a.js"), "first()")?;
    fs::write(paths.preload_scripts_dir().join("notes.txt"), "ignored")?;

    fs::create_dir_all(paths.kv_dir())?;
    fs::write(paths.kv_dir().join("session"), r#"{"id":1}"#)?;

    fs::create_dir_all(paths.preload_dir())?;
    fs::write(paths.preload_dir().join("flags.json"), r#"{"beta":true}"#)?;

    let (loader, _updater) = create_test_loader(loader_config(&server), &temp);
    let plan = loader.prepare().await?;
    if let Some(fetch) = plan.background_fetch.as_ref() {
        fetch.abort();
    }

    let mut runtime = RecordingRuntime::default();
    plan.apply(&mut runtime)?;

    assert_eq!(
        runtime.scripts,
        vec![
            ("preload:a.js".to_string(), "first()".to_string()),
            ("preload:b.js".to_string(), "second()".to_string()),
            (BUNDLE_SOURCE_URL.to_string(), "main()".to_string()),
        ]
    );

    assert_eq!(runtime.globals.len(), 2);
    assert_eq!(runtime.globals[0].0, "__sb_kv/session");
    assert_eq!(
        serde_json::from_str::<String>(&runtime.globals[0].1)?,
        r#"{"id":1}"#
    );

    let boot: BootPayload = serde_json::from_str(&runtime.globals[1].1)?;
    assert_eq!(boot.loader.preload["flags.json"], r#"{"beta":true}"#);
    assert_eq!(
        boot.loader.constants["DATA_DIR"],
        json!(temp.path().display().to_string())
    );
    Ok(())
}
