// tests/config.rs
use discovery_feed::config::{FeedConfig, ENV_CONFIG_PATH, ENV_PAGE_SIZE, ENV_SNAPSHOT_DIR};
use std::path::PathBuf;
use std::{env, fs};

fn clear_env() {
    env::remove_var(ENV_CONFIG_PATH);
    env::remove_var(ENV_PAGE_SIZE);
    env::remove_var(ENV_SNAPSHOT_DIR);
}

#[test]
fn load_from_explicit_file() {
    let dir = tempfile::tempdir().unwrap();
    let p = dir.path().join("feed.toml");
    fs::write(
        &p,
        r#"
page_size = 12

[debounce]
initial_ms = 80

[snapshot]
freshness_secs = 30
dir = "/tmp/feed-snapshots"
"#,
    )
    .unwrap();

    let cfg = FeedConfig::load_from(&p).unwrap();
    assert_eq!(cfg.page_size, 12);
    assert_eq!(cfg.debounce.initial_ms, 80);
    assert_eq!(cfg.debounce.edit_ms, 300);
    assert_eq!(cfg.snapshot.freshness_secs, 30);
    assert_eq!(cfg.snapshot.max_age_secs, 86_400);
    assert_eq!(cfg.snapshot.dir, Some(PathBuf::from("/tmp/feed-snapshots")));
}

#[test]
fn missing_file_has_context() {
    let err = FeedConfig::load_from(std::path::Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("reading feed config"));
}

#[serial_test::serial]
#[test]
fn default_uses_env_then_fallbacks() {
    // isolated CWD so the repo's own config/ is never read
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    // 1) nothing → defaults
    assert_eq!(FeedConfig::load_default().unwrap(), FeedConfig::default());

    // 2) ./config/feed.toml
    fs::create_dir_all("config").unwrap();
    fs::write("config/feed.toml", "page_size = 33\n").unwrap();
    assert_eq!(FeedConfig::load_default().unwrap().page_size, 33);

    // 3) explicit path wins
    let explicit = tmp.path().join("other.toml");
    fs::write(&explicit, "page_size = 7\n").unwrap();
    env::set_var(ENV_CONFIG_PATH, &explicit);
    assert_eq!(FeedConfig::load_default().unwrap().page_size, 7);

    // 4) dangling explicit path is an error
    env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml"));
    assert!(FeedConfig::load_default().is_err());

    env::set_current_dir(old).unwrap();
    clear_env();
}

#[serial_test::serial]
#[test]
fn env_overrides_apply_last_and_are_clamped() {
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    clear_env();

    env::set_var(ENV_PAGE_SIZE, "500");
    env::set_var(ENV_SNAPSHOT_DIR, " /var/cache/feed ");
    let cfg = FeedConfig::load_default().unwrap();
    assert_eq!(cfg.page_size, 100);
    assert_eq!(cfg.snapshot.dir, Some(PathBuf::from("/var/cache/feed")));

    env::set_var(ENV_PAGE_SIZE, "not-a-number");
    assert_eq!(FeedConfig::load_default().unwrap().page_size, 20);

    env::set_current_dir(old).unwrap();
    clear_env();
}
