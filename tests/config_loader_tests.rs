use orderbridge::config::ConfigLoader;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        env::remove_var("ORDERBRIDGE_PROFILE");
        env::remove_var("ORDERBRIDGE_API_BIND_ADDR");
        env::remove_var("ORDERBRIDGE_LOG_LEVEL");
        env::remove_var("ORDERBRIDGE_AIRTABLE_TOKEN");
        env::remove_var("ORDERBRIDGE_AIRTABLE_BASE_ID");
        env::remove_var("ORDERBRIDGE_TRENDYOL_SELLER_ID");
        env::remove_var("ORDERBRIDGE_TRENDYOL_API_KEY");
        env::remove_var("ORDERBRIDGE_TRENDYOL_API_SECRET");
        env::remove_var("ORDERBRIDGE_TRENDYOL_FEED");
        env::remove_var("ORDERBRIDGE_CRON_SECRET");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

const REQUIRED_CREDENTIALS: &str = "ORDERBRIDGE_AIRTABLE_TOKEN=pat-test\n\
ORDERBRIDGE_AIRTABLE_BASE_ID=appTest\n\
ORDERBRIDGE_TRENDYOL_SELLER_ID=1001\n\
ORDERBRIDGE_TRENDYOL_API_KEY=key\n\
ORDERBRIDGE_TRENDYOL_API_SECRET=secret\n";

#[test]
fn loads_defaults_in_test_profile() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "ORDERBRIDGE_PROFILE=test\n");

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.orders_table, "Orders");
    assert_eq!(cfg.customers_table, "Customers");
    assert_eq!(cfg.inventory_table, "French Inventories");
    assert_eq!(cfg.sync.page_size, 50);
    assert!(cfg.cron_secret.is_none());
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn missing_credentials_fail_fast_outside_test_profile() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "ORDERBRIDGE_PROFILE=local\n");

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("missing credentials should fail");
    assert!(format!("{}", err).contains("AIRTABLE_TOKEN"));
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!("{REQUIRED_CREDENTIALS}ORDERBRIDGE_API_BIND_ADDR=127.0.0.1:3000\n"),
    );
    write_env_file(
        &temp_dir,
        ".env.test",
        "ORDERBRIDGE_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "ORDERBRIDGE_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "ORDERBRIDGE_PROFILE=test\nORDERBRIDGE_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!("{REQUIRED_CREDENTIALS}ORDERBRIDGE_API_BIND_ADDR=127.0.0.1:3000\n"),
    );

    unsafe {
        env::set_var("ORDERBRIDGE_API_BIND_ADDR", "0.0.0.0:9090");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");

    clear_env();
}

#[test]
fn unknown_feed_endpoint_is_rejected() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!("{REQUIRED_CREDENTIALS}ORDERBRIDGE_TRENDYOL_FEED=packages\n"),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("unknown feed should fail");
    assert!(format!("{}", err).contains("unknown feed endpoint"));
    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        &format!("{REQUIRED_CREDENTIALS}ORDERBRIDGE_API_BIND_ADDR=not-an-addr\n"),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}
