use std::io::Write;

use tckd::{ConfigError, TckConfig};

#[test]
fn loads_sections_from_file() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(
        file,
        r#"
[dispatcher]
listen = "127.0.0.1:45000"

[test_manager]
listen = "127.0.0.1:45001"
request_timeout_ms = 2500

[agent]
sdk_name = "rust-nightly"
manager_addr = "127.0.0.1:45001"
reply_to_requests = false
"#
    )
    .expect("write config");

    let config = TckConfig::from_path(file.path()).expect("load config");
    assert_eq!(config.dispatcher.listen.port(), 45000);
    assert_eq!(config.test_manager.listen.port(), 45001);
    assert_eq!(config.test_manager.request_timeout_ms, 2500);
    assert_eq!(config.test_manager.notification_capacity, 1024);

    let agent = config.agent.agent_config();
    assert_eq!(agent.sdk_name, "rust-nightly");
    assert!(!agent.reply_to_requests);
    assert_eq!(config.agent.manager_addr, "127.0.0.1:45001");
    assert_eq!(config.agent.dispatcher_addr, "127.0.0.1:44444");
    assert_eq!(config.agent.transport_config().source, "tck:/rpc/response");
}

#[test]
fn missing_file_reports_path() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");
    let err = TckConfig::from_path(&path).expect_err("missing file");
    assert!(matches!(&err, ConfigError::Io { path: reported, .. } if reported == &path));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn load_without_path_uses_defaults() {
    let config = TckConfig::load(None).expect("defaults");
    assert_eq!(config.dispatcher.listen.port(), 44444);
    assert_eq!(config.test_manager.listen.port(), 12345);
}
