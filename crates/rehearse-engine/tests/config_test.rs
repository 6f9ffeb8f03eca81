use rehearse_engine::config::{ConfigError, ConfigLoader, RehearseConfig, RunMode};
use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use tempfile::NamedTempFile;

#[test]
fn defaults_match_documented_values() {
    let config = RehearseConfig::default();
    assert_eq!(config.target_hours, 35.0);
    assert_eq!(config.target_seconds(), 126000.0);
    assert_eq!(config.data_dir, PathBuf::from("data"));
    assert!(config.browser.headless);
    assert!(!config.debug.enabled);
    assert_eq!(config.workflow.max_steps_per_cycle, 10);
    assert_eq!(config.workflow.max_consecutive_failures, 3);
    assert_eq!(config.workflow.action_timeout_ms, 5000);
    assert_eq!(config.workflow.resolution_tick_ms, 50);
    assert_eq!(config.workflow.navigation_timeout_ms, 30_000);
    assert_eq!(config.mode, RunMode::Lesson);
}

#[tokio::test]
async fn partial_file_keeps_defaults() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        "user: me@x.io\ntarget_hours: 10\nworkflow:\n  max_steps_per_cycle: 4\ndebug:\n  enabled: true"
    )
    .unwrap();

    let config = ConfigLoader::load_from(file.path()).await.unwrap();
    assert_eq!(config.user.as_deref(), Some("me@x.io"));
    assert_eq!(config.target_hours, 10.0);
    assert_eq!(config.workflow.max_steps_per_cycle, 4);
    assert_eq!(config.workflow.max_consecutive_failures, 3);
    assert!(config.debug.enabled);
    assert_eq!(config.debug.dir, PathBuf::from("debug"));
}

#[tokio::test]
async fn malformed_file_is_a_parse_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "target_hours: [not, a, number]").unwrap();
    let err = ConfigLoader::load_from(file.path()).await.unwrap_err();
    assert!(err.to_string().contains("parse"));
}

#[test]
fn environment_overrides_file_values() {
    let env: HashMap<&str, &str> = [
        ("REHEARSE_EMAIL", "env@x.io"),
        ("REHEARSE_PASSWORD", "pw"),
        ("REHEARSE_TARGET_HOURS", "12.5"),
        ("REHEARSE_DATA_DIR", "/tmp/rehearse"),
        ("REHEARSE_HEADLESS", "false"),
        ("REHEARSE_DEBUG", "1"),
        ("CHROME_BIN", "/usr/bin/chromium"),
    ]
    .into_iter()
    .collect();

    let mut config = RehearseConfig {
        user: Some("file@x.io".into()),
        ..RehearseConfig::default()
    };
    ConfigLoader::apply_env_from(&mut config, |key| env.get(key).map(|v| v.to_string()));

    assert_eq!(config.user.as_deref(), Some("env@x.io"));
    assert_eq!(config.password.as_deref(), Some("pw"));
    assert_eq!(config.target_hours, 12.5);
    assert_eq!(config.data_dir, PathBuf::from("/tmp/rehearse"));
    assert!(!config.browser.headless);
    assert!(config.debug.enabled);
    assert_eq!(
        config.browser.chrome_bin,
        Some(PathBuf::from("/usr/bin/chromium"))
    );
}

#[test]
fn invalid_environment_values_are_ignored() {
    let mut config = RehearseConfig::default();
    ConfigLoader::apply_env_from(&mut config, |key| match key {
        "REHEARSE_TARGET_HOURS" => Some("lots".into()),
        "REHEARSE_HEADLESS" => Some("maybe".into()),
        "REHEARSE_EMAIL" => Some("   ".into()),
        _ => None,
    });
    assert_eq!(config.target_hours, 35.0);
    assert!(config.browser.headless);
    assert!(config.user.is_none());
}

#[tokio::test]
async fn non_positive_target_hours_is_rejected() {
    for value in ["0", "-3", ".nan"] {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "user: me@x.io\ntarget_hours: {}", value).unwrap();

        let err = ConfigLoader::load_from(file.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "{}: {}", value, err);
        assert!(err.to_string().contains("target_hours"));
    }
}

#[tokio::test]
async fn zero_navigation_timeout_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "workflow:\n  navigation_timeout_ms: 0").unwrap();
    let err = ConfigLoader::load_from(file.path()).await.unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}

#[tokio::test]
async fn stories_mode_from_file_and_environment() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "mode: stories").unwrap();
    let mut config = ConfigLoader::load_from(file.path()).await.unwrap();
    assert_eq!(config.mode, RunMode::Stories);

    ConfigLoader::apply_env_from(&mut config, |key| {
        (key == "REHEARSE_MODE").then(|| "Lesson".to_string())
    });
    assert_eq!(config.mode, RunMode::Lesson);

    ConfigLoader::apply_env_from(&mut config, |key| {
        (key == "REHEARSE_MODE").then(|| "poems".to_string())
    });
    assert_eq!(config.mode, RunMode::Lesson);
}
