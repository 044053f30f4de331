use valet_domain::config::Config;

#[test]
fn default_window_is_fifty() {
    let config = Config::default();
    assert_eq!(config.sessions.window_size, 50);
}

#[test]
fn default_confirmation_timeout_is_two_minutes() {
    let config = Config::default();
    assert_eq!(config.confirmations.timeout_secs, 120);
}

#[test]
fn explicit_scheduler_settings_parse() {
    let toml_str = r#"
owner_user_id = "1001"

[scheduler]
timezone = "America/Chicago"
tick_interval_secs = 10
"#;
    let config: Config = toml::from_str(toml_str).unwrap();
    assert_eq!(config.owner_user_id, "1001");
    assert_eq!(config.scheduler.timezone, "America/Chicago");
    assert_eq!(config.scheduler.tick_interval_secs, 10);
    // Untouched sections keep their defaults.
    assert_eq!(config.llm.max_tokens, 4096);
}
