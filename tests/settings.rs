use quarry::settings::Settings;

#[test]
fn defaults_apply_without_a_file() {
    let settings = Settings::default();
    assert_eq!(settings.listen, "127.0.0.1:8080");
    assert_eq!(settings.row_limit, 1000);
    assert!(settings.facts.is_none());
    assert!(settings.snapshot.is_none());
}

#[test]
fn file_values_override_defaults() {
    let settings = Settings::load(Some("tests/fixtures/quarry.toml")).expect("fixture loads");
    assert_eq!(settings.listen, "0.0.0.0:9090");
    assert_eq!(settings.row_limit, 25);
    assert_eq!(settings.facts.as_deref(), Some("facts.terms"));
    assert_eq!(settings.log, "info", "unset keys keep their default");
    assert!(settings.snapshot.is_none());
}

#[test]
fn missing_explicit_file_is_an_error() {
    assert!(Settings::load(Some("tests/fixtures/absent.toml")).is_err());
}
