use imgpress::config::{Config, UrlColumn};

#[test]
fn parse_example_config() {
    let raw = include_str!("../imgpress.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert!(cfg.global.max_workers >= 1);
    assert!(!cfg.paths.out_dir.is_empty());
    assert_eq!(cfg.manifest.url_column, UrlColumn::Name("url".into()));
    assert_eq!(cfg.storage.backend, "fs");
}

#[test]
fn partial_sections_fall_back_to_defaults() {
    let cfg: Config = toml::from_str("[global]\nmax_workers = 3\n\n[compress]\nquality = 80\n")
        .expect("parse TOML");
    assert_eq!(cfg.global.max_workers, 3);
    assert_eq!(cfg.global.per_call_timeout_seconds, 30);
    assert_eq!(cfg.compress.quality, 80);
    assert_eq!(cfg.compress.max_dimension(), None);
    assert!(cfg.manifest.has_headers);
    assert!(cfg.global.job_deadline().is_none());
}

#[test]
fn url_column_accepts_an_index() {
    let cfg: Config = toml::from_str("[manifest]\nhas_headers = false\nurl_column = 2\n")
        .expect("parse TOML");
    assert_eq!(cfg.manifest.url_column, UrlColumn::Index(2));
}

#[test]
fn hash_input_changes_with_settings() {
    let a = Config::default();
    let mut b = Config::default();
    b.compress.quality = 90;
    assert_eq!(a.normalized_for_hash(), Config::default().normalized_for_hash());
    assert_ne!(a.normalized_for_hash(), b.normalized_for_hash());
}

#[test]
fn hash_input_only_carries_settings_that_are_read() {
    let cfg: Config = toml::from_str("[global]\njob_name = \"nightly\"\nmax_workers = 4\n")
        .expect("stale keys are ignored");
    assert_eq!(cfg.global.max_workers, 4);
    assert!(!cfg.normalized_for_hash().contains("job_name"));
    assert_eq!(
        Config::default().normalized_for_hash().replace("max_workers = 8", "max_workers = 4"),
        cfg.normalized_for_hash()
    );
}
