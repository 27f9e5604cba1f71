use super::*;

#[test]
fn default_config_is_valid() {
    let cfg = AtlasConfig::default();
    cfg.validate().unwrap();
    assert_eq!(cfg.reserved_count(), 17);
    assert_eq!(cfg.entries_bytes(), 4096 * 32);
}

#[test]
fn json_fills_missing_fields_with_defaults() {
    let cfg = AtlasConfig::from_json_str(r#"{ "max_texture_id": 64, "max_layers": 2 }"#).unwrap();
    assert_eq!(cfg.max_texture_id, 64);
    assert_eq!(cfg.max_layers, 2);
    assert_eq!(cfg.initial_side, 1024);
    assert_eq!(cfg.padding_px, 2);
}

#[test]
fn json_rejects_unknown_fields() {
    let err = AtlasConfig::from_json_str(r#"{ "sides": 3 }"#).unwrap_err();
    assert!(err.to_string().contains("config error:"));
}

#[test]
fn validate_names_the_offending_field() {
    let bad_side = AtlasConfig {
        initial_side: 512,
        ..AtlasConfig::default()
    };
    assert!(bad_side.validate().unwrap_err().to_string().contains("initial_side"));

    let bad_layers = AtlasConfig {
        max_layers: 17,
        ..AtlasConfig::default()
    };
    assert!(bad_layers.validate().unwrap_err().to_string().contains("max_layers"));

    let too_few_ids = AtlasConfig {
        max_texture_id: 17,
        ..AtlasConfig::default()
    };
    assert!(
        too_few_ids
            .validate()
            .unwrap_err()
            .to_string()
            .contains("max_texture_id")
    );

    let tiny_staging = AtlasConfig {
        staging_bytes: 1024,
        ..AtlasConfig::default()
    };
    assert!(
        tiny_staging
            .validate()
            .unwrap_err()
            .to_string()
            .contains("staging_bytes")
    );
}
