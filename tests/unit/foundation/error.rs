use super::*;

#[test]
fn display_prefixes_are_stable() {
    assert!(
        TexPipeError::compile("x")
            .to_string()
            .contains("compile error:")
    );
    assert!(TexPipeError::link("x").to_string().contains("link error:"));
    assert!(TexPipeError::bake("x").to_string().contains("bake error:"));
    assert!(TexPipeError::input("x").to_string().contains("input error:"));
    assert!(
        TexPipeError::config("x")
            .to_string()
            .contains("config error:")
    );
}

#[test]
fn other_preserves_source() {
    let base = std::io::Error::other("boom");
    let err = TexPipeError::Other(anyhow::Error::new(base));
    assert!(err.to_string().contains("boom"));
}
