use super::*;

fn tex(name: &str) -> Base {
    Base::Tex {
        name: name.to_string(),
        offset: 0,
    }
}

fn base_name(p: &Pipeline) -> &str {
    match &p.base {
        Base::Tex { name, .. } => name,
        other => panic!("expected tex base, got {other:?}"),
    }
}

#[test]
fn plain_texture_with_stages() {
    let p = parse_program("stone |> opacity(128) |> brighten").unwrap();
    assert_eq!(p.base, tex("stone"));
    assert_eq!(p.stages.len(), 2);
    assert_eq!(p.stages[0].name, "opacity");
    assert_eq!(p.stages[0].args[0].value, Value::Int(128));
    assert_eq!(p.stages[1].name, "brighten");
    assert!(p.stages[1].args.is_empty());
}

#[test]
fn tex_keyword_is_optional() {
    let a = parse_program("tex stone |> invert()").unwrap();
    let b = parse_program("stone |> invert()").unwrap();
    assert_eq!(base_name(&a), "stone");
    assert_eq!(a.stages.len(), b.stages.len());
}

#[test]
fn bare_tex_names_a_texture_called_tex() {
    let p = parse_program("tex |> opacity(128)").unwrap();
    assert_eq!(base_name(&p), "tex");
    let p = parse_program("tex").unwrap();
    assert_eq!(base_name(&p), "tex");
}

#[test]
fn fill_base() {
    let p = parse_program("32x16 #FF0000FF").unwrap();
    match p.base {
        Base::Fill {
            width,
            height,
            color,
            ..
        } => {
            assert_eq!((width, height), (32, 16));
            assert_eq!(color, "#FF0000FF");
        }
        other => panic!("unexpected base {other:?}"),
    }

    // Spaced form and quoted color.
    let p = parse_program("8 x 8 \"#00FF00\"").unwrap();
    assert!(matches!(p.base, Base::Fill { width: 8, height: 8, .. }));
}

#[test]
fn anim_and_combine_bases_keep_raw_args() {
    let p = parse_program("anim(water, 16, 16, 4, fps=4, smooth=1, axis=y)").unwrap();
    let Base::Anim(call) = &p.base else {
        panic!("expected anim base");
    };
    assert_eq!(call.args.len(), 7);
    assert_eq!(
        call.arg(&["fps"], None).unwrap().value,
        Value::Int(4)
    );
    assert_eq!(
        call.arg(&["tex"], Some(0)).unwrap().value,
        Value::Ident("water".to_string())
    );

    let p = parse_program("combine(32, 16, 0, 0, a, 16, 0, b)").unwrap();
    assert!(matches!(p.base, Base::Combine(_)));
}

#[test]
fn nested_named_texture_with_stages() {
    let p = parse_program(r#"base |> overlay(tex(name="X") |> invert())"#).unwrap();
    let Value::Nested(inner) = &p.stages[0].args[0].value else {
        panic!("expected nested value");
    };
    assert_eq!(base_name(inner), "X");
    assert_eq!(inner.stages.len(), 1);
    assert_eq!(inner.stages[0].name, "invert");
}

#[test]
fn nested_forms_are_equivalent() {
    for src in [
        "base |> overlay(tex(X))",
        "base |> overlay(tex(tex=X))",
        "base |> overlay(tex X)",
    ] {
        let p = parse_program(src).unwrap();
        let Value::Nested(inner) = &p.stages[0].args[0].value else {
            panic!("expected nested value for {src}");
        };
        assert_eq!(base_name(inner), "X", "{src}");
    }
}

#[test]
fn nested_pipeline_inside_parens() {
    let p = parse_program("base |> mask(tex(X |> transform(2)) |> opacity(9))").unwrap();
    let Value::Nested(inner) = &p.stages[0].args[0].value else {
        panic!("expected nested value");
    };
    let names: Vec<_> = inner.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["transform", "opacity"]);
}

#[test]
fn outer_pipe_after_nested_call_belongs_to_outer() {
    let p = parse_program("a |> overlay(tex(b)) |> brighten").unwrap();
    assert_eq!(p.stages.len(), 2);
}

#[test]
fn positional_lookup_skips_named_args() {
    let p = parse_program("x |> colorize(ratio=10, #FF0000)").unwrap();
    let call = &p.stages[0];
    assert_eq!(
        call.arg(&["color"], Some(0)).unwrap().value,
        Value::Ident("#FF0000".to_string())
    );
    assert_eq!(call.arg(&["ratio"], Some(1)).unwrap().value, Value::Int(10));
}

#[test]
fn malformed_input_reports_offsets() {
    let err = parse_program("stone |> ").unwrap_err();
    assert_eq!(err.offset, 9);

    let err = parse_program("stone |> opacity(1").unwrap_err();
    assert!(err.message.contains("RParen"));

    let err = parse_program("32x #FFF").unwrap_err();
    assert_eq!(err.offset, 4);

    assert!(parse_program("").is_err());
    assert!(parse_program("a b").is_err());
    assert!(parse_program("a |> overlay(tex(name=1))").is_err());
    assert!(parse_program("a |> overlay(tex(foo=x))").is_err());
}

#[test]
fn nesting_depth_is_bounded() {
    let mut src = String::from("a");
    for _ in 0..40 {
        src = format!("b |> overlay(tex({src}))");
    }
    let err = parse_program(&src).unwrap_err();
    assert!(err.message.contains("deeper"));

    let mut ok = String::from("a");
    for _ in 0..MAX_NESTING_DEPTH {
        ok = format!("b |> overlay(tex({ok}))");
    }
    parse_program(&ok).unwrap();
}
