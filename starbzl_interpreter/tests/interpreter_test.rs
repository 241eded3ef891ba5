//! End-to-end tests driving the facade over an in-memory file system.

use std::sync::Arc;

use indoc::indoc;
use starbzl_core::InMemoryFileSystem;
use starbzl_interpreter::coerced::CoercedValue;
use starbzl_interpreter::ActionKind;
use starbzl_interpreter::EvalResult;
use starbzl_interpreter::Interpreter;
use starbzl_interpreter::InterpreterOptions;
use starbzl_interpreter::RuleContextSpec;

fn interpreter_with(files: &[(&str, &str)]) -> Interpreter {
    let fs = Arc::new(InMemoryFileSystem::new());
    for (path, content) in files {
        fs.add_file(path, *content);
    }
    Interpreter::new(InterpreterOptions {
        file_system: Some(fs),
        ..Default::default()
    })
}

fn eval_bzl(source: &str) -> anyhow::Result<EvalResult> {
    interpreter_with(&[]).eval("test.bzl", source)
}

fn repr_of(result: &EvalResult, name: &str) -> String {
    result
        .get_global(name)
        .unwrap_or_else(|| panic!("no global {}", name))
        .value()
        .to_repr()
}

#[test]
fn provider_round_trip() {
    let result = eval_bzl(indoc! {r#"
        MyInfo = provider(fields = ["x", "y"])
        a = MyInfo(x = 1, y = 2)
        t = type(a)
        x = a.x
        y = a.y
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "t"), "\"MyInfo\"");
    assert_eq!(repr_of(&result, "x"), "1");
    assert_eq!(repr_of(&result, "y"), "2");
    assert_eq!(repr_of(&result, "a"), "MyInfo(x = 1, y = 2)");
}

#[test]
fn provider_rejects_unknown_field() {
    let err = eval_bzl(indoc! {r#"
        MyInfo = provider(fields = ["x", "y"])
        a = MyInfo(z = 3)
    "#})
    .unwrap_err();
    assert!(format!("{:#}", err).contains("unexpected field 'z'"), "{:#}", err);
}

#[test]
fn provider_init_routes_constructor() {
    let result = eval_bzl(indoc! {r#"
        def _init(x):
            return {"x": 2 * x}

        pair = provider(fields = ["x"], init = _init)
        MyInfo = pair[0]
        _new_myinfo = pair[1]
        a = MyInfo(3)
        b = _new_myinfo(x = 5)
        ax = a.x
        bx = b.x
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "ax"), "6");
    assert_eq!(repr_of(&result, "bx"), "5");
}

#[test]
fn provider_init_must_return_mapping() {
    let err = eval_bzl(indoc! {r#"
        def _init(x):
            return x

        pair = provider(fields = ["x"], init = _init)
        MyInfo = pair[0]
        a = MyInfo(1)
    "#})
    .unwrap_err();
    assert!(format!("{:#}", err).contains("init must return a dict"), "{:#}", err);
}

#[test]
fn depset_postorder_dedups() {
    let result = eval_bzl(indoc! {r#"
        a = depset([1, 2])
        b = depset([2, 3], transitive = [a], order = "postorder")
        r = b.to_list()
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "r"), "[1, 2, 3]");
}

#[test]
fn depset_preorder_and_topological() {
    let result = eval_bzl(indoc! {r#"
        pre = depset([1], transitive = [depset([2])], order = "preorder").to_list()
        topo = depset([1], transitive = [depset([2])], order = "topological").to_list()
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "pre"), "[1, 2]");
    // Topological reverses the postorder walk: the root comes first.
    assert_eq!(repr_of(&result, "topo"), "[1, 2]");
}

#[test]
fn depset_incompatible_orders_fail() {
    let err = eval_bzl(indoc! {r#"
        b = depset([2, 3], order = "postorder")
        c = depset([3, 4], order = "topological", transitive = [b])
    "#})
    .unwrap_err();
    assert!(format!("{:#}", err).contains("incompatible"), "{:#}", err);
}

#[test]
fn depset_rejects_lists_and_dicts() {
    let err = eval_bzl("d = depset([[1]])").unwrap_err();
    assert!(
        format!("{:#}", err).contains("cannot contain items of type 'list'"),
        "{:#}",
        err
    );
    let err = eval_bzl("d = depset([{}])").unwrap_err();
    assert!(
        format!("{:#}", err).contains("cannot contain items of type 'dict'"),
        "{:#}",
        err
    );
}

#[test]
fn depset_rejects_mixed_element_types() {
    let err = eval_bzl(r#"d = depset([1, "a"])"#).unwrap_err();
    assert!(format!("{:#}", err).contains("cannot add an item"), "{:#}", err);
}

#[test]
fn depset_invalid_order_fails() {
    let err = eval_bzl(r#"d = depset([], order = "sideways")"#).unwrap_err();
    assert!(format!("{:#}", err).contains("Invalid order"), "{:#}", err);
}

#[test]
fn empty_depset_is_falsy() {
    let result = eval_bzl(indoc! {r#"
        d = depset()
        t = bool(d)
        l = d.to_list()
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "t"), "False");
    assert_eq!(repr_of(&result, "l"), "[]");
}

#[test]
fn depset_union_via_transitive() {
    let result = eval_bzl(indoc! {r#"
        u = depset(transitive = [depset([1, 2]), depset([2, 3])]).to_list()
        eq = depset([1, 2]) == depset([1, 2])
        ne = depset([1, 2]) == depset([2, 1])
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "u"), "[1, 2, 3]");
    assert_eq!(repr_of(&result, "eq"), "True");
    assert_eq!(repr_of(&result, "ne"), "False");
}

#[test]
fn label_surface() {
    let result = eval_bzl(indoc! {r#"
        l = Label("@r//a/b:c")
        name = l.name
        pkg = l.package
        ws = l.workspace_name
        root = l.workspace_root
        s = str(l)
        main = Label("//a/b:c").workspace_root
        implicit = Label("//a/b")
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "name"), "\"c\"");
    assert_eq!(repr_of(&result, "pkg"), "\"a/b\"");
    assert_eq!(repr_of(&result, "ws"), "\"r\"");
    assert_eq!(repr_of(&result, "root"), "\"external/r\"");
    assert_eq!(repr_of(&result, "s"), "\"@r//a/b:c\"");
    assert_eq!(repr_of(&result, "main"), "\"\"");
    // Labels render without quoting; the missing :name takes the last
    // package segment.
    assert_eq!(repr_of(&result, "implicit"), "//a/b:b");
}

#[test]
fn label_parse_errors() {
    let err = eval_bzl(r#"l = Label("@repo")"#).unwrap_err();
    assert!(format!("{:#}", err).contains("missing //"), "{:#}", err);
    let err = eval_bzl(r#"l = Label("//pkg:")"#).unwrap_err();
    assert!(format!("{:#}", err).contains("empty target name"), "{:#}", err);
}

#[test]
fn select_composes_on_both_sides() {
    let result = eval_bzl(indoc! {r#"
        s1 = ["a"] + select({"//c:x": ["b"]})
        s2 = select({"//c:x": ["b"]}) + ["c"]
        s3 = select({"//c:x": ["a"]}) + select({"//c:y": ["b"]})
        t = type(s1)
    "#})
    .unwrap();
    assert!(repr_of(&result, "s1").contains("select("));
    assert!(repr_of(&result, "s2").contains("select("));
    assert!(repr_of(&result, "s3").contains("select("));
    assert_eq!(repr_of(&result, "t"), "\"select\"");
}

#[test]
fn empty_select_fails_at_construction() {
    let err = eval_bzl("s = select({})").unwrap_err();
    assert!(
        format!("{:#}", err).contains("can never resolve"),
        "{:#}",
        err
    );
}

const SIMPLE_DEFS: &str = indoc! {r#"
    def _impl(ctx):
        return []

    my_rule = rule(
        implementation = _impl,
        attrs = {"srcs": attr.label_list()},
    )
"#};

#[test]
fn rule_instantiation_registers_target() {
    let interp = interpreter_with(&[
        ("defs.bzl", SIMPLE_DEFS),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "my_rule")
                my_rule(name = "t", srcs = ["a.cc"])
            "#},
        ),
    ]);
    let result = interp.eval_file("pkg/BUILD").unwrap();
    let target = result.targets.get("t").expect("target t");
    assert_eq!(target.kind(), "my_rule");
    assert_eq!(target.label().to_string(), "//pkg:t");
    assert_eq!(
        target.attr("srcs"),
        Some(&CoercedValue::List(vec![CoercedValue::String(
            "a.cc".to_owned()
        )]))
    );
    // Implicit attributes are defaulted.
    assert_eq!(target.attr("testonly"), Some(&CoercedValue::Bool(false)));
    assert_eq!(target.attr("tags"), Some(&CoercedValue::List(Vec::new())));
}

#[test]
fn duplicate_target_name_fails() {
    let interp = interpreter_with(&[
        ("defs.bzl", SIMPLE_DEFS),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "my_rule")
                my_rule(name = "t")
                my_rule(name = "t")
            "#},
        ),
    ]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(
        format!("{:#}", err).contains("duplicate target name \"t\""),
        "{:#}",
        err
    );
}

#[test]
fn unexported_rule_cannot_be_called() {
    let interp = interpreter_with(&[
        (
            "defs.bzl",
            indoc! {r#"
                def _impl(ctx):
                    return []

                rules = {"r": rule(implementation = _impl)}
            "#},
        ),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "rules")
                rules["r"](name = "t")
            "#},
        ),
    ]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(
        format!("{:#}", err).contains("rule has not been exported"),
        "{:#}",
        err
    );
}

#[test]
fn unknown_attribute_fails() {
    let interp = interpreter_with(&[
        ("defs.bzl", SIMPLE_DEFS),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "my_rule")
                my_rule(name = "t", bogus = 1)
            "#},
        ),
    ]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(
        format!("{:#}", err).contains("unexpected attribute \"bogus\""),
        "{:#}",
        err
    );
}

#[test]
fn missing_mandatory_attribute_fails() {
    let interp = interpreter_with(&[
        (
            "defs.bzl",
            indoc! {r#"
                def _impl(ctx):
                    return []

                my_rule = rule(
                    implementation = _impl,
                    attrs = {"srcs": attr.label_list(mandatory = True)},
                )
            "#},
        ),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "my_rule")
                my_rule(name = "t")
            "#},
        ),
    ]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(
        format!("{:#}", err).contains("missing mandatory attribute \"srcs\""),
        "{:#}",
        err
    );
}

#[test]
fn attribute_type_mismatch_fails() {
    let interp = interpreter_with(&[
        ("defs.bzl", SIMPLE_DEFS),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "my_rule")
                my_rule(name = "t", srcs = "a.cc")
            "#},
        ),
    ]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(format!("{:#}", err).contains("expected list"), "{:#}", err);
}

#[test]
fn configurable_attribute_stores_select() {
    let interp = interpreter_with(&[
        ("defs.bzl", SIMPLE_DEFS),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "my_rule")
                my_rule(name = "t", srcs = ["a.cc"] + select({"//c:x": ["b.cc"]}))
            "#},
        ),
    ]);
    let result = interp.eval_file("pkg/BUILD").unwrap();
    let target = result.targets.get("t").unwrap();
    assert!(matches!(
        target.attr("srcs"),
        Some(CoercedValue::Select(_))
    ));
}

#[test]
fn rule_call_outside_build_file_fails() {
    let err = eval_bzl(indoc! {r#"
        def _impl(ctx):
            return []

        my_rule = rule(implementation = _impl)
        my_rule(name = "t")
    "#})
    .unwrap_err();
    assert!(
        format!("{:#}", err).contains("BUILD file evaluation"),
        "{:#}",
        err
    );
}

#[test]
fn load_cycle_is_detected() {
    let interp = interpreter_with(&[
        (
            "a.bzl",
            indoc! {r#"
                load("//:b.bzl", "X")
                Y = 1
            "#},
        ),
        (
            "b.bzl",
            indoc! {r#"
                load("//:a.bzl", "Y")
                X = 1
            "#},
        ),
    ]);
    let err = interp.eval_file("a.bzl").unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("Starlark load cycle"), "{}", message);
    assert!(message.contains("//:a.bzl"), "{}", message);
    assert!(message.contains("//:b.bzl"), "{}", message);
}

#[test]
fn loads_are_cached_across_packages() {
    let interp = interpreter_with(&[
        ("defs.bzl", SIMPLE_DEFS),
        (
            "a/BUILD",
            "load(\"//:defs.bzl\", \"my_rule\")\nmy_rule(name = \"x\")\n",
        ),
        (
            "b/BUILD",
            "load(\"//:defs.bzl\", \"my_rule\")\nmy_rule(name = \"y\")\n",
        ),
    ]);
    assert!(interp.eval_file("a/BUILD").unwrap().targets.get("x").is_some());
    assert!(interp.eval_file("b/BUILD").unwrap().targets.get("y").is_some());
    interp.clear_module_cache();
    assert!(interp.eval_file("a/BUILD").is_ok());
}

#[test]
fn load_requires_bzl_extension() {
    let interp = interpreter_with(&[("x.txt", ""), ("pkg/BUILD", "load(\"//:x.txt\", \"a\")\n")]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(
        format!("{:#}", err).contains(".bzl or .scl extension"),
        "{:#}",
        err
    );
}

#[test]
fn glob_skips_subpackages() {
    let interp = interpreter_with(&[
        ("pkg/BUILD", "r = glob([\"**/*.cc\"])\n"),
        ("pkg/foo.cc", ""),
        ("pkg/sub/BUILD", ""),
        ("pkg/sub/bar.cc", ""),
    ]);
    let result = interp.eval_file("pkg/BUILD").unwrap();
    assert_eq!(repr_of(&result, "r"), "[\"foo.cc\"]");
}

#[test]
fn glob_allow_empty() {
    let interp = interpreter_with(&[
        ("pkg/BUILD", "r = glob([\"*.xyz\"])\n"),
        ("pkg/foo.cc", ""),
    ]);
    let result = interp.eval_file("pkg/BUILD").unwrap();
    assert_eq!(repr_of(&result, "r"), "[]");

    let interp = interpreter_with(&[
        ("pkg/BUILD", "r = glob([\"*.xyz\"], allow_empty = False)\n"),
        ("pkg/foo.cc", ""),
    ]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(format!("{:#}", err).contains("matched no files"), "{:#}", err);
}

#[test]
fn glob_validates_patterns() {
    let interp = interpreter_with(&[("pkg/BUILD", "r = glob([\"a?.cc\"])\n"), ("pkg/a.cc", "")]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(format!("{:#}", err).contains("forbidden '?'"), "{:#}", err);
}

#[test]
fn glob_disambiguates_at_prefix() {
    let interp = interpreter_with(&[
        ("pkg/BUILD", "r = glob([\"@*\"])\n"),
        ("pkg/@weird.txt", ""),
    ]);
    let result = interp.eval_file("pkg/BUILD").unwrap();
    assert_eq!(repr_of(&result, "r"), "[\":@weird.txt\"]");
}

#[test]
fn existing_rule_views() {
    let interp = interpreter_with(&[
        ("defs.bzl", SIMPLE_DEFS),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "my_rule")
                my_rule(name = "t", srcs = ["a.cc"])
                e = native.existing_rule("t")
                kind = e["kind"]
                name = e.get("name")
                srcs = e.get("srcs")
                has_srcs = "srcs" in e
                missing = native.existing_rule("nope")
                iter_keys = [k for k in e]
                all_rules = native.existing_rules()
                all_names = all_rules.keys()
                my_rule(name = "u")
                late_names = native.existing_rules().keys()
            "#},
        ),
    ]);
    let result = interp.eval_file("pkg/BUILD").unwrap();
    assert_eq!(repr_of(&result, "kind"), "\"my_rule\"");
    assert_eq!(repr_of(&result, "name"), "\"t\"");
    assert_eq!(repr_of(&result, "srcs"), "[\"a.cc\"]");
    assert_eq!(repr_of(&result, "has_srcs"), "True");
    assert_eq!(repr_of(&result, "missing"), "None");
    // name and kind lead the iteration order.
    assert!(repr_of(&result, "iter_keys").starts_with("[\"name\", \"kind\""));
    // The earlier snapshot does not see the later target.
    assert_eq!(repr_of(&result, "all_names"), "[\"t\"]");
    assert_eq!(repr_of(&result, "late_names"), "[\"t\", \"u\"]");
}

#[test]
fn package_info_functions() {
    let interp = interpreter_with(&[(
        "some/pkg/BUILD",
        indoc! {r#"
            package(default_visibility = ["//visibility:public"], default_testonly = True)
            pn = package_name()
            rn = repo_name()
            rrn = repository_name()
            l = str(package_relative_label(":x"))
            native_pn = native.package_name()
        "#},
    )]);
    let result = interp.eval_file("some/pkg/BUILD").unwrap();
    assert_eq!(repr_of(&result, "pn"), "\"some/pkg\"");
    assert_eq!(repr_of(&result, "rn"), "\"\"");
    assert_eq!(repr_of(&result, "rrn"), "\"@\"");
    assert_eq!(repr_of(&result, "l"), "\"//some/pkg:x\"");
    assert_eq!(repr_of(&result, "native_pn"), "\"some/pkg\"");
}

#[test]
fn package_can_only_be_called_once() {
    let interp = interpreter_with(&[(
        "pkg/BUILD",
        "package(default_testonly = True)\npackage(default_testonly = False)\n",
    )]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(format!("{:#}", err).contains("once per BUILD file"), "{:#}", err);
}

#[test]
fn native_functions_fail_outside_build_files() {
    let interp = interpreter_with(&[(
        "pkg/BUILD",
        indoc! {r#"
            r = glob(["*"])
        "#},
    )]);
    // Fine in a BUILD file...
    interp.eval_file("pkg/BUILD").unwrap();
    // ...but glob is not even predeclared for .bzl files.
    let err = eval_bzl("r = glob([\"*\"])").unwrap_err();
    assert!(format!("{:#}", err).contains("glob"), "{:#}", err);
}

#[test]
fn subpackages_lists_direct_package_roots() {
    let interp = interpreter_with(&[
        ("pkg/BUILD", "sp = subpackages(include = [\"*\"])\n"),
        ("pkg/sub/BUILD", ""),
        ("pkg/sub/nested/BUILD", ""),
        ("pkg/plain/file.txt", ""),
    ]);
    let result = interp.eval_file("pkg/BUILD").unwrap();
    assert_eq!(repr_of(&result, "sp"), "[\"sub\"]");
}

#[test]
fn exports_files_and_licenses() {
    let interp = interpreter_with(&[(
        "pkg/BUILD",
        indoc! {r#"
            licenses(["notice"])
            exports_files(["a.txt", "b.txt"], visibility = ["//visibility:public"])
        "#},
    )]);
    interp.eval_file("pkg/BUILD").unwrap();
}

#[test]
fn attr_descriptor_surface() {
    let result = eval_bzl(indoc! {r#"
        d = attr.string(default = "x", doc = "a string")
        dd = d.default
        dm = d.mandatory
        implicit = attr.int().default
        t = type(d)
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "dd"), "\"x\"");
    assert_eq!(repr_of(&result, "dm"), "False");
    assert_eq!(repr_of(&result, "implicit"), "0");
    assert_eq!(repr_of(&result, "t"), "\"Attribute\"");
}

#[test]
fn attr_label_option_validation() {
    let err = eval_bzl("d = attr.label(allow_files = True, allow_single_file = True)").unwrap_err();
    assert!(
        format!("{:#}", err).contains("Cannot specify both allow_files and allow_single_file"),
        "{:#}",
        err
    );
    let err = eval_bzl("d = attr.label(executable = True)").unwrap_err();
    assert!(
        format!("{:#}", err).contains("cfg parameter is mandatory"),
        "{:#}",
        err
    );
}

#[test]
fn attr_allowed_values_are_enforced() {
    let interp = interpreter_with(&[
        (
            "defs.bzl",
            indoc! {r#"
                def _impl(ctx):
                    return []

                my_rule = rule(
                    implementation = _impl,
                    attrs = {"mode": attr.string(values = ["fast", "small"])},
                )
            "#},
        ),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "my_rule")
                my_rule(name = "t", mode = "slow")
            "#},
        ),
    ]);
    let err = interp.eval_file("pkg/BUILD").unwrap_err();
    assert!(
        format!("{:#}", err).contains("not one of the allowed values"),
        "{:#}",
        err
    );
}

#[test]
fn aspect_exports_like_rules() {
    let result = eval_bzl(indoc! {r#"
        def _aspect_impl(target, ctx):
            return []

        my_aspect = aspect(implementation = _aspect_impl, attr_aspects = ["deps"])
        t = type(my_aspect)
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "t"), "\"aspect\"");
}

#[test]
fn aspect_attribute_restrictions() {
    let err = eval_bzl(indoc! {r#"
        def _aspect_impl(target, ctx):
            return []

        my_aspect = aspect(
            implementation = _aspect_impl,
            attrs = {"_tool": attr.string()},
        )
    "#})
    .unwrap_err();
    assert!(
        format!("{:#}", err).contains("must have type label or label_list"),
        "{:#}",
        err
    );
}

#[test]
fn struct_comes_from_the_host_library() {
    let result = eval_bzl(indoc! {r#"
        s = struct(a = 1, b = "x")
        sa = s.a
    "#})
    .unwrap();
    assert_eq!(repr_of(&result, "sa"), "1");
}

const WRITE_DEFS: &str = indoc! {r#"
    def _impl(ctx):
        o = ctx.actions.declare_file("out.txt")
        ctx.actions.write(output = o, content = "hi")
        return []

    my_rule = rule(implementation = _impl)
"#};

#[test]
fn action_recording_round_trip() {
    let interp = interpreter_with(&[("defs.bzl", WRITE_DEFS)]);
    let result = interp
        .analyze(
            "//:defs.bzl",
            "my_rule",
            &RuleContextSpec {
                label: "//pkg:t".to_owned(),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(result.actions.len(), 1);
    let action = &result.actions[0];
    assert_eq!(action.kind, ActionKind::Write);
    assert_eq!(action.content.as_deref(), Some("hi"));
    assert_eq!(action.outputs.len(), 1);
    assert_eq!(action.outputs[0].short_path(), "pkg/out.txt");
    assert_eq!(action.outputs[0].path(), "bazel-out/bin/pkg/out.txt");
    assert!(!action.outputs[0].is_source());
}

#[test]
fn run_action_with_args_and_default_info() {
    let interp = interpreter_with(&[(
        "defs.bzl",
        indoc! {r#"
            def _impl(ctx):
                out = ctx.actions.declare_file(ctx.label.name + ".o")
                args = ctx.actions.args()
                args.add("-c")
                args.add(out)
                ctx.actions.run(
                    outputs = [out],
                    executable = "gcc",
                    arguments = [args],
                    mnemonic = "Compile",
                    env = {"LANG": "C"},
                )
                return [DefaultInfo(files = depset([out]))]

            my_rule = rule(implementation = _impl)
        "#},
    )]);
    let result = interp
        .analyze(
            "//:defs.bzl",
            "my_rule",
            &RuleContextSpec {
                label: "//pkg:t".to_owned(),
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(result.actions.len(), 1);
    let action = &result.actions[0];
    assert_eq!(action.kind, ActionKind::Run);
    assert_eq!(action.mnemonic, "Compile");
    assert_eq!(action.executable_str.as_deref(), Some("gcc"));
    assert_eq!(
        action.arguments,
        vec!["-c".to_owned(), "bazel-out/bin/pkg/t.o".to_owned()]
    );
    assert_eq!(action.env, vec![("LANG".to_owned(), "C".to_owned())]);
    assert_eq!(result.providers.len(), 1);
    assert!(result.providers[0].contains("DefaultInfo"), "{:?}", result.providers);
}

#[test]
fn do_nothing_records_without_outputs() {
    let interp = interpreter_with(&[(
        "defs.bzl",
        indoc! {r#"
            def _impl(ctx):
                ctx.actions.do_nothing(mnemonic = "Noop")
                return []

            my_rule = rule(implementation = _impl)
        "#},
    )]);
    let result = interp
        .analyze("//:defs.bzl", "my_rule", &RuleContextSpec::default())
        .unwrap();
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].kind, ActionKind::DoNothing);
    assert!(result.actions[0].outputs.is_empty());
}

#[test]
fn symlink_requires_exactly_one_target() {
    let defs = indoc! {r#"
        def _impl(ctx):
            o = ctx.actions.declare_symlink("link")
            ctx.actions.symlink(output = o)
            return []

        my_rule = rule(implementation = _impl)
    "#};
    let interp = interpreter_with(&[("defs.bzl", defs)]);
    let err = interp
        .analyze("//:defs.bzl", "my_rule", &RuleContextSpec::default())
        .unwrap_err();
    assert!(
        format!("{:#}", err).contains("exactly one of target_file or target_path"),
        "{:#}",
        err
    );

    let defs = indoc! {r#"
        def _impl(ctx):
            o = ctx.actions.declare_symlink("link")
            ctx.actions.symlink(output = o, target_path = "/etc/hosts")
            return []

        my_rule = rule(implementation = _impl)
    "#};
    let interp = interpreter_with(&[("defs.bzl", defs)]);
    let result = interp
        .analyze("//:defs.bzl", "my_rule", &RuleContextSpec::default())
        .unwrap();
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].kind, ActionKind::Symlink);
    assert_eq!(result.actions[0].target_path.as_deref(), Some("/etc/hosts"));
    assert!(result.actions[0].outputs[0].is_symlink());
}

#[test]
fn expand_template_records_substitutions() {
    let interp = interpreter_with(&[(
        "defs.bzl",
        indoc! {r#"
            def _impl(ctx):
                t = ctx.actions.declare_file("in.tpl")
                o = ctx.actions.declare_file("out")
                ctx.actions.expand_template(
                    template = t,
                    output = o,
                    substitutions = {"{NAME}": "world"},
                )
                return []

            my_rule = rule(implementation = _impl)
        "#},
    )]);
    let result = interp
        .analyze("//:defs.bzl", "my_rule", &RuleContextSpec::default())
        .unwrap();
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].kind, ActionKind::ExpandTemplate);
    assert_eq!(
        result.actions[0].substitutions,
        vec![("{NAME}".to_owned(), "world".to_owned())]
    );
}

#[test]
fn outputs_executable_only_for_executable_rules() {
    let defs = indoc! {r#"
        def _bin_impl(ctx):
            e = ctx.outputs.executable
            ctx.actions.write(output = e, content = "#!/bin/sh")
            return []

        my_bin = rule(implementation = _bin_impl, executable = True)

        def _lib_impl(ctx):
            e = ctx.outputs.executable
            return []

        my_lib = rule(implementation = _lib_impl)
    "#};
    let interp = interpreter_with(&[("defs.bzl", defs)]);

    let spec = RuleContextSpec {
        label: "//pkg:t".to_owned(),
        ..Default::default()
    };
    let result = interp.analyze("//:defs.bzl", "my_bin", &spec).unwrap();
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].outputs[0].short_path(), "pkg/t");

    let err = interp.analyze("//:defs.bzl", "my_lib", &spec).unwrap_err();
    assert!(format!("{:#}", err).contains("executable"), "{:#}", err);
}

#[test]
fn ctx_attr_and_files_views() {
    use starbzl_interpreter::types::StarlarkFile;

    let interp = interpreter_with(&[(
        "defs.bzl",
        indoc! {r#"
            def _impl(ctx):
                content = ",".join([f.basename for f in ctx.files.srcs])
                out = ctx.actions.declare_file(ctx.attr.out_name)
                ctx.actions.write(output = out, content = content)
                return []

            my_rule = rule(implementation = _impl)
        "#},
    )]);
    let result = interp
        .analyze(
            "//:defs.bzl",
            "my_rule",
            &RuleContextSpec {
                label: "//pkg:t".to_owned(),
                attrs: vec![(
                    "out_name".to_owned(),
                    CoercedValue::String("joined.txt".to_owned()),
                )],
                files: vec![(
                    "srcs".to_owned(),
                    vec![
                        StarlarkFile::source("pkg", "a.cc"),
                        StarlarkFile::source("pkg", "b.cc"),
                    ],
                )],
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(result.actions.len(), 1);
    assert_eq!(result.actions[0].content.as_deref(), Some("a.cc,b.cc"));
    assert_eq!(result.actions[0].outputs[0].short_path(), "pkg/joined.txt");
}

#[test]
fn expansion_helpers() {
    use starbzl_interpreter::types::StarlarkFile;

    let interp = interpreter_with(&[(
        "defs.bzl",
        indoc! {r#"
            def _impl(ctx):
                s = ctx.expand_location("run $(location //pkg:dep)")
                v = ctx.expand_make_variables("cmd", "$(CC) $$HOME", {})
                tokens = ctx.tokenize("a 'b c'")
                out = ctx.actions.declare_file("out")
                ctx.actions.run_shell(
                    outputs = [out],
                    command = s + ";" + v + ";" + tokens[1],
                )
                return []

            my_rule = rule(implementation = _impl)
        "#},
    )]);
    let result = interp
        .analyze(
            "//:defs.bzl",
            "my_rule",
            &RuleContextSpec {
                label: "//pkg:t".to_owned(),
                make_variables: vec![("CC".to_owned(), "gcc".to_owned())],
                location_map: vec![(
                    "//pkg:dep".to_owned(),
                    vec![StarlarkFile::source("pkg", "dep.txt")],
                )],
                ..Default::default()
            },
        )
        .unwrap();
    assert_eq!(
        result.actions[0].command.as_deref(),
        Some("run pkg/dep.txt;gcc $HOME;b c")
    );
}

#[test]
fn runfiles_and_default_info() {
    let interp = interpreter_with(&[(
        "defs.bzl",
        indoc! {r#"
            def _impl(ctx):
                a = ctx.actions.declare_file("a")
                b = ctx.actions.declare_file("b")
                r1 = ctx.runfiles(files = [a])
                r2 = ctx.runfiles(files = [b])
                merged = r1.merge(r2)
                everything = ctx.runfiles().merge_all([r1, r2])
                n = len(merged.files.to_list())
                m = len(everything.files.to_list())
                if n != 2 or m != 2:
                    fail("unexpected runfiles sizes")
                return [DefaultInfo(default_runfiles = merged)]

            my_rule = rule(implementation = _impl)
        "#},
    )]);
    let result = interp
        .analyze("//:defs.bzl", "my_rule", &RuleContextSpec::default())
        .unwrap();
    assert_eq!(result.providers.len(), 1);
}

#[test]
fn default_info_runfiles_exclusivity() {
    let interp = interpreter_with(&[(
        "defs.bzl",
        indoc! {r#"
            def _impl(ctx):
                r = ctx.runfiles()
                return [DefaultInfo(runfiles = r, default_runfiles = r)]

            my_rule = rule(implementation = _impl)
        "#},
    )]);
    let err = interp
        .analyze("//:defs.bzl", "my_rule", &RuleContextSpec::default())
        .unwrap_err();
    assert!(
        format!("{:#}", err).contains("cannot specify 'runfiles'"),
        "{:#}",
        err
    );
}

#[test]
fn output_group_info_from_kwargs() {
    let interp = interpreter_with(&[(
        "defs.bzl",
        indoc! {r#"
            def _impl(ctx):
                o = ctx.actions.declare_file("o")
                info = OutputGroupInfo(default = depset([o]), _hidden = [o])
                names = [g for g in info]
                if names != ["_hidden", "default"]:
                    fail("unexpected groups: %s" % names)
                if len(info["default"].to_list()) != 1:
                    fail("unexpected group size")
                return [info]

            my_rule = rule(implementation = _impl)
        "#},
    )]);
    let result = interp
        .analyze("//:defs.bzl", "my_rule", &RuleContextSpec::default())
        .unwrap();
    assert_eq!(result.providers.len(), 1);
    assert!(result.providers[0].contains("OutputGroupInfo"));
}

#[test]
fn stubbed_context_surfaces() {
    let interp = interpreter_with(&[(
        "defs.bzl",
        indoc! {r#"
            def _impl(ctx):
                if ctx.configuration.coverage_enabled:
                    fail("coverage should be off")
                if ctx.coverage_instrumented():
                    fail("instrumentation should be off")
                if ctx.var.get("missing"):
                    fail("no make variables expected")
                if ctx.features or ctx.disabled_features:
                    fail("no features expected")
                return []

            my_rule = rule(implementation = _impl)
        "#},
    )]);
    let result = interp
        .analyze("//:defs.bzl", "my_rule", &RuleContextSpec::default())
        .unwrap();
    assert!(result.actions.is_empty());
}

#[test]
fn build_files_may_not_define_functions() {
    let interp = interpreter_with(&[(
        "pkg/BUILD",
        indoc! {r#"
            def f():
                pass
        "#},
    )]);
    assert!(interp.eval_file("pkg/BUILD").is_err());
}

#[test]
fn test_rule_gets_test_attributes() {
    let interp = interpreter_with(&[
        (
            "defs.bzl",
            indoc! {r#"
                def _impl(ctx):
                    return []

                my_test = rule(implementation = _impl, test = True)
            "#},
        ),
        (
            "pkg/BUILD",
            indoc! {r#"
                load("//:defs.bzl", "my_test")
                my_test(name = "t", size = "small", flaky = True)
            "#},
        ),
    ]);
    let result = interp.eval_file("pkg/BUILD").unwrap();
    let target = result.targets.get("t").unwrap();
    assert!(target.is_test());
    assert!(target.is_executable());
    assert_eq!(
        target.attr("size"),
        Some(&CoercedValue::String("small".to_owned()))
    );
    assert_eq!(target.attr("flaky"), Some(&CoercedValue::Bool(true)));
    assert_eq!(target.attr("shard_count"), Some(&CoercedValue::Int(-1)));
}

#[test]
fn concurrent_loads_share_one_evaluation() {
    let interp = interpreter_with(&[
        ("defs.bzl", SIMPLE_DEFS),
        (
            "a/BUILD",
            "load(\"//:defs.bzl\", \"my_rule\")\nmy_rule(name = \"x\")\n",
        ),
        (
            "b/BUILD",
            "load(\"//:defs.bzl\", \"my_rule\")\nmy_rule(name = \"y\")\n",
        ),
    ]);
    std::thread::scope(|scope| {
        let a = scope.spawn(|| interp.eval_file("a/BUILD").map(|r| r.targets.len()));
        let b = scope.spawn(|| interp.eval_file("b/BUILD").map(|r| r.targets.len()));
        assert_eq!(a.join().unwrap().unwrap(), 1);
        assert_eq!(b.join().unwrap().unwrap(), 1);
    });
}

#[test]
fn load_failures_are_cached() {
    let interp = interpreter_with(&[(
        "broken.bzl",
        "this is not starlark (",
    )]);
    let first = interp.load_module("//:broken.bzl").unwrap_err();
    let second = interp.load_module("//:broken.bzl").unwrap_err();
    assert_eq!(format!("{:#}", first), format!("{:#}", second));
    // After an explicit clear the module is re-resolved from scratch.
    interp.clear_module_cache();
    assert!(interp.load_module("//:broken.bzl").is_err());
}
