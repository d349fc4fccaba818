#![forbid(unsafe_code)]

//! End-to-end form scenarios.
//!
//! Each test drives a form the way a UI layer would (register on mount,
//! change/visit/touch from event handlers, unregister on unmount) and checks
//! the observable state:
//!
//! 1. `change(v)` stores `v`; dirty iff `v != init`.
//! 2. `untouch` clears any number of touches.
//! 3. A field set's value is the composition of its children's values.
//! 4. `reset` is idempotent.
//! 5. Registering a route twice yields the same node.
//! 6. Unregistering removes exactly that key from the parent's value and init.
//! 7. `to_json` equals the hand-built nested value.
//! 8. Change, touch, reset on an active field keeps it active.
//! 9. `touch_all` counts one touch per child and sets `any_touched`.
//! 10. Unregistering a field set unregisters its descendants.

use std::cell::RefCell;
use std::rc::Rc;

use ftui_formstate::{
    Form, FormError, Key, NodeConfig, NodeKind, Registration, Route, Snapshot, Submission,
    Validation, ValidationError,
};
use serde_json::{Value, json};

// ============================================================================
// Helpers
// ============================================================================

fn required(v: &Value) -> Validation {
    match v.as_str() {
        Some(s) if !s.is_empty() => Validation::Valid,
        _ => ValidationError::new("required", "{field} is required")
            .with_param("field", "value")
            .into(),
    }
}

fn record(node: &ftui_formstate::Node) -> (Rc<RefCell<Vec<Snapshot>>>, ftui_formstate::Subscription) {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let sub = node.subscribe(move |s| sink.borrow_mut().push(s.clone()));
    (seen, sub)
}

// ============================================================================
// Field transitions
// ============================================================================

#[test]
fn change_then_touch_then_reset() {
    let form = Form::new("f", json!({"foo": ""}));
    let foo = form.register(Registration::field("foo")).unwrap();

    foo.change(json!("bar"));
    assert!(foo.state().is_dirty);
    foo.touch();
    assert!(foo.state().is_touched);
    form.reset();

    let s = foo.state();
    assert_eq!(s.value, json!(""));
    assert!(!s.is_touched);
    assert!(s.is_pristine);
}

#[test]
fn active_field_survives_reset() {
    let form = Form::new("f", json!({"foo": ""}));
    let foo = form.register(Registration::field("foo")).unwrap();

    foo.visit();
    foo.change(json!("bar"));
    form.reset();

    let s = foo.state();
    assert_eq!(s.value, json!(""));
    assert!(s.is_active);
    assert_eq!(form.active(), Some(foo));
}

#[test]
fn dirty_tracks_deep_equality() {
    let form = Form::new("f", json!({"obj": {"a": [1, 2]}}));
    let obj = form.register(Registration::field("obj")).unwrap();
    obj.change(json!({"a": [1, 3]}));
    assert!(obj.state().is_dirty);
    obj.change(json!({"a": [1, 2]}));
    assert!(obj.state().is_pristine);
    assert!(form.state().is_pristine);
}

#[test]
fn untouch_after_many_touches() {
    let form = Form::new("f", json!({"a": 1}));
    let a = form.register(Registration::field("a")).unwrap();
    for _ in 0..7 {
        a.touch();
    }
    assert_eq!(form.state().touches, 7);
    a.untouch();
    assert!(!a.state().is_touched);
    assert_eq!(form.state().touches, 0);
}

// ============================================================================
// Composition
// ============================================================================

#[test]
fn touch_all_counts_each_child_once() {
    let form = Form::new("f", json!({"set": {"foo": 1, "bar": 2, "baz": 3}}));
    let set = form.register(Registration::field_set("set")).unwrap();
    let kids: Vec<_> = ["foo", "bar", "baz"]
        .into_iter()
        .map(|k| set.register(Registration::field(k)).unwrap())
        .collect();

    set.touch_all();
    for kid in &kids {
        assert_eq!(kid.state().touches, 1);
    }
    assert!(set.state().any_touched);
    assert!(form.state().any_touched);
}

#[test]
fn composition_holds_through_edits() {
    let form = Form::new("f", json!({}));
    let user = form.register(Registration::field_set("user")).unwrap();
    let first = user
        .register(Registration::field("first").with_init(json!("Ada")))
        .unwrap();
    let last = user
        .register(Registration::field("last").with_init(json!("L")))
        .unwrap();

    assert_eq!(user.value(), json!({"first": "Ada", "last": "L"}));
    last.change(json!("Lovelace"));
    assert_eq!(
        form.value(),
        json!({"user": {"first": "Ada", "last": "Lovelace"}})
    );

    user.change(json!({"first": "Grace", "last": "Hopper"}));
    assert_eq!(first.value(), json!("Grace"));
    assert_eq!(last.value(), json!("Hopper"));
}

#[test]
fn register_same_route_returns_same_node() {
    let form = Form::new("f", json!({"a": {"b": 1}}));
    let a = form.register(Registration::field_set("a")).unwrap();
    let b1 = a.register(Registration::field("b")).unwrap();
    let b2 = a.register(Registration::field("b")).unwrap();
    assert_eq!(b1, b2);
    assert_eq!(b1.id(), b2.id());
    assert_eq!(form.find("a.b"), Some(b1));
}

#[test]
fn register_conflicting_kind_fails() {
    let form = Form::new("f", json!({}));
    form.register(Registration::field("x")).unwrap();
    let err = form.register(Registration::field_set("x")).unwrap_err();
    assert!(matches!(
        err,
        FormError::KindMismatch {
            existing: NodeKind::Field,
            requested: NodeKind::FieldSet,
            ..
        }
    ));
}

#[test]
fn unregister_is_set_difference() {
    let form = Form::new("f", json!({"a": 1, "b": 2, "c": 3}));
    for k in ["a", "b", "c"] {
        form.register(Registration::field(k)).unwrap();
    }
    let mut expected = form.value();
    expected.as_object_mut().unwrap().shift_remove("b");

    assert!(form.unregister_at("b").unwrap());
    assert_eq!(form.value(), expected);
    assert_eq!(form.init(), expected);
    assert!(!form.unregister_at("b").unwrap());
}

#[test]
fn unregister_field_set_drops_grandchildren() {
    let form = Form::new("f", json!({"foo": {"bar": "x"}, "keep": 1}));
    let foo = form.register(Registration::field_set("foo")).unwrap();
    let bar = foo.register(Registration::field("bar")).unwrap();

    bar.visit();
    assert!(foo.unregister());
    assert!(form.value().get("foo").is_none());
    assert!(!bar.is_attached());
    assert!(form.find("foo.bar").is_none());
    assert!(form.active().is_none());
    assert!(!form.state().is_active);
}

#[test]
fn to_json_matches_literal() {
    let form = Form::new("f", json!({}));
    let foo = form.register(Registration::field_set("foo")).unwrap();
    let bar = foo.register(Registration::field("bar")).unwrap();
    bar.change(json!("baz"));
    assert_eq!(serde_json::to_string(form.node()).unwrap(), r#"{"foo":{"bar":"baz"}}"#);
    assert_eq!(form.to_json(), json!({"foo": {"bar": "baz"}}));
}

// ============================================================================
// Arrays
// ============================================================================

#[test]
fn dynamic_rows_are_dropped_by_reset() {
    let form = Form::new("f", json!({"rows": [{"n": 1}]}));
    let rows = form.register(Registration::field_array("rows")).unwrap();
    let row0 = rows.register(Registration::field_set(0usize)).unwrap();
    row0.register(Registration::field("n")).unwrap();
    form.mark_initialized();

    rows.push(json!({"n": 2})).unwrap();
    let row1 = rows.register(Registration::field_set(1usize)).unwrap();
    assert!(row1.is_dynamic());
    assert!(!row0.is_dynamic());

    form.reset();
    assert!(!row1.is_attached());
    assert_eq!(rows.children().len(), 1);
    assert_eq!(rows.child(&Key::Index(0)), Some(row0));
}

#[test]
fn array_rejects_name_segments() {
    let form = Form::new("f", json!({"rows": []}));
    let rows = form.register(Registration::field_array("rows")).unwrap();
    let err = rows.register(Registration::field("name")).unwrap_err();
    assert!(matches!(err, FormError::SegmentMismatch { .. }));
    assert_eq!(
        Route::parse("rows[0].name").unwrap().to_string(),
        "rows[0].name"
    );
}

// ============================================================================
// Notifications and validation
// ============================================================================

#[test]
fn subscribers_see_final_state() {
    let form = Form::new("f", json!({"a": ""}));
    let a = form.register(Registration::field("a")).unwrap();
    let (seen, _sub) = record(&form);

    a.change(json!("x"));
    let last = seen.borrow().last().cloned().unwrap();
    assert_eq!(last.value, json!({"a": "x"}));
    assert!(last.is_dirty);
}

#[test]
fn validate_all_then_submit() {
    let form = Form::new("f", json!({"email": "", "name": "ok"}));
    form.register(Registration::field("email").with_config(NodeConfig::new().with_validate(required)))
        .unwrap();
    form.register(Registration::field("name").with_config(NodeConfig::new().with_validate(required)))
        .unwrap();

    form.validate_all();
    let errors = form.all_errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors["email"].format_message(), "value is required");

    form.change_field("email", json!("a@b.c")).unwrap();
    assert_eq!(
        form.submit(),
        Submission::Ready(json!({"email": "a@b.c", "name": "ok"}))
    );
}
