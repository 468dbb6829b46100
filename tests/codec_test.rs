use serde_json::{Value, json};
use task_audit::codec::{Arg, Arguments, encode};

fn parse(s: &str) -> Value {
    serde_json::from_str(s).unwrap()
}

#[test]
fn positional_arguments_bind_in_declared_order() {
    let data = "hello".to_string();
    let count = 3;
    let payload = Arguments::new()
        .arg(Arg::value(&data))
        .arg(Arg::value(&count))
        .encode(&["data", "count"]);

    assert_eq!(parse(&payload), json!({"data": "hello", "count": 3}));
}

#[test]
fn keyword_arguments_override_positional_ones() {
    let first = "a";
    let second = "b";
    let payload = Arguments::new()
        .arg(Arg::value(&first))
        .kwarg("data", Arg::value(&second))
        .encode(&["data"]);

    assert_eq!(parse(&payload), json!({"data": "b"}));
}

#[test]
fn undeclared_and_surplus_arguments_are_dropped() {
    let a = 1;
    let b = 2;
    let c = 3;
    let payload = Arguments::new()
        .arg(Arg::value(&a))
        .arg(Arg::value(&b))
        .kwarg("unknown", Arg::value(&c))
        .encode(&["only"]);

    assert_eq!(parse(&payload), json!({"only": 1}));
}

#[test]
fn no_arguments_encode_as_empty_object() {
    assert_eq!(encode(&[], &[], &["data"]), "{}");
    assert_eq!(Arguments::new().encode(&[]), "{}");
}

#[derive(Debug)]
struct Connection {
    fd: i32,
}

#[test]
fn opaque_values_fall_back_to_their_debug_text() {
    let conn = Connection { fd: 7 };
    let data = "x";
    let payload = Arguments::new()
        .arg(Arg::opaque(&conn))
        .arg(Arg::value(&data))
        .encode(&["conn", "data"]);

    let value = parse(&payload);
    assert_eq!(value["conn"], json!("Connection { fd: 7 }"));
    assert_eq!(value["data"], json!("x"));
}

#[test]
fn unserializable_values_fall_back_to_debug_text() {
    use std::collections::HashMap;

    // Non-string map keys cannot become JSON object keys.
    let mut bad: HashMap<(i32, i32), i32> = HashMap::new();
    bad.insert((1, 2), 3);
    let fine = vec![1, 2];

    let payload = Arguments::new()
        .arg(Arg::value(&bad))
        .arg(Arg::value(&fine))
        .encode(&["bad", "fine"]);

    let value = parse(&payload);
    assert_eq!(value["bad"], json!("{(1, 2): 3}"));
    assert_eq!(value["fine"], json!([1, 2]));
}

#[test]
fn keys_are_emitted_in_stable_order() {
    let z = 1;
    let a = 2;
    let first = Arguments::new()
        .kwarg("zeta", Arg::value(&z))
        .kwarg("alpha", Arg::value(&a))
        .encode(&["zeta", "alpha"]);
    let second = Arguments::new()
        .kwarg("alpha", Arg::value(&a))
        .kwarg("zeta", Arg::value(&z))
        .encode(&["alpha", "zeta"]);

    assert_eq!(first, second);
    assert_eq!(first, r#"{"alpha":2,"zeta":1}"#);
}

#[test]
fn json_message_arguments() {
    let object = json!({"data": "hello", "extra": true});
    assert_eq!(
        parse(&Arguments::from_json(&object).encode(&["data"])),
        json!({"data": "hello"})
    );

    let array = json!(["hello", 5]);
    assert_eq!(
        parse(&Arguments::from_json(&array).encode(&["data", "n"])),
        json!({"data": "hello", "n": 5})
    );

    let scalar = json!("hello");
    assert_eq!(
        parse(&Arguments::from_json(&scalar).encode(&["data"])),
        json!({"data": "hello"})
    );

    assert_eq!(Arguments::from_json(&Value::Null).encode(&["data"]), "{}");
}
