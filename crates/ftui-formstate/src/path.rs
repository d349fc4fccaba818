#![forbid(unsafe_code)]

//! Path segments and non-mutating access into nested values.
//!
//! A [`Route`] is the ordered list of [`Key`]s locating a node (or a value)
//! relative to some ancestor. Routes print and parse in the familiar
//! `a.b[0].c` syntax:
//!
//! ```
//! use ftui_formstate::path::{Key, Route};
//!
//! let route = Route::parse("users[2].email").unwrap();
//! assert_eq!(
//!     route.as_slice(),
//!     &[Key::from("users"), Key::Index(2), Key::from("email")]
//! );
//! assert_eq!(route.to_string(), "users[2].email");
//! ```
//!
//! [`get`], [`set`] and [`unset`] never mutate their input. `set` creates
//! missing containers on the way down, choosing an array when the segment is
//! an index and an object otherwise, and pads arrays with `null`. `unset` on an
//! array index removes the element, so later elements shift down.
//!
//! # Invariants
//!
//! - `get(&set(v, r, x)?, r) == Some(&x)` for every non-empty route `r`.
//! - No index above [`MAX_INDEX`] is ever parsed or written, so padding is
//!   bounded.
//! - `get(&unset(v, r), r)` is `None` for object keys; for array indices it
//!   yields the element that used to follow.
//! - `Route::parse(&r.to_string()) == Ok(r)` for every route whose names are
//!   free of `.`, `[` and `]`.

use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{PathError, PathErrorKind};

/// Largest array index a path may address.
pub const MAX_INDEX: usize = 65_535;

/// One path segment: an object member name or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    Index(usize),
    Name(String),
}

impl Key {
    /// The array index, if this is an index segment.
    #[must_use]
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Self::Index(i) => Some(*i),
            Self::Name(_) => None,
        }
    }

    /// The member name, if this is a name segment.
    #[must_use]
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Index(_) => None,
        }
    }

    #[must_use]
    pub fn is_index(&self) -> bool {
        matches!(self, Self::Index(_))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => f.write_str(name),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

/// An ordered sequence of [`Key`]s.
///
/// Converting a `&str` into a `Route` yields a *single* name segment; dotted
/// strings are only split by [`Route::parse`] (or anything taking
/// [`PathLike`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Route(Vec<Key>);

impl Route {
    /// The empty route, addressing the node itself.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Parse `a.b[0].c` syntax. The empty string is the empty route.
    pub fn parse(input: &str) -> Result<Self, PathError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Expect {
            Start,
            Name,
            Separator,
        }

        let bytes = input.as_bytes();
        let mut keys = Vec::new();
        let mut pos = 0;
        let mut expect = Expect::Start;

        while pos < bytes.len() {
            match bytes[pos] {
                b'.' => {
                    if expect != Expect::Separator {
                        return Err(PathError::new(input, pos, PathErrorKind::EmptySegment));
                    }
                    expect = Expect::Name;
                    pos += 1;
                }
                b'[' => {
                    if expect == Expect::Name {
                        return Err(PathError::new(input, pos, PathErrorKind::EmptySegment));
                    }
                    let close = input[pos + 1..]
                        .find(']')
                        .map(|offset| pos + 1 + offset)
                        .ok_or_else(|| {
                            PathError::new(input, pos, PathErrorKind::UnclosedBracket)
                        })?;
                    let digits = &input[pos + 1..close];
                    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                        return Err(PathError::new(input, pos + 1, PathErrorKind::InvalidIndex));
                    }
                    let index = digits
                        .parse::<usize>()
                        .ok()
                        .filter(|index| *index <= MAX_INDEX)
                        .ok_or_else(|| {
                            PathError::new(input, pos + 1, PathErrorKind::IndexTooLarge)
                        })?;
                    keys.push(Key::Index(index));
                    expect = Expect::Separator;
                    pos = close + 1;
                }
                b']' => {
                    return Err(PathError::new(input, pos, PathErrorKind::UnexpectedBracket));
                }
                _ => {
                    if expect == Expect::Separator {
                        return Err(PathError::new(input, pos, PathErrorKind::MissingSeparator));
                    }
                    let end = input[pos..]
                        .find(|c: char| matches!(c, '.' | '[' | ']'))
                        .map_or(input.len(), |offset| pos + offset);
                    keys.push(Key::Name(input[pos..end].to_owned()));
                    expect = Expect::Separator;
                    pos = end;
                }
            }
        }

        if expect == Expect::Name {
            return Err(PathError::new(
                input,
                input.len(),
                PathErrorKind::EmptySegment,
            ));
        }
        Ok(Self(keys))
    }

    #[must_use]
    pub fn as_slice(&self) -> &[Key] {
        &self.0
    }

    #[must_use]
    pub fn into_keys(self) -> Vec<Key> {
        self.0
    }

    pub fn push(&mut self, key: impl Into<Key>) {
        self.0.push(key.into());
    }

    /// This route extended by one key.
    #[must_use]
    pub fn child(&self, key: impl Into<Key>) -> Self {
        let mut keys = self.0.clone();
        keys.push(key.into());
        Self(keys)
    }

    /// This route followed by `tail`.
    #[must_use]
    pub fn join(&self, tail: &[Key]) -> Self {
        let mut keys = self.0.clone();
        keys.extend_from_slice(tail);
        Self(keys)
    }

    /// The remainder of this route after `prefix`, if it starts with it.
    #[must_use]
    pub fn strip_prefix(&self, prefix: &[Key]) -> Option<Self> {
        self.0
            .strip_prefix(prefix)
            .map(|rest| Self(rest.to_vec()))
    }
}

impl Deref for Route {
    type Target = [Key];

    fn deref(&self) -> &[Key] {
        &self.0
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&join(&self.0))
    }
}

impl FromStr for Route {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<Vec<Key>> for Route {
    fn from(keys: Vec<Key>) -> Self {
        Self(keys)
    }
}

impl From<&[Key]> for Route {
    fn from(keys: &[Key]) -> Self {
        Self(keys.to_vec())
    }
}

impl<const N: usize> From<[Key; N]> for Route {
    fn from(keys: [Key; N]) -> Self {
        Self(keys.into())
    }
}

impl From<Key> for Route {
    fn from(key: Key) -> Self {
        Self(vec![key])
    }
}

impl From<&str> for Route {
    fn from(name: &str) -> Self {
        Self(vec![Key::from(name)])
    }
}

impl From<String> for Route {
    fn from(name: String) -> Self {
        Self(vec![Key::Name(name)])
    }
}

impl From<usize> for Route {
    fn from(index: usize) -> Self {
        Self(vec![Key::Index(index)])
    }
}

impl FromIterator<Key> for Route {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a Route {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Anything that resolves to a [`Route`]: path strings are parsed, structured
/// routes pass through.
pub trait PathLike {
    fn to_route(&self) -> Result<Route, PathError>;
}

impl PathLike for str {
    fn to_route(&self) -> Result<Route, PathError> {
        Route::parse(self)
    }
}

impl PathLike for String {
    fn to_route(&self) -> Result<Route, PathError> {
        Route::parse(self)
    }
}

impl PathLike for Route {
    fn to_route(&self) -> Result<Route, PathError> {
        Ok(self.clone())
    }
}

impl PathLike for [Key] {
    fn to_route(&self) -> Result<Route, PathError> {
        Ok(Route(self.to_vec()))
    }
}

impl PathLike for Vec<Key> {
    fn to_route(&self) -> Result<Route, PathError> {
        Ok(Route(self.clone()))
    }
}

impl<const N: usize> PathLike for [Key; N] {
    fn to_route(&self) -> Result<Route, PathError> {
        Ok(Route(self.to_vec()))
    }
}

impl PathLike for Key {
    fn to_route(&self) -> Result<Route, PathError> {
        Ok(Route(vec![self.clone()]))
    }
}

impl PathLike for usize {
    fn to_route(&self) -> Result<Route, PathError> {
        Ok(Route(vec![Key::Index(*self)]))
    }
}

impl<T: PathLike + ?Sized> PathLike for &T {
    fn to_route(&self) -> Result<Route, PathError> {
        (**self).to_route()
    }
}

/// Resolve a path string or structured route.
pub fn to_route(path: impl PathLike) -> Result<Route, PathError> {
    path.to_route()
}

/// Render keys as `a.b[0].c`.
#[must_use]
pub fn join(keys: &[Key]) -> String {
    let mut out = String::new();
    for key in keys {
        match key {
            Key::Name(name) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(name);
            }
            Key::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

/// Borrow the value at `route`, if present.
#[must_use]
pub fn get<'a>(value: &'a Value, route: &[Key]) -> Option<&'a Value> {
    route
        .iter()
        .try_fold(value, |current, key| match (current, key) {
            (Value::Object(map), Key::Name(name)) => map.get(name),
            (Value::Array(items), Key::Index(i)) => items.get(*i),
            _ => None,
        })
}

/// The value at `route`, or `fallback` when absent.
#[must_use]
pub fn get_or(value: &Value, route: &[Key], fallback: Value) -> Value {
    get(value, route).cloned().unwrap_or(fallback)
}

/// A copy of `value` with `new` stored at `route`.
///
/// Fails without copying when an index segment exceeds [`MAX_INDEX`].
pub fn set(value: &Value, route: &[Key], new: Value) -> Result<Value, PathError> {
    check_indices(route)?;
    Ok(with_set(value.clone(), route, new))
}

/// Reject routes with an index segment above [`MAX_INDEX`].
pub fn check_indices(route: &[Key]) -> Result<(), PathError> {
    let Some(position) = route
        .iter()
        .position(|key| key.as_index().is_some_and(|index| index > MAX_INDEX))
    else {
        return Ok(());
    };
    // Offset of the digits inside the rendered path.
    let offset = join(&route[..position]).len() + 1;
    Err(PathError::new(
        &join(route),
        offset,
        PathErrorKind::IndexTooLarge,
    ))
}

/// A copy of `value` with the entry at `route` removed.
///
/// Array indices are spliced out. The empty route removes everything and
/// yields `null`.
#[must_use]
pub fn unset(value: &Value, route: &[Key]) -> Value {
    let mut out = value.clone();
    unset_in_place(&mut out, route);
    out
}

pub(crate) fn set_in_place(target: &mut Value, route: &[Key], new: Value) {
    let current = std::mem::take(target);
    *target = with_set(current, route, new);
}

/// Returns whether anything was removed.
pub(crate) fn unset_in_place(target: &mut Value, route: &[Key]) -> bool {
    match route {
        [] => {
            *target = Value::Null;
            true
        }
        [last] => match (target, last) {
            (Value::Object(map), Key::Name(name)) => map.shift_remove(name).is_some(),
            (Value::Array(items), Key::Index(i)) if *i < items.len() => {
                items.remove(*i);
                true
            }
            _ => false,
        },
        [first, rest @ ..] => {
            let child = match (target, first) {
                (Value::Object(map), Key::Name(name)) => map.get_mut(name),
                (Value::Array(items), Key::Index(i)) => items.get_mut(*i),
                _ => None,
            };
            child.is_some_and(|child| unset_in_place(child, rest))
        }
    }
}

/// Insert `new` at array index `index` of the array at the top of `target`,
/// turning non-arrays into an array first. Indices past the end append.
pub(crate) fn insert_index(target: &mut Value, index: usize, new: Value) {
    if !target.is_array() {
        *target = Value::Array(Vec::new());
    }
    if let Value::Array(items) = target {
        let at = index.min(items.len());
        items.insert(at, new);
    }
}

fn with_set(current: Value, route: &[Key], new: Value) -> Value {
    let Some((key, rest)) = route.split_first() else {
        return new;
    };
    match key {
        Key::Name(name) => {
            let mut map = match current {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            let slot = map.entry(name.clone()).or_insert(Value::Null);
            let child = std::mem::take(slot);
            *slot = with_set(child, rest, new);
            Value::Object(map)
        }
        Key::Index(index) => {
            let mut items = match current {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            // Callers check indices; never pad past the bound.
            let Some(len) = index.checked_add(1).filter(|_| *index <= MAX_INDEX) else {
                return Value::Array(items);
            };
            if items.len() < len {
                items.resize(len, Value::Null);
            }
            let child = std::mem::take(&mut items[*index]);
            items[*index] = with_set(child, rest, new);
            Value::Array(items)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn route(s: &str) -> Route {
        Route::parse(s).expect("valid path")
    }

    // -- parsing --

    #[test]
    fn parse_dotted_and_indexed() {
        assert_eq!(
            route("a.b[2].c").as_slice(),
            &[Key::from("a"), Key::from("b"), Key::Index(2), Key::from("c")]
        );
        assert_eq!(route("[0][1]").as_slice(), &[Key::Index(0), Key::Index(1)]);
        assert!(route("").is_empty());
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        let cases = [
            (".a", PathErrorKind::EmptySegment),
            ("a.", PathErrorKind::EmptySegment),
            ("a..b", PathErrorKind::EmptySegment),
            ("a.[0]", PathErrorKind::EmptySegment),
            ("a[0", PathErrorKind::UnclosedBracket),
            ("a]", PathErrorKind::UnexpectedBracket),
            ("a[x]", PathErrorKind::InvalidIndex),
            ("a[]", PathErrorKind::InvalidIndex),
            ("a[-1]", PathErrorKind::InvalidIndex),
            ("a[0]b", PathErrorKind::MissingSeparator),
        ];
        for (input, kind) in cases {
            let err = Route::parse(input).expect_err(input);
            assert_eq!(err.kind, kind, "input {input:?}");
        }
    }

    #[test]
    fn display_round_trips() {
        for input in ["foo", "foo.bar", "foo[0]", "foo[0].bar[12].baz", "[3].x"] {
            assert_eq!(route(input).to_string(), input);
        }
    }

    #[test]
    fn names_may_hold_unicode() {
        assert_eq!(route("größe.wert").as_slice()[0], Key::from("größe"));
    }

    #[test]
    fn str_conversion_is_a_single_segment() {
        assert_eq!(Route::from("a.b").len(), 1);
        assert_eq!(to_route("a.b").unwrap().len(), 2);
    }

    #[test]
    fn strip_prefix_yields_relative_route() {
        let full = route("a.b[0]");
        assert_eq!(full.strip_prefix(&route("a")), Some(route("b[0]")));
        assert_eq!(full.strip_prefix(&route("x")), None);
    }

    // -- get / set / unset --

    #[test]
    fn get_walks_objects_and_arrays() {
        let v = json!({"a": {"b": [10, {"c": true}]}});
        assert_eq!(get(&v, &route("a.b[1].c")), Some(&json!(true)));
        assert_eq!(get(&v, &route("a.b[9]")), None);
        assert_eq!(get(&v, &route("a[0]")), None);
        assert_eq!(get_or(&v, &route("zzz"), json!("dflt")), json!("dflt"));
    }

    #[test]
    fn set_does_not_mutate_input() {
        let v = json!({"a": 1});
        let out = set(&v, &route("b"), json!(2)).unwrap();
        assert_eq!(v, json!({"a": 1}));
        assert_eq!(out, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn set_creates_arrays_for_index_segments() {
        let out = set(&Value::Null, &route("list[2].name"), json!("x")).unwrap();
        assert_eq!(out, json!({"list": [null, null, {"name": "x"}]}));
    }

    #[test]
    fn set_replaces_scalar_intermediates() {
        let out = set(&json!({"a": 5}), &route("a.b"), json!(1)).unwrap();
        assert_eq!(out, json!({"a": {"b": 1}}));
    }

    #[test]
    fn set_keeps_key_order() {
        let v = json!({"x": 1, "y": 2, "z": 3});
        let out = set(&v, &route("y"), json!(20)).unwrap();
        let keys: Vec<_> = out.as_object().unwrap().keys().cloned().collect();
        assert_eq!(keys, ["x", "y", "z"]);
    }

    #[test]
    fn oversized_indices_are_rejected() {
        let err = Route::parse("a[99999999999]").unwrap_err();
        assert_eq!(err.kind, PathErrorKind::IndexTooLarge);
        assert_eq!(err.offset, 2);
        let err = Route::parse("a[99999999999999999999999]").unwrap_err();
        assert_eq!(err.kind, PathErrorKind::IndexTooLarge);
        assert_eq!(route(&format!("a[{MAX_INDEX}]")).as_slice()[1], Key::Index(MAX_INDEX));

        let keys = [Key::from("a"), Key::Index(usize::MAX)];
        let err = set(&json!({}), &keys, json!(1)).unwrap_err();
        assert_eq!(err.kind, PathErrorKind::IndexTooLarge);
        assert_eq!(err.offset, 2);
        assert!(check_indices(&[Key::Index(MAX_INDEX)]).is_ok());
    }

    #[test]
    fn unset_removes_object_key_preserving_order() {
        let v = json!({"x": 1, "y": 2, "z": 3});
        let out = unset(&v, &route("y"));
        assert_eq!(serde_json::to_string(&out).unwrap(), r#"{"x":1,"z":3}"#);
        assert_eq!(get(&out, &route("y")), None);
    }

    #[test]
    fn unset_compacts_arrays() {
        let v = json!({"list": ["a", "b", "c"]});
        assert_eq!(unset(&v, &route("list[1]")), json!({"list": ["a", "c"]}));
        assert_eq!(unset(&v, &route("list[2]")), json!({"list": ["a", "b"]}));
    }

    #[test]
    fn unset_missing_path_is_unchanged_copy() {
        let v = json!({"a": {"b": 1}});
        assert_eq!(unset(&v, &route("a.c.d")), v);
        assert_eq!(unset(&v, &route("q[3]")), v);
    }

    #[test]
    fn insert_index_clamps_to_len() {
        let mut v = json!([1, 2]);
        insert_index(&mut v, 9, json!(3));
        insert_index(&mut v, 0, json!(0));
        assert_eq!(v, json!([0, 1, 2, 3]));
    }
}
