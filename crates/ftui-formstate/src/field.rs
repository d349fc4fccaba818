#![forbid(unsafe_code)]

//! User-interaction transitions: change, visit, touch, untouch.
//!
//! Visits and touches are counters: `visit` and `touch` add one on the node
//! and every ancestor, `untouch` zeroes the touch counter along the same
//! path. Visiting (by default) makes the node the tree's active field;
//! touching or untouching any field clears it.

use serde_json::Value;

use crate::node::{Node, parent_of};
use crate::state::{ChangeOptions, Patch, PatchOptions, VisitOptions};

impl Node {
    /// Store `next` as the value, passing it through the override hook.
    pub fn change(&self, next: Value) {
        self.change_with(next, ChangeOptions::default());
    }

    /// [`Self::change`] with options; `force` bypasses the override hook.
    pub fn change_with(&self, next: Value, options: ChangeOptions) {
        let hook = if options.force {
            None
        } else {
            self.cell.borrow().config.override_hook()
        };
        let next = match hook {
            Some(hook) => {
                let siblings = parent_of(&self.cell)
                    .map(|parent| parent.borrow().state.value.clone())
                    .unwrap_or(Value::Null);
                hook(&next, &siblings)
            }
            None => next,
        };
        self.patch(
            Patch::new().with_value(next),
            PatchOptions {
                silent: options.silent,
                activate: false,
            },
        );
    }

    /// Count a visit and make this node the active field.
    pub fn visit(&self) {
        self.visit_with(VisitOptions::default());
    }

    pub fn visit_with(&self, options: VisitOptions) {
        self.patch(
            Patch::visit(),
            PatchOptions {
                silent: options.silent,
                activate: options.activate,
            },
        );
    }

    /// Count a touch. Clears the tree's active field.
    pub fn touch(&self) {
        self.patch(Patch::touch(), PatchOptions::default());
    }

    /// Zero the touch counter here and on every ancestor. Clears the tree's
    /// active field like a touch does.
    pub fn untouch(&self) {
        self.patch(Patch::untouch(), PatchOptions::default());
    }

    /// Attach or clear an informational message.
    pub fn set_notice(&self, notice: Option<String>) {
        self.patch(Patch::new().with_notice(notice), PatchOptions::default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::fieldset::Registration;
    use crate::node::NodeKind;
    use serde_json::json;

    fn field(init: Value) -> Node {
        Node::new(NodeKind::Field, init)
    }

    // -- change --

    #[test]
    fn change_sets_value_and_dirty() {
        let f = field(json!(""));
        f.change(json!("bar"));
        let s = f.state();
        assert_eq!(s.value, json!("bar"));
        assert!(s.is_dirty);
        f.change(json!(""));
        assert!(f.state().is_pristine);
    }

    #[test]
    fn override_sees_next_and_siblings() {
        let set = Node::new(NodeKind::FieldSet, json!({"max": 5, "n": 0}));
        set.register(Registration::field("max")).unwrap();
        let clamp = NodeConfig::new().with_override(|next, siblings| {
            let max = siblings["max"].as_i64().unwrap_or(i64::MAX);
            json!(next.as_i64().unwrap_or(0).min(max))
        });
        let n = set
            .register(Registration::field("n").with_config(clamp))
            .unwrap();
        n.change(json!(9));
        assert_eq!(n.value(), json!(5));
        n.change_with(json!(9), ChangeOptions::forced());
        assert_eq!(n.value(), json!(9));
    }

    #[test]
    fn detached_override_gets_null_siblings() {
        let f = Node::with_config(
            NodeKind::Field,
            json!(0),
            NodeConfig::new().with_override(|next, siblings| {
                assert!(siblings.is_null());
                next.clone()
            }),
        );
        f.change(json!(1));
        assert_eq!(f.value(), json!(1));
    }

    // -- touch / untouch --

    #[test]
    fn untouch_clears_any_number_of_touches() {
        let f = field(json!(""));
        for _ in 0..5 {
            f.touch();
        }
        assert_eq!(f.state().touches, 5);
        f.untouch();
        assert!(!f.state().is_touched);
        assert_eq!(f.state().touches, 0);
    }

    #[test]
    fn visit_activates_and_touch_blurs() {
        let f = field(json!(""));
        f.visit();
        assert!(f.state().is_visited);
        assert!(f.state().is_active);
        assert!(f.state().is_focused);
        f.touch();
        assert!(!f.state().is_active);
        assert!(f.state().is_visited);
    }

    #[test]
    fn visit_without_activation() {
        let f = field(json!(""));
        f.visit_with(VisitOptions {
            activate: false,
            silent: false,
        });
        assert!(f.state().is_visited);
        assert!(!f.state().is_active);
    }

    #[test]
    fn untouch_clears_focus() {
        let f = field(json!(""));
        f.visit();
        f.untouch();
        assert!(!f.state().is_active);
    }

    #[test]
    fn touching_a_sibling_blurs_the_active_field() {
        let set = Node::new(NodeKind::FieldSet, json!({"a": "", "b": ""}));
        let a = set.register(Registration::field("a")).unwrap();
        let b = set.register(Registration::field("b")).unwrap();
        a.visit();
        b.touch();
        assert!(!a.state().is_active);
        assert!(!set.state().is_active);
        assert!(b.state().is_touched);
    }

    #[test]
    fn notice_round_trips() {
        let f = field(json!(""));
        f.set_notice(Some("saved".into()));
        assert_eq!(f.state().notice.as_deref(), Some("saved"));
        f.set_notice(None);
        assert!(f.state().notice.is_none());
    }
}
