//! Synthetic mouse events relative to an accessible

use log::debug;

use crate::a11y::{AccessibleQuery, AccessibleRef, MouseSynthesizer, Point, Role};
use crate::error::{BridgeError, BridgeResult};

/// Screen position of `target`
///
/// Applications usually report no extent of their own; their first
/// child (the main window) is tried instead.
pub fn resolve_screen_position(
    query: &dyn AccessibleQuery,
    target: &AccessibleRef,
) -> BridgeResult<Point> {
    if let Some(point) = query.screen_position(target).filter(Point::is_valid) {
        return Ok(point);
    }

    if query.role(target) != Some(Role::APPLICATION) {
        return Err(BridgeError::PositionUnresolvable);
    }

    query
        .child_at_index(target, 0)
        .and_then(|child| query.screen_position(&child))
        .filter(Point::is_valid)
        .ok_or(BridgeError::PositionUnresolvable)
}

/// Generate `event_name` at offset `(x, y)` from the target's origin
///
/// An unresolvable position aborts without error.
pub fn generate_mouse_event(
    query: &dyn AccessibleQuery,
    synth: &dyn MouseSynthesizer,
    target: &AccessibleRef,
    x: i32,
    y: i32,
    event_name: &str,
) -> BridgeResult<()> {
    match resolve_screen_position(query, target) {
        Ok(origin) => synth.generate_mouse_event(
            origin.x.saturating_add(x),
            origin.y.saturating_add(y),
            event_name,
        ),
        Err(BridgeError::PositionUnresolvable) => {
            debug!(
                "No screen position for {}{}, dropping {}",
                target.bus_name, target.path, event_name
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeDesktop {
        positions: HashMap<String, Point>,
        roles: HashMap<String, Role>,
        children: HashMap<String, AccessibleRef>,
        position_queries: RefCell<Vec<String>>,
    }

    impl FakeDesktop {
        fn with(mut self, path: &str, point: Point, role: Role) -> Self {
            self.positions.insert(path.to_string(), point);
            self.roles.insert(path.to_string(), role);
            self
        }

        fn child(mut self, parent: &str, child: &str) -> Self {
            self.children
                .insert(parent.to_string(), AccessibleRef::new(":1.5", child));
            self
        }
    }

    impl AccessibleQuery for FakeDesktop {
        fn screen_position(&self, object: &AccessibleRef) -> Option<Point> {
            self.position_queries.borrow_mut().push(object.path.clone());
            self.positions.get(&object.path).copied()
        }

        fn role(&self, object: &AccessibleRef) -> Option<Role> {
            self.roles.get(&object.path).copied()
        }

        fn child_at_index(&self, object: &AccessibleRef, index: i32) -> Option<AccessibleRef> {
            assert_eq!(index, 0);
            self.children.get(&object.path).cloned()
        }
    }

    #[derive(Default)]
    struct RecordingSynth {
        events: RefCell<Vec<(i32, i32, String)>>,
    }

    impl MouseSynthesizer for RecordingSynth {
        fn generate_mouse_event(&self, x: i32, y: i32, event_name: &str) -> BridgeResult<()> {
            self.events.borrow_mut().push((x, y, event_name.to_string()));
            Ok(())
        }
    }

    const OFFSCREEN: Point = Point { x: -1, y: -1 };

    #[test]
    fn test_offset_added_to_position() {
        let desktop = FakeDesktop::default().with("/button", Point::new(100, 50), Role(43));
        let synth = RecordingSynth::default();
        let target = AccessibleRef::new(":1.5", "/button");

        generate_mouse_event(&desktop, &synth, &target, 5, 7, "b1c").unwrap();
        assert_eq!(*synth.events.borrow(), vec![(105, 57, "b1c".to_string())]);
    }

    #[test]
    fn test_offset_saturates_at_extreme_positions() {
        let desktop =
            FakeDesktop::default().with("/edge", Point::new(i32::MAX - 1, i32::MIN + 2), Role(43));
        let synth = RecordingSynth::default();
        let target = AccessibleRef::new(":1.5", "/edge");

        generate_mouse_event(&desktop, &synth, &target, 10, -10, "b1c").unwrap();
        assert_eq!(
            *synth.events.borrow(),
            vec![(i32::MAX, i32::MIN, "b1c".to_string())]
        );
    }

    #[test]
    fn test_application_falls_back_to_first_child() {
        let desktop = FakeDesktop::default()
            .with("/app", OFFSCREEN, Role::APPLICATION)
            .with("/window", Point::new(10, 20), Role(23))
            .child("/app", "/window");
        let synth = RecordingSynth::default();
        let target = AccessibleRef::new(":1.5", "/app");

        generate_mouse_event(&desktop, &synth, &target, 1, 1, "abs").unwrap();
        assert_eq!(*synth.events.borrow(), vec![(11, 21, "abs".to_string())]);
        assert_eq!(*desktop.position_queries.borrow(), vec!["/app", "/window"]);
    }

    #[test]
    fn test_unresolved_child_aborts_silently() {
        let desktop = FakeDesktop::default()
            .with("/app", OFFSCREEN, Role::APPLICATION)
            .with("/window", OFFSCREEN, Role(23))
            .child("/app", "/window");
        let synth = RecordingSynth::default();
        let target = AccessibleRef::new(":1.5", "/app");

        generate_mouse_event(&desktop, &synth, &target, 0, 0, "b1p").unwrap();
        assert!(synth.events.borrow().is_empty());
        assert!(matches!(
            resolve_screen_position(&desktop, &target),
            Err(BridgeError::PositionUnresolvable)
        ));
    }

    #[test]
    fn test_offscreen_non_application_is_not_retried() {
        let desktop = FakeDesktop::default()
            .with("/label", Point::new(-1, 40), Role(29))
            .child("/label", "/never");
        let synth = RecordingSynth::default();
        let target = AccessibleRef::new(":1.5", "/label");

        generate_mouse_event(&desktop, &synth, &target, 0, 0, "b1c").unwrap();
        assert!(synth.events.borrow().is_empty());
        assert_eq!(*desktop.position_queries.borrow(), vec!["/label"]);
    }
}
