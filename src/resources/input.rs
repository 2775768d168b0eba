//! Platform-agnostic input system
//!
//! Defines input event types and the polled queue the kernel drains each
//! frame. Concrete platform adapters (SDL, OIS, …) translate native events
//! into these types. Per-scene action bindings map events to named actions;
//! consumers are offered events in scene → GUI → editor order, and the
//! first consumer wins.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Keyboard key enumeration (platform-agnostic).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    A, B, C, D, E, F, G, H, I, J, K, L, M,
    N, O, P, Q, R, S, T, U, V, W, X, Y, Z,
    Key0, Key1, Key2, Key3, Key4, Key5, Key6, Key7, Key8, Key9,
    F1, F2, F3, F4, F5, F6, F7, F8, F9, F10, F11, F12,
    Space, Enter, Escape, Backspace, Tab, Delete,
    Home, End, PageUp, PageDown,
    ShiftLeft, ShiftRight, ControlLeft, ControlRight, AltLeft, AltRight,
    ArrowUp, ArrowDown, ArrowLeft, ArrowRight,
}

/// Mouse button enumeration.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
    Extra(u8),
}

/// One polled input event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key {
        key: Key,
        pressed: bool,
    },
    MouseMove {
        x: f32,
        y: f32,
        dx: f32,
        dy: f32,
    },
    MouseButton {
        button: MouseButton,
        pressed: bool,
        x: f32,
        y: f32,
    },
    MouseWheel {
        delta: f32,
    },
    JoystickAxis {
        joystick: u8,
        axis: u8,
        value: f32,
    },
    JoystickButton {
        joystick: u8,
        button: u8,
        pressed: bool,
    },
}

/// The polled event queue fed by platform adapters.
#[derive(Default)]
pub struct InputQueue {
    events: VecDeque<InputEvent>,
}

impl InputQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: InputEvent) {
        self.events.push_back(event);
    }

    pub fn poll(&mut self) -> Option<InputEvent> {
        self.events.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Something an input event can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Binding {
    Key(Key),
    MouseButton(MouseButton),
    JoystickButton { joystick: u8, button: u8 },
}

/// A scene-defined action identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionId(pub u32);

/// Per-scene action list with key bindings.
#[derive(Default)]
pub struct ActionBindings {
    names: Vec<String>,
    bindings: FxHashMap<Binding, ActionId>,
}

impl ActionBindings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named action and returns its id.
    pub fn register_action(&mut self, name: impl Into<String>) -> ActionId {
        let id = ActionId(self.names.len() as u32);
        self.names.push(name.into());
        id
    }

    /// Binds an input to an action; a binding maps to one action at a time.
    pub fn bind(&mut self, binding: Binding, action: ActionId) {
        self.bindings.insert(binding, action);
    }

    pub fn unbind(&mut self, binding: Binding) {
        self.bindings.remove(&binding);
    }

    #[must_use]
    pub fn action_name(&self, action: ActionId) -> Option<&str> {
        self.names.get(action.0 as usize).map(String::as_str)
    }

    /// Resolves a pressed event to bound actions. Release events resolve
    /// too; the caller distinguishes via the original event.
    #[must_use]
    pub fn resolve(&self, event: &InputEvent) -> SmallVec<[ActionId; 2]> {
        let binding = match event {
            InputEvent::Key { key, .. } => Some(Binding::Key(*key)),
            InputEvent::MouseButton { button, .. } => Some(Binding::MouseButton(*button)),
            InputEvent::JoystickButton {
                joystick, button, ..
            } => Some(Binding::JoystickButton {
                joystick: *joystick,
                button: *button,
            }),
            _ => None,
        };
        let mut actions = SmallVec::new();
        if let Some(binding) = binding
            && let Some(action) = self.bindings.get(&binding)
        {
            actions.push(*action);
        }
        actions
    }
}

/// A layer in the input consumer chain.
pub trait InputConsumer {
    fn name(&self) -> &str;

    /// Returns true when the event was consumed; the chain stops there.
    fn consume(&mut self, event: &InputEvent) -> bool;
}

/// Dispatches queued events through the consumer chain in registration
/// order (scene first, then GUI, then editor). First consumer wins.
pub fn dispatch_queue(queue: &mut InputQueue, consumers: &mut [&mut dyn InputConsumer]) -> usize {
    let mut dispatched = 0;
    while let Some(event) = queue.poll() {
        for consumer in consumers.iter_mut() {
            if consumer.consume(&event) {
                break;
            }
        }
        dispatched += 1;
    }
    dispatched
}
