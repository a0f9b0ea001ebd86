//! Input event queue
//!
//! The window pushes events as they arrive; the engine drains the queue once
//! per tick, before application input handling. Nothing is delivered through
//! callbacks, so scene mutation only ever happens between frames.

use std::collections::{HashSet, VecDeque};

/// Keys the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// W
    W,
    /// A
    A,
    /// S
    S,
    /// D
    D,
    /// Space bar
    Space,
    /// Left shift
    LeftShift,
    /// Escape
    Escape,
    /// Any other key, by platform scancode
    Other(u32),
}

/// A single input or window event
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// Key went down
    KeyPressed(Key),
    /// Key went up
    KeyReleased(Key),
    /// Cursor moved to window coordinates
    CursorMoved {
        /// Horizontal position
        x: f64,
        /// Vertical position
        y: f64,
    },
    /// Mouse button state changed
    MouseButton {
        /// Button index
        button: u32,
        /// True when pressed
        pressed: bool,
    },
    /// Framebuffer size changed
    Resized {
        /// New width in pixels
        width: u32,
        /// New height in pixels
        height: u32,
    },
    /// Window close requested
    CloseRequested,
}

/// FIFO of pending input events plus the derived key state
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: VecDeque<InputEvent>,
    keys_down: HashSet<Key>,
}

impl EventQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an event for the next drain
    pub fn push(&mut self, event: InputEvent) {
        self.pending.push_back(event);
    }

    /// Number of events waiting
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True when no events are waiting
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove every pending event in arrival order, updating key state
    pub fn drain(&mut self) -> Vec<InputEvent> {
        let events: Vec<InputEvent> = self.pending.drain(..).collect();
        for event in &events {
            match event {
                InputEvent::KeyPressed(key) => {
                    self.keys_down.insert(*key);
                }
                InputEvent::KeyReleased(key) => {
                    self.keys_down.remove(key);
                }
                _ => {}
            }
        }
        events
    }

    /// Whether `key` is held as of the last drain
    pub fn is_key_down(&self, key: Key) -> bool {
        self.keys_down.contains(&key)
    }
}
