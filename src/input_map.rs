/// The keys the scenes react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    Num1,
    Num2,
    Num3,
    Left,
    Right,
    Up,
    Down,
    Tab,
    Escape,
}

impl Key {
    pub const ALL: [Key; 9] = [
        Key::Num1,
        Key::Num2,
        Key::Num3,
        Key::Left,
        Key::Right,
        Key::Up,
        Key::Down,
        Key::Tab,
        Key::Escape,
    ];

    #[cfg(feature = "vulkan")]
    pub fn from_virtual_key(key: winit::event::VirtualKeyCode) -> Option<Key> {
        use winit::event::VirtualKeyCode;
        match key {
            VirtualKeyCode::Key1 | VirtualKeyCode::Numpad1 => Some(Key::Num1),
            VirtualKeyCode::Key2 | VirtualKeyCode::Numpad2 => Some(Key::Num2),
            VirtualKeyCode::Key3 | VirtualKeyCode::Numpad3 => Some(Key::Num3),
            VirtualKeyCode::Left => Some(Key::Left),
            VirtualKeyCode::Right => Some(Key::Right),
            VirtualKeyCode::Up => Some(Key::Up),
            VirtualKeyCode::Down => Some(Key::Down),
            VirtualKeyCode::Tab => Some(Key::Tab),
            VirtualKeyCode::Escape => Some(Key::Escape),
            _ => None,
        }
    }
}

const NUM_KEYS: usize = Key::ALL.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonState {
    #[default]
    Released,
    /// Went down during the current tick.
    Pressed,
    Held,
    /// Went up during the current tick.
    JustReleased,
}

impl ButtonState {
    pub fn is_down(self) -> bool {
        matches!(self, ButtonState::Pressed | ButtonState::Held)
    }
}

/// Read-only key polling, once per tick.
pub trait InputSource {
    fn state(&self, key: Key) -> ButtonState;

    fn is_down(&self, key: Key) -> bool {
        self.state(key).is_down()
    }

    fn was_pressed(&self, key: Key) -> bool {
        self.state(key) == ButtonState::Pressed
    }
}

#[derive(Debug, Default)]
pub struct InputMap {
    state: [ButtonState; NUM_KEYS],
}

impl InputMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(key: Key) -> usize {
        key as usize
    }

    pub fn update_key_press(&mut self, key: Key) {
        let state = &mut self.state[Self::index(key)];
        // Key repeat sends more presses while the key is held
        if !state.is_down() {
            *state = ButtonState::Pressed;
        }
    }

    pub fn update_key_release(&mut self, key: Key) {
        self.state[Self::index(key)] = ButtonState::JustReleased;
    }

    /// Ends a tick. Fresh presses become held, fresh releases become released.
    pub fn advance(&mut self) {
        for state in &mut self.state {
            *state = match *state {
                ButtonState::Pressed => ButtonState::Held,
                ButtonState::JustReleased => ButtonState::Released,
                other => other,
            };
        }
    }
}

impl InputSource for InputMap {
    fn state(&self, key: Key) -> ButtonState {
        self.state[Self::index(key)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_is_reported_for_one_tick() {
        let mut input = InputMap::new();
        input.update_key_press(Key::Num2);
        assert!(input.was_pressed(Key::Num2));
        assert!(input.is_down(Key::Num2));

        input.advance();
        assert!(!input.was_pressed(Key::Num2));
        assert_eq!(input.state(Key::Num2), ButtonState::Held);

        input.update_key_release(Key::Num2);
        assert_eq!(input.state(Key::Num2), ButtonState::JustReleased);
        input.advance();
        assert_eq!(input.state(Key::Num2), ButtonState::Released);
    }

    #[test]
    fn key_repeat_does_not_press_again() {
        let mut input = InputMap::new();
        input.update_key_press(Key::Left);
        input.advance();
        input.update_key_press(Key::Left);
        assert_eq!(input.state(Key::Left), ButtonState::Held);
        assert!(!input.was_pressed(Key::Left));
    }

    #[test]
    fn keys_are_independent() {
        let mut input = InputMap::new();
        input.update_key_press(Key::Tab);
        for key in Key::ALL.into_iter().filter(|key| *key != Key::Tab) {
            assert_eq!(input.state(key), ButtonState::Released);
        }
    }
}
