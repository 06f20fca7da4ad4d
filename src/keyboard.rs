use std::{cell::RefCell, rc::Rc};

/// Input side of a parallel interface: eight data lines and a strobe.
pub trait ParallelInput {
    fn set_data_line(&mut self, line: u8, state: bool);
    fn set_strobe(&mut self, state: bool);
}

/// Presents key bytes to a parallel interface the way the keyboard
/// encoder does: data lines bit 0 first, then a high-low strobe pulse.
pub struct KeyEventSerializer<P: ParallelInput + ?Sized> {
    target: Rc<RefCell<P>>,
}

impl<P: ParallelInput + ?Sized> KeyEventSerializer<P> {
    pub fn new(target: Rc<RefCell<P>>) -> Self {
        Self { target }
    }

    /// Zero means no key and is not transmitted.
    pub fn submit(&self, key: u8) {
        if key == 0 {
            return;
        }

        tracing::trace!("[KBD] Submitting key {:02X}", key);
        let mut target = self.target.borrow_mut();
        for bit in 0..8 {
            target.set_data_line(bit, (key >> bit) & 1 != 0);
        }
        target.set_strobe(true);
        target.set_strobe(false);
    }
}

/// Translates host key names (DOM `KeyboardEvent.code` values) to the ASCII
/// bytes the keyboard encoder produces.
#[derive(Debug, Clone)]
pub struct Keyboard {
    shift: bool,
    control: bool,
    mappings: Vec<Mapping>,
}

impl Keyboard {
    pub fn new() -> Self {
        Keyboard::default()
    }

    /// Returns the byte to transmit for `key`, or 0 when the key produces
    /// nothing (modifiers, unmapped keys).
    pub fn key_down(&mut self, key: &str) -> u8 {
        match key {
            "ShiftLeft" | "ShiftRight" => {
                self.shift = true;
                return 0;
            }
            "ControlLeft" | "ControlRight" => {
                self.control = true;
                return 0;
            }
            _ => {}
        }

        let Some(mapping) = self.mappings.iter().find(|m| m.key == key) else {
            tracing::debug!("[KBD] Unmapped key {}", key);
            return 0;
        };

        let code = if self.shift {
            mapping.shifted
        } else {
            mapping.normal
        };
        if self.control && code.is_ascii_alphabetic() {
            code & 0x1F
        } else {
            code
        }
    }

    pub fn key_up(&mut self, key: &str) {
        match key {
            "ShiftLeft" | "ShiftRight" => self.shift = false,
            "ControlLeft" | "ControlRight" => self.control = false,
            _ => {}
        }
    }
}

impl Default for Keyboard {
    fn default() -> Self {
        Keyboard {
            shift: false,
            control: false,
            mappings: default_mapping(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Mapping {
    key: String,
    normal: u8,
    shifted: u8,
}

impl Mapping {
    pub fn new(key: &str, normal: u8, shifted: u8) -> Self {
        Mapping {
            key: key.to_string(),
            normal,
            shifted,
        }
    }
}

fn default_mapping() -> Vec<Mapping> {
    let mut mappings: Vec<Mapping> = (b'A'..=b'Z')
        .map(|c| Mapping::new(&format!("Key{}", c as char), c.to_ascii_lowercase(), c))
        .collect();

    let digits = [
        ("Digit0", b'0', b')'),
        ("Digit1", b'1', b'!'),
        ("Digit2", b'2', b'@'),
        ("Digit3", b'3', b'#'),
        ("Digit4", b'4', b'$'),
        ("Digit5", b'5', b'%'),
        ("Digit6", b'6', b'^'),
        ("Digit7", b'7', b'&'),
        ("Digit8", b'8', b'*'),
        ("Digit9", b'9', b'('),
    ];
    mappings.extend(digits.iter().map(|&(k, n, s)| Mapping::new(k, n, s)));

    mappings.extend([
        Mapping::new("Minus", b'-', b'_'),
        Mapping::new("Equal", b'=', b'+'),
        Mapping::new("BracketLeft", b'[', b'{'),
        Mapping::new("BracketRight", b']', b'}'),
        Mapping::new("Backslash", b'\\', b'|'),
        Mapping::new("Semicolon", b';', b':'),
        Mapping::new("Quote", b'\'', b'"'),
        Mapping::new("Backquote", b'`', b'~'),
        Mapping::new("Comma", b',', b'<'),
        Mapping::new("Period", b'.', b'>'),
        Mapping::new("Slash", b'/', b'?'),
        Mapping::new("Space", b' ', b' '),
        Mapping::new("Enter", 0x0D, 0x0D),
        Mapping::new("Backspace", 0x08, 0x08),
        Mapping::new("Tab", 0x09, 0x09),
        Mapping::new("Escape", 0x1B, 0x1B),
        Mapping::new("Delete", 0x7F, 0x7F),
    ]);
    mappings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Data(u8, bool),
        Strobe(bool),
    }

    #[derive(Default)]
    struct Recorder {
        events: Vec<Event>,
    }

    impl ParallelInput for Recorder {
        fn set_data_line(&mut self, line: u8, state: bool) {
            self.events.push(Event::Data(line, state));
        }

        fn set_strobe(&mut self, state: bool) {
            self.events.push(Event::Strobe(state));
        }
    }

    #[test]
    fn test_zero_is_not_transmitted() {
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        KeyEventSerializer::new(recorder.clone()).submit(0);
        assert!(recorder.borrow().events.is_empty());
    }

    #[test]
    fn test_bits_then_strobe() {
        let recorder = Rc::new(RefCell::new(Recorder::default()));
        KeyEventSerializer::new(recorder.clone()).submit(0b1011_0001);

        assert_eq!(
            recorder.borrow().events,
            vec![
                Event::Data(0, true),
                Event::Data(1, false),
                Event::Data(2, false),
                Event::Data(3, false),
                Event::Data(4, true),
                Event::Data(5, true),
                Event::Data(6, false),
                Event::Data(7, true),
                Event::Strobe(true),
                Event::Strobe(false),
            ]
        );
    }

    #[test]
    fn test_keyboard_mapping() {
        let mut keyboard = Keyboard::new();
        assert_eq!(keyboard.key_down("KeyA"), b'a');
        assert_eq!(keyboard.key_down("ShiftLeft"), 0);
        assert_eq!(keyboard.key_down("KeyA"), b'A');
        assert_eq!(keyboard.key_down("Digit2"), b'@');
        keyboard.key_up("ShiftLeft");
        assert_eq!(keyboard.key_down("Digit2"), b'2');
        assert_eq!(keyboard.key_down("Enter"), 0x0D);
        assert_eq!(keyboard.key_down("F13"), 0);
    }

    #[test]
    fn test_control_letters() {
        let mut keyboard = Keyboard::new();
        keyboard.key_down("ControlLeft");
        assert_eq!(keyboard.key_down("KeyC"), 0x03);
        keyboard.key_up("ControlLeft");
        assert_eq!(keyboard.key_down("KeyC"), b'c');
    }
}
