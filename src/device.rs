use std::{cell::RefCell, collections::VecDeque, rc::Rc};

/// Byte-wide register window of a memory-mapped peripheral.
///
/// Offsets are local to the device: the registry subtracts the start of the
/// device's mapped range before forwarding an access.
pub trait Device {
    fn read(&mut self, offset: u32) -> u8;
    fn write(&mut self, offset: u32, value: u8);

    /// Value a read would return, without the read's side effects.
    fn peek(&self, offset: u32) -> u8;

    fn reset(&mut self) {}

    /// Installs the interrupt output. Devices without one ignore it.
    fn connect_irq(&mut self, _irq: IrqLine) {}
}

pub type SharedDevice = Rc<RefCell<dyn Device>>;

pub type MessageQueue = Rc<RefCell<VecDeque<Message>>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    AssertIrq(String),
    ClearIrq(String),
}

/// Single-bit interrupt output of a device.
pub struct IrqLine {
    callback: Box<dyn FnMut(bool)>,
    state: bool,
}

impl IrqLine {
    pub fn new(callback: impl FnMut(bool) + 'static) -> Self {
        Self {
            callback: Box::new(callback),
            state: false,
        }
    }

    /// Line that posts level changes of `source` to the machine queue.
    pub fn to_queue(source: &str, queue: MessageQueue) -> Self {
        let source = source.to_string();
        Self::new(move |state| {
            let message = if state {
                Message::AssertIrq(source.clone())
            } else {
                Message::ClearIrq(source.clone())
            };
            queue.borrow_mut().push_back(message);
        })
    }

    /// Drives the line, calling back only on level changes.
    pub fn set(&mut self, state: bool) {
        if self.state != state {
            self.state = state;
            (self.callback)(state);
        }
    }

    pub fn state(&self) -> bool {
        self.state
    }
}

impl std::fmt::Debug for IrqLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IrqLine").field("state", &self.state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_irq_line_reports_edges_only() {
        let queue: MessageQueue = Rc::new(RefCell::new(VecDeque::new()));
        let mut line = IrqLine::to_queue("via", queue.clone());

        line.set(true);
        line.set(true);
        line.set(false);
        line.set(false);

        let messages: Vec<_> = queue.borrow_mut().drain(..).collect();
        assert_eq!(
            messages,
            vec![
                Message::AssertIrq("via".to_string()),
                Message::ClearIrq("via".to_string())
            ]
        );
    }
}
