use tracing::trace;

use crate::{
    device::{Device, IrqLine},
    keyboard::ParallelInput,
};

const ORB: u32 = 0x0;
const ORA: u32 = 0x1;
const DDRB: u32 = 0x2;
const DDRA: u32 = 0x3;
const ACR: u32 = 0xB;
const PCR: u32 = 0xC;
const IFR: u32 = 0xD;
const IER: u32 = 0xE;
const ORA_NO_HANDSHAKE: u32 = 0xF;

pub const IFR_CA1: u8 = 0x02;
const IFR_ANY: u8 = 0x80;

/// Parallel interface with 6522-style registers. Port A is the keyboard
/// input: its eight pins are driven one line at a time and CA1 is the data
/// strobe. Timers and the shift register are plain storage.
#[derive(Debug, Default)]
pub struct Via {
    port_a_pins: u8,
    ira: u8,
    ora: u8,
    orb: u8,
    ddra: u8,
    ddrb: u8,
    acr: u8,
    pcr: u8,
    ifr: u8,
    ier: u8,
    ca1: bool,
    storage: [u8; 16],
    irq: Option<IrqLine>,
}

impl Via {
    pub fn new() -> Self {
        Via::default()
    }

    pub fn ifr(&self) -> u8 {
        if self.ifr & self.ier & 0x7F != 0 {
            self.ifr | IFR_ANY
        } else {
            self.ifr
        }
    }

    pub fn port_a_pins(&self) -> u8 {
        self.port_a_pins
    }

    pub fn irq_asserted(&self) -> bool {
        self.ifr & self.ier & 0x7F != 0
    }

    fn latching(&self) -> bool {
        self.acr & 0x01 != 0
    }

    fn port_a(&self) -> u8 {
        let input = if self.latching() {
            self.ira
        } else {
            self.port_a_pins
        };
        (self.ora & self.ddra) | (input & !self.ddra)
    }

    fn port_b(&self) -> u8 {
        // nothing drives port B inputs
        (self.orb & self.ddrb) | !self.ddrb
    }

    fn update_irq(&mut self) {
        let asserted = self.irq_asserted();
        if let Some(irq) = self.irq.as_mut() {
            irq.set(asserted);
        }
    }

    fn clear_flags(&mut self, mask: u8) {
        self.ifr &= !mask;
        self.update_irq();
    }
}

impl ParallelInput for Via {
    fn set_data_line(&mut self, line: u8, state: bool) {
        let mask = 1 << (line & 0x07);
        if state {
            self.port_a_pins |= mask;
        } else {
            self.port_a_pins &= !mask;
        }
    }

    fn set_strobe(&mut self, state: bool) {
        if self.ca1 == state {
            return;
        }
        self.ca1 = state;

        // PCR bit 0 selects the active CA1 edge: 1 = rising, 0 = falling
        let rising_active = self.pcr & 0x01 != 0;
        if state == rising_active {
            if self.latching() {
                self.ira = self.port_a_pins;
            }
            trace!("[VIA] CA1 edge, port A = {:02X}", self.port_a_pins);
            self.ifr |= IFR_CA1;
            self.update_irq();
        }
    }
}

impl Device for Via {
    fn read(&mut self, offset: u32) -> u8 {
        let value = self.peek(offset);
        if offset & 0x0F == ORA {
            self.clear_flags(IFR_CA1);
        }
        value
    }

    fn write(&mut self, offset: u32, value: u8) {
        let offset = offset & 0x0F;
        trace!("[VIA] [WR] [{:X}] = {:02X}", offset, value);
        match offset {
            ORB => self.orb = value,
            ORA => {
                self.ora = value;
                self.clear_flags(IFR_CA1);
            }
            ORA_NO_HANDSHAKE => self.ora = value,
            DDRB => self.ddrb = value,
            DDRA => self.ddra = value,
            ACR => self.acr = value,
            PCR => self.pcr = value,
            IFR => self.clear_flags(value & 0x7F),
            IER => {
                if value & 0x80 != 0 {
                    self.ier |= value & 0x7F;
                } else {
                    self.ier &= !(value & 0x7F);
                }
                self.update_irq();
            }
            _ => self.storage[offset as usize] = value,
        }
    }

    fn peek(&self, offset: u32) -> u8 {
        let offset = offset & 0x0F;
        match offset {
            ORB => self.port_b(),
            ORA | ORA_NO_HANDSHAKE => self.port_a(),
            DDRB => self.ddrb,
            DDRA => self.ddra,
            ACR => self.acr,
            PCR => self.pcr,
            IFR => self.ifr(),
            IER => self.ier | 0x80,
            _ => self.storage[offset as usize],
        }
    }

    fn reset(&mut self) {
        let irq = self.irq.take();
        *self = Via::default();
        self.irq = irq;
        self.update_irq();
    }

    fn connect_irq(&mut self, irq: IrqLine) {
        self.irq = Some(irq);
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    fn drive(via: &mut Via, value: u8) {
        for bit in 0..8 {
            via.set_data_line(bit, value & (1 << bit) != 0);
        }
    }

    #[test]
    fn test_ca1_latches_port_a_on_active_edge() {
        let mut via = Via::new();
        via.write(ACR, 0x01);
        via.write(PCR, 0x01);

        drive(&mut via, 0x41);
        assert_eq!(via.peek(ORA), 0x00);

        via.set_strobe(true);
        via.set_strobe(false);
        drive(&mut via, 0x00);

        assert_eq!(via.ifr() & IFR_CA1, IFR_CA1);
        assert_eq!(via.read(ORA), 0x41);
        assert_eq!(via.ifr() & IFR_CA1, 0);
    }

    #[test]
    fn test_falling_edge_by_default() {
        let mut via = Via::new();
        via.set_strobe(true);
        assert_eq!(via.ifr() & IFR_CA1, 0);
        via.set_strobe(false);
        assert_eq!(via.ifr() & IFR_CA1, IFR_CA1);
    }

    #[test]
    fn test_unlatched_port_a_follows_pins() {
        let mut via = Via::new();
        drive(&mut via, 0x5A);
        assert_eq!(via.read(ORA_NO_HANDSHAKE), 0x5A);
        via.write(DDRA, 0xF0);
        via.write(ORA, 0x30);
        assert_eq!(via.peek(ORA), 0x3A);
    }

    #[test]
    fn test_irq_follows_enable_and_flag() {
        let level = Rc::new(RefCell::new(Vec::new()));
        let recorder = level.clone();
        let mut via = Via::new();
        via.connect_irq(IrqLine::new(move |state| recorder.borrow_mut().push(state)));

        via.write(PCR, 0x01);
        via.set_strobe(true);
        assert!(level.borrow().is_empty());
        assert_eq!(via.ifr(), IFR_CA1);

        via.write(IER, 0x80 | IFR_CA1);
        assert_eq!(via.ifr(), IFR_ANY | IFR_CA1);
        assert_eq!(via.peek(IER), 0x80 | IFR_CA1);

        via.read(ORA);
        assert_eq!(*level.borrow(), vec![true, false]);
    }

    #[test]
    fn test_ifr_write_clears_flags() {
        let mut via = Via::new();
        via.set_strobe(true);
        via.set_strobe(false);
        via.write(IFR, IFR_CA1);
        assert_eq!(via.ifr(), 0);
    }
}
